mod key_entry;
mod model_unavailable_queue;
mod pool;
mod state;
mod unavailable_queue;

pub use key_entry::KeyEntry;
pub use pool::{Acquisition, AcquireError, CredentialPool};
pub use state::{CredentialId, CredentialState, UnavailableReason};
