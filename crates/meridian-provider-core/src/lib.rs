//! Provider-facing abstractions shared by every upstream adapter: the
//! credential pool, the pooled transport, the capability catalog, and the
//! `ProviderAdapter` trait adapters implement.
//!
//! This crate intentionally does not depend on any concrete HTTP client
//! beyond `wreq`; it has no axum dependency and no knowledge of the request
//! pipeline that calls into it.

pub mod adapter;
pub mod capability;
pub mod client;
pub mod credential;
pub mod events;
pub mod headers;
pub mod registry;

pub use adapter::{
    AdapterCtx, ChunkReceiver, ProviderAdapter, ProviderResult, TransportErrorKind,
    UnavailableDecision, UpstreamFailure, classify_failure, default_decide_unavailable,
};
pub use capability::{CapabilityCatalog, CapabilityFlags, CapabilityRecord};
pub use client::{ClientKey, ClientPool};
pub use credential::{
    Acquisition, AcquireError, CredentialId, CredentialPool, CredentialState, KeyEntry,
    UnavailableReason,
};
pub use events::{
    Event, ModelUnavailableEndEvent, ModelUnavailableStartEvent, EventHub, EventSink,
    OperationalEvent, UnavailableEndEvent, UnavailableStartEvent,
};
pub use headers::{Headers, header_get, header_remove, header_set};
pub use registry::ProviderRegistry;
