mod hub;
mod types;

pub use hub::{EventHub, EventSink};
pub use types::{
    Event, ModelUnavailableEndEvent, ModelUnavailableStartEvent, OperationalEvent,
    UnavailableEndEvent, UnavailableStartEvent,
};
