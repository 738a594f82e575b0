//! Event bus decoupling cleanup execution from observability.

pub mod bus;
pub mod types;

pub use bus::EventBus;
pub use types::{Event, EventPayload, EventType};
