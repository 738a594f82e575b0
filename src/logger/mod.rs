//! Structured logging: sinks, the JSONL writer, and the event-bus log subscriber.

pub mod jsonl;
pub mod sink;
pub mod subscriber;
