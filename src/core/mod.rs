//! Core types: errors, configuration, cancellation, shared path helpers.

pub mod cancel;
pub mod config;
pub mod errors;
pub mod paths;
