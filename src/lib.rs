#![forbid(unsafe_code)]

//! spacewarden: disk-space cleanup daemon.
//!
//! Periodically samples filesystem usage, classifies it into a graduated
//! severity, and runs independent cleanup plugins at that severity:
//! 1. **Threshold monitor**: usage percent to [`monitor::threshold::SeverityLevel`], worst mount wins
//! 2. **Scheduler**: plugins sharing a resource group never overlap; groups run in parallel
//! 3. **Event bus**: logging, metrics and heartbeat observe cycles without ever blocking them
//!
//! # Library usage
//!
//! ```rust,no_run
//! use spacewarden::prelude::*;
//! ```

pub mod prelude;

pub mod core;
pub mod daemon;
pub mod events;
pub mod logger;
pub mod monitor;
pub mod platform;
pub mod plugin;
