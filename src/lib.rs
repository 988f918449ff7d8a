#![allow(clippy::upper_case_acronyms)]

//! Request and boot core for a cross-platform app shell.
//!
//! An initialization barrier sequences bootstrap tasks, a request engine
//! dispatches through interceptors with cancellation and race-condition
//! deduplication, and a router guard gates navigation on the same barrier.

pub mod cache;
pub mod config;
pub mod core;
pub mod logging;
pub mod orchestration;
pub mod plugin;
pub mod request;
pub mod utils;
