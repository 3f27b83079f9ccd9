//! Core domain model for the corral agent runtime: agent identity and state
//! types, the error taxonomy, the layered configuration resolver, and the
//! injected provider interfaces the runtime calls through.

pub mod config;
pub mod providers;
pub mod telemetry;
pub mod types;
