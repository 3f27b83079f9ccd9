//! Agent orchestration runtime: the per-agent lifecycle engine
//! ([`driver::AgentDriver`]), the executor extension contract implemented by
//! concrete agents ([`executor::TaskExecutor`]), and the process-wide
//! [`registry::AgentRegistry`] providing discovery, capability routing,
//! health monitoring, and load-based selection.

pub mod driver;
pub mod executor;
pub mod registry;
