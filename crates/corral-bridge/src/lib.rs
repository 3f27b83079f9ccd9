//! Event plumbing for the corral runtime: the typed [`protocol::RuntimeEvent`]
//! union and the broadcast [`event_bus::EventBus`] that carries it between
//! agents, the registry, and external consumers (dashboards, log sinks).

pub mod event_bus;
pub mod protocol;
