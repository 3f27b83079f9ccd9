use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use corral_core::config::AgentConfig;
use corral_core::types::{AgentCategory, AgentError, AgentStatus};

// ---------------------------------------------------------------------------
// RuntimeEvent
// ---------------------------------------------------------------------------

/// Every event the runtime can emit, as a tagged union.
///
/// Agent-level lifecycle and task events carry the emitting agent's id;
/// registry-level events describe batch operations and monitoring sweeps.
/// Using one closed enum instead of stringly-typed names means a consumer
/// cannot subscribe to a misspelled event or receive an unexpected payload
/// shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RuntimeEvent {
    // -- agent lifecycle --
    Initialized {
        agent_id: String,
    },
    Started {
        agent_id: String,
    },
    Paused {
        agent_id: String,
    },
    Resumed {
        agent_id: String,
    },
    Stopped {
        agent_id: String,
    },
    Reset {
        agent_id: String,
    },
    Configured {
        agent_id: String,
        updated_at: DateTime<Utc>,
        config: Box<AgentConfig>,
    },
    StateChanged {
        agent_id: String,
        old: AgentStatus,
        new: AgentStatus,
    },
    ErrorOccurred {
        agent_id: String,
        error: AgentError,
    },

    // -- task execution --
    TaskCompleted {
        agent_id: String,
        task_id: String,
        correlation_id: Uuid,
        execution_time_ms: u64,
    },
    TaskFailed {
        agent_id: String,
        task_id: String,
        correlation_id: Uuid,
        error: AgentError,
        execution_time_ms: u64,
    },

    // -- registry --
    AgentRegistered {
        agent_id: String,
        category: AgentCategory,
        capabilities: Vec<String>,
    },
    AgentUnregistered {
        agent_id: String,
    },
    HealthCheckCompleted {
        healthy: usize,
        unhealthy: usize,
    },
    HealthCheckFailed {
        message: String,
    },
    UnhealthyAgents {
        agent_ids: Vec<String>,
    },
    AllAgentsStarted {
        started: usize,
        failed: usize,
    },
    AllAgentsStopped {
        stopped: usize,
        failed: usize,
    },
    AgentRestarted {
        agent_id: String,
    },
}

impl RuntimeEvent {
    /// Stable event name, matching the serde tag.
    pub fn name(&self) -> &'static str {
        match self {
            RuntimeEvent::Initialized { .. } => "initialized",
            RuntimeEvent::Started { .. } => "started",
            RuntimeEvent::Paused { .. } => "paused",
            RuntimeEvent::Resumed { .. } => "resumed",
            RuntimeEvent::Stopped { .. } => "stopped",
            RuntimeEvent::Reset { .. } => "reset",
            RuntimeEvent::Configured { .. } => "configured",
            RuntimeEvent::StateChanged { .. } => "state_changed",
            RuntimeEvent::ErrorOccurred { .. } => "error_occurred",
            RuntimeEvent::TaskCompleted { .. } => "task_completed",
            RuntimeEvent::TaskFailed { .. } => "task_failed",
            RuntimeEvent::AgentRegistered { .. } => "agent_registered",
            RuntimeEvent::AgentUnregistered { .. } => "agent_unregistered",
            RuntimeEvent::HealthCheckCompleted { .. } => "health_check_completed",
            RuntimeEvent::HealthCheckFailed { .. } => "health_check_failed",
            RuntimeEvent::UnhealthyAgents { .. } => "unhealthy_agents",
            RuntimeEvent::AllAgentsStarted { .. } => "all_agents_started",
            RuntimeEvent::AllAgentsStopped { .. } => "all_agents_stopped",
            RuntimeEvent::AgentRestarted { .. } => "agent_restarted",
        }
    }

    /// Id of the agent this event concerns, when there is exactly one.
    pub fn agent_id(&self) -> Option<&str> {
        match self {
            RuntimeEvent::Initialized { agent_id }
            | RuntimeEvent::Started { agent_id }
            | RuntimeEvent::Paused { agent_id }
            | RuntimeEvent::Resumed { agent_id }
            | RuntimeEvent::Stopped { agent_id }
            | RuntimeEvent::Reset { agent_id }
            | RuntimeEvent::Configured { agent_id, .. }
            | RuntimeEvent::StateChanged { agent_id, .. }
            | RuntimeEvent::ErrorOccurred { agent_id, .. }
            | RuntimeEvent::TaskCompleted { agent_id, .. }
            | RuntimeEvent::TaskFailed { agent_id, .. }
            | RuntimeEvent::AgentRegistered { agent_id, .. }
            | RuntimeEvent::AgentUnregistered { agent_id }
            | RuntimeEvent::AgentRestarted { agent_id } => Some(agent_id),
            _ => None,
        }
    }

    /// Whether the registry re-broadcasts this agent-level event on its own
    /// bus. The whitelist is fixed: state changes, task outcomes, errors,
    /// and the initialize/start/stop lifecycle edges.
    pub fn is_forwardable(&self) -> bool {
        matches!(
            self,
            RuntimeEvent::StateChanged { .. }
                | RuntimeEvent::TaskCompleted { .. }
                | RuntimeEvent::TaskFailed { .. }
                | RuntimeEvent::ErrorOccurred { .. }
                | RuntimeEvent::Initialized { .. }
                | RuntimeEvent::Started { .. }
                | RuntimeEvent::Stopped { .. }
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
