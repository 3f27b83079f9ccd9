use std::collections::HashMap;

use uuid::Uuid;

use corral_core::config::{AgentConfig, Environment};
use corral_core::providers::ProviderSet;
use corral_core::types::{AgentError, AgentResult, AgentTask};

// ---------------------------------------------------------------------------
// ExecutionContext
// ---------------------------------------------------------------------------

/// Per-call context handed to the executor: the correlation id linking the
/// task's events across the bus, the active environment, and the injected
/// providers.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub correlation_id: Uuid,
    pub environment: Environment,
    pub providers: ProviderSet,
}

impl ExecutionContext {
    pub fn new(environment: Environment, providers: ProviderSet) -> Self {
        Self {
            correlation_id: Uuid::new_v4(),
            environment,
            providers,
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = correlation_id;
        self
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new(Environment::Development, ProviderSet::new())
    }
}

// ---------------------------------------------------------------------------
// TaskExecutor — the extension contract for concrete agents
// ---------------------------------------------------------------------------

/// The contract a concrete agent implements to plug into the lifecycle
/// engine.
///
/// The driver owns the state machine and calls into this trait; concrete
/// agents supply only the task logic, task-shape validation, custom metrics,
/// and whichever lifecycle hooks they care about. All hooks default to
/// no-ops so a minimal agent implements just [`execute_task`].
///
/// Implementations must be shareable (`&self` receivers, `Send + Sync`):
/// the driver runs `execute_task` on a spawned task so that a timed-out
/// execution can keep draining in the background.
///
/// [`execute_task`]: TaskExecutor::execute_task
#[async_trait::async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Perform the task. Returning `Err` or an unsuccessful result are both
    /// treated as task failure by the driver.
    async fn execute_task(
        &self,
        task: &AgentTask,
        ctx: &ExecutionContext,
    ) -> Result<AgentResult, AgentError>;

    /// Agent-specific validation of the task payload shape, checked after
    /// the capability-name and schema gates.
    fn validate_task(&self, _task: &AgentTask) -> bool {
        true
    }

    /// Custom metrics merged into the driver's base counters.
    fn agent_metrics(&self) -> HashMap<String, serde_json::Value> {
        HashMap::new()
    }

    async fn on_initialize(&self, _config: &AgentConfig) -> Result<(), AgentError> {
        Ok(())
    }

    async fn on_start(&self) -> Result<(), AgentError> {
        Ok(())
    }

    async fn on_pause(&self) -> Result<(), AgentError> {
        Ok(())
    }

    async fn on_resume(&self) -> Result<(), AgentError> {
        Ok(())
    }

    async fn on_stop(&self) -> Result<(), AgentError> {
        Ok(())
    }

    async fn on_reset(&self) -> Result<(), AgentError> {
        Ok(())
    }

    async fn on_configure(&self, _config: &AgentConfig) -> Result<(), AgentError> {
        Ok(())
    }

    /// Liveness probe folded into the driver's composite health check.
    /// Errors are treated as unhealthy, never propagated.
    async fn on_health_check(&self) -> Result<bool, AgentError> {
        Ok(true)
    }
}
