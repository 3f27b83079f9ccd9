use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use corral_bridge::event_bus::EventBus;
use corral_bridge::protocol::RuntimeEvent;
use corral_core::config::{validate_against_schema, AgentConfig, EnvOverrides};
use corral_core::types::{
    AgentError, AgentMetadata, AgentMetrics, AgentResult, AgentState, AgentStatus, AgentTask,
    ErrorCode,
};

use crate::executor::{ExecutionContext, TaskExecutor};

// ---------------------------------------------------------------------------
// Inner — mutable bookkeeping behind one lock
// ---------------------------------------------------------------------------

struct Inner {
    state: AgentState,
    config: AgentConfig,
    updated_at: DateTime<Utc>,
    execution_count: u64,
    last_execution_ms: Option<u64>,
}

// ---------------------------------------------------------------------------
// AgentDriver — the per-agent lifecycle engine
// ---------------------------------------------------------------------------

/// Drives one agent through its lifecycle state machine and task execution.
///
/// The driver owns the agent's state, resolved configuration, and event bus;
/// the concrete agent participates only through its [`TaskExecutor`]. Every
/// state mutation flows through [`AgentDriver::update_state`], which stamps
/// `last_activity` and emits a `StateChanged` event.
///
/// Lifecycle guard failures (`start` while running, `pause` while idle, ...)
/// both move the agent into the Error status and return the error to the
/// caller. Ordinary task failures never surface as `Err`: `execute` always
/// returns an [`AgentResult`], unsuccessful ones carrying the structured
/// error.
pub struct AgentDriver {
    metadata: AgentMetadata,
    executor: Arc<dyn TaskExecutor>,
    bus: EventBus,
    inner: Mutex<Inner>,
    started_at: Instant,
}

impl AgentDriver {
    /// Construct a driver from immutable metadata, a resolved configuration,
    /// and the executor supplied by the concrete agent. Status defaults to
    /// Idle.
    pub fn new(
        metadata: AgentMetadata,
        config: AgentConfig,
        executor: Arc<dyn TaskExecutor>,
    ) -> Self {
        Self {
            metadata,
            executor,
            bus: EventBus::new(),
            inner: Mutex::new(Inner {
                state: AgentState::new(),
                config,
                updated_at: Utc::now(),
                execution_count: 0,
                last_execution_ms: None,
            }),
            started_at: Instant::now(),
        }
    }

    pub fn metadata(&self) -> &AgentMetadata {
        &self.metadata
    }

    pub fn id(&self) -> &str {
        &self.metadata.id
    }

    /// The agent's own event channel. The registry subscribes here and
    /// re-broadcasts the whitelisted events.
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Snapshot of the current runtime state.
    pub async fn state(&self) -> AgentState {
        self.inner.lock().await.state.clone()
    }

    pub async fn status(&self) -> AgentStatus {
        self.inner.lock().await.state.status
    }

    /// Snapshot of the resolved configuration.
    pub async fn config(&self) -> AgentConfig {
        self.inner.lock().await.config.clone()
    }

    /// When the configuration was last changed.
    pub async fn updated_at(&self) -> DateTime<Utc> {
        self.inner.lock().await.updated_at
    }

    // -----------------------------------------------------------------------
    // State mutation
    // -----------------------------------------------------------------------

    /// The single state-update path: applies the mutation, stamps
    /// `last_activity`, and emits `StateChanged` when the status moved.
    async fn update_state(&self, f: impl FnOnce(&mut AgentState)) {
        let (old, new) = {
            let mut inner = self.inner.lock().await;
            let old = inner.state.status;
            f(&mut inner.state);
            inner.state.last_activity = Utc::now();
            (old, inner.state.status)
        };
        if old != new {
            debug!(id = %self.metadata.id, from = %old, to = %new, "agent status transition");
            self.bus.publish(RuntimeEvent::StateChanged {
                agent_id: self.metadata.id.clone(),
                old,
                new,
            });
        }
    }

    /// Move into the Error status, record the error, and broadcast it.
    async fn fail(&self, error: AgentError) {
        warn!(id = %self.metadata.id, code = %error.code, msg = %error.message, "agent entered error state");
        let recorded = error.clone();
        self.update_state(move |s| {
            s.status = AgentStatus::Error;
            s.error = Some(recorded);
        })
        .await;
        self.bus.publish(RuntimeEvent::ErrorOccurred {
            agent_id: self.metadata.id.clone(),
            error,
        });
    }

    // -----------------------------------------------------------------------
    // Lifecycle operations
    // -----------------------------------------------------------------------

    /// Merge optional overrides into the resolved configuration and run the
    /// executor's initialize hook. On hook failure the agent lands in Error
    /// with INIT_ERROR and the error is returned.
    pub async fn initialize(&self, overrides: Option<EnvOverrides>) -> Result<(), AgentError> {
        let config = {
            let mut inner = self.inner.lock().await;
            if let Some(overrides) = &overrides {
                overrides.apply(&mut inner.config);
                inner.updated_at = Utc::now();
            }
            inner.config.clone()
        };

        match self.executor.on_initialize(&config).await {
            Ok(()) => {
                self.update_state(|s| {
                    s.status = AgentStatus::Idle;
                    s.error = None;
                })
                .await;
                info!(id = %self.metadata.id, "agent initialised");
                self.bus.publish(RuntimeEvent::Initialized {
                    agent_id: self.metadata.id.clone(),
                });
                Ok(())
            }
            Err(cause) => {
                let error = AgentError::new(
                    ErrorCode::InitError,
                    format!("initialisation failed: {cause}"),
                );
                self.fail(error.clone()).await;
                Err(error)
            }
        }
    }

    pub async fn start(&self) -> Result<(), AgentError> {
        if self.status().await == AgentStatus::Running {
            let error = AgentError::new(ErrorCode::StartError, "agent is already running");
            self.fail(error.clone()).await;
            return Err(error);
        }
        if let Err(cause) = self.executor.on_start().await {
            let error = AgentError::new(ErrorCode::StartError, format!("start failed: {cause}"));
            self.fail(error.clone()).await;
            return Err(error);
        }
        self.update_state(|s| s.status = AgentStatus::Running).await;
        info!(id = %self.metadata.id, "agent started");
        self.bus.publish(RuntimeEvent::Started {
            agent_id: self.metadata.id.clone(),
        });
        Ok(())
    }

    pub async fn pause(&self) -> Result<(), AgentError> {
        if self.status().await != AgentStatus::Running {
            let error = AgentError::new(ErrorCode::PauseError, "agent is not running");
            self.fail(error.clone()).await;
            return Err(error);
        }
        if let Err(cause) = self.executor.on_pause().await {
            let error = AgentError::new(ErrorCode::PauseError, format!("pause failed: {cause}"));
            self.fail(error.clone()).await;
            return Err(error);
        }
        self.update_state(|s| s.status = AgentStatus::Paused).await;
        self.bus.publish(RuntimeEvent::Paused {
            agent_id: self.metadata.id.clone(),
        });
        Ok(())
    }

    pub async fn resume(&self) -> Result<(), AgentError> {
        if self.status().await != AgentStatus::Paused {
            let error = AgentError::new(ErrorCode::ResumeError, "agent is not paused");
            self.fail(error.clone()).await;
            return Err(error);
        }
        if let Err(cause) = self.executor.on_resume().await {
            let error = AgentError::new(ErrorCode::ResumeError, format!("resume failed: {cause}"));
            self.fail(error.clone()).await;
            return Err(error);
        }
        self.update_state(|s| s.status = AgentStatus::Running).await;
        self.bus.publish(RuntimeEvent::Resumed {
            agent_id: self.metadata.id.clone(),
        });
        Ok(())
    }

    /// Always permitted; forces the agent back to Idle.
    pub async fn stop(&self) -> Result<(), AgentError> {
        if let Err(cause) = self.executor.on_stop().await {
            let error = AgentError::new(ErrorCode::StopError, format!("stop failed: {cause}"));
            self.fail(error.clone()).await;
            return Err(error);
        }
        self.update_state(|s| {
            s.status = AgentStatus::Idle;
            s.current_task = None;
            s.progress = 0;
        })
        .await;
        info!(id = %self.metadata.id, "agent stopped");
        self.bus.publish(RuntimeEvent::Stopped {
            agent_id: self.metadata.id.clone(),
        });
        Ok(())
    }

    /// Stop, then clear execution counters, progress, and any recorded
    /// error. A failing stop hook is logged but does not block the reset.
    pub async fn reset(&self) -> Result<(), AgentError> {
        if let Err(error) = self.stop().await {
            warn!(id = %self.metadata.id, code = %error.code, "stop during reset failed, forcing reset");
        }
        {
            let mut inner = self.inner.lock().await;
            inner.execution_count = 0;
            inner.last_execution_ms = None;
        }
        self.update_state(|s| {
            s.status = AgentStatus::Idle;
            s.current_task = None;
            s.progress = 0;
            s.error = None;
        })
        .await;
        if let Err(cause) = self.executor.on_reset().await {
            let error = AgentError::new(ErrorCode::ResetError, format!("reset failed: {cause}"));
            self.fail(error.clone()).await;
            return Err(error);
        }
        self.bus.publish(RuntimeEvent::Reset {
            agent_id: self.metadata.id.clone(),
        });
        Ok(())
    }

    /// Apply a configuration overlay at runtime, bumping `updated_at`.
    pub async fn configure(&self, overrides: EnvOverrides) -> Result<(), AgentError> {
        let (config, updated_at) = {
            let mut inner = self.inner.lock().await;
            overrides.apply(&mut inner.config);
            inner.updated_at = Utc::now();
            (inner.config.clone(), inner.updated_at)
        };
        if let Err(cause) = self.executor.on_configure(&config).await {
            let error =
                AgentError::new(ErrorCode::ConfigError, format!("configure failed: {cause}"));
            self.fail(error.clone()).await;
            return Err(error);
        }
        self.bus.publish(RuntimeEvent::Configured {
            agent_id: self.metadata.id.clone(),
            updated_at,
            config: Box::new(config),
        });
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Task execution
    // -----------------------------------------------------------------------

    /// Whether the task can be executed at all: the task type must name a
    /// declared capability, the agent must be enabled and not in Error, the
    /// payload must pass the capability's input schema, and the executor's
    /// own validation must accept it.
    pub async fn can_execute(&self, task: &AgentTask) -> bool {
        let capability = match self.metadata.capability(&task.task_type) {
            Some(c) => c,
            None => return false,
        };
        {
            let inner = self.inner.lock().await;
            if !inner.config.enabled() || inner.state.status == AgentStatus::Error {
                return false;
            }
        }
        if validate_against_schema(&task.payload, &capability.input_schema).is_err() {
            return false;
        }
        self.executor.validate_task(task)
    }

    /// Execute one task, racing the executor against the configured timeout.
    ///
    /// The race does not cancel the losing side: the executor future runs on
    /// a spawned task, so on timeout the driver merely stops waiting and the
    /// operation drains in the background with no further effect on agent
    /// state.
    ///
    /// A second `execute` while one is in flight is rejected outright with a
    /// failed result rather than queued.
    pub async fn execute(&self, task: AgentTask, ctx: ExecutionContext) -> AgentResult {
        let correlation_id = ctx.correlation_id;

        // Gate checks and the in-flight claim happen in one critical
        // section, so two racing calls can never both pass the gate.
        let timeout_ms = {
            let mut inner = self.inner.lock().await;
            if inner.state.current_task.is_some() {
                let error = AgentError::new(
                    ErrorCode::ExecutionError,
                    format!("task `{}` rejected: a task is already in flight", task.id),
                );
                return AgentResult::fail(error, correlation_id);
            }
            if inner.state.status == AgentStatus::Error {
                let error =
                    AgentError::new(ErrorCode::ExecutionError, "agent is in error state");
                return AgentResult::fail(error, correlation_id);
            }
            inner.state.current_task = Some(task.id.clone());
            inner.config.execution.timeout_ms
        };

        if !self.can_execute(&task).await {
            // Release the claim; status untouched aside from the activity
            // stamp.
            self.update_state(|s| s.current_task = None).await;
            let error = AgentError::new(
                ErrorCode::ExecutionError,
                format!(
                    "task type `{}` is not executable by agent `{}`",
                    task.task_type, self.metadata.id
                ),
            );
            return AgentResult::fail(error, correlation_id);
        }

        self.update_state(|s| {
            s.status = AgentStatus::Running;
            s.progress = 0;
        })
        .await;

        info!(
            id = %self.metadata.id,
            task_id = %task.id,
            task_type = %task.task_type,
            correlation_id = %correlation_id,
            "executing task"
        );

        let started = Instant::now();
        let executor = Arc::clone(&self.executor);
        let spawned_task = task.clone();
        let spawned_ctx = ctx.clone();
        let handle =
            tokio::spawn(async move { executor.execute_task(&spawned_task, &spawned_ctx).await });

        let outcome = tokio::time::timeout(Duration::from_millis(timeout_ms), handle).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let failure = match outcome {
            Ok(Ok(Ok(result))) if result.success => {
                {
                    let mut inner = self.inner.lock().await;
                    inner.execution_count += 1;
                    inner.last_execution_ms = Some(elapsed_ms);
                }
                self.update_state(|s| {
                    s.status = AgentStatus::Completed;
                    s.progress = 100;
                })
                .await;
                self.bus.publish(RuntimeEvent::TaskCompleted {
                    agent_id: self.metadata.id.clone(),
                    task_id: task.id.clone(),
                    correlation_id,
                    execution_time_ms: elapsed_ms,
                });
                self.update_state(|s| {
                    s.status = AgentStatus::Idle;
                    s.current_task = None;
                })
                .await;
                ctx.providers.increment("agent.tasks_completed", 1);
                ctx.providers.timing("agent.execution", started.elapsed());
                return result.with_execution_time(elapsed_ms);
            }
            Ok(Ok(Ok(result))) => result.error.unwrap_or_else(|| {
                AgentError::new(ErrorCode::ExecutionError, "task reported failure")
            }),
            Ok(Ok(Err(cause))) => AgentError::new(
                ErrorCode::ExecutionError,
                format!("task execution failed: {cause}"),
            ),
            Ok(Err(join_err)) => AgentError::new(
                ErrorCode::ExecutionError,
                format!("task execution panicked: {join_err}"),
            ),
            Err(_elapsed) => AgentError::new(
                ErrorCode::ExecutionError,
                format!("task timed out after {timeout_ms}ms; the operation keeps running in the background"),
            )
            .with_details(serde_json::json!({ "timeout_ms": timeout_ms })),
        };

        self.fail(failure.clone()).await;
        self.update_state(|s| s.current_task = None).await;
        self.bus.publish(RuntimeEvent::TaskFailed {
            agent_id: self.metadata.id.clone(),
            task_id: task.id.clone(),
            correlation_id,
            error: failure.clone(),
            execution_time_ms: elapsed_ms,
        });
        ctx.providers.increment("agent.tasks_failed", 1);
        AgentResult::fail(failure, correlation_id).with_execution_time(elapsed_ms)
    }

    // -----------------------------------------------------------------------
    // Health and metrics
    // -----------------------------------------------------------------------

    /// Composite liveness: enabled, not in Error, and the executor's probe
    /// passes. Probe errors count as unhealthy and are never propagated.
    pub async fn health_check(&self) -> bool {
        {
            let inner = self.inner.lock().await;
            if !inner.config.enabled() || inner.state.status == AgentStatus::Error {
                return false;
            }
        }
        match self.executor.on_health_check().await {
            Ok(healthy) => healthy,
            Err(error) => {
                warn!(id = %self.metadata.id, %error, "health probe failed");
                false
            }
        }
    }

    /// Base counters merged with the executor's custom metrics.
    pub async fn metrics(&self) -> AgentMetrics {
        let inner = self.inner.lock().await;
        AgentMetrics {
            execution_count: inner.execution_count,
            last_execution_ms: inner.last_execution_ms,
            uptime_secs: self.started_at.elapsed().as_secs(),
            has_error: inner.state.error.is_some(),
            custom: self.executor.agent_metrics(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
