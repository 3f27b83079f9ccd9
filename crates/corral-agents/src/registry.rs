use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use corral_bridge::event_bus::EventBus;
use corral_bridge::protocol::RuntimeEvent;
use corral_core::types::{AgentCategory, AgentMetadata, AgentState, AgentStatus};

use crate::driver::AgentDriver;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("agent not found: `{0}`")]
    AgentNotFound(String),
    #[error("duplicate agent id: `{0}`")]
    DuplicateAgent(String),
    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),
    #[error(transparent)]
    Lifecycle(#[from] corral_core::types::AgentError),
}

pub type Result<T> = std::result::Result<T, RegistryError>;

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

/// Optional narrowing applied by [`AgentRegistry::find_best_agent`].
#[derive(Debug, Clone, Default)]
pub struct SelectionRequirements {
    pub category: Option<AgentCategory>,
    pub exclude: Vec<String>,
    pub preferred: Vec<String>,
}

/// Numeric proxy for agent busyness; lower is better. Error/Cancelled and
/// Paused never survive the status filter but are scored for completeness.
fn load_score(state: &AgentState) -> u32 {
    match state.status {
        AgentStatus::Error | AgentStatus::Cancelled => 100,
        AgentStatus::Running if state.current_task.is_some() => 80,
        AgentStatus::Paused => 60,
        _ => 10,
    }
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryStats {
    pub total: usize,
    pub by_category: HashMap<String, usize>,
    pub by_status: HashMap<String, usize>,
    pub capabilities: Vec<String>,
    /// Agents not in Error or Cancelled.
    pub available: usize,
}

// ---------------------------------------------------------------------------
// RegistryInner
// ---------------------------------------------------------------------------

struct RegistryInner {
    /// Primary map; the registry holds the sole authoritative reference.
    agents: HashMap<String, Arc<AgentDriver>>,
    by_category: HashMap<AgentCategory, HashSet<String>>,
    by_capability: HashMap<String, HashSet<String>>,
    /// Per-agent event forwarding tasks, aborted on unregister.
    forwarders: HashMap<String, JoinHandle<()>>,
}

impl RegistryInner {
    fn new() -> Self {
        Self {
            agents: HashMap::new(),
            by_category: HashMap::new(),
            by_capability: HashMap::new(),
            forwarders: HashMap::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// AgentRegistry
// ---------------------------------------------------------------------------

/// Process-wide catalog of live agents.
///
/// Provides discovery through category and capability indexes, re-broadcasts
/// a whitelist of agent events on its own bus, runs a periodic concurrent
/// health sweep while started, and selects the least-loaded capable agent
/// for a task type.
///
/// Index invariant: an agent id appears in a secondary index if and only if
/// it is present in the primary map; unregistering clears every index entry
/// atomically under the registry lock.
pub struct AgentRegistry {
    inner: Arc<Mutex<RegistryInner>>,
    bus: EventBus,
    running: Arc<AtomicBool>,
    health_interval: Duration,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::with_health_interval(Duration::from_secs(30))
    }

    pub fn with_health_interval(health_interval: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(RegistryInner::new())),
            bus: EventBus::new(),
            running: Arc::new(AtomicBool::new(false)),
            health_interval,
            monitor: Mutex::new(None),
        }
    }

    /// The registry's broadcast bus: forwarded agent events plus
    /// registry-level events.
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    // -----------------------------------------------------------------------
    // Registration
    // -----------------------------------------------------------------------

    /// Register an agent, indexing it by category and by every capability
    /// name and wiring event forwarding. Fails before any index mutation on
    /// a duplicate id or invalid metadata. When the registry has already
    /// been started the agent is initialised immediately.
    pub async fn register(&self, agent: Arc<AgentDriver>) -> Result<()> {
        validate_metadata(agent.metadata())?;
        let meta = agent.metadata().clone();

        {
            let mut inner = self.inner.lock().await;
            if inner.agents.contains_key(&meta.id) {
                return Err(RegistryError::DuplicateAgent(meta.id));
            }

            inner.agents.insert(meta.id.clone(), Arc::clone(&agent));
            inner
                .by_category
                .entry(meta.category)
                .or_default()
                .insert(meta.id.clone());
            for capability in &meta.capabilities {
                inner
                    .by_capability
                    .entry(capability.name.clone())
                    .or_default()
                    .insert(meta.id.clone());
            }

            let forwarder = spawn_forwarder(&agent, self.bus.clone());
            inner.forwarders.insert(meta.id.clone(), forwarder);
        }

        if self.is_running() {
            if let Err(error) = agent.initialize(None).await {
                warn!(id = %meta.id, %error, "agent failed to initialise on registration");
            }
        }

        info!(id = %meta.id, category = %meta.category, "agent registered");
        self.bus.publish(RuntimeEvent::AgentRegistered {
            agent_id: meta.id.clone(),
            category: meta.category,
            capabilities: meta.capability_names().iter().map(|s| s.to_string()).collect(),
        });
        Ok(())
    }

    /// Remove an agent: stop it, clear every index entry, and detach its
    /// event forwarder. A repeated unregister for the same id fails.
    pub async fn unregister(&self, id: &str) -> Result<()> {
        let agent = {
            let mut inner = self.inner.lock().await;
            let agent = inner
                .agents
                .remove(id)
                .ok_or_else(|| RegistryError::AgentNotFound(id.to_string()))?;

            let category = agent.metadata().category;
            if let Some(bucket) = inner.by_category.get_mut(&category) {
                bucket.remove(id);
                if bucket.is_empty() {
                    inner.by_category.remove(&category);
                }
            }
            for capability in agent.metadata().capability_names() {
                if let Some(bucket) = inner.by_capability.get_mut(capability) {
                    bucket.remove(id);
                    if bucket.is_empty() {
                        inner.by_capability.remove(capability);
                    }
                }
            }
            if let Some(forwarder) = inner.forwarders.remove(id) {
                forwarder.abort();
            }
            agent
        };

        if let Err(error) = agent.stop().await {
            warn!(id = %id, %error, "agent failed to stop during unregister");
        }

        info!(id = %id, "agent unregistered");
        self.bus.publish(RuntimeEvent::AgentUnregistered {
            agent_id: id.to_string(),
        });
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Lookup
    // -----------------------------------------------------------------------

    pub async fn get(&self, id: &str) -> Option<Arc<AgentDriver>> {
        self.inner.lock().await.agents.get(id).cloned()
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.inner.lock().await.agents.contains_key(id)
    }

    pub async fn agent_count(&self) -> usize {
        self.inner.lock().await.agents.len()
    }

    pub async fn agents_by_category(&self, category: AgentCategory) -> Vec<Arc<AgentDriver>> {
        let inner = self.inner.lock().await;
        inner
            .by_category
            .get(&category)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.agents.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub async fn agents_by_capability(&self, capability: &str) -> Vec<Arc<AgentDriver>> {
        let inner = self.inner.lock().await;
        inner
            .by_capability
            .get(capability)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.agents.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    // -----------------------------------------------------------------------
    // Health
    // -----------------------------------------------------------------------

    /// Probe every registered agent concurrently. One agent's failed or
    /// panicked probe becomes `false` for that agent without aborting the
    /// batch.
    pub async fn health_check(&self) -> HashMap<String, bool> {
        health_sweep(&self.inner).await
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Start the registry: initialise every registered agent (best-effort)
    /// and spawn the periodic health monitor.
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let agents: Vec<Arc<AgentDriver>> = {
            let inner = self.inner.lock().await;
            inner.agents.values().cloned().collect()
        };
        for agent in agents {
            if let Err(error) = agent.initialize(None).await {
                warn!(id = %agent.id(), %error, "agent failed to initialise on registry start");
            }
        }

        let inner = Arc::clone(&self.inner);
        let bus = self.bus.clone();
        let running = Arc::clone(&self.running);
        let interval = self.health_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick fires immediately; skip it so sweeps are spaced.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                let results = health_sweep(&inner).await;
                let unhealthy: Vec<String> = results
                    .iter()
                    .filter(|(_, healthy)| !**healthy)
                    .map(|(id, _)| id.clone())
                    .collect();
                debug!(
                    total = results.len(),
                    unhealthy = unhealthy.len(),
                    "periodic health sweep"
                );
                bus.publish(RuntimeEvent::HealthCheckCompleted {
                    healthy: results.len() - unhealthy.len(),
                    unhealthy: unhealthy.len(),
                });
                if !unhealthy.is_empty() {
                    bus.publish(RuntimeEvent::UnhealthyAgents {
                        agent_ids: unhealthy,
                    });
                }
            }
        });
        *self.monitor.lock().await = Some(handle);
        info!(interval_secs = self.health_interval.as_secs(), "registry started");
    }

    /// Stop the registry: cancel the health monitor and stop all agents.
    pub async fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.monitor.lock().await.take() {
            handle.abort();
        }
        self.stop_all().await;
        info!("registry shut down");
    }

    /// Start every agent, tolerating individual failures. Returns
    /// `(started, failed)`.
    pub async fn start_all(&self) -> (usize, usize) {
        let agents = self.snapshot().await;
        let mut handles = Vec::with_capacity(agents.len());
        for (id, agent) in agents {
            handles.push((id, tokio::spawn(async move { agent.start().await })));
        }

        let (mut started, mut failed) = (0, 0);
        for (id, handle) in handles {
            match handle.await {
                Ok(Ok(())) => started += 1,
                Ok(Err(error)) => {
                    failed += 1;
                    warn!(id = %id, %error, "agent failed to start");
                }
                Err(join_error) => {
                    failed += 1;
                    warn!(id = %id, %join_error, "agent start panicked");
                }
            }
        }

        self.bus
            .publish(RuntimeEvent::AllAgentsStarted { started, failed });
        (started, failed)
    }

    /// Stop every agent, tolerating individual failures. Returns
    /// `(stopped, failed)`.
    pub async fn stop_all(&self) -> (usize, usize) {
        let agents = self.snapshot().await;
        let mut handles = Vec::with_capacity(agents.len());
        for (id, agent) in agents {
            handles.push((id, tokio::spawn(async move { agent.stop().await })));
        }

        let (mut stopped, mut failed) = (0, 0);
        for (id, handle) in handles {
            match handle.await {
                Ok(Ok(())) => stopped += 1,
                Ok(Err(error)) => {
                    failed += 1;
                    warn!(id = %id, %error, "agent failed to stop");
                }
                Err(join_error) => {
                    failed += 1;
                    warn!(id = %id, %join_error, "agent stop panicked");
                }
            }
        }

        self.bus
            .publish(RuntimeEvent::AllAgentsStopped { stopped, failed });
        (stopped, failed)
    }

    /// Stop, reset, and start one agent, clearing any recorded error.
    pub async fn restart_agent(&self, id: &str) -> Result<()> {
        let agent = self
            .get(id)
            .await
            .ok_or_else(|| RegistryError::AgentNotFound(id.to_string()))?;

        if let Err(error) = agent.stop().await {
            warn!(id = %id, %error, "stop before restart failed");
        }
        agent.reset().await?;
        agent.start().await?;

        info!(id = %id, "agent restarted");
        self.bus.publish(RuntimeEvent::AgentRestarted {
            agent_id: id.to_string(),
        });
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Selection
    // -----------------------------------------------------------------------

    /// Pick the least-loaded agent capable of `task_type`.
    ///
    /// Candidates come from the capability index, optionally narrowed by
    /// category, exclusion list, and preferred ids (when the preference
    /// intersects the candidate set), and always filtered to Idle or
    /// Running. Candidates are visited in id order, so ties resolve in
    /// favour of the lexicographically smaller agent id.
    pub async fn find_best_agent(
        &self,
        task_type: &str,
        requirements: Option<SelectionRequirements>,
    ) -> Option<Arc<AgentDriver>> {
        let requirements = requirements.unwrap_or_default();

        let candidates: Vec<Arc<AgentDriver>> = {
            let inner = self.inner.lock().await;
            let ids = inner.by_capability.get(task_type)?;
            let mut ids: Vec<&String> = ids.iter().collect();
            ids.sort();
            ids.into_iter()
                .filter_map(|id| inner.agents.get(id).cloned())
                .collect()
        };

        let mut scored: Vec<(Arc<AgentDriver>, u32)> = Vec::with_capacity(candidates.len());
        for agent in candidates {
            let meta = agent.metadata();
            if let Some(category) = requirements.category {
                if meta.category != category {
                    continue;
                }
            }
            if requirements.exclude.iter().any(|id| id == &meta.id) {
                continue;
            }
            let state = agent.state().await;
            if !matches!(state.status, AgentStatus::Idle | AgentStatus::Running) {
                continue;
            }
            let score = load_score(&state);
            scored.push((agent, score));
        }

        if !requirements.preferred.is_empty() {
            let narrowed: Vec<_> = scored
                .iter()
                .filter(|(agent, _)| {
                    requirements
                        .preferred
                        .iter()
                        .any(|id| id == &agent.metadata().id)
                })
                .cloned()
                .collect();
            if !narrowed.is_empty() {
                scored = narrowed;
            }
        }

        // Stable fold: strictly-lower score wins, so the earlier-visited
        // (smaller-id) candidate survives a tie.
        scored
            .into_iter()
            .reduce(|best, next| if next.1 < best.1 { next } else { best })
            .map(|(agent, _)| agent)
    }

    // -----------------------------------------------------------------------
    // Stats
    // -----------------------------------------------------------------------

    pub async fn stats(&self) -> RegistryStats {
        let agents = self.snapshot().await;
        let mut stats = RegistryStats {
            total: agents.len(),
            ..Default::default()
        };

        let mut capabilities = HashSet::new();
        for (_, agent) in &agents {
            let meta = agent.metadata();
            *stats
                .by_category
                .entry(meta.category.as_str().to_string())
                .or_default() += 1;
            for name in meta.capability_names() {
                capabilities.insert(name.to_string());
            }

            let status = agent.status().await;
            *stats
                .by_status
                .entry(status.as_str().to_string())
                .or_default() += 1;
            if !matches!(status, AgentStatus::Error | AgentStatus::Cancelled) {
                stats.available += 1;
            }
        }

        stats.capabilities = capabilities.into_iter().collect();
        stats.capabilities.sort();
        stats
    }

    async fn snapshot(&self) -> Vec<(String, Arc<AgentDriver>)> {
        let inner = self.inner.lock().await;
        inner
            .agents
            .iter()
            .map(|(id, agent)| (id.clone(), Arc::clone(agent)))
            .collect()
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Metadata rules checked before any index mutation. Category validity is
/// enforced by the type system.
fn validate_metadata(meta: &AgentMetadata) -> Result<()> {
    if meta.id.trim().is_empty() {
        return Err(RegistryError::InvalidMetadata("agent id is empty".into()));
    }
    if meta.name.trim().is_empty() {
        return Err(RegistryError::InvalidMetadata("agent name is empty".into()));
    }
    if meta.capabilities.is_empty() {
        return Err(RegistryError::InvalidMetadata(format!(
            "agent `{}` declares no capabilities",
            meta.id
        )));
    }
    for capability in &meta.capabilities {
        if capability.name.trim().is_empty() {
            return Err(RegistryError::InvalidMetadata(format!(
                "agent `{}` has a capability with an empty name",
                meta.id
            )));
        }
    }
    Ok(())
}

/// Re-broadcast the whitelisted events from the agent's bus onto the
/// registry bus until the agent is unregistered.
fn spawn_forwarder(agent: &Arc<AgentDriver>, bus: EventBus) -> JoinHandle<()> {
    let rx = agent.bus().subscribe();
    tokio::spawn(async move {
        while let Ok(event) = rx.recv_async().await {
            if event.is_forwardable() {
                bus.publish(event);
            }
        }
    })
}

async fn health_sweep(inner: &Arc<Mutex<RegistryInner>>) -> HashMap<String, bool> {
    let agents: Vec<(String, Arc<AgentDriver>)> = {
        let guard = inner.lock().await;
        guard
            .agents
            .iter()
            .map(|(id, agent)| (id.clone(), Arc::clone(agent)))
            .collect()
    };

    let mut handles = Vec::with_capacity(agents.len());
    for (id, agent) in agents {
        handles.push((id, tokio::spawn(async move { agent.health_check().await })));
    }

    let mut results = HashMap::with_capacity(handles.len());
    for (id, handle) in handles {
        results.insert(id, handle.await.unwrap_or(false));
    }
    results
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use corral_core::config::{ConfigResolver, Environment, RuntimeConfig};
    use corral_core::types::{
        AgentError, AgentResult, AgentTask, Capability, ErrorCode,
    };

    use crate::executor::{ExecutionContext, TaskExecutor};

    struct EchoExecutor {
        delay_ms: u64,
        healthy: bool,
    }

    impl EchoExecutor {
        fn new() -> Self {
            Self {
                delay_ms: 0,
                healthy: true,
            }
        }

        fn slow(delay_ms: u64) -> Self {
            Self {
                delay_ms,
                healthy: true,
            }
        }

        fn unhealthy() -> Self {
            Self {
                delay_ms: 0,
                healthy: false,
            }
        }
    }

    #[async_trait::async_trait]
    impl TaskExecutor for EchoExecutor {
        async fn execute_task(
            &self,
            task: &AgentTask,
            ctx: &ExecutionContext,
        ) -> std::result::Result<AgentResult, AgentError> {
            if self.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            }
            Ok(AgentResult::ok(json!({"echo": task.task_type}), ctx.correlation_id))
        }

        async fn on_health_check(&self) -> std::result::Result<bool, AgentError> {
            if self.healthy {
                Ok(true)
            } else {
                Err(AgentError::new(ErrorCode::InternalError, "probe failed"))
            }
        }
    }

    fn make_agent(id: &str, capability: &str) -> Arc<AgentDriver> {
        make_agent_in(id, AgentCategory::Content, capability, EchoExecutor::new())
    }

    fn make_agent_in(
        id: &str,
        category: AgentCategory,
        capability: &str,
        executor: EchoExecutor,
    ) -> Arc<AgentDriver> {
        let metadata = AgentMetadata::new(
            id,
            format!("Agent {id}"),
            category,
            vec![Capability::new(capability, "test capability")],
        );
        let resolver = ConfigResolver::new(RuntimeConfig::default(), Environment::Development);
        let config = resolver.agent_config(id, category);
        Arc::new(AgentDriver::new(metadata, config, Arc::new(executor)))
    }

    #[tokio::test]
    async fn register_indexes_by_category_and_capability() {
        let registry = AgentRegistry::new();
        registry.register(make_agent("a", "generate")).await.unwrap();

        assert!(registry.contains("a").await);
        let by_cat = registry.agents_by_category(AgentCategory::Content).await;
        assert_eq!(by_cat.len(), 1);
        let by_cap = registry.agents_by_capability("generate").await;
        assert_eq!(by_cap.len(), 1);
        assert_eq!(by_cap[0].id(), "a");
    }

    #[tokio::test]
    async fn duplicate_registration_fails_without_mutation() {
        let registry = AgentRegistry::new();
        registry.register(make_agent("a", "generate")).await.unwrap();
        let err = registry.register(make_agent("a", "generate")).await.unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateAgent(_)));
        assert_eq!(registry.agent_count().await, 1);
    }

    #[tokio::test]
    async fn invalid_metadata_rejected_before_any_index_mutation() {
        let registry = AgentRegistry::new();

        let empty_id = {
            let metadata = AgentMetadata::new(
                "",
                "Nameless",
                AgentCategory::Utility,
                vec![Capability::new("x", "cap")],
            );
            let resolver =
                ConfigResolver::new(RuntimeConfig::default(), Environment::Development);
            let config = resolver.agent_config("", AgentCategory::Utility);
            Arc::new(AgentDriver::new(metadata, config, Arc::new(EchoExecutor::new())))
        };
        assert!(matches!(
            registry.register(empty_id).await.unwrap_err(),
            RegistryError::InvalidMetadata(_)
        ));

        let no_caps = {
            let metadata =
                AgentMetadata::new("b", "NoCaps", AgentCategory::Utility, vec![]);
            let resolver =
                ConfigResolver::new(RuntimeConfig::default(), Environment::Development);
            let config = resolver.agent_config("b", AgentCategory::Utility);
            Arc::new(AgentDriver::new(metadata, config, Arc::new(EchoExecutor::new())))
        };
        assert!(matches!(
            registry.register(no_caps).await.unwrap_err(),
            RegistryError::InvalidMetadata(_)
        ));

        let empty_cap_name = {
            let metadata = AgentMetadata::new(
                "c",
                "BadCap",
                AgentCategory::Utility,
                vec![Capability::new("", "anonymous")],
            );
            let resolver =
                ConfigResolver::new(RuntimeConfig::default(), Environment::Development);
            let config = resolver.agent_config("c", AgentCategory::Utility);
            Arc::new(AgentDriver::new(metadata, config, Arc::new(EchoExecutor::new())))
        };
        assert!(matches!(
            registry.register(empty_cap_name).await.unwrap_err(),
            RegistryError::InvalidMetadata(_)
        ));

        assert_eq!(registry.agent_count().await, 0);
        assert!(registry.agents_by_capability("x").await.is_empty());
    }

    #[tokio::test]
    async fn unregister_clears_every_index_and_repeat_fails() {
        let registry = AgentRegistry::new();
        registry.register(make_agent("a", "generate")).await.unwrap();

        registry.unregister("a").await.unwrap();
        assert!(!registry.contains("a").await);
        assert!(registry.agents_by_category(AgentCategory::Content).await.is_empty());
        assert!(registry.agents_by_capability("generate").await.is_empty());

        let err = registry.unregister("a").await.unwrap_err();
        assert!(matches!(err, RegistryError::AgentNotFound(_)));
    }

    #[tokio::test]
    async fn health_check_isolates_failing_probe() {
        let registry = AgentRegistry::new();
        registry.register(make_agent("good", "generate")).await.unwrap();
        registry
            .register(make_agent_in(
                "bad",
                AgentCategory::Content,
                "generate",
                EchoExecutor::unhealthy(),
            ))
            .await
            .unwrap();

        let results = registry.health_check().await;
        assert_eq!(results.len(), 2);
        assert_eq!(results["good"], true);
        assert_eq!(results["bad"], false);
    }

    #[tokio::test]
    async fn find_best_prefers_idle_over_busy() {
        let registry = AgentRegistry::new();
        let a = make_agent_in("a", AgentCategory::Content, "generate", EchoExecutor::slow(300));
        let b = make_agent("b", "generate");
        registry.register(Arc::clone(&a)).await.unwrap();
        registry.register(Arc::clone(&b)).await.unwrap();

        // Both idle: the tie goes to the smaller id.
        let chosen = registry.find_best_agent("generate", None).await.unwrap();
        assert_eq!(chosen.id(), "a");

        // Put `a` to work; selection must now deterministically pick `b`.
        let running = {
            let a = Arc::clone(&a);
            tokio::spawn(async move {
                a.execute(
                    AgentTask::new("generate", json!({})),
                    ExecutionContext::default(),
                )
                .await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let chosen = registry.find_best_agent("generate", None).await.unwrap();
        assert_eq!(chosen.id(), "b");

        assert!(running.await.unwrap().success);
    }

    #[tokio::test]
    async fn find_best_tie_break_is_deterministic() {
        let registry = AgentRegistry::new();
        // Registration order is the reverse of id order; id order must win.
        registry.register(make_agent("zeta", "generate")).await.unwrap();
        registry.register(make_agent("mid", "generate")).await.unwrap();
        registry.register(make_agent("alpha", "generate")).await.unwrap();

        for _ in 0..10 {
            let chosen = registry.find_best_agent("generate", None).await.unwrap();
            assert_eq!(chosen.id(), "alpha");
        }
    }

    #[tokio::test]
    async fn find_best_never_returns_error_agents() {
        let registry = AgentRegistry::new();
        let a = make_agent("a", "generate");
        registry.register(Arc::clone(&a)).await.unwrap();

        // Force `a` into Error via an invalid lifecycle call.
        let _ = a.pause().await;
        assert_eq!(a.status().await, AgentStatus::Error);

        assert!(registry.find_best_agent("generate", None).await.is_none());
    }

    #[tokio::test]
    async fn find_best_honours_requirements() {
        let registry = AgentRegistry::new();
        registry
            .register(make_agent_in("a", AgentCategory::Content, "generate", EchoExecutor::new()))
            .await
            .unwrap();
        registry
            .register(make_agent_in("b", AgentCategory::Social, "generate", EchoExecutor::new()))
            .await
            .unwrap();

        let chosen = registry
            .find_best_agent(
                "generate",
                Some(SelectionRequirements {
                    category: Some(AgentCategory::Social),
                    ..Default::default()
                }),
            )
            .await
            .unwrap();
        assert_eq!(chosen.id(), "b");

        let chosen = registry
            .find_best_agent(
                "generate",
                Some(SelectionRequirements {
                    exclude: vec!["b".into()],
                    ..Default::default()
                }),
            )
            .await
            .unwrap();
        assert_eq!(chosen.id(), "a");

        let chosen = registry
            .find_best_agent(
                "generate",
                Some(SelectionRequirements {
                    preferred: vec!["b".into()],
                    ..Default::default()
                }),
            )
            .await
            .unwrap();
        assert_eq!(chosen.id(), "b");

        // A preference that misses the candidate set does not narrow it.
        let chosen = registry
            .find_best_agent(
                "generate",
                Some(SelectionRequirements {
                    preferred: vec!["nope".into()],
                    ..Default::default()
                }),
            )
            .await;
        assert!(chosen.is_some());

        assert!(registry.find_best_agent("unknown_capability", None).await.is_none());
    }

    #[tokio::test]
    async fn registry_forwards_whitelisted_events_only() {
        let registry = AgentRegistry::new();
        let rx = registry.bus().subscribe();
        let a = make_agent("a", "generate");
        registry.register(Arc::clone(&a)).await.unwrap();

        a.start().await.unwrap();
        a.pause().await.unwrap();
        a.resume().await.unwrap();
        a.stop().await.unwrap();
        // Give the forwarder task a beat to drain.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let names: Vec<_> = rx.try_iter().map(|e| e.name().to_string()).collect();
        assert!(names.contains(&"agent_registered".to_string()));
        assert!(names.contains(&"started".to_string()));
        assert!(names.contains(&"stopped".to_string()));
        assert!(names.contains(&"state_changed".to_string()));
        assert!(!names.contains(&"paused".to_string()));
        assert!(!names.contains(&"resumed".to_string()));
    }

    #[tokio::test]
    async fn start_all_and_stop_all_settle() {
        struct RefusesToStart;
        #[async_trait::async_trait]
        impl TaskExecutor for RefusesToStart {
            async fn execute_task(
                &self,
                _task: &AgentTask,
                ctx: &ExecutionContext,
            ) -> std::result::Result<AgentResult, AgentError> {
                Ok(AgentResult::ok(json!({}), ctx.correlation_id))
            }
            async fn on_start(&self) -> std::result::Result<(), AgentError> {
                Err(AgentError::new(ErrorCode::StartError, "refusing"))
            }
        }

        let registry = AgentRegistry::new();
        registry.register(make_agent("a", "generate")).await.unwrap();
        registry.register(make_agent("b", "generate")).await.unwrap();
        let stubborn = {
            let metadata = AgentMetadata::new(
                "c",
                "Stubborn",
                AgentCategory::Utility,
                vec![Capability::new("noop", "does nothing")],
            );
            let resolver =
                ConfigResolver::new(RuntimeConfig::default(), Environment::Development);
            let config = resolver.agent_config("c", AgentCategory::Utility);
            Arc::new(AgentDriver::new(metadata, config, Arc::new(RefusesToStart)))
        };
        registry.register(stubborn).await.unwrap();

        let (started, failed) = registry.start_all().await;
        assert_eq!(started, 2);
        assert_eq!(failed, 1);

        let (stopped, _failed) = registry.stop_all().await;
        assert_eq!(stopped, 3);
    }

    #[tokio::test]
    async fn monitor_emits_health_events_and_stops_on_shutdown() {
        let registry = AgentRegistry::with_health_interval(Duration::from_millis(20));
        registry
            .register(make_agent_in(
                "bad",
                AgentCategory::Content,
                "generate",
                EchoExecutor::unhealthy(),
            ))
            .await
            .unwrap();

        let rx = registry.bus().subscribe();
        registry.start().await;
        assert!(registry.is_running());

        tokio::time::sleep(Duration::from_millis(90)).await;
        registry.shutdown().await;
        assert!(!registry.is_running());

        let events: Vec<_> = rx.try_iter().collect();
        assert!(events.iter().any(|e| e.name() == "health_check_completed"));
        assert!(events
            .iter()
            .any(|e| matches!(e, RuntimeEvent::UnhealthyAgents { agent_ids } if agent_ids == &vec!["bad".to_string()])));

        // No further sweeps after shutdown.
        let _ = rx.try_iter().count();
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(!rx.try_iter().any(|e| e.name() == "health_check_completed"));
    }

    #[tokio::test]
    async fn registering_into_running_registry_initialises_agent() {
        let registry = AgentRegistry::new();
        registry.start().await;

        let a = make_agent("a", "generate");
        let rx = a.bus().subscribe();
        registry.register(Arc::clone(&a)).await.unwrap();

        let names: Vec<_> = rx.try_iter().map(|e| e.name()).collect();
        assert!(names.contains(&"initialized"));
        registry.shutdown().await;
    }

    #[tokio::test]
    async fn restart_agent_recovers_from_error() {
        let registry = AgentRegistry::new();
        let a = make_agent("a", "generate");
        registry.register(Arc::clone(&a)).await.unwrap();

        let _ = a.pause().await; // force Error
        assert_eq!(a.status().await, AgentStatus::Error);

        registry.restart_agent("a").await.unwrap();
        assert_eq!(a.status().await, AgentStatus::Running);

        let err = registry.restart_agent("ghost").await.unwrap_err();
        assert!(matches!(err, RegistryError::AgentNotFound(_)));
    }

    #[tokio::test]
    async fn stats_aggregate_counts() {
        let registry = AgentRegistry::new();
        registry
            .register(make_agent_in("a", AgentCategory::Content, "generate", EchoExecutor::new()))
            .await
            .unwrap();
        registry
            .register(make_agent_in("b", AgentCategory::Social, "hashtag", EchoExecutor::new()))
            .await
            .unwrap();

        let b = registry.get("b").await.unwrap();
        let _ = b.pause().await; // Error

        let stats = registry.stats().await;
        assert_eq!(stats.total, 2);
        assert_eq!(stats.by_category["content"], 1);
        assert_eq!(stats.by_category["social"], 1);
        assert_eq!(stats.by_status["idle"], 1);
        assert_eq!(stats.by_status["error"], 1);
        assert_eq!(stats.capabilities, vec!["generate", "hashtag"]);
        assert_eq!(stats.available, 1);
    }
}
