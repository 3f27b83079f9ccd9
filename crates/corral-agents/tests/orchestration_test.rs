//! End-to-end orchestration scenarios: routing through the registry,
//! failure isolation and recovery, and environment-layered configuration
//! reaching a running agent.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use uuid::Uuid;

use corral_agents::driver::AgentDriver;
use corral_agents::executor::{ExecutionContext, TaskExecutor};
use corral_agents::registry::{AgentRegistry, SelectionRequirements};
use corral_bridge::protocol::RuntimeEvent;
use corral_core::config::{
    ConfigResolver, EnvOverrides, Environment, ExecutionOverride, RuntimeConfig,
};
use corral_core::providers::ProviderSet;
use corral_core::types::{
    AgentCategory, AgentError, AgentMetadata, AgentResult, AgentStatus, AgentTask, Capability,
    ErrorCode,
};

struct ScriptedExecutor {
    fail: bool,
}

#[async_trait::async_trait]
impl TaskExecutor for ScriptedExecutor {
    async fn execute_task(
        &self,
        task: &AgentTask,
        ctx: &ExecutionContext,
    ) -> Result<AgentResult, AgentError> {
        if self.fail {
            return Err(AgentError::new(ErrorCode::ExecutionError, "scripted failure"));
        }
        Ok(AgentResult::ok(
            json!({ "handled": task.task_type }),
            ctx.correlation_id,
        ))
    }

    fn agent_metrics(&self) -> HashMap<String, serde_json::Value> {
        HashMap::from([("scripted".to_string(), json!(true))])
    }
}

fn agent(
    id: &str,
    category: AgentCategory,
    capability: &str,
    resolver: &ConfigResolver,
    fail: bool,
) -> Arc<AgentDriver> {
    let metadata = AgentMetadata::new(
        id,
        format!("Agent {id}"),
        category,
        vec![Capability::new(capability, "integration test capability")],
    );
    let config = resolver.agent_config(id, category);
    Arc::new(AgentDriver::new(
        metadata,
        config,
        Arc::new(ScriptedExecutor { fail }),
    ))
}

fn dev_resolver() -> ConfigResolver {
    ConfigResolver::new(RuntimeConfig::default(), Environment::Development)
}

#[tokio::test]
async fn end_to_end_task_routing() {
    let resolver = dev_resolver();
    let registry = AgentRegistry::new();
    let events = registry.bus().subscribe();

    let writer = agent(
        "writer-1",
        AgentCategory::Content,
        "generate_content",
        &resolver,
        false,
    );
    let social = agent(
        "social-1",
        AgentCategory::Social,
        "generate_hashtags",
        &resolver,
        false,
    );
    registry.register(Arc::clone(&writer)).await.unwrap();
    registry.register(Arc::clone(&social)).await.unwrap();

    registry.start().await;
    assert_eq!(writer.status().await, AgentStatus::Idle);

    // Route by capability and execute with an explicit correlation id.
    let chosen = registry
        .find_best_agent("generate_content", None)
        .await
        .expect("a content agent should be selectable");
    assert_eq!(chosen.id(), "writer-1");

    let correlation_id = Uuid::new_v4();
    let ctx = ExecutionContext::new(Environment::Development, ProviderSet::new())
        .with_correlation_id(correlation_id);
    let result = chosen
        .execute(AgentTask::new("generate_content", json!({"topic": "corrals"})), ctx)
        .await;
    assert!(result.success);
    assert_eq!(result.data.unwrap()["handled"], "generate_content");
    assert_eq!(result.metadata.correlation_id, correlation_id);

    // The completion is forwarded onto the registry bus with the same
    // correlation id.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let forwarded: Vec<RuntimeEvent> = events.try_iter().collect();
    assert!(forwarded.iter().any(|e| matches!(
        e,
        RuntimeEvent::TaskCompleted { agent_id, correlation_id: cid, .. }
            if agent_id == "writer-1" && *cid == correlation_id
    )));

    let stats = registry.stats().await;
    assert_eq!(stats.total, 2);
    assert_eq!(stats.available, 2);
    assert!(stats.capabilities.contains(&"generate_content".to_string()));
    assert!(stats.capabilities.contains(&"generate_hashtags".to_string()));

    registry.shutdown().await;
}

#[tokio::test]
async fn failing_agent_is_isolated_until_restarted() {
    let resolver = dev_resolver();
    let registry = AgentRegistry::new();

    let flaky = agent(
        "flaky",
        AgentCategory::Content,
        "generate_content",
        &resolver,
        true,
    );
    let steady = agent(
        "steady",
        AgentCategory::Content,
        "generate_content",
        &resolver,
        false,
    );
    registry.register(Arc::clone(&flaky)).await.unwrap();
    registry.register(Arc::clone(&steady)).await.unwrap();

    // A failed task moves the agent into Error without surfacing an Err.
    let result = flaky
        .execute(
            AgentTask::new("generate_content", json!({})),
            ExecutionContext::default(),
        )
        .await;
    assert!(!result.success);
    assert_eq!(flaky.status().await, AgentStatus::Error);

    // Selection and health both route around the failed agent.
    let chosen = registry
        .find_best_agent("generate_content", None)
        .await
        .unwrap();
    assert_eq!(chosen.id(), "steady");

    let health = registry.health_check().await;
    assert!(!health["flaky"]);
    assert!(health["steady"]);

    // Even an explicit preference cannot resurrect it while in Error.
    let chosen = registry
        .find_best_agent(
            "generate_content",
            Some(SelectionRequirements {
                preferred: vec!["flaky".into()],
                ..Default::default()
            }),
        )
        .await
        .unwrap();
    assert_eq!(chosen.id(), "steady");

    // Restart clears the error and returns the agent to the pool.
    registry.restart_agent("flaky").await.unwrap();
    assert_eq!(flaky.status().await, AgentStatus::Running);
    assert!(registry.health_check().await["flaky"]);

    let chosen = registry
        .find_best_agent(
            "generate_content",
            Some(SelectionRequirements {
                preferred: vec!["flaky".into()],
                ..Default::default()
            }),
        )
        .await
        .unwrap();
    assert_eq!(chosen.id(), "flaky");
}

#[tokio::test]
async fn environment_overlay_reaches_the_agent() {
    let mut config = RuntimeConfig::default();
    config.environments.insert(
        Environment::Staging,
        EnvOverrides {
            execution: Some(ExecutionOverride {
                timeout_ms: Some(5_000),
                max_retries: Some(1),
                ..Default::default()
            }),
            ..Default::default()
        },
    );

    let resolver = ConfigResolver::new(config, Environment::Staging);
    let writer = agent(
        "writer-1",
        AgentCategory::Content,
        "generate_content",
        &resolver,
        false,
    );

    let resolved = writer.config().await;
    assert_eq!(resolved.execution.timeout_ms, 5_000);
    assert_eq!(resolved.execution.max_retries, 1);
    // Untouched fields keep their base values.
    assert!(resolved.execution.enabled);

    // A runtime configure overlays on top of the resolved view.
    writer
        .configure(EnvOverrides {
            execution: Some(ExecutionOverride {
                timeout_ms: Some(2_500),
                ..Default::default()
            }),
            ..Default::default()
        })
        .await
        .unwrap();
    let reconfigured = writer.config().await;
    assert_eq!(reconfigured.execution.timeout_ms, 2_500);
    assert_eq!(reconfigured.execution.max_retries, 1);
}

#[tokio::test]
async fn unregistered_agent_leaves_no_trace() {
    let resolver = dev_resolver();
    let registry = AgentRegistry::new();
    let events = registry.bus().subscribe();

    let writer = agent(
        "writer-1",
        AgentCategory::Content,
        "generate_content",
        &resolver,
        false,
    );
    registry.register(writer).await.unwrap();
    registry.unregister("writer-1").await.unwrap();

    assert_eq!(registry.agent_count().await, 0);
    assert!(registry.find_best_agent("generate_content", None).await.is_none());
    assert!(registry
        .agents_by_category(AgentCategory::Content)
        .await
        .is_empty());

    let names: Vec<&str> = events.try_iter().map(|e| e.name()).collect();
    assert!(names.contains(&"agent_registered"));
    assert!(names.contains(&"agent_unregistered"));
}
