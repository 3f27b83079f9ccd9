use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::types::AgentCategory;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(String),
    #[error("parse: {0}")]
    Parse(String),
    #[error("validation: {0}")]
    Validation(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

// ---------------------------------------------------------------------------
// Environment
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    Development,
    Staging,
    Production,
}

impl Environment {
    /// Resolve the active environment from `CORRAL_ENV`, defaulting to
    /// development when unset or unrecognised.
    pub fn from_env() -> Self {
        match std::env::var("CORRAL_ENV").as_deref() {
            Ok("production") => Environment::Production,
            Ok("staging") => Environment::Staging,
            _ => Environment::Development,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }
}

// ---------------------------------------------------------------------------
// Base sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_tasks: u32,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_ms: default_timeout_ms(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            max_concurrent_tasks: default_max_concurrent(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_timeout_ms() -> u64 {
    30_000
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    1_000
}
fn default_max_concurrent() -> u32 {
    4
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    #[serde(default = "default_ai_provider")]
    pub provider: String,
    #[serde(default = "default_ai_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub base_url: Option<String>,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            provider: default_ai_provider(),
            model: default_ai_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            base_url: None,
        }
    }
}

fn default_ai_provider() -> String {
    "anthropic".into()
}
fn default_ai_model() -> String {
    "claude-sonnet-4-20250514".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    4_096
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_url")]
    pub url: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    #[serde(default = "default_statement_timeout_ms")]
    pub statement_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_db_url(),
            pool_size: default_pool_size(),
            statement_timeout_ms: default_statement_timeout_ms(),
        }
    }
}

fn default_db_url() -> String {
    "postgres://localhost/corral".into()
}
fn default_pool_size() -> u32 {
    8
}
fn default_statement_timeout_ms() -> u64 {
    5_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,
    #[serde(default = "default_cache_entries")]
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_cache_ttl(),
            max_entries: default_cache_entries(),
        }
    }
}

fn default_cache_ttl() -> u64 {
    300
}
fn default_cache_entries() -> usize {
    10_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_queue_name")]
    pub name: String,
    #[serde(default = "default_queue_concurrency")]
    pub concurrency: u32,
    #[serde(default = "default_queue_attempts")]
    pub max_attempts: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: default_queue_name(),
            concurrency: default_queue_concurrency(),
            max_attempts: default_queue_attempts(),
        }
    }
}

fn default_queue_name() -> String {
    "corral-tasks".into()
}
fn default_queue_concurrency() -> u32 {
    4
}
fn default_queue_attempts() -> u32 {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default = "default_webhook_retries")]
    pub retry_limit: u32,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            url: None,
            secret: None,
            retry_limit: default_webhook_retries(),
        }
    }
}

fn default_webhook_retries() -> u32 {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    #[serde(default)]
    pub allowed_origins: Vec<String>,
    #[serde(default = "default_token_ttl")]
    pub token_ttl_secs: u64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            allowed_origins: Vec::new(),
            token_ttl_secs: default_token_ttl(),
        }
    }
}

fn default_token_ttl() -> u64 {
    3_600
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    #[serde(default = "default_health_interval")]
    pub health_interval_secs: u64,
    #[serde(default = "default_true")]
    pub emit_metrics: bool,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            health_interval_secs: default_health_interval(),
            emit_metrics: true,
        }
    }
}

fn default_health_interval() -> u64 {
    30
}

// ---------------------------------------------------------------------------
// Environment overlays — partial versions of every section
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionOverride {
    pub enabled: Option<bool>,
    pub timeout_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub retry_delay_ms: Option<u64>,
    pub max_concurrent_tasks: Option<u32>,
}

impl ExecutionOverride {
    pub fn apply(&self, base: &mut ExecutionConfig) {
        if let Some(v) = self.enabled {
            base.enabled = v;
        }
        if let Some(v) = self.timeout_ms {
            base.timeout_ms = v;
        }
        if let Some(v) = self.max_retries {
            base.max_retries = v;
        }
        if let Some(v) = self.retry_delay_ms {
            base.retry_delay_ms = v;
        }
        if let Some(v) = self.max_concurrent_tasks {
            base.max_concurrent_tasks = v;
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AiOverride {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub base_url: Option<String>,
}

impl AiOverride {
    pub fn apply(&self, base: &mut AiConfig) {
        if let Some(v) = &self.provider {
            base.provider = v.clone();
        }
        if let Some(v) = &self.model {
            base.model = v.clone();
        }
        if let Some(v) = self.temperature {
            base.temperature = v;
        }
        if let Some(v) = self.max_tokens {
            base.max_tokens = v;
        }
        if let Some(v) = &self.base_url {
            base.base_url = Some(v.clone());
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseOverride {
    pub url: Option<String>,
    pub pool_size: Option<u32>,
    pub statement_timeout_ms: Option<u64>,
}

impl DatabaseOverride {
    pub fn apply(&self, base: &mut DatabaseConfig) {
        if let Some(v) = &self.url {
            base.url = v.clone();
        }
        if let Some(v) = self.pool_size {
            base.pool_size = v;
        }
        if let Some(v) = self.statement_timeout_ms {
            base.statement_timeout_ms = v;
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheOverride {
    pub ttl_secs: Option<u64>,
    pub max_entries: Option<usize>,
}

impl CacheOverride {
    pub fn apply(&self, base: &mut CacheConfig) {
        if let Some(v) = self.ttl_secs {
            base.ttl_secs = v;
        }
        if let Some(v) = self.max_entries {
            base.max_entries = v;
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueOverride {
    pub name: Option<String>,
    pub concurrency: Option<u32>,
    pub max_attempts: Option<u32>,
}

impl QueueOverride {
    pub fn apply(&self, base: &mut QueueConfig) {
        if let Some(v) = &self.name {
            base.name = v.clone();
        }
        if let Some(v) = self.concurrency {
            base.concurrency = v;
        }
        if let Some(v) = self.max_attempts {
            base.max_attempts = v;
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookOverride {
    pub url: Option<String>,
    pub secret: Option<String>,
    pub retry_limit: Option<u32>,
}

impl WebhookOverride {
    pub fn apply(&self, base: &mut WebhookConfig) {
        if let Some(v) = &self.url {
            base.url = Some(v.clone());
        }
        if let Some(v) = &self.secret {
            base.secret = Some(v.clone());
        }
        if let Some(v) = self.retry_limit {
            base.retry_limit = v;
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecurityOverride {
    pub allowed_origins: Option<Vec<String>>,
    pub token_ttl_secs: Option<u64>,
}

impl SecurityOverride {
    pub fn apply(&self, base: &mut SecurityConfig) {
        if let Some(v) = &self.allowed_origins {
            base.allowed_origins = v.clone();
        }
        if let Some(v) = self.token_ttl_secs {
            base.token_ttl_secs = v;
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonitoringOverride {
    pub health_interval_secs: Option<u64>,
    pub emit_metrics: Option<bool>,
}

impl MonitoringOverride {
    pub fn apply(&self, base: &mut MonitoringConfig) {
        if let Some(v) = self.health_interval_secs {
            base.health_interval_secs = v;
        }
        if let Some(v) = self.emit_metrics {
            base.emit_metrics = v;
        }
    }
}

/// Per-environment partial overlay of the full configuration tree.
/// Unset sections and fields fall through to the base values.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvOverrides {
    #[serde(default)]
    pub execution: Option<ExecutionOverride>,
    #[serde(default)]
    pub ai: Option<AiOverride>,
    #[serde(default)]
    pub database: Option<DatabaseOverride>,
    #[serde(default)]
    pub cache: Option<CacheOverride>,
    #[serde(default)]
    pub queue: Option<QueueOverride>,
    #[serde(default)]
    pub webhook: Option<WebhookOverride>,
    #[serde(default)]
    pub security: Option<SecurityOverride>,
    #[serde(default)]
    pub monitoring: Option<MonitoringOverride>,
}

impl EnvOverrides {
    /// Shallow-merge every set section onto the given agent config.
    pub fn apply(&self, cfg: &mut AgentConfig) {
        if let Some(o) = &self.execution {
            o.apply(&mut cfg.execution);
        }
        if let Some(o) = &self.ai {
            o.apply(&mut cfg.ai);
        }
        if let Some(o) = &self.database {
            o.apply(&mut cfg.database);
        }
        if let Some(o) = &self.cache {
            o.apply(&mut cfg.cache);
        }
        if let Some(o) = &self.queue {
            o.apply(&mut cfg.queue);
        }
        if let Some(o) = &self.webhook {
            o.apply(&mut cfg.webhook);
        }
        if let Some(o) = &self.security {
            o.apply(&mut cfg.security);
        }
        if let Some(o) = &self.monitoring {
            o.apply(&mut cfg.monitoring);
        }
    }
}

// ---------------------------------------------------------------------------
// RuntimeConfig — the single process-wide configuration tree
// ---------------------------------------------------------------------------

/// Top-level configuration, loadable from `corral.toml`.
///
/// Holds the base section values, the per-environment override map, and the
/// per-agent custom settings keyed by literal agent id. Credentials are never
/// stored here; they are read from environment variables by the concrete
/// provider implementations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    #[serde(default)]
    pub environments: HashMap<Environment, EnvOverrides>,
    #[serde(default)]
    pub agent_settings: HashMap<String, serde_json::Value>,
}

impl RuntimeConfig {
    /// Load from a specific TOML file.
    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let cfg: RuntimeConfig =
            toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from `corral.toml` in the working directory, falling back to
    /// defaults when the file does not exist.
    pub fn load() -> Result<Self> {
        let path = PathBuf::from("corral.toml");
        if path.exists() {
            Self::load_from(path)
        } else {
            let cfg = RuntimeConfig::default();
            cfg.validate()?;
            Ok(cfg)
        }
    }

    pub fn to_toml(&self) -> Result<String> {
        self.validate()?;
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Semantic validation for settings not expressible via type checks.
    pub fn validate(&self) -> Result<()> {
        if self.execution.timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "execution.timeout_ms must be greater than zero".into(),
            ));
        }
        if self.monitoring.health_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "monitoring.health_interval_secs must be greater than zero".into(),
            ));
        }
        if !(0.0..=2.0).contains(&self.ai.temperature) {
            return Err(ConfigError::Validation(
                "ai.temperature must be within 0.0..=2.0".into(),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// AgentConfig — the resolved per-agent, per-environment view
// ---------------------------------------------------------------------------

/// Configuration handed to a single agent: base sections with the active
/// environment overlay applied, plus category-derived capability and
/// dependency lists and agent-specific custom settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub agent_id: String,
    pub category: AgentCategory,
    pub execution: ExecutionConfig,
    pub ai: AiConfig,
    pub database: DatabaseConfig,
    pub cache: CacheConfig,
    pub queue: QueueConfig,
    pub webhook: WebhookConfig,
    pub security: SecurityConfig,
    pub monitoring: MonitoringConfig,
    pub capabilities: Vec<String>,
    pub dependencies: Vec<String>,
    pub settings: serde_json::Value,
}

impl AgentConfig {
    /// Whether the agent is allowed to execute tasks at all.
    pub fn enabled(&self) -> bool {
        self.execution.enabled
    }
}

// ---------------------------------------------------------------------------
// ConfigResolver
// ---------------------------------------------------------------------------

/// Resolves the global configuration tree into per-agent views.
///
/// Explicitly constructed and passed around rather than living behind a
/// process-wide singleton, so tests can run with isolated configuration.
#[derive(Debug, Clone)]
pub struct ConfigResolver {
    config: RuntimeConfig,
    environment: Environment,
}

impl ConfigResolver {
    pub fn new(config: RuntimeConfig, environment: Environment) -> Self {
        Self {
            config,
            environment,
        }
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Resolve the configuration for one agent: base sections, then the
    /// active-environment overlay, then category-derived lists and the
    /// agent's custom settings.
    pub fn agent_config(&self, agent_id: &str, category: AgentCategory) -> AgentConfig {
        let mut cfg = AgentConfig {
            agent_id: agent_id.to_string(),
            category,
            execution: self.config.execution.clone(),
            ai: self.config.ai.clone(),
            database: self.config.database.clone(),
            cache: self.config.cache.clone(),
            queue: self.config.queue.clone(),
            webhook: self.config.webhook.clone(),
            security: self.config.security.clone(),
            monitoring: self.config.monitoring.clone(),
            capabilities: default_capabilities(category),
            dependencies: default_dependencies(category),
            settings: self
                .config
                .agent_settings
                .get(agent_id)
                .cloned()
                .unwrap_or_else(|| serde_json::json!({})),
        };

        if let Some(overrides) = self.config.environments.get(&self.environment) {
            overrides.apply(&mut cfg);
        }

        tracing::debug!(
            agent_id = %agent_id,
            category = %category,
            environment = %self.environment.as_str(),
            "resolved agent configuration"
        );
        cfg
    }
}

/// Default capability names attached per category.
pub fn default_capabilities(category: AgentCategory) -> Vec<String> {
    let names: &[&str] = match category {
        AgentCategory::Content => &["generate_content", "summarize", "rewrite"],
        AgentCategory::Social => &["generate_hashtags", "schedule_post", "engagement_report"],
        AgentCategory::Analytics => &["collect_metrics", "trend_analysis"],
        AgentCategory::Business => &["lead_scoring", "campaign_plan"],
        AgentCategory::Orchestration => &["route_task", "compose_workflow"],
        AgentCategory::Integration => &["sync_external", "dispatch_webhook"],
        AgentCategory::Utility => &["moderate", "translate"],
    };
    names.iter().map(|s| s.to_string()).collect()
}

/// Default provider dependencies attached per category.
pub fn default_dependencies(category: AgentCategory) -> Vec<String> {
    let deps: &[&str] = match category {
        AgentCategory::Content => &["ai", "cache"],
        AgentCategory::Social => &["ai", "queue"],
        AgentCategory::Analytics => &["database", "cache"],
        AgentCategory::Business => &["ai", "database"],
        AgentCategory::Orchestration => &["queue"],
        AgentCategory::Integration => &["queue", "webhook"],
        AgentCategory::Utility => &["ai"],
    };
    deps.iter().map(|s| s.to_string()).collect()
}

// ---------------------------------------------------------------------------
// Declarative field validation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

impl FieldKind {
    fn matches(&self, value: &serde_json::Value) -> bool {
        match self {
            FieldKind::String => value.is_string(),
            FieldKind::Number => value.is_number(),
            FieldKind::Integer => value.is_i64() || value.is_u64(),
            FieldKind::Boolean => value.is_boolean(),
            FieldKind::Array => value.is_array(),
            FieldKind::Object => value.is_object(),
        }
    }
}

/// One rule of a declarative object schema. Capability input schemas are
/// JSON arrays of these rules.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FieldRule {
    pub name: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub kind: Option<FieldKind>,
    #[serde(default)]
    pub one_of: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

impl FieldRule {
    pub fn required(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            required: true,
            kind: Some(kind),
            ..Self::default()
        }
    }

    pub fn optional(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            required: false,
            kind: Some(kind),
            ..Self::default()
        }
    }

    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    pub fn with_one_of(mut self, values: Vec<serde_json::Value>) -> Self {
        self.one_of = Some(values);
        self
    }
}

/// Validate a JSON object against a rule set, raising on the first
/// violated rule.
pub fn validate_value(value: &serde_json::Value, rules: &[FieldRule]) -> Result<()> {
    let obj = value.as_object().ok_or_else(|| {
        ConfigError::Validation("expected a JSON object".into())
    })?;

    for rule in rules {
        let field = match obj.get(&rule.name) {
            Some(v) => v,
            None => {
                if rule.required {
                    return Err(ConfigError::Validation(format!(
                        "missing required field `{}`",
                        rule.name
                    )));
                }
                continue;
            }
        };

        if let Some(kind) = rule.kind {
            if !kind.matches(field) {
                return Err(ConfigError::Validation(format!(
                    "field `{}` has wrong type, expected {:?}",
                    rule.name, kind
                )));
            }
        }

        if let Some(allowed) = &rule.one_of {
            if !allowed.contains(field) {
                return Err(ConfigError::Validation(format!(
                    "field `{}` not in allowed set",
                    rule.name
                )));
            }
        }

        if rule.min.is_some() || rule.max.is_some() {
            if let Some(n) = field.as_f64() {
                if let Some(min) = rule.min {
                    if n < min {
                        return Err(ConfigError::Validation(format!(
                            "field `{}` below minimum {}",
                            rule.name, min
                        )));
                    }
                }
                if let Some(max) = rule.max {
                    if n > max {
                        return Err(ConfigError::Validation(format!(
                            "field `{}` above maximum {}",
                            rule.name, max
                        )));
                    }
                }
            }
        }
    }

    Ok(())
}

/// Parse a capability input schema (a JSON array of [`FieldRule`]s) and
/// validate a payload against it. Null or empty schemas accept anything.
pub fn validate_against_schema(
    payload: &serde_json::Value,
    schema: &serde_json::Value,
) -> Result<()> {
    if schema.is_null() {
        return Ok(());
    }
    let rules: Vec<FieldRule> = serde_json::from_value(schema.clone())
        .map_err(|e| ConfigError::Parse(format!("invalid input schema: {e}")))?;
    if rules.is_empty() {
        return Ok(());
    }
    validate_value(payload, &rules)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
