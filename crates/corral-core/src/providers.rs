//! External capability interfaces the runtime calls through, never owns.
//!
//! Concrete implementations (Anthropic, Postgres, Redis, ...) live in
//! dependent crates; the runtime only sees these traits. A [`ProviderSet`]
//! is the explicitly constructed context object handed to agents, replacing
//! any process-wide singleton. Logging is deliberately not a trait here:
//! the runtime logs through the `tracing` facade.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Errors surfaced by provider implementations.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Required credentials or client setup are missing.
    #[error("provider not configured: {0}")]
    NotConfigured(String),

    /// The backing service is temporarily unreachable.
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    /// The provider throttled the request.
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// The request exceeded the provider's own deadline.
    #[error("provider request timed out")]
    Timeout,

    /// Any other backend failure, with the provider's message.
    #[error("backend error: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, ProviderError>;

// ---------------------------------------------------------------------------
// AI provider
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }
}

/// Text-generation backend used by content-producing agents.
#[async_trait::async_trait]
pub trait AiProvider: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
    async fn chat(&self, messages: &[ChatMessage]) -> Result<String>;
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
    /// Returns `true` when the text passes moderation.
    async fn moderate(&self, text: &str) -> Result<bool>;
}

// ---------------------------------------------------------------------------
// Database provider
// ---------------------------------------------------------------------------

#[async_trait::async_trait]
pub trait DatabaseProvider: Send + Sync {
    async fn query(&self, sql: &str, params: &[serde_json::Value])
        -> Result<Vec<serde_json::Value>>;
    /// Insert a row, returning its id.
    async fn insert(&self, table: &str, row: &serde_json::Value) -> Result<String>;
    /// Update by id, returning the number of affected rows.
    async fn update(&self, table: &str, id: &str, patch: &serde_json::Value) -> Result<u64>;
    async fn delete(&self, table: &str, id: &str) -> Result<u64>;
    /// Execute statements atomically.
    async fn transaction(&self, statements: &[String]) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Cache provider
// ---------------------------------------------------------------------------

#[async_trait::async_trait]
pub trait CacheProvider: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>>;
    async fn set(&self, key: &str, value: serde_json::Value, ttl: Option<Duration>) -> Result<()>;
    /// Returns `true` when the key existed.
    async fn delete(&self, key: &str) -> Result<bool>;
    async fn clear(&self) -> Result<()>;
    async fn exists(&self, key: &str) -> Result<bool>;
}

// ---------------------------------------------------------------------------
// Queue provider
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueJob {
    pub id: String,
    pub payload: serde_json::Value,
    pub attempts: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStatus {
    pub pending: usize,
    pub active: usize,
    pub failed: usize,
}

#[async_trait::async_trait]
pub trait QueueProvider: Send + Sync {
    /// Enqueue a job, returning its id.
    async fn enqueue(&self, payload: serde_json::Value) -> Result<String>;
    /// Pull the next pending job, marking it active. Consumers poll this
    /// rather than registering callbacks.
    async fn dequeue(&self) -> Result<Option<QueueJob>>;
    async fn get_job(&self, id: &str) -> Result<Option<QueueJob>>;
    async fn remove_job(&self, id: &str) -> Result<bool>;
    async fn queue_status(&self) -> Result<QueueStatus>;
}

// ---------------------------------------------------------------------------
// Metrics sink
// ---------------------------------------------------------------------------

/// Counter/gauge/histogram sink. Implementations forward to StatsD,
/// Prometheus, or similar; [`NullMetrics`] drops everything.
pub trait MetricsSink: Send + Sync {
    fn increment(&self, name: &str, value: u64);
    fn gauge(&self, name: &str, value: f64);
    fn histogram(&self, name: &str, value: f64);
    fn timing(&self, name: &str, duration: Duration);
}

/// Metrics sink that discards all measurements.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullMetrics;

impl MetricsSink for NullMetrics {
    fn increment(&self, _name: &str, _value: u64) {}
    fn gauge(&self, _name: &str, _value: f64) {}
    fn histogram(&self, _name: &str, _value: f64) {}
    fn timing(&self, _name: &str, _duration: Duration) {}
}

// ---------------------------------------------------------------------------
// ProviderSet
// ---------------------------------------------------------------------------

/// The injected collaborators available to an agent during execution.
///
/// Cheap to clone; every slot is an `Arc`. Providers an agent does not
/// depend on are simply left unset.
#[derive(Clone, Default)]
pub struct ProviderSet {
    pub ai: Option<Arc<dyn AiProvider>>,
    pub database: Option<Arc<dyn DatabaseProvider>>,
    pub cache: Option<Arc<dyn CacheProvider>>,
    pub queue: Option<Arc<dyn QueueProvider>>,
    pub metrics: Option<Arc<dyn MetricsSink>>,
}

impl ProviderSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ai(mut self, ai: Arc<dyn AiProvider>) -> Self {
        self.ai = Some(ai);
        self
    }

    pub fn with_database(mut self, database: Arc<dyn DatabaseProvider>) -> Self {
        self.database = Some(database);
        self
    }

    pub fn with_cache(mut self, cache: Arc<dyn CacheProvider>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_queue(mut self, queue: Arc<dyn QueueProvider>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Record a counter increment if a metrics sink is configured.
    pub fn increment(&self, name: &str, value: u64) {
        if let Some(m) = &self.metrics {
            m.increment(name, value);
        }
    }

    /// Record a timing if a metrics sink is configured.
    pub fn timing(&self, name: &str, duration: Duration) {
        if let Some(m) = &self.metrics {
            m.timing(name, duration);
        }
    }
}

impl std::fmt::Debug for ProviderSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSet")
            .field("ai", &self.ai.is_some())
            .field("database", &self.database.is_some())
            .field("cache", &self.cache.is_some())
            .field("queue", &self.queue.is_some())
            .field("metrics", &self.metrics.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
