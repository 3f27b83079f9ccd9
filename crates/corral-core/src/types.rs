use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// AgentCategory
// ---------------------------------------------------------------------------

/// Functional grouping of agents. The category drives the default
/// capability/dependency lists attached by the configuration resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentCategory {
    Content,
    Social,
    Analytics,
    Business,
    Orchestration,
    Integration,
    Utility,
}

impl AgentCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentCategory::Content => "content",
            AgentCategory::Social => "social",
            AgentCategory::Analytics => "analytics",
            AgentCategory::Business => "business",
            AgentCategory::Orchestration => "orchestration",
            AgentCategory::Integration => "integration",
            AgentCategory::Utility => "utility",
        }
    }

    /// All known categories, in declaration order.
    pub fn all() -> [AgentCategory; 7] {
        [
            AgentCategory::Content,
            AgentCategory::Social,
            AgentCategory::Analytics,
            AgentCategory::Business,
            AgentCategory::Orchestration,
            AgentCategory::Integration,
            AgentCategory::Utility,
        ]
    }
}

impl fmt::Display for AgentCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Capability
// ---------------------------------------------------------------------------

/// A named, schema-described operation an agent can perform.
///
/// The `name` must equal the `task_type` of tasks dispatched to the agent.
/// `input_schema` is a JSON array of field rules (see
/// [`crate::config::FieldRule`]) validated against the task payload before
/// dispatch; an empty or null schema accepts any payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capability {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub input_schema: serde_json::Value,
    #[serde(default)]
    pub output_schema: serde_json::Value,
}

impl Capability {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: serde_json::Value::Null,
            output_schema: serde_json::Value::Null,
        }
    }

    pub fn with_input_schema(mut self, schema: serde_json::Value) -> Self {
        self.input_schema = schema;
        self
    }
}

// ---------------------------------------------------------------------------
// AgentMetadata
// ---------------------------------------------------------------------------

/// Immutable identity of an agent, set once at construction.
/// Only `updated_at` moves, bumped when the agent is reconfigured.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMetadata {
    pub id: String,
    pub name: String,
    pub version: String,
    pub category: AgentCategory,
    pub capabilities: Vec<Capability>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AgentMetadata {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        category: AgentCategory,
        capabilities: Vec<Capability>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            version: "0.1.0".into(),
            category,
            capabilities,
            dependencies: Vec::new(),
            tags: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Names of all declared capabilities.
    pub fn capability_names(&self) -> Vec<&str> {
        self.capabilities.iter().map(|c| c.name.as_str()).collect()
    }

    /// Look up a capability by name.
    pub fn capability(&self, name: &str) -> Option<&Capability> {
        self.capabilities.iter().find(|c| c.name == name)
    }
}

// ---------------------------------------------------------------------------
// AgentStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Running,
    Paused,
    Error,
    Completed,
    Cancelled,
}

impl AgentStatus {
    /// Returns `true` when a transition from `self` to `target` is valid.
    ///
    /// `stop` may be issued from any status, so Idle is always reachable;
    /// likewise any lifecycle failure may force Error.
    pub fn can_transition_to(&self, target: AgentStatus) -> bool {
        if matches!(target, AgentStatus::Idle | AgentStatus::Error) {
            return true;
        }
        matches!(
            (self, target),
            (AgentStatus::Idle, AgentStatus::Running)
                | (AgentStatus::Paused, AgentStatus::Running)
                | (AgentStatus::Running, AgentStatus::Paused)
                | (AgentStatus::Running, AgentStatus::Completed)
                | (AgentStatus::Running, AgentStatus::Cancelled)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Idle => "idle",
            AgentStatus::Running => "running",
            AgentStatus::Paused => "paused",
            AgentStatus::Error => "error",
            AgentStatus::Completed => "completed",
            AgentStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ---------------------------------------------------------------------------
// AgentState
// ---------------------------------------------------------------------------

/// Mutable runtime state of an agent. Mutated only through the driver's
/// single state-update path, which stamps `last_activity` and re-emits a
/// state-changed event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentState {
    pub status: AgentStatus,
    /// Task progress, 0-100.
    pub progress: u8,
    pub current_task: Option<String>,
    pub last_activity: DateTime<Utc>,
    pub error: Option<AgentError>,
}

impl AgentState {
    pub fn new() -> Self {
        Self {
            status: AgentStatus::Idle,
            progress: 0,
            current_task: None,
            last_activity: Utc::now(),
            error: None,
        }
    }
}

impl Default for AgentState {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// TaskPriority
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    Normal,
    High,
    Critical,
}

// ---------------------------------------------------------------------------
// AgentTask
// ---------------------------------------------------------------------------

/// A unit of work submitted to an agent. Immutable once submitted; the
/// `task_type` must match one of the agent's capability names to be
/// executable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTask {
    pub id: String,
    pub task_type: String,
    pub priority: TaskPriority,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    pub deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default)]
    pub retry_count: u32,
}

impl AgentTask {
    pub fn new(task_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            task_type: task_type.into(),
            priority: TaskPriority::Normal,
            payload,
            created_at: Utc::now(),
            dependencies: Vec::new(),
            deadline: None,
            max_retries: 0,
            retry_count: 0,
        }
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

// ---------------------------------------------------------------------------
// AgentResult
// ---------------------------------------------------------------------------

/// Per-execution metadata attached to every [`AgentResult`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultMetadata {
    pub execution_time_ms: u64,
    pub cost: Option<f64>,
    pub cache_hit: bool,
    pub correlation_id: Uuid,
}

impl ResultMetadata {
    pub fn new(correlation_id: Uuid) -> Self {
        Self {
            execution_time_ms: 0,
            cost: None,
            cache_hit: false,
            correlation_id,
        }
    }
}

/// Outcome of a single `execute` call. Produced exactly once per call;
/// ordinary task failures are carried here rather than thrown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResult {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<AgentError>,
    pub metadata: ResultMetadata,
}

impl AgentResult {
    pub fn ok(data: serde_json::Value, correlation_id: Uuid) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            metadata: ResultMetadata::new(correlation_id),
        }
    }

    pub fn fail(error: AgentError, correlation_id: Uuid) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
            metadata: ResultMetadata::new(correlation_id),
        }
    }

    pub fn with_execution_time(mut self, ms: u64) -> Self {
        self.metadata.execution_time_ms = ms;
        self
    }
}

// ---------------------------------------------------------------------------
// ErrorCode
// ---------------------------------------------------------------------------

/// Fixed taxonomy of agent error codes.
///
/// The first nine are the codes the runtime actually raises. The last four
/// form the recoverable whitelist; `is_recoverable` is membership of that
/// whitelist. Note the two sets are disjoint: every raised code currently
/// resolves to non-recoverable. That mismatch is inherited behaviour and is
/// kept as-is pending a product decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InitError,
    StartError,
    PauseError,
    ResumeError,
    StopError,
    ResetError,
    ExecutionError,
    ConfigError,
    InternalError,
    TimeoutError,
    RateLimitError,
    NetworkError,
    ServiceUnavailable,
}

impl ErrorCode {
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ErrorCode::TimeoutError
                | ErrorCode::RateLimitError
                | ErrorCode::NetworkError
                | ErrorCode::ServiceUnavailable
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InitError => "INIT_ERROR",
            ErrorCode::StartError => "START_ERROR",
            ErrorCode::PauseError => "PAUSE_ERROR",
            ErrorCode::ResumeError => "RESUME_ERROR",
            ErrorCode::StopError => "STOP_ERROR",
            ErrorCode::ResetError => "RESET_ERROR",
            ErrorCode::ExecutionError => "EXECUTION_ERROR",
            ErrorCode::ConfigError => "CONFIG_ERROR",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::TimeoutError => "TIMEOUT_ERROR",
            ErrorCode::RateLimitError => "RATE_LIMIT_ERROR",
            ErrorCode::NetworkError => "NETWORK_ERROR",
            ErrorCode::ServiceUnavailable => "SERVICE_UNAVAILABLE",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ---------------------------------------------------------------------------
// AgentError
// ---------------------------------------------------------------------------

/// Structured agent error carried in results, state, and events.
#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
#[error("[{code}] {message}")]
pub struct AgentError {
    pub code: ErrorCode,
    pub message: String,
    pub details: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
    pub recoverable: bool,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub max_retries: u32,
}

impl AgentError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            timestamp: Utc::now(),
            recoverable: code.is_recoverable(),
            retry_count: 0,
            max_retries: 0,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

// ---------------------------------------------------------------------------
// AgentMetrics
// ---------------------------------------------------------------------------

/// Base execution counters merged with executor-supplied custom metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMetrics {
    pub execution_count: u64,
    pub last_execution_ms: Option<u64>,
    pub uptime_secs: u64,
    pub has_error: bool,
    #[serde(default)]
    pub custom: HashMap<String, serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
