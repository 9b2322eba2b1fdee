//! Workflow domain types for stepflow.
//!
//! Defines the definition the engine consumes (`WorkflowDefinition`, its
//! nodes and edges) and the execution tracking types it produces
//! (`ExecutionRun`, `StepResult`).

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Workflow Definition
// ---------------------------------------------------------------------------

/// A declarative workflow graph.
///
/// Produced by an external authoring layer and consumed read-only by the
/// engine. Layout data (canvas positions and the like) may be present in
/// serialized form; unknown fields are ignored on deserialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// UUIDv7 assigned by the authoring layer. Generated when absent.
    #[serde(default = "Uuid::now_v7")]
    pub id: Uuid,
    /// Human-readable workflow name.
    pub name: String,
    /// Definition version string (e.g. "1.0.0").
    #[serde(default = "default_version")]
    pub version: String,
    /// Ordered list of nodes.
    pub nodes: Vec<NodeDefinition>,
    /// Dependency edges between nodes.
    #[serde(default)]
    pub edges: Vec<EdgeDefinition>,
    /// Extensible metadata.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

/// A single unit of work in the workflow graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDefinition {
    /// Node ID, unique within a workflow.
    pub id: String,
    /// Optional display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Step-type tag resolved through the executor registry (e.g. "ai").
    #[serde(rename = "type")]
    pub step_type: String,
    /// Opaque configuration interpreted by the node's executor.
    #[serde(default)]
    pub config: serde_json::Value,
    /// Whether a failure of this node is tolerated by the run.
    #[serde(default)]
    pub optional: bool,
    /// Per-attempt timeout in seconds (overrides the engine default).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// Retry policy override for this node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
}

impl NodeDefinition {
    /// Display label: the name if set, otherwise the ID.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

/// A dependency edge: `target` runs after `source`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeDefinition {
    pub source: String,
    pub target: String,
    /// Optional JEXL expression evaluated against the source output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

/// Capability of a registered step executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Input,
    Process,
    Ai,
    Output,
}

impl StepKind {
    pub const ALL: [StepKind; 4] = [
        StepKind::Input,
        StepKind::Process,
        StepKind::Ai,
        StepKind::Output,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::Input => "input",
            StepKind::Process => "process",
            StepKind::Ai => "ai",
            StepKind::Output => "output",
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "input" => Ok(StepKind::Input),
            "process" => Ok(StepKind::Process),
            "ai" => Ok(StepKind::Ai),
            "output" => Ok(StepKind::Output),
            other => Err(format!("unknown step kind: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Retry Policy
// ---------------------------------------------------------------------------

/// Retry policy for a step.
///
/// The delay before attempt `n + 1` is
/// `base_delay_ms * multiplier^(n - 1)`, capped at `max_delay_ms`, then
/// perturbed by up to `jitter` of itself in either direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts (default 3).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Exponential growth factor between retries.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Upper bound for a single delay, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Random jitter as a fraction of the computed delay (0.0 to 1.0).
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    200
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_jitter() -> f64 {
    0.1
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            multiplier: default_multiplier(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_jitter(),
        }
    }
}

impl RetryPolicy {
    /// A policy with no delay and no jitter. Mostly useful in tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay_ms: 0,
            multiplier: 1.0,
            max_delay_ms: 0,
            jitter: 0.0,
        }
    }

    /// Clamp fields into their valid ranges.
    pub fn normalized(mut self) -> Self {
        self.max_attempts = self.max_attempts.max(1);
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            self.multiplier = 1.0;
        }
        self.jitter = if self.jitter.is_finite() {
            self.jitter.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self
    }
}

// ---------------------------------------------------------------------------
// Step Results
// ---------------------------------------------------------------------------

/// Status of a single step within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
    Cancelled,
}

impl StepStatus {
    /// Terminal states never transition again within a run.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepStatus::Succeeded | StepStatus::Failed | StepStatus::Skipped | StepStatus::Cancelled
        )
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Succeeded => "succeeded",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
            StepStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Why a step was skipped without running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SkipReason {
    /// A required upstream step failed (directly or transitively).
    UpstreamFailed { step_id: String },
    /// No incoming edge was active (conditions false or branches pruned).
    BranchNotTaken,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::UpstreamFailed { step_id } => {
                write!(f, "upstream step '{step_id}' failed")
            }
            SkipReason::BranchNotTaken => f.write_str("branch not taken"),
        }
    }
}

/// The recorded outcome of one step in a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,
    /// Number of attempts made (0 if the step never ran).
    pub attempt_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl StepResult {
    pub fn pending(step_id: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            status: StepStatus::Pending,
            output: None,
            error: None,
            skip_reason: None,
            attempt_count: 0,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn running(step_id: impl Into<String>, attempt: u32, started_at: DateTime<Utc>) -> Self {
        Self {
            status: StepStatus::Running,
            attempt_count: attempt,
            started_at: Some(started_at),
            ..Self::pending(step_id)
        }
    }

    pub fn succeeded(
        step_id: impl Into<String>,
        output: serde_json::Value,
        attempts: u32,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            status: StepStatus::Succeeded,
            output: Some(output),
            attempt_count: attempts,
            started_at: Some(started_at),
            completed_at: Some(Utc::now()),
            ..Self::pending(step_id)
        }
    }

    pub fn failed(
        step_id: impl Into<String>,
        error: impl Into<String>,
        attempts: u32,
        started_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            status: StepStatus::Failed,
            error: Some(error.into()),
            attempt_count: attempts,
            started_at,
            completed_at: Some(Utc::now()),
            ..Self::pending(step_id)
        }
    }

    pub fn skipped(step_id: impl Into<String>, reason: SkipReason) -> Self {
        Self {
            status: StepStatus::Skipped,
            error: match &reason {
                SkipReason::UpstreamFailed { .. } => Some(reason.to_string()),
                SkipReason::BranchNotTaken => None,
            },
            skip_reason: Some(reason),
            completed_at: Some(Utc::now()),
            ..Self::pending(step_id)
        }
    }

    pub fn cancelled(step_id: impl Into<String>) -> Self {
        Self {
            status: StepStatus::Cancelled,
            completed_at: Some(Utc::now()),
            ..Self::pending(step_id)
        }
    }

    /// Failed, or skipped because something upstream failed.
    pub fn is_failure(&self) -> bool {
        match self.status {
            StepStatus::Failed => true,
            StepStatus::Skipped => {
                matches!(self.skip_reason, Some(SkipReason::UpstreamFailed { .. }))
            }
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Execution Run
// ---------------------------------------------------------------------------

/// Overall status of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Succeeded,
    /// Every required step succeeded but at least one optional step failed.
    PartiallyCompleted,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Pending | RunStatus::Running)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::PartiallyCompleted => "partially_completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// A single execution instance of a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRun {
    /// UUIDv7 run ID.
    pub id: Uuid,
    pub workflow_id: Uuid,
    /// Name of the workflow (denormalized for display).
    pub workflow_name: String,
    pub status: RunStatus,
    /// Input parameters supplied by the trigger.
    pub input: serde_json::Value,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Per-step results keyed by step ID.
    pub steps: BTreeMap<String, StepResult>,
    /// The failing step and its last error, if the run failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Tolerated failures of optional steps.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl ExecutionRun {
    pub fn step(&self, step_id: &str) -> Option<&StepResult> {
        self.steps.get(step_id)
    }

    /// Count of steps currently in the given status.
    pub fn count(&self, status: StepStatus) -> usize {
        self.steps.values().filter(|r| r.status == status).count()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
