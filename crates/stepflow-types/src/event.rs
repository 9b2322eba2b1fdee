//! Execution events for the stepflow event bus.
//!
//! `ExecutionEvent` is the structured log stream exposed to monitoring
//! collaborators: one `StepTransition` per step state change, plus run
//! lifecycle markers. All variants are Clone + Send + Sync for use with
//! tokio broadcast channels.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::workflow::{RunStatus, StepStatus};

/// Events emitted while a workflow run executes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionEvent {
    /// A run passed validation and began dispatching.
    RunStarted {
        run_id: Uuid,
        workflow_id: Uuid,
        workflow_name: String,
        total_steps: usize,
        at: DateTime<Utc>,
    },

    /// A step moved from one state to another.
    StepTransition {
        run_id: Uuid,
        step_id: String,
        from: StepStatus,
        to: StepStatus,
        /// Attempt number the transition belongs to (0 if the step never ran).
        attempt: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        at: DateTime<Utc>,
    },

    /// A run reached a terminal status.
    RunFinished {
        run_id: Uuid,
        status: RunStatus,
        duration_ms: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        at: DateTime<Utc>,
    },
}

impl ExecutionEvent {
    /// The run this event belongs to.
    pub fn run_id(&self) -> Uuid {
        match self {
            ExecutionEvent::RunStarted { run_id, .. }
            | ExecutionEvent::StepTransition { run_id, .. }
            | ExecutionEvent::RunFinished { run_id, .. } => *run_id,
        }
    }
}
