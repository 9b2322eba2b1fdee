//! Workflow engine service.
//!
//! Owns registered definitions and the registry of runs. Each run gets its
//! own `ExecutionContext` and `CancellationToken`; the coordinator runs on a
//! spawned task and publishes the finished `ExecutionRun` through a watch
//! channel so any number of callers can wait for it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use stepflow_types::config::EngineConfig;
use stepflow_types::event::ExecutionEvent;
use stepflow_types::workflow::{ExecutionRun, RunStatus, WorkflowDefinition};
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::context::ExecutionContext;
use super::coordinator::Coordinator;
use super::dag::{ExecutionPlan, validate};
use super::error::EngineError;
use super::registry::StepRegistry;
use crate::event::EventBus;

/// Book-keeping for one run, live or finished.
struct RunHandle {
    plan: Arc<ExecutionPlan>,
    context: Arc<ExecutionContext>,
    cancel: CancellationToken,
    started_at: DateTime<Utc>,
    launched: Arc<AtomicBool>,
    finished: watch::Receiver<Option<ExecutionRun>>,
}

impl RunHandle {
    fn final_run(&self) -> Option<ExecutionRun> {
        self.finished.borrow().clone()
    }

    /// `Pending` until the coordinator task starts dispatching.
    fn live_status(&self) -> RunStatus {
        if self.launched.load(Ordering::Acquire) {
            RunStatus::Running
        } else {
            RunStatus::Pending
        }
    }

    /// Live view assembled from the context while the coordinator is busy.
    fn live_snapshot(&self) -> ExecutionRun {
        ExecutionRun {
            id: self.context.run_id(),
            workflow_id: self.plan.workflow_id,
            workflow_name: self.plan.workflow_name.clone(),
            status: self.live_status(),
            input: self.context.input().clone(),
            started_at: self.started_at,
            completed_at: None,
            steps: self.context.snapshot(),
            error: None,
            warnings: Vec::new(),
        }
    }
}

pub struct WorkflowEngine {
    registry: Arc<StepRegistry>,
    config: EngineConfig,
    events: EventBus,
    workflows: DashMap<Uuid, Arc<WorkflowDefinition>>,
    runs: DashMap<Uuid, RunHandle>,
}

impl WorkflowEngine {
    pub fn new(registry: StepRegistry, config: EngineConfig) -> Self {
        let config = config.normalized();
        Self {
            registry: Arc::new(registry),
            events: EventBus::new(config.event_capacity),
            config,
            workflows: DashMap::new(),
            runs: DashMap::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &StepRegistry {
        &self.registry
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Subscribe to the execution log of every run on this engine.
    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.events.subscribe()
    }

    /// Validate a definition without registering it.
    pub fn plan(&self, definition: &WorkflowDefinition) -> Result<ExecutionPlan, EngineError> {
        validate(definition, &self.registry)
    }

    /// Validate and store a definition. Re-registering an id replaces it.
    pub fn register_workflow(&self, definition: WorkflowDefinition) -> Result<Uuid, EngineError> {
        self.plan(&definition)?;
        let id = definition.id;
        tracing::info!(workflow_id = %id, workflow = %definition.name, "workflow registered");
        self.workflows.insert(id, Arc::new(definition));
        Ok(id)
    }

    pub fn workflow(&self, workflow_id: Uuid) -> Option<Arc<WorkflowDefinition>> {
        self.workflows.get(&workflow_id).map(|w| Arc::clone(&w))
    }

    /// Start a run of a registered workflow.
    ///
    /// Validation happens before this returns; execution continues on a
    /// spawned task. Must be called from within a tokio runtime.
    pub fn start_run(&self, workflow_id: Uuid, input: Value) -> Result<Uuid, EngineError> {
        let definition = self
            .workflow(workflow_id)
            .ok_or(EngineError::WorkflowNotFound(workflow_id))?;
        let plan = Arc::new(self.plan(&definition)?);

        let run_id = Uuid::now_v7();
        let context = Arc::new(ExecutionContext::new(run_id, input));
        let cancel = CancellationToken::new();
        let coordinator = Coordinator::new(
            Arc::clone(&plan),
            self.config.clone(),
            Arc::clone(&context),
            self.events.clone(),
            cancel.clone(),
        );
        let started_at = coordinator.started_at();
        let launched = coordinator.launched();
        let (finished_tx, finished_rx) = watch::channel(None);

        self.runs.insert(
            run_id,
            RunHandle {
                plan,
                context,
                cancel,
                started_at,
                launched,
                finished: finished_rx,
            },
        );

        tokio::spawn(async move {
            let run = coordinator.run().await;
            let _ = finished_tx.send(Some(run));
        });

        Ok(run_id)
    }

    /// Current state of a run: the final result once finished, otherwise a
    /// live snapshot.
    pub fn get_run(&self, run_id: Uuid) -> Result<ExecutionRun, EngineError> {
        let handle = self.runs.get(&run_id).ok_or(EngineError::RunNotFound(run_id))?;
        Ok(handle.final_run().unwrap_or_else(|| handle.live_snapshot()))
    }

    /// Request cancellation. Returns `false` if the run had already finished
    /// or was already cancelled.
    pub fn cancel_run(&self, run_id: Uuid) -> Result<bool, EngineError> {
        let handle = self.runs.get(&run_id).ok_or(EngineError::RunNotFound(run_id))?;
        if handle.final_run().is_some() || handle.cancel.is_cancelled() {
            return Ok(false);
        }
        tracing::info!(run_id = %run_id, "cancelling run");
        handle.cancel.cancel();
        Ok(true)
    }

    /// Wait until the run reaches a terminal status.
    pub async fn wait_for_run(&self, run_id: Uuid) -> Result<ExecutionRun, EngineError> {
        let mut finished = self
            .runs
            .get(&run_id)
            .map(|h| h.finished.clone())
            .ok_or(EngineError::RunNotFound(run_id))?;

        match finished.wait_for(Option::is_some).await {
            Ok(run) => run.clone().ok_or(EngineError::RunNotFound(run_id)),
            Err(_) => Err(EngineError::RunFailed {
                run_id,
                message: "run task ended without a result".to_string(),
            }),
        }
    }

    /// Register `definition`, run it, and wait for the result.
    pub async fn execute(
        &self,
        definition: WorkflowDefinition,
        input: Value,
    ) -> Result<ExecutionRun, EngineError> {
        let workflow_id = self.register_workflow(definition)?;
        let run_id = self.start_run(workflow_id, input)?;
        self.wait_for_run(run_id).await
    }

    /// Drop a finished run from the registry and return it. Runs still in
    /// progress are left alone and `None` is returned.
    pub fn remove_run(&self, run_id: Uuid) -> Result<Option<ExecutionRun>, EngineError> {
        let finished = self
            .runs
            .get(&run_id)
            .ok_or(EngineError::RunNotFound(run_id))?
            .final_run();
        if finished.is_some() {
            self.runs.remove(&run_id);
        }
        Ok(finished)
    }

    /// Ids and statuses of all known runs.
    pub fn list_runs(&self) -> Vec<(Uuid, RunStatus)> {
        let mut runs: Vec<(Uuid, RunStatus)> = self
            .runs
            .iter()
            .map(|entry| {
                let status = entry
                    .final_run()
                    .map_or_else(|| entry.live_status(), |run| run.status);
                (*entry.key(), status)
            })
            .collect();
        runs.sort_by_key(|(id, _)| *id);
        runs
    }
}

/// Turn a finished run into an error when it did not succeed.
///
/// `PartiallyCompleted` counts as success: its failures were all optional.
pub fn ensure_completed(run: &ExecutionRun) -> Result<(), EngineError> {
    match run.status {
        RunStatus::Succeeded | RunStatus::PartiallyCompleted => Ok(()),
        RunStatus::Cancelled => Err(EngineError::Cancelled { run_id: run.id }),
        status => Err(EngineError::RunFailed {
            run_id: run.id,
            message: run
                .error
                .clone()
                .unwrap_or_else(|| format!("run ended with status {status}")),
        }),
    }
}
