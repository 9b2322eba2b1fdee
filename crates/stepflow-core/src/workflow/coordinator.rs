//! Execution coordinator: bounded worker pool over a validated plan.
//!
//! Ready steps are dispatched in `(level, id)` order onto a `JoinSet`, never
//! more than `max_concurrency` at a time. Each worker runs its step through
//! the retry manager and records the result through its own `StepRecorder`.
//! When a worker finishes, the coordinator resolves the incoming edges of
//! every dependent whose sources are all terminal and either queues it,
//! skips it, or fails it; skips propagate transitively.
//!
//! Cancellation is cooperative: once the token fires nothing new is
//! dispatched, every step that has not started becomes `Cancelled`, a step
//! waiting to retry is cancelled instead of trying again, and attempts
//! already running finish on their own.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value, json};
use stepflow_types::config::EngineConfig;
use stepflow_types::event::ExecutionEvent;
use stepflow_types::workflow::{
    ExecutionRun, RetryPolicy, RunStatus, SkipReason, StepResult, StepStatus,
};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::context::{ExecutionContext, RunOutcome, StepInputs, StepRecorder};
use super::dag::{ExecutionPlan, PlannedStep};
use super::expression::ExpressionEvaluator;
use super::retry::{RetryManager, RetryOutcome};
use super::step::{StepContext, StepError};
use crate::event::EventBus;

// ---------------------------------------------------------------------------
// Transition log
// ---------------------------------------------------------------------------

/// Emits one tracing event and one bus event per step state change.
#[derive(Debug, Clone)]
struct Transitions {
    run_id: Uuid,
    events: EventBus,
}

impl Transitions {
    fn emit(
        &self,
        step_id: &str,
        from: StepStatus,
        to: StepStatus,
        attempt: u32,
        error: Option<String>,
    ) {
        match &error {
            Some(error) => tracing::info!(
                run_id = %self.run_id,
                step_id,
                %from,
                %to,
                attempt,
                error = %error,
                "step transition"
            ),
            None => tracing::info!(
                run_id = %self.run_id,
                step_id,
                %from,
                %to,
                attempt,
                "step transition"
            ),
        }
        self.events.publish(ExecutionEvent::StepTransition {
            run_id: self.run_id,
            step_id: step_id.to_string(),
            from,
            to,
            attempt,
            error,
            at: Utc::now(),
        });
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

/// Everything a worker task owns while it runs one step.
struct Worker {
    run_id: Uuid,
    step: PlannedStep,
    recorder: StepRecorder,
    inputs: Arc<StepInputs>,
    policy: RetryPolicy,
    timeout: Duration,
    transitions: Transitions,
    cancel: CancellationToken,
}

impl Worker {
    async fn run(self) -> StepStatus {
        let started_at = Utc::now();
        let step_id = self.step.id.clone();

        let outcome = RetryManager::attempt(
            &self.policy,
            &self.cancel,
            |attempt| {
                if let Err(e) = self
                    .recorder
                    .record(StepResult::running(&step_id, attempt, started_at))
                {
                    tracing::warn!(run_id = %self.run_id, step_id = %step_id, error = %e, "could not mark step running");
                }
                self.transitions.emit(
                    &step_id,
                    StepStatus::Pending,
                    StepStatus::Running,
                    attempt,
                    None,
                );

                let ctx = StepContext {
                    run_id: self.run_id,
                    step_id: step_id.clone(),
                    attempt,
                    inputs: Arc::clone(&self.inputs),
                };
                let executor = self.step.executor.clone();
                let config = self.step.config.clone();
                let timeout = self.timeout;
                async move {
                    match tokio::time::timeout(timeout, executor.execute(&ctx, &config)).await {
                        Ok(result) => result,
                        Err(_) => Err(StepError::Timeout(timeout)),
                    }
                }
            },
            |attempt, error, delay| {
                self.transitions.emit(
                    &step_id,
                    StepStatus::Running,
                    StepStatus::Failed,
                    attempt,
                    Some(error.to_string()),
                );
                let mut retry = StepResult::pending(&step_id);
                retry.attempt_count = attempt;
                retry.started_at = Some(started_at);
                retry.error = Some(error.to_string());
                if let Err(e) = self.recorder.record(retry) {
                    tracing::warn!(run_id = %self.run_id, step_id = %step_id, error = %e, "could not record retry");
                }
                self.transitions.emit(
                    &step_id,
                    StepStatus::Failed,
                    StepStatus::Pending,
                    attempt,
                    Some(format!("retry scheduled in {}ms", delay.as_millis())),
                );
            },
        )
        .await;

        // A retry waiting out its backoff is Pending, not Running.
        let (result, from, error) = match outcome {
            RetryOutcome::Succeeded { output, attempts } => (
                StepResult::succeeded(&step_id, output, attempts, started_at),
                StepStatus::Running,
                None,
            ),
            RetryOutcome::Failed { error, attempts } => {
                let message = error.to_string();
                (
                    StepResult::failed(&step_id, message.clone(), attempts, Some(started_at)),
                    StepStatus::Running,
                    Some(message),
                )
            }
            RetryOutcome::Cancelled { error, attempts } => {
                let mut cancelled = StepResult::cancelled(&step_id);
                cancelled.attempt_count = attempts;
                cancelled.started_at = Some(started_at);
                cancelled.error = Some(error.to_string());
                (cancelled, StepStatus::Pending, None)
            }
        };
        let status = result.status;
        let attempts = result.attempt_count;
        if let Err(e) = self.recorder.record(result) {
            tracing::warn!(run_id = %self.run_id, step_id = %step_id, error = %e, "could not record step result");
        }
        self.transitions.emit(&step_id, from, status, attempts, error);
        status
    }
}

// ---------------------------------------------------------------------------
// Edge resolution
// ---------------------------------------------------------------------------

/// What happens to a step once all of its sources are terminal.
#[derive(Debug, Clone, PartialEq)]
enum Readiness {
    Ready,
    Skip(SkipReason),
    Fail(String),
}

fn resolve_incoming(
    step: &PlannedStep,
    plan: &ExecutionPlan,
    context: &ExecutionContext,
) -> Readiness {
    if step.incoming.is_empty() {
        return Readiness::Ready;
    }

    let evaluator = ExpressionEvaluator::new();
    let mut blocked: Option<&str> = None;
    let mut condition_error: Option<String> = None;
    let mut active = false;
    let mut accepted = false;

    for edge in &step.incoming {
        let Some(source) = context.get(&edge.source) else {
            continue;
        };
        let source_optional = plan.step(&edge.source).is_some_and(|s| s.optional);

        match source.status {
            StepStatus::Succeeded => match &edge.condition {
                None => active = true,
                Some(condition) => {
                    let output = source.output.clone().unwrap_or(Value::Null);
                    let mut steps = Map::new();
                    steps.insert(edge.source.clone(), json!({ "output": output.clone() }));
                    let scope = json!({
                        "output": output,
                        "steps": steps,
                        "input": context.input().clone(),
                    });
                    match evaluator.evaluate_bool(condition, &scope) {
                        Ok(true) => active = true,
                        Ok(false) => {}
                        Err(e) => {
                            condition_error.get_or_insert_with(|| {
                                format!("condition on edge {} -> {}: {e}", edge.source, step.id)
                            });
                        }
                    }
                }
            },
            // An optional source that failed is accepted: the target still runs.
            StepStatus::Failed | StepStatus::Skipped if source.is_failure() => {
                if source_optional {
                    accepted = true;
                } else {
                    blocked = match blocked {
                        Some(current) if current <= edge.source.as_str() => Some(current),
                        _ => Some(edge.source.as_str()),
                    };
                }
            }
            _ => {}
        }
    }

    if let Some(source) = blocked {
        return Readiness::Skip(SkipReason::UpstreamFailed {
            step_id: source.to_string(),
        });
    }
    if let Some(message) = condition_error {
        return Readiness::Fail(message);
    }
    if active || accepted {
        Readiness::Ready
    } else {
        Readiness::Skip(SkipReason::BranchNotTaken)
    }
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

/// Drives one run of a validated plan to a terminal status.
pub struct Coordinator {
    plan: Arc<ExecutionPlan>,
    config: EngineConfig,
    context: Arc<ExecutionContext>,
    transitions: Transitions,
    cancel: CancellationToken,
    started_at: DateTime<Utc>,
    launched: Arc<AtomicBool>,
}

impl Coordinator {
    /// Every planned step is recorded `Pending` before this returns.
    pub fn new(
        plan: Arc<ExecutionPlan>,
        config: EngineConfig,
        context: Arc<ExecutionContext>,
        events: EventBus,
        cancel: CancellationToken,
    ) -> Self {
        let transitions = Transitions {
            run_id: context.run_id(),
            events,
        };
        for step in plan.steps() {
            if context.get(&step.id).is_none() {
                let _ = context.record(&step.id, StepResult::pending(&step.id));
            }
        }
        Self {
            plan,
            config: config.normalized(),
            context,
            transitions,
            cancel,
            started_at: Utc::now(),
            launched: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Flag raised when [`Coordinator::run`] publishes `RunStarted`.
    pub fn launched(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.launched)
    }

    /// Execute the plan and return the finished run.
    pub async fn run(self) -> ExecutionRun {
        let run_id = self.context.run_id();
        let max_concurrency = self.config.max_concurrency;

        self.launched.store(true, Ordering::Release);
        self.transitions.events.publish(ExecutionEvent::RunStarted {
            run_id,
            workflow_id: self.plan.workflow_id,
            workflow_name: self.plan.workflow_name.clone(),
            total_steps: self.plan.len(),
            at: Utc::now(),
        });
        tracing::info!(
            run_id = %run_id,
            workflow = %self.plan.workflow_name,
            steps = self.plan.len(),
            max_concurrency,
            "run started"
        );

        let mut remaining: HashMap<&str, usize> = self
            .plan
            .steps()
            .map(|s| (s.id.as_str(), s.dependencies.len()))
            .collect();
        let mut ready: BTreeSet<(usize, String)> = self
            .plan
            .roots()
            .iter()
            .map(|id| (0, id.clone()))
            .collect();
        let mut dispatched: BTreeSet<String> = BTreeSet::new();
        let mut running: HashMap<tokio::task::Id, String> = HashMap::new();
        let mut workers: JoinSet<StepStatus> = JoinSet::new();
        let mut cancelled = false;

        loop {
            if !cancelled && self.cancel.is_cancelled() {
                cancelled = true;
                ready.clear();
                self.cancel_undispatched(&dispatched);
            }

            if !cancelled {
                while workers.len() < max_concurrency {
                    let Some((_, step_id)) = ready.pop_first() else {
                        break;
                    };
                    let Some(step) = self.plan.step(&step_id) else {
                        continue;
                    };
                    let handle = workers.spawn(self.worker(step).run());
                    running.insert(handle.id(), step_id.clone());
                    dispatched.insert(step_id);
                }
            }

            if workers.is_empty() {
                break;
            }

            tokio::select! {
                biased;
                _ = self.cancel.cancelled(), if !cancelled => {
                    tracing::info!(run_id = %run_id, "cancellation requested");
                }
                joined = workers.join_next_with_id() => {
                    let finished = match joined {
                        Some(Ok((id, _status))) => running.remove(&id),
                        Some(Err(join_error)) => {
                            let step_id = running.remove(&join_error.id());
                            if let Some(step_id) = &step_id {
                                self.record_worker_panic(step_id, &join_error.to_string());
                            }
                            step_id
                        }
                        None => None,
                    };
                    if let Some(step_id) = finished {
                        self.settle_dependents(&step_id, &mut remaining, &mut ready, cancelled);
                    }
                }
            }
        }

        let outcome = self.context.aggregate(
            &self.plan.optional_steps(),
            cancelled,
            self.config.optional_failure_policy,
        );
        self.finish(outcome)
    }

    fn worker(&self, step: &PlannedStep) -> Worker {
        let policy = step
            .retry
            .clone()
            .unwrap_or_else(|| self.config.retry.clone())
            .normalized();
        let timeout = step
            .timeout
            .unwrap_or(Duration::from_secs(self.config.step_timeout_secs));
        Worker {
            run_id: self.context.run_id(),
            step: step.clone(),
            recorder: self.context.recorder(step.id.as_str()),
            inputs: Arc::new(self.context.inputs_for(&step.id, &step.dependencies)),
            policy,
            timeout,
            transitions: self.transitions.clone(),
            cancel: self.cancel.child_token(),
        }
    }

    fn record_worker_panic(&self, step_id: &str, detail: &str) {
        let previous = self.context.get(step_id);
        let attempts = previous.as_ref().map_or(0, |r| r.attempt_count);
        let started_at = previous.as_ref().and_then(|r| r.started_at);
        let from = previous.map_or(StepStatus::Running, |r| r.status);
        let message = format!("worker panicked: {detail}");

        tracing::error!(run_id = %self.context.run_id(), step_id, %detail, "step worker panicked");
        if self
            .context
            .record(step_id, StepResult::failed(step_id, message.clone(), attempts, started_at))
            .is_ok()
        {
            self.transitions
                .emit(step_id, from, StepStatus::Failed, attempts, Some(message));
        }
    }

    /// Resolve dependents of a finished step, propagating skips.
    fn settle_dependents<'p>(
        &'p self,
        finished: &str,
        remaining: &mut HashMap<&'p str, usize>,
        ready: &mut BTreeSet<(usize, String)>,
        cancelled: bool,
    ) {
        let mut queue: VecDeque<String> = VecDeque::from([finished.to_string()]);

        while let Some(source_id) = queue.pop_front() {
            let Some(source) = self.plan.step(&source_id) else {
                continue;
            };
            for dependent_id in &source.dependents {
                let Some(count) = remaining.get_mut(dependent_id.as_str()) else {
                    continue;
                };
                *count = count.saturating_sub(1);
                if *count > 0 {
                    continue;
                }
                // Already cancelled (or otherwise decided).
                if self
                    .context
                    .status(dependent_id)
                    .is_some_and(|s| s.is_terminal())
                {
                    continue;
                }
                let Some(dependent) = self.plan.step(dependent_id) else {
                    continue;
                };

                match resolve_incoming(dependent, &self.plan, &self.context) {
                    Readiness::Ready if !cancelled => {
                        ready.insert((dependent.level, dependent.id.clone()));
                    }
                    Readiness::Ready => {}
                    Readiness::Skip(reason) => {
                        let error = match &reason {
                            SkipReason::UpstreamFailed { .. } => Some(reason.to_string()),
                            SkipReason::BranchNotTaken => None,
                        };
                        if self
                            .context
                            .record(dependent_id, StepResult::skipped(dependent_id, reason))
                            .is_ok()
                        {
                            self.transitions.emit(
                                dependent_id,
                                StepStatus::Pending,
                                StepStatus::Skipped,
                                0,
                                error,
                            );
                        }
                        queue.push_back(dependent_id.clone());
                    }
                    Readiness::Fail(message) => {
                        if self
                            .context
                            .record(
                                dependent_id,
                                StepResult::failed(dependent_id, message.clone(), 0, None),
                            )
                            .is_ok()
                        {
                            self.transitions.emit(
                                dependent_id,
                                StepStatus::Pending,
                                StepStatus::Failed,
                                0,
                                Some(message),
                            );
                        }
                        queue.push_back(dependent_id.clone());
                    }
                }
            }
        }
    }

    fn cancel_undispatched(&self, dispatched: &BTreeSet<String>) {
        for step in self.plan.steps() {
            if dispatched.contains(&step.id) {
                continue;
            }
            if self.context.status(&step.id).is_some_and(|s| s.is_terminal()) {
                continue;
            }
            if self
                .context
                .record(&step.id, StepResult::cancelled(&step.id))
                .is_ok()
            {
                self.transitions.emit(
                    &step.id,
                    StepStatus::Pending,
                    StepStatus::Cancelled,
                    0,
                    None,
                );
            }
        }
    }

    fn finish(self, outcome: RunOutcome) -> ExecutionRun {
        let run_id = self.context.run_id();
        let completed_at = Utc::now();
        let duration_ms = (completed_at - self.started_at).num_milliseconds().max(0) as u64;

        match outcome.status {
            RunStatus::Failed => tracing::warn!(
                run_id = %run_id,
                duration_ms,
                error = outcome.error.as_deref().unwrap_or_default(),
                "run failed"
            ),
            status => tracing::info!(
                run_id = %run_id,
                %status,
                duration_ms,
                warnings = outcome.warnings.len(),
                "run finished"
            ),
        }

        self.transitions.events.publish(ExecutionEvent::RunFinished {
            run_id,
            status: outcome.status,
            duration_ms,
            error: outcome.error.clone(),
            at: completed_at,
        });

        ExecutionRun {
            id: run_id,
            workflow_id: self.plan.workflow_id,
            workflow_name: self.plan.workflow_name.clone(),
            status: outcome.status,
            input: self.context.input().clone(),
            started_at: self.started_at,
            completed_at: Some(completed_at),
            steps: self.context.snapshot(),
            error: outcome.error,
            warnings: outcome.warnings,
        }
    }
}
