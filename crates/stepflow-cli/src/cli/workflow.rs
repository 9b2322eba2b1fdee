//! Workflow subcommands: validate, plan, and run.

use std::path::Path;

use anyhow::{Context, Result, bail};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use serde_json::{Value, json};
use tokio::sync::broadcast::error::RecvError;

use stepflow_core::workflow::{
    EngineError, ExecutionPlan, WorkflowEngine, ensure_completed, load_workflow_file,
};
use stepflow_types::event::ExecutionEvent;
use stepflow_types::workflow::{ExecutionRun, RunStatus, StepResult, StepStatus, WorkflowDefinition};

use crate::state::AppState;

/// How results are printed.
#[derive(Debug, Clone, Copy)]
pub struct Output {
    pub json: bool,
    pub quiet: bool,
}

impl Output {
    fn human(&self) -> bool {
        !self.json && !self.quiet
    }
}

async fn load(file: &Path) -> Result<WorkflowDefinition> {
    load_workflow_file(file)
        .await
        .with_context(|| format!("Failed to load workflow from {}", file.display()))
}

fn plan_or_bail(engine: &WorkflowEngine, def: &WorkflowDefinition) -> Result<ExecutionPlan> {
    engine
        .plan(def)
        .with_context(|| format!("Workflow '{}' is invalid", def.name))
}

// ---------------------------------------------------------------------------
// Validate
// ---------------------------------------------------------------------------

pub async fn handle_validate(file: &Path, state: &AppState, out: Output) -> Result<()> {
    let def = load(file).await?;
    let engine = state.engine(state.config.clone(), None);

    match engine.plan(&def) {
        Ok(plan) => {
            if out.json {
                let report = json!({
                    "valid": true,
                    "workflow": def.name,
                    "nodes": def.nodes.len(),
                    "edges": def.edges.len(),
                    "levels": plan.levels().len(),
                });
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else if out.human() {
                println!();
                println!(
                    "  {} Workflow '{}' is valid",
                    style("✓").green().bold(),
                    style(&def.name).cyan()
                );
                println!(
                    "  {} nodes, {} edges, {} levels",
                    def.nodes.len(),
                    def.edges.len(),
                    plan.levels().len()
                );
                println!();
            }
            Ok(())
        }
        Err(err) => {
            if out.json {
                let report = json!({
                    "valid": false,
                    "workflow": def.name,
                    "error": err.to_string(),
                });
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
            Err(anyhow::Error::new(err).context(format!("Workflow '{}' is invalid", def.name)))
        }
    }
}

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

pub async fn handle_plan(file: &Path, state: &AppState, out: Output) -> Result<()> {
    let def = load(file).await?;
    let engine = state.engine(state.config.clone(), None);
    let plan = plan_or_bail(&engine, &def)?;

    if out.json {
        let steps: serde_json::Map<String, Value> = plan
            .steps()
            .map(|s| {
                (
                    s.id.clone(),
                    json!({
                        "type": s.step_type,
                        "kind": s.kind,
                        "level": s.level,
                        "optional": s.optional,
                        "dependencies": s.dependencies,
                    }),
                )
            })
            .collect();
        let report = json!({
            "workflow": plan.workflow_name,
            "levels": plan.levels(),
            "steps": steps,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    if out.quiet {
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Level").fg(Color::Cyan),
            Cell::new("Step"),
            Cell::new("Type"),
            Cell::new("Depends on"),
        ]);

    for (level, ids) in plan.levels().iter().enumerate() {
        for id in ids {
            let Some(step) = plan.step(id) else {
                continue;
            };
            let mut name = step.id.clone();
            if step.optional {
                name.push_str(" (optional)");
            }
            let deps = if step.dependencies.is_empty() {
                "-".to_string()
            } else {
                step.dependencies.join(", ")
            };
            table.add_row(vec![
                Cell::new(level),
                Cell::new(name),
                Cell::new(&step.step_type),
                Cell::new(deps),
            ]);
        }
    }

    println!();
    println!(
        "  Execution plan for '{}' ({} steps, max concurrency {})",
        style(&plan.workflow_name).cyan(),
        plan.len(),
        engine.config().max_concurrency
    );
    println!();
    println!("{table}");
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

pub struct RunArgs<'a> {
    pub file: &'a Path,
    pub input: Option<&'a str>,
    pub input_file: Option<&'a Path>,
    pub max_concurrency: Option<usize>,
    pub output_file: Option<&'a Path>,
}

pub async fn handle_run(args: RunArgs<'_>, state: &AppState, out: Output) -> Result<()> {
    let def = load(args.file).await?;
    let input = read_input(args.input, args.input_file).await?;

    let mut config = state.config.clone();
    if let Some(max_concurrency) = args.max_concurrency {
        config.max_concurrency = max_concurrency;
    }
    let engine = state.engine(config, args.output_file);

    let name = def.name.clone();
    let workflow_id = engine
        .register_workflow(def)
        .with_context(|| format!("Workflow '{name}' is invalid"))?;

    let mut events = engine.subscribe();
    let run_id = engine.start_run(workflow_id, input)?;

    if out.human() {
        println!();
        println!(
            "  {} Running '{}' (run {})",
            style("*").green().bold(),
            style(&name).cyan(),
            style(run_id).dim()
        );
        println!();
    }

    let mut cancel_requested = false;
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c(), if !cancel_requested => {
                signal.context("Failed to listen for Ctrl+C")?;
                cancel_requested = true;
                if engine.cancel_run(run_id)? && out.human() {
                    println!("  {} Cancelling; waiting for running steps to finish", style("!").yellow().bold());
                }
            }
            event = events.recv() => match event {
                Ok(event) if event.run_id() != run_id => {}
                Ok(ExecutionEvent::RunFinished { .. }) => break,
                Ok(ExecutionEvent::StepTransition { step_id, to, attempt, error, .. }) => {
                    if out.human() {
                        print_transition(&step_id, to, attempt, error.as_deref());
                    }
                }
                Ok(ExecutionEvent::RunStarted { .. }) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "execution log lagged; some transitions were not shown");
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    let run = engine.wait_for_run(run_id).await?;

    if out.json {
        println!("{}", serde_json::to_string_pretty(&run)?);
    } else if out.human() {
        print_summary(&run);
    }

    match ensure_completed(&run) {
        Ok(()) => Ok(()),
        Err(EngineError::Cancelled { .. }) => bail!("Run {run_id} was cancelled"),
        Err(err) => Err(err.into()),
    }
}

/// Input parameters: inline JSON, a JSON file, or an empty object.
pub async fn read_input(inline: Option<&str>, file: Option<&Path>) -> Result<Value> {
    let value: Value = match (inline, file) {
        (Some(raw), _) => serde_json::from_str(raw).context("Invalid JSON in --input")?,
        (None, Some(path)) => {
            let raw = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("Invalid JSON in {}", path.display()))?
        }
        (None, None) => json!({}),
    };
    if !value.is_object() {
        bail!("Input parameters must be a JSON object");
    }
    Ok(value)
}

fn print_transition(step_id: &str, to: StepStatus, attempt: u32, error: Option<&str>) {
    let marker = match to {
        StepStatus::Running => style("→").blue(),
        StepStatus::Succeeded => style("✓").green(),
        StepStatus::Failed => style("✗").red(),
        StepStatus::Skipped => style("-").dim(),
        StepStatus::Cancelled => style("⊘").yellow(),
        StepStatus::Pending => style("↻").yellow(),
    };
    let attempt = if attempt > 1 {
        format!(" (attempt {attempt})")
    } else {
        String::new()
    };
    match error {
        Some(error) => println!("  {marker} {step_id} {to}{attempt}: {}", style(error).dim()),
        None => println!("  {marker} {step_id} {to}{attempt}"),
    }
}

fn print_summary(run: &ExecutionRun) {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Step").fg(Color::Cyan),
            Cell::new("Status"),
            Cell::new("Attempts"),
            Cell::new("Duration"),
            Cell::new("Detail"),
        ]);

    for step in run.steps.values() {
        table.add_row(vec![
            Cell::new(&step.step_id),
            format_step_status(step.status),
            Cell::new(step.attempt_count),
            Cell::new(format_duration(step)),
            Cell::new(step_detail(step)),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    let status = match run.status {
        RunStatus::Succeeded => style(run.status.to_string()).green().bold(),
        RunStatus::PartiallyCompleted | RunStatus::Cancelled => {
            style(run.status.to_string()).yellow().bold()
        }
        _ => style(run.status.to_string()).red().bold(),
    };
    println!("  Run {}: {status}", run.id);
    if let Some(error) = &run.error {
        println!("  Error: {error}");
    }
    for warning in &run.warnings {
        println!("  Warning: {warning}");
    }
    println!();
}

fn format_step_status(status: StepStatus) -> Cell {
    let cell = Cell::new(status.to_string());
    match status {
        StepStatus::Pending => cell.fg(Color::Yellow),
        StepStatus::Running => cell.fg(Color::Blue),
        StepStatus::Succeeded => cell.fg(Color::Green),
        StepStatus::Failed => cell.fg(Color::Red),
        StepStatus::Skipped => cell.fg(Color::DarkGrey),
        StepStatus::Cancelled => cell.fg(Color::Magenta),
    }
}

fn format_duration(step: &StepResult) -> String {
    match (step.started_at, step.completed_at) {
        (Some(start), Some(end)) => {
            let ms = (end - start).num_milliseconds().max(0);
            if ms < 1_000 {
                format!("{ms}ms")
            } else {
                format!("{:.1}s", ms as f64 / 1_000.0)
            }
        }
        _ => "-".to_string(),
    }
}

fn step_detail(step: &StepResult) -> String {
    if let Some(reason) = &step.skip_reason {
        return reason.to_string();
    }
    if let Some(error) = &step.error {
        return error.clone();
    }
    step.output
        .as_ref()
        .map(|output| truncate(&output.to_string(), 60))
        .unwrap_or_default()
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    cut.push('…');
    cut
}
