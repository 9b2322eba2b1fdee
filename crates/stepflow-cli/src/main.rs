//! stepflow CLI entry point.
//!
//! Binary name: `stepflow`
//!
//! Parses CLI arguments, initializes tracing and configuration, then
//! dispatches to the appropriate command handler.

mod cli;
mod state;

use clap::Parser;
use clap_complete::generate;
use stepflow_observe::{TracingOptions, init_tracing, shutdown_tracing};

use cli::workflow::{Output, RunArgs};
use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Shell completions don't need tracing or config
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "stepflow", &mut std::io::stdout());
        return Ok(());
    }

    init_tracing(&TracingOptions {
        verbosity: cli.verbose,
        quiet: cli.quiet,
        format: cli.log_format.into(),
        enable_otel: cli.otel,
    })
    .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;

    let result = dispatch(cli).await;
    shutdown_tracing();
    result
}

async fn dispatch(cli: Cli) -> anyhow::Result<()> {
    let state = AppState::init(cli.config.as_deref()).await;
    let out = Output {
        json: cli.json,
        quiet: cli.quiet,
    };

    match cli.command {
        Commands::Validate { file } => cli::workflow::handle_validate(&file, &state, out).await,
        Commands::Plan { file } => cli::workflow::handle_plan(&file, &state, out).await,
        Commands::Run {
            file,
            input,
            input_file,
            max_concurrency,
            output_file,
        } => {
            cli::workflow::handle_run(
                RunArgs {
                    file: &file,
                    input: input.as_deref(),
                    input_file: input_file.as_deref(),
                    max_concurrency,
                    output_file: output_file.as_deref(),
                },
                &state,
                out,
            )
            .await
        }
        Commands::Completions { .. } => unreachable!("handled above"),
    }
}
