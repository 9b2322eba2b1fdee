//! Application state wiring the engine together.
//!
//! Pins the engine's ports to the concrete infra implementations: the
//! offline echo provider, the log sink, and optionally a file sink.

use std::path::{Path, PathBuf};

use stepflow_core::llm::{BoxProvider, ProviderRegistry};
use stepflow_core::sink::{BoxSink, LogSink, SinkRegistry};
use stepflow_core::workflow::{StepRegistry, WorkflowEngine};
use stepflow_infra::config::{CONFIG_FILE_NAME, load_engine_config};
use stepflow_infra::llm::EchoProvider;
use stepflow_infra::sink::FileSink;
use stepflow_types::config::EngineConfig;

pub struct AppState {
    pub config: EngineConfig,
}

impl AppState {
    /// Load configuration from `config_path`, or `stepflow.toml` in the
    /// working directory.
    pub async fn init(config_path: Option<&Path>) -> Self {
        let config_path = config_path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME));
        let config = load_engine_config(&config_path).await;
        tracing::debug!(
            path = %config_path.display(),
            max_concurrency = config.max_concurrency,
            "engine configuration loaded"
        );
        Self { config }
    }

    /// Step registry with the built-in executors.
    ///
    /// Output steps go to the log unless `output_file` is given, in which
    /// case the file sink becomes the default. Both stay addressable by name
    /// (`log`, `file`).
    pub fn step_registry(&self, output_file: Option<&Path>) -> StepRegistry {
        let mut providers = ProviderRegistry::new();
        providers.register("echo", BoxProvider::new(EchoProvider::new()));

        let mut sinks = SinkRegistry::new();
        sinks.register(BoxSink::new(LogSink::new()));
        if let Some(path) = output_file {
            sinks.register(BoxSink::new(FileSink::new(path)));
            sinks.set_default("file");
        }

        StepRegistry::with_defaults(providers, sinks)
    }

    pub fn engine(&self, config: EngineConfig, output_file: Option<&Path>) -> WorkflowEngine {
        WorkflowEngine::new(self.step_registry(output_file), config)
    }
}
