//! Engine configuration loader.
//!
//! Reads `stepflow.toml` and deserializes it into [`EngineConfig`]. Falls
//! back to defaults when the file is missing or malformed, and clamps every
//! value into its valid range.

use std::path::Path;

use stepflow_types::config::EngineConfig;

/// File name looked up in the working directory when no path is given.
pub const CONFIG_FILE_NAME: &str = "stepflow.toml";

/// Load engine configuration from `path`.
///
/// - Missing file: [`EngineConfig::default()`].
/// - Unreadable or unparsable file: logs a warning, returns the default.
/// - Otherwise the parsed config, normalized.
pub async fn load_engine_config(path: &Path) -> EngineConfig {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config found at {}, using defaults", path.display());
            return EngineConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", path.display());
            return EngineConfig::default();
        }
    };

    parse_engine_config(&content).unwrap_or_else(|err| {
        tracing::warn!("Failed to parse {}: {err}, using defaults", path.display());
        EngineConfig::default()
    })
}

/// Parse and normalize a TOML document.
pub fn parse_engine_config(content: &str) -> Result<EngineConfig, toml::de::Error> {
    toml::from_str::<EngineConfig>(content).map(EngineConfig::normalized)
}
