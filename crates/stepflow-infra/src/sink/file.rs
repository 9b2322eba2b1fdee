//! Filesystem sink: appends each delivery to a JSON-lines file.

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use stepflow_core::sink::{Delivery, DeliveryReceipt, OutputSink, SinkError};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use uuid::Uuid;

/// One line of the output file.
#[derive(Debug, Serialize)]
struct Record<'a> {
    run_id: Uuid,
    step_id: &'a str,
    delivered_at: chrono::DateTime<Utc>,
    payload: &'a Value,
}

/// Sink that appends deliveries to a file, one JSON object per line.
///
/// Parent directories are created on first use. Writes are serialized so
/// concurrent output steps never interleave lines.
#[derive(Debug)]
pub struct FileSink {
    name: String,
    path: PathBuf,
    lines: Mutex<u64>,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::named("file", path)
    }

    pub fn named(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            lines: Mutex::new(0),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl OutputSink for FileSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn deliver(&self, delivery: &Delivery) -> Result<DeliveryReceipt, SinkError> {
        let mut line = serde_json::to_vec(&Record {
            run_id: delivery.run_id,
            step_id: &delivery.step_id,
            delivered_at: Utc::now(),
            payload: &delivery.payload,
        })
        .map_err(|e| SinkError::Rejected(format!("payload is not serializable: {e}")))?;
        line.push(b'\n');

        let mut lines = self.lines.lock().await;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                SinkError::Unavailable(format!("failed to create {}: {e}", parent.display()))
            })?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| {
                SinkError::Unavailable(format!("failed to open {}: {e}", self.path.display()))
            })?;
        file.write_all(&line).await.map_err(|e| {
            SinkError::Unavailable(format!("failed to write {}: {e}", self.path.display()))
        })?;
        file.flush().await.map_err(|e| {
            SinkError::Unavailable(format!("failed to flush {}: {e}", self.path.display()))
        })?;

        *lines += 1;
        tracing::debug!(
            sink = %self.name,
            path = %self.path.display(),
            step_id = %delivery.step_id,
            "delivery written"
        );

        Ok(DeliveryReceipt {
            sink: self.name.clone(),
            reference: Some(format!("{}:{}", self.path.display(), *lines)),
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;

    fn delivery(step_id: &str, payload: Value) -> Delivery {
        Delivery {
            run_id: Uuid::now_v7(),
            step_id: step_id.to_string(),
            payload,
        }
    }

    #[tokio::test]
    async fn appends_json_lines() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("out").join("results.jsonl");
        let sink = FileSink::new(&path);

        let first = sink.deliver(&delivery("report", json!({ "ok": true }))).await.unwrap();
        sink.deliver(&delivery("digest", json!("text"))).await.unwrap();

        assert_eq!(first.sink, "file");
        assert_eq!(first.reference, Some(format!("{}:1", path.display())));

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["step_id"], "report");
        assert_eq!(lines[0]["payload"], json!({ "ok": true }));
        assert_eq!(lines[1]["payload"], "text");
        assert!(lines[1]["delivered_at"].is_string());
    }

    #[tokio::test]
    async fn unwritable_path_is_transient() {
        let tmp = TempDir::new().unwrap();
        // A directory cannot be opened for appending.
        let sink = FileSink::named("broken", tmp.path());
        let err = sink.deliver(&delivery("report", json!(1))).await.unwrap_err();
        assert!(err.is_transient());
    }
}
