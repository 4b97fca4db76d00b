use std::path::PathBuf;

use anyhow::{Context, Result};
use lib_livetiming::signalr::{Attributes, StatePublisher};
use serde_json::json;

/// Logs every flag change and, when a path is configured, mirrors the latest
/// state into a JSON file for other processes to pick up.
#[derive(Debug, Default)]
pub struct LogPublisher {
    state_file: Option<PathBuf>,
}

impl LogPublisher {
    pub fn new(state_file: Option<PathBuf>) -> Self {
        Self { state_file }
    }
}

impl StatePublisher for LogPublisher {
    async fn publish(&self, state: &str, attributes: &Attributes) -> Result<()> {
        log::info!(
            "Flag is now {} ({})",
            state,
            attributes.get("message").and_then(|m| m.as_str()).unwrap_or("")
        );

        if let Some(path) = &self.state_file {
            let document = json!({
                "state": state,
                "attributes": attributes,
                "updated": chrono::Utc::now().to_rfc3339(),
            });
            tokio::fs::write(path, serde_json::to_vec_pretty(&document)?)
                .await
                .with_context(|| format!("writing flag state to {}", path.display()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[tokio::test]
    async fn writes_state_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flag.json");
        let publisher = LogPublisher::new(Some(path.clone()));

        let mut attributes = Attributes::new();
        attributes.insert("message".to_string(), json!("RED FLAG"));
        publisher.publish("RED", &attributes).await.unwrap();

        let written: Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(written["state"], "RED");
        assert_eq!(written["attributes"]["message"], "RED FLAG");
    }

    #[tokio::test]
    async fn unwritable_state_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = LogPublisher::new(Some(dir.path().join("missing").join("flag.json")));
        assert!(publisher.publish("GREEN", &Attributes::new()).await.is_err());
    }

    #[tokio::test]
    async fn log_only_publisher_never_fails() {
        LogPublisher::default()
            .publish("GREEN", &Attributes::new())
            .await
            .unwrap();
    }
}
