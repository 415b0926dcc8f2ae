use crate::domain::model::DeploymentRun;
use crate::domain::ports::RunStore;
use crate::utils::error::{OrchestratorError, Result};
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

pub const DEFAULT_HISTORY_PATH: &str = ".orchestrate/runs.jsonl";

/// Append-only JSON Lines history, one `DeploymentRun` snapshot per line.
#[derive(Debug, Clone)]
pub struct JsonlRunStore {
    path: PathBuf,
}

impl JsonlRunStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RunStore for JsonlRunStore {
    async fn append(&self, run: &DeploymentRun) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let mut line = serde_json::to_string(run)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        tracing::debug!("💾 Recorded {} ({}) in {}", run.id(), run.state(), self.path.display());
        Ok(())
    }

    async fn latest(&self, run_id: Option<&str>) -> Result<DeploymentRun> {
        let wanted = run_id.unwrap_or("latest").to_string();
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(OrchestratorError::RunNotFound(wanted));
            }
            Err(e) => return Err(e.into()),
        };

        // 由後往前找：同一 run 的最後一筆快照為最新狀態
        let lines: Vec<&str> = content.lines().collect();
        for (index, line) in lines.into_iter().enumerate().rev() {
            if line.trim().is_empty() {
                continue;
            }
            let run: DeploymentRun = match serde_json::from_str(line) {
                Ok(run) => run,
                Err(e) => {
                    tracing::warn!("Skipping malformed history line {}: {}", index + 1, e);
                    continue;
                }
            };
            match run_id {
                Some(id) if run.id() != id => continue,
                _ => return Ok(run),
            }
        }

        Err(OrchestratorError::RunNotFound(wanted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::RunState;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_latest_snapshot_wins() {
        let dir = TempDir::new().unwrap();
        let store = JsonlRunStore::new(dir.path().join("history").join("runs.jsonl"));

        let mut first = DeploymentRun::new("run_a", "voting-app");
        store.append(&first).await.unwrap();
        let second = DeploymentRun::new("run_b", "voting-app");
        store.append(&second).await.unwrap();
        first.transition(RunState::Deploying).unwrap();
        first.transition(RunState::Succeeded).unwrap();
        store.append(&first).await.unwrap();

        let latest_a = store.latest(Some("run_a")).await.unwrap();
        assert_eq!(latest_a.state(), RunState::Succeeded);

        let latest_b = store.latest(Some("run_b")).await.unwrap();
        assert_eq!(latest_b.state(), RunState::Planning);

        let latest = store.latest(None).await.unwrap();
        assert_eq!(latest.id(), "run_a");

        let content = std::fs::read_to_string(store.path()).unwrap();
        assert_eq!(content.lines().count(), 3);
    }

    #[tokio::test]
    async fn test_missing_history_and_unknown_run() {
        let dir = TempDir::new().unwrap();
        let store = JsonlRunStore::new(dir.path().join("runs.jsonl"));

        let err = store.latest(None).await.unwrap_err();
        assert_eq!(err.kind(), "RunNotFound");

        store.append(&DeploymentRun::new("run_a", "g")).await.unwrap();
        let err = store.latest(Some("run_zzz")).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::RunNotFound(id) if id == "run_zzz"));
    }

    #[tokio::test]
    async fn test_malformed_lines_are_skipped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("runs.jsonl");
        let store = JsonlRunStore::new(&path);
        store.append(&DeploymentRun::new("run_a", "g")).await.unwrap();

        let mut content = std::fs::read_to_string(&path).unwrap();
        content.push_str("{not json\n");
        std::fs::write(&path, content).unwrap();

        assert_eq!(store.latest(None).await.unwrap().id(), "run_a");
    }
}
