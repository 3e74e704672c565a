//! HistoryStore backed by one JSON-lines file per run.

use async_trait::async_trait;
use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use agentrun_core::history::HistoryEvent;
use agentrun_core::store::{HistoryStore, StoreError};
use agentrun_core::types::RunId;

const JOURNAL_EXTENSION: &str = "jsonl";

/// Append-only journals under `base_path`, one `<run_id>.jsonl` per run.
///
/// Every entry is written as a single line and synced before `append`
/// returns. A torn final line left by a crash mid-write is dropped on load
/// and cut off before the next append.
pub struct FileHistoryStore {
    base_path: PathBuf,
}

impl FileHistoryStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn journal_path(&self, run_id: &RunId) -> Result<PathBuf, StoreError> {
        validate_run_id(run_id.as_str())?;
        Ok(self
            .base_path
            .join(format!("{}.{}", run_id, JOURNAL_EXTENSION)))
    }

    async fn write_line(
        &self,
        path: &Path,
        options: &OpenOptions,
        event: &HistoryEvent,
    ) -> Result<(), std::io::Error> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');
        let mut file = options.open(path).await?;
        file.write_all(&line).await?;
        file.sync_data().await
    }
}

/// Make sure the journal at `path` ends on a line boundary.
///
/// An unparseable tail is truncated away; a complete entry that only lacks
/// its newline gets one.
async fn seal_tail(path: &Path) -> Result<(), std::io::Error> {
    let mut file = OpenOptions::new().read(true).write(true).open(path).await?;
    let len = file.metadata().await?.len();
    if len == 0 {
        return Ok(());
    }
    file.seek(SeekFrom::End(-1)).await?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last).await?;
    if last[0] == b'\n' {
        return Ok(());
    }

    file.seek(SeekFrom::Start(0)).await?;
    let mut content = Vec::new();
    file.read_to_end(&mut content).await?;
    let keep = content
        .iter()
        .rposition(|byte| *byte == b'\n')
        .map_or(0, |index| index + 1);
    if serde_json::from_slice::<HistoryEvent>(&content[keep..]).is_ok() {
        file.seek(SeekFrom::End(0)).await?;
        file.write_all(b"\n").await?;
    } else {
        tracing::warn!(
            path = %path.display(),
            dropped_bytes = content.len() - keep,
            "truncating torn trailing journal entry"
        );
        file.set_len(keep as u64).await?;
    }
    file.sync_data().await
}

/// Reject ids that are not safe as a file name.
fn validate_run_id(run_id: &str) -> Result<(), StoreError> {
    if run_id.is_empty() {
        return Err(StoreError::InvalidId("run id cannot be empty".to_string()));
    }
    if run_id.contains('/') || run_id.contains('\\') || run_id.contains("..") {
        return Err(StoreError::InvalidId(format!(
            "run id contains invalid characters: {run_id:?}"
        )));
    }
    if run_id.chars().any(|c| c.is_control()) {
        return Err(StoreError::InvalidId(format!(
            "run id contains control characters: {run_id:?}"
        )));
    }
    Ok(())
}

#[async_trait]
impl HistoryStore for FileHistoryStore {
    async fn create(&self, run_id: &RunId, first: HistoryEvent) -> Result<(), StoreError> {
        let path = self.journal_path(run_id)?;
        tokio::fs::create_dir_all(&self.base_path).await?;
        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        match self.write_line(&path, &options, &first).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                Err(StoreError::AlreadyExists(run_id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn append(&self, run_id: &RunId, event: HistoryEvent) -> Result<(), StoreError> {
        let path = self.journal_path(run_id)?;
        let mut options = OpenOptions::new();
        options.append(true);
        let written = match seal_tail(&path).await {
            Ok(()) => self.write_line(&path, &options, &event).await,
            Err(e) => Err(e),
        };
        match written {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(StoreError::NotFound(run_id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn load(&self, run_id: &RunId) -> Result<Option<Vec<HistoryEvent>>, StoreError> {
        let path = self.journal_path(run_id)?;
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let complete = content.ends_with('\n');
        let lines: Vec<&str> = content.lines().filter(|l| !l.trim().is_empty()).collect();
        let mut events = Vec::with_capacity(lines.len());
        for (index, line) in lines.iter().enumerate() {
            match serde_json::from_str::<HistoryEvent>(line) {
                Ok(event) => events.push(event),
                Err(e) if index + 1 == lines.len() && !complete => {
                    tracing::warn!(
                        run_id = %run_id,
                        error = %e,
                        "dropping torn trailing journal entry"
                    );
                }
                Err(e) => {
                    return Err(StoreError::Serialization(format!(
                        "{} line {}: {}",
                        path.display(),
                        index + 1,
                        e
                    )))
                }
            }
        }
        Ok(Some(events))
    }

    async fn list_runs(&self) -> Result<Vec<RunId>, StoreError> {
        let mut entries = match tokio::fs::read_dir(&self.base_path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(JOURNAL_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                ids.push(RunId::from(stem));
            }
        }
        ids.sort();
        Ok(ids)
    }

    async fn delete(&self, run_id: &RunId) -> Result<bool, StoreError> {
        let path = self.journal_path(run_id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentrun_core::activity::{ActivityError, ActivityTimeouts};
    use agentrun_core::retry::RetryPolicies;
    use agentrun_core::types::{RunConfig, RunIdentity, RunInput, RunOutcome, RunSignal};
    use serde_json::json;

    fn started(run_id: &str) -> HistoryEvent {
        HistoryEvent::run_started(
            RunIdentity::new(run_id, "tenant", "agent", "v1"),
            RunConfig::new().with("model", json!("gpt-4")),
            RunInput::new().with("prompt", json!("hello")),
            RetryPolicies::default(),
            ActivityTimeouts::default(),
        )
    }

    #[tokio::test]
    async fn test_journal_survives_a_new_store_instance() {
        let dir = tempfile::tempdir().unwrap();
        let id = RunId::from("run-1");
        {
            let store = FileHistoryStore::new(dir.path());
            store.create(&id, started("run-1")).await.unwrap();
            store
                .append(&id, HistoryEvent::signal_received(RunSignal::Pause))
                .await
                .unwrap();
            store
                .append(
                    &id,
                    HistoryEvent::activity_failed(0, 1, ActivityError::transient("reset")),
                )
                .await
                .unwrap();
        }

        let reopened = FileHistoryStore::new(dir.path());
        let events = reopened.load(&id).await.unwrap().unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].name(), "run_started");
        assert_eq!(events[1].name(), "signal_received");
        assert_eq!(reopened.list_runs().await.unwrap(), vec![id]);
    }

    #[tokio::test]
    async fn test_create_is_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileHistoryStore::new(dir.path().join("journals"));
        let id = RunId::from("run-1");
        store.create(&id, started("run-1")).await.unwrap();
        assert!(matches!(
            store.create(&id, started("run-1")).await,
            Err(StoreError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_journal() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileHistoryStore::new(dir.path().join("never-created"));
        let id = RunId::from("ghost");
        assert!(store.load(&id).await.unwrap().is_none());
        assert!(store.list_runs().await.unwrap().is_empty());
        assert!(!store.delete(&id).await.unwrap());
        assert!(matches!(
            store
                .append(&id, HistoryEvent::signal_received(RunSignal::Cancel))
                .await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_torn_trailing_line_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileHistoryStore::new(dir.path());
        let id = RunId::from("run-1");
        store.create(&id, started("run-1")).await.unwrap();
        store
            .append(&id, HistoryEvent::run_finished(RunOutcome::cancelled("run-1")))
            .await
            .unwrap();

        let path = dir.path().join("run-1.jsonl");
        let mut content = tokio::fs::read_to_string(&path).await.unwrap();
        content.push_str(r#"{"type":"signal_rec"#);
        tokio::fs::write(&path, content).await.unwrap();

        let events = store.load(&id).await.unwrap().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].name(), "run_finished");
    }

    #[tokio::test]
    async fn test_append_after_torn_line_keeps_journal_readable() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileHistoryStore::new(dir.path());
        let id = RunId::from("run-1");
        store.create(&id, started("run-1")).await.unwrap();

        let path = dir.path().join("run-1.jsonl");
        let mut content = tokio::fs::read_to_string(&path).await.unwrap();
        content.push_str(r#"{"type":"signal_rec"#);
        tokio::fs::write(&path, content).await.unwrap();
        assert_eq!(store.load(&id).await.unwrap().unwrap().len(), 1);

        store
            .append(&id, HistoryEvent::signal_received(RunSignal::Pause))
            .await
            .unwrap();
        let events = store.load(&id).await.unwrap().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].name(), "signal_received");
        assert!(tokio::fs::read_to_string(&path)
            .await
            .unwrap()
            .ends_with('\n'));
    }

    #[tokio::test]
    async fn test_entry_missing_only_its_newline_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileHistoryStore::new(dir.path());
        let id = RunId::from("run-1");
        store.create(&id, started("run-1")).await.unwrap();

        let path = dir.path().join("run-1.jsonl");
        let mut content = tokio::fs::read_to_string(&path).await.unwrap();
        let pause = serde_json::to_string(&HistoryEvent::signal_received(RunSignal::Pause)).unwrap();
        content.push_str(&pause);
        tokio::fs::write(&path, content).await.unwrap();

        store
            .append(&id, HistoryEvent::signal_received(RunSignal::Resume))
            .await
            .unwrap();
        let events = store.load(&id).await.unwrap().unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[1].name(), "signal_received");
        assert_eq!(events[2].name(), "signal_received");
    }

    #[tokio::test]
    async fn test_corrupt_middle_line_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileHistoryStore::new(dir.path());
        let id = RunId::from("run-1");
        store.create(&id, started("run-1")).await.unwrap();
        let path = dir.path().join("run-1.jsonl");
        let mut content = tokio::fs::read_to_string(&path).await.unwrap();
        content.push_str("not json\n");
        tokio::fs::write(&path, content).await.unwrap();

        assert!(matches!(
            store.load(&id).await,
            Err(StoreError::Serialization(_))
        ));
    }

    #[test]
    fn test_unsafe_ids_are_rejected() {
        for bad in ["", "../escape", "a/b", "a\\b", "tab\there"] {
            assert!(
                matches!(validate_run_id(bad), Err(StoreError::InvalidId(_))),
                "{:?}",
                bad
            );
        }
        assert!(validate_run_id("run-2024.01_a").is_ok());
    }
}
