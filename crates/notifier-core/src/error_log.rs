use crate::error_channel::ErrorEvent;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Receiver;
use std::thread::{self, JoinHandle};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::warn;
use uuid::Uuid;

const MAX_BYTES: u64 = 5 * 1024 * 1024;

/// One persisted error, as written to the JSONL log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorLogEntry {
    pub id: String,
    pub ts: String,
    pub session_id: String,
    pub path: String,
    pub message: String,
}

/// Appends ErrorChannel events to daily JSONL files, rolling over by size.
#[derive(Clone)]
pub struct ErrorLog {
    session_id: String,
    base_dir: PathBuf,
    max_bytes: u64,
}

impl ErrorLog {
    pub fn new(base_dir: PathBuf) -> anyhow::Result<Self> {
        Self::new_with_limit(base_dir, MAX_BYTES)
    }

    pub fn new_with_limit(base_dir: PathBuf, max_bytes: u64) -> anyhow::Result<Self> {
        fs::create_dir_all(&base_dir).context("create error log dir")?;
        Ok(Self {
            session_id: Uuid::new_v4().to_string(),
            base_dir,
            max_bytes,
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn record(&self, event: &ErrorEvent) -> anyhow::Result<String> {
        let ts = OffsetDateTime::from(event.at)
            .format(&Rfc3339)
            .context("format timestamp")?;
        let entry = ErrorLogEntry {
            id: Uuid::new_v4().to_string(),
            ts,
            session_id: self.session_id.clone(),
            path: event.path.display().to_string(),
            message: event.message.clone(),
        };
        let date = OffsetDateTime::now_utc()
            .format(&time::format_description::parse("[year][month][day]")?)
            .context("format date")?;
        let path = next_log_path(&self.base_dir, &date, self.max_bytes);
        let line = serde_json::to_string(&entry).context("serialize error entry")?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("open error log {}", path.display()))?;
        writeln!(file, "{line}").context("write error entry")?;
        Ok(entry.id)
    }

    /// Drains `events` into the log on a background thread until every
    /// sender is gone.
    pub fn spawn_writer(self, events: Receiver<ErrorEvent>) -> JoinHandle<()> {
        thread::spawn(move || {
            for event in events {
                if let Err(err) = self.record(&event) {
                    warn!(error = %err, "could not persist scm error");
                }
            }
        })
    }

    /// Most recent entries across all log files, oldest first.
    pub fn recent(&self, limit: usize) -> anyhow::Result<Vec<ErrorLogEntry>> {
        let mut files: Vec<PathBuf> = fs::read_dir(&self.base_dir)
            .context("read error log dir")?
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "jsonl"))
            .collect();
        files.sort_by_key(|path| log_sort_key(path));

        let mut entries = Vec::new();
        for path in files {
            let data = fs::read_to_string(&path)
                .with_context(|| format!("read error log {}", path.display()))?;
            entries.extend(
                data.lines()
                    .filter_map(|line| serde_json::from_str::<ErrorLogEntry>(line).ok()),
            );
        }
        let skip = entries.len().saturating_sub(limit);
        Ok(entries.split_off(skip))
    }
}

fn next_log_path(base_dir: &Path, date: &str, max_bytes: u64) -> PathBuf {
    let mut suffix = 0;
    loop {
        let name = if suffix == 0 {
            format!("errors-{date}.jsonl")
        } else {
            format!("errors-{date}-{suffix}.jsonl")
        };
        let path = base_dir.join(name);
        if let Ok(metadata) = fs::metadata(&path)
            && metadata.len() >= max_bytes
        {
            suffix += 1;
            continue;
        }
        return path;
    }
}

/// Orders `errors-DATE.jsonl` before `errors-DATE-1.jsonl`, `-2`, ... `-10`.
fn log_sort_key(path: &Path) -> (String, u32) {
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_default();
    let mut parts = stem.splitn(3, '-');
    let _prefix = parts.next();
    let date = parts.next().unwrap_or_default().to_string();
    let suffix = parts.next().and_then(|value| value.parse().ok()).unwrap_or(0);
    (date, suffix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_channel::ErrorChannel;
    use std::time::SystemTime;
    use tempfile::TempDir;

    fn event(message: &str) -> ErrorEvent {
        ErrorEvent {
            path: PathBuf::from("/work/trunk"),
            message: message.to_string(),
            at: SystemTime::now(),
        }
    }

    #[test]
    fn records_are_jsonl() {
        let tmp = TempDir::new().unwrap();
        let log = ErrorLog::new_with_limit(tmp.path().to_path_buf(), 1024).unwrap();
        log.record(&event("svn: E170013: Unable to connect")).unwrap();

        let entries: Vec<_> = fs::read_dir(tmp.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
        let contents = fs::read_to_string(entries[0].as_ref().unwrap().path()).unwrap();
        assert!(contents.contains("\"path\":\"/work/trunk\""));
        assert!(contents.ends_with('\n'));
    }

    #[test]
    fn rolls_over_when_full() {
        let tmp = TempDir::new().unwrap();
        let log = ErrorLog::new_with_limit(tmp.path().to_path_buf(), 1).unwrap();
        log.record(&event("first")).unwrap();
        log.record(&event("second")).unwrap();
        log.record(&event("third")).unwrap();

        let entries: Vec<_> = fs::read_dir(tmp.path()).unwrap().collect();
        assert_eq!(entries.len(), 3);
        let recent = log.recent(2).unwrap();
        let messages: Vec<_> = recent.iter().map(|entry| entry.message.as_str()).collect();
        assert_eq!(messages, vec!["second", "third"]);
    }

    #[test]
    fn writer_persists_channel_events() {
        let tmp = TempDir::new().unwrap();
        let log = ErrorLog::new(tmp.path().to_path_buf()).unwrap();
        let channel = ErrorChannel::new();
        let writer = log.clone().spawn_writer(channel.subscribe());

        channel.publish(std::path::Path::new("/work/trunk"), "Process timed out");
        drop(channel);
        writer.join().unwrap();

        let recent = log.recent(10).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].message, "Process timed out");
    }
}
