use crate::events::{Event, EventLog};
use crate::types::RunId;
use anyhow::{Context, Result};
use chrono::{Datelike, NaiveDate};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

/// Buffered events are written out once this many are pending
const FLUSH_THRESHOLD: usize = 100;

/// Event log implementation using gzip-compressed JSONL (JSON Lines) files
pub struct JsonlEventLog {
    base_path: PathBuf,
    // events not yet written to disk
    buffer: RwLock<Vec<Event>>,
}

impl JsonlEventLog {
    pub fn new(base_path: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&base_path).context("Failed to create event log directory")?;
        Ok(Self {
            base_path,
            buffer: RwLock::new(Vec::new()),
        })
    }

    /// Get the path to the event log file for a specific run
    /// Format: events/YYYY/MM/DD/<run_id>.jsonl.gz
    fn event_log_path(&self, run_id: &RunId, date: NaiveDate) -> PathBuf {
        self.base_path
            .join("events")
            .join(format!("{:04}", date.year()))
            .join(format!("{:02}", date.month()))
            .join(format!("{:02}", date.day()))
            .join(format!("{}.jsonl.gz", run_id))
    }

    /// Write every buffered event to disk
    async fn flush_buffer(&self) -> Result<()> {
        let pending: Vec<Event> = {
            let mut buffer = self.buffer.write().await;
            if buffer.is_empty() {
                return Ok(());
            }
            buffer.drain(..).collect()
        };

        // Group events by run and day
        let mut grouped: HashMap<(RunId, NaiveDate), Vec<Event>> = HashMap::new();
        for event in pending {
            grouped
                .entry((event.run_id, event.timestamp.date_naive()))
                .or_default()
                .push(event);
        }

        for ((run_id, date), events) in grouped {
            let path = self.event_log_path(&run_id, date);

            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .context("Failed to create event log directory")?;
            }

            // Read existing events if file exists
            let mut all_events = if path.exists() {
                read_jsonl_gz(&path)?
            } else {
                Vec::new()
            };
            all_events.extend(events);

            write_jsonl_gz(&path, &all_events).await?;
        }

        Ok(())
    }

    /// Get all event log files for a run
    fn get_log_files(&self, run_id: &RunId) -> Result<Vec<PathBuf>> {
        let events_dir = self.base_path.join("events");
        if !events_dir.exists() {
            return Ok(Vec::new());
        }

        let filename = format!("{}.jsonl.gz", run_id);
        let mut files = Vec::new();

        // Walk through year/month/day directories
        for year in subdirectories(&events_dir)? {
            for month in subdirectories(&year)? {
                for day in subdirectories(&month)? {
                    let log_file = day.join(&filename);
                    if log_file.exists() {
                        files.push(log_file);
                    }
                }
            }
        }

        Ok(files)
    }
}

fn subdirectories(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read directory {}", dir.display()))?
    {
        let entry = entry.context("Failed to read directory entry")?;
        if entry.path().is_dir() {
            dirs.push(entry.path());
        }
    }
    Ok(dirs)
}

fn read_jsonl_gz(path: &Path) -> Result<Vec<Event>> {
    use flate2::read::GzDecoder;
    use std::io::BufRead;

    let file = std::fs::File::open(path).context("Failed to open event log")?;
    let reader = std::io::BufReader::new(GzDecoder::new(file));

    let mut events = Vec::new();
    for line in reader.lines() {
        let line = line.context("Failed to read line from event log")?;
        let event: Event = serde_json::from_str(&line).context("Failed to parse event")?;
        events.push(event);
    }

    Ok(events)
}

async fn write_jsonl_gz(path: &Path, events: &[Event]) -> Result<()> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());

    for event in events {
        let json = serde_json::to_string(event).context("Failed to serialize event")?;
        encoder
            .write_all(json.as_bytes())
            .context("Failed to write event")?;
        encoder.write_all(b"\n").context("Failed to write newline")?;
    }

    let compressed = encoder.finish().context("Failed to finish compression")?;

    tokio::fs::write(path, compressed)
        .await
        .context("Failed to write event log file")?;

    Ok(())
}

#[async_trait::async_trait]
impl EventLog for JsonlEventLog {
    async fn append(&self, event: Event) -> Result<()> {
        let pending = {
            let mut buffer = self.buffer.write().await;
            buffer.push(event);
            buffer.len()
        };

        if pending > FLUSH_THRESHOLD {
            self.flush_buffer().await?;
        }

        Ok(())
    }

    async fn get_run_events(&self, run_id: RunId) -> Result<Vec<Event>> {
        // Flush any buffered events first
        self.flush_buffer().await?;

        let mut all_events = Vec::new();
        for file in self.get_log_files(&run_id)? {
            all_events.extend(read_jsonl_gz(&file)?);
        }

        all_events.sort_by_key(|e| e.timestamp);
        Ok(all_events)
    }

    async fn flush(&self) -> Result<()> {
        self.flush_buffer().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventType;
    use crate::types::WorkflowId;
    use tempfile::TempDir;

    fn started(run_id: RunId) -> Event {
        Event::new(
            run_id,
            EventType::WorkflowStarted {
                workflow_id: WorkflowId::from(1),
                vertices: 4,
            },
        )
    }

    #[tokio::test]
    async fn test_jsonl_event_log() {
        let temp_dir = TempDir::new().unwrap();
        let log = JsonlEventLog::new(temp_dir.path().to_path_buf()).unwrap();

        let run_id = RunId::new();
        let event = started(run_id);

        log.append(event.clone()).await.unwrap();
        log.flush().await.unwrap();

        let events = log.get_run_events(run_id).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, event.id);

        let path = log.event_log_path(&run_id, event.timestamp.date_naive());
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_runs_are_kept_apart() {
        let temp_dir = TempDir::new().unwrap();
        let log = JsonlEventLog::new(temp_dir.path().to_path_buf()).unwrap();

        let first = RunId::new();
        let second = RunId::new();
        log.append(started(first)).await.unwrap();
        log.append(started(second)).await.unwrap();
        log.append(started(first)).await.unwrap();

        assert_eq!(log.get_run_events(first).await.unwrap().len(), 2);
        assert_eq!(log.get_run_events(second).await.unwrap().len(), 1);

        // appending after a flush extends the existing file
        log.append(started(second)).await.unwrap();
        assert_eq!(log.get_run_events(second).await.unwrap().len(), 2);
    }
}
