use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

pub type EventPayload = Map<String, Value>;

/// Envelope fields stamped on every event. Payload keys with these names are
/// ignored.
pub const RESERVED_EVENT_FIELDS: [&str; 4] = ["type", "session_id", "request_id", "ts"];

/// Request lifecycle log in JSON Lines form, one object per line.
///
/// The file is opened on first use and stays open for the writer's
/// lifetime. Clones share the handle.
#[derive(Debug, Clone)]
pub struct EventWriter {
    shared: Arc<Shared>,
}

#[derive(Debug)]
struct Shared {
    path: PathBuf,
    session_id: String,
    file: Mutex<Option<File>>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(Shared {
                path: path.into(),
                session_id: session_id.into(),
                file: Mutex::new(None),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    pub fn session_id(&self) -> &str {
        &self.shared.session_id
    }

    /// Appends one event and returns the object that was written.
    pub fn emit(
        &self,
        event_type: &str,
        request_id: &str,
        payload: EventPayload,
    ) -> anyhow::Result<Value> {
        let mut event: EventPayload = payload
            .into_iter()
            .filter(|(key, _)| !RESERVED_EVENT_FIELDS.contains(&key.as_str()))
            .collect();
        event.insert("type".to_string(), Value::from(event_type));
        event.insert(
            "session_id".to_string(),
            Value::from(self.shared.session_id.as_str()),
        );
        event.insert("request_id".to_string(), Value::from(request_id));
        event.insert(
            "ts".to_string(),
            Value::from(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
        );

        let event = Value::Object(event);
        let mut line = serde_json::to_vec(&event)?;
        line.push(b'\n');

        let mut slot = self
            .shared
            .file
            .lock()
            .map_err(|_| anyhow::anyhow!("event log lock poisoned"))?;
        if slot.is_none() {
            *slot = Some(self.open()?);
        }
        if let Some(file) = slot.as_mut() {
            file.write_all(&line)
                .with_context(|| format!("failed to append to {}", self.shared.path.display()))?;
        }
        Ok(event)
    }

    fn open(&self) -> anyhow::Result<File> {
        if let Some(parent) = self.shared.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.shared.path)
            .with_context(|| format!("failed to open {}", self.shared.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use chrono::DateTime;
    use serde_json::json;

    use super::{EventPayload, EventWriter};

    fn read_rows(path: &std::path::Path) -> anyhow::Result<Vec<serde_json::Value>> {
        let raw = fs::read_to_string(path)?;
        raw.lines()
            .map(|line| serde_json::from_str(line).map_err(anyhow::Error::from))
            .collect()
    }

    #[test]
    fn event_carries_envelope_and_payload() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let writer = EventWriter::new(&path, "session-1");

        let mut payload = EventPayload::new();
        payload.insert("stage".to_string(), json!("analysis"));
        let emitted = writer.emit("stage_attempt", "req-9", payload)?;

        let rows = read_rows(&path)?;
        assert_eq!(rows, vec![emitted]);
        assert_eq!(rows[0]["type"], "stage_attempt");
        assert_eq!(rows[0]["session_id"], "session-1");
        assert_eq!(rows[0]["request_id"], "req-9");
        assert_eq!(rows[0]["stage"], "analysis");
        DateTime::parse_from_rfc3339(rows[0]["ts"].as_str().unwrap_or_default())?;
        Ok(())
    }

    #[test]
    fn payload_cannot_rewrite_envelope() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let writer = EventWriter::new(&path, "session-1");

        let mut payload = EventPayload::new();
        payload.insert("type".to_string(), json!("forged"));
        payload.insert("request_id".to_string(), json!("req-other"));
        payload.insert("status".to_string(), json!("succeeded"));
        writer.emit("request_finished", "req-1", payload)?;

        let rows = read_rows(&path)?;
        assert_eq!(rows[0]["type"], "request_finished");
        assert_eq!(rows[0]["request_id"], "req-1");
        assert_eq!(rows[0]["status"], "succeeded");
        Ok(())
    }

    #[test]
    fn clones_append_to_one_file_in_nested_dir() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("nested").join("events.jsonl");
        let writer = EventWriter::new(&path, "session-1");

        writer.emit("request_started", "req-1", EventPayload::new())?;
        writer
            .clone()
            .emit("request_finished", "req-1", EventPayload::new())?;

        let types: Vec<String> = read_rows(&path)?
            .iter()
            .filter_map(|row| row["type"].as_str().map(str::to_string))
            .collect();
        assert_eq!(types, vec!["request_started", "request_finished"]);
        Ok(())
    }
}
