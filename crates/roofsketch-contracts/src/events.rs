use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context};
use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

/// Every line the session log can contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    SessionStarted,
    UploadSelected,
    UploadValidated,
    UploadRejected,
    CompletionDiscarded,
    CredentialRequired,
    CredentialSaved,
    SketchStarted,
    SketchSucceeded,
    SketchFailed,
    DownloadWritten,
}

impl EventKind {
    pub const ALL: [EventKind; 11] = [
        EventKind::SessionStarted,
        EventKind::UploadSelected,
        EventKind::UploadValidated,
        EventKind::UploadRejected,
        EventKind::CompletionDiscarded,
        EventKind::CredentialRequired,
        EventKind::CredentialSaved,
        EventKind::SketchStarted,
        EventKind::SketchSucceeded,
        EventKind::SketchFailed,
        EventKind::DownloadWritten,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::SessionStarted => "session_started",
            Self::UploadSelected => "upload_selected",
            Self::UploadValidated => "upload_validated",
            Self::UploadRejected => "upload_rejected",
            Self::CompletionDiscarded => "completion_discarded",
            Self::CredentialRequired => "credential_required",
            Self::CredentialSaved => "credential_saved",
            Self::SketchStarted => "sketch_started",
            Self::SketchSucceeded => "sketch_succeeded",
            Self::SketchFailed => "sketch_failed",
            Self::DownloadWritten => "download_written",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const RESERVED_KEYS: [&str; 3] = ["type", "session_id", "ts"];

/// Append-only JSONL log for one roofsketch session.
///
/// Each line carries `type`, `session_id` and `ts` (UTC, millisecond
/// precision). Payload objects are merged after those and may not replace
/// them; any other payload value lands under `detail`.
#[derive(Debug, Clone)]
pub struct EventWriter {
    inner: Arc<EventLog>,
}

#[derive(Debug)]
struct EventLog {
    path: PathBuf,
    session_id: String,
    lock: Mutex<()>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(EventLog {
                path: path.into(),
                session_id: session_id.into(),
                lock: Mutex::new(()),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    pub fn emit(&self, kind: EventKind, payload: Value) -> anyhow::Result<Value> {
        let event = self.build(kind, payload);
        let line = serde_json::to_string(&event)?;
        self.append(&line)
            .with_context(|| format!("{kind} event not written to {}", self.path().display()))?;
        Ok(event)
    }

    /// Like [`EventWriter::emit`], for callers that must carry on when the
    /// log is unwritable. Returns whether the line landed.
    pub fn record(&self, kind: EventKind, payload: Value) -> bool {
        self.emit(kind, payload).is_ok()
    }

    fn build(&self, kind: EventKind, payload: Value) -> Value {
        let mut event = Map::new();
        event.insert("type".to_string(), Value::from(kind.as_str()));
        event.insert(
            "session_id".to_string(),
            Value::from(self.inner.session_id.as_str()),
        );
        event.insert(
            "ts".to_string(),
            Value::from(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
        match payload {
            Value::Object(fields) => {
                for (key, value) in fields {
                    if !RESERVED_KEYS.contains(&key.as_str()) {
                        event.insert(key, value);
                    }
                }
            }
            Value::Null => {}
            other => {
                event.insert("detail".to_string(), other);
            }
        }
        Value::Object(event)
    }

    fn append(&self, line: &str) -> anyhow::Result<()> {
        if let Some(parent) = self.path().parent() {
            fs::create_dir_all(parent)?;
        }
        let _guard = self
            .inner
            .lock
            .lock()
            .map_err(|_| anyhow!("event log lock poisoned"))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path())?;
        writeln!(file, "{line}")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::fs;

    use chrono::DateTime;
    use serde_json::{json, Value};

    use super::{EventKind, EventWriter};

    fn lines(path: &std::path::Path) -> anyhow::Result<Vec<Value>> {
        let content = fs::read_to_string(path)?;
        content
            .lines()
            .map(|line| serde_json::from_str(line).map_err(anyhow::Error::from))
            .collect()
    }

    #[test]
    fn sketch_event_carries_session_fields_and_payload() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let writer = EventWriter::new(&path, "7f1c");

        let emitted = writer.emit(
            EventKind::SketchStarted,
            json!({"token": 3, "material": "Clay Tile"}),
        )?;

        let written = lines(&path)?;
        assert_eq!(written, vec![emitted.clone()]);
        assert_eq!(emitted["type"], "sketch_started");
        assert_eq!(emitted["session_id"], "7f1c");
        assert_eq!(emitted["token"], 3);
        assert_eq!(emitted["material"], "Clay Tile");

        let ts = emitted["ts"].as_str().unwrap_or_default();
        assert!(ts.ends_with('Z'), "{ts}");
        DateTime::parse_from_rfc3339(ts)?;
        Ok(())
    }

    #[test]
    fn payload_cannot_replace_session_fields() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let writer = EventWriter::new(temp.path().join("events.jsonl"), "7f1c");

        let emitted = writer.emit(
            EventKind::SketchFailed,
            json!({"type": "sketch_succeeded", "session_id": "other", "kind": "failed"}),
        )?;
        assert_eq!(emitted["type"], "sketch_failed");
        assert_eq!(emitted["session_id"], "7f1c");
        assert_eq!(emitted["kind"], "failed");

        let emitted = writer.emit(EventKind::DownloadWritten, json!("out/roof-sketch-latest.png"))?;
        assert_eq!(emitted["detail"], "out/roof-sketch-latest.png");
        Ok(())
    }

    #[test]
    fn appends_in_order_under_a_new_directory() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("out").join("events.jsonl");
        let writer = EventWriter::new(&path, "7f1c");

        writer.emit(EventKind::UploadSelected, Value::Null)?;
        writer.clone().emit(EventKind::UploadRejected, Value::Null)?;

        let types = lines(&path)?
            .iter()
            .map(|event| event["type"].as_str().unwrap_or_default().to_string())
            .collect::<Vec<_>>();
        assert_eq!(types, vec!["upload_selected", "upload_rejected"]);
        Ok(())
    }

    #[test]
    fn unwritable_log_is_reported_but_record_carries_on() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        fs::create_dir(&path)?;
        let writer = EventWriter::new(&path, "7f1c");

        let err = writer
            .emit(EventKind::SessionStarted, Value::Null)
            .err()
            .map(|err| err.to_string())
            .unwrap_or_default();
        assert!(err.contains("session_started"), "{err}");
        assert!(err.contains("events.jsonl"), "{err}");
        assert!(!writer.record(EventKind::SessionStarted, Value::Null));
        Ok(())
    }

    #[test]
    fn kind_names_are_distinct() {
        let names = EventKind::ALL
            .iter()
            .map(|kind| kind.to_string())
            .collect::<HashSet<_>>();
        assert_eq!(names.len(), EventKind::ALL.len());
    }
}
