use crate::errors::CampboardError;
use crate::log_retention::enforce_total_budget;
use serde::Serialize;
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

pub const DEFAULT_DISK_BUDGET_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct JsonlLogger {
    pub path: PathBuf,
    pub max_payload_bytes: usize,
    pub budget_bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEvent<'a> {
    pub ts_unix_secs: u64,
    pub level: &'a str,
    pub event_type: &'a str,
    pub payload: Value,
}

impl JsonlLogger {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            max_payload_bytes: 4096,
            budget_bytes: DEFAULT_DISK_BUDGET_BYTES,
        }
    }

    pub fn append(&self, event: &LogEvent<'_>) -> Result<(), CampboardError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| CampboardError::Io(e.to_string()))?;
        }
        let truncated = truncate_json(event.payload.clone(), self.max_payload_bytes);
        let line = serde_json::to_string(&LogEvent {
            ts_unix_secs: event.ts_unix_secs,
            level: event.level,
            event_type: event.event_type,
            payload: truncated,
        })
        .map_err(|e| CampboardError::Io(e.to_string()))?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| CampboardError::Io(e.to_string()))?;
        file.write_all(line.as_bytes())
            .map_err(|e| CampboardError::Io(e.to_string()))?;
        file.write_all(b"\n")
            .map_err(|e| CampboardError::Io(e.to_string()))?;

        if let Some(parent) = self.path.parent() {
            let _ = enforce_total_budget(parent, self.budget_bytes, &self.path)?;
        }

        Ok(())
    }
}

/// Plain one-line rendering of a card for non-interactive output.
pub fn structured_fallback_line(item: &str, stage: &str, message: &str) -> String {
    format!(
        "item={} stage={stage} message={} ",
        item.replace(' ', "_"),
        message.replace('\n', "\\n")
    )
}

fn truncate_json(value: Value, max_bytes: usize) -> Value {
    let rendered = serde_json::to_string(&value).unwrap_or_default();
    if rendered.len() <= max_bytes {
        return value;
    }
    let mut end = max_bytes.saturating_sub(3);
    while !rendered.is_char_boundary(end) {
        end -= 1;
    }
    Value::String(format!("{}...", &rendered[..end]))
}

#[cfg(test)]
mod tests {
    use super::{structured_fallback_line, JsonlLogger, LogEvent};
    use serde_json::json;

    #[test]
    fn logger_truncates_large_payloads_and_writes_jsonl() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("dashboard.jsonl");
        let mut logger = JsonlLogger::new(&path);
        logger.max_payload_bytes = 20;
        logger.budget_bytes = 1024;

        logger
            .append(&LogEvent {
                ts_unix_secs: 42,
                level: "info",
                event_type: "tick_completed",
                payload: json!({"text": "abcdefghijklmnopqrstuvwxyz"}),
            })
            .expect("append");

        let text = std::fs::read_to_string(&path).expect("read");
        assert!(text.contains("\"event_type\":\"tick_completed\""));
        assert!(text.contains("\"ts_unix_secs\":42"));
        assert!(text.contains("..."));
    }

    #[test]
    fn truncation_respects_multibyte_boundaries() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("dashboard.jsonl");
        let mut logger = JsonlLogger::new(&path);
        logger.max_payload_bytes = 13;
        logger
            .append(&LogEvent {
                ts_unix_secs: 0,
                level: "info",
                event_type: "tick_completed",
                payload: json!({"name": "ééééééééé"}),
            })
            .expect("append");
        assert!(std::fs::read_to_string(&path).expect("read").ends_with("...\"}\n"));
    }

    #[test]
    fn fallback_line_is_deterministic() {
        let line = structured_fallback_line("Camp Chairs", "Nearly Done", "40 of 50\n80.0%");
        assert_eq!(
            line,
            "item=Camp_Chairs stage=Nearly Done message=40 of 50\\n80.0% "
        );
    }
}
