// progress.rs - Run event log
// Purpose: Append structured run events to <case>/progress.jsonl and keep a
//          consolidated current_status.json beside it. Best effort: a failed
//          event write never interrupts a run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

pub const PROGRESS_FILE: &str = "progress.jsonl";
pub const STATUS_FILE: &str = "current_status.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub timestamp: DateTime<Utc>,
    pub run_id: String,
    pub case: String,
    pub event_type: EventType,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EventType {
    RunStarted { flow: String },
    StageStarted { stage: String, candidates: usize },
    StageCompleted { stage: String, hits: usize, failures: usize },
    DataFound { data_type: String, count: usize },
    InfrastructureWarning { candidate: String, error: String },
    RunCompleted,
    RunFailed { error: String },
}

#[derive(Clone)]
pub struct ProgressTracker {
    run_id: String,
    case: String,
    output_dir: PathBuf,
    events: Arc<Mutex<Vec<ProgressEvent>>>,
}

impl ProgressTracker {
    pub fn new(run_id: impl Into<String>, case: impl Into<String>, output_dir: impl Into<PathBuf>) -> Self {
        let output_dir = output_dir.into();
        fs::create_dir_all(&output_dir).ok();
        Self {
            run_id: run_id.into(),
            case: case.into(),
            output_dir,
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn add_event(&self, event_type: EventType, message: String, details: Option<serde_json::Value>) {
        let event = ProgressEvent {
            timestamp: Utc::now(),
            run_id: self.run_id.clone(),
            case: self.case.clone(),
            event_type,
            message,
            details,
        };

        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
        self.append(&event);
    }

    fn append(&self, event: &ProgressEvent) {
        let path = self.output_dir.join(PROGRESS_FILE);
        if let Ok(json) = serde_json::to_string(event) {
            if let Ok(mut file) = fs::OpenOptions::new().create(true).append(true).open(&path) {
                writeln!(file, "{}", json).ok();
            }
        }
        self.save_current_status();
    }

    fn save_current_status(&self) {
        let Ok(events) = self.events.lock() else {
            return;
        };
        let Some(last) = events.last() else {
            return;
        };

        let status = serde_json::json!({
            "run_id": self.run_id,
            "case": self.case,
            "last_update": last.timestamp,
            "current_message": last.message,
            "event_type": last.event_type,
            "total_events": events.len(),
        });
        if let Ok(json) = serde_json::to_string_pretty(&status) {
            fs::write(self.output_dir.join(STATUS_FILE), json).ok();
        }
    }

    pub fn run_started(&self, flow: &str) {
        self.add_event(
            EventType::RunStarted { flow: flow.to_string() },
            format!("Starting {} run for case {}", flow, self.case),
            None,
        );
    }

    pub fn stage_started(&self, stage: &str, candidates: usize) {
        self.add_event(
            EventType::StageStarted {
                stage: stage.to_string(),
                candidates,
            },
            format!("{}: probing {} candidates", stage, candidates),
            None,
        );
    }

    pub fn stage_completed(&self, stage: &str, hits: usize, failures: usize) {
        self.add_event(
            EventType::StageCompleted {
                stage: stage.to_string(),
                hits,
                failures,
            },
            format!("{} done: {} hits, {} failures", stage, hits, failures),
            None,
        );
    }

    pub fn data_found(&self, data_type: &str, count: usize) {
        self.add_event(
            EventType::DataFound {
                data_type: data_type.to_string(),
                count,
            },
            format!("Found {} {}", count, data_type),
            Some(serde_json::json!({ "data_type": data_type, "count": count })),
        );
    }

    pub fn infrastructure_warning(&self, candidate: &str, error: &str) {
        self.add_event(
            EventType::InfrastructureWarning {
                candidate: candidate.to_string(),
                error: error.to_string(),
            },
            format!("Resolver infrastructure failure on {}: {}", candidate, error),
            None,
        );
    }

    pub fn run_completed(&self) {
        self.add_event(EventType::RunCompleted, format!("Run for case {} completed", self.case), None);
    }

    pub fn run_failed(&self, error: &str) {
        self.add_event(
            EventType::RunFailed { error: error.to_string() },
            format!("Run failed: {}", error),
            None,
        );
    }

    /// Parse a progress log, skipping lines that are not events
    pub fn read_events_from_file(path: &Path) -> Vec<ProgressEvent> {
        fs::read_to_string(path)
            .map(|content| {
                content
                    .lines()
                    .filter_map(|line| serde_json::from_str::<ProgressEvent>(line).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The run that wrote the last event of a case log, if it never reached
    /// RunCompleted or RunFailed (killed mid-run)
    pub fn interrupted_run(case_dir: &Path) -> Option<ProgressEvent> {
        let last = Self::read_events_from_file(&case_dir.join(PROGRESS_FILE)).pop()?;
        match last.event_type {
            EventType::RunCompleted | EventType::RunFailed { .. } => None,
            _ => Some(last),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_events_appended_and_readable() {
        let tmp = tempdir().unwrap();
        let tracker = ProgressTracker::new("run-1", "contoso", tmp.path());
        tracker.run_started("subdomains");
        tracker.stage_started("dns", 7);
        tracker.infrastructure_warning("contoso.blob.core.windows.net", "refused");
        tracker.stage_completed("dns", 2, 5);
        tracker.run_completed();

        let events = ProgressTracker::read_events_from_file(&tmp.path().join(PROGRESS_FILE));
        assert_eq!(events.len(), 5);
        assert_eq!(
            events[1].event_type,
            EventType::StageStarted {
                stage: "dns".into(),
                candidates: 7
            }
        );
        assert!(matches!(events[4].event_type, EventType::RunCompleted));

        let status: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(tmp.path().join(STATUS_FILE)).unwrap()).unwrap();
        assert_eq!(status["total_events"], 5);
        assert_eq!(status["event_type"]["type"], "RunCompleted");
    }

    #[test]
    fn test_read_skips_garbage_lines() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join(PROGRESS_FILE);
        fs::write(&path, "not json\n").unwrap();
        ProgressTracker::new("r", "c", tmp.path()).run_failed("boom");
        let events = ProgressTracker::read_events_from_file(&path);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::RunFailed { error: "boom".into() });
    }

    #[test]
    fn test_interrupted_run_detected() {
        let tmp = tempdir().unwrap();
        assert!(ProgressTracker::interrupted_run(tmp.path()).is_none());

        let killed = ProgressTracker::new("run-1", "c", tmp.path());
        killed.run_started("blobs");
        killed.stage_started("blobs", 3);
        let last = ProgressTracker::interrupted_run(tmp.path()).unwrap();
        assert_eq!(last.run_id, "run-1");
        assert_eq!(last.event_type, EventType::StageStarted { stage: "blobs".into(), candidates: 3 });

        let rerun = ProgressTracker::new("run-2", "c", tmp.path());
        rerun.run_started("blobs");
        rerun.run_completed();
        assert!(ProgressTracker::interrupted_run(tmp.path()).is_none());
    }
}
