// summary.rs - Run Summary
// Purpose: Counters for one run, printed at the end and stored as
//          <case>/run-metrics.json (rewritten every run).

use crate::case::{Case, METRICS_FILE};
use crate::errors::PersistenceError;
use chrono::{DateTime, Utc};
use colored::*;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub run_id: String,
    pub flow: String,
    pub case: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_seconds: f64,
    pub candidates: usize,
    pub probed: usize,
    pub failures: usize,
    pub infrastructure_warnings: usize,
    pub hits: usize,
    /// Output files that could not be written
    pub write_failures: usize,
}

impl RunSummary {
    pub fn new(flow: &str, case: &str) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            flow: flow.to_string(),
            case: case.to_string(),
            start_time: Utc::now(),
            end_time: None,
            duration_seconds: 0.0,
            candidates: 0,
            probed: 0,
            failures: 0,
            infrastructure_warnings: 0,
            hits: 0,
            write_failures: 0,
        }
    }

    /// Fold one probe batch into the counters
    pub fn add_batch(&mut self, candidates: usize, probed: usize, failures: usize, infrastructure: usize) {
        self.candidates += candidates;
        self.probed += probed;
        self.failures += failures;
        self.infrastructure_warnings += infrastructure;
    }

    pub fn finalize(&mut self) {
        let end = Utc::now();
        self.duration_seconds = (end - self.start_time).num_milliseconds() as f64 / 1000.0;
        self.end_time = Some(end);
    }

    pub fn save(&self, case: &Case) -> Result<PathBuf, PersistenceError> {
        let path = case.path(METRICS_FILE);
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| PersistenceError::new(&path, std::io::Error::other(e)))?;
        case.write_file(METRICS_FILE, json.as_bytes())
    }

    pub fn summary(&self) -> String {
        format!(
            "Run ID: {}\nFlow: {}\nCase: {}\nStarted: {}\nFinished: {}\nDuration: {:.2}s\n\
             - Candidates: {}\n\
             - Probed: {}\n\
             - Failures: {}\n\
             - Infrastructure warnings: {}\n\
             - Hits: {}\n",
            self.run_id,
            self.flow,
            self.case,
            self.start_time.to_rfc3339(),
            self.end_time.map(|t| t.to_rfc3339()).unwrap_or_else(|| "-".to_string()),
            self.duration_seconds,
            self.candidates,
            self.probed,
            self.failures,
            self.infrastructure_warnings,
            self.hits
        )
    }

    pub fn print(&self) {
        println!();
        println!("{}", "═══════════════════════════════════════════════════════════════".cyan());
        println!("{}", format!("  {} summary", self.flow.to_uppercase()).cyan().bold());
        println!("{}", "═══════════════════════════════════════════════════════════════".cyan());
        for line in self.summary().lines() {
            println!("  {}", line);
        }
        if self.hits == 0 {
            println!("{}", "[-] No results found.".dimmed());
        }
        if self.infrastructure_warnings > 0 {
            println!(
                "{}",
                format!(
                    "[!] {} probes hit resolver infrastructure failures; results may be unreliable",
                    self.infrastructure_warnings
                )
                .yellow()
                .bold()
            );
        }
        if self.write_failures > 0 {
            println!(
                "{}",
                format!("[!] {} output files could not be written", self.write_failures).red().bold()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_counters_and_save() {
        let tmp = tempdir().unwrap();
        let case = Case::open(tmp.path(), "metrics").unwrap();

        let mut summary = RunSummary::new("subdomains", case.name());
        summary.add_batch(7, 7, 5, 1);
        summary.add_batch(3, 3, 0, 0);
        summary.hits = 5;
        summary.finalize();
        assert!(summary.end_time.is_some());
        assert!(summary.duration_seconds >= 0.0);

        summary.save(&case).unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(case.path(METRICS_FILE)).unwrap()).unwrap();
        assert_eq!(json["candidates"], 10);
        assert_eq!(json["failures"], 5);
        assert_eq!(json["infrastructureWarnings"], 1);
        assert_eq!(json["flow"], "subdomains");
    }

    #[test]
    fn test_run_ids_unique() {
        assert_ne!(RunSummary::new("a", "c").run_id, RunSummary::new("a", "c").run_id);
    }
}
