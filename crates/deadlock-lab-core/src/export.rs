//! Export of scenario summaries
//!
//! Every worker record of every summary becomes one flat row, written as a
//! pretty-printed JSON array or as CSV with a header of the sorted column
//! names.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::info;

use crate::domain::metrics::ScenarioSummary;
use crate::error::{Error, Result};

/// Output format for exported metrics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Json,
    Csv,
}

impl ExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Csv => "csv",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ExportFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            other => Err(Error::UnknownFormat(other.to_string())),
        }
    }
}

/// What an export call did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportOutcome {
    Written { path: PathBuf, rows: usize },
    /// No worker records; nothing was written
    Skipped,
}

/// One worker record, flattened with its scenario
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportRow {
    pub duration: Option<f64>,
    pub retries: u32,
    pub scenario: String,
    pub status: String,
    pub tag: String,
    pub wait: Option<f64>,
    pub worker: String,
}

/// Column names in sorted order
const COLUMNS: [&str; 7] = ["duration", "retries", "scenario", "status", "tag", "wait", "worker"];

impl ExportRow {
    fn fields(&self) -> [String; 7] {
        let number = |value: Option<f64>| value.map(|v| v.to_string()).unwrap_or_default();
        [
            number(self.duration),
            self.retries.to_string(),
            self.scenario.clone(),
            self.status.clone(),
            self.tag.clone(),
            number(self.wait),
            self.worker.clone(),
        ]
    }
}

/// Flatten summaries into rows, in summary then worker order
pub fn rows(summaries: &[ScenarioSummary]) -> Vec<ExportRow> {
    summaries
        .iter()
        .flat_map(|summary| {
            summary.workers.iter().map(move |worker| ExportRow {
                duration: worker.duration_secs,
                retries: worker.retries,
                scenario: summary.scenario.clone(),
                status: worker.status.to_string(),
                tag: summary.tag.clone(),
                wait: worker.wait_secs,
                worker: worker.name.clone(),
            })
        })
        .collect()
}

/// Write the worker records of `summaries` to `path`
pub fn export_summaries(
    summaries: &[ScenarioSummary],
    path: &Path,
    format: ExportFormat,
) -> Result<ExportOutcome> {
    let rows = rows(summaries);
    if rows.is_empty() {
        info!(path = %path.display(), "No metric records to export");
        return Ok(ExportOutcome::Skipped);
    }

    let contents = match format {
        ExportFormat::Json => serde_json::to_string_pretty(&rows)
            .map_err(|e| Error::ExportFailed(e.to_string()))?,
        ExportFormat::Csv => to_csv(&rows),
    };

    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    fs::write(path, contents)?;

    info!(path = %path.display(), format = %format, rows = rows.len(), "Metrics exported");
    Ok(ExportOutcome::Written {
        path: path.to_path_buf(),
        rows: rows.len(),
    })
}

fn to_csv(rows: &[ExportRow]) -> String {
    let mut out = COLUMNS.join(",");
    out.push('\n');
    for row in rows {
        let line: Vec<String> = row.fields().iter().map(|field| quote(field)).collect();
        out.push_str(&line.join(","));
        out.push('\n');
    }
    out
}

fn quote(field: &str) -> String {
    if field.contains(&[',', '"', '\n', '\r'][..]) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::metrics::{SummaryContext, WorkerReport};
    use crate::domain::scenario::ScenarioOutcome;
    use crate::domain::worker::WorkerStatus;
    use chrono::Utc;
    use std::time::Duration;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn summary(scenario: &str, workers: Vec<WorkerReport>) -> ScenarioSummary {
        let mut summary = ScenarioSummary::from_events(
            SummaryContext {
                run_id: Uuid::new_v4(),
                scenario: scenario.to_string(),
                tag: "retry".to_string(),
                outcome: ScenarioOutcome::AllCompleted,
                started_at: Utc::now(),
                elapsed: Duration::from_secs(2),
                workers: Vec::new(),
            },
            &[],
        );
        summary.workers = workers;
        summary
    }

    fn report(name: &str, status: WorkerStatus, retries: u32) -> WorkerReport {
        WorkerReport {
            worker_id: 0,
            name: name.to_string(),
            status,
            duration_secs: Some(1.5),
            wait_secs: Some(0.25),
            retries,
            events: 6,
        }
    }

    #[test]
    fn test_parse_format() {
        assert_eq!("JSON".parse::<ExportFormat>().unwrap(), ExportFormat::Json);
        assert_eq!("csv".parse::<ExportFormat>().unwrap(), ExportFormat::Csv);
        assert_eq!("xml".parse::<ExportFormat>().unwrap_err().code(), "E300");
    }

    #[test]
    fn test_empty_input_is_skipped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("metrics.json");

        let outcome = export_summaries(&[summary("empty", vec![])], &path, ExportFormat::Json).unwrap();

        assert_eq!(outcome, ExportOutcome::Skipped);
        assert!(!path.exists());
    }

    #[test]
    fn test_json_export_creates_parent_dirs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out").join("metrics.json");
        let summaries = vec![summary(
            "Scenario 3",
            vec![report("P1", WorkerStatus::Ok, 2), report("P2", WorkerStatus::Ok, 1)],
        )];

        let outcome = export_summaries(&summaries, &path, ExportFormat::Json).unwrap();
        assert_eq!(outcome, ExportOutcome::Written { path: path.clone(), rows: 2 });

        let rows: Vec<ExportRow> = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].worker, "P1");
        assert_eq!(rows[0].retries, 2);
        assert_eq!(rows[1].status, "ok");
    }

    #[test]
    fn test_csv_export_quotes_fields() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("metrics.csv");
        let summaries = vec![summary(
            "Scenario 3: recovery with timeout + backoff, \"jitter\"",
            vec![report("P1", WorkerStatus::Killed, 0)],
        )];

        export_summaries(&summaries, &path, ExportFormat::Csv).unwrap();
        let contents = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();

        assert_eq!(lines[0], "duration,retries,scenario,status,tag,wait,worker");
        assert_eq!(
            lines[1],
            "1.5,0,\"Scenario 3: recovery with timeout + backoff, \"\"jitter\"\"\",killed,retry,0.25,P1"
        );
    }
}
