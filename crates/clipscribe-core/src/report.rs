use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::error::PipelineError;

/// Outcome for one sampled frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameResult {
    /// Position in the sampled sequence (0-based).
    pub frame: usize,
    /// Estimated time of the frame in the clip.
    pub time_sec: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<String>,
    pub cost_usd: f64,
    pub input_tokens: u32,
    pub output_tokens: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Everything learned about one clip in a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipReport {
    pub clip: String,
    pub worker_id: Value,
    pub factory_id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_sec: Option<f64>,
    /// Sampling mode the clip was analyzed with.
    pub analysis_type: String,
    pub total_frames: usize,
    pub total_cost_usd: f64,
    pub model: String,
    pub results: Vec<FrameResult>,
    /// Set when the clip could not be sampled at all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ClipReport {
    pub fn failed_frames(&self) -> usize {
        self.results.iter().filter(|r| r.error.is_some()).count()
    }
}

/// One line of the append-only analysis log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisLine {
    pub worker_id: Value,
    pub analysis: String,
}

fn report_error(path: &Path) -> impl FnOnce(std::io::Error) -> PipelineError + '_ {
    move |source| PipelineError::Report {
        path: path.display().to_string(),
        source,
    }
}

/// Write one pretty-printed JSON document for the whole run, replacing any
/// previous file.
pub fn write_document(path: &Path, reports: &[ClipReport]) -> Result<(), PipelineError> {
    info!(?path, clip_count = reports.len(), "writing run document");

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(report_error(parent))?;
    }

    let json = serde_json::to_string_pretty(reports)?;
    fs::write(path, json).map_err(report_error(path))?;

    info!(?path, "run document written");
    Ok(())
}

/// Appends one JSON object per line.
pub struct JsonLinesSink {
    path: PathBuf,
}

impl JsonLinesSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn append(&self, line: &AnalysisLine) -> Result<(), PipelineError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(report_error(parent))?;
        }

        let mut json = serde_json::to_string(line)?;
        json.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(report_error(&self.path))?;
        file.write_all(json.as_bytes())
            .map_err(report_error(&self.path))?;
        Ok(())
    }

    /// Append a line for every described frame of a report.
    pub fn append_report(&self, report: &ClipReport) -> Result<usize, PipelineError> {
        let mut written = 0;
        for analysis in report.results.iter().filter_map(|r| r.analysis.as_ref()) {
            self.append(&AnalysisLine {
                worker_id: report.worker_id.clone(),
                analysis: analysis.clone(),
            })?;
            written += 1;
        }
        Ok(written)
    }
}
