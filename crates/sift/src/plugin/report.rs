use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::config::PluginKind;
use crate::job::JobId;

/// Outcome of one plugin run against one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Pending,
    Running,
    Success,
    Failed,
    Killed,
}

impl ReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Pending => "pending",
            ReportStatus::Running => "running",
            ReportStatus::Success => "success",
            ReportStatus::Failed => "failed",
            ReportStatus::Killed => "killed",
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            ReportStatus::Success | ReportStatus::Failed | ReportStatus::Killed
        )
    }
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ReportStatus::Pending),
            "running" => Ok(ReportStatus::Running),
            "success" => Ok(ReportStatus::Success),
            "failed" => Ok(ReportStatus::Failed),
            "killed" => Ok(ReportStatus::Killed),
            other => Err(format!("unknown report status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PluginReport {
    pub job_id: JobId,
    pub config_name: String,
    pub kind: PluginKind,
    pub status: ReportStatus,
    pub report: Value,
    pub errors: Vec<String>,
    pub task_id: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

/// Applies a config's `max_size_report` to a plugin's output.
///
/// Oversized payloads are replaced by a marker object carrying the original
/// size and a prefix of the serialized output. The serialized marker stays
/// within `max_size`, unless the cap is smaller than the marker with no
/// content at all.
pub fn cap_report(report: Value, max_size: Option<usize>) -> Value {
    let Some(max_size) = max_size else {
        return report;
    };

    let serialized = report.to_string();
    if serialized.len() <= max_size {
        return report;
    }

    let original_size = serialized.len();
    let mut cut = max_size;
    loop {
        while !serialized.is_char_boundary(cut) {
            cut -= 1;
        }
        let capped = serde_json::json!({
            "truncated": true,
            "original_size": original_size,
            "content": &serialized[..cut],
        });
        // Escaping can grow the prefix, so shrink by the overshoot and retry.
        let size = capped.to_string().len();
        if size <= max_size || cut == 0 {
            return capped;
        }
        cut = cut.saturating_sub(size - max_size);
    }
}
