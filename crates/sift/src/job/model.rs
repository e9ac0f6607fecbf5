use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};

use super::status::JobStatus;

pub type JobId = i64;

/// Whether a submission may reuse an earlier analysis of the same content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanMode {
    ForceNewAnalysis,
    #[default]
    CheckPreviousAnalysis,
}

impl ScanMode {
    pub fn as_i64(&self) -> i64 {
        match self {
            ScanMode::ForceNewAnalysis => 1,
            ScanMode::CheckPreviousAnalysis => 2,
        }
    }

    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            1 => Some(ScanMode::ForceNewAnalysis),
            2 => Some(ScanMode::CheckPreviousAnalysis),
            _ => None,
        }
    }
}

/// Default reuse window for [`ScanMode::CheckPreviousAnalysis`].
pub fn default_scan_check_time() -> Duration {
    Duration::days(1)
}

/// What a job analyzes: exactly one of a stored file or a textual observable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Artifact {
    File {
        name: String,
        mimetype: Option<String>,
        /// Blob location inside the blob store.
        path: PathBuf,
    },
    Observable {
        name: String,
        classification: String,
    },
}

impl Artifact {
    pub fn name(&self) -> &str {
        match self {
            Artifact::File { name, .. } | Artifact::Observable { name, .. } => name,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub status: JobStatus,
    /// Computed on first persist, never recomputed.
    pub md5: Option<String>,
    pub artifact: Artifact,
    pub scan_mode: ScanMode,
    pub scan_check_time: Option<Duration>,
    pub received_request_time: DateTime<Utc>,
    /// Set once, on the terminal transition.
    pub finished_analysis_time: Option<DateTime<Utc>>,
    /// Seconds between request and finish, set with `finished_analysis_time`.
    pub process_time: Option<f64>,
}

impl Job {
    pub fn is_sample(&self) -> bool {
        matches!(self.artifact, Artifact::File { .. })
    }

    /// Seconds from request to `finished`, rounded to hundredths.
    pub fn calculate_process_time(&self, finished: DateTime<Utc>) -> f64 {
        process_time_between(self.received_request_time, finished)
    }
}

pub(crate) fn process_time_between(received: DateTime<Utc>, finished: DateTime<Utc>) -> f64 {
    let millis = (finished - received).num_milliseconds() as f64;
    (millis / 10.0).round() / 100.0
}

/// Hex md5 digest of `content`.
pub fn calculate_md5(content: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}
