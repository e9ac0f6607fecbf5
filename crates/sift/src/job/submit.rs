//! Job creation, with optional reuse of a recent analysis of the same content.

use chrono::{DateTime, Duration, Utc};

use super::{calculate_md5, default_scan_check_time, Artifact, Job, JobId, JobStatus, ScanMode};
use crate::db::{job_repo, Database};
use crate::error::TaskError;
use crate::plugin::validate_plugin_name;
use crate::storage::BlobStore;

/// The artifact as submitted, before it is persisted.
#[derive(Debug, Clone)]
pub enum NewArtifact {
    File {
        name: String,
        content: Vec<u8>,
        /// Guessed from `name` when absent.
        mimetype: Option<String>,
    },
    Observable {
        name: String,
        classification: String,
    },
}

impl NewArtifact {
    /// Hash source: file bytes, or the observable name's UTF-8 bytes.
    pub fn md5(&self) -> String {
        match self {
            NewArtifact::File { content, .. } => calculate_md5(content),
            NewArtifact::Observable { name, .. } => calculate_md5(name.as_bytes()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewJob {
    pub artifact: NewArtifact,
    /// Plugin config names to run.
    pub plugins: Vec<String>,
    pub scan_mode: ScanMode,
    /// Reuse window; `None` means the default of one day.
    pub scan_check_time: Option<Duration>,
}

impl NewJob {
    pub fn observable(name: &str, classification: &str, plugins: &[&str]) -> Self {
        Self {
            artifact: NewArtifact::Observable {
                name: name.to_string(),
                classification: classification.to_string(),
            },
            plugins: plugins.iter().map(|p| p.to_string()).collect(),
            scan_mode: ScanMode::default(),
            scan_check_time: None,
        }
    }

    pub fn file(name: &str, content: Vec<u8>, plugins: &[&str]) -> Self {
        Self {
            artifact: NewArtifact::File {
                name: name.to_string(),
                content,
                mimetype: None,
            },
            plugins: plugins.iter().map(|p| p.to_string()).collect(),
            scan_mode: ScanMode::default(),
            scan_check_time: None,
        }
    }

    pub fn with_scan_mode(mut self, scan_mode: ScanMode) -> Self {
        self.scan_mode = scan_mode;
        self
    }
}

/// Outcome of a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// A new pending job; the caller should schedule its pipeline.
    Created(JobId),
    /// An earlier job already covers this request.
    Reused(JobId),
}

impl Submission {
    pub fn job_id(&self) -> JobId {
        match self {
            Submission::Created(id) | Submission::Reused(id) => *id,
        }
    }
}

#[derive(Debug, Clone)]
pub struct JobSubmitter {
    db: Database,
    blobs: BlobStore,
}

impl JobSubmitter {
    pub fn new(db: Database, blobs: BlobStore) -> Self {
        Self { db, blobs }
    }

    pub fn submit(&self, new_job: NewJob) -> Result<Submission, TaskError> {
        self.submit_at(new_job, Utc::now())
    }

    pub fn submit_at(&self, new_job: NewJob, now: DateTime<Utc>) -> Result<Submission, TaskError> {
        for name in &new_job.plugins {
            validate_plugin_name(name)?;
        }

        let md5 = new_job.artifact.md5();
        let scan_check_time = new_job.scan_check_time.unwrap_or_else(default_scan_check_time);

        if new_job.scan_mode == ScanMode::CheckPreviousAnalysis {
            if let Some(previous) = self.find_previous(&md5, &new_job.plugins, now - scan_check_time)? {
                log::info!(
                    "Reusing job {} for md5 {} ({} plugins requested)",
                    previous,
                    md5,
                    new_job.plugins.len()
                );
                return Ok(Submission::Reused(previous));
            }
        }

        let artifact = match new_job.artifact {
            NewArtifact::File {
                name,
                content,
                mimetype,
            } => {
                let path = self.blobs.store(&content, &name)?;
                let mimetype = mimetype
                    .or_else(|| mime_guess::from_path(&name).first_raw().map(str::to_string));
                Artifact::File {
                    name,
                    mimetype,
                    path,
                }
            }
            NewArtifact::Observable {
                name,
                classification,
            } => Artifact::Observable {
                name,
                classification,
            },
        };

        let job = Job {
            id: 0,
            status: JobStatus::Pending,
            md5: Some(md5),
            artifact,
            scan_mode: new_job.scan_mode,
            scan_check_time: Some(scan_check_time),
            received_request_time: now,
            finished_analysis_time: None,
            process_time: None,
        };

        match job_repo::insert(&self.db, &job, &new_job.plugins) {
            Ok(id) => {
                log::info!("Created job {} for '{}'", id, job.artifact.name());
                Ok(Submission::Created(id))
            }
            Err(e) => {
                if let Artifact::File { path, .. } = &job.artifact {
                    if let Err(cleanup) = self.blobs.remove(path) {
                        log::warn!("Failed to remove orphaned blob {}: {}", path.display(), cleanup);
                    }
                }
                Err(e.into())
            }
        }
    }

    /// Most recent reusable job whose plan covers every requested plugin.
    fn find_previous(
        &self,
        md5: &str,
        plugins: &[String],
        received_after: DateTime<Utc>,
    ) -> Result<Option<JobId>, TaskError> {
        for candidate in job_repo::find_reuse_candidates(&self.db, md5, received_after)? {
            let plan = job_repo::plan(&self.db, candidate.id)?;
            if plugins.iter().all(|p| plan.contains(p)) {
                return Ok(Some(candidate.id));
            }
        }
        Ok(None)
    }
}
