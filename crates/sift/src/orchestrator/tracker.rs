use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use crate::job::JobId;
use crate::plugin::{PluginConfig, PluginKind, RuntimeConfiguration};

/// One plugin selected for a job, with its per-run overrides.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedPlugin {
    pub config: PluginConfig,
    pub runtime_configuration: RuntimeConfiguration,
}

/// Plugins of one kind that run in parallel.
#[derive(Debug, Clone, PartialEq)]
pub struct Stage {
    pub kind: PluginKind,
    pub plugins: Vec<PlannedPlugin>,
}

impl Stage {
    pub fn config_names(&self) -> impl Iterator<Item = &str> {
        self.plugins.iter().map(|p| p.config.name.as_str())
    }
}

/// What a finished report means for its job.
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    /// Other reports of the current stage are still outstanding.
    Pending,
    /// The stage finished and `next` must be dispatched.
    StageDone { completed: PluginKind, next: Stage },
    /// The last stage finished; the job must be finalized.
    JobDone { completed: PluginKind },
    /// The job is not tracked here (never registered, already finished,
    /// or registered by another process).
    Untracked,
}

/// Outcome of [`FanInTracker::register`].
#[derive(Debug, Clone, PartialEq)]
pub enum Registration {
    /// Tracking began; this stage must be dispatched.
    Started(Stage),
    /// Nothing to run.
    Empty,
    /// Another pipeline for the job is in progress.
    AlreadyTracked,
}

#[derive(Debug)]
struct JobProgress {
    current: PluginKind,
    outstanding: HashSet<String>,
    remaining: VecDeque<Stage>,
}

/// Per-job set of expected reports.
///
/// Every check-and-act happens under one lock, so for any job exactly one
/// caller observes each stage boundary and exactly one observes `JobDone`.
#[derive(Debug, Default)]
pub struct FanInTracker {
    jobs: Mutex<HashMap<JobId, JobProgress>>,
}

impl FanInTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts tracking `stages` and hands back the first one to dispatch.
    ///
    /// Empty stages are skipped. The tracked check and the insert happen
    /// under one lock, so of two concurrent callers only one gets `Started`.
    pub fn register(&self, job_id: JobId, stages: Vec<Stage>) -> Registration {
        let mut remaining: VecDeque<Stage> =
            stages.into_iter().filter(|s| !s.plugins.is_empty()).collect();

        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        if jobs.contains_key(&job_id) {
            return Registration::AlreadyTracked;
        }
        let Some(first) = remaining.pop_front() else {
            return Registration::Empty;
        };

        jobs.insert(
            job_id,
            JobProgress {
                current: first.kind,
                outstanding: first.config_names().map(str::to_string).collect(),
                remaining,
            },
        );
        Registration::Started(first)
    }

    /// Records that `config_name` has reported for `job_id`.
    pub fn complete(&self, job_id: JobId, config_name: &str) -> Completion {
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        let Some(progress) = jobs.get_mut(&job_id) else {
            return Completion::Untracked;
        };

        if !progress.outstanding.remove(config_name) {
            log::debug!(
                "Job {}: '{}' is not outstanding in the {} stage",
                job_id,
                config_name,
                progress.current
            );
            return Completion::Pending;
        }
        if !progress.outstanding.is_empty() {
            return Completion::Pending;
        }

        let completed = progress.current;
        match progress.remaining.pop_front() {
            Some(next) => {
                progress.current = next.kind;
                progress.outstanding = next.config_names().map(str::to_string).collect();
                Completion::StageDone { completed, next }
            }
            None => {
                jobs.remove(&job_id);
                Completion::JobDone { completed }
            }
        }
    }

    /// Stops tracking a job, e.g. after the reaper failed it.
    pub fn forget(&self, job_id: JobId) -> bool {
        self.jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&job_id)
            .is_some()
    }

    pub fn is_tracked(&self, job_id: JobId) -> bool {
        self.jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&job_id)
    }

    /// Config names still expected in the current stage.
    pub fn outstanding(&self, job_id: JobId) -> Vec<String> {
        let jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<String> = jobs
            .get(&job_id)
            .map(|p| p.outstanding.iter().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }
}
