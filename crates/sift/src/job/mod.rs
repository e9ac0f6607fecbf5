//! Jobs: the data model, the status taxonomy, and the state machine that
//! owns the lifecycle field.

pub mod model;
pub mod state_machine;
pub mod status;
pub mod submit;

pub use model::{calculate_md5, default_scan_check_time, Artifact, Job, JobId, ScanMode};
pub use state_machine::JobStateMachine;
pub use status::{FinalStatusPolicy, JobStatus, MixedOutcome};
pub use submit::{JobSubmitter, NewArtifact, NewJob, Submission};
