//! External job scheduling
//!
//! A [`Scheduler`] backend submits a rendered array script and reports the
//! aggregate state of its tasks. [`JobRunner`] sits on top of a backend and
//! knows how to turn a set of chains into one array job for a search stage.

pub mod local;
pub mod runner;
pub mod script;
pub mod slurm;

pub use local::LocalScheduler;
pub use runner::{JobRunner, SearchKind};
pub use script::{BlastCommand, HhsearchCommand, SbatchScript, TaskResources};
pub use slurm::SlurmScheduler;

use crate::config::{PipelineConfig, SchedulerBackend};
use crate::error::Result;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

/// Aggregate task counts of one array job
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobStateCounts {
    pub running: usize,
    pub pending: usize,
    pub completed: usize,
    pub failed: usize,
}

impl JobStateCounts {
    pub fn total(&self) -> usize {
        self.running + self.pending + self.completed + self.failed
    }

    /// Nothing left running or queued
    pub fn is_finished(&self) -> bool {
        self.running == 0 && self.pending == 0
    }

    pub fn succeeded(&self) -> bool {
        self.is_finished() && self.failed == 0
    }
}

impl std::fmt::Display for JobStateCounts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{} completed, {} running, {} pending, {} failed",
            self.completed,
            self.total(),
            self.running,
            self.pending,
            self.failed
        )
    }
}

/// Backend that runs array jobs
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &'static str;

    /// Submit the script already written to `script_path`; returns the job id
    async fn submit(&self, script: &SbatchScript, script_path: &Path) -> Result<String>;

    /// Current task counts of a submitted job
    async fn job_state(&self, job_id: &str) -> Result<JobStateCounts>;
}

/// Build the backend selected in the configuration
pub fn from_config(config: &PipelineConfig) -> Arc<dyn Scheduler> {
    match config.scheduler {
        SchedulerBackend::Slurm => Arc::new(SlurmScheduler::new()),
        SchedulerBackend::Local => Arc::new(LocalScheduler::new()),
    }
}
