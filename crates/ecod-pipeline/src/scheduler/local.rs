//! Local backend for development runs without a cluster.
//!
//! Array tasks run one after another through `bash`, with the same
//! environment variables SLURM would set. The job is finished by the time
//! `submit` returns.

use super::{JobStateCounts, SbatchScript, Scheduler};
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::process::Command;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct LocalScheduler {
    jobs: Arc<Mutex<HashMap<String, JobStateCounts>>>,
}

impl LocalScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, job_id: &str, counts: JobStateCounts) -> Result<()> {
        let mut jobs = self
            .jobs
            .lock()
            .map_err(|e| PipelineError::scheduler(format!("job table poisoned: {}", e)))?;
        jobs.insert(job_id.to_string(), counts);
        Ok(())
    }
}

#[async_trait]
impl Scheduler for LocalScheduler {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn submit(&self, script: &SbatchScript, script_path: &Path) -> Result<String> {
        let job_id = format!("local-{}", Uuid::new_v4());
        info!(job_id = %job_id, tasks = script.array_size(), "Running array job locally");

        let mut counts = JobStateCounts::default();
        for task in 1..=script.array_size() {
            let status = Command::new("bash")
                .arg(script_path)
                .env("SLURM_ARRAY_TASK_ID", task.to_string())
                .env("SLURM_ARRAY_JOB_ID", &job_id)
                .env("SLURM_CPUS_PER_TASK", script.resources().cpus.to_string())
                .status()
                .await
                .map_err(|e| PipelineError::submission(format!("failed to run bash: {}", e)))?;

            if status.success() {
                counts.completed += 1;
            } else {
                warn!(job_id = %job_id, task, code = ?status.code(), "Local task failed");
                counts.failed += 1;
            }
        }

        debug!(job_id = %job_id, %counts, "Local job finished");
        self.record(&job_id, counts)?;
        Ok(job_id)
    }

    async fn job_state(&self, job_id: &str) -> Result<JobStateCounts> {
        let jobs = self
            .jobs
            .lock()
            .map_err(|e| PipelineError::scheduler(format!("job table poisoned: {}", e)))?;
        jobs.get(job_id)
            .copied()
            .ok_or_else(|| PipelineError::scheduler(format!("unknown local job {}", job_id)))
    }
}
