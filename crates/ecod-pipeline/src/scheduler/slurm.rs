//! SLURM backend driving `sbatch`, `squeue` and `sacct` as subprocesses

use super::{JobStateCounts, SbatchScript, Scheduler};
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use regex::Regex;
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct SlurmScheduler {
    sbatch: String,
    squeue: String,
    sacct: String,
}

impl Default for SlurmScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl SlurmScheduler {
    pub fn new() -> Self {
        Self {
            sbatch: "sbatch".to_string(),
            squeue: "squeue".to_string(),
            sacct: "sacct".to_string(),
        }
    }

    async fn run(&self, program: &str, args: &[&str]) -> Result<std::process::Output> {
        debug!(program, ?args, "Running scheduler command");
        Command::new(program)
            .args(args)
            .output()
            .await
            .map_err(|e| PipelineError::scheduler(format!("failed to run {}: {}", program, e)))
    }

    async fn accounting_state(&self, job_id: &str) -> Result<JobStateCounts> {
        let output = self
            .run(&self.sacct, &["-j", job_id, "--format=State", "--noheader", "--parsable2"])
            .await?;

        if !output.status.success() {
            return Err(PipelineError::scheduler(format!(
                "sacct failed for job {}: {}",
                job_id,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(parse_sacct_states(&String::from_utf8_lossy(&output.stdout)))
    }
}

#[async_trait]
impl Scheduler for SlurmScheduler {
    fn name(&self) -> &'static str {
        "slurm"
    }

    async fn submit(&self, script: &SbatchScript, script_path: &Path) -> Result<String> {
        let path = script_path.to_string_lossy();
        let output = self
            .run(&self.sbatch, &[path.as_ref()])
            .await
            .map_err(|e| PipelineError::submission(e.to_string()))?;

        if !output.status.success() {
            return Err(PipelineError::submission(format!(
                "sbatch failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let job_id = parse_sbatch_job_id(&stdout)?;
        info!(job_id = %job_id, job_name = script.job_name(), tasks = script.array_size(), "Submitted array job");
        Ok(job_id)
    }

    async fn job_state(&self, job_id: &str) -> Result<JobStateCounts> {
        let output = self.run(&self.squeue, &["-j", job_id, "-h", "-o", "%T"]).await?;
        let stdout = String::from_utf8_lossy(&output.stdout);

        if output.status.success() && !stdout.trim().is_empty() {
            return Ok(parse_squeue_states(&stdout));
        }

        // The queue forgets finished jobs; ask accounting instead
        if !output.status.success() {
            debug!(job_id, "squeue does not know the job, falling back to sacct");
        }
        match self.accounting_state(job_id).await {
            Ok(counts) => Ok(counts),
            Err(e) => {
                warn!(job_id, error = %e, "Could not determine job state");
                Err(e)
            },
        }
    }
}

/// Extract the job id from `Submitted batch job 12345`
pub fn parse_sbatch_job_id(stdout: &str) -> Result<String> {
    let pattern = Regex::new(r"Submitted batch job (\d+)")?;
    pattern
        .captures(stdout)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| {
            PipelineError::submission(format!("could not parse job id from: {}", stdout.trim()))
        })
}

/// Count task states reported by `squeue -o %T`
pub fn parse_squeue_states(stdout: &str) -> JobStateCounts {
    let mut counts = JobStateCounts::default();
    for state in stdout.lines().map(str::trim) {
        match state {
            "RUNNING" | "COMPLETING" => counts.running += 1,
            "PENDING" | "CONFIGURING" => counts.pending += 1,
            "COMPLETED" => counts.completed += 1,
            "FAILED" => counts.failed += 1,
            _ => {},
        }
    }
    counts
}

/// Count task states reported by `sacct --parsable2`.
///
/// States carry suffixes such as `CANCELLED by 1234`, so matching is by prefix.
pub fn parse_sacct_states(stdout: &str) -> JobStateCounts {
    let mut counts = JobStateCounts::default();
    for state in stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if state.starts_with("COMPLETED") {
            counts.completed += 1;
        } else if ["FAILED", "CANCELLED", "TIMEOUT", "OUT_OF_MEMORY", "NODE_FAIL"]
            .iter()
            .any(|s| state.starts_with(s))
        {
            counts.failed += 1;
        } else if state.starts_with("RUNNING") {
            counts.running += 1;
        } else if state.starts_with("PENDING") {
            counts.pending += 1;
        }
    }
    counts
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sbatch_job_id() {
        assert_eq!(parse_sbatch_job_id("Submitted batch job 4242\n").unwrap(), "4242");
        assert!(matches!(
            parse_sbatch_job_id("sbatch: error: invalid partition"),
            Err(PipelineError::Submission(_))
        ));
    }

    #[test]
    fn test_parse_squeue_states() {
        let counts = parse_squeue_states("RUNNING\nRUNNING\nPENDING\nCOMPLETED\nFAILED\n");
        assert_eq!(
            counts,
            JobStateCounts {
                running: 2,
                pending: 1,
                completed: 1,
                failed: 1
            }
        );
    }

    #[test]
    fn test_parse_sacct_states() {
        let counts =
            parse_sacct_states("COMPLETED\nCOMPLETED\nFAILED\nCANCELLED by 501\nTIMEOUT\nOUT_OF_MEMORY\n");
        assert_eq!(counts.completed, 2);
        assert_eq!(counts.failed, 4);
        assert!(counts.is_finished());
    }

    #[test]
    fn test_parse_sacct_empty() {
        assert_eq!(parse_sacct_states(""), JobStateCounts::default());
    }
}
