//! `ecod-batch run` command implementation
//!
//! Runs (or resumes) a batch from wherever its manifest says it stopped.

use super::{load_existing, status::print_summary};
use crate::config::{PipelineConfig, SchedulerBackend, SecondaryFailurePolicy};
use crate::error::{PipelineError, Result};
use crate::manifest::BatchManifest;
use crate::orchestrator::{Orchestrator, WorkflowOutcome};
use colored::Colorize;

/// Command-line overrides applied on top of the loaded configuration
#[derive(Debug, Clone, Default)]
pub struct RunOverrides {
    pub scheduler: Option<SchedulerBackend>,
    pub partition: Option<String>,
    pub poll_interval: Option<u64>,
    pub wait_timeout: Option<u64>,
    pub secondary_failure_policy: Option<SecondaryFailurePolicy>,
}

impl RunOverrides {
    pub fn apply(&self, config: &mut PipelineConfig) -> Result<()> {
        if let Some(scheduler) = self.scheduler {
            config.scheduler = scheduler;
        }
        if let Some(partition) = &self.partition {
            config.slurm_partition = partition.clone();
        }
        if let Some(secs) = self.poll_interval {
            config.poll_interval_secs = secs;
        }
        if let Some(secs) = self.wait_timeout {
            config.wait_timeout_secs = Some(secs);
        }
        if let Some(policy) = self.secondary_failure_policy {
            config.secondary_failure_policy = policy;
        }
        config.validate()
    }
}

/// Run every stage of a batch
pub async fn run(
    config: &PipelineConfig,
    batch: &str,
    overrides: &RunOverrides,
) -> Result<WorkflowOutcome> {
    let mut config = config.clone();
    overrides.apply(&mut config)?;

    let manifest = load_existing(&config, batch)?;
    if manifest.chain_count() == 0 {
        return Err(PipelineError::config(format!(
            "batch {} has no chains; run 'ecod-batch create' first",
            manifest.batch_name()
        )));
    }

    println!("{} {}", "Running".cyan().bold(), run_banner(&manifest, &config));

    let mut orchestrator = Orchestrator::from_config(manifest, &config)?;
    let outcome = orchestrator.run_complete_workflow().await?;

    println!();
    if let Some(job_id) = &outcome.primary_job {
        println!("  Primary-search job:   {}", job_id);
    }
    if let Some(job_id) = &outcome.secondary_job {
        println!("  Secondary-search job: {}", job_id);
    }
    print_summary(&outcome.summary);

    if outcome.is_success() {
        println!("{}", "Workflow completed".green().bold());
    } else {
        println!("{} {}", "Workflow stopped:".yellow().bold(), outcome.status);
    }

    Ok(outcome)
}

fn run_banner(manifest: &BatchManifest, config: &PipelineConfig) -> String {
    format!(
        "{} ({} chains, scheduler {}, policy {})",
        manifest.batch_name(),
        manifest.chain_count(),
        config.scheduler,
        config.secondary_failure_policy
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::manifest::ChainRecord;
    use ecod_common::types::ChainKey;
    use tempfile::TempDir;

    #[test]
    fn test_overrides_are_validated() {
        let mut config = PipelineConfig::default();
        let overrides = RunOverrides {
            scheduler: Some(SchedulerBackend::Local),
            wait_timeout: Some(600),
            secondary_failure_policy: Some(SecondaryFailurePolicy::FailChain),
            ..Default::default()
        };
        overrides.apply(&mut config).unwrap();
        assert_eq!(config.scheduler, SchedulerBackend::Local);
        assert_eq!(config.wait_timeout_secs, Some(600));
        assert_eq!(config.secondary_failure_policy, SecondaryFailurePolicy::FailChain);

        let zero_poll = RunOverrides {
            poll_interval: Some(0),
            ..Default::default()
        };
        assert!(zero_poll.apply(&mut config).is_err());
    }

    #[test]
    fn test_run_banner_uses_plain_names() {
        let temp = TempDir::new().unwrap();
        let mut manifest = BatchManifest::empty(temp.path().join("ecod_weekly_20251010"));
        let key: ChainKey = "8abc_A".parse().unwrap();
        manifest.add_chain(key.clone(), ChainRecord::new(&key, "M".repeat(60), None));

        let banner = run_banner(&manifest, &PipelineConfig::default());
        assert_eq!(
            banner,
            "ecod_weekly_20251010 (1 chains, scheduler slurm, policy fallback_to_primary)"
        );
    }
}
