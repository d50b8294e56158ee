//! Search-stage job runner
//!
//! One runner per search stage: the primary runner turns chains into a
//! chain-BLAST plus domain-BLAST array job, the secondary runner into an
//! HHsearch array job. Both share the submit / poll / wait cycle.

use super::script::{BlastCommand, HhsearchCommand, SbatchScript, TaskResources, NAME_VAR};
use super::{JobStateCounts, Scheduler};
use crate::config::{BlastSettings, HhsearchSettings, PipelineConfig};
use crate::directories::BatchDirectories;
use crate::error::{PipelineError, Result};
use crate::manifest::{artifact, JobType};
use chrono::Utc;
use ecod_common::types::ChainKey;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// What a runner's array tasks compute
#[derive(Debug, Clone)]
pub enum SearchKind {
    Primary(BlastSettings),
    Secondary(HhsearchSettings),
}

/// One (chain, FASTA) pair handed to an array job
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub key: ChainKey,
    pub fasta: PathBuf,
}

pub struct JobRunner {
    scheduler: Arc<dyn Scheduler>,
    kind: SearchKind,
    partition: String,
    array_limit: u32,
}

impl JobRunner {
    pub fn new(
        scheduler: Arc<dyn Scheduler>,
        kind: SearchKind,
        partition: impl Into<String>,
        array_limit: u32,
    ) -> Self {
        Self {
            scheduler,
            kind,
            partition: partition.into(),
            array_limit,
        }
    }

    pub fn primary(scheduler: Arc<dyn Scheduler>, config: &PipelineConfig) -> Self {
        Self::new(
            scheduler,
            SearchKind::Primary(config.blast.clone()),
            &config.slurm_partition,
            config.array_limit,
        )
    }

    pub fn secondary(scheduler: Arc<dyn Scheduler>, config: &PipelineConfig) -> Self {
        Self::new(
            scheduler,
            SearchKind::Secondary(config.hhsearch.clone()),
            &config.slurm_partition,
            config.array_limit,
        )
    }

    pub fn job_type(&self) -> JobType {
        match self.kind {
            SearchKind::Primary(_) => JobType::PrimarySearch,
            SearchKind::Secondary(_) => JobType::SecondarySearch,
        }
    }

    pub fn partition(&self) -> &str {
        &self.partition
    }

    pub fn scheduler_name(&self) -> &'static str {
        self.scheduler.name()
    }

    /// Report files one chain's task produces, keyed by artifact name.
    ///
    /// The first entry is the report whose absence fails the chain and whose
    /// coverage decides the next stage.
    pub fn expected_reports(&self, dirs: &BatchDirectories, key: &ChainKey) -> Vec<(&'static str, PathBuf)> {
        match self.kind {
            SearchKind::Primary(_) => vec![
                (artifact::DOMAIN_BLAST, dirs.domain_blast_path(key)),
                (artifact::CHAIN_BLAST, dirs.chain_blast_path(key)),
            ],
            SearchKind::Secondary(_) => vec![(artifact::HHSEARCH, dirs.hhr_path(key))],
        }
    }

    /// Submit one array job covering `items`.
    ///
    /// Writes the file list (line N is the FASTA of array task N) and the
    /// script under `scripts/`, then hands the script to the scheduler.
    /// An empty `items` is rejected before anything is written.
    pub async fn submit(&self, dirs: &BatchDirectories, items: &[WorkItem]) -> Result<String> {
        if items.is_empty() {
            return Err(PipelineError::submission(format!(
                "no chains to submit for {}",
                self.job_type()
            )));
        }

        std::fs::create_dir_all(dirs.scripts())?;
        std::fs::create_dir_all(dirs.slurm_logs())?;

        let stamp = Utc::now().format("%Y%m%d_%H%M%S%3f");
        let job_name = self.job_type().as_str();
        let file_list = dirs.scripts().join(format!("{}_{}.list", job_name, stamp));
        let script_path = dirs.scripts().join(format!("{}_{}.sh", job_name, stamp));

        let mut listing = String::new();
        for item in items {
            let _ = writeln!(listing, "{}", absolute(&item.fasta).display());
        }

        let script = self.build_script(dirs, &file_list, items.len())?;
        std::fs::write(&file_list, listing)?;
        std::fs::write(&script_path, script.render())?;

        let job_id = self.scheduler.submit(&script, &script_path).await?;
        info!(
            job_id = %job_id,
            job_type = %self.job_type(),
            chains = items.len(),
            backend = self.scheduler.name(),
            "Search job submitted"
        );
        Ok(job_id)
    }

    fn build_script(&self, dirs: &BatchDirectories, file_list: &Path, size: usize) -> Result<SbatchScript> {
        let builder = SbatchScript::builder(self.job_type().as_str())
            .partition(&self.partition)
            .array(size, self.array_limit)
            .log_dir(absolute(&dirs.slurm_logs()))
            .file_list(absolute(file_list));

        let builder = match &self.kind {
            SearchKind::Primary(blast) => {
                let out = absolute(&dirs.blast());
                let chain = BlastCommand::new(
                    blast,
                    &blast.chain_db,
                    format!("{}/${{{}}}.chain_blast.xml", out.display(), NAME_VAR),
                );
                let domain = BlastCommand::new(
                    blast,
                    &blast.domain_db,
                    format!("{}/${{{}}}.domain_blast.xml", out.display(), NAME_VAR),
                );
                builder
                    .resources(TaskResources::primary_search())
                    .command(format!("mkdir -p {}", out.display()))
                    .command(chain.render()?)
                    .command(domain.render()?)
            },
            SearchKind::Secondary(hhsearch) => {
                let out = absolute(&dirs.hhsearch());
                let command = HhsearchCommand::new(
                    hhsearch,
                    format!("{}/${{{}}}.hhr", out.display(), NAME_VAR),
                );
                builder
                    .resources(TaskResources::secondary_search())
                    .command(format!("mkdir -p {}", out.display()))
                    .command(command.render()?)
            },
        };

        builder.build()
    }

    pub async fn poll_status(&self, job_id: &str) -> Result<JobStateCounts> {
        self.scheduler.job_state(job_id).await
    }

    /// Poll until nothing is running or pending.
    ///
    /// Returns true when no task failed. When `timeout` expires first the
    /// result is false and nothing else happens; the job keeps running and a
    /// later run picks it up again.
    pub async fn wait_for_completion(
        &self,
        job_id: &str,
        poll_interval: Duration,
        timeout: Option<Duration>,
    ) -> Result<bool> {
        let wait = async {
            loop {
                let counts = self.poll_status(job_id).await?;
                debug!(job_id, %counts, "Polled job");

                if counts.is_finished() {
                    if counts.failed > 0 {
                        warn!(job_id, failed = counts.failed, "Array tasks failed");
                    } else {
                        info!(job_id, completed = counts.completed, "Job finished");
                    }
                    return Ok(counts.failed == 0);
                }

                tokio::time::sleep(poll_interval).await;
            }
        };

        match timeout {
            None => wait.await,
            Some(limit) => match tokio::time::timeout(limit, wait).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(job_id, timeout_secs = limit.as_secs(), "Timed out waiting for job");
                    Ok(false)
                },
            },
        }
    }
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::testing::FakeScheduler;
    use tempfile::TempDir;

    fn items(dirs: &BatchDirectories, keys: &[&str]) -> Vec<WorkItem> {
        keys.iter()
            .map(|k| {
                let key: ChainKey = k.parse().unwrap();
                WorkItem {
                    fasta: dirs.fasta_path(&key),
                    key,
                }
            })
            .collect()
    }

    fn runner(scheduler: Arc<FakeScheduler>) -> JobRunner {
        JobRunner::primary(scheduler, &PipelineConfig::default())
    }

    #[tokio::test]
    async fn test_submit_writes_list_and_script() {
        let temp = TempDir::new().unwrap();
        let dirs = BatchDirectories::new(temp.path());
        let scheduler = Arc::new(FakeScheduler::new());
        let runner = runner(scheduler.clone());

        let job_id = runner.submit(&dirs, &items(&dirs, &["8abc_A", "8abc_B"])).await.unwrap();
        assert_eq!(job_id, "1000");

        let submitted = scheduler.submitted();
        assert_eq!(submitted.len(), 1);
        let script = &submitted[0];
        assert_eq!(script.array_spec(), "1-2%500");

        let listing = std::fs::read_to_string(script.file_list()).unwrap();
        let lines: Vec<_> = listing.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("fastas/8abc_A.fa"));
        assert!(lines[1].ends_with("fastas/8abc_B.fa"));

        let rendered = script.render();
        assert!(rendered.contains("chainwise100.develop291"));
        assert!(rendered.contains(".domain_blast.xml"));
    }

    #[tokio::test]
    async fn test_submit_nothing_is_rejected_before_scheduler() {
        let temp = TempDir::new().unwrap();
        let dirs = BatchDirectories::new(temp.path());
        let scheduler = Arc::new(FakeScheduler::new());
        let runner = runner(scheduler.clone());

        let err = runner.submit(&dirs, &[]).await.unwrap_err();
        assert!(matches!(err, PipelineError::Submission(_)));
        assert!(scheduler.submitted().is_empty());
        assert!(!dirs.scripts().exists());
    }

    #[tokio::test]
    async fn test_secondary_script_uses_hhsearch() {
        let temp = TempDir::new().unwrap();
        let dirs = BatchDirectories::new(temp.path());
        let scheduler = Arc::new(FakeScheduler::new());
        let runner = JobRunner::secondary(scheduler.clone(), &PipelineConfig::default());

        runner.submit(&dirs, &items(&dirs, &["8abc_A"])).await.unwrap();
        let script = &scheduler.submitted()[0];
        assert_eq!(script.resources(), &TaskResources::secondary_search());
        assert!(script.render().contains("hhsearch"));
        assert_eq!(runner.job_type(), JobType::SecondarySearch);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_polls_until_finished() {
        let scheduler = Arc::new(FakeScheduler::new());
        scheduler.script_states(
            "77",
            vec![
                JobStateCounts { pending: 2, ..Default::default() },
                JobStateCounts { running: 1, completed: 1, ..Default::default() },
                JobStateCounts { completed: 2, ..Default::default() },
            ],
        );
        let runner = runner(scheduler.clone());

        let ok = runner
            .wait_for_completion("77", Duration::from_secs(60), None)
            .await
            .unwrap();
        assert!(ok);
        assert_eq!(scheduler.poll_count("77"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_reports_failed_tasks() {
        let scheduler = Arc::new(FakeScheduler::new());
        scheduler.script_states(
            "78",
            vec![JobStateCounts { completed: 1, failed: 1, ..Default::default() }],
        );
        let runner = runner(scheduler);

        assert!(!runner
            .wait_for_completion("78", Duration::from_secs(60), None)
            .await
            .unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_timeout_returns_false() {
        let scheduler = Arc::new(FakeScheduler::new());
        scheduler.script_states("79", vec![JobStateCounts { running: 1, ..Default::default() }]);
        let runner = runner(scheduler);

        let ok = runner
            .wait_for_completion("79", Duration::from_secs(60), Some(Duration::from_secs(300)))
            .await
            .unwrap();
        assert!(!ok);
    }
}
