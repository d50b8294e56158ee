//! Weekly batch orchestration
//!
//! Drives every chain of one batch through the stage state machine:
//!
//! ```text
//! pending -> primary running -> primary complete
//!         -> [secondary pending -> running -> complete]
//!         -> evidence consolidated -> partition running -> complete | failed
//! ```
//!
//! The orchestrator owns its manifest, both search runners and the
//! partitioner. Each stage method saves the manifest before returning, so a
//! run interrupted at any point resumes from what is on disk: complete chains
//! are skipped, live jobs are awaited again and chains left running without a
//! live job are retried.

use crate::config::{PipelineConfig, SecondaryFailurePolicy};
use crate::enumerate::write_chain_fasta;
use crate::error::{PipelineError, Result};
use crate::evidence::{EvidenceSources, FamilyLookup, SummaryRequest, SummaryWriter};
use crate::manifest::{artifact, BatchManifest, BatchSummary, JobStatus, JobType, SECONDARY_FALLBACK_NOTE};
use crate::partition::{CliPartitioner, PartitionRequest, Partitioner};
use crate::scheduler::runner::WorkItem;
use crate::scheduler::{self, JobRunner};
use crate::search::parse_coverage;
use ecod_common::types::{ChainKey, Stage, StageStatus};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Timing and policy knobs of a run
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub poll_interval: Duration,
    pub wait_timeout: Option<Duration>,
    pub secondary_failure_policy: SecondaryFailurePolicy,
}

impl From<&PipelineConfig> for OrchestratorSettings {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            wait_timeout: config.wait_timeout(),
            secondary_failure_policy: config.secondary_failure_policy,
        }
    }
}

/// Per-chain counts from one stage pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageReport {
    pub succeeded: usize,
    pub failed: usize,
    /// Still owned by a live job, or waiting on an earlier stage
    pub skipped: usize,
}

/// How waiting on one array job ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobWait {
    Succeeded,
    Failed,
    /// Still running when the wait timeout expired; the job stays live
    TimedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowStatus {
    Completed,
    /// The primary-search job reported failed tasks; later stages were not run
    PrimarySearchFailed,
    /// A job outlived the wait timeout; run again to pick it up
    WaitTimedOut,
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::PrimarySearchFailed => "primary search failed",
            WorkflowStatus::WaitTimedOut => "timed out waiting for a job",
        })
    }
}

/// Result of [`Orchestrator::run_complete_workflow`]
#[derive(Debug, Clone)]
pub struct WorkflowOutcome {
    pub status: WorkflowStatus,
    pub primary_job: Option<String>,
    pub secondary_job: Option<String>,
    pub summary: BatchSummary,
}

impl WorkflowOutcome {
    pub fn is_success(&self) -> bool {
        self.status == WorkflowStatus::Completed
    }
}

pub struct Orchestrator {
    manifest: BatchManifest,
    primary: JobRunner,
    secondary: JobRunner,
    partitioner: Arc<dyn Partitioner>,
    summaries: SummaryWriter,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(
        manifest: BatchManifest,
        primary: JobRunner,
        secondary: JobRunner,
        partitioner: Arc<dyn Partitioner>,
        summaries: SummaryWriter,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            manifest,
            primary,
            secondary,
            partitioner,
            summaries,
            settings,
        }
    }

    /// Wire up the configured scheduler backend and `pyecod-mini`
    pub fn from_config(manifest: BatchManifest, config: &PipelineConfig) -> Result<Self> {
        let scheduler = scheduler::from_config(config);
        let families = match &config.family_lookup {
            Some(path) => FamilyLookup::load(path)?,
            None => FamilyLookup::default(),
        };

        Ok(Self::new(
            manifest,
            JobRunner::primary(scheduler.clone(), config),
            JobRunner::secondary(scheduler, config),
            Arc::new(CliPartitioner::new(
                config.partitioner_program.clone(),
                config.partition_timeout(),
            )),
            SummaryWriter::new(families),
            OrchestratorSettings::from(config),
        ))
    }

    pub fn manifest(&self) -> &BatchManifest {
        &self.manifest
    }

    pub fn into_manifest(self) -> BatchManifest {
        self.manifest
    }

    fn runner(&self, job_type: JobType) -> &JobRunner {
        match job_type {
            JobType::PrimarySearch => &self.primary,
            JobType::SecondarySearch => &self.secondary,
        }
    }

    // ========================================================================
    // FASTA generation
    // ========================================================================

    /// Write `fastas/{pdb}_{chain}.fa` for classifiable chains that lack one
    pub fn generate_fastas(&mut self) -> Result<usize> {
        let dirs = self.manifest.directories();
        let missing: Vec<(ChainKey, String)> = self
            .manifest
            .chains()
            .filter(|(_, c)| c.can_classify)
            .filter(|(_, c)| {
                c.file(artifact::FASTA)
                    .map_or(true, |stored| !dirs.resolve(stored).exists())
            })
            .map(|(k, c)| (k.clone(), c.sequence.clone()))
            .collect();

        for (key, sequence) in &missing {
            let path = dirs.fasta_path(key);
            write_chain_fasta(&path, key, sequence)?;
            self.manifest
                .record_artifact(key, artifact::FASTA, dirs.relative(&path))?;
        }

        if !missing.is_empty() {
            info!(written = missing.len(), "Generated chain FASTA files");
        }
        self.manifest.save()?;
        Ok(missing.len())
    }

    // ========================================================================
    // Search stages
    // ========================================================================

    pub async fn submit_primary_search(&mut self) -> Result<Option<String>> {
        self.submit_search(JobType::PrimarySearch).await
    }

    pub async fn submit_secondary_search(&mut self) -> Result<Option<String>> {
        self.submit_search(JobType::SecondarySearch).await
    }

    /// Submit one array job for every chain pending in the stage.
    ///
    /// Chains left running by an aborted run with no live job are requeued
    /// first. Returns `None` when nothing is pending.
    async fn submit_search(&mut self, job_type: JobType) -> Result<Option<String>> {
        let stage = job_type.stage();
        let requeued = self.requeue_orphans(job_type)?;
        if requeued > 0 {
            self.manifest.save()?;
        }

        let pending = match job_type {
            JobType::PrimarySearch => self.manifest.keys_with_status(stage, StageStatus::Pending),
            JobType::SecondarySearch => self.manifest.chains_needing_secondary_search(),
        };
        if pending.is_empty() {
            debug!(stage = %stage, "Nothing pending, no job submitted");
            return Ok(None);
        }

        let dirs = self.manifest.directories();
        let items: Vec<WorkItem> = pending
            .iter()
            .map(|key| WorkItem {
                key: key.clone(),
                fasta: self
                    .manifest
                    .chain(key)
                    .and_then(|c| c.file(artifact::FASTA))
                    .map_or_else(|| dirs.fasta_path(key), |stored| dirs.resolve(stored)),
            })
            .collect();

        let runner = self.runner(job_type);
        let job_id = runner.submit(&dirs, &items).await?;
        let partition = runner.partition().to_string();

        self.manifest
            .record_job_submission(job_id.clone(), job_type, pending, partition)?;
        self.manifest.save()?;
        Ok(Some(job_id))
    }

    /// Put chains left running with no job behind them back to pending.
    ///
    /// Chains whose reports are already on disk, or whose finished job was
    /// never collected, are collected instead of being searched again.
    fn requeue_orphans(&mut self, job_type: JobType) -> Result<usize> {
        let stage = job_type.stage();
        let live = self.manifest.chains_in_live_jobs(job_type);
        let running_without_job = self
            .manifest
            .keys_with_status(stage, StageStatus::Running)
            .into_iter()
            .any(|k| !live.contains(&k));
        if running_without_job {
            self.collect_search(job_type)?;
        }

        let orphans: Vec<ChainKey> = self
            .manifest
            .keys_with_status(stage, StageStatus::Running)
            .into_iter()
            .filter(|k| !live.contains(k))
            .collect();

        for key in &orphans {
            warn!(chain = %key, stage = %stage, "Chain was running with no live job, requeueing");
            self.manifest.requeue_stage(key, stage)?;
        }
        Ok(orphans.len())
    }

    pub fn collect_primary_search_results(&mut self) -> Result<StageReport> {
        self.collect_search(JobType::PrimarySearch)
    }

    pub fn collect_secondary_search_results(&mut self) -> Result<StageReport> {
        self.collect_search(JobType::SecondarySearch)
    }

    /// Read the reports of every running chain no live job still owns.
    ///
    /// A chain of a finished job with a missing or unreadable required
    /// report fails alone. A running chain with no job record and no report
    /// is left running for [`requeue_orphans`](Self::requeue_orphans).
    fn collect_search(&mut self, job_type: JobType) -> Result<StageReport> {
        let stage = job_type.stage();
        let dirs = self.manifest.directories();
        let live = self.manifest.chains_in_live_jobs(job_type);
        let finished: BTreeSet<ChainKey> = self
            .manifest
            .jobs()
            .filter(|j| j.job_type == job_type && !j.is_live())
            .flat_map(|j| j.chains.iter().cloned())
            .collect();
        let mut report = StageReport::default();

        for key in self.manifest.keys_with_status(stage, StageStatus::Running) {
            if live.contains(&key) {
                report.skipped += 1;
                continue;
            }

            let expected = self.runner(job_type).expected_reports(&dirs, &key);
            let Some((_, required)) = expected.first() else {
                continue;
            };
            if !finished.contains(&key) && !required.exists() {
                report.skipped += 1;
                continue;
            }

            // The first report alone decides coverage; later ones are evidence
            let coverage = parse_coverage(required);

            match coverage {
                Ok(coverage) => {
                    let artifacts: BTreeMap<String, String> = expected
                        .iter()
                        .filter(|(_, p)| p.exists())
                        .map(|(name, p)| (name.to_string(), dirs.relative(p)))
                        .collect();

                    match job_type {
                        JobType::PrimarySearch => {
                            let chain = self
                                .manifest
                                .mark_primary_search_complete(&key, coverage, artifacts)?;
                            debug!(
                                chain = %key,
                                coverage,
                                needs_secondary = chain.needs_secondary_search,
                                "Primary search collected"
                            );
                        },
                        JobType::SecondarySearch => {
                            self.manifest
                                .mark_secondary_search_complete(&key, Some(coverage), artifacts)?;
                            debug!(chain = %key, coverage, "Secondary search collected");
                        },
                    }
                    report.succeeded += 1;
                },
                Err(e) if e.is_per_chain() => {
                    warn!(chain = %key, stage = %stage, error = %e, "Search result unusable");
                    self.manifest.mark_stage_failed(&key, stage, e.to_string())?;
                    report.failed += 1;
                },
                Err(e) => return Err(e),
            }
        }

        info!(
            stage = %stage,
            collected = report.succeeded,
            failed = report.failed,
            still_running = report.skipped,
            "Collected search results"
        );
        self.manifest.save()?;
        Ok(report)
    }

    // ========================================================================
    // Job monitoring
    // ========================================================================

    /// Wait for one recorded job and mark it terminal.
    ///
    /// A job the scheduler can no longer be asked about is marked failed;
    /// its chains are then judged by the reports they left behind.
    pub async fn await_job(&mut self, job_id: &str) -> Result<JobWait> {
        let job_type = self
            .manifest
            .job(job_id)
            .map(|j| j.job_type)
            .ok_or_else(|| PipelineError::job_not_found(job_id))?;
        let runner = self.runner(job_type);

        let wait = match runner
            .wait_for_completion(job_id, self.settings.poll_interval, self.settings.wait_timeout)
            .await
        {
            Ok(true) => JobWait::Succeeded,
            Ok(false) => match runner.poll_status(job_id).await {
                Ok(counts) if !counts.is_finished() => JobWait::TimedOut,
                _ => JobWait::Failed,
            },
            Err(PipelineError::Scheduler(reason)) => {
                warn!(job_id, %reason, "Cannot query job, treating it as finished with failures");
                JobWait::Failed
            },
            Err(e) => return Err(e),
        };

        match wait {
            JobWait::Succeeded => {
                self.manifest.mark_job_terminal(job_id, JobStatus::Completed)?;
            },
            JobWait::Failed => {
                self.manifest.mark_job_terminal(job_id, JobStatus::Failed)?;
            },
            JobWait::TimedOut => return Ok(wait),
        }
        self.manifest.save()?;
        Ok(wait)
    }

    /// Finish what a previous run left behind.
    ///
    /// Waits for every job still live, then collects those together with
    /// finished jobs whose chains were never collected. The result holds
    /// one entry per job, in the order handled.
    pub async fn await_outstanding_jobs(&mut self) -> Result<Vec<(JobType, JobWait)>> {
        let mut results = Vec::new();

        for job_type in [JobType::PrimarySearch, JobType::SecondarySearch] {
            let uncollected: Vec<(String, JobStatus)> = self
                .manifest
                .uncollected_jobs(job_type)
                .into_iter()
                .map(|j| (j.job_id.clone(), j.status))
                .collect();
            let live: Vec<String> = self
                .manifest
                .live_jobs(job_type)
                .into_iter()
                .map(|j| j.job_id.clone())
                .collect();
            if live.is_empty() && uncollected.is_empty() {
                continue;
            }

            for (job_id, status) in uncollected {
                info!(job_id = %job_id, job_type = %job_type, "Collecting finished job left uncollected");
                let wait = if status == JobStatus::Completed {
                    JobWait::Succeeded
                } else {
                    JobWait::Failed
                };
                results.push((job_type, wait));
            }

            for job_id in live {
                info!(job_id = %job_id, job_type = %job_type, "Resuming wait on outstanding job");
                let wait = self.await_job(&job_id).await?;
                results.push((job_type, wait));
            }
            self.collect_search(job_type)?;
        }

        Ok(results)
    }

    // ========================================================================
    // Evidence and partitioning
    // ========================================================================

    /// Write a domain summary for every chain whose searches are settled.
    ///
    /// A chain whose secondary search failed follows the configured policy:
    /// consolidated from primary evidence with a note, or failed at the
    /// partition stage.
    pub fn consolidate_evidence(&mut self) -> Result<StageReport> {
        let dirs = self.manifest.directories();
        let batch_id = self.manifest.batch_name().to_string();
        let policy = self.settings.secondary_failure_policy;
        let mut report = StageReport::default();

        struct Candidate {
            key: ChainKey,
            sequence: String,
            secondary: StageStatus,
            files: BTreeMap<String, String>,
        }

        let candidates: Vec<Candidate> = self
            .manifest
            .chains()
            .filter(|(_, c)| {
                c.can_classify
                    && c.primary_search.status == StageStatus::Complete
                    && c.partition.status == StageStatus::Pending
                    && c.file(artifact::SUMMARY).is_none()
            })
            .map(|(k, c)| Candidate {
                key: k.clone(),
                sequence: c.sequence.clone(),
                secondary: c.secondary_search.status,
                files: c.files.clone(),
            })
            .collect();

        for candidate in candidates {
            let key = &candidate.key;
            let note = match candidate.secondary {
                StageStatus::Complete | StageStatus::NotNeeded => None,
                StageStatus::Failed => match policy {
                    SecondaryFailurePolicy::FallbackToPrimary => {
                        warn!(chain = %key, "Secondary search failed, consolidating primary evidence only");
                        Some(SECONDARY_FALLBACK_NOTE)
                    },
                    SecondaryFailurePolicy::FailChain => {
                        self.manifest.mark_stage_failed(
                            key,
                            Stage::Partition,
                            "secondary search failed",
                        )?;
                        report.failed += 1;
                        continue;
                    },
                },
                StageStatus::Pending | StageStatus::Running => {
                    report.skipped += 1;
                    continue;
                },
            };

            let resolve = |name: &str| -> Option<PathBuf> {
                candidate.files.get(name).map(|stored| dirs.resolve(stored))
            };
            let domain_blast = resolve(artifact::DOMAIN_BLAST);
            let chain_blast = resolve(artifact::CHAIN_BLAST);
            let hhsearch = resolve(artifact::HHSEARCH);

            let request = SummaryRequest {
                key,
                sequence: &candidate.sequence,
                batch_id: Some(batch_id.as_str()),
                note,
                sources: EvidenceSources {
                    domain_blast: domain_blast.as_deref(),
                    chain_blast: chain_blast.as_deref(),
                    hhsearch: hhsearch.as_deref(),
                },
            };

            let output = dirs.summary_path(key);
            match self.summaries.write(&request, &output) {
                Ok(hits) => {
                    self.manifest
                        .record_evidence(key, dirs.relative(&output), note)?;
                    debug!(chain = %key, hits, "Evidence consolidated");
                    report.succeeded += 1;
                },
                Err(e) if e.is_per_chain() || matches!(e, PipelineError::Io(_)) => {
                    warn!(chain = %key, error = %e, "Evidence consolidation failed");
                    self.manifest
                        .mark_stage_failed(key, Stage::Partition, e.to_string())?;
                    report.failed += 1;
                },
                Err(e) => return Err(e),
            }
        }

        info!(
            consolidated = report.succeeded,
            failed = report.failed,
            waiting = report.skipped,
            "Evidence consolidation finished"
        );
        self.manifest.save()?;
        Ok(report)
    }

    /// Partition every chain with consolidated evidence, one at a time.
    ///
    /// A chain found running here was interrupted mid-call and is partitioned
    /// again. Failures stay with their chain.
    pub async fn run_partitioning(&mut self) -> Result<StageReport> {
        let dirs = self.manifest.directories();
        let batch_id = self.manifest.batch_name().to_string();
        let mut report = StageReport::default();

        let ready: Vec<(ChainKey, PathBuf)> = self
            .manifest
            .chains()
            .filter(|(_, c)| {
                c.can_classify
                    && c.has_consolidated_evidence()
                    && matches!(c.partition.status, StageStatus::Pending | StageStatus::Running)
            })
            .filter_map(|(k, c)| {
                c.file(artifact::SUMMARY)
                    .map(|stored| (k.clone(), dirs.resolve(stored)))
            })
            .collect();

        if ready.is_empty() {
            debug!("No chains ready for partitioning");
            return Ok(report);
        }
        info!(chains = ready.len(), "Partitioning chains");

        for (key, summary) in ready {
            self.manifest.mark_partition_running(&key)?;
            self.manifest.save()?;

            let request = PartitionRequest {
                output: dirs.partition_path(&key),
                key: key.clone(),
                summary,
                batch_id: Some(batch_id.clone()),
            };

            match self.partitioner.partition(&request).await {
                Ok(outcome) => {
                    let artifacts = BTreeMap::from([(
                        artifact::PARTITION.to_string(),
                        dirs.relative(&request.output),
                    )]);
                    self.manifest.mark_partition_complete(
                        &key,
                        outcome.coverage,
                        outcome.domain_count(),
                        outcome.quality,
                        outcome.algorithm_version.clone(),
                        artifacts,
                    )?;
                    report.succeeded += 1;
                },
                Err(e) if e.is_per_chain() || matches!(e, PipelineError::Io(_)) => {
                    warn!(chain = %key, error = %e, "Partitioning failed");
                    self.manifest
                        .mark_stage_failed(&key, Stage::Partition, e.to_string())?;
                    report.failed += 1;
                },
                Err(e) => return Err(e),
            }
            self.manifest.save()?;
        }

        info!(
            partitioned = report.succeeded,
            failed = report.failed,
            "Partitioning finished"
        );
        Ok(report)
    }

    // ========================================================================
    // Full run
    // ========================================================================

    /// Run every stage, resuming whatever a previous run left behind.
    ///
    /// Stops early, without an error, when the primary-search job reports
    /// failed tasks or a job outlives the wait timeout.
    pub async fn run_complete_workflow(&mut self) -> Result<WorkflowOutcome> {
        info!(batch = %self.manifest.batch_name(), chains = self.manifest.chain_count(), "Starting batch workflow");

        self.generate_fastas()?;

        for (job_type, wait) in self.await_outstanding_jobs().await? {
            match (job_type, wait) {
                (_, JobWait::TimedOut) => return Ok(self.outcome(WorkflowStatus::WaitTimedOut, None, None)),
                (JobType::PrimarySearch, JobWait::Failed) => {
                    warn!("Resumed primary-search job failed, stopping");
                    return Ok(self.outcome(WorkflowStatus::PrimarySearchFailed, None, None));
                },
                _ => {},
            }
        }

        let primary_job = self.submit_primary_search().await?;
        if let Some(job_id) = &primary_job {
            let wait = self.await_job(job_id).await?;
            if wait == JobWait::TimedOut {
                return Ok(self.outcome(WorkflowStatus::WaitTimedOut, primary_job, None));
            }
            self.collect_primary_search_results()?;
            if wait == JobWait::Failed {
                warn!(job_id = %job_id, "Primary-search job failed, stopping workflow");
                return Ok(self.outcome(WorkflowStatus::PrimarySearchFailed, primary_job, None));
            }
        }

        let secondary_job = self.submit_secondary_search().await?;
        if let Some(job_id) = &secondary_job {
            match self.await_job(job_id).await? {
                JobWait::TimedOut => {
                    return Ok(self.outcome(WorkflowStatus::WaitTimedOut, primary_job, secondary_job))
                },
                JobWait::Failed => {
                    warn!(job_id = %job_id, "Secondary-search job had failures, continuing with available evidence")
                },
                JobWait::Succeeded => {},
            }
            self.collect_secondary_search_results()?;
        }

        self.consolidate_evidence()?;
        self.run_partitioning().await?;

        let outcome = self.outcome(WorkflowStatus::Completed, primary_job, secondary_job);
        info!(
            batch = %outcome.summary.batch_name,
            partitioned = outcome.summary.counters.partition_complete,
            failed = outcome.summary.counters.failed,
            "Batch workflow complete"
        );
        Ok(outcome)
    }

    fn outcome(
        &self,
        status: WorkflowStatus,
        primary_job: Option<String>,
        secondary_job: Option<String>,
    ) -> WorkflowOutcome {
        WorkflowOutcome {
            status,
            primary_job,
            secondary_job,
            summary: self.manifest.summary(),
        }
    }
}
