//! Batch manifest (`batch_manifest.yaml`)
//!
//! The manifest is the single source of truth for a batch: every chain's
//! stage statuses, coverages, artifacts and cluster linkage, plus every array
//! job submitted on the batch's behalf. The orchestrator saves it after every
//! mutating step, so a crashed run resumes from exactly what is on disk.
//!
//! Records are only changed through the named operations on
//! [`BatchManifest`]; each one recomputes the aggregate counters before
//! returning so they never drift from the chain records.

mod records;
pub mod repair;

pub use records::{
    artifact, reason, BatchInfo, ChainRecord, ClusterLink, JobRecord, JobStatus, JobType,
    PartitionState, ProcessingCounters, ReferenceAnnotation, SearchState,
    SECONDARY_FALLBACK_NOTE,
};

use crate::cluster::{ClusterAssignment, ClusterMethod};
use crate::config::{DEFAULT_COVERAGE_THRESHOLD, DEFAULT_REFERENCE_VERSION};
use crate::directories::{BatchDirectories, MANIFEST_FILE};
use crate::error::{PipelineError, Result};
use chrono::{DateTime, Utc};
use ecod_common::types::{BatchKind, ChainKey, QualityLabel, Stage, StageStatus};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Current on-disk schema version
pub const MANIFEST_SCHEMA_VERSION: u32 = 1;

/// Description of the clustering loaded into a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusteringRun {
    pub method: ClusterMethod,
    pub threshold: f64,
    pub cluster_count: usize,
    pub loaded: DateTime<Utc>,
}

/// Outcome of [`BatchManifest::assign_clusters`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterLoadReport {
    pub clusters: usize,
    pub representatives: usize,
    pub members: usize,
    pub unknown_chains: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchManifest {
    pub schema_version: u32,
    pub batch_info: BatchInfo,
    pub processing_status: ProcessingCounters,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clustering: Option<ClusteringRun>,
    #[serde(default)]
    chains: BTreeMap<ChainKey, ChainRecord>,
    #[serde(default)]
    jobs: BTreeMap<String, JobRecord>,

    #[serde(skip)]
    batch_dir: PathBuf,
}

impl BatchManifest {
    /// Empty manifest for `batch_dir`, named after the directory
    pub fn empty(batch_dir: impl Into<PathBuf>) -> Self {
        let batch_dir = batch_dir.into();
        let batch_name = batch_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        Self {
            schema_version: MANIFEST_SCHEMA_VERSION,
            batch_info: BatchInfo {
                batch_name,
                batch_kind: BatchKind::Weekly,
                release_date: None,
                reference_version: DEFAULT_REFERENCE_VERSION.to_string(),
                coverage_threshold: DEFAULT_COVERAGE_THRESHOLD,
                created: Utc::now(),
                source_batches: Vec::new(),
            },
            processing_status: ProcessingCounters::default(),
            clustering: None,
            chains: BTreeMap::new(),
            jobs: BTreeMap::new(),
            batch_dir,
        }
    }

    /// Load the manifest of `batch_dir`, or start an empty one if none exists
    pub fn load(batch_dir: impl AsRef<Path>) -> Result<Self> {
        let batch_dir = batch_dir.as_ref();
        let path = batch_dir.join(MANIFEST_FILE);

        if !path.exists() {
            debug!(path = %path.display(), "No manifest yet, starting empty");
            return Ok(Self::empty(batch_dir));
        }

        let content =
            std::fs::read_to_string(&path).map_err(|e| PipelineError::persistence(&path, e))?;
        if content.trim().is_empty() {
            return Ok(Self::empty(batch_dir));
        }

        let mut manifest: BatchManifest =
            serde_yaml::from_str(&content).map_err(|e| PipelineError::persistence(&path, e))?;

        if manifest.schema_version > MANIFEST_SCHEMA_VERSION {
            return Err(PipelineError::persistence(
                &path,
                format!(
                    "schema version {} is newer than supported version {}",
                    manifest.schema_version, MANIFEST_SCHEMA_VERSION
                ),
            ));
        }

        manifest.batch_dir = batch_dir.to_path_buf();
        Ok(manifest)
    }

    /// Write the full document atomically.
    ///
    /// The YAML goes to a temporary file in the batch directory which is then
    /// renamed over `batch_manifest.yaml`; readers see either the old or the
    /// new document, never a partial one.
    pub fn save(&self) -> Result<()> {
        let path = self.path();
        std::fs::create_dir_all(&self.batch_dir)
            .map_err(|e| PipelineError::persistence(&path, e))?;

        let content = serde_yaml::to_string(self).map_err(|e| PipelineError::persistence(&path, e))?;

        let mut temp = tempfile::NamedTempFile::new_in(&self.batch_dir)
            .map_err(|e| PipelineError::persistence(&path, e))?;
        temp.write_all(content.as_bytes())
            .and_then(|_| temp.as_file().sync_all())
            .map_err(|e| PipelineError::persistence(&path, e))?;
        temp.persist(&path)
            .map_err(|e| PipelineError::persistence(&path, e.error))?;

        debug!(path = %path.display(), chains = self.chains.len(), "Manifest saved");
        Ok(())
    }

    pub fn path(&self) -> PathBuf {
        self.batch_dir.join(MANIFEST_FILE)
    }

    pub fn batch_dir(&self) -> &Path {
        &self.batch_dir
    }

    pub fn directories(&self) -> BatchDirectories {
        BatchDirectories::new(&self.batch_dir)
    }

    pub fn batch_name(&self) -> &str {
        &self.batch_info.batch_name
    }

    pub fn coverage_threshold(&self) -> f64 {
        self.batch_info.coverage_threshold
    }

    /// Fill in batch metadata for a freshly created batch
    pub fn initialize(
        &mut self,
        batch_name: impl Into<String>,
        kind: BatchKind,
        release_date: Option<String>,
        reference_version: impl Into<String>,
        coverage_threshold: f64,
    ) {
        self.batch_info.batch_name = batch_name.into();
        self.batch_info.batch_kind = kind;
        self.batch_info.release_date = release_date;
        self.batch_info.reference_version = reference_version.into();
        self.batch_info.coverage_threshold = coverage_threshold;
        self.batch_info.created = Utc::now();
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn chain(&self, key: &ChainKey) -> Option<&ChainRecord> {
        self.chains.get(key)
    }

    pub fn chains(&self) -> impl Iterator<Item = (&ChainKey, &ChainRecord)> {
        self.chains.iter()
    }

    pub fn chain_count(&self) -> usize {
        self.chains.len()
    }

    pub fn job(&self, job_id: &str) -> Option<&JobRecord> {
        self.jobs.get(job_id)
    }

    pub fn jobs(&self) -> impl Iterator<Item = &JobRecord> {
        self.jobs.values()
    }

    /// Classifiable chains whose `stage` currently has `status`
    pub fn keys_with_status(&self, stage: Stage, status: StageStatus) -> Vec<ChainKey> {
        self.chains
            .iter()
            .filter(|(_, c)| c.can_classify && c.stage_status(stage) == status)
            .map(|(k, _)| k.clone())
            .collect()
    }

    pub fn chains_needing_secondary_search(&self) -> Vec<ChainKey> {
        self.chains
            .iter()
            .filter(|(_, c)| {
                c.needs_secondary_search && c.secondary_search.status == StageStatus::Pending
            })
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Jobs of `job_type` not yet marked terminal
    pub fn live_jobs(&self, job_type: JobType) -> Vec<&JobRecord> {
        self.jobs
            .values()
            .filter(|j| j.job_type == job_type && j.is_live())
            .collect()
    }

    /// Chains that belong to a still-running job of `job_type`
    pub fn chains_in_live_jobs(&self, job_type: JobType) -> BTreeSet<ChainKey> {
        self.live_jobs(job_type)
            .into_iter()
            .flat_map(|j| j.chains.iter().cloned())
            .collect()
    }

    /// Finished jobs of `job_type` whose chains are still marked running.
    ///
    /// These are jobs a run stopped waiting on before it collected their
    /// reports. Chains since resubmitted to a live job do not count.
    pub fn uncollected_jobs(&self, job_type: JobType) -> Vec<&JobRecord> {
        let stage = job_type.stage();
        let live = self.chains_in_live_jobs(job_type);
        self.jobs
            .values()
            .filter(|j| j.job_type == job_type && !j.is_live())
            .filter(|j| {
                j.chains.iter().any(|k| {
                    !live.contains(k)
                        && self
                            .chains
                            .get(k)
                            .is_some_and(|c| c.stage_status(stage) == StageStatus::Running)
                })
            })
            .collect()
    }

    pub fn has_clustering(&self) -> bool {
        self.clustering.is_some()
    }

    pub fn summary(&self) -> BatchSummary {
        let mut quality = BTreeMap::new();
        for chain in self.chains.values() {
            if let Some(label) = chain.partition.quality {
                *quality.entry(label).or_insert(0) += 1;
            }
        }

        BatchSummary {
            batch_name: self.batch_info.batch_name.clone(),
            batch_kind: self.batch_info.batch_kind,
            reference_version: self.batch_info.reference_version.clone(),
            created: self.batch_info.created,
            counters: self.processing_status.clone(),
            unclassifiable: self.chains.values().filter(|c| !c.can_classify).count(),
            quality,
            live_jobs: self.jobs.values().filter(|j| j.is_live()).count(),
        }
    }

    // ========================================================================
    // Chain mutations
    // ========================================================================

    /// Add a chain found by enumeration.
    ///
    /// Re-adding a key that already exists keeps the existing record, so
    /// re-running enumeration on a resumed batch never resets progress.
    pub fn add_chain(&mut self, key: ChainKey, record: ChainRecord) -> &ChainRecord {
        if self.chains.contains_key(&key) {
            debug!(chain = %key, "Chain already in manifest, keeping existing record");
        } else {
            self.chains.insert(key.clone(), record);
            self.recount();
        }
        &self.chains[&key]
    }

    /// Record a finished primary search and decide the secondary-search branch.
    ///
    /// This is the only place the coverage threshold is applied: coverage
    /// strictly below the batch threshold needs the secondary search.
    pub fn mark_primary_search_complete(
        &mut self,
        key: &ChainKey,
        coverage: f64,
        artifacts: BTreeMap<String, String>,
    ) -> Result<&ChainRecord> {
        let threshold = self.batch_info.coverage_threshold;
        let coverage = coverage.clamp(0.0, 1.0);

        self.update(key, |chain| {
            if !chain.can_classify {
                return Err(invalid(key, "chain cannot be classified"));
            }
            chain.primary_search.status = StageStatus::Complete;
            chain.primary_search.coverage = Some(coverage);
            chain.primary_search.completed = Some(Utc::now());
            chain.primary_search.failure_reason = None;

            chain.needs_secondary_search = coverage < threshold;
            chain.secondary_search = SearchState::with_status(if chain.needs_secondary_search {
                StageStatus::Pending
            } else {
                StageStatus::NotNeeded
            });

            chain.files.extend(artifacts);
            Ok(())
        })
    }

    pub fn mark_secondary_search_complete(
        &mut self,
        key: &ChainKey,
        coverage: Option<f64>,
        artifacts: BTreeMap<String, String>,
    ) -> Result<&ChainRecord> {
        self.update(key, |chain| {
            if !chain.needs_secondary_search {
                return Err(invalid(key, "secondary search was not needed"));
            }
            chain.secondary_search.status = StageStatus::Complete;
            chain.secondary_search.coverage = coverage.map(|c| c.clamp(0.0, 1.0));
            chain.secondary_search.completed = Some(Utc::now());
            chain.secondary_search.failure_reason = None;
            chain.files.extend(artifacts);
            Ok(())
        })
    }

    /// Mark a stage as running for one chain (partitioning; searches go
    /// through [`record_job_submission`](Self::record_job_submission))
    pub fn mark_stage_running(&mut self, key: &ChainKey, stage: Stage) -> Result<&ChainRecord> {
        self.update(key, |chain| {
            if !chain.can_classify {
                return Err(invalid(key, "chain cannot be classified"));
            }
            set_status(chain, stage, StageStatus::Running);
            Ok(())
        })
    }

    pub fn mark_primary_search_running(&mut self, key: &ChainKey) -> Result<&ChainRecord> {
        self.mark_stage_running(key, Stage::PrimarySearch)
    }

    pub fn mark_secondary_search_running(&mut self, key: &ChainKey) -> Result<&ChainRecord> {
        self.update(key, |chain| {
            if !chain.needs_secondary_search {
                return Err(invalid(key, "secondary search was not needed"));
            }
            chain.secondary_search.status = StageStatus::Running;
            Ok(())
        })
    }

    pub fn mark_partition_running(&mut self, key: &ChainKey) -> Result<&ChainRecord> {
        self.mark_stage_running(key, Stage::Partition)
    }

    pub fn mark_stage_failed(
        &mut self,
        key: &ChainKey,
        stage: Stage,
        reason: impl Into<String>,
    ) -> Result<&ChainRecord> {
        let reason = reason.into();
        self.update(key, |chain| {
            set_status(chain, stage, StageStatus::Failed);
            match stage {
                Stage::PrimarySearch => chain.primary_search.failure_reason = Some(reason),
                Stage::SecondarySearch => chain.secondary_search.failure_reason = Some(reason),
                Stage::Partition => chain.partition.failure_reason = Some(reason),
            }
            Ok(())
        })
    }

    /// Put a running or failed stage back to pending so it is submitted again
    pub fn requeue_stage(&mut self, key: &ChainKey, stage: Stage) -> Result<&ChainRecord> {
        self.update(key, |chain| {
            let current = chain.stage_status(stage);
            if !matches!(current, StageStatus::Running | StageStatus::Failed) {
                return Err(invalid(key, format!("cannot requeue {} from {}", stage, current)));
            }
            set_status(chain, stage, StageStatus::Pending);
            Ok(())
        })
    }

    /// Record a per-chain artifact path, relative to the batch directory
    pub fn record_artifact(
        &mut self,
        key: &ChainKey,
        name: &str,
        path: impl Into<String>,
    ) -> Result<&ChainRecord> {
        let path = path.into();
        self.update(key, |chain| {
            chain.files.insert(name.to_string(), path);
            Ok(())
        })
    }

    /// Record the consolidated evidence file for a chain
    pub fn record_evidence(
        &mut self,
        key: &ChainKey,
        summary_path: impl Into<String>,
        note: Option<&str>,
    ) -> Result<&ChainRecord> {
        let summary_path = summary_path.into();
        self.update(key, |chain| {
            if chain.primary_search.status != StageStatus::Complete {
                return Err(invalid(key, "primary search is not complete"));
            }
            chain.files.insert(artifact::SUMMARY.to_string(), summary_path);
            chain.evidence_note = note.map(str::to_string);
            Ok(())
        })
    }

    pub fn mark_partition_complete(
        &mut self,
        key: &ChainKey,
        coverage: f64,
        domain_count: usize,
        quality: QualityLabel,
        algorithm_version: Option<String>,
        artifacts: BTreeMap<String, String>,
    ) -> Result<&ChainRecord> {
        self.update(key, |chain| {
            if !chain.has_consolidated_evidence() {
                return Err(invalid(key, "evidence has not been consolidated"));
            }
            chain.partition = PartitionState {
                status: StageStatus::Complete,
                coverage: Some(coverage.clamp(0.0, 1.0)),
                domain_count: Some(domain_count),
                quality: Some(quality),
                algorithm_version,
                completed: Some(Utc::now()),
                failure_reason: None,
            };
            chain.files.extend(artifacts);
            Ok(())
        })
    }

    pub fn set_reference_status(
        &mut self,
        key: &ChainKey,
        annotation: ReferenceAnnotation,
    ) -> Result<&ChainRecord> {
        self.update(key, |chain| {
            chain.reference = annotation;
            Ok(())
        })
    }

    // ========================================================================
    // Job mutations
    // ========================================================================

    /// Record a submitted array job and mark its chains running for the
    /// job's stage
    pub fn record_job_submission(
        &mut self,
        job_id: impl Into<String>,
        job_type: JobType,
        chains: Vec<ChainKey>,
        partition: impl Into<String>,
    ) -> Result<&JobRecord> {
        let job_id = job_id.into();
        for key in &chains {
            match self.chains.get(key) {
                None => return Err(PipelineError::chain_not_found(key)),
                Some(chain) if !chain.can_classify => {
                    return Err(invalid(key, "chain cannot be classified"))
                },
                Some(_) => {},
            }
        }

        let stage = job_type.stage();
        for key in &chains {
            if let Some(chain) = self.chains.get_mut(key) {
                set_status(chain, stage, StageStatus::Running);
            }
        }

        info!(job_id = %job_id, job_type = %job_type, chains = chains.len(), "Recorded job submission");
        self.jobs.insert(
            job_id.clone(),
            JobRecord {
                job_id: job_id.clone(),
                job_type,
                chains,
                partition: partition.into(),
                submitted: Utc::now(),
                status: JobStatus::Running,
                completed: None,
            },
        );
        self.recount();
        Ok(&self.jobs[&job_id])
    }

    pub fn mark_job_terminal(&mut self, job_id: &str, status: JobStatus) -> Result<&JobRecord> {
        let job = self
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| PipelineError::job_not_found(job_id))?;

        if status == JobStatus::Running {
            return Err(invalid(job_id, "terminal status cannot be running"));
        }
        job.status = status;
        job.completed = Some(Utc::now());
        Ok(job)
    }

    // ========================================================================
    // Clustering
    // ========================================================================

    /// Link chains to clusters for one (method, threshold) run.
    ///
    /// Any previous linkage is replaced. Chains absent from the manifest are
    /// skipped; a chain listed in two clusters rejects the whole input.
    pub fn assign_clusters(
        &mut self,
        method: ClusterMethod,
        threshold: f64,
        clusters: &[ClusterAssignment],
    ) -> Result<ClusterLoadReport> {
        let mut seen = BTreeSet::new();
        for cluster in clusters {
            for key in cluster.all_keys() {
                if !seen.insert(key.clone()) {
                    return Err(PipelineError::invalid_clustering(format!(
                        "chain {} appears in more than one cluster",
                        key
                    )));
                }
            }
        }

        for chain in self.chains.values_mut() {
            chain.cluster = None;
        }

        let mut report = ClusterLoadReport {
            clusters: clusters.len(),
            ..Default::default()
        };

        for cluster in clusters {
            if !self.chains.contains_key(&cluster.representative) {
                warn!(
                    cluster = %cluster.cluster_id,
                    representative = %cluster.representative,
                    "Representative not in batch, skipping cluster"
                );
                report.unknown_chains += 1 + cluster.members.len();
                continue;
            }

            if let Some(rep) = self.chains.get_mut(&cluster.representative) {
                rep.cluster = Some(ClusterLink {
                    cluster_id: cluster.cluster_id.clone(),
                    is_representative: true,
                    representative: cluster.representative.clone(),
                    similarity: Some(1.0),
                });
                report.representatives += 1;
            }

            for member in &cluster.members {
                match self.chains.get_mut(&member.key) {
                    Some(chain) => {
                        chain.cluster = Some(ClusterLink {
                            cluster_id: cluster.cluster_id.clone(),
                            is_representative: false,
                            representative: cluster.representative.clone(),
                            similarity: member.similarity,
                        });
                        report.members += 1;
                    },
                    None => {
                        debug!(chain = %member.key, "Cluster member not in batch");
                        report.unknown_chains += 1;
                    },
                }
            }
        }

        self.clustering = Some(ClusteringRun {
            method,
            threshold,
            cluster_count: report.representatives,
            loaded: Utc::now(),
        });

        info!(
            method = %method,
            threshold,
            clusters = report.representatives,
            members = report.members,
            skipped = report.unknown_chains,
            "Clustering loaded"
        );
        Ok(report)
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn update<F>(&mut self, key: &ChainKey, mutate: F) -> Result<&ChainRecord>
    where
        F: FnOnce(&mut ChainRecord) -> Result<()>,
    {
        let chain = self
            .chains
            .get_mut(key)
            .ok_or_else(|| PipelineError::chain_not_found(key))?;
        mutate(chain)?;
        self.recount();
        Ok(&self.chains[key])
    }

    fn recount(&mut self) {
        self.processing_status = ProcessingCounters::from_chains(self.chains.values());
    }

    pub(crate) fn insert_copied_chain(&mut self, key: ChainKey, record: ChainRecord) {
        self.chains.insert(key, record);
        self.recount();
    }
}

fn set_status(chain: &mut ChainRecord, stage: Stage, status: StageStatus) {
    match stage {
        Stage::PrimarySearch => chain.primary_search.status = status,
        Stage::SecondarySearch => chain.secondary_search.status = status,
        Stage::Partition => chain.partition.status = status,
    }
}

fn invalid(key: impl ToString, reason: impl Into<String>) -> PipelineError {
    PipelineError::InvalidTransition {
        key: key.to_string(),
        reason: reason.into(),
    }
}

/// Point-in-time view of batch progress for reporting
#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub batch_name: String,
    pub batch_kind: BatchKind,
    pub reference_version: String,
    pub created: DateTime<Utc>,
    pub counters: ProcessingCounters,
    pub unclassifiable: usize,
    pub quality: BTreeMap<QualityLabel, usize>,
    pub live_jobs: usize,
}

impl BatchSummary {
    fn pct(done: usize, total: usize) -> f64 {
        if total == 0 {
            return 0.0;
        }
        (done as f64 / total as f64 * 1000.0).round() / 10.0
    }

    pub fn primary_search_pct(&self) -> f64 {
        Self::pct(self.counters.primary_search_complete, self.counters.total_structures)
    }

    pub fn secondary_search_pct(&self) -> f64 {
        Self::pct(
            self.counters.secondary_search_complete,
            self.counters.secondary_search_needed,
        )
    }

    pub fn partition_pct(&self) -> f64 {
        Self::pct(self.counters.partition_complete, self.counters.total_structures)
    }
}
