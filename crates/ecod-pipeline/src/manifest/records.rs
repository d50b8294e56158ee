//! Typed records stored in a batch manifest

use chrono::{DateTime, Utc};
use ecod_common::types::{BatchKind, ChainKey, EcodStatus, QualityLabel, Stage, StageStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Artifact names used in [`ChainRecord::files`]
pub mod artifact {
    pub const FASTA: &str = "fasta";
    pub const CHAIN_BLAST: &str = "chain_blast";
    pub const DOMAIN_BLAST: &str = "domain_blast";
    pub const HHSEARCH: &str = "hhsearch";
    pub const SUMMARY: &str = "summary";
    pub const PARTITION: &str = "partition";
}

/// Note recorded when evidence was consolidated without secondary-search hits
pub const SECONDARY_FALLBACK_NOTE: &str = "secondary_search_failed";

/// Why a chain was excluded from classification
pub mod reason {
    pub const PEPTIDE: &str = "peptide";
    pub const NO_SEQUENCE: &str = "no_sequence";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchInfo {
    pub batch_name: String,
    #[serde(default)]
    pub batch_kind: BatchKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_date: Option<String>,
    pub reference_version: String,
    pub coverage_threshold: f64,
    pub created: DateTime<Utc>,
    /// Batches a repair batch drew its chains from
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_batches: Vec<String>,
}

/// Aggregate counters, always recomputed from the chain records
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingCounters {
    pub total_structures: usize,
    pub primary_search_complete: usize,
    pub secondary_search_needed: usize,
    pub secondary_search_complete: usize,
    pub partition_complete: usize,
    pub failed: usize,
}

impl ProcessingCounters {
    pub fn from_chains<'a>(chains: impl Iterator<Item = &'a ChainRecord>) -> Self {
        let mut counters = Self::default();
        for chain in chains.filter(|c| c.can_classify) {
            counters.total_structures += 1;
            if chain.primary_search.status == StageStatus::Complete {
                counters.primary_search_complete += 1;
            }
            if chain.needs_secondary_search {
                counters.secondary_search_needed += 1;
            }
            if chain.secondary_search.status == StageStatus::Complete {
                counters.secondary_search_complete += 1;
            }
            if chain.partition.status == StageStatus::Complete {
                counters.partition_complete += 1;
            }
            if chain.has_failure() {
                counters.failed += 1;
            }
        }
        counters
    }
}

/// Progress of one search stage
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchState {
    pub status: StageStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coverage: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl SearchState {
    pub(crate) fn with_status(status: StageStatus) -> Self {
        Self {
            status,
            ..Default::default()
        }
    }
}

/// Progress and result of the partition stage
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PartitionState {
    pub status: StageStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coverage: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<QualityLabel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub algorithm_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

/// Membership of a chain in a sequence cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterLink {
    pub cluster_id: String,
    pub is_representative: bool,
    pub representative: ChainKey,
    /// Sequence similarity to the representative (1.0 for the representative)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f64>,
}

/// Authoritative ECOD inclusion status for a chain
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReferenceAnnotation {
    #[serde(default)]
    pub ecod_status: EcodStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ecod_uid: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ecod_version: Option<String>,
}

impl ReferenceAnnotation {
    pub fn is_default(&self) -> bool {
        self.ecod_status.is_default()
    }
}

/// One chain of one batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainRecord {
    pub pdb_id: String,
    pub chain_id: String,
    pub sequence: String,
    pub sequence_length: usize,
    pub can_classify: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cannot_classify_reason: Option<String>,

    pub primary_search: SearchState,
    pub needs_secondary_search: bool,
    pub secondary_search: SearchState,
    pub partition: PartitionState,

    /// Set when consolidation had to work around a missing stage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence_note: Option<String>,

    /// Logical artifact name -> path relative to the batch directory
    #[serde(default)]
    pub files: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<ClusterLink>,

    #[serde(default)]
    pub reference: ReferenceAnnotation,

    /// Batch this chain was copied from (repair batches only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_batch: Option<String>,
}

impl ChainRecord {
    /// New record as created by enumeration.
    ///
    /// Unclassifiable chains start with every stage `not_needed`.
    pub fn new(key: &ChainKey, sequence: impl Into<String>, cannot_classify: Option<&str>) -> Self {
        let sequence = sequence.into();
        let can_classify = cannot_classify.is_none();
        let initial = if can_classify {
            StageStatus::Pending
        } else {
            StageStatus::NotNeeded
        };

        Self {
            pdb_id: key.pdb_id().to_string(),
            chain_id: key.chain_id().to_string(),
            sequence_length: sequence.chars().count(),
            sequence,
            can_classify,
            cannot_classify_reason: cannot_classify.map(str::to_string),
            primary_search: SearchState::with_status(initial),
            needs_secondary_search: false,
            secondary_search: SearchState::with_status(StageStatus::NotNeeded),
            partition: PartitionState {
                status: initial,
                ..Default::default()
            },
            evidence_note: None,
            files: BTreeMap::new(),
            cluster: None,
            reference: ReferenceAnnotation::default(),
            source_batch: None,
        }
    }

    pub fn stage_status(&self, stage: Stage) -> StageStatus {
        match stage {
            Stage::PrimarySearch => self.primary_search.status,
            Stage::SecondarySearch => self.secondary_search.status,
            Stage::Partition => self.partition.status,
        }
    }

    pub fn has_failure(&self) -> bool {
        [Stage::PrimarySearch, Stage::SecondarySearch, Stage::Partition]
            .iter()
            .any(|s| self.stage_status(*s) == StageStatus::Failed)
    }

    /// Search stages are done (or given up on with the fallback recorded)
    pub fn searches_settled(&self) -> bool {
        self.primary_search.status == StageStatus::Complete
            && (self.secondary_search.status.is_settled() || self.used_secondary_fallback())
    }

    pub fn used_secondary_fallback(&self) -> bool {
        self.secondary_search.status == StageStatus::Failed
            && self.evidence_note.as_deref() == Some(SECONDARY_FALLBACK_NOTE)
    }

    pub fn has_consolidated_evidence(&self) -> bool {
        self.searches_settled() && self.files.contains_key(artifact::SUMMARY)
    }

    pub fn file(&self, name: &str) -> Option<&str> {
        self.files.get(name).map(String::as_str)
    }

    pub fn is_cluster_member(&self) -> bool {
        self.cluster.as_ref().is_some_and(|c| !c.is_representative)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    PrimarySearch,
    SecondarySearch,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::PrimarySearch => "primary_search",
            JobType::SecondarySearch => "secondary_search",
        }
    }

    pub fn stage(&self) -> Stage {
        match self {
            JobType::PrimarySearch => Stage::PrimarySearch,
            JobType::SecondarySearch => Stage::SecondarySearch,
        }
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
}

/// One external array job submitted for a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: String,
    pub job_type: JobType,
    pub chains: Vec<ChainKey>,
    pub partition: String,
    pub submitted: DateTime<Utc>,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<DateTime<Utc>>,
}

impl JobRecord {
    pub fn is_live(&self) -> bool {
        self.status == JobStatus::Running
    }
}
