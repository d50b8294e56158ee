//! Domain types shared by the batch pipeline and its tooling

use crate::error::EcodError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Chain identity
// ============================================================================

/// Identity of one chain: `{pdb_id}_{chain_id}`.
///
/// PDB ids are normalised to lowercase. Chain ids are case-sensitive
/// (`A` and `a` are different chains in large assemblies).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChainKey {
    pdb_id: String,
    chain_id: String,
}

impl ChainKey {
    pub fn new(pdb_id: impl AsRef<str>, chain_id: impl Into<String>) -> crate::Result<Self> {
        let pdb_id = pdb_id.as_ref().trim().to_lowercase();
        let chain_id = chain_id.into().trim().to_string();

        let valid = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric());
        if !valid(&pdb_id) || !valid(&chain_id) {
            return Err(EcodError::InvalidChainKey(format!("{}_{}", pdb_id, chain_id)));
        }

        Ok(Self { pdb_id, chain_id })
    }

    pub fn pdb_id(&self) -> &str {
        &self.pdb_id
    }

    pub fn chain_id(&self) -> &str {
        &self.chain_id
    }

    /// File stem used for every per-chain artifact (`8abc_A.fa`, `8abc_A.hhr`, ...)
    pub fn file_stem(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ChainKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.pdb_id, self.chain_id)
    }
}

impl FromStr for ChainKey {
    type Err = EcodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (pdb_id, chain_id) = s
            .trim()
            .split_once('_')
            .ok_or_else(|| EcodError::InvalidChainKey(s.to_string()))?;
        Self::new(pdb_id, chain_id).map_err(|_| EcodError::InvalidChainKey(s.to_string()))
    }
}

impl TryFrom<String> for ChainKey {
    type Error = EcodError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ChainKey> for String {
    fn from(key: ChainKey) -> Self {
        key.to_string()
    }
}

// ============================================================================
// Stage status
// ============================================================================

/// Processing stages a chain moves through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    PrimarySearch,
    SecondarySearch,
    Partition,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::PrimarySearch => "primary_search",
            Stage::SecondarySearch => "secondary_search",
            Stage::Partition => "partition",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of one stage for one chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    #[default]
    Pending,
    Running,
    Complete,
    Failed,
    NotNeeded,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Pending => "pending",
            StageStatus::Running => "running",
            StageStatus::Complete => "complete",
            StageStatus::Failed => "failed",
            StageStatus::NotNeeded => "not_needed",
        }
    }

    /// Complete or not needed: nothing left to do for this stage
    pub fn is_settled(&self) -> bool {
        matches!(self, StageStatus::Complete | StageStatus::NotNeeded)
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageStatus {
    type Err = EcodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(StageStatus::Pending),
            "running" => Ok(StageStatus::Running),
            "complete" => Ok(StageStatus::Complete),
            "failed" => Ok(StageStatus::Failed),
            "not_needed" => Ok(StageStatus::NotNeeded),
            other => Err(EcodError::unknown_variant("stage status", other)),
        }
    }
}

// ============================================================================
// Partition quality
// ============================================================================

/// Minimum partition coverage for a `good` label
pub const GOOD_COVERAGE: f64 = 0.80;

/// Minimum partition coverage for a `low_coverage` label
pub const LOW_COVERAGE: f64 = 0.50;

/// Coarse quality label derived from partition coverage and domain count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityLabel {
    Good,
    LowCoverage,
    Fragmentary,
    NoDomains,
}

impl QualityLabel {
    /// Production quality policy.
    ///
    /// A partition without domains is `no_domains` whatever its coverage.
    pub fn assess(domain_count: usize, coverage: f64) -> Self {
        if domain_count == 0 {
            QualityLabel::NoDomains
        } else if coverage >= GOOD_COVERAGE {
            QualityLabel::Good
        } else if coverage >= LOW_COVERAGE {
            QualityLabel::LowCoverage
        } else {
            QualityLabel::Fragmentary
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QualityLabel::Good => "good",
            QualityLabel::LowCoverage => "low_coverage",
            QualityLabel::Fragmentary => "fragmentary",
            QualityLabel::NoDomains => "no_domains",
        }
    }
}

impl fmt::Display for QualityLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Reference (ECOD) status
// ============================================================================

/// Whether a chain is already part of the ECOD reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EcodStatus {
    #[default]
    NotInEcod,
    InCurrentEcod,
    InPreviousEcod,
}

impl EcodStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EcodStatus::NotInEcod => "not_in_ecod",
            EcodStatus::InCurrentEcod => "in_current_ecod",
            EcodStatus::InPreviousEcod => "in_previous_ecod",
        }
    }

    pub fn is_default(&self) -> bool {
        *self == EcodStatus::NotInEcod
    }
}

impl fmt::Display for EcodStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EcodStatus {
    type Err = EcodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "not_in_ecod" => Ok(EcodStatus::NotInEcod),
            "in_current_ecod" => Ok(EcodStatus::InCurrentEcod),
            "in_previous_ecod" => Ok(EcodStatus::InPreviousEcod),
            other => Err(EcodError::unknown_variant("ecod status", other)),
        }
    }
}

// ============================================================================
// Batch kind
// ============================================================================

/// Regular weekly batch or a repair batch built from earlier batches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchKind {
    #[default]
    Weekly,
    Repair,
}

impl BatchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchKind::Weekly => "weekly",
            BatchKind::Repair => "repair",
        }
    }
}

impl fmt::Display for BatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
