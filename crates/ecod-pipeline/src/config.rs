//! Pipeline configuration
//!
//! Loaded from `ECOD_*` environment variables (a `.env` file is honoured by
//! the binary) with production defaults. Command-line flags override
//! individual fields after loading.

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

// ============================================================================
// Defaults
// ============================================================================

pub const DEFAULT_BATCH_ROOT: &str = "/data/ecod/pdb_updates/batches";
pub const DEFAULT_REFERENCE_VERSION: &str = "develop291";

/// Primary-search coverage at or above this skips the secondary search
pub const DEFAULT_COVERAGE_THRESHOLD: f64 = 0.90;

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_SLURM_PARTITION: &str = "96GB";
pub const DEFAULT_ARRAY_LIMIT: u32 = 500;
pub const DEFAULT_PARTITION_TIMEOUT_SECS: u64 = 300;

/// Chains shorter than this are peptides and are not classified
pub const DEFAULT_PEPTIDE_THRESHOLD: usize = 20;

/// Which scheduler executes array jobs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerBackend {
    #[default]
    Slurm,
    /// Runs array tasks one after another on this machine
    Local,
}

impl SchedulerBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Slurm => "slurm",
            Self::Local => "local",
        }
    }
}

impl fmt::Display for SchedulerBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SchedulerBackend {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "slurm" => Ok(Self::Slurm),
            "local" => Ok(Self::Local),
            other => Err(PipelineError::config(format!(
                "unknown scheduler backend '{}' (expected slurm or local)",
                other
            ))),
        }
    }
}

/// What consolidation does with a chain whose secondary search failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SecondaryFailurePolicy {
    /// Consolidate primary evidence only and record a note on the chain
    #[default]
    FallbackToPrimary,
    /// Mark the chain's partition stage failed
    FailChain,
}

impl SecondaryFailurePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FallbackToPrimary => "fallback_to_primary",
            Self::FailChain => "fail_chain",
        }
    }
}

impl fmt::Display for SecondaryFailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SecondaryFailurePolicy {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "fallback_to_primary" | "fallback" => Ok(Self::FallbackToPrimary),
            "fail_chain" | "fail" => Ok(Self::FailChain),
            other => Err(PipelineError::config(format!(
                "unknown secondary failure policy '{}'",
                other
            ))),
        }
    }
}

/// BLAST settings for the primary search
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlastSettings {
    pub program: String,
    pub chain_db: PathBuf,
    pub domain_db: PathBuf,
    pub evalue: f64,
    pub max_alignments: u32,
}

impl Default for BlastSettings {
    fn default() -> Self {
        Self {
            program: "blastp".to_string(),
            chain_db: PathBuf::from("/data/ecod/database_versions/v291/chainwise100.develop291"),
            domain_db: PathBuf::from("/data/ecod/database_versions/v291/ecod100.develop291"),
            evalue: 0.002,
            max_alignments: 5000,
        }
    }
}

/// HHsearch settings for the secondary search
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HhsearchSettings {
    pub program: String,
    pub database: PathBuf,
    pub evalue: f64,
    pub min_probability: u32,
    pub max_hits: u32,
}

impl Default for HhsearchSettings {
    fn default() -> Self {
        Self {
            program: "hhsearch".to_string(),
            database: PathBuf::from("/data/ecod/database_versions/v291/ecod_v291_hhm"),
            evalue: 0.001,
            min_probability: 50,
            max_hits: 5000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Directory holding one sub-directory per batch
    pub batch_root: PathBuf,

    /// ECOD reference the partitioner classifies against
    pub reference_version: String,

    pub coverage_threshold: f64,

    pub poll_interval_secs: u64,

    /// Give up waiting on an array job after this long (treated as failure)
    pub wait_timeout_secs: Option<u64>,

    pub scheduler: SchedulerBackend,
    pub slurm_partition: String,
    pub array_limit: u32,

    pub blast: BlastSettings,
    pub hhsearch: HhsearchSettings,

    pub partitioner_program: String,
    pub partition_timeout_secs: u64,

    pub peptide_threshold: usize,
    pub secondary_failure_policy: SecondaryFailurePolicy,

    /// `domain_id<TAB>family` table used to label evidence hits
    pub family_lookup: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_root: PathBuf::from(DEFAULT_BATCH_ROOT),
            reference_version: DEFAULT_REFERENCE_VERSION.to_string(),
            coverage_threshold: DEFAULT_COVERAGE_THRESHOLD,
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            wait_timeout_secs: None,
            scheduler: SchedulerBackend::default(),
            slurm_partition: DEFAULT_SLURM_PARTITION.to_string(),
            array_limit: DEFAULT_ARRAY_LIMIT,
            blast: BlastSettings::default(),
            hhsearch: HhsearchSettings::default(),
            partitioner_program: "pyecod-mini".to_string(),
            partition_timeout_secs: DEFAULT_PARTITION_TIMEOUT_SECS,
            peptide_threshold: DEFAULT_PEPTIDE_THRESHOLD,
            secondary_failure_policy: SecondaryFailurePolicy::default(),
            family_lookup: None,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from environment variables and validate it
    ///
    /// Recognised variables: `ECOD_BATCH_ROOT`, `ECOD_REFERENCE_VERSION`,
    /// `ECOD_COVERAGE_THRESHOLD`, `ECOD_POLL_INTERVAL_SECS`,
    /// `ECOD_WAIT_TIMEOUT_SECS`, `ECOD_SCHEDULER`, `ECOD_SLURM_PARTITION`,
    /// `ECOD_ARRAY_LIMIT`, `ECOD_BLAST_CHAIN_DB`, `ECOD_BLAST_DOMAIN_DB`,
    /// `ECOD_HHSEARCH_DB`, `ECOD_PARTITIONER`, `ECOD_PARTITION_TIMEOUT_SECS`,
    /// `ECOD_PEPTIDE_THRESHOLD`, `ECOD_SECONDARY_FAILURE_POLICY`,
    /// `ECOD_FAMILY_LOOKUP`.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(root) = std::env::var("ECOD_BATCH_ROOT") {
            config.batch_root = PathBuf::from(root);
        }
        if let Ok(version) = std::env::var("ECOD_REFERENCE_VERSION") {
            config.reference_version = version;
        }
        config.coverage_threshold = env_parse("ECOD_COVERAGE_THRESHOLD", config.coverage_threshold)?;
        config.poll_interval_secs = env_parse("ECOD_POLL_INTERVAL_SECS", config.poll_interval_secs)?;
        if let Ok(timeout) = std::env::var("ECOD_WAIT_TIMEOUT_SECS") {
            config.wait_timeout_secs = Some(parse_value("ECOD_WAIT_TIMEOUT_SECS", &timeout)?);
        }
        if let Ok(backend) = std::env::var("ECOD_SCHEDULER") {
            config.scheduler = backend.parse()?;
        }
        if let Ok(partition) = std::env::var("ECOD_SLURM_PARTITION") {
            config.slurm_partition = partition;
        }
        config.array_limit = env_parse("ECOD_ARRAY_LIMIT", config.array_limit)?;
        if let Ok(db) = std::env::var("ECOD_BLAST_CHAIN_DB") {
            config.blast.chain_db = PathBuf::from(db);
        }
        if let Ok(db) = std::env::var("ECOD_BLAST_DOMAIN_DB") {
            config.blast.domain_db = PathBuf::from(db);
        }
        if let Ok(db) = std::env::var("ECOD_HHSEARCH_DB") {
            config.hhsearch.database = PathBuf::from(db);
        }
        if let Ok(program) = std::env::var("ECOD_PARTITIONER") {
            config.partitioner_program = program;
        }
        config.partition_timeout_secs =
            env_parse("ECOD_PARTITION_TIMEOUT_SECS", config.partition_timeout_secs)?;
        config.peptide_threshold = env_parse("ECOD_PEPTIDE_THRESHOLD", config.peptide_threshold)?;
        if let Ok(policy) = std::env::var("ECOD_SECONDARY_FAILURE_POLICY") {
            config.secondary_failure_policy = policy.parse()?;
        }
        if let Ok(lookup) = std::env::var("ECOD_FAMILY_LOOKUP") {
            config.family_lookup = Some(PathBuf::from(lookup));
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.coverage_threshold) {
            return Err(PipelineError::config(format!(
                "coverage threshold must be within [0, 1], got {}",
                self.coverage_threshold
            )));
        }
        if self.poll_interval_secs == 0 {
            return Err(PipelineError::config("ECOD_POLL_INTERVAL_SECS must be greater than 0"));
        }
        if self.array_limit == 0 {
            return Err(PipelineError::config("ECOD_ARRAY_LIMIT must be greater than 0"));
        }
        if self.slurm_partition.trim().is_empty() {
            return Err(PipelineError::config("ECOD_SLURM_PARTITION cannot be empty"));
        }
        if self.partition_timeout_secs == 0 {
            return Err(PipelineError::config(
                "ECOD_PARTITION_TIMEOUT_SECS must be greater than 0",
            ));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn wait_timeout(&self) -> Option<Duration> {
        self.wait_timeout_secs.map(Duration::from_secs)
    }

    pub fn partition_timeout(&self) -> Duration {
        Duration::from_secs(self.partition_timeout_secs)
    }

    pub fn batch_dir(&self, batch_name: &str) -> PathBuf {
        self.batch_root.join(batch_name)
    }
}

fn env_parse<T: FromStr>(name: &str, default: T) -> Result<T> {
    match std::env::var(name) {
        Ok(raw) => parse_value(name, &raw),
        Err(_) => Ok(default),
    }
}

fn parse_value<T: FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| PipelineError::config(format!("{} has an invalid value '{}'", name, raw)))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for key in [
            "ECOD_BATCH_ROOT",
            "ECOD_COVERAGE_THRESHOLD",
            "ECOD_POLL_INTERVAL_SECS",
            "ECOD_WAIT_TIMEOUT_SECS",
            "ECOD_SCHEDULER",
            "ECOD_SECONDARY_FAILURE_POLICY",
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.coverage_threshold, 0.90);
        assert_eq!(config.slurm_partition, "96GB");
        assert_eq!(config.partition_timeout(), Duration::from_secs(300));
        assert!(config.wait_timeout().is_none());
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        clear_env();
        std::env::set_var("ECOD_BATCH_ROOT", "/scratch/batches");
        std::env::set_var("ECOD_COVERAGE_THRESHOLD", "0.85");
        std::env::set_var("ECOD_WAIT_TIMEOUT_SECS", "7200");
        std::env::set_var("ECOD_SCHEDULER", "local");
        std::env::set_var("ECOD_SECONDARY_FAILURE_POLICY", "fail_chain");

        let config = PipelineConfig::from_env().unwrap();
        assert_eq!(config.batch_root, PathBuf::from("/scratch/batches"));
        assert_eq!(config.coverage_threshold, 0.85);
        assert_eq!(config.wait_timeout(), Some(Duration::from_secs(7200)));
        assert_eq!(config.scheduler, SchedulerBackend::Local);
        assert_eq!(config.secondary_failure_policy, SecondaryFailurePolicy::FailChain);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_garbage() {
        clear_env();
        std::env::set_var("ECOD_POLL_INTERVAL_SECS", "often");
        assert!(matches!(
            PipelineConfig::from_env(),
            Err(PipelineError::Config(_))
        ));
        clear_env();
    }

    #[test]
    fn test_enum_names_parse_back() {
        for backend in [SchedulerBackend::Slurm, SchedulerBackend::Local] {
            assert_eq!(backend.to_string().parse::<SchedulerBackend>().unwrap(), backend);
        }
        assert_eq!(SchedulerBackend::Slurm.to_string(), "slurm");
        assert_eq!(SecondaryFailurePolicy::FailChain.to_string(), "fail_chain");
    }

    #[test]
    fn test_validate_threshold_range() {
        let config = PipelineConfig {
            coverage_threshold: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
