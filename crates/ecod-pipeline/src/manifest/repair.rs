//! Repair batches
//!
//! A repair batch re-runs chains that failed or partitioned poorly in earlier
//! batches. Chains are copied out of the source manifests with their
//! partition state reset; artifacts that are kept point back into the source
//! batch directories by absolute path.

use super::{artifact, BatchManifest, ChainRecord, PartitionState, SearchState};
use crate::error::{PipelineError, Result};
use ecod_common::types::{BatchKind, QualityLabel, StageStatus, GOOD_COVERAGE};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info};

/// Which chains of the source batches go into the repair batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairSelection {
    /// Any stage failed
    Failed,
    /// Partitioned, but with coverage below the good-quality cut-off
    LowQuality,
    /// Every classifiable chain
    All,
}

impl RepairSelection {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepairSelection::Failed => "failed",
            RepairSelection::LowQuality => "low_quality",
            RepairSelection::All => "all",
        }
    }

    pub fn selects(&self, chain: &ChainRecord) -> bool {
        if !chain.can_classify {
            return false;
        }
        match self {
            RepairSelection::Failed => chain.has_failure(),
            RepairSelection::LowQuality => {
                chain.partition.status == StageStatus::Complete
                    && (chain.partition.coverage.is_some_and(|c| c < GOOD_COVERAGE)
                        || matches!(
                            chain.partition.quality,
                            Some(QualityLabel::LowCoverage | QualityLabel::Fragmentary)
                        ))
            },
            RepairSelection::All => true,
        }
    }
}

impl FromStr for RepairSelection {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "failed" => Ok(RepairSelection::Failed),
            "low_quality" => Ok(RepairSelection::LowQuality),
            "all" => Ok(RepairSelection::All),
            other => Err(PipelineError::config(format!(
                "unknown repair selection '{}' (expected failed, low_quality or all)",
                other
            ))),
        }
    }
}

impl std::fmt::Display for RepairSelection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct RepairOptions {
    pub selection: RepairSelection,
    /// Also reset the search stages so both searches run again
    pub rerun_searches: bool,
}

/// Build a repair batch in `batch_dir` from the given source batch directories.
///
/// The new manifest is saved before returning. A chain that appears in more
/// than one source is taken from the first source listing it.
pub fn create_repair_batch(
    batch_dir: &Path,
    batch_name: &str,
    sources: &[PathBuf],
    options: &RepairOptions,
) -> Result<BatchManifest> {
    if sources.is_empty() {
        return Err(PipelineError::config("a repair batch needs at least one source batch"));
    }

    let first = BatchManifest::load(&sources[0])?;
    let mut repair = BatchManifest::empty(batch_dir);
    repair.initialize(
        batch_name,
        BatchKind::Repair,
        None,
        first.batch_info.reference_version.clone(),
        first.coverage_threshold(),
    );
    repair.directories().create_all()?;

    for source_dir in sources {
        let source = BatchManifest::load(source_dir)?;
        if source.chain_count() == 0 {
            return Err(PipelineError::persistence(
                source.path(),
                "source batch has no manifest or no chains",
            ));
        }

        let source_dirs = source.directories();
        let mut taken = 0usize;
        for (key, chain) in source.chains() {
            if !options.selection.selects(chain) {
                continue;
            }
            if repair.chain(key).is_some() {
                debug!(chain = %key, source = source.batch_name(), "Chain already taken from an earlier source");
                continue;
            }

            let mut record = chain.clone();
            reset_for_repair(&mut record, options.rerun_searches);
            for path in record.files.values_mut() {
                *path = source_dirs.resolve(path).to_string_lossy().into_owned();
            }
            record.source_batch = Some(source.batch_name().to_string());

            repair.insert_copied_chain(key.clone(), record);
            taken += 1;
        }

        info!(source = source.batch_name(), chains = taken, selection = %options.selection, "Selected chains for repair");
        repair
            .batch_info
            .source_batches
            .push(source.batch_name().to_string());
    }

    repair.save()?;
    Ok(repair)
}

fn reset_for_repair(record: &mut ChainRecord, rerun_searches: bool) {
    record.partition = PartitionState {
        status: StageStatus::Pending,
        ..Default::default()
    };
    record.evidence_note = None;
    record.files.remove(artifact::SUMMARY);
    record.files.remove(artifact::PARTITION);

    if rerun_searches || record.primary_search.status != StageStatus::Complete {
        record.primary_search = SearchState::with_status(StageStatus::Pending);
        record.needs_secondary_search = false;
        record.secondary_search = SearchState::with_status(StageStatus::NotNeeded);
        for name in [artifact::CHAIN_BLAST, artifact::DOMAIN_BLAST, artifact::HHSEARCH] {
            record.files.remove(name);
        }
    } else if record.secondary_search.status != StageStatus::Complete
        && record.needs_secondary_search
    {
        record.secondary_search = SearchState::with_status(StageStatus::Pending);
        record.files.remove(artifact::HHSEARCH);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use ecod_common::types::{ChainKey, Stage};
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn key(s: &str) -> ChainKey {
        s.parse().unwrap()
    }

    fn source_batch(dir: &Path) -> BatchManifest {
        let mut manifest = BatchManifest::empty(dir);
        manifest.initialize("ecod_weekly_20251003", BatchKind::Weekly, None, "develop291", 0.9);
        for k in ["8abc_A", "8abc_B", "8abc_C"] {
            let k = key(k);
            manifest.add_chain(k.clone(), ChainRecord::new(&k, "M".repeat(80), None));
        }

        let files = BTreeMap::from([(
            artifact::CHAIN_BLAST.to_string(),
            "blast/8abc_B.chain_blast.xml".to_string(),
        )]);
        manifest.mark_stage_failed(&key("8abc_A"), Stage::PrimarySearch, "report missing").unwrap();

        manifest.mark_primary_search_complete(&key("8abc_B"), 0.95, files).unwrap();
        manifest.record_evidence(&key("8abc_B"), "summaries/8abc_B.summary.xml", None).unwrap();
        manifest
            .mark_partition_complete(&key("8abc_B"), 0.4, 1, QualityLabel::Fragmentary, None, BTreeMap::new())
            .unwrap();

        manifest.mark_primary_search_complete(&key("8abc_C"), 0.95, BTreeMap::new()).unwrap();
        manifest.record_evidence(&key("8abc_C"), "summaries/8abc_C.summary.xml", None).unwrap();
        manifest
            .mark_partition_complete(&key("8abc_C"), 0.92, 2, QualityLabel::Good, None, BTreeMap::new())
            .unwrap();
        manifest.save().unwrap();
        manifest
    }

    #[test]
    fn test_failed_selection_resets_failed_search() {
        let temp = TempDir::new().unwrap();
        let source_dir = temp.path().join("ecod_weekly_20251003");
        source_batch(&source_dir);

        let options = RepairOptions {
            selection: RepairSelection::Failed,
            rerun_searches: false,
        };
        let repair =
            create_repair_batch(&temp.path().join("repair_1"), "repair_1", &[source_dir], &options)
                .unwrap();

        assert_eq!(repair.chain_count(), 1);
        let chain = repair.chain(&key("8abc_A")).unwrap();
        assert_eq!(chain.primary_search.status, StageStatus::Pending);
        assert_eq!(chain.source_batch.as_deref(), Some("ecod_weekly_20251003"));
        assert_eq!(repair.batch_info.batch_kind, BatchKind::Repair);
        assert_eq!(repair.batch_info.source_batches, vec!["ecod_weekly_20251003"]);
        assert!(repair.path().exists());
    }

    #[test]
    fn test_low_quality_keeps_search_results() {
        let temp = TempDir::new().unwrap();
        let source_dir = temp.path().join("ecod_weekly_20251003");
        source_batch(&source_dir);

        let options = RepairOptions {
            selection: RepairSelection::LowQuality,
            rerun_searches: false,
        };
        let repair = create_repair_batch(
            &temp.path().join("repair_2"),
            "repair_2",
            &[source_dir.clone()],
            &options,
        )
        .unwrap();

        assert_eq!(repair.chain_count(), 1);
        let chain = repair.chain(&key("8abc_B")).unwrap();
        assert_eq!(chain.primary_search.status, StageStatus::Complete);
        assert_eq!(chain.partition.status, StageStatus::Pending);
        assert!(chain.file(artifact::SUMMARY).is_none());

        let blast = chain.file(artifact::CHAIN_BLAST).unwrap();
        assert_eq!(
            PathBuf::from(blast),
            source_dir.join("blast/8abc_B.chain_blast.xml")
        );
    }

    #[test]
    fn test_rerun_searches_resets_everything() {
        let temp = TempDir::new().unwrap();
        let source_dir = temp.path().join("ecod_weekly_20251003");
        source_batch(&source_dir);

        let options = RepairOptions {
            selection: RepairSelection::All,
            rerun_searches: true,
        };
        let repair =
            create_repair_batch(&temp.path().join("repair_3"), "repair_3", &[source_dir], &options)
                .unwrap();

        assert_eq!(repair.processing_status.total_structures, 3);
        assert_eq!(repair.processing_status.primary_search_complete, 0);
        assert_eq!(repair.processing_status.partition_complete, 0);
    }

    #[test]
    fn test_missing_source_is_an_error() {
        let temp = TempDir::new().unwrap();
        let options = RepairOptions {
            selection: RepairSelection::Failed,
            rerun_searches: false,
        };
        let result = create_repair_batch(
            &temp.path().join("repair_4"),
            "repair_4",
            &[temp.path().join("nope")],
            &options,
        );
        assert!(matches!(result, Err(PipelineError::Persistence { .. })));
    }

    #[test]
    fn test_selection_parsing() {
        assert_eq!("low-quality".parse::<RepairSelection>().unwrap(), RepairSelection::LowQuality);
        assert!("broken".parse::<RepairSelection>().is_err());
    }
}
