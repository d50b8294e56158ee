//! Chain enumeration from a FASTA file
//!
//! Structure parsing happens upstream; the pipeline receives one record per
//! chain with a `>{pdb}_{chain}` header and decides here whether the chain
//! can be classified at all.

use crate::error::{PipelineError, Result};
use crate::manifest::{reason, BatchManifest, ChainRecord};
use ecod_common::types::ChainKey;
use std::path::Path;
use tracing::{debug, info, warn};

/// One chain read from the input FASTA
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainEntry {
    pub key: ChainKey,
    pub sequence: String,
}

impl ChainEntry {
    /// Build the manifest record, marking short or empty chains unclassifiable
    pub fn into_record(self, peptide_threshold: usize) -> (ChainKey, ChainRecord) {
        let length = self.sequence.chars().count();
        let cannot_classify = if length == 0 {
            Some(reason::NO_SEQUENCE)
        } else if length < peptide_threshold {
            Some(reason::PEPTIDE)
        } else {
            None
        };
        let record = ChainRecord::new(&self.key, self.sequence, cannot_classify);
        (self.key, record)
    }
}

/// Parse FASTA content; records with an unparsable header are skipped
pub fn parse_fasta(content: &str) -> Vec<ChainEntry> {
    let mut entries = Vec::new();
    let mut current: Option<ChainEntry> = None;

    for line in content.lines().map(str::trim) {
        if let Some(header) = line.strip_prefix('>') {
            entries.extend(current.take());
            let id = header.split_whitespace().next().unwrap_or_default();
            match id.parse::<ChainKey>() {
                Ok(key) => {
                    current = Some(ChainEntry {
                        key,
                        sequence: String::new(),
                    })
                },
                Err(e) => warn!(header, error = %e, "Skipping FASTA record with bad header"),
            }
        } else if let Some(entry) = current.as_mut() {
            entry
                .sequence
                .extend(line.chars().filter(|c| !c.is_whitespace()).map(|c| c.to_ascii_uppercase()));
        }
    }
    entries.extend(current);

    debug!(chains = entries.len(), "Parsed chain FASTA");
    entries
}

pub fn read_fasta(path: &Path) -> Result<Vec<ChainEntry>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| PipelineError::parse(path, format!("cannot read chain FASTA: {}", e)))?;
    Ok(parse_fasta(&content))
}

/// Counts from [`add_to_manifest`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnumerationReport {
    pub added: usize,
    pub existing: usize,
    pub unclassifiable: usize,
}

/// Add enumerated chains to a manifest; chains already present are kept as is
pub fn add_to_manifest(
    manifest: &mut BatchManifest,
    entries: Vec<ChainEntry>,
    peptide_threshold: usize,
) -> EnumerationReport {
    let mut report = EnumerationReport::default();
    for entry in entries {
        if manifest.chain(&entry.key).is_some() {
            report.existing += 1;
            continue;
        }
        let (key, record) = entry.into_record(peptide_threshold);
        if !record.can_classify {
            report.unclassifiable += 1;
        }
        manifest.add_chain(key, record);
        report.added += 1;
    }

    info!(
        added = report.added,
        existing = report.existing,
        unclassifiable = report.unclassifiable,
        "Chains enumerated"
    );
    report
}

/// Write a single-record FASTA file for one chain
pub fn write_chain_fasta(path: &Path, key: &ChainKey, sequence: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut content = format!(">{}\n", key);
    for line in sequence.as_bytes().chunks(80) {
        content.push_str(&String::from_utf8_lossy(line));
        content.push('\n');
    }
    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use ecod_common::types::StageStatus;
    use tempfile::TempDir;

    const INPUT: &str = "\
>8ABC_A mol:protein length:30
MKTAYIAKQRQISFVKSHFSRQ
LEERLGLI
>8abc_B
MKTAY
>8abc_C

>not-a-key
MKTAYIAKQR
";

    #[test]
    fn test_parse_fasta() {
        let entries = parse_fasta(INPUT);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].key.to_string(), "8abc_A");
        assert_eq!(entries[0].sequence.len(), 30);
        assert_eq!(entries[2].sequence, "");
    }

    #[test]
    fn test_classification() {
        let entries = parse_fasta(INPUT);
        let records: Vec<_> = entries.into_iter().map(|e| e.into_record(20).1).collect();

        assert!(records[0].can_classify);
        assert_eq!(records[0].primary_search.status, StageStatus::Pending);

        assert!(!records[1].can_classify);
        assert_eq!(records[1].cannot_classify_reason.as_deref(), Some(reason::PEPTIDE));

        assert_eq!(records[2].cannot_classify_reason.as_deref(), Some(reason::NO_SEQUENCE));
        assert_eq!(records[2].partition.status, StageStatus::NotNeeded);
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let entry = ChainEntry {
            key: "8abc_A".parse().unwrap(),
            sequence: "M".repeat(20),
        };
        assert!(entry.into_record(20).1.can_classify);
    }

    #[test]
    fn test_add_to_manifest_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let mut manifest = BatchManifest::empty(temp.path());

        let first = add_to_manifest(&mut manifest, parse_fasta(INPUT), 20);
        assert_eq!(first.added, 3);
        assert_eq!(first.unclassifiable, 2);
        assert_eq!(manifest.processing_status.total_structures, 1);

        let second = add_to_manifest(&mut manifest, parse_fasta(INPUT), 20);
        assert_eq!(second.added, 0);
        assert_eq!(second.existing, 3);
        assert_eq!(manifest.chain_count(), 3);
    }

    #[test]
    fn test_write_chain_fasta() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("fastas/8abc_A.fa");
        let key: ChainKey = "8abc_A".parse().unwrap();

        write_chain_fasta(&path, &key, &"M".repeat(100)).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = written.lines().collect();
        assert_eq!(lines[0], ">8abc_A");
        assert_eq!(lines[1].len(), 80);
        assert_eq!(lines[2].len(), 20);

        let back = parse_fasta(&written);
        assert_eq!(back[0].sequence.len(), 100);
    }
}
