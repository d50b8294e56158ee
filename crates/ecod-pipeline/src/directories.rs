//! On-disk layout of a batch directory
//!
//! ```text
//! ecod_weekly_20251010/
//! ├── batch_manifest.yaml
//! ├── fastas/       8abc_A.fa
//! ├── blast/        8abc_A.chain_blast.xml, 8abc_A.domain_blast.xml
//! ├── hhsearch/     8abc_A.hhr
//! ├── summaries/    8abc_A.summary.xml
//! ├── partitions/   8abc_A.partition.xml
//! ├── slurm_logs/
//! └── scripts/
//! ```
//!
//! Artifact paths stored in the manifest are relative to the batch root so a
//! batch directory can be moved without rewriting its manifest.

use chrono::NaiveDate;
use ecod_common::types::ChainKey;
use std::path::{Path, PathBuf};

pub const MANIFEST_FILE: &str = "batch_manifest.yaml";

const SUBDIRS: [&str; 7] = [
    "fastas",
    "blast",
    "hhsearch",
    "summaries",
    "partitions",
    "slurm_logs",
    "scripts",
];

#[derive(Debug, Clone)]
pub struct BatchDirectories {
    root: PathBuf,
}

impl BatchDirectories {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create the batch root and all stage sub-directories
    pub fn create_all(&self) -> std::io::Result<()> {
        for dir in SUBDIRS {
            std::fs::create_dir_all(self.root.join(dir))?;
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }

    pub fn fastas(&self) -> PathBuf {
        self.root.join("fastas")
    }

    pub fn blast(&self) -> PathBuf {
        self.root.join("blast")
    }

    pub fn hhsearch(&self) -> PathBuf {
        self.root.join("hhsearch")
    }

    pub fn summaries(&self) -> PathBuf {
        self.root.join("summaries")
    }

    pub fn partitions(&self) -> PathBuf {
        self.root.join("partitions")
    }

    pub fn slurm_logs(&self) -> PathBuf {
        self.root.join("slurm_logs")
    }

    pub fn scripts(&self) -> PathBuf {
        self.root.join("scripts")
    }

    pub fn fasta_path(&self, key: &ChainKey) -> PathBuf {
        self.fastas().join(format!("{}.fa", key.file_stem()))
    }

    pub fn chain_blast_path(&self, key: &ChainKey) -> PathBuf {
        self.blast().join(format!("{}.chain_blast.xml", key.file_stem()))
    }

    pub fn domain_blast_path(&self, key: &ChainKey) -> PathBuf {
        self.blast().join(format!("{}.domain_blast.xml", key.file_stem()))
    }

    pub fn hhr_path(&self, key: &ChainKey) -> PathBuf {
        self.hhsearch().join(format!("{}.hhr", key.file_stem()))
    }

    pub fn summary_path(&self, key: &ChainKey) -> PathBuf {
        self.summaries().join(format!("{}.summary.xml", key.file_stem()))
    }

    pub fn partition_path(&self, key: &ChainKey) -> PathBuf {
        self.partitions().join(format!("{}.partition.xml", key.file_stem()))
    }

    /// Path relative to the batch root, for storage in the manifest
    pub fn relative(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .into_owned()
    }

    /// Resolve a manifest artifact path against the batch root
    pub fn resolve(&self, stored: &str) -> PathBuf {
        let path = Path::new(stored);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

/// Conventional weekly batch name, e.g. `ecod_weekly_20251010`
pub fn weekly_batch_name(release_date: NaiveDate) -> String {
    format!("ecod_weekly_{}", release_date.format("%Y%m%d"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_create_all_builds_layout() {
        let temp = TempDir::new().unwrap();
        let dirs = BatchDirectories::new(temp.path().join("ecod_weekly_20251010"));
        dirs.create_all().unwrap();

        for sub in SUBDIRS {
            assert!(dirs.root().join(sub).is_dir(), "missing {}", sub);
        }
    }

    #[test]
    fn test_artifact_names() {
        let dirs = BatchDirectories::new("/batches/b1");
        let key: ChainKey = "8abc_A".parse().unwrap();

        assert_eq!(dirs.fasta_path(&key), PathBuf::from("/batches/b1/fastas/8abc_A.fa"));
        assert_eq!(
            dirs.chain_blast_path(&key),
            PathBuf::from("/batches/b1/blast/8abc_A.chain_blast.xml")
        );
        assert_eq!(dirs.hhr_path(&key), PathBuf::from("/batches/b1/hhsearch/8abc_A.hhr"));
        assert_eq!(
            dirs.partition_path(&key),
            PathBuf::from("/batches/b1/partitions/8abc_A.partition.xml")
        );
    }

    #[test]
    fn test_relative_and_resolve() {
        let dirs = BatchDirectories::new("/batches/b1");
        let key: ChainKey = "8abc_A".parse().unwrap();

        let stored = dirs.relative(&dirs.summary_path(&key));
        assert_eq!(stored, "summaries/8abc_A.summary.xml");
        assert_eq!(dirs.resolve(&stored), dirs.summary_path(&key));
        assert_eq!(dirs.resolve("/elsewhere/x.xml"), PathBuf::from("/elsewhere/x.xml"));
    }

    #[test]
    fn test_weekly_batch_name() {
        let date = NaiveDate::from_ymd_opt(2025, 10, 10).unwrap();
        assert_eq!(weekly_batch_name(date), "ecod_weekly_20251010");
    }
}
