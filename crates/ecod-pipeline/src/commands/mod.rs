//! CLI command implementations
//!
//! Each subcommand has its own module with a `run` function.

pub mod clusters;
pub mod coverage;
pub mod create;
pub mod propagate;
pub mod reference;
pub mod repair;
pub mod run;
pub mod status;

use crate::config::PipelineConfig;
use crate::directories::MANIFEST_FILE;
use crate::error::{PipelineError, Result};
use crate::manifest::BatchManifest;
use std::path::PathBuf;

/// A batch argument is a directory when it is absolute or exists, otherwise a
/// batch name under the batch root
pub fn resolve_batch_dir(config: &PipelineConfig, batch: &str) -> PathBuf {
    let path = PathBuf::from(batch);
    if path.is_absolute() || path.exists() {
        path
    } else {
        config.batch_dir(batch)
    }
}

/// Load the manifest of a batch that must already exist
pub fn load_existing(config: &PipelineConfig, batch: &str) -> Result<BatchManifest> {
    let dir = resolve_batch_dir(config, batch);
    if !dir.join(MANIFEST_FILE).exists() {
        return Err(PipelineError::NotFound {
            kind: "Batch",
            key: dir.display().to_string(),
        });
    }
    BatchManifest::load(&dir)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_resolve_batch_dir() {
        let temp = TempDir::new().unwrap();
        let config = PipelineConfig {
            batch_root: temp.path().to_path_buf(),
            ..Default::default()
        };

        assert_eq!(
            resolve_batch_dir(&config, "ecod_weekly_20251010"),
            temp.path().join("ecod_weekly_20251010")
        );
        let absolute = temp.path().join("elsewhere");
        assert_eq!(resolve_batch_dir(&config, &absolute.to_string_lossy()), absolute);
    }

    #[test]
    fn test_load_existing_requires_manifest() {
        let temp = TempDir::new().unwrap();
        let config = PipelineConfig {
            batch_root: temp.path().to_path_buf(),
            ..Default::default()
        };

        let err = load_existing(&config, "missing").unwrap_err();
        assert!(matches!(err, PipelineError::NotFound { kind: "Batch", .. }));
    }
}
