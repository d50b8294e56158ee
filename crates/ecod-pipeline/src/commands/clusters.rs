//! `ecod-batch load-clusters` command implementation

use super::load_existing;
use crate::cluster::{load_cluster_file, ClusterMethod};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use colored::Colorize;
use std::path::Path;

/// Load a clustering file, replacing any earlier linkage
pub async fn run(
    config: &PipelineConfig,
    batch: &str,
    file: &Path,
    method: ClusterMethod,
    threshold: f64,
) -> Result<()> {
    if !(0.0..=1.0).contains(&threshold) {
        return Err(PipelineError::config(format!(
            "clustering threshold must be within [0, 1], got {}",
            threshold
        )));
    }

    let mut manifest = load_existing(config, batch)?;
    let clusters = load_cluster_file(file, method)?;
    let report = manifest.assign_clusters(method, threshold, &clusters)?;
    manifest.save()?;

    println!("{} {} ({} at {})", "Clusters loaded:".cyan().bold(), manifest.batch_name(), method, threshold);
    println!("  Clusters:        {}", report.representatives);
    println!("  Members linked:  {}", report.members);
    if report.unknown_chains > 0 {
        println!("  {} {}", "Not in batch:".yellow(), report.unknown_chains);
    }

    Ok(())
}
