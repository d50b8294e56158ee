//! `ecod-batch propagate` command implementation

use super::load_existing;
use crate::cluster::ClusterPropagator;
use crate::config::PipelineConfig;
use crate::error::Result;
use colored::Colorize;

/// Copy representative reference status onto cluster members
pub async fn run(config: &PipelineConfig, batch: &str) -> Result<()> {
    let mut manifest = load_existing(config, batch)?;

    if !manifest.has_clustering() {
        println!("{}", "No clustering loaded; nothing to propagate.".yellow());
        println!("Run 'ecod-batch load-clusters' first.");
        return Ok(());
    }

    let updated = ClusterPropagator::new(&mut manifest).propagate()?;
    if updated > 0 {
        manifest.save()?;
    }

    println!("{} {}", "Propagated:".cyan().bold(), manifest.batch_name());
    println!("  Members updated: {}", updated);

    Ok(())
}
