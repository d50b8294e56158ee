//! `ecod-batch repair` command implementation

use super::resolve_batch_dir;
use crate::config::PipelineConfig;
use crate::directories::MANIFEST_FILE;
use crate::error::{PipelineError, Result};
use crate::manifest::repair::{create_repair_batch, RepairOptions, RepairSelection};
use colored::Colorize;
use std::path::PathBuf;

/// Create a repair batch from one or more source batches
pub async fn run(
    config: &PipelineConfig,
    name: &str,
    sources: &[String],
    selection: RepairSelection,
    rerun_searches: bool,
) -> Result<()> {
    let batch_dir = config.batch_dir(name);
    if batch_dir.join(MANIFEST_FILE).exists() {
        return Err(PipelineError::config(format!(
            "batch {} already exists at {}",
            name,
            batch_dir.display()
        )));
    }

    let sources: Vec<PathBuf> = sources.iter().map(|s| resolve_batch_dir(config, s)).collect();
    let options = RepairOptions {
        selection,
        rerun_searches,
    };
    let manifest = create_repair_batch(&batch_dir, name, &sources, &options)?;

    println!("{} {}", "Repair batch:".cyan().bold(), name);
    println!("  Directory: {}", batch_dir.display());
    println!("  Sources:   {}", manifest.batch_info.source_batches.join(", "));
    println!("  Selection: {}", selection);
    println!("  Chains:    {}", manifest.chain_count());

    Ok(())
}
