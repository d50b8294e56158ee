//! `ecod-batch import-status` command implementation
//!
//! Imports authoritative ECOD inclusion status, optionally followed by
//! cluster propagation in the same manifest save.

use super::load_existing;
use crate::cluster::ClusterPropagator;
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::reference::{import_reference_status, read_reference_tsv};
use colored::Colorize;
use std::path::Path;

/// Import reference status from a TSV file
pub async fn run(config: &PipelineConfig, batch: &str, file: &Path, propagate: bool) -> Result<()> {
    let mut manifest = load_existing(config, batch)?;
    let entries = read_reference_tsv(file)?;
    let report = import_reference_status(&mut manifest, entries)?;

    let propagated = if propagate {
        Some(ClusterPropagator::new(&mut manifest).propagate()?)
    } else {
        None
    };
    manifest.save()?;

    println!("{} {}", "Reference status imported:".cyan().bold(), manifest.batch_name());
    println!("  Updated:      {}", report.updated);
    if report.unknown_chains > 0 {
        println!("  {} {}", "Not in batch:".yellow(), report.unknown_chains);
    }
    if let Some(count) = propagated {
        println!("  Propagated:   {}", count);
    }

    Ok(())
}
