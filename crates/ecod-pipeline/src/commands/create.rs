//! `ecod-batch create` command implementation
//!
//! Creates the batch directory layout and enumerates chains into a new
//! manifest. Running it again on the same batch only adds chains that are
//! not yet listed.

use crate::config::PipelineConfig;
use crate::directories::weekly_batch_name;
use crate::enumerate::{add_to_manifest, read_fasta};
use crate::error::{PipelineError, Result};
use crate::manifest::BatchManifest;
use chrono::{NaiveDate, Utc};
use colored::Colorize;
use ecod_common::types::BatchKind;
use std::path::Path;
use tracing::info;

/// Create a weekly batch
pub async fn run(
    config: &PipelineConfig,
    name: Option<String>,
    release_date: Option<NaiveDate>,
    chains: &Path,
    threshold: Option<f64>,
    reference: Option<String>,
) -> Result<()> {
    let threshold = threshold.unwrap_or(config.coverage_threshold);
    if !(0.0..=1.0).contains(&threshold) {
        return Err(PipelineError::config(format!(
            "coverage threshold must be within [0, 1], got {}",
            threshold
        )));
    }

    let release_date = release_date.unwrap_or_else(|| Utc::now().date_naive());
    let batch_name = name.unwrap_or_else(|| weekly_batch_name(release_date));
    let batch_dir = config.batch_dir(&batch_name);

    let entries = read_fasta(chains)?;
    if entries.is_empty() {
        return Err(PipelineError::parse(chains, "no chain records found"));
    }

    let mut manifest = BatchManifest::load(&batch_dir)?;
    if manifest.chain_count() == 0 {
        manifest.initialize(
            batch_name.as_str(),
            BatchKind::Weekly,
            Some(release_date.format("%Y-%m-%d").to_string()),
            reference.unwrap_or_else(|| config.reference_version.clone()),
            threshold,
        );
    }
    manifest.directories().create_all()?;

    let report = add_to_manifest(&mut manifest, entries, config.peptide_threshold);
    manifest.save()?;
    info!(batch = %batch_name, dir = %batch_dir.display(), "Batch created");

    println!("{} {}", "Batch:".cyan().bold(), batch_name);
    println!("  Directory:      {}", batch_dir.display());
    println!("  Chains added:   {}", report.added);
    if report.existing > 0 {
        println!("  Already listed: {}", report.existing);
    }
    println!("  Unclassifiable: {}", report.unclassifiable);
    println!("  Reference:      {}", manifest.batch_info.reference_version);

    Ok(())
}
