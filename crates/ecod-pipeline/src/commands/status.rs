//! `ecod-batch status` command implementation
//!
//! Shows stage progress, quality labels and live jobs of a batch.

use super::load_existing;
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::manifest::{BatchManifest, BatchSummary};
use colored::Colorize;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Table};

/// Show status of a batch
pub async fn run(config: &PipelineConfig, batch: &str, json: bool) -> Result<()> {
    let manifest = load_existing(config, batch)?;
    let summary = manifest.summary();

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("{} {}", "Batch:".cyan().bold(), summary.batch_name);
    println!("  Kind:      {}", summary.batch_kind);
    println!("  Reference: {}", summary.reference_version);
    println!("  Created:   {}", summary.created.format("%Y-%m-%d %H:%M"));
    if let Some(clustering) = &manifest.clustering {
        println!(
            "  Clusters:  {} ({} at {})",
            clustering.cluster_count, clustering.method, clustering.threshold
        );
    }
    println!();

    print_summary(&summary);

    let jobs = format_jobs(&manifest);
    if !jobs.is_empty() {
        println!("{}", "Jobs:".cyan().bold());
        print!("{}", jobs);
    }

    Ok(())
}

/// Print stage progress and quality counts
pub fn print_summary(summary: &BatchSummary) {
    println!("{}", "Progress:".cyan().bold());
    print!("{}", format_progress(summary));

    if !summary.quality.is_empty() {
        println!("{}", "Quality:".cyan().bold());
        for (label, count) in &summary.quality {
            println!("  {:<14} {}", label.to_string(), count);
        }
    }

    println!("  Unclassifiable: {}", summary.unclassifiable);
    if summary.counters.failed > 0 {
        println!("  {} {}", "Failed:".red(), summary.counters.failed);
    }
    if summary.live_jobs > 0 {
        println!("  {} {}", "Live jobs:".yellow(), summary.live_jobs);
    }
}

fn format_progress(summary: &BatchSummary) -> String {
    let counters = &summary.counters;
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec!["Stage", "Complete", "Of", "%"]);

    table.add_row(vec![
        "primary_search".to_string(),
        counters.primary_search_complete.to_string(),
        counters.total_structures.to_string(),
        format!("{:.1}", summary.primary_search_pct()),
    ]);
    table.add_row(vec![
        "secondary_search".to_string(),
        counters.secondary_search_complete.to_string(),
        counters.secondary_search_needed.to_string(),
        format!("{:.1}", summary.secondary_search_pct()),
    ]);
    table.add_row(vec![
        "partition".to_string(),
        counters.partition_complete.to_string(),
        counters.total_structures.to_string(),
        format!("{:.1}", summary.partition_pct()),
    ]);

    format!("{}\n", table)
}

fn format_jobs(manifest: &BatchManifest) -> String {
    let jobs: Vec<_> = manifest.jobs().collect();
    if jobs.is_empty() {
        return String::new();
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec!["Job", "Type", "Chains", "Partition", "Status", "Submitted"]);

    for job in jobs {
        table.add_row(vec![
            job.job_id.clone(),
            job.job_type.to_string(),
            job.chains.len().to_string(),
            job.partition.clone(),
            format!("{:?}", job.status).to_lowercase(),
            job.submitted.format("%Y-%m-%d %H:%M").to_string(),
        ]);
    }

    format!("{}\n", table)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::manifest::{ChainRecord, JobType};
    use ecod_common::types::ChainKey;
    use tempfile::TempDir;

    #[test]
    fn test_format_progress_and_jobs() {
        let temp = TempDir::new().unwrap();
        let mut manifest = BatchManifest::empty(temp.path());
        let key: ChainKey = "8abc_A".parse().unwrap();
        manifest.add_chain(key.clone(), ChainRecord::new(&key, "M".repeat(60), None));
        manifest
            .record_job_submission("4242", JobType::PrimarySearch, vec![key], "96GB")
            .unwrap();

        let progress = format_progress(&manifest.summary());
        assert!(progress.contains("primary_search"));
        assert!(progress.contains("secondary_search"));

        let jobs = format_jobs(&manifest);
        assert!(jobs.contains("4242"));
        assert!(jobs.contains("running"));
    }
}
