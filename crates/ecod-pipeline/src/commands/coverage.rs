//! `ecod-batch coverage` command implementation
//!
//! Reports query coverage of a single search report, the same number the
//! orchestrator compares against the batch threshold.

use crate::error::{PipelineError, Result};
use crate::search::parse_coverage;
use colored::Colorize;
use std::path::Path;

/// Print the coverage of one BLAST XML or HHsearch report
pub async fn run(report: &Path, threshold: Option<f64>) -> Result<()> {
    if let Some(t) = threshold {
        if !(0.0..=1.0).contains(&t) {
            return Err(PipelineError::config(format!(
                "coverage threshold must be within [0, 1], got {}",
                t
            )));
        }
    }

    let coverage = parse_coverage(report)?;
    println!("{} {:.4}", "Coverage:".cyan().bold(), coverage);

    if let Some(t) = threshold {
        if coverage < t {
            println!("  {} (below {})", "Secondary search needed".yellow(), t);
        } else {
            println!("  {} (at or above {})", "Primary evidence sufficient".green(), t);
        }
    }

    Ok(())
}
