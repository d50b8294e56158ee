//! Reference status import
//!
//! ECOD inclusion status is decided outside the pipeline and delivered as a
//! tab-separated file: `chain_key\tstatus\tuid\tversion`. The last two columns
//! may be empty. Lines starting with `#` and a `chain_key` header are skipped.

use crate::error::{PipelineError, Result};
use crate::manifest::{BatchManifest, ReferenceAnnotation};
use ecod_common::types::{ChainKey, EcodStatus};
use std::path::Path;
use tracing::{info, warn};

/// One parsed line of a reference status file
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceEntry {
    pub key: ChainKey,
    pub annotation: ReferenceAnnotation,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReferenceImportReport {
    pub updated: usize,
    pub unknown_chains: usize,
}

/// Parse reference status TSV content.
///
/// A line with a bad key, an unknown status or a non-numeric uid is an error
/// naming the line; partial imports are worse than none.
pub fn parse_reference_tsv(content: &str, source: &Path) -> Result<Vec<ReferenceEntry>> {
    let mut entries = Vec::new();

    for (idx, line) in content.lines().enumerate() {
        let line = line.trim_end();
        if line.trim().is_empty() || line.starts_with('#') || line.starts_with("chain_key") {
            continue;
        }
        let bad_line = |reason: String| PipelineError::parse(source, format!("line {}: {}", idx + 1, reason));

        let mut fields = line.split('\t').map(str::trim);
        let key: ChainKey = fields
            .next()
            .unwrap_or_default()
            .parse()
            .map_err(|e| bad_line(format!("{}", e)))?;
        let ecod_status: EcodStatus = fields
            .next()
            .ok_or_else(|| bad_line("missing status column".to_string()))?
            .parse()
            .map_err(|e| bad_line(format!("{}", e)))?;
        let ecod_uid = match fields.next().filter(|s| !s.is_empty()) {
            Some(uid) => Some(
                uid.parse::<i64>()
                    .map_err(|_| bad_line(format!("invalid uid '{}'", uid)))?,
            ),
            None => None,
        };
        let ecod_version = fields.next().filter(|s| !s.is_empty()).map(str::to_string);

        entries.push(ReferenceEntry {
            key,
            annotation: ReferenceAnnotation {
                ecod_status,
                ecod_uid,
                ecod_version,
            },
        });
    }

    Ok(entries)
}

pub fn read_reference_tsv(path: &Path) -> Result<Vec<ReferenceEntry>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| PipelineError::parse(path, format!("cannot read reference status file: {}", e)))?;
    parse_reference_tsv(&content, path)
}

/// Apply reference statuses; chains absent from the batch are skipped
pub fn import_reference_status(
    manifest: &mut BatchManifest,
    entries: Vec<ReferenceEntry>,
) -> Result<ReferenceImportReport> {
    let mut report = ReferenceImportReport::default();

    for entry in entries {
        if manifest.chain(&entry.key).is_none() {
            warn!(chain = %entry.key, "Reference status for chain not in batch, skipping");
            report.unknown_chains += 1;
            continue;
        }
        manifest.set_reference_status(&entry.key, entry.annotation)?;
        report.updated += 1;
    }

    info!(
        updated = report.updated,
        skipped = report.unknown_chains,
        "Reference status imported"
    );
    Ok(report)
}
