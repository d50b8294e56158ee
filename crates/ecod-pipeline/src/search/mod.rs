//! Search report parsing
//!
//! Both search stages are judged by query coverage: the fraction of query
//! residues covered by the union of all match intervals in a report.

pub mod blast;
pub mod hhr;

pub use blast::{BlastHit, BlastReport, Hsp};
pub use hhr::{HhrHit, HhrReport};

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::warn;

/// Inclusive 1-based residue range
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SeqRange {
    pub start: u32,
    pub end: u32,
}

impl SeqRange {
    /// Ordered so that `start <= end`
    pub fn new(a: u32, b: u32) -> Self {
        Self {
            start: a.min(b),
            end: a.max(b),
        }
    }

    /// Number of residues in the range
    pub fn span(&self) -> u32 {
        self.end - self.start + 1
    }
}

impl fmt::Display for SeqRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

impl FromStr for SeqRange {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (a, b) = s
            .trim()
            .split_once('-')
            .ok_or_else(|| format!("not a range: {}", s))?;
        let a = a.parse::<u32>().map_err(|e| format!("bad range start '{}': {}", a, e))?;
        let b = b.parse::<u32>().map_err(|e| format!("bad range end '{}': {}", b, e))?;
        Ok(Self::new(a, b))
    }
}

/// Fraction of `1..=query_len` covered by the union of `ranges`.
///
/// Ranges are clamped to the query; the result is always within `[0, 1]`.
pub fn union_coverage(ranges: impl IntoIterator<Item = SeqRange>, query_len: u32) -> f64 {
    if query_len == 0 {
        return 0.0;
    }

    let mut clamped: Vec<SeqRange> = ranges
        .into_iter()
        .filter(|r| r.start <= query_len && r.end >= 1)
        .map(|r| SeqRange::new(r.start.max(1), r.end.min(query_len)))
        .collect();
    clamped.sort();

    let mut covered = 0u32;
    let mut current: Option<SeqRange> = None;
    for range in clamped {
        current = match current {
            Some(cur) if range.start <= cur.end.saturating_add(1) => {
                Some(SeqRange::new(cur.start, cur.end.max(range.end)))
            },
            Some(cur) => {
                covered += cur.span();
                Some(range)
            },
            None => Some(range),
        };
    }
    if let Some(cur) = current {
        covered += cur.span();
    }

    (f64::from(covered) / f64::from(query_len)).clamp(0.0, 1.0)
}

/// Coverage of one report file, BLAST XML or `.hhr` by extension.
///
/// A missing file is a parse error for the chain. A report that exists but
/// cannot be understood has no usable hits and counts as 0.0.
pub fn parse_coverage(path: &Path) -> Result<f64> {
    let content = read_report(path)?;

    let parsed = if is_hhr(path) {
        HhrReport::parse(&content).map(|r| r.coverage())
    } else {
        BlastReport::parse(&content).map(|r| r.coverage())
    };

    Ok(parsed.unwrap_or_else(|reason| {
        warn!(path = %path.display(), %reason, "Unparsable report, treating as no coverage");
        0.0
    }))
}

pub(crate) fn read_report(path: &Path) -> Result<String> {
    if !path.exists() {
        return Err(PipelineError::parse(path, "report not found"));
    }
    std::fs::read_to_string(path).map_err(|e| PipelineError::parse(path, e.to_string()))
}

fn is_hhr(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "hhr")
}
