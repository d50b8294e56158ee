//! HHsuite `.hhr` reports
//!
//! Only the summary hit table is read:
//!
//! ```text
//!  No Hit                             Prob E-value P-value  Score    SS Cols Query HMM  Template HMM
//!   1 e2ia4A1 2ia4.A.1-94            99.9 1.3E-30 1.9E-35  200.5   0.0  100    1-100      1-94 (94)
//! ```
//!
//! The description column may contain spaces, so columns are located from
//! the first numeric token (the probability) onwards.

use super::{union_coverage, SeqRange};

#[derive(Debug, Clone, PartialEq)]
pub struct HhrHit {
    pub number: u32,
    pub hit_id: String,
    pub description: String,
    /// 0 to 100
    pub probability: f64,
    pub evalue: f64,
    pub pvalue: f64,
    pub score: f64,
    pub aligned_cols: u32,
    pub query_range: SeqRange,
    pub template_range: SeqRange,
    pub template_len: Option<u32>,
}

impl HhrHit {
    /// Fraction of the template covered by the alignment
    pub fn template_coverage(&self) -> f64 {
        match self.template_len {
            Some(len) if len > 0 => {
                (f64::from(self.template_range.span()) / f64::from(len)).min(1.0)
            },
            _ => 0.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HhrReport {
    /// From the `Match_columns` header line
    pub query_len: u32,
    pub hits: Vec<HhrHit>,
}

impl HhrReport {
    pub fn parse(content: &str) -> Result<Self, String> {
        let mut report = HhrReport::default();
        let mut in_table = false;

        for line in content.lines() {
            let trimmed = line.trim();

            if let Some(rest) = trimmed.strip_prefix("Match_columns") {
                report.query_len = rest
                    .trim()
                    .parse()
                    .map_err(|e| format!("bad Match_columns '{}': {}", rest.trim(), e))?;
                continue;
            }

            if trimmed.starts_with("No Hit") {
                in_table = true;
                continue;
            }
            if !in_table {
                continue;
            }

            // The alignment section starts with "No 1"
            if is_alignment_header(trimmed) {
                break;
            }
            if trimmed.is_empty() {
                if report.hits.is_empty() {
                    continue;
                }
                break;
            }

            if let Some(hit) = parse_hit_line(trimmed) {
                report.hits.push(hit);
            }
        }

        Ok(report)
    }

    pub fn query_ranges(&self) -> impl Iterator<Item = SeqRange> + '_ {
        self.hits.iter().map(|h| h.query_range)
    }

    pub fn coverage(&self) -> f64 {
        union_coverage(self.query_ranges(), self.query_len)
    }
}

fn is_alignment_header(line: &str) -> bool {
    line.strip_prefix("No ")
        .is_some_and(|rest| rest.trim().parse::<u32>().is_ok())
}

fn is_number(token: &str) -> bool {
    token.starts_with(|c: char| c.is_ascii_digit() || c == '-' || c == '.')
        && token.parse::<f64>().is_ok()
}

/// Parse one table row; malformed rows are skipped
fn parse_hit_line(line: &str) -> Option<HhrHit> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < 10 {
        return None;
    }

    let number = parts[0].parse().ok()?;
    let hit_id = parts[1].to_string();

    let prob_idx = (2..parts.len()).find(|&i| is_number(parts[i]))?;
    let cols = parts.get(prob_idx..prob_idx + 8)?;

    let template_token = cols[7];
    let (template_text, mut template_len) = match template_token.split_once('(') {
        Some((range, len)) => (range, len.trim_end_matches(')').parse().ok()),
        None => (template_token, None),
    };
    if template_len.is_none() {
        template_len = parts
            .get(prob_idx + 8)
            .and_then(|t| t.strip_prefix('('))
            .and_then(|t| t.strip_suffix(')'))
            .and_then(|t| t.parse().ok());
    }

    Some(HhrHit {
        number,
        hit_id,
        description: parts[2..prob_idx].join(" "),
        probability: cols[0].parse().ok()?,
        evalue: cols[1].parse().ok()?,
        pvalue: cols[2].parse().ok()?,
        score: cols[3].parse().ok()?,
        aligned_cols: cols[5].parse().ok()?,
        query_range: cols[6].parse().ok()?,
        template_range: template_text.parse().ok()?,
        template_len,
    })
}
