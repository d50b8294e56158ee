//! Evidence consolidation
//!
//! Merges the best HSP of every hit from the domain BLAST, chain BLAST and
//! HHsearch reports of one chain into a `domain_summary` XML document, the
//! input format of the partitioner.

use crate::error::{PipelineError, Result};
use crate::search::{BlastReport, HhrReport, SeqRange};
use chrono::Utc;
use ecod_common::types::ChainKey;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, warn};

pub const SUMMARY_VERSION: &str = "1.0";
pub const UNKNOWN_FAMILY: &str = "Unknown";

/// ECOD domain id to family name
#[derive(Debug, Clone, Default)]
pub struct FamilyLookup {
    families: HashMap<String, String>,
}

impl FamilyLookup {
    /// Read a `domain_id<TAB>family` file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| PipelineError::config(format!("cannot read family lookup {}: {}", path.display(), e)))?;
        let lookup = Self::parse(&content);
        debug!(path = %path.display(), entries = lookup.len(), "Loaded family lookup");
        Ok(lookup)
    }

    pub fn parse(content: &str) -> Self {
        let families = content
            .lines()
            .map(str::trim_end)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .filter_map(|l| l.split_once('\t'))
            .filter(|(id, _)| *id != "ecod_domain_id" && *id != "domain_id")
            .map(|(id, family)| (id.trim().to_string(), family.trim().to_string()))
            .collect();
        Self { families }
    }

    pub fn family(&self, domain_id: &str) -> &str {
        self.families
            .get(domain_id)
            .map(String::as_str)
            .unwrap_or(UNKNOWN_FAMILY)
    }

    pub fn len(&self) -> usize {
        self.families.len()
    }

    pub fn is_empty(&self) -> bool {
        self.families.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvidenceKind {
    DomainBlast,
    ChainBlast,
    Hhsearch,
}

impl EvidenceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvidenceKind::DomainBlast => "domain_blast",
            EvidenceKind::ChainBlast => "chain_blast",
            EvidenceKind::Hhsearch => "hhsearch",
        }
    }
}

/// One `<hit>` of the summary
#[derive(Debug, Clone, PartialEq)]
pub struct EvidenceHit {
    pub kind: EvidenceKind,
    pub target: String,
    pub family: String,
    pub evalue: f64,
    /// Bit score for BLAST, HHsearch score otherwise
    pub score: f64,
    pub probability: Option<f64>,
    pub identity: Option<f64>,
    pub coverage: Option<f64>,
    pub query_range: SeqRange,
    pub target_range: SeqRange,
}

impl EvidenceHit {
    fn attributes(&self) -> Vec<(&'static str, String)> {
        let mut attrs = vec![
            ("type", self.kind.as_str().to_string()),
            ("target", self.target.clone()),
            ("target_family", self.family.clone()),
        ];
        match self.kind {
            EvidenceKind::Hhsearch => {
                attrs.push(("probability", format!("{:.1}", self.probability.unwrap_or(0.0))));
                attrs.push(("evalue", format!("{:.2e}", self.evalue)));
                attrs.push(("score", format!("{:.1}", self.score)));
            },
            EvidenceKind::DomainBlast | EvidenceKind::ChainBlast => {
                attrs.push(("evalue", format!("{:.2e}", self.evalue)));
                attrs.push(("bitscore", format!("{:.1}", self.score)));
                attrs.push(("identity", format!("{:.2}", self.identity.unwrap_or(0.0))));
                attrs.push(("coverage", format!("{:.2}", self.coverage.unwrap_or(0.0))));
            },
        }
        attrs.push(("query_range", self.query_range.to_string()));
        attrs.push(("target_range", self.target_range.to_string()));
        attrs
    }
}

/// Report files available for one chain
#[derive(Debug, Clone, Copy, Default)]
pub struct EvidenceSources<'a> {
    pub domain_blast: Option<&'a Path>,
    pub chain_blast: Option<&'a Path>,
    pub hhsearch: Option<&'a Path>,
}

/// Everything needed to write one chain's summary
#[derive(Debug, Clone)]
pub struct SummaryRequest<'a> {
    pub key: &'a ChainKey,
    pub sequence: &'a str,
    pub batch_id: Option<&'a str>,
    pub note: Option<&'a str>,
    pub sources: EvidenceSources<'a>,
}

#[derive(Debug, Clone, Default)]
pub struct SummaryWriter {
    families: FamilyLookup,
}

impl SummaryWriter {
    pub fn new(families: FamilyLookup) -> Self {
        Self { families }
    }

    /// Hits in summary order: domain BLAST, chain BLAST, HHsearch
    pub fn collect_hits(&self, sources: &EvidenceSources<'_>) -> Vec<EvidenceHit> {
        let mut hits = Vec::new();
        if let Some(report) = sources.domain_blast.and_then(|p| read_blast(p)) {
            hits.extend(self.blast_hits(&report, EvidenceKind::DomainBlast));
        }
        if let Some(report) = sources.chain_blast.and_then(|p| read_blast(p)) {
            hits.extend(self.blast_hits(&report, EvidenceKind::ChainBlast));
        }
        if let Some(report) = sources.hhsearch.and_then(|p| read_hhr(p)) {
            hits.extend(report.hits.iter().map(|hit| EvidenceHit {
                kind: EvidenceKind::Hhsearch,
                target: hit.hit_id.clone(),
                family: self.families.family(&hit.hit_id).to_string(),
                evalue: hit.evalue,
                score: hit.score,
                probability: Some(hit.probability),
                identity: None,
                coverage: Some(hit.template_coverage()),
                query_range: hit.query_range,
                target_range: hit.template_range,
            }));
        }
        hits
    }

    fn blast_hits(&self, report: &BlastReport, kind: EvidenceKind) -> Vec<EvidenceHit> {
        report
            .hits
            .iter()
            .filter_map(|hit| {
                let hsp = hit.best_hsp()?;
                let target = match kind {
                    EvidenceKind::ChainBlast => hit.chain_target(),
                    _ => hit.domain_target(),
                };
                Some(EvidenceHit {
                    kind,
                    family: self.families.family(&target).to_string(),
                    target,
                    evalue: hsp.evalue,
                    score: hsp.bit_score,
                    probability: None,
                    identity: Some(hsp.identity_fraction()),
                    coverage: Some(hit.target_coverage()),
                    query_range: hsp.query,
                    target_range: hsp.hit,
                })
            })
            .collect()
    }

    /// Write the summary document to `output`, returning the number of hits
    pub fn write(&self, request: &SummaryRequest<'_>, output: &Path) -> Result<usize> {
        let hits = self.collect_hits(&request.sources);
        let xml = render_summary(request, &hits)?;

        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(output, xml)?;

        debug!(chain = %request.key, hits = hits.len(), path = %output.display(), "Wrote evidence summary");
        Ok(hits.len())
    }
}

fn read_blast(path: &Path) -> Option<BlastReport> {
    let content = std::fs::read_to_string(path).ok()?;
    BlastReport::parse(&content)
        .map_err(|reason| warn!(path = %path.display(), %reason, "Skipping unparsable BLAST report"))
        .ok()
}

fn read_hhr(path: &Path) -> Option<HhrReport> {
    let content = std::fs::read_to_string(path).ok()?;
    HhrReport::parse(&content)
        .map_err(|reason| warn!(path = %path.display(), %reason, "Skipping unparsable HHR report"))
        .ok()
}

fn render_summary(request: &SummaryRequest<'_>, hits: &[EvidenceHit]) -> Result<Vec<u8>> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);

    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(PipelineError::xml)?;
    writer
        .write_event(Event::Start(
            BytesStart::new("domain_summary").with_attributes([("version", SUMMARY_VERSION)]),
        ))
        .map_err(PipelineError::xml)?;

    let length = request.sequence.chars().count().to_string();
    writer
        .write_event(Event::Start(BytesStart::new("protein").with_attributes([
            ("pdb_id", request.key.pdb_id()),
            ("chain_id", request.key.chain_id()),
            ("length", length.as_str()),
        ])))
        .map_err(PipelineError::xml)?;
    writer
        .create_element("sequence")
        .write_text_content(BytesText::new(request.sequence))
        .map_err(PipelineError::xml)?;
    writer
        .write_event(Event::End(BytesEnd::new("protein")))
        .map_err(PipelineError::xml)?;

    if hits.is_empty() {
        writer
            .create_element("evidence")
            .write_empty()
            .map_err(PipelineError::xml)?;
    } else {
        writer
            .write_event(Event::Start(BytesStart::new("evidence")))
            .map_err(PipelineError::xml)?;
        for hit in hits {
            let attrs = hit.attributes();
            writer
                .create_element("hit")
                .with_attributes(attrs.iter().map(|(k, v)| (*k, v.as_str())))
                .write_empty()
                .map_err(PipelineError::xml)?;
        }
        writer
            .write_event(Event::End(BytesEnd::new("evidence")))
            .map_err(PipelineError::xml)?;
    }

    writer
        .write_event(Event::Start(BytesStart::new("metadata")))
        .map_err(PipelineError::xml)?;
    if let Some(batch_id) = request.batch_id {
        writer
            .create_element("batch_id")
            .write_text_content(BytesText::new(batch_id))
            .map_err(PipelineError::xml)?;
    }
    let timestamp = Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();
    writer
        .create_element("timestamp")
        .write_text_content(BytesText::new(&timestamp))
        .map_err(PipelineError::xml)?;
    if let Some(note) = request.note {
        writer
            .create_element("note")
            .write_text_content(BytesText::new(note))
            .map_err(PipelineError::xml)?;
    }
    writer
        .write_event(Event::End(BytesEnd::new("metadata")))
        .map_err(PipelineError::xml)?;
    writer
        .write_event(Event::End(BytesEnd::new("domain_summary")))
        .map_err(PipelineError::xml)?;

    let mut xml = writer.into_inner();
    xml.push(b'\n');
    Ok(xml)
}
