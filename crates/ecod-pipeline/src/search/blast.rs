//! BLAST XML (`-outfmt 5`) reports

use super::{union_coverage, SeqRange};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct BlastOutputXml {
    #[serde(rename = "BlastOutput_iterations", default)]
    iterations: IterationsXml,
}

#[derive(Debug, Default, Deserialize)]
struct IterationsXml {
    #[serde(rename = "Iteration", default)]
    items: Vec<IterationXml>,
}

#[derive(Debug, Deserialize)]
struct IterationXml {
    #[serde(rename = "Iteration_query-len", default)]
    query_len: Option<u32>,
    #[serde(rename = "Iteration_hits", default)]
    hits: HitsXml,
}

#[derive(Debug, Default, Deserialize)]
struct HitsXml {
    #[serde(rename = "Hit", default)]
    items: Vec<HitXml>,
}

#[derive(Debug, Deserialize)]
struct HitXml {
    #[serde(rename = "Hit_id")]
    id: String,
    #[serde(rename = "Hit_def", default)]
    def: String,
    #[serde(rename = "Hit_len", default)]
    len: u32,
    #[serde(rename = "Hit_hsps", default)]
    hsps: HspsXml,
}

#[derive(Debug, Default, Deserialize)]
struct HspsXml {
    #[serde(rename = "Hsp", default)]
    items: Vec<HspXml>,
}

#[derive(Debug, Deserialize)]
struct HspXml {
    #[serde(rename = "Hsp_bit-score")]
    bit_score: f64,
    #[serde(rename = "Hsp_evalue")]
    evalue: f64,
    #[serde(rename = "Hsp_query-from")]
    query_from: u32,
    #[serde(rename = "Hsp_query-to")]
    query_to: u32,
    #[serde(rename = "Hsp_hit-from")]
    hit_from: u32,
    #[serde(rename = "Hsp_hit-to")]
    hit_to: u32,
    #[serde(rename = "Hsp_identity", default)]
    identity: u32,
    #[serde(rename = "Hsp_align-len", default)]
    align_len: u32,
}

/// High-scoring segment pair
#[derive(Debug, Clone, PartialEq)]
pub struct Hsp {
    pub bit_score: f64,
    pub evalue: f64,
    pub query: SeqRange,
    pub hit: SeqRange,
    pub identity: u32,
    pub align_len: u32,
}

impl Hsp {
    /// Identical positions over alignment length
    pub fn identity_fraction(&self) -> f64 {
        if self.align_len == 0 {
            return 0.0;
        }
        f64::from(self.identity) / f64::from(self.align_len)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlastHit {
    pub hit_id: String,
    pub hit_def: String,
    pub hit_len: u32,
    /// In report order; the first is the best
    pub hsps: Vec<Hsp>,
}

impl BlastHit {
    pub fn best_hsp(&self) -> Option<&Hsp> {
        self.hsps.first()
    }

    /// Fraction of the target covered by the best HSP
    pub fn target_coverage(&self) -> f64 {
        match self.best_hsp() {
            Some(hsp) if self.hit_len > 0 => {
                (f64::from(hsp.hit.span()) / f64::from(self.hit_len)).min(1.0)
            },
            _ => 0.0,
        }
    }

    /// Target chain as `pdb_chain` from a definition like `6ces A`
    pub fn chain_target(&self) -> String {
        let parts: Vec<&str> = self.hit_def.split_whitespace().collect();
        match parts.as_slice() {
            [pdb, chain, ..] => format!("{}_{}", pdb.to_lowercase(), chain),
            [single] if single.contains('_') => single.to_lowercase(),
            _ if !self.hit_def.trim().is_empty() => self.hit_def.trim().to_string(),
            _ => self.hit_id.clone(),
        }
    }

    /// ECOD domain id (`e2ia4A1`), looked for in the id and then the definition
    pub fn domain_target(&self) -> String {
        if looks_like_domain_id(&self.hit_id) {
            return self.hit_id.clone();
        }
        self.hit_def
            .split_whitespace()
            .find(|part| looks_like_domain_id(part))
            .map(str::to_string)
            .unwrap_or_else(|| self.hit_id.clone())
    }
}

fn looks_like_domain_id(s: &str) -> bool {
    s.starts_with('e') && s.len() > 5
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlastReport {
    pub query_len: u32,
    pub hits: Vec<BlastHit>,
}

impl BlastReport {
    pub fn parse(content: &str) -> Result<Self, String> {
        let doc: BlastOutputXml =
            quick_xml::de::from_str(content).map_err(|e| format!("invalid BLAST XML: {}", e))?;

        let query_len = doc
            .iterations
            .items
            .iter()
            .find_map(|it| it.query_len)
            .unwrap_or(0);

        let hits = doc
            .iterations
            .items
            .into_iter()
            .flat_map(|it| it.hits.items)
            .map(|hit| BlastHit {
                hit_id: hit.id,
                hit_def: hit.def,
                hit_len: hit.len,
                hsps: hit
                    .hsps
                    .items
                    .into_iter()
                    .map(|h| Hsp {
                        bit_score: h.bit_score,
                        evalue: h.evalue,
                        query: SeqRange::new(h.query_from, h.query_to),
                        hit: SeqRange::new(h.hit_from, h.hit_to),
                        identity: h.identity,
                        align_len: h.align_len,
                    })
                    .collect(),
            })
            .collect();

        Ok(Self { query_len, hits })
    }

    /// Query intervals of every HSP of every hit
    pub fn query_ranges(&self) -> impl Iterator<Item = SeqRange> + '_ {
        self.hits.iter().flat_map(|h| h.hsps.iter().map(|hsp| hsp.query))
    }

    pub fn coverage(&self) -> f64 {
        union_coverage(self.query_ranges(), self.query_len)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
pub(crate) mod tests {
    use super::*;

    /// Minimal BLAST XML with one hit per `(id, def, query range)`
    pub(crate) fn blast_xml(query_len: u32, hits: &[(&str, &str, u32, u32)]) -> String {
        let mut body = String::new();
        for (i, (id, def, from, to)) in hits.iter().enumerate() {
            body.push_str(&format!(
                r#"<Hit>
  <Hit_num>{num}</Hit_num>
  <Hit_id>{id}</Hit_id>
  <Hit_def>{def}</Hit_def>
  <Hit_len>120</Hit_len>
  <Hit_hsps>
    <Hsp>
      <Hsp_num>1</Hsp_num>
      <Hsp_bit-score>210.3</Hsp_bit-score>
      <Hsp_evalue>1.5e-40</Hsp_evalue>
      <Hsp_query-from>{from}</Hsp_query-from>
      <Hsp_query-to>{to}</Hsp_query-to>
      <Hsp_hit-from>1</Hsp_hit-from>
      <Hsp_hit-to>60</Hsp_hit-to>
      <Hsp_identity>45</Hsp_identity>
      <Hsp_align-len>60</Hsp_align-len>
    </Hsp>
  </Hit_hsps>
</Hit>
"#,
                num = i + 1,
            ));
        }

        format!(
            r#"<?xml version="1.0"?>
<!DOCTYPE BlastOutput PUBLIC "-//NCBI//NCBI BlastOutput/EN" "http://www.ncbi.nlm.nih.gov/dtd/NCBI_BlastOutput.dtd">
<BlastOutput>
  <BlastOutput_program>blastp</BlastOutput_program>
  <BlastOutput_query-len>{query_len}</BlastOutput_query-len>
  <BlastOutput_iterations>
    <Iteration>
      <Iteration_iter-num>1</Iteration_iter-num>
      <Iteration_query-len>{query_len}</Iteration_query-len>
      <Iteration_hits>
{body}      </Iteration_hits>
    </Iteration>
  </BlastOutput_iterations>
</BlastOutput>
"#
        )
    }

    #[test]
    fn test_parse_hits_and_coverage() {
        let xml = blast_xml(
            100,
            &[("gnl|BL_ORD_ID|1", "6ces A", 1, 40), ("gnl|BL_ORD_ID|2", "2ia4 B", 31, 60)],
        );
        let report = BlastReport::parse(&xml).unwrap();

        assert_eq!(report.query_len, 100);
        assert_eq!(report.hits.len(), 2);
        assert!((report.coverage() - 0.60).abs() < 1e-9);

        let best = report.hits[0].best_hsp().unwrap();
        assert_eq!(best.query, SeqRange::new(1, 40));
        assert!((best.identity_fraction() - 0.75).abs() < 1e-9);
        assert!((report.hits[0].target_coverage() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_no_hits_is_zero_coverage() {
        let report = BlastReport::parse(&blast_xml(150, &[])).unwrap();
        assert!(report.hits.is_empty());
        assert_eq!(report.coverage(), 0.0);
    }

    #[test]
    fn test_target_names() {
        let chain = BlastHit {
            hit_id: "gnl|BL_ORD_ID|7".into(),
            hit_def: "6CES A".into(),
            hit_len: 100,
            hsps: vec![],
        };
        assert_eq!(chain.chain_target(), "6ces_A");

        let domain = BlastHit {
            hit_id: "gnl|BL_ORD_ID|9".into(),
            hit_def: "8abc_A e8abcA1 e8abcA2".into(),
            hit_len: 100,
            hsps: vec![],
        };
        assert_eq!(domain.domain_target(), "e8abcA1");

        let direct = BlastHit {
            hit_id: "e2ia4A1".into(),
            hit_def: String::new(),
            hit_len: 94,
            hsps: vec![],
        };
        assert_eq!(direct.domain_target(), "e2ia4A1");
        assert_eq!(direct.target_coverage(), 0.0);
    }

    #[test]
    fn test_malformed_xml_is_error() {
        assert!(BlastReport::parse("<BlastOutput><BlastOutput_iterations><Iteration>").is_err());
    }
}
