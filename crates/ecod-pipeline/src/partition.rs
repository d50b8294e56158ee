//! Domain partitioning through the external `pyecod-mini` tool
//!
//! The partitioner reads a chain's evidence summary and writes a partition
//! XML document. Quality labelling is applied here, on top of the tool's
//! reported coverage and domain count.

use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use ecod_common::types::{ChainKey, QualityLabel};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

#[derive(Debug, Deserialize)]
struct PartitionXml {
    #[serde(rename = "@algorithm_version", default)]
    algorithm_version: Option<String>,
    #[serde(default)]
    protein: Option<ProteinXml>,
    #[serde(default)]
    domains: Option<DomainsXml>,
    #[serde(rename = "domain", default)]
    bare_domains: Vec<DomainXml>,
}

#[derive(Debug, Deserialize)]
struct ProteinXml {
    #[serde(default)]
    coverage: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct DomainsXml {
    #[serde(rename = "domain", default)]
    items: Vec<DomainXml>,
}

#[derive(Debug, Deserialize)]
struct DomainXml {
    #[serde(rename = "@id", default)]
    id: String,
    #[serde(rename = "@range", default)]
    range: String,
    #[serde(rename = "@size", default)]
    size: u32,
    #[serde(rename = "@source", default)]
    source: Option<String>,
    #[serde(rename = "@family", default)]
    family: Option<String>,
    #[serde(rename = "@confidence", default)]
    confidence: Option<f64>,
}

/// One domain assigned by the partitioner
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionDomain {
    pub id: String,
    pub range: String,
    pub size: u32,
    pub source: String,
    pub family: String,
    pub confidence: Option<f64>,
}

/// Parsed partitioner output with its quality label
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionOutcome {
    pub domains: Vec<PartitionDomain>,
    pub coverage: f64,
    pub quality: QualityLabel,
    pub algorithm_version: Option<String>,
}

impl PartitionOutcome {
    pub fn parse(content: &str) -> std::result::Result<Self, String> {
        let doc: PartitionXml = quick_xml::de::from_str(content)
            .map_err(|e| format!("invalid partition XML: {}", e))?;

        let coverage = doc
            .protein
            .and_then(|p| p.coverage)
            .unwrap_or(0.0)
            .clamp(0.0, 1.0);

        let domains: Vec<PartitionDomain> = doc
            .domains
            .map(|d| d.items)
            .unwrap_or_default()
            .into_iter()
            .chain(doc.bare_domains)
            .map(|d| PartitionDomain {
                id: d.id,
                range: d.range,
                size: d.size,
                source: d.source.unwrap_or_else(|| "unknown".to_string()),
                family: d.family.unwrap_or_default(),
                confidence: d.confidence,
            })
            .collect();

        Ok(Self {
            quality: QualityLabel::assess(domains.len(), coverage),
            domains,
            coverage,
            algorithm_version: doc.algorithm_version,
        })
    }

    pub fn domain_count(&self) -> usize {
        self.domains.len()
    }
}

/// One chain to partition
#[derive(Debug, Clone)]
pub struct PartitionRequest {
    pub key: ChainKey,
    pub summary: PathBuf,
    pub output: PathBuf,
    pub batch_id: Option<String>,
}

#[async_trait]
pub trait Partitioner: Send + Sync {
    async fn partition(&self, request: &PartitionRequest) -> Result<PartitionOutcome>;
}

/// Validated `pyecod-mini` command line
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionCommand {
    program: String,
    args: Vec<String>,
}

impl PartitionCommand {
    pub fn new(program: &str, request: &PartitionRequest) -> Result<Self> {
        if program.trim().is_empty() {
            return Err(PipelineError::partition("partitioner program is empty"));
        }
        if !request.summary.exists() {
            return Err(PipelineError::partition(format!(
                "summary not found for {}: {}",
                request.key,
                request.summary.display()
            )));
        }

        let mut args = vec![
            request.key.to_string(),
            "--summary-xml".to_string(),
            request.summary.to_string_lossy().into_owned(),
            "--output".to_string(),
            request.output.to_string_lossy().into_owned(),
        ];
        if let Some(batch_id) = &request.batch_id {
            args.push("--batch-id".to_string());
            args.push(batch_id.clone());
        }

        Ok(Self {
            program: program.to_string(),
            args,
        })
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

/// Runs the partitioner as a subprocess per chain
#[derive(Debug, Clone)]
pub struct CliPartitioner {
    program: String,
    timeout: Duration,
}

impl CliPartitioner {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }
}

#[async_trait]
impl Partitioner for CliPartitioner {
    async fn partition(&self, request: &PartitionRequest) -> Result<PartitionOutcome> {
        let command = PartitionCommand::new(&self.program, request)?;
        if let Some(parent) = request.output.parent() {
            std::fs::create_dir_all(parent)?;
        }

        debug!(chain = %request.key, program = command.program(), "Running partitioner");
        let run = Command::new(command.program())
            .args(command.args())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, run)
            .await
            .map_err(|_| {
                PipelineError::partition(format!(
                    "{} timed out after {}s",
                    request.key,
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| PipelineError::partition(format!("failed to run {}: {}", self.program, e)))?;

        if !output.status.success() {
            return Err(PipelineError::partition(format!(
                "{} exited with {}: {}",
                request.key,
                output.status.code().map_or_else(|| "signal".to_string(), |c| c.to_string()),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let outcome = read_partition_output(&request.output)?;
        info!(
            chain = %request.key,
            domains = outcome.domain_count(),
            coverage = outcome.coverage,
            quality = %outcome.quality,
            "Partitioned chain"
        );
        Ok(outcome)
    }
}

/// Parse a partition document written by the partitioner
pub fn read_partition_output(path: &Path) -> Result<PartitionOutcome> {
    if !path.exists() {
        return Err(PipelineError::partition(format!(
            "partition output not created: {}",
            path.display()
        )));
    }
    let content = std::fs::read_to_string(path)?;
    PartitionOutcome::parse(&content).map_err(|reason| PipelineError::parse(path, reason))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
pub(crate) mod tests {
    use super::*;
    use tempfile::TempDir;

    pub(crate) fn partition_xml(coverage: f64, domains: usize) -> String {
        let mut body = String::new();
        for i in 0..domains {
            body.push_str(&format!(
                "    <domain id=\"d{n}\" range=\"{s}-{e}\" size=\"50\" source=\"domain_blast\" family=\"GFP-like\" confidence=\"0.9\"/>\n",
                n = i + 1,
                s = i * 50 + 1,
                e = i * 50 + 50
            ));
        }
        format!(
            "<?xml version=\"1.0\"?>\n<partition algorithm_version=\"2.0.0\">\n  <protein pdb_id=\"8abc\" chain_id=\"A\">\n    <coverage>{coverage}</coverage>\n  </protein>\n  <domains>\n{body}  </domains>\n</partition>\n"
        )
    }

    #[test]
    fn test_parse_partition_output() {
        let outcome = PartitionOutcome::parse(&partition_xml(0.86, 2)).unwrap();
        assert_eq!(outcome.domain_count(), 2);
        assert!((outcome.coverage - 0.86).abs() < 1e-9);
        assert_eq!(outcome.quality, QualityLabel::Good);
        assert_eq!(outcome.algorithm_version.as_deref(), Some("2.0.0"));
        assert_eq!(outcome.domains[1].range, "51-100");
        assert_eq!(outcome.domains[0].confidence, Some(0.9));
    }

    #[test]
    fn test_quality_policy_applied() {
        assert_eq!(
            PartitionOutcome::parse(&partition_xml(0.6, 1)).unwrap().quality,
            QualityLabel::LowCoverage
        );
        assert_eq!(
            PartitionOutcome::parse(&partition_xml(0.3, 1)).unwrap().quality,
            QualityLabel::Fragmentary
        );
        assert_eq!(
            PartitionOutcome::parse(&partition_xml(0.0, 0)).unwrap().quality,
            QualityLabel::NoDomains
        );
    }

    #[test]
    fn test_command_line() {
        let temp = TempDir::new().unwrap();
        let summary = temp.path().join("8abc_A.summary.xml");
        std::fs::write(&summary, "<domain_summary/>").unwrap();

        let request = PartitionRequest {
            key: "8abc_A".parse().unwrap(),
            summary: summary.clone(),
            output: temp.path().join("8abc_A.partition.xml"),
            batch_id: Some("ecod_weekly_20251010".to_string()),
        };
        let command = PartitionCommand::new("pyecod-mini", &request).unwrap();
        assert_eq!(command.args()[0], "8abc_A");
        assert_eq!(command.args()[1], "--summary-xml");
        assert_eq!(command.args()[5], "--batch-id");
        assert_eq!(command.args()[6], "ecod_weekly_20251010");

        assert!(PartitionCommand::new("", &request).is_err());
        let missing = PartitionRequest {
            summary: temp.path().join("nope.xml"),
            ..request
        };
        assert!(PartitionCommand::new("pyecod-mini", &missing).is_err());
    }

    #[tokio::test]
    async fn test_cli_partitioner_nonzero_exit_is_failure() {
        let temp = TempDir::new().unwrap();
        let summary = temp.path().join("8abc_A.summary.xml");
        std::fs::write(&summary, "<domain_summary/>").unwrap();

        let request = PartitionRequest {
            key: "8abc_A".parse().unwrap(),
            summary,
            output: temp.path().join("8abc_A.partition.xml"),
            batch_id: None,
        };

        let partitioner = CliPartitioner::new("false", Duration::from_secs(5));
        let err = partitioner.partition(&request).await.unwrap_err();
        assert!(matches!(err, PipelineError::Partition(_)));
    }
}
