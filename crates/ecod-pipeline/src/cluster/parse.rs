//! Readers for clustering tool output
//!
//! CD-HIT `.clstr`:
//!
//! ```text
//! >Cluster 0
//! 0	64aa, >8s72_A... *
//! 1	225aa, >8s72_H... at 85%
//! ```
//!
//! mmseqs2 `createtsv` output, one `representative<TAB>member` pair per line
//! with the representative also listed as its own member.

use super::{ClusterAssignment, ClusterMember, ClusterMethod};
use crate::error::{PipelineError, Result};
use ecod_common::types::ChainKey;
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, warn};

/// Read a clustering file written by `method`
pub fn load_cluster_file(path: &Path, method: ClusterMethod) -> Result<Vec<ClusterAssignment>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| PipelineError::parse(path, format!("cannot read clustering: {}", e)))?;

    let clusters = match method {
        ClusterMethod::CdHit => parse_cdhit(&content)?,
        ClusterMethod::Mmseqs => parse_mmseqs(&content),
    };
    debug!(path = %path.display(), method = %method, clusters = clusters.len(), "Read clustering");
    Ok(clusters)
}

fn parse_key(id: &str) -> Option<ChainKey> {
    match id.parse() {
        Ok(key) => Some(key),
        Err(e) => {
            warn!(id, error = %e, "Skipping sequence with unrecognised chain key");
            None
        },
    }
}

#[derive(Default)]
struct PendingCluster {
    id: String,
    representative: Option<ChainKey>,
    members: Vec<ClusterMember>,
}

impl PendingCluster {
    fn finish(self) -> Option<ClusterAssignment> {
        match self.representative {
            Some(representative) => Some(ClusterAssignment {
                cluster_id: self.id,
                representative,
                members: self.members,
            }),
            None => {
                warn!(cluster = %self.id, "Cluster has no usable representative, skipping");
                None
            },
        }
    }
}

pub fn parse_cdhit(content: &str) -> Result<Vec<ClusterAssignment>> {
    let entry = Regex::new(r">(\S+)\.\.\. (.+)$")?;
    let identity = Regex::new(r"at (?:[+-]/)?(\d+(?:\.\d+)?)%")?;

    let mut clusters = Vec::new();
    let mut current: Option<PendingCluster> = None;

    for line in content.lines().map(str::trim) {
        if let Some(header) = line.strip_prefix(">Cluster") {
            clusters.extend(current.take().and_then(PendingCluster::finish));
            current = Some(PendingCluster {
                id: header.trim().to_string(),
                ..Default::default()
            });
            continue;
        }

        let Some(caps) = entry.captures(line) else {
            continue;
        };
        let Some(cluster) = current.as_mut() else {
            warn!(line, "Member line before any cluster header");
            continue;
        };
        let Some(key) = parse_key(&caps[1]) else {
            continue;
        };

        let status = caps[2].trim();
        if status == "*" {
            cluster.representative = Some(key);
        } else {
            let similarity = identity
                .captures(status)
                .and_then(|c| c[1].parse::<f64>().ok())
                .map(|pct| pct / 100.0);
            cluster.members.push(ClusterMember { key, similarity });
        }
    }
    clusters.extend(current.and_then(PendingCluster::finish));

    Ok(clusters)
}

pub fn parse_mmseqs(content: &str) -> Vec<ClusterAssignment> {
    let mut clusters: Vec<ClusterAssignment> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for line in content.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let Some((rep_id, member_id)) = line.split_once('\t') else {
            warn!(line, "Skipping malformed clustering line");
            continue;
        };
        let (rep_id, member_id) = (rep_id.trim(), member_id.trim());

        let slot = match index.get(rep_id) {
            Some(&i) => i,
            None => {
                let Some(representative) = parse_key(rep_id) else {
                    continue;
                };
                clusters.push(ClusterAssignment {
                    cluster_id: representative.to_string(),
                    representative,
                    members: Vec::new(),
                });
                index.insert(rep_id.to_string(), clusters.len() - 1);
                clusters.len() - 1
            },
        };

        if member_id == rep_id {
            continue;
        }
        if let Some(key) = parse_key(member_id) {
            clusters[slot].members.push(ClusterMember {
                key,
                similarity: None,
            });
        }
    }

    clusters
}
