//! Sequence clustering and reference-status propagation
//!
//! A clustering run groups a batch's chains around representatives. Only
//! representatives are looked up against the ECOD reference; their status is
//! then copied to the members of their cluster by [`ClusterPropagator`].

pub mod parse;

pub use parse::{load_cluster_file, parse_cdhit, parse_mmseqs};

use crate::error::{PipelineError, Result};
use crate::manifest::{BatchManifest, ReferenceAnnotation};
use ecod_common::types::ChainKey;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

/// Tool that produced a clustering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterMethod {
    CdHit,
    Mmseqs,
}

impl ClusterMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClusterMethod::CdHit => "cd_hit",
            ClusterMethod::Mmseqs => "mmseqs",
        }
    }
}

impl fmt::Display for ClusterMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClusterMethod {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "cd_hit" | "cd-hit" | "cdhit" => Ok(ClusterMethod::CdHit),
            "mmseqs" | "mmseqs2" => Ok(ClusterMethod::Mmseqs),
            other => Err(PipelineError::invalid_clustering(format!(
                "unknown clustering method '{}' (expected cd_hit or mmseqs)",
                other
            ))),
        }
    }
}

/// Non-representative member of a cluster
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterMember {
    pub key: ChainKey,
    /// Similarity to the representative in 0..=1, when the tool reports it
    pub similarity: Option<f64>,
}

/// One cluster as read from the clustering tool's output
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterAssignment {
    pub cluster_id: String,
    pub representative: ChainKey,
    pub members: Vec<ClusterMember>,
}

impl ClusterAssignment {
    /// Representative first, then members in file order
    pub fn all_keys(&self) -> impl Iterator<Item = &ChainKey> {
        std::iter::once(&self.representative).chain(self.members.iter().map(|m| &m.key))
    }

    pub fn size(&self) -> usize {
        1 + self.members.len()
    }
}

/// Chain status storage the propagator reads and writes
pub trait ChainStatusStore {
    fn has_clustering(&self) -> bool;

    /// `(member, representative)` pairs for every non-representative chain
    fn cluster_members(&self) -> Vec<(ChainKey, ChainKey)>;

    fn reference_status(&self, key: &ChainKey) -> Option<ReferenceAnnotation>;

    fn set_reference_status(&mut self, key: &ChainKey, annotation: ReferenceAnnotation)
        -> Result<()>;
}

impl ChainStatusStore for BatchManifest {
    fn has_clustering(&self) -> bool {
        BatchManifest::has_clustering(self)
    }

    fn cluster_members(&self) -> Vec<(ChainKey, ChainKey)> {
        self.chains()
            .filter_map(|(key, chain)| match &chain.cluster {
                Some(link) if !link.is_representative => {
                    Some((key.clone(), link.representative.clone()))
                },
                _ => None,
            })
            .collect()
    }

    fn reference_status(&self, key: &ChainKey) -> Option<ReferenceAnnotation> {
        self.chain(key).map(|c| c.reference.clone())
    }

    fn set_reference_status(
        &mut self,
        key: &ChainKey,
        annotation: ReferenceAnnotation,
    ) -> Result<()> {
        BatchManifest::set_reference_status(self, key, annotation).map(|_| ())
    }
}

/// Copies reference status from cluster representatives to their members.
///
/// A member is only updated while it still carries the default
/// `not_in_ecod` status, and only from a representative whose status is not
/// the default. Running it twice changes nothing the second time.
pub struct ClusterPropagator<'a, S: ChainStatusStore> {
    store: &'a mut S,
}

impl<'a, S: ChainStatusStore> ClusterPropagator<'a, S> {
    pub fn new(store: &'a mut S) -> Self {
        Self { store }
    }

    /// Returns the number of members updated
    pub fn propagate(&mut self) -> Result<usize> {
        if !self.store.has_clustering() {
            debug!("No clustering loaded, nothing to propagate");
            return Ok(0);
        }

        let mut updated = 0;
        for (member, representative) in self.store.cluster_members() {
            let Some(current) = self.store.reference_status(&member) else {
                continue;
            };
            if !current.is_default() {
                continue;
            }

            match self.store.reference_status(&representative) {
                Some(rep) if !rep.is_default() => {
                    debug!(
                        chain = %member,
                        representative = %representative,
                        status = %rep.ecod_status,
                        "Propagating reference status"
                    );
                    self.store.set_reference_status(&member, rep)?;
                    updated += 1;
                },
                Some(_) => {},
                None => debug!(chain = %member, representative = %representative, "Representative not in batch"),
            }
        }

        info!(updated, "Reference status propagated to cluster members");
        Ok(updated)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::manifest::ChainRecord;
    use ecod_common::types::EcodStatus;
    use tempfile::TempDir;

    fn key(s: &str) -> ChainKey {
        s.parse().unwrap()
    }

    fn manifest(dir: &std::path::Path, keys: &[&str]) -> BatchManifest {
        let mut manifest = BatchManifest::empty(dir);
        for k in keys {
            let k = key(k);
            manifest.add_chain(k.clone(), ChainRecord::new(&k, "M".repeat(60), None));
        }
        manifest
    }

    fn cluster(id: &str, rep: &str, members: &[&str]) -> ClusterAssignment {
        ClusterAssignment {
            cluster_id: id.to_string(),
            representative: key(rep),
            members: members
                .iter()
                .map(|m| ClusterMember {
                    key: key(m),
                    similarity: Some(0.95),
                })
                .collect(),
        }
    }

    fn in_ecod(uid: i64) -> ReferenceAnnotation {
        ReferenceAnnotation {
            ecod_status: EcodStatus::InCurrentEcod,
            ecod_uid: Some(uid),
            ecod_version: Some("develop292".to_string()),
        }
    }

    #[test]
    fn test_method_from_str() {
        assert_eq!("cd-hit".parse::<ClusterMethod>().unwrap(), ClusterMethod::CdHit);
        assert_eq!("mmseqs2".parse::<ClusterMethod>().unwrap(), ClusterMethod::Mmseqs);
        assert!("blastclust".parse::<ClusterMethod>().is_err());
    }

    #[test]
    fn test_propagates_from_representative() {
        let temp = TempDir::new().unwrap();
        let mut m = manifest(temp.path(), &["8abc_A", "8abc_B", "9xyz_A"]);
        m.assign_clusters(
            ClusterMethod::CdHit,
            0.7,
            &[cluster("0", "8abc_A", &["8abc_B", "9xyz_A"])],
        )
        .unwrap();
        m.set_reference_status(&key("8abc_A"), in_ecod(1001)).unwrap();

        let updated = ClusterPropagator::new(&mut m).propagate().unwrap();
        assert_eq!(updated, 2);
        assert_eq!(m.chain(&key("9xyz_A")).unwrap().reference, in_ecod(1001));
    }

    #[test]
    fn test_never_overwrites_member_status() {
        let temp = TempDir::new().unwrap();
        let mut m = manifest(temp.path(), &["8abc_A", "8abc_B"]);
        m.assign_clusters(ClusterMethod::Mmseqs, 0.7, &[cluster("8abc_A", "8abc_A", &["8abc_B"])])
            .unwrap();
        m.set_reference_status(&key("8abc_A"), in_ecod(1)).unwrap();

        let previous = ReferenceAnnotation {
            ecod_status: EcodStatus::InPreviousEcod,
            ecod_uid: Some(2),
            ecod_version: Some("develop291".to_string()),
        };
        m.set_reference_status(&key("8abc_B"), previous.clone()).unwrap();

        assert_eq!(ClusterPropagator::new(&mut m).propagate().unwrap(), 0);
        assert_eq!(m.chain(&key("8abc_B")).unwrap().reference, previous);
    }

    #[test]
    fn test_default_representative_updates_nothing() {
        let temp = TempDir::new().unwrap();
        let mut m = manifest(temp.path(), &["8abc_A", "8abc_B"]);
        m.assign_clusters(ClusterMethod::CdHit, 0.7, &[cluster("0", "8abc_A", &["8abc_B"])])
            .unwrap();

        assert_eq!(ClusterPropagator::new(&mut m).propagate().unwrap(), 0);
        assert!(m.chain(&key("8abc_B")).unwrap().reference.is_default());
    }

    #[test]
    fn test_idempotent() {
        let temp = TempDir::new().unwrap();
        let mut m = manifest(temp.path(), &["8abc_A", "8abc_B"]);
        m.assign_clusters(ClusterMethod::CdHit, 0.7, &[cluster("0", "8abc_A", &["8abc_B"])])
            .unwrap();
        m.set_reference_status(&key("8abc_A"), in_ecod(7)).unwrap();

        assert_eq!(ClusterPropagator::new(&mut m).propagate().unwrap(), 1);
        let after_first = m.clone();
        assert_eq!(ClusterPropagator::new(&mut m).propagate().unwrap(), 0);
        assert_eq!(m, after_first);
    }

    #[test]
    fn test_without_clustering_is_noop() {
        let temp = TempDir::new().unwrap();
        let mut m = manifest(temp.path(), &["8abc_A"]);
        m.set_reference_status(&key("8abc_A"), in_ecod(3)).unwrap();
        assert_eq!(ClusterPropagator::new(&mut m).propagate().unwrap(), 0);
    }
}
