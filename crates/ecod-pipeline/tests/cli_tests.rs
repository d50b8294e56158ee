//! End-to-end tests for the ecod-batch command line
//!
//! These tests drive the binary against temporary batch roots:
//! - Batch creation from a chain FASTA
//! - Status output (table and JSON)
//! - Clustering, reference status import and propagation
//! - Repair batches
//! - Report coverage
//! - Argument errors and exit codes

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;
use tempfile::TempDir;

const CHAINS: &str = "\
>8abc_A
MKTAYIAKQRQISFVKSHFSRQLEERLGLIEVQAPILSRVGDGTQDNLSGAEKAVQVKVKALPDAQ
>8abc_B
MKTAYIAKQRQISFVKSHFSRQLEERLGLIEVQAPILSRVGDGTQDNLSGAEKAVQ
>8abc_C
MKTAY
";

const BATCH: &str = "ecod_weekly_20251010";

/// Command with an isolated working directory and batch root
fn ecod_batch(root: &Path) -> Command {
    let mut cmd = Command::cargo_bin("ecod-batch").unwrap();
    cmd.current_dir(root)
        .env("NO_COLOR", "1")
        .env_remove("ECOD_BATCH_ROOT")
        .env_remove("LOG_LEVEL")
        .arg("--batch-root")
        .arg(root);
    cmd
}

fn create_batch(root: &Path) {
    let fasta = root.join("chains.fa");
    std::fs::write(&fasta, CHAINS).unwrap();

    ecod_batch(root)
        .args(["create", "--release-date", "2025-10-10", "--chains"])
        .arg(&fasta)
        .assert()
        .success();
}

// ============================================================================
// Argument handling
// ============================================================================

#[test]
fn test_missing_subcommand_exits_with_usage_error() {
    let temp = TempDir::new().unwrap();
    ecod_batch(temp.path())
        .assert()
        .code(2)
        .stderr(predicate::str::contains("A subcommand is required"));
}

#[test]
fn test_markdown_help() {
    let temp = TempDir::new().unwrap();
    ecod_batch(temp.path())
        .arg("--markdown-help")
        .assert()
        .success()
        .stdout(predicate::str::contains("ecod-batch"))
        .stdout(predicate::str::contains("load-clusters"))
        .stdout(predicate::str::contains("import-status"));
}

#[test]
fn test_unknown_cluster_method_rejected() {
    let temp = TempDir::new().unwrap();
    ecod_batch(temp.path())
        .args(["load-clusters", BATCH, "--file", "c.tsv", "--threshold", "0.7", "--method", "blastclust"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("unknown clustering method"));
}

// ============================================================================
// Batch lifecycle
// ============================================================================

#[test]
fn test_create_batch() {
    let temp = TempDir::new().unwrap();
    let fasta = temp.path().join("chains.fa");
    std::fs::write(&fasta, CHAINS).unwrap();

    ecod_batch(temp.path())
        .args(["create", "--release-date", "2025-10-10", "--chains"])
        .arg(&fasta)
        .assert()
        .success()
        .stdout(predicate::str::contains(BATCH))
        .stdout(predicate::str::contains("Chains added:   3"))
        .stdout(predicate::str::contains("Unclassifiable: 1"));

    let batch_dir = temp.path().join(BATCH);
    assert!(batch_dir.join("batch_manifest.yaml").exists());
    assert!(batch_dir.join("fastas").is_dir());
    assert!(batch_dir.join("slurm_logs").is_dir());

    // Creating again keeps the existing chains
    ecod_batch(temp.path())
        .args(["create", "--release-date", "2025-10-10", "--chains"])
        .arg(&fasta)
        .assert()
        .success()
        .stdout(predicate::str::contains("Chains added:   0"))
        .stdout(predicate::str::contains("Already listed: 3"));
}

#[test]
fn test_create_rejects_bad_threshold() {
    let temp = TempDir::new().unwrap();
    let fasta = temp.path().join("chains.fa");
    std::fs::write(&fasta, CHAINS).unwrap();

    ecod_batch(temp.path())
        .args(["create", "--threshold", "1.5", "--chains"])
        .arg(&fasta)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("coverage threshold"));
}

#[test]
fn test_status_table_and_json() {
    let temp = TempDir::new().unwrap();
    create_batch(temp.path());

    ecod_batch(temp.path())
        .args(["status", BATCH])
        .assert()
        .success()
        .stdout(predicate::str::contains("primary_search"))
        .stdout(predicate::str::contains("develop291"));

    ecod_batch(temp.path())
        .args(["status", BATCH, "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"total_structures\": 2"))
        .stdout(predicate::str::contains("\"unclassifiable\": 1"));
}

#[test]
fn test_status_of_missing_batch_fails() {
    let temp = TempDir::new().unwrap();
    ecod_batch(temp.path())
        .args(["status", "ecod_weekly_19990101"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn test_run_missing_batch_fails() {
    let temp = TempDir::new().unwrap();
    ecod_batch(temp.path())
        .args(["run", "ecod_weekly_19990101", "--scheduler", "local"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("not found"));
}

// ============================================================================
// Clustering and reference status
// ============================================================================

#[test]
fn test_clusters_import_and_propagate() {
    let temp = TempDir::new().unwrap();
    create_batch(temp.path());

    let clusters = temp.path().join("clusters.tsv");
    std::fs::write(&clusters, "8abc_A\t8abc_A\n8abc_A\t8abc_B\n9zzz_A\t9zzz_A\n").unwrap();
    ecod_batch(temp.path())
        .args(["load-clusters", BATCH, "--method", "mmseqs", "--threshold", "0.7", "--file"])
        .arg(&clusters)
        .assert()
        .success()
        .stdout(predicate::str::contains("Members linked:  1"));

    let status = temp.path().join("status.tsv");
    std::fs::write(&status, "chain_key\tstatus\tuid\tversion\n8abc_A\tin_current_ecod\t1402345\tdevelop291\n")
        .unwrap();
    ecod_batch(temp.path())
        .args(["import-status", BATCH, "--file"])
        .arg(&status)
        .assert()
        .success()
        .stdout(predicate::str::contains("Updated:      1"));

    ecod_batch(temp.path())
        .args(["propagate", BATCH])
        .assert()
        .success()
        .stdout(predicate::str::contains("Members updated: 1"));

    // A second pass finds nothing left to copy
    ecod_batch(temp.path())
        .args(["propagate", BATCH])
        .assert()
        .success()
        .stdout(predicate::str::contains("Members updated: 0"));

    let manifest = std::fs::read_to_string(temp.path().join(BATCH).join("batch_manifest.yaml")).unwrap();
    assert_eq!(manifest.matches("in_current_ecod").count(), 2);
}

#[test]
fn test_propagate_without_clustering() {
    let temp = TempDir::new().unwrap();
    create_batch(temp.path());

    ecod_batch(temp.path())
        .args(["propagate", BATCH])
        .assert()
        .success()
        .stdout(predicate::str::contains("No clustering loaded"));
}

// ============================================================================
// Repair batches
// ============================================================================

#[test]
fn test_repair_batch_from_source() {
    let temp = TempDir::new().unwrap();
    create_batch(temp.path());

    ecod_batch(temp.path())
        .args(["repair", "ecod_repair_20251017", "--select", "all", "--sources", BATCH])
        .assert()
        .success()
        .stdout(predicate::str::contains("Chains:    2"));

    let manifest =
        std::fs::read_to_string(temp.path().join("ecod_repair_20251017").join("batch_manifest.yaml")).unwrap();
    assert!(manifest.contains("batch_kind: repair"));
    assert!(manifest.contains(BATCH));

    // The repair batch name is now taken
    ecod_batch(temp.path())
        .args(["repair", "ecod_repair_20251017", "--sources", BATCH])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("already exists"));
}

// ============================================================================
// Coverage
// ============================================================================

#[test]
fn test_coverage_of_blast_report() {
    let temp = TempDir::new().unwrap();
    let report = temp.path().join("8abc_A.chain_blast.xml");
    std::fs::write(
        &report,
        r#"<?xml version="1.0"?>
<BlastOutput>
  <BlastOutput_iterations>
    <Iteration>
      <Iteration_query-len>100</Iteration_query-len>
      <Iteration_hits>
        <Hit>
          <Hit_id>e8abcA1</Hit_id>
          <Hit_def>8abc A:1-60</Hit_def>
          <Hit_len>60</Hit_len>
          <Hit_hsps>
            <Hsp>
              <Hsp_bit-score>120.5</Hsp_bit-score>
              <Hsp_evalue>1e-30</Hsp_evalue>
              <Hsp_query-from>1</Hsp_query-from>
              <Hsp_query-to>60</Hsp_query-to>
              <Hsp_hit-from>1</Hsp_hit-from>
              <Hsp_hit-to>60</Hsp_hit-to>
              <Hsp_identity>55</Hsp_identity>
              <Hsp_align-len>60</Hsp_align-len>
            </Hsp>
          </Hit_hsps>
        </Hit>
      </Iteration_hits>
    </Iteration>
  </BlastOutput_iterations>
</BlastOutput>
"#,
    )
    .unwrap();

    ecod_batch(temp.path())
        .arg("coverage")
        .arg(&report)
        .args(["--threshold", "0.9"])
        .assert()
        .success()
        .stdout(predicate::str::contains("0.6000"))
        .stdout(predicate::str::contains("Secondary search needed"));
}

#[test]
fn test_coverage_of_missing_report_fails() {
    let temp = TempDir::new().unwrap();
    ecod_batch(temp.path())
        .args(["coverage", "missing.xml"])
        .assert()
        .code(1);
}
