//! ECOD Batch Pipeline
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Weekly batch orchestration for classifying newly released PDB chains
//! against the ECOD domain reference.
//!
//! # Overview
//!
//! - **Manifest Store**: the per-batch YAML manifest and its state machine ([`manifest`])
//! - **External Job Runner**: SLURM array jobs for BLAST and HHsearch ([`scheduler`])
//! - **Pipeline Orchestrator**: stage sequencing, evidence and partitioning ([`orchestrator`])
//! - **Clustering Propagator**: reference status spread across sequence clusters ([`cluster`])
//!
//! The `ecod-batch` binary exposes each of these as a subcommand.

pub mod cluster;
pub mod commands;
pub mod config;
pub mod directories;
pub mod enumerate;
pub mod error;
pub mod evidence;
pub mod manifest;
pub mod orchestrator;
pub mod partition;
pub mod reference;
pub mod scheduler;
pub mod search;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use config::PipelineConfig;
pub use error::{PipelineError, Result};
pub use manifest::BatchManifest;
pub use orchestrator::{Orchestrator, WorkflowOutcome, WorkflowStatus};

use crate::cluster::ClusterMethod;
use crate::config::{SchedulerBackend, SecondaryFailurePolicy};
use crate::manifest::repair::RepairSelection;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// ecod-batch - weekly ECOD classification batches
#[derive(Parser, Debug)]
#[command(name = "ecod-batch")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Directory holding one sub-directory per batch
    #[arg(long, env = "ECOD_BATCH_ROOT", global = true)]
    pub batch_root: Option<PathBuf>,

    /// Print the CLI reference as markdown and exit
    #[arg(long, hide = true)]
    pub markdown_help: bool,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a batch from a chain FASTA file
    Create {
        /// Batch name (defaults to ecod_weekly_YYYYMMDD from the release date)
        #[arg(short, long)]
        name: Option<String>,

        /// PDB release date (YYYY-MM-DD)
        #[arg(short, long)]
        release_date: Option<NaiveDate>,

        /// FASTA file with one `>{pdb}_{chain}` record per chain
        #[arg(short, long)]
        chains: PathBuf,

        /// Primary-search coverage below which HHsearch runs
        #[arg(short, long)]
        threshold: Option<f64>,

        /// ECOD reference version
        #[arg(long)]
        reference: Option<String>,
    },

    /// Run or resume every stage of a batch
    Run {
        /// Batch name or directory
        batch: String,

        /// Scheduler backend (slurm or local)
        #[arg(long)]
        scheduler: Option<SchedulerBackend>,

        /// SLURM partition for array jobs
        #[arg(short, long)]
        partition: Option<String>,

        /// Seconds between job state checks
        #[arg(long)]
        poll_interval: Option<u64>,

        /// Give up waiting on a job after this many seconds
        #[arg(long)]
        wait_timeout: Option<u64>,

        /// What to do with chains whose HHsearch failed (fallback_to_primary or fail_chain)
        #[arg(long)]
        secondary_failure_policy: Option<SecondaryFailurePolicy>,
    },

    /// Show batch progress
    Status {
        /// Batch name or directory
        batch: String,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Load sequence clusters into a batch
    LoadClusters {
        /// Batch name or directory
        batch: String,

        /// CD-HIT `.clstr` or mmseqs2 cluster TSV
        #[arg(short, long)]
        file: PathBuf,

        /// Clustering tool that produced the file (cd_hit or mmseqs)
        #[arg(short, long, default_value = "cd_hit")]
        method: ClusterMethod,

        /// Sequence identity threshold the clustering ran at
        #[arg(short, long)]
        threshold: f64,
    },

    /// Import ECOD reference status from a TSV file
    ImportStatus {
        /// Batch name or directory
        batch: String,

        /// `chain_key<TAB>status<TAB>uid<TAB>version` file
        #[arg(short, long)]
        file: PathBuf,

        /// Propagate to cluster members after importing
        #[arg(long)]
        propagate: bool,
    },

    /// Copy representative reference status to cluster members
    Propagate {
        /// Batch name or directory
        batch: String,
    },

    /// Create a repair batch from failed or low-quality chains
    Repair {
        /// Name of the new batch
        name: String,

        /// Source batch names or directories
        #[arg(short, long, required = true, num_args = 1..)]
        sources: Vec<String>,

        /// Which chains to take (failed, low_quality or all)
        #[arg(long, default_value = "failed")]
        select: RepairSelection,

        /// Also rerun both searches for the selected chains
        #[arg(long)]
        rerun_searches: bool,
    },

    /// Compute query coverage of a BLAST XML or HHsearch report
    Coverage {
        /// Report file (`.xml` or `.hhr`)
        report: PathBuf,

        /// Report whether coverage is below this threshold
        #[arg(short, long)]
        threshold: Option<f64>,
    },
}
