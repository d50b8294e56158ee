//! Typed builders for array-job scripts and the search commands they run
//!
//! Every builder validates its inputs in `build()`/`render()` so a malformed
//! script never reaches `sbatch`.

use crate::config::{BlastSettings, HhsearchSettings};
use crate::error::{PipelineError, Result};
use regex::Regex;
use std::path::{Path, PathBuf};

/// Shell variable holding the FASTA path of the current array task
pub const FASTA_VAR: &str = "FASTA_FILE";
/// Shell variable holding `{pdb}_{chain}` of the current array task
pub const NAME_VAR: &str = "BASENAME";

/// Resource request for one array task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskResources {
    pub memory: String,
    pub cpus: u32,
    pub time_limit: String,
}

impl TaskResources {
    /// 8G, 1 cpu, 4 hours
    pub fn primary_search() -> Self {
        Self {
            memory: "8G".to_string(),
            cpus: 1,
            time_limit: "4:00:00".to_string(),
        }
    }

    /// 16G, 4 cpus, 8 hours
    pub fn secondary_search() -> Self {
        Self {
            memory: "16G".to_string(),
            cpus: 4,
            time_limit: "8:00:00".to_string(),
        }
    }
}

/// A rendered, validated SLURM array script
#[derive(Debug, Clone)]
pub struct SbatchScript {
    job_name: String,
    partition: String,
    array_size: usize,
    array_limit: u32,
    resources: TaskResources,
    log_dir: PathBuf,
    file_list: PathBuf,
    commands: Vec<String>,
}

impl SbatchScript {
    pub fn builder(job_name: impl Into<String>) -> SbatchScriptBuilder {
        SbatchScriptBuilder {
            job_name: job_name.into(),
            partition: None,
            array_size: 0,
            array_limit: None,
            resources: None,
            log_dir: None,
            file_list: None,
            commands: Vec::new(),
        }
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    pub fn array_size(&self) -> usize {
        self.array_size
    }

    pub fn resources(&self) -> &TaskResources {
        &self.resources
    }

    pub fn file_list(&self) -> &Path {
        &self.file_list
    }

    /// `1-N%limit`
    pub fn array_spec(&self) -> String {
        format!("1-{}%{}", self.array_size, self.array_limit)
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str("#!/bin/bash\n");
        out.push_str(&format!("#SBATCH --job-name={}\n", self.job_name));
        out.push_str(&format!("#SBATCH --partition={}\n", self.partition));
        out.push_str(&format!("#SBATCH --array={}\n", self.array_spec()));
        out.push_str(&format!("#SBATCH --time={}\n", self.resources.time_limit));
        out.push_str(&format!("#SBATCH --mem={}\n", self.resources.memory));
        out.push_str(&format!("#SBATCH --cpus-per-task={}\n", self.resources.cpus));
        out.push_str(&format!(
            "#SBATCH --output={}/{}_%A_%a.out\n",
            self.log_dir.display(),
            self.job_name
        ));
        out.push_str(&format!(
            "#SBATCH --error={}/{}_%A_%a.err\n",
            self.log_dir.display(),
            self.job_name
        ));
        out.push_str("\nset -euo pipefail\n\n");
        out.push_str(&format!(
            "{}=$(sed -n \"${{SLURM_ARRAY_TASK_ID}}p\" {})\n",
            FASTA_VAR,
            self.file_list.display()
        ));
        out.push_str(&format!("{}=$(basename \"${}\" .fa)\n\n", NAME_VAR, FASTA_VAR));
        out.push_str(&format!("echo \"Processing: ${}\"\n", NAME_VAR));
        for command in &self.commands {
            out.push('\n');
            out.push_str(command);
            out.push('\n');
        }
        out.push_str(&format!("\necho \"Done: ${}\"\n", NAME_VAR));
        out
    }
}

pub struct SbatchScriptBuilder {
    job_name: String,
    partition: Option<String>,
    array_size: usize,
    array_limit: Option<u32>,
    resources: Option<TaskResources>,
    log_dir: Option<PathBuf>,
    file_list: Option<PathBuf>,
    commands: Vec<String>,
}

impl SbatchScriptBuilder {
    pub fn partition(mut self, partition: impl Into<String>) -> Self {
        self.partition = Some(partition.into());
        self
    }

    pub fn array(mut self, size: usize, limit: u32) -> Self {
        self.array_size = size;
        self.array_limit = Some(limit);
        self
    }

    pub fn resources(mut self, resources: TaskResources) -> Self {
        self.resources = Some(resources);
        self
    }

    pub fn log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }

    pub fn file_list(mut self, path: impl Into<PathBuf>) -> Self {
        self.file_list = Some(path.into());
        self
    }

    pub fn command(mut self, command: impl Into<String>) -> Self {
        self.commands.push(command.into());
        self
    }

    pub fn build(self) -> Result<SbatchScript> {
        let invalid = |msg: String| PipelineError::submission(format!("invalid job script: {}", msg));

        if self.job_name.is_empty()
            || !self
                .job_name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(invalid(format!("bad job name '{}'", self.job_name)));
        }
        if self.array_size == 0 {
            return Err(invalid("array must have at least one task".to_string()));
        }
        let array_limit = self.array_limit.unwrap_or(1);
        if array_limit == 0 {
            return Err(invalid("array limit must be positive".to_string()));
        }

        let partition = self
            .partition
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| invalid("partition is required".to_string()))?;
        let resources = self
            .resources
            .ok_or_else(|| invalid("resources are required".to_string()))?;
        let memory_pattern = Regex::new(r"^\d+[KMGT]?$")?;
        let time_pattern = Regex::new(r"^(\d+-)?\d{1,3}:\d{2}:\d{2}$")?;
        if !memory_pattern.is_match(&resources.memory) {
            return Err(invalid(format!("bad memory request '{}'", resources.memory)));
        }
        if !time_pattern.is_match(&resources.time_limit) {
            return Err(invalid(format!("bad time limit '{}'", resources.time_limit)));
        }
        if resources.cpus == 0 {
            return Err(invalid("cpus must be positive".to_string()));
        }

        let log_dir = self
            .log_dir
            .ok_or_else(|| invalid("log directory is required".to_string()))?;
        let file_list = self
            .file_list
            .ok_or_else(|| invalid("file list is required".to_string()))?;
        if self.commands.is_empty() {
            return Err(invalid("script has no commands".to_string()));
        }

        Ok(SbatchScript {
            job_name: self.job_name,
            partition,
            array_size: self.array_size,
            array_limit,
            resources,
            log_dir,
            file_list,
            commands: self.commands,
        })
    }
}

/// One `blastp` invocation producing XML output
#[derive(Debug, Clone)]
pub struct BlastCommand {
    program: String,
    database: PathBuf,
    output: String,
    evalue: f64,
    max_alignments: u32,
}

impl BlastCommand {
    /// `output` may reference the task variables, e.g. `blast/${BASENAME}.chain_blast.xml`
    pub fn new(settings: &BlastSettings, database: &Path, output: impl Into<String>) -> Self {
        Self {
            program: settings.program.clone(),
            database: database.to_path_buf(),
            output: output.into(),
            evalue: settings.evalue,
            max_alignments: settings.max_alignments,
        }
    }

    pub fn render(&self) -> Result<String> {
        if self.program.trim().is_empty() {
            return Err(PipelineError::submission("BLAST program is empty"));
        }
        if self.database.as_os_str().is_empty() {
            return Err(PipelineError::submission("BLAST database is empty"));
        }
        if !(self.evalue > 0.0) || self.max_alignments == 0 {
            return Err(PipelineError::submission(
                "BLAST evalue and max alignments must be positive",
            ));
        }

        Ok(format!(
            "{} \\\n    -query \"${}\" \\\n    -db {} \\\n    -outfmt 5 \\\n    -num_alignments {} \\\n    -evalue {} \\\n    -out \"{}\"",
            self.program,
            FASTA_VAR,
            self.database.display(),
            self.max_alignments,
            self.evalue,
            self.output
        ))
    }
}

/// One `hhsearch` invocation producing an `.hhr` report
#[derive(Debug, Clone)]
pub struct HhsearchCommand {
    program: String,
    database: PathBuf,
    output: String,
    evalue: f64,
    min_probability: u32,
    max_hits: u32,
}

impl HhsearchCommand {
    pub fn new(settings: &HhsearchSettings, output: impl Into<String>) -> Self {
        Self {
            program: settings.program.clone(),
            database: settings.database.clone(),
            output: output.into(),
            evalue: settings.evalue,
            min_probability: settings.min_probability,
            max_hits: settings.max_hits,
        }
    }

    pub fn render(&self) -> Result<String> {
        if self.program.trim().is_empty() {
            return Err(PipelineError::submission("HHsearch program is empty"));
        }
        if self.database.as_os_str().is_empty() {
            return Err(PipelineError::submission("HHsearch database is empty"));
        }
        if !(self.evalue > 0.0) || self.min_probability > 100 || self.max_hits == 0 {
            return Err(PipelineError::submission("HHsearch thresholds are out of range"));
        }

        Ok(format!(
            "{} \\\n    -i \"${}\" \\\n    -d {} \\\n    -o \"{}\" \\\n    -e {} \\\n    -p {} \\\n    -n {} \\\n    -cpu ${{SLURM_CPUS_PER_TASK}}",
            self.program,
            FASTA_VAR,
            self.database.display(),
            self.output,
            self.evalue,
            self.min_probability,
            self.max_hits
        ))
    }
}
