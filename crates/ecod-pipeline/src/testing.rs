//! Scripted scheduler and partitioner used by the unit tests

#![allow(clippy::unwrap_used, clippy::expect_used)]

use crate::error::{PipelineError, Result};
use crate::partition::{tests::partition_xml, PartitionOutcome, PartitionRequest, Partitioner};
use crate::scheduler::{JobStateCounts, SbatchScript, Scheduler};
use async_trait::async_trait;
use ecod_common::types::ChainKey;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

type SubmitHook = Box<dyn Fn(&SbatchScript) + Send + Sync>;

/// Scheduler whose job states are scripted by the test.
///
/// Job ids count up from 1000. A job with no scripted states reports every
/// task completed; scripted states are returned one per poll and the last
/// one repeats.
pub(crate) struct FakeScheduler {
    next_id: AtomicU64,
    submitted: Mutex<Vec<SbatchScript>>,
    states: Mutex<HashMap<String, VecDeque<JobStateCounts>>>,
    polls: Mutex<HashMap<String, usize>>,
    on_submit: Mutex<Option<SubmitHook>>,
    reject_submit: AtomicBool,
    unavailable: AtomicBool,
}

impl FakeScheduler {
    pub(crate) fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1000),
            submitted: Mutex::new(Vec::new()),
            states: Mutex::new(HashMap::new()),
            polls: Mutex::new(HashMap::new()),
            on_submit: Mutex::new(None),
            reject_submit: AtomicBool::new(false),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Job ids start at `first`, for a second scheduler on the same batch
    pub(crate) fn with_first_id(first: u64) -> Self {
        let scheduler = Self::new();
        scheduler.next_id.store(first, Ordering::SeqCst);
        scheduler
    }

    pub(crate) fn submitted(&self) -> Vec<SbatchScript> {
        self.submitted.lock().unwrap().clone()
    }

    pub(crate) fn script_states(&self, job_id: &str, states: Vec<JobStateCounts>) {
        self.states
            .lock()
            .unwrap()
            .insert(job_id.to_string(), states.into());
    }

    pub(crate) fn poll_count(&self, job_id: &str) -> usize {
        self.polls.lock().unwrap().get(job_id).copied().unwrap_or(0)
    }

    /// Run `hook` on every submitted script, standing in for the array tasks
    pub(crate) fn on_submit(&self, hook: impl Fn(&SbatchScript) + Send + Sync + 'static) {
        *self.on_submit.lock().unwrap() = Some(Box::new(hook));
    }

    pub(crate) fn reject_submissions(&self, reject: bool) {
        self.reject_submit.store(reject, Ordering::SeqCst);
    }

    /// Make every status query fail as if the scheduler were unreachable
    pub(crate) fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

#[async_trait]
impl Scheduler for FakeScheduler {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn submit(&self, script: &SbatchScript, _script_path: &Path) -> Result<String> {
        if self.reject_submit.load(Ordering::SeqCst) {
            return Err(PipelineError::submission("sbatch: error: invalid partition"));
        }

        let job_id = self.next_id.fetch_add(1, Ordering::SeqCst).to_string();
        self.submitted.lock().unwrap().push(script.clone());
        if let Some(hook) = self.on_submit.lock().unwrap().as_ref() {
            hook(script);
        }
        Ok(job_id)
    }

    async fn job_state(&self, job_id: &str) -> Result<JobStateCounts> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(PipelineError::scheduler(format!("cannot query job {}", job_id)));
        }
        *self.polls.lock().unwrap().entry(job_id.to_string()).or_insert(0) += 1;

        let mut states = self.states.lock().unwrap();
        let counts = match states.get_mut(job_id) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) => queue.front().copied().unwrap_or_default(),
            None => {
                let tasks = self
                    .submitted
                    .lock()
                    .unwrap()
                    .last()
                    .map_or(1, SbatchScript::array_size);
                JobStateCounts {
                    completed: tasks,
                    ..Default::default()
                }
            },
        };
        Ok(counts)
    }
}

/// Chain keys of a submitted script, in array-task order
pub(crate) fn script_chains(script: &SbatchScript) -> Vec<ChainKey> {
    std::fs::read_to_string(script.file_list())
        .unwrap()
        .lines()
        .map(|line| {
            let stem = Path::new(line).file_stem().unwrap().to_string_lossy().into_owned();
            stem.parse().unwrap()
        })
        .collect()
}

/// Partitioner that writes a canned partition document per chain
pub(crate) struct FakePartitioner {
    outcomes: Mutex<HashMap<ChainKey, (f64, usize)>>,
    failing: Mutex<HashSet<ChainKey>>,
    calls: Mutex<Vec<ChainKey>>,
}

impl FakePartitioner {
    pub(crate) fn new() -> Self {
        Self {
            outcomes: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Partition `key` with the given coverage and domain count
    pub(crate) fn outcome(&self, key: &str, coverage: f64, domains: usize) {
        self.outcomes
            .lock()
            .unwrap()
            .insert(key.parse().unwrap(), (coverage, domains));
    }

    pub(crate) fn fail(&self, key: &str) {
        self.failing.lock().unwrap().insert(key.parse().unwrap());
    }

    pub(crate) fn calls(&self) -> Vec<ChainKey> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Partitioner for FakePartitioner {
    async fn partition(&self, request: &PartitionRequest) -> Result<PartitionOutcome> {
        self.calls.lock().unwrap().push(request.key.clone());

        if self.failing.lock().unwrap().contains(&request.key) {
            return Err(PipelineError::partition(format!(
                "{} exited with 1: segmentation fault",
                request.key
            )));
        }

        let (coverage, domains) = self
            .outcomes
            .lock()
            .unwrap()
            .get(&request.key)
            .copied()
            .unwrap_or((0.85, 2));

        let xml = partition_xml(coverage, domains);
        if let Some(parent) = request.output.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&request.output, &xml)?;
        PartitionOutcome::parse(&xml).map_err(|reason| PipelineError::parse(&request.output, reason))
    }
}
