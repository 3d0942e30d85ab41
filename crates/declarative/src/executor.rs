//! Execution engine - applies a change set with bounded parallelism
//!
//! The scheduler runs on the calling thread. It owns the status table,
//! hands ready operations to a rayon pool and receives completions over a
//! channel. An operation becomes ready once all of its predecessors have
//! finished; if any of them did not succeed it is skipped without a
//! provider call, so failures propagate only down their own subtree.

use crate::error::ProviderError;
use crate::expr::AttrRef;
use crate::planner::{Action, ChangeSet, Operation};
use crate::provider::{Provider, output_id};
use crate::retry::{RetryConfig, with_retry};
use crate::state::StateStore;
use crate::types::{Attributes, ResourceKind, StateRecord};
use chrono::Utc;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

// ============================================================================
// Options and callbacks
// ============================================================================

/// Stops scheduling new operations; in-flight ones still finish
#[derive(Debug, Clone, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Options for [`apply`]
#[derive(Debug, Clone)]
pub struct ApplyOptions {
    /// Worker threads for provider calls
    pub jobs: usize,
    /// Abort scheduling after the first failure
    pub fail_fast: bool,
    /// Retry policy for idempotent reads
    pub retry: RetryConfig,
    pub abort: AbortHandle,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            jobs: 4,
            fail_fast: false,
            retry: RetryConfig::default(),
            abort: AbortHandle::new(),
        }
    }
}

/// Progress reporting hooks, called on the scheduler thread
pub trait ProgressCallback {
    /// Called once with the number of operations that call the provider
    fn on_start(&mut self, changes: usize);

    /// Called when an operation is handed to a worker
    fn on_operation_start(&mut self, op: &Operation);

    /// Called when an operation finishes, including skipped ones
    fn on_operation_complete(&mut self, op: &Operation, status: &OpStatus);

    fn on_complete(&mut self);
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_start(&mut self, _changes: usize) {}
    fn on_operation_start(&mut self, _op: &Operation) {}
    fn on_operation_complete(&mut self, _op: &Operation, _status: &OpStatus) {}
    fn on_complete(&mut self) {}
}

// ============================================================================
// Results
// ============================================================================

/// What a successful operation did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Change {
    Created,
    Updated,
    Replaced,
    Deleted,
    Unchanged,
}

/// Final status of one operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OpStatus {
    Succeeded { change: Change },
    Failed { reason: String },
    Skipped { reason: String },
}

impl OpStatus {
    fn succeeded(change: Change) -> Self {
        Self::Succeeded { change }
    }

    fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }

    fn skipped(reason: impl Into<String>) -> Self {
        Self::Skipped {
            reason: reason.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }
}

impl fmt::Display for OpStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded { change } => write!(f, "{change:?}"),
            Self::Failed { reason } => write!(f, "failed: {reason}"),
            Self::Skipped { reason } => write!(f, "skipped: {reason}"),
        }
    }
}

/// Status of one operation, by resource name
#[derive(Debug, Clone, Serialize)]
pub struct OperationResult {
    pub name: String,
    pub kind: ResourceKind,
    pub action: Action,
    pub status: OpStatus,
}

/// Counts per final status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ApplySummary {
    pub created: usize,
    pub updated: usize,
    pub replaced: usize,
    pub deleted: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl ApplySummary {
    /// Total number of actual changes made
    pub fn total_changes(&self) -> usize {
        self.created + self.updated + self.replaced + self.deleted
    }

    fn add(&mut self, status: &OpStatus) {
        match status {
            OpStatus::Succeeded { change } => match change {
                Change::Created => self.created += 1,
                Change::Updated => self.updated += 1,
                Change::Replaced => self.replaced += 1,
                Change::Deleted => self.deleted += 1,
                Change::Unchanged => self.unchanged += 1,
            },
            OpStatus::Failed { .. } => self.failed += 1,
            OpStatus::Skipped { .. } => self.skipped += 1,
        }
    }
}

/// Outcome of an apply, in change set order
#[derive(Debug, Clone, Default, Serialize)]
pub struct ApplyResult {
    pub results: Vec<OperationResult>,
    pub duration: Duration,
}

impl ApplyResult {
    pub fn summary(&self) -> ApplySummary {
        let mut summary = ApplySummary::default();
        for result in &self.results {
            summary.add(&result.status);
        }
        summary
    }

    /// No operation failed or was skipped
    pub fn is_success(&self) -> bool {
        self.results.iter().all(|r| r.status.is_success())
    }

    pub fn status(&self, name: &str) -> Option<&OpStatus> {
        self.results.iter().find(|r| r.name == name).map(|r| &r.status)
    }

    pub fn failed(&self) -> impl Iterator<Item = &OperationResult> {
        self.results
            .iter()
            .filter(|r| matches!(r.status, OpStatus::Failed { .. }))
    }

    pub fn skipped(&self) -> impl Iterator<Item = &OperationResult> {
        self.results
            .iter()
            .filter(|r| matches!(r.status, OpStatus::Skipped { .. }))
    }
}

// ============================================================================
// Scheduler
// ============================================================================

/// Known attributes per node, filled once its operation succeeds
type Slots = HashMap<String, OnceLock<Attributes>>;

/// Apply a change set
pub fn apply(
    change_set: ChangeSet,
    provider: Arc<dyn Provider>,
    state: Arc<dyn StateStore>,
    opts: &ApplyOptions,
) -> ApplyResult {
    apply_with_progress(change_set, provider, state, opts, &mut NoProgress)
}

/// Apply a change set, reporting progress
pub fn apply_with_progress<P: ProgressCallback>(
    change_set: ChangeSet,
    provider: Arc<dyn Provider>,
    state: Arc<dyn StateStore>,
    opts: &ApplyOptions,
    progress: &mut P,
) -> ApplyResult {
    let started = Instant::now();
    let operations = change_set.into_operations();

    let slots: Arc<Slots> = Arc::new(
        operations
            .iter()
            .filter(|op| op.node.is_some())
            .map(|op| (op.name.clone(), OnceLock::new()))
            .collect(),
    );

    let pool = match rayon::ThreadPoolBuilder::new()
        .num_threads(opts.jobs.max(1))
        .thread_name(|i| format!("apply-worker-{i}"))
        .build()
    {
        Ok(pool) => Some(pool),
        Err(e) => {
            log::warn!("Failed to create thread pool, using global pool: {}", e);
            None
        }
    };

    let (tx, rx) = mpsc::channel();
    let mut scheduler = Scheduler::new(&operations);
    progress.on_start(operations.iter().filter(|op| op.action.is_change()).count());

    loop {
        while let Some(index) = scheduler.ready.pop_first() {
            let op = &operations[index];

            if let Some(reason) = scheduler.blocked_reason(&operations, index) {
                scheduler.finish(&operations, index, OpStatus::skipped(reason), opts, progress);
                continue;
            }
            if opts.abort.is_aborted() {
                scheduler.finish(&operations, index, OpStatus::skipped("aborted"), opts, progress);
                continue;
            }
            if op.action == Action::NoOp {
                let status = settle_unchanged(op, &slots, state.as_ref());
                scheduler.finish(&operations, index, status, opts, progress);
                continue;
            }

            log::debug!("Dispatching {} of '{}'", op.action, op.name);
            progress.on_operation_start(op);
            scheduler.in_flight += 1;

            let job = Job {
                op: op.clone(),
                provider: Arc::clone(&provider),
                state: Arc::clone(&state),
                slots: Arc::clone(&slots),
                retry: opts.retry.clone(),
            };
            let tx = tx.clone();
            let work = move || {
                let status = job.run();
                // The receiver outlives every worker
                let _ = tx.send((index, status));
            };
            match &pool {
                Some(pool) => pool.spawn(work),
                None => rayon::spawn(work),
            }
        }

        if scheduler.in_flight == 0 {
            break;
        }
        let Ok((index, status)) = rx.recv() else {
            break;
        };
        scheduler.in_flight -= 1;
        scheduler.finish(&operations, index, status, opts, progress);
    }

    progress.on_complete();

    let results = operations
        .iter()
        .zip(scheduler.statuses)
        .map(|(op, status)| OperationResult {
            name: op.name.clone(),
            kind: op.kind,
            action: op.action,
            status: status.unwrap_or_else(|| OpStatus::skipped("not scheduled")),
        })
        .collect();

    ApplyResult {
        results,
        duration: started.elapsed(),
    }
}

/// Status table and readiness bookkeeping, owned by the scheduler thread
struct Scheduler {
    statuses: Vec<Option<OpStatus>>,
    waiting_on: Vec<usize>,
    successors: Vec<Vec<usize>>,
    ready: BTreeSet<usize>,
    in_flight: usize,
}

impl Scheduler {
    fn new(operations: &[Operation]) -> Self {
        let mut successors = vec![Vec::new(); operations.len()];
        let mut waiting_on = vec![0; operations.len()];
        for (index, op) in operations.iter().enumerate() {
            for &pred in &op.after {
                successors[pred].push(index);
                waiting_on[index] += 1;
            }
        }
        let ready = (0..operations.len()).filter(|&i| waiting_on[i] == 0).collect();

        Self {
            statuses: vec![None; operations.len()],
            waiting_on,
            successors,
            ready,
            in_flight: 0,
        }
    }

    /// Why an operation cannot run, if a predecessor did not succeed
    fn blocked_reason(&self, operations: &[Operation], index: usize) -> Option<String> {
        operations[index].after.iter().find_map(|&pred| {
            let name = &operations[pred].name;
            match &self.statuses[pred] {
                Some(OpStatus::Failed { .. }) => Some(format!("dependency '{name}' failed")),
                Some(OpStatus::Skipped { .. }) => Some(format!("dependency '{name}' was skipped")),
                _ => None,
            }
        })
    }

    fn finish<P: ProgressCallback>(
        &mut self,
        operations: &[Operation],
        index: usize,
        status: OpStatus,
        opts: &ApplyOptions,
        progress: &mut P,
    ) {
        let op = &operations[index];
        match &status {
            OpStatus::Succeeded { change } => log::info!("{} '{}': {:?}", op.kind, op.name, change),
            OpStatus::Failed { reason } => {
                log::warn!("{} '{}' failed: {}", op.kind, op.name, reason);
                if opts.fail_fast {
                    opts.abort.abort();
                }
            }
            OpStatus::Skipped { reason } => log::info!("{} '{}' skipped: {}", op.kind, op.name, reason),
        }
        progress.on_operation_complete(op, &status);
        self.statuses[index] = Some(status);

        for &next in &self.successors[index] {
            self.waiting_on[next] -= 1;
            if self.waiting_on[next] == 0 {
                self.ready.insert(next);
            }
        }
    }
}

// ============================================================================
// Operations
// ============================================================================

/// Everything a worker needs to run one operation
struct Job {
    op: Operation,
    provider: Arc<dyn Provider>,
    state: Arc<dyn StateStore>,
    slots: Arc<Slots>,
    retry: RetryConfig,
}

impl Job {
    fn run(&self) -> OpStatus {
        let result = match self.op.action {
            Action::Create => self.create().map(|()| Change::Created),
            Action::Update => self.update(),
            Action::Replace => self
                .delete_existing()
                .and_then(|()| self.create())
                .map(|()| Change::Replaced),
            Action::Delete => self.delete_existing().map(|()| Change::Deleted),
            Action::NoOp => return settle_unchanged(&self.op, &self.slots, self.state.as_ref()),
        };
        match result {
            Ok(change) => OpStatus::succeeded(change),
            Err(reason) => OpStatus::failed(reason),
        }
    }

    /// Resolve the node's inputs from producer slots
    fn resolve_inputs(&self) -> Result<Attributes, String> {
        let node = self.op.node.as_ref().ok_or("operation has no resource node")?;
        let lookup = |r: &AttrRef| {
            self.slots
                .get(&r.node)
                .and_then(OnceLock::get)
                .and_then(|attrs| attrs.get(&r.attr))
                .cloned()
        };
        let resolved = node.resolve_inputs(&lookup);
        if !resolved.is_complete() {
            return Err(format!(
                "could not resolve inputs: {}",
                resolved.pending.join(", ")
            ));
        }
        Ok(resolved.values)
    }

    fn prior(&self) -> Result<&StateRecord, String> {
        self.op
            .prior
            .as_ref()
            .ok_or_else(|| format!("no recorded state for '{}'", self.op.name))
    }

    fn create(&self) -> Result<(), String> {
        let inputs = self.resolve_inputs()?;
        let outputs = self
            .provider
            .create(self.op.kind, &inputs)
            .map_err(|e| e.to_string())?;
        let id = output_id(&outputs).ok_or("provider returned no id")?;
        self.record(id, inputs, outputs)
    }

    fn update(&self) -> Result<Change, String> {
        let prior = self.prior()?;
        let inputs = self.resolve_inputs()?;

        // Pending inputs resolved to what is already applied
        if inputs == prior.inputs {
            publish(&self.slots, &self.op.name, prior);
            sync_dependencies(&self.op, prior, self.state.as_ref())?;
            return Ok(Change::Unchanged);
        }

        self.read(prior).map_err(|e| {
            if e.is_not_found() {
                format!("{e}; it was removed outside keel, run refresh")
            } else {
                e.to_string()
            }
        })?;

        let outputs = self
            .provider
            .update(self.op.kind, &prior.id, &inputs)
            .map_err(|e| e.to_string())?;
        let id = output_id(&outputs).unwrap_or_else(|| prior.id.clone());
        // Providers may report only what changed
        let mut merged = prior.outputs.clone();
        merged.extend(outputs);
        self.record(id, inputs, merged)?;
        Ok(Change::Updated)
    }

    /// Delete the recorded resource, treating an already missing one as deleted
    fn delete_existing(&self) -> Result<(), String> {
        let prior = self.prior()?;

        let gone = match self.read(prior) {
            Ok(_) => match self.provider.delete(prior.kind, &prior.id) {
                Ok(()) => false,
                Err(e) if e.is_not_found() => true,
                Err(e) => return Err(e.to_string()),
            },
            Err(e) if e.is_not_found() => true,
            Err(e) => return Err(e.to_string()),
        };
        if gone {
            log::info!("{} '{}' was already gone", prior.kind, self.op.name);
        }

        self.state
            .remove(&self.op.name)
            .map_err(|e| format!("deleted but state not updated: {e}"))
    }

    fn read(&self, prior: &StateRecord) -> Result<Attributes, ProviderError> {
        let what = format!("read {} '{}'", prior.kind, self.op.name);
        with_retry(&self.retry, &what, || self.provider.read(prior.kind, &prior.id))
    }

    /// Persist the record and publish it to dependents
    fn record(&self, id: String, inputs: Attributes, outputs: Attributes) -> Result<(), String> {
        let dependencies = desired_dependencies(&self.op);
        let record = StateRecord {
            kind: self.op.kind,
            id,
            inputs,
            outputs,
            dependencies,
            applied_at: Utc::now(),
        };
        self.state
            .save(&self.op.name, &record)
            .map_err(|e| format!("applied but state not saved: {e}"))?;
        publish(&self.slots, &self.op.name, &record);
        Ok(())
    }
}

fn settle_unchanged(op: &Operation, slots: &Slots, state: &dyn StateStore) -> OpStatus {
    let Some(record) = &op.prior else {
        return OpStatus::failed(format!("no recorded state for '{}'", op.name));
    };
    publish(slots, &op.name, record);
    match sync_dependencies(op, record, state) {
        Ok(()) => OpStatus::succeeded(Change::Unchanged),
        Err(reason) => OpStatus::failed(reason),
    }
}

fn desired_dependencies(op: &Operation) -> Vec<String> {
    op.node
        .as_ref()
        .map(|node| node.dependency_names().into_iter().map(str::to_string).collect())
        .unwrap_or_default()
}

/// Rewrite a record whose dependencies no longer match the graph
///
/// No provider call is involved; only the recorded edges change.
fn sync_dependencies(op: &Operation, record: &StateRecord, state: &dyn StateStore) -> Result<(), String> {
    if op.node.is_none() {
        return Ok(());
    }
    let dependencies = desired_dependencies(op);
    if dependencies == record.dependencies {
        return Ok(());
    }
    log::debug!("Updating recorded dependencies of '{}'", op.name);
    let updated = StateRecord {
        dependencies,
        ..record.clone()
    };
    state
        .save(&op.name, &updated)
        .map_err(|e| format!("dependencies not saved: {e}"))
}

/// Fill a node's slot: recorded inputs overlaid with outputs
fn publish(slots: &Slots, name: &str, record: &StateRecord) {
    if let Some(slot) = slots.get(name) {
        let mut attrs = record.inputs.clone();
        attrs.extend(record.outputs.clone());
        let _ = slot.set(attrs);
    }
}
