//! Validation jobs.
//!
//! A [`ValidationJob`] drives one request ("what is the validity of these
//! targets?") to a fixed point: it walks the token graph breadth first,
//! fetching waiting ancestors depth by depth (local store first, then the
//! network through [`fetch::fetch_until`]) and letting the graph decide
//! nodes as their inputs resolve.
//!
//! ## Lifecycle
//!
//! Jobs live on a [`JobManager`] worker. One run of the main loop ends in one
//! of three ways:
//!
//! - **Finished** with a [`StopReason`]; completion callbacks fire once.
//! - **Paused** on request; the job waits in the manager's paused list.
//! - **Suspended** on an NFT parent lookup; a network callback or a nested
//!   job wakes it, and the next run picks up where it left off.

pub mod fetch;
pub mod manager;
pub mod nft;

pub use fetch::{fetch_blocking, fetch_until, FetchError, FetchReport, Network, Request, Response, ResponseCallback, RpcError};
pub use manager::JobManager;
pub use nft::{NftParentSlots, NftPhase};

use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::accelerator::GraphSearch;
use crate::context::GraphContext;
use crate::graph::{GraphError, TokenGraph, INF_DEPTH};
use crate::types::{TokenId, Transaction, TxId, Validity};
use crate::validator::{DecideContext, Validator};
use crate::wallet::{OwnerRef, ValidityCache};

use manager::ManagerShared;
use nft::{NftLookup, NftProgress};

/// Unique job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JobId(Uuid);

impl JobId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why a job finished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// Every target is decided.
    Resolved,
    /// Nothing left to fetch, targets still undecided.
    Inconclusive,
    /// Depth limit reached.
    DepthLimit,
    /// Download limit reached.
    DownloadLimit,
    /// None of the transactions of a round could be obtained.
    MissingTxes,
    /// The network reported errors for every transaction of a round.
    FetchFailed(String),
    /// The owning wallet was closed or dropped.
    OwnerClosed,
    /// Killed through the manager or the graph context.
    Killed,
    /// Internal error; the graph is left as it was.
    Crashed(String),
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resolved => f.write_str("target nodes finished"),
            Self::Inconclusive => f.write_str("inconclusive"),
            Self::DepthLimit => f.write_str("depth limit reached"),
            Self::DownloadLimit => f.write_str("download limit reached"),
            Self::MissingTxes => f.write_str("missing txes"),
            Self::FetchFailed(e) => write!(f, "fetch failed: {}", e),
            Self::OwnerClosed => f.write_str("owner closed"),
            Self::Killed => f.write_str("killed"),
            Self::Crashed(e) => write!(f, "crashed: {}", e),
        }
    }
}

/// Result of one main loop run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RunOutcome {
    Finished(StopReason),
    Paused,
    Suspended,
}

/// Final report handed to completion callbacks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOutcome {
    /// Job that produced this report.
    pub job_id: JobId,
    /// Token graph the job ran on.
    pub token_id: TokenId,
    /// Why the job stopped.
    pub reason: StopReason,
    /// Validity of each target.
    pub targets: BTreeMap<TxId, Validity>,
    /// Non-zero validities of every node the job loaded.
    pub resolved: BTreeMap<TxId, Validity>,
    /// Network downloads performed.
    pub downloads: usize,
    /// Completion time.
    pub finished_at: DateTime<Utc>,
}

impl JobOutcome {
    /// Validity of the first target.
    pub fn target_validity(&self) -> Validity {
        self.targets.values().next().copied().unwrap_or_default()
    }
}

/// Completion callback.
pub type JobCallback = Box<dyn FnOnce(&JobOutcome) + Send>;

/// Local transaction lookup tried before the network.
pub type FetchHook = Box<dyn Fn(&TxId) -> Option<Arc<Transaction>> + Send + Sync>;

/// Job and manager errors.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// Job was already handed to a manager.
    #[error("job {0} already queued")]
    AlreadyQueued(JobId),
    /// Job is not in the paused list.
    #[error("job {0} is not paused")]
    NotPaused(JobId),
    /// Manager no longer accepts work.
    #[error("job manager killed")]
    ManagerKilled,
    /// Worker thread could not be started.
    #[error("failed to spawn job manager thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Resource limits of one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobLimits {
    /// Network downloads after which the job stops.
    pub download_limit: Option<usize>,
    /// Deepest level explored.
    pub depth_limit: Option<i32>,
    /// Per-response wait for batch downloads.
    pub download_timeout: Duration,
}

impl Default for JobLimits {
    fn default() -> Self {
        Self { download_limit: None, depth_limit: None, download_timeout: Duration::from_secs(5) }
    }
}

/// Everything needed to build a job.
pub struct JobSpec {
    /// Token graph id.
    pub token_id: TokenId,
    /// Transactions whose validity is requested.
    pub targets: Vec<TxId>,
    /// Graph shared with other jobs of the same token.
    pub graph: Arc<Mutex<TokenGraph>>,
    /// Network collaborator.
    pub network: Arc<dyn Network>,
    /// Local lookup (accelerator, then wallet store).
    pub fetch_hook: FetchHook,
    /// Owning wallet.
    pub owner: OwnerRef,
    /// Resource limits.
    pub limits: JobLimits,
    /// Block height of the first target, -1 if unconfirmed.
    pub height: i64,
    /// Log graph decisions at debug level.
    pub debug: bool,
    /// The graph was reset for this job.
    pub was_reset: bool,
    /// Registry used for nested NFT parent jobs.
    pub context: Weak<GraphContext>,
    /// Accelerator that records fetched transactions.
    pub accelerator: Option<Arc<dyn GraphSearch>>,
}

#[derive(Debug, Default)]
struct JobState {
    current_depth: i32,
    downloads: usize,
    touched: BTreeSet<TxId>,
}

#[derive(Default)]
struct Completion {
    outcome: Option<JobOutcome>,
    callbacks: Vec<JobCallback>,
    /// Set once the callbacks taken at finish have returned.
    settled: bool,
}

enum Step {
    Finished(StopReason),
    Paused,
    Suspended,
}

/// One validation request. Shared through [`JobHandle`].
pub struct ValidationJob {
    id: JobId,
    token_id: TokenId,
    targets: Vec<TxId>,
    graph: Arc<Mutex<TokenGraph>>,
    network: Arc<dyn Network>,
    fetch_hook: FetchHook,
    validity_cache: Weak<dyn ValidityCache>,
    owner: OwnerRef,
    limits: JobLimits,
    height: i64,
    debug: bool,
    was_reset: bool,
    context: Weak<GraphContext>,
    accelerator: Option<Arc<dyn GraphSearch>>,
    nft: Option<Arc<NftLookup>>,
    state: Mutex<JobState>,
    stop_requested: AtomicBool,
    killed: AtomicBool,
    manager: Mutex<Weak<ManagerShared>>,
    completion: Mutex<Completion>,
    done: Condvar,
    created_at: DateTime<Utc>,
    self_ref: Weak<ValidationJob>,
}

impl fmt::Debug for ValidationJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidationJob")
            .field("id", &self.id)
            .field("token_id", &self.token_id)
            .field("targets", &self.targets)
            .finish()
    }
}

impl ValidationJob {
    /// Build a job; it runs once handed to a [`JobManager`].
    pub fn new(spec: JobSpec) -> JobHandle {
        let is_nft = matches!(spec.graph.lock().validator(), Validator::NftChild(_));
        let job = Arc::new_cyclic(|self_ref| Self {
            id: JobId::new(),
            token_id: spec.token_id,
            targets: spec.targets,
            graph: spec.graph,
            network: spec.network,
            fetch_hook: spec.fetch_hook,
            validity_cache: spec.owner.validity_cache(),
            owner: spec.owner,
            limits: spec.limits,
            height: spec.height,
            debug: spec.debug,
            was_reset: spec.was_reset,
            context: spec.context,
            accelerator: spec.accelerator,
            nft: is_nft.then(|| Arc::new(NftLookup::default())),
            state: Mutex::new(JobState::default()),
            stop_requested: AtomicBool::new(false),
            killed: AtomicBool::new(false),
            manager: Mutex::new(Weak::new()),
            completion: Mutex::new(Completion::default()),
            done: Condvar::new(),
            created_at: Utc::now(),
            self_ref: self_ref.clone(),
        });
        JobHandle(job)
    }

    pub(crate) fn id(&self) -> JobId {
        self.id
    }

    pub(crate) fn token_id(&self) -> TokenId {
        self.token_id
    }

    pub(crate) fn attach(&self, manager: Weak<ManagerShared>) -> bool {
        let mut slot = self.manager.lock();
        if slot.upgrade().is_some() {
            return false;
        }
        *slot = manager;
        true
    }

    pub(crate) fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    pub(crate) fn kill(&self) {
        self.killed.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }

    /// Ask the manager to run this job again.
    pub(crate) fn wake(&self) {
        let manager = self.manager.lock().upgrade();
        if let Some(manager) = manager {
            manager.wake(self.id);
        }
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.completion.lock().outcome.is_some()
    }

    /// One run of the main loop.
    pub(crate) fn run(&self) -> RunOutcome {
        self.stop_requested.store(false, Ordering::SeqCst);
        match self.mainloop() {
            Ok(Step::Finished(reason)) => RunOutcome::Finished(reason),
            Ok(Step::Paused) => RunOutcome::Paused,
            Ok(Step::Suspended) => RunOutcome::Suspended,
            Err(e) => {
                tracing::error!(job = %self.id, token = %self.token_id.short(10), error = %e, "validation job crashed");
                RunOutcome::Finished(StopReason::Crashed(e.to_string()))
            }
        }
    }

    fn run_graph(&self, graph: &mut TokenGraph) -> Result<(), GraphError> {
        match &self.nft {
            Some(lookup) => {
                let mut slots = lookup.slots.lock();
                graph.run_sched(&mut DecideContext::with_nft(&mut slots))
            }
            None => graph.run_sched(&mut DecideContext::default()),
        }
    }

    /// Killed, or the owner went away.
    fn interrupted(&self) -> Option<StopReason> {
        if self.is_killed() {
            return Some(StopReason::Killed);
        }
        if self.owner.get().is_none() {
            return Some(StopReason::OwnerClosed);
        }
        None
    }

    fn depth_limit(&self) -> i32 {
        self.limits.depth_limit.unwrap_or(INF_DEPTH - 1)
    }

    fn mainloop(&self) -> Result<Step, GraphError> {
        {
            let mut graph = self.graph.lock();
            graph.set_debug(self.debug);
            graph.set_targets(&self.targets)?;
            if self.nft.is_some() {
                // Nodes deferred by an earlier job on this graph re-decide
                // against this job's parent slots.
                graph.resume_deferred();
            }
            self.run_graph(&mut graph)?;
        }
        tracing::debug!(job = %self.id, height = self.height, "job running");

        loop {
            if let Some(reason) = self.interrupted() {
                return Ok(Step::Finished(reason));
            }
            if self.stop_requested.load(Ordering::SeqCst) {
                tracing::debug!(job = %self.id, "stop requested");
                return Ok(Step::Paused);
            }

            if let Some(lookup) = &self.nft {
                match self.drive_nft(lookup)? {
                    NftProgress::Continue => {}
                    NftProgress::Suspend => return Ok(Step::Suspended),
                    NftProgress::Stop(reason) => return Ok(Step::Finished(reason)),
                }
                let mut graph = self.graph.lock();
                self.run_graph(&mut graph)?;
            }

            let interested = {
                let mut graph = self.graph.lock();
                if self.targets.iter().all(|t| !graph.is_active(t)) {
                    tracing::debug!(job = %self.id, "target nodes finished");
                    return Ok(Step::Finished(StopReason::Resolved));
                }
                if self.nft.as_ref().is_some_and(|l| l.phase() == NftPhase::LookupRequested) {
                    continue;
                }

                let waiting = graph.get_waiting(self.depth_limit() - 1);
                if waiting.is_empty() {
                    tracing::debug!(job = %self.id, "exhausted graph without conclusion");
                    return Ok(Step::Finished(StopReason::Inconclusive));
                }

                let mut state = self.state.lock();
                let interested: BTreeSet<TxId> = waiting
                    .iter()
                    .filter(|w| w.depth <= state.current_depth)
                    .map(|w| w.txid)
                    .collect();
                if interested.is_empty() {
                    state.current_depth += 1;
                    if state.current_depth > self.depth_limit() {
                        tracing::debug!(job = %self.id, "reached depth stop");
                        return Ok(Step::Finished(StopReason::DepthLimit));
                    }
                    tracing::debug!(job = %self.id, depth = state.current_depth, "moving to next depth");
                    continue;
                }
                if self.limits.download_limit.is_some_and(|limit| state.downloads >= limit) {
                    return Ok(Step::Finished(StopReason::DownloadLimit));
                }
                interested
            };

            let (missing, errors) = self.get_txes(&interested)?;
            if let Some(reason) = self.interrupted() {
                tracing::debug!(job = %self.id, %reason, "interrupted while fetching");
                return Ok(Step::Finished(reason));
            }

            {
                let mut graph = self.graph.lock();
                self.run_graph(&mut graph)?;
                if self.debug {
                    let lines = graph.status_lines();
                    tracing::debug!(job = %self.id, active = lines.len(), "active graph state");
                    for line in lines {
                        tracing::debug!("    {}", line);
                    }
                }
            }

            if missing.len() == interested.len() {
                let rpc_failures = errors.iter().filter(|e| matches!(e, FetchError::Rpc { .. })).count();
                if rpc_failures > 0 && rpc_failures == missing.len() {
                    return Ok(Step::Finished(StopReason::FetchFailed(errors[0].to_string())));
                }
                return Ok(Step::Finished(StopReason::MissingTxes));
            }
        }
    }

    /// Load `txids` into the graph: cached invalid ones pruned without
    /// fetching, then local hits, then a bounded network batch. Returns the
    /// txids that could not be obtained and the fetch errors seen.
    fn get_txes(&self, txids: &BTreeSet<TxId>) -> Result<(BTreeSet<TxId>, Vec<FetchError>), GraphError> {
        let cache = self.validity_cache.upgrade();
        let cached = |t: &TxId| cache.as_ref().and_then(|c| c.cached_validity(t));
        let mut remaining = txids.clone();

        // Cached invalid transactions need no download.
        {
            let mut graph = self.graph.lock();
            let mut state = self.state.lock();
            for txid in txids {
                if let Some(v) = cached(txid).filter(|v| v.is_invalid()) {
                    graph.load_pruned(*txid, v)?;
                    state.touched.insert(*txid);
                    remaining.remove(txid);
                }
            }
        }

        let mut local = Vec::new();
        let mut to_download = Vec::new();
        for txid in &remaining {
            match (self.fetch_hook)(txid) {
                Some(tx) => local.push((*txid, tx)),
                None => to_download.push(*txid),
            }
        }
        for (txid, tx) in local {
            self.load(txid, &tx, cached(&txid))?;
            remaining.remove(&txid);
        }

        let mut errors = Vec::new();
        if !to_download.is_empty() {
            let cancelled = || self.interrupted().is_some();
            let report = fetch_until(self.network.as_ref(), &to_download, self.limits.download_timeout, &cancelled);
            // A killed graph may have been reset under us.
            if self.interrupted().is_some() {
                return Ok((remaining, report.errors));
            }
            for tx in report.received {
                let txid = tx.txid();
                if !remaining.remove(&txid) {
                    continue;
                }
                self.state.lock().downloads += 1;
                if let Some(accel) = &self.accelerator {
                    accel.record(&self.token_id, tx.clone());
                }
                self.load(txid, &tx, cached(&txid))?;
            }
            errors = report.errors;
        }
        Ok((remaining, errors))
    }

    fn load(&self, txid: TxId, tx: &Transaction, cached: Option<Validity>) -> Result<(), GraphError> {
        let mut graph = self.graph.lock();
        match graph.load_tx(txid, tx, cached) {
            Ok(()) | Err(GraphError::DoubleLoad(_)) => {}
            Err(e) => return Err(e),
        }
        self.state.lock().touched.insert(txid);
        Ok(())
    }

    /// Build the outcome, fire callbacks. Later calls are ignored.
    pub(crate) fn finish(&self, reason: StopReason) {
        let outcome = {
            let graph = self.graph.lock();
            let state = self.state.lock();
            let targets = self.targets.iter().map(|t| (*t, graph.validity(t))).collect();
            let resolved = state
                .touched
                .iter()
                .chain(&self.targets)
                .map(|t| (*t, graph.validity(t)))
                .filter(|(_, v)| v.is_resolved())
                .collect();
            JobOutcome {
                job_id: self.id,
                token_id: self.token_id,
                reason,
                targets,
                resolved,
                downloads: state.downloads,
                finished_at: Utc::now(),
            }
        };

        let callbacks = {
            let mut completion = self.completion.lock();
            if completion.outcome.is_some() {
                return;
            }
            completion.outcome = Some(outcome.clone());
            std::mem::take(&mut completion.callbacks)
        };

        match &outcome.reason {
            StopReason::Crashed(_) => {
                tracing::error!(job = %self.id, reason = %outcome.reason, "validation job finished")
            }
            reason => tracing::info!(
                job = %self.id,
                token = %self.token_id.short(10),
                %reason,
                downloads = outcome.downloads,
                "validation job finished"
            ),
        }
        for callback in callbacks {
            callback(&outcome);
        }
        self.completion.lock().settled = true;
        self.done.notify_all();
    }
}

/// Shared handle to a [`ValidationJob`].
#[derive(Clone)]
pub struct JobHandle(Arc<ValidationJob>);

impl fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("JobHandle").field(&self.0).finish()
    }
}

impl JobHandle {
    pub(crate) fn job(&self) -> &Arc<ValidationJob> {
        &self.0
    }

    /// Job id.
    pub fn id(&self) -> JobId {
        self.0.id
    }

    /// Token graph id.
    pub fn token_id(&self) -> TokenId {
        self.0.token_id
    }

    /// Requested transactions.
    pub fn targets(&self) -> &[TxId] {
        &self.0.targets
    }

    /// Creation time.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.0.created_at
    }

    /// True once the job finished.
    pub fn is_finished(&self) -> bool {
        self.0.is_finished()
    }

    /// Final report, if finished.
    pub fn outcome(&self) -> Option<JobOutcome> {
        self.0.completion.lock().outcome.clone()
    }

    /// Block up to `timeout` for the job to finish and its callbacks to
    /// return. `None` means it is still running in the background.
    pub fn wait(&self, timeout: Duration) -> Option<JobOutcome> {
        let deadline = Instant::now() + timeout;
        let mut completion = self.0.completion.lock();
        while !completion.settled {
            if self.0.done.wait_until(&mut completion, deadline).timed_out() {
                break;
            }
        }
        if completion.settled {
            completion.outcome.clone()
        } else {
            None
        }
    }

    /// Register a completion callback. Runs immediately if the job already
    /// finished; otherwise exactly once when it does.
    pub fn add_callback(&self, callback: impl FnOnce(&JobOutcome) + Send + 'static) {
        let outcome = {
            let mut completion = self.0.completion.lock();
            match &completion.outcome {
                Some(outcome) => outcome.clone(),
                None => {
                    completion.callbacks.push(Box::new(callback));
                    return;
                }
            }
        };
        callback(&outcome);
    }

    /// Current validity of the first target in the graph.
    pub fn target_validity(&self) -> Validity {
        let graph = self.0.graph.lock();
        self.0.targets.first().map(|t| graph.validity(t)).unwrap_or_default()
    }

    /// Name of a validity code in this job's validator vocabulary.
    pub fn validity_name(&self, validity: Validity) -> &'static str {
        self.0.graph.lock().validator().validity_name(validity)
    }

    /// Ask a running or pending job to pause. Returns false if it was
    /// neither.
    pub fn stop(&self) -> bool {
        let manager = self.0.manager.lock().upgrade();
        match manager {
            Some(manager) => manager.pause(&self.0),
            None => false,
        }
    }

    /// NFT parent state, for NFT child jobs.
    pub fn nft_slots(&self) -> Option<NftParentSlots> {
        self.0.nft.as_ref().map(|l| l.slots.lock().clone())
    }
}
