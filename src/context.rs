//! Graph context: the app-wide registry of token graphs.
//!
//! Maps token id → (graph, manager), building both lazily on first
//! reference. Wallet code enters validation here: [`GraphContext::make_job`]
//! for background validation, [`GraphContext::validate_interactive`] for a
//! console-style request that waits a short while for an answer.
//!
//! ## Managers
//!
//! By default every graph shares one [`JobManager`], so all validation work
//! is serialized on one worker thread. With `parallel` set in the
//! [`ValidationConfig`], each token id gets its own manager.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

use crate::accelerator::{GraphSearch, RecentTxCache};
use crate::config::ValidationConfig;
use crate::graph::TokenGraph;
use crate::job::{
    fetch_blocking, FetchHook, JobError, JobHandle, JobLimits, JobManager, JobOutcome, JobSpec, Network,
    ValidationJob,
};
use crate::message::{ParseError, TokenMessage, TxKind};
use crate::types::{TokenId, TokenType, Transaction, TxId, Validity};
use crate::validator::Validator;
use crate::wallet::{OwnerRef, Wallet};

/// Per-request flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobOptions {
    /// Log graph decisions at debug level.
    pub debug: bool,
    /// Discard the token's graph before starting.
    pub reset: bool,
}

/// Registry errors.
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    /// The transaction carries no parseable token metadata.
    #[error("not an SLP transaction: {0}")]
    NotTokenTransaction(#[source] ParseError),
    /// The transaction is a token transaction this engine does not track.
    #[error("transaction {0} cannot be validated")]
    NotValidatable(TxId),
    /// The transaction is neither in the wallet nor obtainable.
    #[error("transaction {0} unavailable")]
    TransactionUnavailable(TxId),
    /// Job manager failure.
    #[error(transparent)]
    Job(#[from] JobError),
}

/// Answer of [`GraphContext::validate_interactive`].
#[derive(Debug)]
pub enum InteractiveResult {
    /// The job finished within the wait.
    Finished {
        /// Target validity.
        validity: Validity,
        /// Human-readable name in the token's validator vocabulary.
        name: &'static str,
    },
    /// Still running in the background.
    Running(JobHandle),
}

struct GraphEntry {
    graph: Arc<Mutex<TokenGraph>>,
    manager: Arc<JobManager>,
}

/// Token id → (graph, manager) registry.
pub struct GraphContext {
    name: String,
    config: ValidationConfig,
    accelerator: Option<Arc<dyn GraphSearch>>,
    graphs: Mutex<HashMap<TokenId, GraphEntry>>,
    shared_manager: Mutex<Option<Arc<JobManager>>>,
}

impl std::fmt::Debug for GraphContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphContext")
            .field("name", &self.name)
            .field("graphs", &self.graphs.lock().len())
            .finish()
    }
}

impl GraphContext {
    /// Create a registry. With `proxy_enabled`, `accelerator` (or an
    /// in-process [`RecentTxCache`] if none is given) is consulted before the
    /// wallet store.
    pub fn new(
        name: impl Into<String>,
        config: ValidationConfig,
        accelerator: Option<Arc<dyn GraphSearch>>,
    ) -> Arc<Self> {
        let accelerator = config.proxy_enabled.then(|| {
            accelerator.unwrap_or_else(|| Arc::new(RecentTxCache::default()) as Arc<dyn GraphSearch>)
        });
        Arc::new(Self {
            name: name.into(),
            config,
            accelerator,
            graphs: Mutex::new(HashMap::new()),
            shared_manager: Mutex::new(None),
        })
    }

    /// Registry name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Active settings.
    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }

    /// Accelerator in use, if any.
    pub fn accelerator(&self) -> Option<&Arc<dyn GraphSearch>> {
        self.accelerator.as_ref()
    }

    fn shared_manager(&self) -> Result<Arc<JobManager>, JobError> {
        let mut slot = self.shared_manager.lock();
        if let Some(manager) = slot.as_ref() {
            return Ok(manager.clone());
        }
        let manager = Arc::new(JobManager::new(self.name.clone())?);
        *slot = Some(manager.clone());
        Ok(manager)
    }

    /// Graph and manager for `token_id`, created on first use.
    pub fn get_graph(
        &self,
        token_id: TokenId,
        token_type: TokenType,
    ) -> Result<(Arc<Mutex<TokenGraph>>, Arc<JobManager>), ContextError> {
        let mut graphs = self.graphs.lock();
        if let Some(entry) = graphs.get(&token_id) {
            return Ok((entry.graph.clone(), entry.manager.clone()));
        }
        let manager = if self.config.parallel {
            Arc::new(JobManager::new(format!("{}-{}", self.name, token_id.short(10)))?)
        } else {
            self.shared_manager()?
        };
        let graph = Arc::new(Mutex::new(TokenGraph::new(Validator::for_token(token_id, token_type))));
        tracing::debug!(context = %self.name, token = %token_id.short(10), %token_type, "created token graph");
        graphs.insert(token_id, GraphEntry { graph: graph.clone(), manager: manager.clone() });
        Ok((graph, manager))
    }

    /// Resolve the graph governing `tx`. COMMIT transactions are not
    /// tracked and yield `None`.
    pub fn setup_job(
        &self,
        tx: &Transaction,
        reset: bool,
    ) -> Result<Option<(TokenId, Arc<Mutex<TokenGraph>>, Arc<JobManager>)>, ContextError> {
        let msg = TokenMessage::from_transaction(tx).map_err(ContextError::NotTokenTransaction)?;
        if msg.kind() == TxKind::Commit {
            return Ok(None);
        }
        let token_id = msg.token_id(tx.txid());
        let (graph, manager) = self.get_graph(token_id, msg.token_type)?;
        if reset {
            self.kill_graph(token_id);
        }
        Ok(Some((token_id, graph, manager)))
    }

    /// Stop all jobs on `token_id` and discard its nodes. Results already
    /// persisted to wallets survive. Returns false for an unknown token.
    pub fn kill_graph(&self, token_id: TokenId) -> bool {
        let entry = self.graphs.lock().get(&token_id).map(|e| (e.graph.clone(), e.manager.clone()));
        let Some((graph, manager)) = entry else { return false };
        let killed = manager.cancel_token(token_id);
        graph.lock().reset();
        tracing::info!(context = %self.name, token = %token_id.short(10), killed, "token graph reset");
        true
    }

    /// Stop every manager and forget every graph.
    pub fn kill(&self) {
        let entries: Vec<GraphEntry> = self.graphs.lock().drain().map(|(_, e)| e).collect();
        let shared = self.shared_manager.lock().take();
        for entry in entries {
            entry.manager.kill();
        }
        if let Some(manager) = shared {
            manager.kill();
        }
        tracing::info!(context = %self.name, "graph context killed");
    }

    /// Build and queue a job validating `tx` for `wallet`.
    ///
    /// The job's fetch hook consults the accelerator, then the wallet's
    /// transaction store. A completion callback persists every resolved
    /// validity the job saw into the wallet, unless the wallet was closed.
    /// Returns `None` for COMMIT transactions.
    pub fn make_job(
        self: &Arc<Self>,
        tx: &Transaction,
        wallet: &Arc<Wallet>,
        network: Arc<dyn Network>,
        options: JobOptions,
    ) -> Result<Option<JobHandle>, ContextError> {
        let Some((token_id, graph, manager)) = self.setup_job(tx, options.reset)? else {
            return Ok(None);
        };
        let txid = tx.txid();

        let accelerator = self.accelerator.clone();
        let store: Weak<Wallet> = Arc::downgrade(wallet);
        let fetch_hook: FetchHook = Box::new(move |t| {
            accelerator
                .as_ref()
                .and_then(|a| a.get_tx(&token_id, t))
                .or_else(|| store.upgrade()?.transaction(t))
        });

        let job = ValidationJob::new(JobSpec {
            token_id,
            targets: vec![txid],
            graph,
            network,
            fetch_hook,
            owner: wallet.owner_ref(),
            limits: JobLimits {
                download_limit: self.config.download_limit,
                depth_limit: self.config.depth_limit,
                download_timeout: self.config.download_timeout(),
            },
            height: wallet.height(&txid),
            debug: options.debug,
            was_reset: options.reset,
            context: Arc::downgrade(self),
            accelerator: self.accelerator.clone(),
        });

        let owner = wallet.owner_ref();
        job.add_callback(move |outcome| persist_outcome(&owner, outcome));
        manager.add_job(&job)?;
        tracing::info!(
            job = %job.id(),
            token = %token_id.short(10),
            txid = %txid.short(10),
            "validation job queued"
        );
        Ok(Some(job))
    }

    /// Validate one transaction and wait up to `interactive_wait` for the
    /// answer. The transaction comes from the wallet or, failing that, the
    /// network.
    pub fn validate_interactive(
        self: &Arc<Self>,
        txid: TxId,
        wallet: &Arc<Wallet>,
        network: Arc<dyn Network>,
        debug: bool,
        reset: bool,
    ) -> Result<InteractiveResult, ContextError> {
        let tx = match wallet.transaction(&txid) {
            Some(tx) => tx,
            None => fetch_blocking(network.as_ref(), &[txid], self.config.download_timeout())
                .received
                .into_iter()
                .next()
                .ok_or(ContextError::TransactionUnavailable(txid))?,
        };
        let job = self
            .make_job(&tx, wallet, network, JobOptions { debug, reset })?
            .ok_or(ContextError::NotValidatable(txid))?;
        match job.wait(self.config.interactive_wait()) {
            Some(outcome) => {
                let validity = outcome.target_validity();
                Ok(InteractiveResult::Finished { validity, name: job.validity_name(validity) })
            }
            None => Ok(InteractiveResult::Running(job)),
        }
    }
}

/// Merge a finished job's results into its wallet.
fn persist_outcome(owner: &OwnerRef, outcome: &JobOutcome) {
    let Some(wallet) = owner.get() else {
        tracing::debug!(job = %outcome.job_id, "owner closed, skipping persistence");
        return;
    };
    {
        let mut tables = wallet.lock();
        for (txid, validity) in &outcome.resolved {
            tables.validity.insert(*txid, *validity);
            if let Some(info) = tables.tx_tokinfo.get_mut(txid) {
                info.validity = *validity;
            }
        }
    }
    wallet.save_transactions();
}
