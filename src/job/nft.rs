//! NFT parent lookup.
//!
//! An NFT child GENESIS is only valid if the group token output it spends
//! is valid. The child job answers that by fetching the child GENESIS, then
//! the group transaction it spends, then running a nested job on the group
//! token's graph. Each step completes asynchronously: network callbacks and
//! the nested job's completion push an [`NftEvent`] into the lookup inbox and
//! wake the child job, which drains the inbox on its next run.
//!
//! Lock order is graph, then slots. Asynchronous callbacks only touch the
//! inbox and the wallet.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::fetch::{Request, Response, ResponseCallback};
use super::{JobId, StopReason, ValidationJob};
use crate::context::JobOptions;
use crate::graph::GraphError;
use crate::message::{TokenBody, TokenMessage};
use crate::types::{OutPoint, TokenId, TokenType, Transaction, TxId, Validity};
use crate::wallet::{Decimals, TokenTypeEntry, TxTokenInfo, WalletTables};

/// Progress of the parent lookup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum NftPhase {
    /// Nothing asked yet.
    #[default]
    Idle,
    /// A deferred decision needs the parent.
    LookupRequested,
    /// Fetching the child GENESIS.
    AwaitingGenesis,
    /// Fetching the group transaction spent by the GENESIS.
    AwaitingParentTx,
    /// Nested job on the group token running.
    AwaitingParentJob,
    /// Parent validity known (or known to be unobtainable).
    Resolved,
}

impl NftPhase {
    /// True while an asynchronous step is outstanding.
    pub fn is_in_flight(self) -> bool {
        matches!(self, Self::AwaitingGenesis | Self::AwaitingParentTx | Self::AwaitingParentJob)
    }
}

/// Per-job parent state read by the NFT child validator.
#[derive(Debug, Clone, Default)]
pub struct NftParentSlots {
    /// Lookup progress.
    pub phase: NftPhase,
    /// The child GENESIS.
    pub genesis_tx: Option<Arc<Transaction>>,
    /// Outpoint spent by the GENESIS's first input.
    pub parent_prevout: Option<OutPoint>,
    /// The group transaction.
    pub parent_tx: Option<Arc<Transaction>>,
    /// Validity of the group transaction.
    pub parent_validity: Validity,
    /// Forced outcome for every decision in this graph.
    pub forced_failure: Option<Validity>,
    /// Nested job on the group token.
    pub parent_job: Option<JobId>,
}

pub(crate) enum NftEvent {
    Genesis(Result<Arc<Transaction>, String>),
    ParentTx(Result<Arc<Transaction>, String>),
    ParentJob(Validity),
}

#[derive(Default)]
pub(crate) struct NftLookup {
    pub(crate) slots: Mutex<NftParentSlots>,
    inbox: Mutex<Vec<NftEvent>>,
}

impl NftLookup {
    pub(crate) fn phase(&self) -> NftPhase {
        self.slots.lock().phase
    }

    fn push(&self, event: NftEvent) {
        self.inbox.lock().push(event);
    }

    fn set_phase(&self, phase: NftPhase) {
        self.slots.lock().phase = phase;
    }
}

pub(crate) enum NftProgress {
    Continue,
    Suspend,
    Stop(StopReason),
}

/// Whether the group transaction cannot be the parent of an NFT child.
fn is_bad_parent(parent: &Transaction, vout: u32) -> bool {
    let Ok(msg) = TokenMessage::from_transaction(parent) else { return true };
    if msg.token_type != TokenType::NftGroup {
        return true;
    }
    match &msg.body {
        TokenBody::Genesis(_) | TokenBody::Mint(_) => vout != 1,
        TokenBody::Send(send) => vout as usize > send.amounts.len(),
        TokenBody::Commit(_) => true,
    }
}

/// Register the group token and link the child to it.
fn register_group(tables: &mut WalletTables, child_id: TokenId, group_id: TokenId) {
    let child_name = tables
        .token_types
        .get(&child_id)
        .map(|e| e.name.clone())
        .unwrap_or_else(|| child_id.short(5));
    tables.add_token_type(
        group_id,
        TokenTypeEntry {
            class: TokenType::NftGroup,
            name: format!("{}-parent", child_name),
            decimals: Decimals::Known(0),
            group_id: None,
        },
        false,
    );
    match tables.token_types.get_mut(&child_id) {
        Some(entry) => entry.group_id = Some(group_id),
        None => {
            tables.token_types.insert(
                child_id,
                TokenTypeEntry {
                    class: TokenType::NftChild,
                    name: child_id.short(5),
                    decimals: Decimals::Known(0),
                    group_id: Some(group_id),
                },
            );
        }
    }
}

impl ValidationJob {
    /// Advance the parent lookup as far as possible without blocking.
    pub(crate) fn drive_nft(&self, lookup: &Arc<NftLookup>) -> Result<NftProgress, GraphError> {
        loop {
            let events = std::mem::take(&mut *lookup.inbox.lock());
            for event in events {
                if let Some(reason) = self.handle_nft_event(lookup, event)? {
                    return Ok(NftProgress::Stop(reason));
                }
            }

            let phase = lookup.phase();
            if phase == NftPhase::LookupRequested {
                tracing::debug!(job = %self.id, token = %self.token_id.short(10), "looking up NFT parent");
                lookup.set_phase(NftPhase::AwaitingGenesis);
                self.request_tx(lookup, self.token_id, NftEvent::Genesis);
                continue;
            }
            if phase.is_in_flight() {
                // A callback landing after this check re-wakes the job.
                if lookup.inbox.lock().is_empty() {
                    return Ok(NftProgress::Suspend);
                }
                continue;
            }
            return Ok(NftProgress::Continue);
        }
    }

    /// Local store first, then a single network request.
    fn request_tx(
        &self,
        lookup: &Arc<NftLookup>,
        txid: TxId,
        event: fn(Result<Arc<Transaction>, String>) -> NftEvent,
    ) {
        if let Some(tx) = (self.fetch_hook)(&txid) {
            lookup.push(event(Ok(tx)));
            return;
        }
        let weak_lookup = Arc::downgrade(lookup);
        let weak_job = self.self_ref.clone();
        let callback: ResponseCallback = Arc::new(move |resp: Response| {
            let Some(lookup) = weak_lookup.upgrade() else { return };
            let result = match resp.result {
                Ok(tx) if tx.txid() == txid => Ok(tx),
                Ok(tx) => Err(format!("received un-requested txid {}", tx.txid())),
                Err(e) => Err(e.to_string()),
            };
            lookup.push(event(result));
            if let Some(job) = weak_job.upgrade() {
                job.wake();
            }
        });
        self.network.send(vec![Request::transaction_get(txid)], callback);
    }

    fn handle_nft_event(&self, lookup: &Arc<NftLookup>, event: NftEvent) -> Result<Option<StopReason>, GraphError> {
        match event {
            NftEvent::Genesis(Err(e)) | NftEvent::ParentTx(Err(e)) => {
                tracing::warn!(job = %self.id, error = %e, "NFT parent lookup failed");
                Ok(Some(StopReason::FetchFailed(e)))
            }
            NftEvent::Genesis(Ok(tx)) => {
                if tx.txid() != self.token_id {
                    return Ok(Some(StopReason::FetchFailed(format!("received un-requested txid {}", tx.txid()))));
                }
                self.record_tx(&tx);
                let prevout = tx.inputs().first().map(|i| i.prevout);
                {
                    let mut slots = lookup.slots.lock();
                    slots.genesis_tx = Some(tx);
                    slots.parent_prevout = prevout;
                }
                match prevout {
                    Some(prevout) => {
                        lookup.set_phase(NftPhase::AwaitingParentTx);
                        self.request_tx(lookup, prevout.txid, NftEvent::ParentTx);
                        Ok(None)
                    }
                    None => {
                        self.resolve_bad_parent(lookup)?;
                        Ok(None)
                    }
                }
            }
            NftEvent::ParentTx(Ok(tx)) => {
                let Some(prevout) = lookup.slots.lock().parent_prevout else {
                    return Err(GraphError::Inconsistent("parent tx without prevout"));
                };
                if tx.txid() != prevout.txid {
                    return Ok(Some(StopReason::FetchFailed(format!("received un-requested txid {}", tx.txid()))));
                }
                self.record_tx(&tx);
                lookup.slots.lock().parent_tx = Some(tx.clone());
                if is_bad_parent(&tx, prevout.vout) {
                    tracing::debug!(job = %self.id, parent = %tx.txid().short(10), "bad NFT parent");
                    self.resolve_bad_parent(lookup)?;
                    return Ok(None);
                }
                self.start_parent_job(lookup, tx)
            }
            NftEvent::ParentJob(validity) => {
                tracing::debug!(job = %self.id, parent_validity = %validity, "NFT parent job finished");
                {
                    let mut slots = lookup.slots.lock();
                    slots.parent_validity = validity;
                    slots.phase = NftPhase::Resolved;
                }
                self.graph.lock().resume_deferred();
                Ok(None)
            }
        }
    }

    /// Store a fetched transaction and its token summary, if still owned.
    fn record_tx(&self, tx: &Arc<Transaction>) {
        let Some(wallet) = self.owner.get() else { return };
        {
            let mut tables = wallet.lock();
            let txid = tx.txid();
            tables.transactions.entry(txid).or_insert_with(|| tx.clone());
            if let Ok(msg) = TokenMessage::from_transaction(tx) {
                tables.tx_tokinfo.entry(txid).or_insert_with(|| TxTokenInfo {
                    token_type: msg.token_type,
                    kind: msg.kind(),
                    token_id: msg.token_id(txid),
                    validity: Validity::Unknown,
                });
            }
        }
        wallet.save_transactions();
    }

    /// Everything derived from this GENESIS is invalid.
    fn resolve_bad_parent(&self, lookup: &NftLookup) -> Result<(), GraphError> {
        {
            let mut slots = lookup.slots.lock();
            slots.parent_validity = Validity::InvalidBadParent;
            slots.phase = NftPhase::Resolved;
        }
        let mut graph = self.graph.lock();
        let mut forced = graph.deferred();
        forced.push(self.token_id);
        forced.extend(self.targets.iter().copied());
        for txid in forced {
            graph.force_resolve(txid, Validity::InvalidBadParent)?;
        }
        graph.resume_deferred();
        Ok(())
    }

    fn start_parent_job(&self, lookup: &Arc<NftLookup>, parent: Arc<Transaction>) -> Result<Option<StopReason>, GraphError> {
        let Some(context) = self.context.upgrade() else {
            return Ok(Some(StopReason::Crashed("graph context dropped".into())));
        };
        let Some(wallet) = self.owner.get() else {
            return Ok(Some(StopReason::OwnerClosed));
        };
        let options = JobOptions { debug: self.debug, reset: self.was_reset };
        let job = match context.make_job(&parent, &wallet, self.network.clone(), options) {
            Ok(Some(job)) => job,
            Ok(None) => {
                self.resolve_bad_parent(lookup)?;
                return Ok(None);
            }
            Err(e) => return Ok(Some(StopReason::Crashed(e.to_string()))),
        };
        let parent_txid = parent.txid();
        let group_id = job.token_id();
        tracing::debug!(job = %self.id, parent_job = %job.id(), group = %group_id.short(10), "started NFT parent job");
        {
            let mut slots = lookup.slots.lock();
            slots.phase = NftPhase::AwaitingParentJob;
            slots.parent_job = Some(job.id());
        }

        let child_id = self.token_id;
        let owner = self.owner.clone();
        let weak_lookup = Arc::downgrade(lookup);
        let weak_job = self.self_ref.clone();
        job.add_callback(move |outcome| {
            let validity = outcome.target_validity();
            if let Some(wallet) = owner.get() {
                {
                    let mut tables = wallet.lock();
                    if validity == Validity::Valid {
                        register_group(&mut tables, child_id, group_id);
                    }
                    if validity.is_resolved() {
                        if let Some(info) = tables.tx_tokinfo.get_mut(&parent_txid) {
                            info.validity = validity;
                        }
                    }
                }
                wallet.save_transactions();
            }
            if let Some(lookup) = weak_lookup.upgrade() {
                lookup.push(NftEvent::ParentJob(validity));
            }
            if let Some(job) = weak_job.upgrade() {
                job.wake();
            }
        });
        Ok(None)
    }
}
