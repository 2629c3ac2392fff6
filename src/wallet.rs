//! Wallet-side tables consumed by the validator and the precondition checker.
//!
//! All tables sit behind one coarse lock. Any read-modify-write sequence
//! against them holds the lock for the whole sequence.
//!
//! Jobs never keep a wallet alive: they capture an [`OwnerRef`] (a weak
//! pointer plus the owner generation at job creation) and check liveness
//! before every persistence step. [`Wallet::close`] bumps the generation, so
//! jobs started before a close stay dead even if the wallet is reopened.

use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crate::message::{OutputToken, TxKind};
use crate::types::{Address, OutPoint, TokenId, TokenType, Transaction, TxId, Validity};

/// Token value recorded for one wallet-owned outpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenOutput {
    /// Token the output belongs to.
    pub token_id: TokenId,
    /// Units or baton.
    pub quantity: OutputToken,
}

/// Per-transaction token summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxTokenInfo {
    /// Declared token type.
    pub token_type: TokenType,
    /// Declared kind.
    pub kind: TxKind,
    /// Governing token id.
    pub token_id: TokenId,
    /// Last known validity.
    pub validity: Validity,
}

/// Decimal places of a registered token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decimals {
    /// Read from a verified GENESIS.
    Known(u8),
    /// Not verified yet.
    Unverified,
}

/// Token type registry entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenTypeEntry {
    /// Registry class (`SLP1`, `SLP65`, `SLP129`).
    pub class: TokenType,
    /// Display name.
    pub name: String,
    /// Decimal places.
    pub decimals: Decimals,
    /// Group token of an NFT child.
    pub group_id: Option<TokenId>,
}

/// Token-output table: address → txid → vout → value.
pub type TokenOutputTable = HashMap<Address, HashMap<TxId, HashMap<u32, TokenOutput>>>;

/// Tables guarded by the wallet lock.
#[derive(Debug, Default)]
pub struct WalletTables {
    /// Known transactions.
    pub transactions: HashMap<TxId, Arc<Transaction>>,
    /// Token-bearing outputs owned by the wallet.
    pub slp_txo: TokenOutputTable,
    /// Token info per transaction.
    pub tx_tokinfo: HashMap<TxId, TxTokenInfo>,
    /// Token type registry.
    pub token_types: HashMap<TokenId, TokenTypeEntry>,
    /// Validity cache written by validation jobs.
    pub validity: HashMap<TxId, Validity>,
    /// Confirmed block heights.
    pub verified_heights: HashMap<TxId, i64>,
}

impl WalletTables {
    /// Token value recorded for `outpoint` under `address`.
    pub fn token_output(&self, address: &Address, outpoint: &OutPoint) -> Option<TokenOutput> {
        self.slp_txo
            .get(address)?
            .get(&outpoint.txid)?
            .get(&outpoint.vout)
            .copied()
    }

    /// Token value recorded for `outpoint` under any address.
    pub fn token_output_any(&self, outpoint: &OutPoint) -> Option<TokenOutput> {
        self.slp_txo
            .values()
            .find_map(|by_tx| by_tx.get(&outpoint.txid)?.get(&outpoint.vout).copied())
    }

    /// Record a token-bearing output.
    pub fn add_token_output(&mut self, address: Address, outpoint: OutPoint, output: TokenOutput) {
        self.slp_txo
            .entry(address)
            .or_default()
            .entry(outpoint.txid)
            .or_default()
            .insert(outpoint.vout, output);
    }

    /// Register a token type. Existing entries are kept unless `overwrite`.
    /// Returns true if the entry was written.
    pub fn add_token_type(&mut self, token_id: TokenId, entry: TokenTypeEntry, overwrite: bool) -> bool {
        if !overwrite && self.token_types.contains_key(&token_id) {
            return false;
        }
        self.token_types.insert(token_id, entry);
        true
    }
}

/// Persistence trigger implemented by the embedding wallet.
pub trait WalletPersistence: Send + Sync {
    /// Persist the tables after a mutation batch.
    fn save_transactions(&self, tables: &WalletTables);
}

/// Read access to cached validity results.
pub trait ValidityCache: Send + Sync {
    /// Cached non-zero validity for `txid`.
    fn cached_validity(&self, txid: &TxId) -> Option<Validity>;
}

/// Owner generation snapshot held by jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnerToken(u64);

/// Liveness state of a wallet as seen by jobs.
#[derive(Debug)]
pub struct OwnerHandle {
    generation: AtomicU64,
    open: AtomicBool,
}

impl Default for OwnerHandle {
    fn default() -> Self {
        Self { generation: AtomicU64::new(0), open: AtomicBool::new(true) }
    }
}

impl OwnerHandle {
    /// Snapshot of the current generation.
    pub fn token(&self) -> OwnerToken {
        OwnerToken(self.generation.load(Ordering::Acquire))
    }

    /// True if the owner is open and still in the generation of `token`.
    pub fn is_live(&self, token: OwnerToken) -> bool {
        self.open.load(Ordering::Acquire) && self.generation.load(Ordering::Acquire) == token.0
    }

    /// Invalidate every outstanding token.
    pub fn close(&self) {
        self.open.store(false, Ordering::Release);
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Reopen for new jobs. Tokens issued before the last close stay dead.
    pub fn reopen(&self) {
        self.open.store(true, Ordering::Release);
    }
}

/// A wallet as far as token validation is concerned.
pub struct Wallet {
    name: String,
    tables: Mutex<WalletTables>,
    owner: OwnerHandle,
    persistence: Option<Arc<dyn WalletPersistence>>,
}

impl std::fmt::Debug for Wallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wallet")
            .field("name", &self.name)
            .field("open", &self.owner.open.load(Ordering::Relaxed))
            .finish()
    }
}

impl Wallet {
    /// In-memory wallet without persistence.
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            tables: Mutex::new(WalletTables::default()),
            owner: OwnerHandle::default(),
            persistence: None,
        })
    }

    /// Wallet that calls `persistence` on every save.
    pub fn with_persistence(name: impl Into<String>, persistence: Arc<dyn WalletPersistence>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            tables: Mutex::new(WalletTables::default()),
            owner: OwnerHandle::default(),
            persistence: Some(persistence),
        })
    }

    /// Wallet name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Take the wallet lock.
    pub fn lock(&self) -> MutexGuard<'_, WalletTables> {
        self.tables.lock()
    }

    /// Persist the tables. Takes the lock, so it must not be called while
    /// the caller holds it.
    pub fn save_transactions(&self) {
        if let Some(p) = &self.persistence {
            let tables = self.tables.lock();
            p.save_transactions(&tables);
        }
    }

    /// Stop all jobs referencing this wallet.
    pub fn close(&self) {
        tracing::info!(wallet = %self.name, "wallet closed");
        self.owner.close();
    }

    /// Owner handle.
    pub fn owner(&self) -> &OwnerHandle {
        &self.owner
    }

    /// Reference for jobs: weak pointer plus current generation.
    pub fn owner_ref(self: &Arc<Self>) -> OwnerRef {
        OwnerRef { wallet: Arc::downgrade(self), token: self.owner.token() }
    }

    /// Known transaction.
    pub fn transaction(&self, txid: &TxId) -> Option<Arc<Transaction>> {
        self.tables.lock().transactions.get(txid).cloned()
    }

    /// Store a transaction (kept if already present).
    pub fn add_transaction(&self, tx: Arc<Transaction>) {
        self.tables.lock().transactions.entry(tx.txid()).or_insert(tx);
    }

    /// Record a token-bearing output.
    pub fn add_token_output(&self, address: Address, outpoint: OutPoint, output: TokenOutput) {
        self.tables.lock().add_token_output(address, outpoint, output);
    }

    /// Register a token type; see [`WalletTables::add_token_type`].
    pub fn add_token_type(&self, token_id: TokenId, entry: TokenTypeEntry, overwrite: bool) -> bool {
        self.tables.lock().add_token_type(token_id, entry, overwrite)
    }

    /// Confirmed height of a transaction, -1 if unconfirmed or unknown.
    pub fn height(&self, txid: &TxId) -> i64 {
        self.tables.lock().verified_heights.get(txid).copied().unwrap_or(-1)
    }

    /// Validity recorded in the cache table.
    pub fn validity(&self, txid: &TxId) -> Validity {
        self.tables.lock().validity.get(txid).copied().unwrap_or_default()
    }
}

impl ValidityCache for Wallet {
    fn cached_validity(&self, txid: &TxId) -> Option<Validity> {
        self.tables
            .lock()
            .validity
            .get(txid)
            .copied()
            .filter(|v| v.is_resolved())
    }
}

/// What a job holds of its wallet.
#[derive(Debug, Clone)]
pub struct OwnerRef {
    wallet: Weak<Wallet>,
    token: OwnerToken,
}

impl OwnerRef {
    /// The wallet, if it still exists and has not been closed since.
    pub fn get(&self) -> Option<Arc<Wallet>> {
        self.wallet.upgrade().filter(|w| w.owner.is_live(self.token))
    }

    /// Validity cache view of the wallet.
    pub fn validity_cache(&self) -> Weak<dyn ValidityCache> {
        self.wallet.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingStore(AtomicUsize);

    impl WalletPersistence for CountingStore {
        fn save_transactions(&self, _tables: &WalletTables) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_owner_ref_dies_on_close() {
        let wallet = Wallet::new("w");
        let owner = wallet.owner_ref();
        assert!(owner.get().is_some());
        wallet.close();
        assert!(owner.get().is_none());

        // Reopening does not revive old references.
        wallet.owner().reopen();
        assert!(owner.get().is_none());
        assert!(wallet.owner_ref().get().is_some());
    }

    #[test]
    fn test_owner_ref_does_not_keep_wallet_alive() {
        let wallet = Wallet::new("w");
        let owner = wallet.owner_ref();
        drop(wallet);
        assert!(owner.get().is_none());
        assert!(owner.validity_cache().upgrade().is_none());
    }

    #[test]
    fn test_token_tables() {
        let wallet = Wallet::new("w");
        let addr = Address::p2pkh([7; 20]);
        let op = OutPoint::new(TxId::from_u128(1), 1);
        let out = TokenOutput { token_id: TxId::from_u128(9), quantity: OutputToken::Amount(5) };
        wallet.add_token_output(addr, op, out);
        let tables = wallet.lock();
        assert_eq!(tables.token_output(&addr, &op), Some(out));
        assert_eq!(tables.token_output(&Address::p2pkh([8; 20]), &op), None);
        assert_eq!(tables.token_output_any(&op), Some(out));
    }

    #[test]
    fn test_registry_does_not_overwrite() {
        let wallet = Wallet::new("w");
        let id = TxId::from_u128(3);
        let entry = |name: &str| TokenTypeEntry {
            class: TokenType::Fungible,
            name: name.to_string(),
            decimals: Decimals::Known(2),
            group_id: None,
        };
        assert!(wallet.add_token_type(id, entry("first"), false));
        assert!(!wallet.add_token_type(id, entry("second"), false));
        assert_eq!(wallet.lock().token_types[&id].name, "first");
        assert!(wallet.add_token_type(id, entry("third"), true));
    }

    #[test]
    fn test_validity_cache_skips_unknown() {
        let store = Arc::new(CountingStore(AtomicUsize::new(0)));
        let wallet = Wallet::with_persistence("w", store.clone());
        let a = TxId::from_u128(1);
        let b = TxId::from_u128(2);
        {
            let mut t = wallet.lock();
            t.validity.insert(a, Validity::Valid);
            t.validity.insert(b, Validity::Unknown);
        }
        wallet.save_transactions();
        assert_eq!(wallet.cached_validity(&a), Some(Validity::Valid));
        assert_eq!(wallet.cached_validity(&b), None);
        assert_eq!(store.0.load(Ordering::SeqCst), 1);
    }
}
