//! # slp-dag-validator
//!
//! DAG validation and pre-signing checks for SLP token transactions.
//!
//! The validator answers one question:
//!
//! > Given a token transaction, do its ancestors entitle it to the tokens it
//! > moves?
//!
//! ## Core Contract
//!
//! 1. Walk a target transaction's ancestry back to GENESIS or cached results
//! 2. Decide each node with the token's rule set (fungible or NFT child)
//! 3. Persist every resolved validity into the owning wallet
//!
//! ## Architecture
//!
//! ```text
//! Wallet → GraphContext → JobManager → ValidationJob → TokenGraph → Validator
//!                                           ↓
//!                          fetch hook (accelerator, wallet) → Network
//! ```
//!
//! Before signing, [`SlpTransactionChecker`] checks a candidate transaction
//! against the wallet's token-output table without touching the network.
//!
//! ## Determinism Guarantees
//!
//! - Same target + same fetched transactions → identical validity
//! - Resolved validities never revert to unknown
//! - Node iteration is ordered by txid

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod types;
pub mod message;
pub mod validator;
pub mod graph;
pub mod job;
pub mod context;
pub mod wallet;
pub mod accelerator;
pub mod checker;
pub mod preflight;
pub mod config;

// Re-exports
pub use types::{Address, AddressKind, OutPoint, OutputKind, TokenId, TokenType, Transaction, TxId, TxInput, TxOutput, Validity};
pub use message::{OutputToken, ParseError, TokenBody, TokenMessage, TxKind};
pub use validator::{Decision, Validator, ValidatorError};
pub use graph::{GraphError, NodeStatus, TokenGraph};
pub use job::{
    fetch_blocking, fetch_until, FetchError, JobError, JobHandle, JobId, JobManager, JobOutcome, Network, NftParentSlots,
    NftPhase, Request, Response, ResponseCallback, RpcError, StopReason,
};
pub use context::{ContextError, GraphContext, InteractiveResult, JobOptions};
pub use wallet::{OwnerRef, TokenOutput, TokenTypeEntry, TxTokenInfo, ValidityCache, Wallet, WalletPersistence, WalletTables};
pub use accelerator::{CacheConfig, CacheStats, GraphSearch, RecentTxCache};
pub use checker::{BurnCoin, BurnRequest, CheckError, SlpTransactionChecker};
pub use preflight::{BurnInstruction, OracleResponse, PreflightClient, PreflightError, PreflightOracle, PreflightVerdict};
pub use config::{ConfigError, ValidationConfig};
