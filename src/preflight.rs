//! Preflight oracles: an external second opinion before broadcasting.
//!
//! An oracle (typically a full node exposing a transaction-check endpoint)
//! receives the candidate transaction and the burns the wallet intends, and
//! answers whether broadcasting it would destroy tokens unintentionally.
//! Transport and transaction serialization belong to the oracle
//! implementation; this module builds the burn instructions and interprets
//! the answers.
//!
//! ## Burn instruction shapes
//!
//! Ids are base64. Outpoint hashes are the txid bytes reversed, then base64.
//!
//! ```json
//! {"token_id": "...", "token_type": 1, "amount": 10}
//! {"outpoint": {"hash": "...", "index": 2}, "token_id": "...", "token_type": 1, "amount": 10}
//! {"outpoint": {"hash": "...", "index": 2}, "token_id": "...", "token_type": 1, "mint_baton_vout": 2}
//! ```

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::checker::BurnRequest;
use crate::message::{OutputToken, TokenMessage};
use crate::types::{OutPoint, TokenId, Transaction};

/// Oracle reason for a non-token transaction without token inputs.
pub const REASON_NON_SLP_OK: &str = "non-slp transaction";

/// Oracle reason for a non-token transaction that spends valid token inputs.
pub const REASON_NON_SLP_WITH_BURNS: &str = "non-slp transaction, includes valid slp inputs";

/// Preflight errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PreflightError {
    /// Burn coins of several token ids in one request.
    #[error("all coins to burn must share one token id")]
    MixedBurnTokens,
    /// Oracle unreachable or its answer unreadable.
    #[error("preflight transport error: {0}")]
    Transport(String),
}

/// Outpoint in oracle format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BurnOutpoint {
    /// Reversed txid, base64.
    pub hash: String,
    /// Output index.
    pub index: u32,
}

impl From<OutPoint> for BurnOutpoint {
    fn from(outpoint: OutPoint) -> Self {
        let mut bytes = *outpoint.txid.as_bytes();
        bytes.reverse();
        Self { hash: STANDARD.encode(bytes), index: outpoint.vout }
    }
}

/// One intended burn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BurnInstruction {
    /// A mint baton spent without a MINT.
    Baton {
        /// Baton outpoint.
        outpoint: BurnOutpoint,
        /// Token id, base64.
        token_id: String,
        /// Token type code.
        token_type: u16,
        /// Output index of the baton.
        mint_baton_vout: u32,
    },
    /// A token outpoint spent by a non-token transaction.
    Outpoint {
        /// Burned outpoint.
        outpoint: BurnOutpoint,
        /// Token id, base64.
        token_id: String,
        /// Token type code.
        token_type: u16,
        /// Units burned.
        amount: u64,
    },
    /// Units left unassigned by a token transaction.
    Amount {
        /// Token id, base64.
        token_id: String,
        /// Token type code.
        token_type: u16,
        /// Units burned.
        amount: u64,
    },
}

/// Request body sent to an oracle alongside the transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreflightQuery {
    /// Burns the wallet intends.
    pub required_slp_burns: Vec<BurnInstruction>,
    /// Judge by the protocol rules only, ignoring burn prevention.
    pub use_spec_validity_judgement: bool,
}

/// Raw oracle answer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleResponse {
    /// Overall verdict.
    pub is_valid: Option<bool>,
    /// Why the transaction was judged invalid.
    pub invalid_reason: Option<String>,
    /// Proxy error code.
    pub code: Option<i64>,
    /// Proxy error message.
    pub message: Option<String>,
}

/// Interpreted answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreflightVerdict {
    /// Safe to broadcast.
    pub ok: bool,
    /// Stated reason for a rejection.
    pub reason: Option<String>,
    /// Oracle that answered.
    pub node: Option<String>,
}

/// External transaction checker.
pub trait PreflightOracle: Send + Sync {
    /// Oracle name, reported with verdicts.
    fn name(&self) -> &str;

    /// Check `tx` with the intended burns.
    fn check(&self, tx: &Transaction, query: &PreflightQuery) -> Result<OracleResponse, PreflightError>;
}

fn encode_token_id(token_id: &TokenId) -> String {
    STANDARD.encode(token_id.as_bytes())
}

/// Burn instructions for `burn`. Inside a token transaction only the burned
/// amount and batons are listed; a non-token transaction lists every coin.
pub fn marshal_burns(burn: &BurnRequest, is_token_tx: bool) -> Result<Vec<BurnInstruction>, PreflightError> {
    let Some(first) = burn.coins.first() else { return Ok(Vec::new()) };
    if burn.coins.iter().any(|c| c.token_id != first.token_id) {
        return Err(PreflightError::MixedBurnTokens);
    }
    let token_id = encode_token_id(&first.token_id);
    let token_type = first.token_type.code();
    let mut burns = Vec::new();

    let amount = burn.amount.unwrap_or(0);
    if is_token_tx && amount > 0 {
        burns.push(BurnInstruction::Amount { token_id: token_id.clone(), token_type, amount });
    }
    for coin in &burn.coins {
        match coin.value {
            OutputToken::Baton => burns.push(BurnInstruction::Baton {
                outpoint: coin.outpoint.into(),
                token_id: token_id.clone(),
                token_type,
                mint_baton_vout: coin.outpoint.vout,
            }),
            OutputToken::Amount(amount) if !is_token_tx => burns.push(BurnInstruction::Outpoint {
                outpoint: coin.outpoint.into(),
                token_id: token_id.clone(),
                token_type,
                amount,
            }),
            OutputToken::Amount(_) => {}
        }
    }
    Ok(burns)
}

/// Verdict for a response, or `None` if the response says nothing usable.
fn interpret(resp: &OracleResponse, node: &str) -> Option<PreflightVerdict> {
    let verdict = |ok: bool, reason: Option<String>| PreflightVerdict { ok, reason, node: Some(node.to_string()) };
    let reason = resp.invalid_reason.as_deref();
    if resp.is_valid == Some(true) {
        return Some(verdict(true, None));
    }
    if reason == Some(REASON_NON_SLP_WITH_BURNS) {
        return Some(verdict(false, resp.invalid_reason.clone()));
    }
    if reason == Some(REASON_NON_SLP_OK) {
        return Some(verdict(true, None));
    }
    if resp.is_valid == Some(false) {
        return Some(verdict(false, resp.invalid_reason.clone()));
    }
    if resp.code.is_some_and(|c| c != 0) {
        return Some(verdict(false, resp.message.clone()));
    }
    None
}

/// Queries oracles in order until one gives a usable answer.
#[derive(Clone, Default)]
pub struct PreflightClient {
    oracles: Vec<Arc<dyn PreflightOracle>>,
}

impl std::fmt::Debug for PreflightClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.oracles.iter().map(|o| o.name()).collect();
        f.debug_struct("PreflightClient").field("oracles", &names).finish()
    }
}

impl PreflightClient {
    /// Client over `oracles`, tried in order.
    pub fn new(oracles: Vec<Arc<dyn PreflightOracle>>) -> Self {
        Self { oracles }
    }

    /// Ask the oracles about `tx`.
    pub fn query(&self, tx: &Transaction, burn: Option<&BurnRequest>) -> Result<PreflightVerdict, PreflightError> {
        let is_token_tx = TokenMessage::from_transaction(tx).is_ok();
        let required_slp_burns = match burn {
            Some(burn) => marshal_burns(burn, is_token_tx)?,
            None => Vec::new(),
        };
        let query = PreflightQuery { required_slp_burns, use_spec_validity_judgement: false };

        for oracle in &self.oracles {
            let resp = match oracle.check(tx, &query) {
                Ok(resp) => resp,
                Err(e) => {
                    tracing::warn!(node = oracle.name(), error = %e, "slp pre-flight check failed");
                    continue;
                }
            };
            if let Some(verdict) = interpret(&resp, oracle.name()) {
                return Ok(verdict);
            }
            tracing::debug!(node = oracle.name(), "unexpected preflight response, trying next");
        }
        Ok(PreflightVerdict { ok: false, reason: Some("no preflight nodes available".into()), node: None })
    }
}
