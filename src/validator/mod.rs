//! Per-token consensus rule sets.
//!
//! A [`Validator`] is chosen once per token graph and never re-selected. It
//! answers three questions for the graph:
//!
//! - [`Validator::classify`]: what does this transaction look like on its own?
//!   Either it is pruned outright, or it yields the inputs worth examining,
//!   its own contribution requirement and what each output carries.
//! - [`Validator::check_needed`]: is a parent output worth recursing into?
//! - [`Validator::decide`]: given the inputs resolved so far, is the node
//!   decided?
//!
//! Consensus outcomes are plain values. Only internal inconsistencies, which
//! indicate bugs, are reported as [`ValidatorError`].

mod fungible;
mod nft;

pub use fungible::FungibleValidator;
pub use nft::NftChildValidator;

use crate::job::nft::NftParentSlots;
use crate::message::OutputToken;
use crate::types::{TokenId, TokenType, Transaction, Validity};

/// Programmer errors raised by a validator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidatorError {
    /// `check_needed` on a GENESIS node, which has no relevant parents.
    #[error("need queried for a GENESIS node")]
    NeedOnGenesis,

    /// A GENESIS node was handed inputs.
    #[error("GENESIS node received {0} inputs")]
    GenesisWithInputs(usize),

    /// A MINT node was handed an input that is not a baton.
    #[error("MINT node received non-baton input at vin {0}")]
    MintNonBatonInput(usize),

    /// More than one unit of valid input reached an NFT child.
    #[error("NFT child has {0} units of valid input, at most 1 allowed")]
    NftQuantityInvariant(u128),

    /// The NFT child validator ran without its job's parent slots.
    #[error("NFT child validator invoked without parent slots")]
    MissingNftSlots,
}

/// What one output contributes to transactions spending it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Contribution {
    /// Nothing of interest.
    None,
    /// Minting baton.
    Baton,
    /// Token units.
    Amount(u64),
}

impl From<OutputToken> for Contribution {
    fn from(token: OutputToken) -> Self {
        match token {
            OutputToken::Amount(n) => Self::Amount(n),
            OutputToken::Baton => Self::Baton,
        }
    }
}

impl Contribution {
    /// Token units, 0 for non-amounts.
    pub fn amount(self) -> u128 {
        match self {
            Self::Amount(n) => u128::from(n),
            _ => 0,
        }
    }
}

/// What a node requires from its inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnContribution {
    /// GENESIS needs nothing.
    Genesis,
    /// MINT needs a valid baton.
    Mint,
    /// SEND needs this many valid units.
    Send(u128),
}

/// Classification of a live transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    /// One flag per input: whether it matters for validation.
    pub input_mask: Vec<bool>,
    /// Own requirement.
    pub own: OwnContribution,
    /// One entry per transaction output.
    pub outputs: Vec<Contribution>,
}

/// Result of [`Validator::classify`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// Drop the node with this validity; `Unknown` means "not our concern".
    Prune(Validity),
    /// Keep the node live.
    Info(NodeInfo),
}

/// A resolved-so-far parent as seen by [`Validator::decide`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputInfo {
    /// Input index in the child transaction.
    pub vin: usize,
    /// Parent validity (`Unknown` while the parent is live).
    pub validity: Validity,
    /// What the spent output carries.
    pub contribution: Contribution,
}

/// Result of [`Validator::decide`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Valid; outputs are kept for children.
    Valid,
    /// Invalid with the given code.
    Invalid(Validity),
    /// Undecided, waiting on inputs.
    Pending,
    /// Undecided, waiting on work outside the graph. The graph parks the
    /// node until it is explicitly resumed.
    Deferred,
}

/// Per-job state available to [`Validator::decide`].
#[derive(Default)]
pub struct DecideContext<'a> {
    /// NFT parent lookup state of the job currently running.
    pub nft: Option<&'a mut NftParentSlots>,
}

impl<'a> DecideContext<'a> {
    /// Context with NFT parent slots.
    pub fn with_nft(slots: &'a mut NftParentSlots) -> Self {
        Self { nft: Some(slots) }
    }
}

/// Rule set for one token graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validator {
    /// Fungible (type 0x01) or NFT group (type 0x81) rules.
    Fungible(FungibleValidator),
    /// NFT child (type 0x41) rules.
    NftChild(NftChildValidator),
}

impl Validator {
    /// Validator for a token id, selected by its declared token type.
    pub fn for_token(token_id: TokenId, token_type: TokenType) -> Self {
        match token_type {
            TokenType::NftChild => Self::NftChild(NftChildValidator::new(token_id)),
            other => Self::Fungible(FungibleValidator::new(token_id, other)),
        }
    }

    /// Token this validator checks.
    pub fn token_id(&self) -> TokenId {
        match self {
            Self::Fungible(v) => v.token_id,
            Self::NftChild(v) => v.token_id,
        }
    }

    /// Token type this validator accepts.
    pub fn token_type(&self) -> TokenType {
        match self {
            Self::Fungible(v) => v.enforced_token_type,
            Self::NftChild(_) => TokenType::NftChild,
        }
    }

    /// Classify a transaction on its own merits.
    pub fn classify(&self, tx: &Transaction) -> Classification {
        match self {
            Self::Fungible(v) => v.classify(tx),
            Self::NftChild(v) => v.classify(tx),
        }
    }

    /// Whether a parent output with `contribution` must be explored.
    pub fn check_needed(
        &self,
        own: OwnContribution,
        contribution: Contribution,
    ) -> Result<bool, ValidatorError> {
        match own {
            OwnContribution::Genesis => Err(ValidatorError::NeedOnGenesis),
            OwnContribution::Mint => Ok(contribution == Contribution::Baton),
            OwnContribution::Send(_) => Ok(matches!(contribution, Contribution::Amount(n) if n > 0)),
        }
    }

    /// Decide a node from its inputs.
    pub fn decide(
        &self,
        own: OwnContribution,
        inputs: &[InputInfo],
        ctx: &mut DecideContext<'_>,
    ) -> Result<Decision, ValidatorError> {
        match self {
            Self::Fungible(v) => v.decide(own, inputs),
            Self::NftChild(v) => v.decide(own, inputs, ctx),
        }
    }

    /// Name of a validity code in this validator's vocabulary.
    pub fn validity_name(&self, validity: Validity) -> &'static str {
        match (self, validity) {
            (Self::Fungible(_), Validity::InvalidBadParent) => "Invalid: wrong input token type",
            _ => validity.name(),
        }
    }
}

/// SEND conservation shared by both rule sets.
///
/// `Unknown` and `Valid` inputs together must be able to cover the outputs,
/// otherwise no further resolution can help.
pub(crate) fn decide_send(required: u128, inputs: &[InputInfo]) -> (Decision, u128) {
    let insum_all: u128 = inputs
        .iter()
        .filter(|i| i.validity <= Validity::Valid)
        .map(|i| i.contribution.amount())
        .sum();
    let insum_valid: u128 = inputs
        .iter()
        .filter(|i| i.validity == Validity::Valid)
        .map(|i| i.contribution.amount())
        .sum();
    if insum_all < required {
        return (Decision::Invalid(Validity::InvalidInsufficientInputs), insum_valid);
    }
    if insum_valid >= required {
        return (Decision::Valid, insum_valid);
    }
    (Decision::Pending, insum_valid)
}

/// Fit declared outputs to the transaction's actual output count.
pub(crate) fn fit_outputs(mut outputs: Vec<Contribution>, n: usize) -> Vec<Contribution> {
    outputs.truncate(n);
    outputs.resize(n, Contribution::None);
    outputs
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::message::TokenMessage;
    use crate::types::{Address, OutPoint, Transaction, TxId, TxInput, TxOutput};

    pub fn make_tx(txid: TxId, spends: &[(TxId, u32)], msg: &TokenMessage, n_outputs: usize) -> Transaction {
        let inputs = spends
            .iter()
            .map(|&(t, v)| TxInput::new(OutPoint::new(t, v)))
            .collect();
        let mut outputs = vec![TxOutput::op_return(msg.to_script())];
        for i in 1..n_outputs {
            outputs.push(TxOutput::to_address(Address::p2pkh([i as u8; 20]), 546));
        }
        Transaction::new(txid, inputs, outputs)
    }
}
