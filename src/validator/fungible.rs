use super::{
    decide_send, fit_outputs, Classification, Contribution, Decision, InputInfo, NodeInfo,
    OwnContribution, ValidatorError,
};
use crate::message::{TokenBody, TokenMessage};
use crate::types::{TokenId, TokenType, Transaction, Validity};

/// Rules for fungible tokens, also used for NFT group tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FungibleValidator {
    /// Token checked by this validator.
    pub token_id: TokenId,
    /// Only metadata of this type is considered.
    pub enforced_token_type: TokenType,
}

impl FungibleValidator {
    /// Validator for `token_id` accepting `enforced_token_type` metadata.
    pub fn new(token_id: TokenId, enforced_token_type: TokenType) -> Self {
        Self { token_id, enforced_token_type }
    }

    pub(super) fn classify(&self, tx: &Transaction) -> Classification {
        if tx.outputs().is_empty() {
            return Classification::Prune(Validity::InvalidMalformed);
        }
        let msg = match TokenMessage::from_transaction(tx) {
            Ok(msg) => msg,
            Err(e) if e.is_unsupported() => return Classification::Prune(Validity::Unknown),
            Err(_) => return Classification::Prune(Validity::InvalidMalformed),
        };
        if msg.token_type != self.enforced_token_type {
            return Classification::Prune(Validity::Unknown);
        }

        let n_inputs = tx.inputs().len();
        let (input_mask, own, outputs) = match &msg.body {
            TokenBody::Send(send) => {
                let mut outputs = vec![Contribution::None];
                outputs.extend(send.amounts.iter().map(|&a| Contribution::Amount(a)));
                // The sum is taken before outputs are fitted to the transaction.
                (vec![true; n_inputs], OwnContribution::Send(msg.send_total()), outputs)
            }
            TokenBody::Genesis(g) => {
                let outputs = issued_outputs(g.initial_quantity, g.mint_baton_vout);
                (vec![false; n_inputs], OwnContribution::Genesis, outputs)
            }
            TokenBody::Mint(m) => {
                let outputs = issued_outputs(m.additional_quantity, m.mint_baton_vout);
                (vec![true; n_inputs], OwnContribution::Mint, outputs)
            }
            TokenBody::Commit(_) => return Classification::Prune(Validity::Unknown),
        };

        if msg.token_id(tx.txid()) != self.token_id {
            return Classification::Prune(Validity::Unknown);
        }

        Classification::Info(NodeInfo {
            input_mask,
            own,
            outputs: fit_outputs(outputs, tx.outputs().len()),
        })
    }

    pub(super) fn decide(
        &self,
        own: OwnContribution,
        inputs: &[InputInfo],
    ) -> Result<Decision, ValidatorError> {
        match own {
            OwnContribution::Genesis => {
                if !inputs.is_empty() {
                    return Err(ValidatorError::GenesisWithInputs(inputs.len()));
                }
                Ok(Decision::Valid)
            }
            OwnContribution::Mint => {
                if let Some(bad) = inputs.iter().find(|i| i.contribution != Contribution::Baton) {
                    return Err(ValidatorError::MintNonBatonInput(bad.vin));
                }
                if inputs.iter().any(|i| i.validity == Validity::Valid) {
                    Ok(Decision::Valid)
                } else if inputs.iter().all(|i| i.validity.is_invalid()) {
                    // Covers the no-baton case as well.
                    Ok(Decision::Invalid(Validity::InvalidInsufficientInputs))
                } else {
                    Ok(Decision::Pending)
                }
            }
            OwnContribution::Send(required) => Ok(decide_send(required, inputs).0),
        }
    }
}

fn issued_outputs(quantity: u64, baton: Option<u32>) -> Vec<Contribution> {
    let mut outputs = vec![Contribution::None, Contribution::Amount(quantity)];
    if let Some(vout) = baton {
        let vout = vout as usize;
        if outputs.len() <= vout {
            outputs.resize(vout + 1, Contribution::None);
        }
        outputs[vout] = Contribution::Baton;
    }
    outputs
}
