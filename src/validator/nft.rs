use super::{
    decide_send, fit_outputs, Classification, Contribution, DecideContext, Decision, InputInfo,
    NodeInfo, OwnContribution, ValidatorError,
};
use crate::job::nft::{NftParentSlots, NftPhase};
use crate::message::{TokenBody, TokenMessage};
use crate::types::{TokenId, TokenType, Transaction, Validity};

/// Rules for NFT child tokens (type 0x41).
///
/// A child is only valid when the group token spent by its GENESIS is valid.
/// That question is answered outside this graph, so `decide` consults the
/// parent slots of the running job and returns [`Decision::Deferred`] while
/// the answer is outstanding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NftChildValidator {
    /// Child token id (the child GENESIS txid).
    pub token_id: TokenId,
}

impl NftChildValidator {
    /// Validator for one NFT child token.
    pub fn new(token_id: TokenId) -> Self {
        Self { token_id }
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
        if msg.token_type != TokenType::NftChild {
            return Classification::Prune(Validity::Unknown);
        }

        let n_inputs = tx.inputs().len();
        let (input_mask, own, outputs) = match &msg.body {
            TokenBody::Send(send) => {
                let mut outputs = vec![Contribution::None];
                outputs.extend(send.amounts.iter().map(|&a| Contribution::Amount(a)));
                (vec![true; n_inputs], OwnContribution::Send(msg.send_total()), outputs)
            }
            TokenBody::Genesis(g) => {
                // Children are unit supply with no baton.
                if g.mint_baton_vout.is_some() || g.decimals != 0 || g.initial_quantity != 1 {
                    return Classification::Prune(Validity::InvalidMalformed);
                }
                let outputs = vec![Contribution::None, Contribution::Amount(1)];
                (vec![false; n_inputs], OwnContribution::Genesis, outputs)
            }
            TokenBody::Mint(_) => return Classification::Prune(Validity::InvalidMalformed),
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
        ctx: &mut DecideContext<'_>,
    ) -> Result<Decision, ValidatorError> {
        let slots = ctx.nft.as_deref_mut().ok_or(ValidatorError::MissingNftSlots)?;

        if slots.parent_validity.is_invalid() {
            return Ok(Decision::Invalid(slots.parent_validity));
        }
        if let Some(forced) = slots.forced_failure {
            return Ok(Decision::Invalid(forced));
        }
        if own == OwnContribution::Send(0) {
            return Ok(Decision::Valid);
        }

        if slots.parent_tx.is_none() {
            if slots.phase == NftPhase::Idle {
                slots.phase = NftPhase::LookupRequested;
            }
            return Ok(Decision::Deferred);
        }
        if let Some(invalid) = parent_quantity_check(slots) {
            return Ok(Decision::Invalid(invalid));
        }

        match own {
            OwnContribution::Genesis => {
                if !inputs.is_empty() {
                    return Err(ValidatorError::GenesisWithInputs(inputs.len()));
                }
                match slots.parent_validity {
                    Validity::Valid => Ok(Decision::Valid),
                    _ => Ok(Decision::Deferred),
                }
            }
            OwnContribution::Send(required) => {
                let (decision, insum_valid) = decide_send(required, inputs);
                if let Decision::Invalid(_) = decision {
                    return Ok(decision);
                }
                if insum_valid > 1 {
                    return Err(ValidatorError::NftQuantityInvariant(insum_valid));
                }
                Ok(decision)
            }
            // Pruned at classification.
            OwnContribution::Mint => Ok(Decision::Invalid(Validity::InvalidMalformed)),
        }
    }
}

/// The group output spent by the child GENESIS must carry at least one unit.
fn parent_quantity_check(slots: &NftParentSlots) -> Option<Validity> {
    let parent = slots.parent_tx.as_ref()?;
    let msg = match TokenMessage::from_transaction(parent) {
        Ok(msg) => msg,
        Err(_) => return Some(Validity::InvalidBadParent),
    };
    let issued = match &msg.body {
        TokenBody::Genesis(g) => u128::from(g.initial_quantity),
        TokenBody::Mint(m) => u128::from(m.additional_quantity),
        TokenBody::Send(_) => msg.send_total(),
        TokenBody::Commit(_) => return Some(Validity::InvalidBadParent),
    };
    (issued < 1).then_some(Validity::InvalidInsufficientInputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TxId;
    use crate::validator::test_support::make_tx;
    use std::sync::Arc;

    fn make_validator() -> NftChildValidator {
        NftChildValidator::new(TxId::from_u128(500))
    }

    fn make_group_parent(quantity: u64) -> Arc<Transaction> {
        let msg = TokenMessage::genesis(TokenType::NftGroup, 0, None, quantity);
        Arc::new(make_tx(TxId::from_u128(400), &[], &msg, 2))
    }

    #[test]
    fn test_classify_child_genesis_rules() {
        let v = make_validator();
        let ok = TokenMessage::genesis(TokenType::NftChild, 0, None, 1);
        let tx = make_tx(v.token_id, &[(TxId::from_u128(400), 1)], &ok, 2);
        assert!(matches!(v.classify(&tx), Classification::Info(_)));

        for bad in [
            TokenMessage::genesis(TokenType::NftChild, 0, Some(2), 1),
            TokenMessage::genesis(TokenType::NftChild, 1, None, 1),
            TokenMessage::genesis(TokenType::NftChild, 0, None, 2),
        ] {
            let tx = make_tx(v.token_id, &[], &bad, 3);
            assert_eq!(v.classify(&tx), Classification::Prune(Validity::InvalidMalformed));
        }

        let mint = TokenMessage::mint(TokenType::NftChild, v.token_id, None, 1);
        let tx = make_tx(TxId::from_u128(1), &[], &mint, 2);
        assert_eq!(v.classify(&tx), Classification::Prune(Validity::InvalidMalformed));
    }

    #[test]
    fn test_decide_requests_lookup_then_defers() {
        let v = make_validator();
        let mut slots = NftParentSlots::default();
        let mut ctx = DecideContext::with_nft(&mut slots);
        assert_eq!(v.decide(OwnContribution::Genesis, &[], &mut ctx).unwrap(), Decision::Deferred);
        assert_eq!(slots.phase, NftPhase::LookupRequested);
    }

    #[test]
    fn test_decide_genesis_follows_parent() {
        let v = make_validator();
        let mut slots = NftParentSlots {
            parent_tx: Some(make_group_parent(10)),
            ..Default::default()
        };
        let decision = v.decide(OwnContribution::Genesis, &[], &mut DecideContext::with_nft(&mut slots));
        assert_eq!(decision.unwrap(), Decision::Deferred);

        slots.parent_validity = Validity::Valid;
        let decision = v.decide(OwnContribution::Genesis, &[], &mut DecideContext::with_nft(&mut slots));
        assert_eq!(decision.unwrap(), Decision::Valid);

        slots.parent_validity = Validity::InvalidBadParent;
        let decision = v.decide(OwnContribution::Genesis, &[], &mut DecideContext::with_nft(&mut slots));
        assert_eq!(decision.unwrap(), Decision::Invalid(Validity::InvalidBadParent));
    }

    #[test]
    fn test_decide_zero_quantity_parent() {
        let v = make_validator();
        let mut slots = NftParentSlots {
            parent_tx: Some(make_group_parent(0)),
            parent_validity: Validity::Valid,
            ..Default::default()
        };
        let decision = v.decide(OwnContribution::Genesis, &[], &mut DecideContext::with_nft(&mut slots));
        assert_eq!(decision.unwrap(), Decision::Invalid(Validity::InvalidInsufficientInputs));
    }

    #[test]
    fn test_decide_send_quantity_invariant() {
        let v = make_validator();
        let mut slots = NftParentSlots {
            parent_tx: Some(make_group_parent(10)),
            parent_validity: Validity::Valid,
            ..Default::default()
        };
        let one = |vin| InputInfo { vin, validity: Validity::Valid, contribution: Contribution::Amount(1) };
        let mut ctx = DecideContext::with_nft(&mut slots);
        assert_eq!(v.decide(OwnContribution::Send(1), &[one(0)], &mut ctx).unwrap(), Decision::Valid);
        assert_eq!(
            v.decide(OwnContribution::Send(1), &[one(0), one(1)], &mut ctx),
            Err(ValidatorError::NftQuantityInvariant(2))
        );
    }

    #[test]
    fn test_decide_insufficient_send_before_quantity_invariant() {
        let v = make_validator();
        let mut slots = NftParentSlots {
            parent_tx: Some(make_group_parent(10)),
            parent_validity: Validity::Valid,
            ..Default::default()
        };
        let one = |vin| InputInfo { vin, validity: Validity::Valid, contribution: Contribution::Amount(1) };
        let mut ctx = DecideContext::with_nft(&mut slots);
        assert_eq!(
            v.decide(OwnContribution::Send(3), &[one(0), one(1)], &mut ctx),
            Ok(Decision::Invalid(Validity::InvalidInsufficientInputs))
        );
    }

    #[test]
    fn test_decide_without_slots_is_an_error() {
        let v = make_validator();
        assert_eq!(
            v.decide(OwnContribution::Send(1), &[], &mut DecideContext::default()),
            Err(ValidatorError::MissingNftSlots)
        );
    }
}
