//! Pre-signing checks against a wallet's token-output table.

mod common;

use common::*;
use proptest::prelude::*;
use slp_dag_validator::preflight::PreflightQuery;
use slp_dag_validator::{
    BurnCoin, BurnRequest, CheckError, OracleResponse, OutPoint, OutputToken, PreflightClient, PreflightError,
    PreflightOracle, SlpTransactionChecker, TokenMessage, TokenOutput, TokenType, Transaction, TxInput, TxOutput,
    ValidationConfig, Wallet,
};
use std::sync::Arc;

// ───────────────────────────────────────────────────────────────────────────
// Test Helpers
// ───────────────────────────────────────────────────────────────────────────

const TOKEN: u128 = 0x70;
const SOURCE: u128 = 0x71;

/// Wallet owning every output of a SEND source paying `amounts`.
fn make_wallet(amounts: &[u64]) -> Arc<Wallet> {
    let wallet = Wallet::new("checker");
    let source = make_send(SOURCE, TOKEN, TokenType::Fungible, &[(TOKEN, 1)], amounts.to_vec());
    wallet.add_transaction(source);
    for (i, &amount) in amounts.iter().enumerate() {
        wallet.add_token_output(
            make_addr(7),
            OutPoint::new(make_id(SOURCE), i as u32 + 1),
            TokenOutput { token_id: make_id(TOKEN), quantity: OutputToken::Amount(amount) },
        );
    }
    wallet
}

fn make_candidate(msg: Option<&TokenMessage>, spent: &[u32], n_outputs: usize) -> Transaction {
    let inputs = spent
        .iter()
        .map(|&vout| TxInput::from_address(OutPoint::new(make_id(SOURCE), vout), make_addr(7)))
        .collect();
    let mut outputs = Vec::new();
    if let Some(msg) = msg {
        outputs.push(TxOutput::op_return(msg.to_script()));
    }
    while outputs.len() < n_outputs {
        outputs.push(TxOutput::to_address(make_addr(9), 546));
    }
    Transaction::new(make_id(0x99), inputs, outputs)
}

fn make_send_candidate(spent: &[u32], amounts: Vec<u64>) -> Transaction {
    let n_outputs = amounts.len() + 1;
    let msg = TokenMessage::send(TokenType::Fungible, make_id(TOKEN), amounts);
    make_candidate(Some(&msg), spent, n_outputs)
}

fn make_burn(vout: u32, units: u64, amount: u64) -> BurnRequest {
    BurnRequest {
        coins: vec![BurnCoin {
            outpoint: OutPoint::new(make_id(SOURCE), vout),
            token_id: make_id(TOKEN),
            token_type: TokenType::Fungible,
            value: OutputToken::Amount(units),
        }],
        amount: Some(amount),
    }
}

struct FixedOracle(OracleResponse);

impl PreflightOracle for FixedOracle {
    fn name(&self) -> &str {
        "fixed"
    }

    fn check(&self, _tx: &Transaction, _query: &PreflightQuery) -> Result<OracleResponse, PreflightError> {
        Ok(self.0.clone())
    }
}

// ───────────────────────────────────────────────────────────────────────────
// SEND Conservation
// ───────────────────────────────────────────────────────────────────────────

#[test]
fn test_send_conserving_quantity_passes() {
    let wallet = make_wallet(&[100]);
    let tx = make_send_candidate(&[1], vec![60, 40]);
    assert_eq!(SlpTransactionChecker::new(&wallet).check(&tx, None), Ok(()));
}

#[test]
fn test_send_exceeding_inputs_fails() {
    let wallet = make_wallet(&[100]);
    let tx = make_send_candidate(&[1], vec![60, 50]);
    assert_eq!(
        SlpTransactionChecker::new(&wallet).check(&tx, None),
        Err(CheckError::InputsTooLow { inputs: 100, outputs: 110 })
    );
}

#[test]
fn test_declared_burn_passes() {
    let wallet = make_wallet(&[100]);
    let tx = make_send_candidate(&[1], vec![60, 30]);
    let burn = make_burn(1, 100, 10);
    assert_eq!(SlpTransactionChecker::new(&wallet).check(&tx, Some(&burn)), Ok(()));

    // Undeclared, the same shortfall is an accidental burn.
    assert_eq!(
        SlpTransactionChecker::new(&wallet).check(&tx, None),
        Err(CheckError::InputsTooHigh { inputs: 100, outputs: 90 })
    );
}

// ───────────────────────────────────────────────────────────────────────────
// Inputs and Outputs
// ───────────────────────────────────────────────────────────────────────────

#[test]
fn test_genesis_missing_receiver_output() {
    let wallet = make_wallet(&[100]);
    let msg = TokenMessage::genesis(TokenType::Fungible, 2, None, 1_000);
    let tx = make_candidate(Some(&msg), &[], 1);
    assert_eq!(
        SlpTransactionChecker::new(&wallet).check(&tx, None),
        Err(CheckError::MissingTokenReceiverOutput(1))
    );
}

#[test]
fn test_untracked_token_input() {
    let wallet = Wallet::new("untracked");
    let source = make_send(SOURCE, TOKEN, TokenType::Fungible, &[(TOKEN, 1)], vec![100]);
    wallet.add_transaction(source);
    let tx = make_send_candidate(&[1], vec![100]);
    assert_eq!(
        SlpTransactionChecker::new(&wallet).check(&tx, None),
        Err(CheckError::MissingInputRecord(OutPoint::new(make_id(SOURCE), 1)))
    );
}

#[test]
fn test_non_token_spend_requires_burn() {
    let wallet = make_wallet(&[100]);
    let tx = make_candidate(None, &[1], 1);
    assert_eq!(
        SlpTransactionChecker::new(&wallet).check(&tx, None),
        Err(CheckError::NonTokenTxHasTokenInputs(OutPoint::new(make_id(SOURCE), 1)))
    );
    let burn = make_burn(1, 100, 100);
    assert_eq!(SlpTransactionChecker::new(&wallet).check(&tx, Some(&burn)), Ok(()));
}

// ───────────────────────────────────────────────────────────────────────────
// Preflight
// ───────────────────────────────────────────────────────────────────────────

#[test]
fn test_preflight_rejection_is_reported() {
    let wallet = make_wallet(&[100]);
    let tx = make_send_candidate(&[1], vec![100]);
    let oracle = FixedOracle(OracleResponse {
        is_valid: Some(false),
        invalid_reason: Some("outputs greater than inputs".into()),
        ..Default::default()
    });
    let client = PreflightClient::new(vec![Arc::new(oracle) as Arc<dyn PreflightOracle>]);
    let config = ValidationConfig { preflight_check: true, ..Default::default() };

    let result = SlpTransactionChecker::configured(&wallet, &config, Some(&client)).check(&tx, None);
    assert_eq!(
        result,
        Err(CheckError::PreflightRejected {
            reason: "outputs greater than inputs".into(),
            node: Some("fixed".into()),
        })
    );

    // With preflight disabled the oracle is never consulted.
    let config = ValidationConfig::default();
    assert_eq!(SlpTransactionChecker::configured(&wallet, &config, Some(&client)).check(&tx, None), Ok(()));
}

// ───────────────────────────────────────────────────────────────────────────
// Properties
// ───────────────────────────────────────────────────────────────────────────

proptest! {
    #[test]
    fn prop_send_accepted_iff_conserving(
        inputs in prop::collection::vec(1u64..1_000, 1..4),
        outputs in prop::collection::vec(1u64..1_000, 1..5),
    ) {
        let wallet = make_wallet(&inputs);
        let spent: Vec<u32> = (1..=inputs.len() as u32).collect();
        let tx = make_send_candidate(&spent, outputs.clone());
        let total_in: u128 = inputs.iter().map(|&a| u128::from(a)).sum();
        let total_out: u128 = outputs.iter().map(|&a| u128::from(a)).sum();

        let result = SlpTransactionChecker::new(&wallet).check(&tx, None);
        prop_assert_eq!(result.is_ok(), total_in == total_out);
    }
}
