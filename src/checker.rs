//! Transaction precondition checker.
//!
//! Run synchronously before a wallet signs or broadcasts a candidate token
//! transaction. Everything is checked against the wallet's own tables; the
//! only optional outside contact is a [`PreflightClient`].
//!
//! Steps, each fatal on failure:
//!
//! 1. Every input's source transaction is known, and every token-bearing
//!    outpoint spent is recorded in the token-output table.
//! 2. The candidate's own metadata is parsed; a non-token transaction skips
//!    to step 3, a token transaction to step 4.
//! 3. Token inputs of a non-token transaction must all be listed for
//!    burning, and the listed coins must add up to the burn amount.
//! 4. Quantity conservation, token ids and required outputs per kind.
//! 5. Preflight oracles, when configured.
//!
//! Before step 1 the burn request itself is checked: its coins and amount
//! must be given together, and no listed coin may belong to a token whose
//! decimals are unverified. These failures win over an unknown ancestor,
//! matching the order the wallet's burn command applies them.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::config::ValidationConfig;
use crate::message::{OutputToken, ParseError, TokenBody, TokenMessage};
use crate::preflight::PreflightClient;
use crate::types::{OutPoint, TokenId, TokenType, Transaction, TxId, TxInput};
use crate::wallet::{Decimals, TokenOutput, Wallet, WalletTables};

/// Checker failures. Each names the violated rule.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CheckError {
    /// An input's source transaction was never downloaded.
    #[error("wallet has not downloaded transaction {0}")]
    AncestorNotInWallet(TxId),
    /// A token-bearing outpoint is not in the token-output table.
    #[error("transaction contains an SLP input that is unknown to this wallet: {0}")]
    MissingInputRecord(OutPoint),
    /// An input comes from a token type this wallet does not support.
    #[error("transaction contains an unsupported SLP input type {token_type} at {outpoint}")]
    UnsupportedInputTokenType {
        /// Spent outpoint.
        outpoint: OutPoint,
        /// Declared token type.
        token_type: u16,
    },
    /// A non-token transaction spends a token input not listed for burning.
    #[error("transaction contains unspecified SLP inputs at {0} (use a burn request to burn tokens)")]
    NonTokenTxHasTokenInputs(OutPoint),
    /// A GENESIS spends a token input not listed for burning.
    #[error("genesis transaction contains unspecified SLP input at {0}")]
    GenesisHasTokenInputs(OutPoint),
    /// An input belongs to another token.
    #[error("input {outpoint} has token id {found}, expected {expected}")]
    WrongTokenId {
        /// Spent outpoint.
        outpoint: OutPoint,
        /// Token of the candidate.
        expected: TokenId,
        /// Token of the input.
        found: TokenId,
    },
    /// SEND outputs exceed token inputs.
    #[error("SLP outputs ({outputs}) exceed SLP inputs ({inputs})")]
    InputsTooLow {
        /// Input units.
        inputs: u128,
        /// Output units.
        outputs: u128,
    },
    /// SEND inputs exceed outputs without a declared burn.
    #[error("SLP inputs ({inputs}) exceed SLP outputs ({outputs})")]
    InputsTooHigh {
        /// Input units.
        inputs: u128,
        /// Output units.
        outputs: u128,
    },
    /// A coin listed for burning is not spent by the transaction.
    #[error("transaction is missing SLP input {0} intended to be burned")]
    MissingCoinToBeBurned(OutPoint),
    /// Burn accounting does not add up.
    #[error("invalid burn amount: {0}")]
    InvalidBurnAmount(&'static str),
    /// A MINT spends a token input that is not a baton.
    #[error("MINT transaction contains non-baton SLP input {0}")]
    NonBatonMintInput(OutPoint),
    /// The declared baton output does not exist.
    #[error("transaction is missing baton vout {0}")]
    MissingMintBatonOutput(u32),
    /// A declared token output does not exist.
    #[error("transaction is missing token receiver vout {0}")]
    MissingTokenReceiverOutput(u32),
    /// A token output is not a P2PKH or P2SH output.
    #[error("SLP output {0} must be a P2PKH or P2SH output")]
    BadOutputType(u32),
    /// Burning a token whose decimals were never verified.
    #[error("token {0} is unverified (unknown decimals)")]
    UnverifiedTokenDecimals(TokenId),
    /// A preflight oracle refused the transaction.
    #[error("slp pre-flight check failed: {reason} (node: {node:?})")]
    PreflightRejected {
        /// Oracle's stated reason.
        reason: String,
        /// Oracle that answered.
        node: Option<String>,
    },
}

/// A coin the caller intends to burn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BurnCoin {
    /// Spent outpoint.
    pub outpoint: OutPoint,
    /// Token of the coin.
    pub token_id: TokenId,
    /// Token type of the coin.
    pub token_type: TokenType,
    /// Units or baton.
    pub value: OutputToken,
}

/// Explicit burn request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BurnRequest {
    /// Coins allowed to be destroyed.
    pub coins: Vec<BurnCoin>,
    /// Units destroyed in total.
    pub amount: Option<u64>,
}

/// Pre-signing checker bound to one wallet.
#[derive(Debug)]
pub struct SlpTransactionChecker<'a> {
    wallet: &'a Wallet,
    require_tx_in_wallet: bool,
    preflight: Option<&'a PreflightClient>,
}

impl<'a> SlpTransactionChecker<'a> {
    /// Checker without preflight, requiring source transactions in the wallet.
    pub fn new(wallet: &'a Wallet) -> Self {
        Self { wallet, require_tx_in_wallet: true, preflight: None }
    }

    /// Checker whose preflight stage follows `config.preflight_check`.
    pub fn configured(wallet: &'a Wallet, config: &ValidationConfig, client: Option<&'a PreflightClient>) -> Self {
        Self { preflight: client.filter(|_| config.preflight_check), ..Self::new(wallet) }
    }

    /// Whether step 1 runs.
    pub fn require_tx_in_wallet(mut self, require: bool) -> Self {
        self.require_tx_in_wallet = require;
        self
    }

    /// Query `client` as the last step.
    pub fn with_preflight(mut self, client: &'a PreflightClient) -> Self {
        self.preflight = Some(client);
        self
    }

    /// Check `tx`. `burn` lists the coins the caller is willing to destroy.
    pub fn check(&self, tx: &Transaction, burn: Option<&BurnRequest>) -> Result<(), CheckError> {
        let result = self.run_checks(tx, burn);
        match &result {
            Ok(()) => tracing::debug!(txid = %tx.txid().short(10), "final SLP check passed"),
            Err(e) => tracing::warn!(txid = %tx.txid().short(10), error = %e, "SLP check failed"),
        }
        result
    }

    fn run_checks(&self, tx: &Transaction, burn: Option<&BurnRequest>) -> Result<(), CheckError> {
        let coins: &[BurnCoin] = burn.map(|b| b.coins.as_slice()).unwrap_or_default();
        let amount = burn.and_then(|b| b.amount);
        if !coins.is_empty() && amount.is_none() {
            return Err(CheckError::InvalidBurnAmount("burn requested, but missing burn amount"));
        }
        if coins.is_empty() && amount.is_some_and(|a| a > 0) {
            return Err(CheckError::InvalidBurnAmount("burn requested, but missing coins to burn"));
        }

        {
            let tables = self.wallet.lock();
            for coin in coins {
                let unverified = tables
                    .token_types
                    .get(&coin.token_id)
                    .is_some_and(|e| e.decimals == Decimals::Unverified);
                if unverified {
                    return Err(CheckError::UnverifiedTokenDecimals(coin.token_id));
                }
            }
            if self.require_tx_in_wallet {
                check_ancestors(&tables, tx)?;
            }
            match TokenMessage::from_transaction(tx) {
                Err(_) => check_non_token(&tables, tx, coins, amount.unwrap_or(0))?,
                Ok(msg) => check_token(&tables, tx, &msg, coins, amount.unwrap_or(0))?,
            }
        }

        if let Some(client) = self.preflight {
            let verdict = client
                .query(tx, burn)
                .map_err(|e| CheckError::PreflightRejected { reason: e.to_string(), node: None })?;
            if !verdict.ok {
                return Err(CheckError::PreflightRejected {
                    reason: verdict.reason.unwrap_or_else(|| "rejected".into()),
                    node: verdict.node,
                });
            }
        }
        Ok(())
    }
}

/// Recorded token value for an input. Inputs without a known address match
/// the outpoint under any address.
fn input_record(tables: &WalletTables, input: &TxInput) -> Option<TokenOutput> {
    match &input.address {
        Some(address) => tables.token_output(address, &input.prevout),
        None => tables.token_output_any(&input.prevout),
    }
}

fn is_empty_amount(record: &TokenOutput) -> bool {
    record.quantity == OutputToken::Amount(0)
}

fn check_ancestors(tables: &WalletTables, tx: &Transaction) -> Result<(), CheckError> {
    for input in tx.inputs() {
        let prevout = input.prevout;
        let source = tables
            .transactions
            .get(&prevout.txid)
            .ok_or(CheckError::AncestorNotInWallet(prevout.txid))?;
        let msg = match TokenMessage::from_transaction(source) {
            Ok(msg) => msg,
            Err(ParseError::UnsupportedTokenType(token_type)) => {
                return Err(CheckError::UnsupportedInputTokenType { outpoint: prevout, token_type });
            }
            Err(ParseError::Invalid(_)) => continue,
        };
        // GENESIS/MINT carry value only at vout 1 (if nonzero) and the baton vout.
        let carries_value = msg.token_output(prevout.vout).is_some_and(OutputToken::is_value_bearing);
        if carries_value && input_record(tables, input).is_none() {
            return Err(CheckError::MissingInputRecord(prevout));
        }
    }
    Ok(())
}

fn check_non_token(tables: &WalletTables, tx: &Transaction, coins: &[BurnCoin], amount: u64) -> Result<(), CheckError> {
    let mut in_txn = HashSet::new();
    for input in tx.inputs() {
        if input_record(tables, input).is_none() {
            continue;
        }
        if !coins.iter().any(|c| c.outpoint == input.prevout) {
            return Err(CheckError::NonTokenTxHasTokenInputs(input.prevout));
        }
        in_txn.insert(input.prevout);
    }
    if coins.is_empty() {
        return Ok(());
    }

    let mut total_burn: u128 = 0;
    for coin in coins {
        if !in_txn.contains(&coin.outpoint) {
            return Err(CheckError::MissingCoinToBeBurned(coin.outpoint));
        }
        if let OutputToken::Amount(units) = coin.value {
            total_burn += u128::from(units);
        }
    }
    if total_burn != u128::from(amount) {
        return Err(CheckError::InvalidBurnAmount("burn amount does not match transaction"));
    }
    Ok(())
}

fn check_token(
    tables: &WalletTables,
    tx: &Transaction,
    msg: &TokenMessage,
    coins: &[BurnCoin],
    amount: u64,
) -> Result<(), CheckError> {
    match &msg.body {
        TokenBody::Send(send) => {
            let outputs = msg.send_total();
            let mut inputs: u128 = 0;
            for input in tx.inputs() {
                let Some(record) = input_record(tables, input) else { continue };
                if is_empty_amount(&record) {
                    continue;
                }
                if let OutputToken::Amount(units) = record.quantity {
                    inputs += u128::from(units);
                }
                if record.token_id != send.token_id {
                    return Err(CheckError::WrongTokenId {
                        outpoint: input.prevout,
                        expected: send.token_id,
                        found: record.token_id,
                    });
                }
            }

            if inputs < outputs {
                return Err(CheckError::InputsTooLow { inputs, outputs });
            }
            if !coins.is_empty() {
                if inputs.checked_sub(u128::from(amount)) != Some(outputs) {
                    return Err(CheckError::InvalidBurnAmount("burn amount does not match transaction"));
                }
            } else if inputs > outputs {
                return Err(CheckError::InputsTooHigh { inputs, outputs });
            }

            for vout in 1..=send.amounts.len() as u32 {
                check_address_output(tx, vout, CheckError::MissingTokenReceiverOutput(vout))?;
            }
        }
        TokenBody::Mint(mint) => {
            for input in tx.inputs() {
                let Some(record) = input_record(tables, input) else { continue };
                if is_empty_amount(&record) {
                    continue;
                }
                if record.quantity != OutputToken::Baton {
                    return Err(CheckError::NonBatonMintInput(input.prevout));
                }
                if record.token_id != mint.token_id {
                    return Err(CheckError::WrongTokenId {
                        outpoint: input.prevout,
                        expected: mint.token_id,
                        found: record.token_id,
                    });
                }
            }
        }
        TokenBody::Genesis(_) => {
            for input in tx.inputs() {
                let Some(record) = input_record(tables, input) else { continue };
                if is_empty_amount(&record) {
                    continue;
                }
                if !coins.iter().any(|c| c.outpoint == input.prevout) {
                    return Err(CheckError::GenesisHasTokenInputs(input.prevout));
                }
            }
        }
        TokenBody::Commit(_) => {}
    }

    if matches!(msg.body, TokenBody::Genesis(_) | TokenBody::Mint(_)) {
        if let Some(baton) = msg.mint_baton_vout() {
            check_address_output(tx, baton, CheckError::MissingMintBatonOutput(baton))?;
        }
        check_address_output(tx, 1, CheckError::MissingTokenReceiverOutput(1))?;
    }
    Ok(())
}

/// Output `vout` must exist and pay a P2PKH or P2SH address.
fn check_address_output(tx: &Transaction, vout: u32, missing: CheckError) -> Result<(), CheckError> {
    let output = tx.outputs().get(vout as usize).ok_or(missing)?;
    if !output.is_standard_address() {
        return Err(CheckError::BadOutputType(vout));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Address, TxOutput};
    use crate::wallet::TokenTypeEntry;
    use std::sync::Arc;

    const TOKEN: u128 = 1;

    fn make_addr(n: u8) -> Address {
        Address::p2pkh([n; 20])
    }

    fn make_candidate(msg: Option<&TokenMessage>, spends: &[OutPoint], n_outputs: usize) -> Transaction {
        let inputs = spends.iter().map(|&op| TxInput::from_address(op, make_addr(7))).collect();
        let mut outputs = Vec::new();
        if let Some(msg) = msg {
            outputs.push(TxOutput::op_return(msg.to_script()));
        }
        while outputs.len() < n_outputs {
            outputs.push(TxOutput::to_address(make_addr(8), 546));
        }
        Transaction::new(TxId::from_u128(99), inputs, outputs)
    }

    /// Wallet owning `outputs` of a fungible SEND source transaction.
    fn make_wallet(amounts: &[u64]) -> Arc<Wallet> {
        let wallet = Wallet::new("checker");
        let token = TxId::from_u128(TOKEN);
        let msg = TokenMessage::send(TokenType::Fungible, token, amounts.to_vec());
        let source = crate::validator::test_support::make_tx(TxId::from_u128(50), &[], &msg, amounts.len() + 1);
        wallet.add_transaction(Arc::new(source));
        for (i, &a) in amounts.iter().enumerate() {
            wallet.add_token_output(
                make_addr(7),
                OutPoint::new(TxId::from_u128(50), i as u32 + 1),
                TokenOutput { token_id: token, quantity: OutputToken::Amount(a) },
            );
        }
        wallet
    }

    fn make_send(amounts: Vec<u64>) -> TokenMessage {
        TokenMessage::send(TokenType::Fungible, TxId::from_u128(TOKEN), amounts)
    }

    #[test]
    fn test_send_exact_conservation() {
        let wallet = make_wallet(&[100]);
        let spend = [OutPoint::new(TxId::from_u128(50), 1)];
        let checker = SlpTransactionChecker::new(&wallet);

        let ok = make_candidate(Some(&make_send(vec![60, 40])), &spend, 3);
        assert_eq!(checker.check(&ok, None), Ok(()));

        let low = make_candidate(Some(&make_send(vec![60, 50])), &spend, 3);
        assert_eq!(checker.check(&low, None), Err(CheckError::InputsTooLow { inputs: 100, outputs: 110 }));

        let high = make_candidate(Some(&make_send(vec![60, 30])), &spend, 3);
        assert_eq!(checker.check(&high, None), Err(CheckError::InputsTooHigh { inputs: 100, outputs: 90 }));
    }

    #[test]
    fn test_send_missing_receiver_output() {
        let wallet = make_wallet(&[100]);
        let spend = [OutPoint::new(TxId::from_u128(50), 1)];
        let tx = make_candidate(Some(&make_send(vec![60, 40])), &spend, 2);
        let err = SlpTransactionChecker::new(&wallet).check(&tx, None).unwrap_err();
        assert_eq!(err, CheckError::MissingTokenReceiverOutput(2));
    }

    #[test]
    fn test_wrong_token_id_input() {
        let wallet = make_wallet(&[100]);
        let spend = [OutPoint::new(TxId::from_u128(50), 1)];
        let other = TokenMessage::send(TokenType::Fungible, TxId::from_u128(2), vec![100]);
        let tx = make_candidate(Some(&other), &spend, 2);
        let err = SlpTransactionChecker::new(&wallet).check(&tx, None).unwrap_err();
        assert!(matches!(err, CheckError::WrongTokenId { found, .. } if found == TxId::from_u128(TOKEN)));
    }

    #[test]
    fn test_ancestor_must_be_known() {
        let wallet = make_wallet(&[100]);
        let spend = [OutPoint::new(TxId::from_u128(51), 0)];
        let tx = make_candidate(None, &spend, 1);
        let checker = SlpTransactionChecker::new(&wallet);
        assert_eq!(checker.check(&tx, None), Err(CheckError::AncestorNotInWallet(TxId::from_u128(51))));
        assert_eq!(checker.require_tx_in_wallet(false).check(&tx, None), Ok(()));
    }

    #[test]
    fn test_non_token_spend_requires_burn_listing() {
        let wallet = make_wallet(&[100]);
        let op = OutPoint::new(TxId::from_u128(50), 1);
        let tx = make_candidate(None, &[op], 1);
        let checker = SlpTransactionChecker::new(&wallet);
        assert_eq!(checker.check(&tx, None), Err(CheckError::NonTokenTxHasTokenInputs(op)));

        let coin = BurnCoin {
            outpoint: op,
            token_id: TxId::from_u128(TOKEN),
            token_type: TokenType::Fungible,
            value: OutputToken::Amount(100),
        };
        let burn = BurnRequest { coins: vec![coin], amount: Some(100) };
        assert_eq!(checker.check(&tx, Some(&burn)), Ok(()));

        let short = BurnRequest { coins: vec![coin], amount: Some(99) };
        assert!(matches!(checker.check(&tx, Some(&short)), Err(CheckError::InvalidBurnAmount(_))));
    }

    #[test]
    fn test_burn_request_shape() {
        let wallet = make_wallet(&[100]);
        let tx = make_candidate(None, &[], 1);
        let checker = SlpTransactionChecker::new(&wallet);
        let no_coins = BurnRequest { coins: vec![], amount: Some(5) };
        assert!(matches!(checker.check(&tx, Some(&no_coins)), Err(CheckError::InvalidBurnAmount(_))));
    }

    #[test]
    fn test_unverified_decimals_refuse_burn() {
        let wallet = make_wallet(&[100]);
        let token = TxId::from_u128(TOKEN);
        wallet.add_token_type(
            token,
            TokenTypeEntry {
                class: TokenType::Fungible,
                name: "unverified".into(),
                decimals: Decimals::Unverified,
                group_id: None,
            },
            false,
        );
        let op = OutPoint::new(TxId::from_u128(50), 1);
        let tx = make_candidate(None, &[op], 1);
        let coin = BurnCoin { outpoint: op, token_id: token, token_type: TokenType::Fungible, value: OutputToken::Amount(100) };
        let burn = BurnRequest { coins: vec![coin], amount: Some(100) };
        let err = SlpTransactionChecker::new(&wallet).check(&tx, Some(&burn)).unwrap_err();
        assert_eq!(err, CheckError::UnverifiedTokenDecimals(token));
    }

    #[test]
    fn test_burn_checks_run_before_ancestor_scan() {
        let wallet = Wallet::new("empty");
        let token = TxId::from_u128(TOKEN);
        wallet.add_token_type(
            token,
            TokenTypeEntry {
                class: TokenType::Fungible,
                name: "unverified".into(),
                decimals: Decimals::Unverified,
                group_id: None,
            },
            false,
        );
        let op = OutPoint::new(TxId::from_u128(77), 1);
        let tx = make_candidate(None, &[op], 1);
        let checker = SlpTransactionChecker::new(&wallet);

        let coin = BurnCoin { outpoint: op, token_id: token, token_type: TokenType::Fungible, value: OutputToken::Amount(5) };
        let no_amount = BurnRequest { coins: vec![coin], amount: None };
        assert!(matches!(checker.check(&tx, Some(&no_amount)), Err(CheckError::InvalidBurnAmount(_))));

        let burn = BurnRequest { coins: vec![coin], amount: Some(5) };
        assert_eq!(checker.check(&tx, Some(&burn)), Err(CheckError::UnverifiedTokenDecimals(token)));

        // Without a burn request the unknown ancestor is what fails.
        assert_eq!(checker.check(&tx, None), Err(CheckError::AncestorNotInWallet(TxId::from_u128(77))));
    }

    #[test]
    fn test_mint_rejects_non_baton_input() {
        let wallet = make_wallet(&[100]);
        let op = OutPoint::new(TxId::from_u128(50), 1);
        let mint = TokenMessage::mint(TokenType::Fungible, TxId::from_u128(TOKEN), Some(2), 10);
        let tx = make_candidate(Some(&mint), &[op], 3);
        let err = SlpTransactionChecker::new(&wallet).check(&tx, None).unwrap_err();
        assert_eq!(err, CheckError::NonBatonMintInput(op));
    }

    #[test]
    fn test_genesis_outputs() {
        let wallet = Wallet::new("genesis");
        let checker = SlpTransactionChecker::new(&wallet);
        let genesis = TokenMessage::genesis(TokenType::Fungible, 0, None, 1);

        assert_eq!(checker.check(&make_candidate(Some(&genesis), &[], 2), None), Ok(()));
        assert_eq!(
            checker.check(&make_candidate(Some(&genesis), &[], 1), None),
            Err(CheckError::MissingTokenReceiverOutput(1))
        );

        let with_baton = TokenMessage::genesis(TokenType::Fungible, 0, Some(2), 1);
        assert_eq!(
            checker.check(&make_candidate(Some(&with_baton), &[], 2), None),
            Err(CheckError::MissingMintBatonOutput(2))
        );
    }

    #[test]
    fn test_preflight_rejection_surfaces_reason() {
        use crate::preflight::{OracleResponse, PreflightError, PreflightOracle, PreflightQuery};

        struct Refuse;
        impl PreflightOracle for Refuse {
            fn name(&self) -> &str {
                "refuse"
            }
            fn check(&self, _tx: &Transaction, _q: &PreflightQuery) -> Result<OracleResponse, PreflightError> {
                Ok(OracleResponse { is_valid: Some(false), invalid_reason: Some("burns".into()), ..Default::default() })
            }
        }

        let wallet = Wallet::new("preflight");
        let client = PreflightClient::new(vec![Arc::new(Refuse)]);
        let tx = make_candidate(Some(&TokenMessage::genesis(TokenType::Fungible, 0, None, 1)), &[], 2);

        let config = ValidationConfig { preflight_check: false, ..Default::default() };
        assert_eq!(SlpTransactionChecker::configured(&wallet, &config, Some(&client)).check(&tx, None), Ok(()));

        let err = SlpTransactionChecker::new(&wallet).with_preflight(&client).check(&tx, None).unwrap_err();
        assert_eq!(err, CheckError::PreflightRejected { reason: "burns".into(), node: Some("refuse".into()) });
    }
}
