//! Shared fixtures for the integration tests: an in-memory network and
//! transaction builders.

#![allow(dead_code)]

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use slp_dag_validator::{
    Address, GraphContext, Network, OutPoint, Request, Response, ResponseCallback, RpcError, TokenMessage,
    TokenType, Transaction, TxId, TxInput, TxOutput, ValidationConfig,
};

/// How long a test waits for a job before failing.
pub const JOB_WAIT: Duration = Duration::from_secs(10);

// ───────────────────────────────────────────────────────────────────────────
// Mock Network
// ───────────────────────────────────────────────────────────────────────────

/// Serves transactions from a map. Unknown txids get an RPC error.
pub struct MockNetwork {
    txs: Mutex<HashMap<TxId, Arc<Transaction>>>,
    requests: AtomicUsize,
    mode: Mode,
    held: Mutex<Vec<ResponseCallback>>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mode {
    Inline,
    Threaded,
    Stalled,
}

impl MockNetwork {
    fn with_mode(mode: Mode) -> Arc<Self> {
        Arc::new(Self {
            txs: Mutex::new(HashMap::new()),
            requests: AtomicUsize::new(0),
            mode,
            held: Mutex::new(Vec::new()),
        })
    }

    /// Answers inside `send`, on the caller's thread.
    pub fn new() -> Arc<Self> {
        Self::with_mode(Mode::Inline)
    }

    /// Answers from a spawned thread.
    pub fn threaded() -> Arc<Self> {
        Self::with_mode(Mode::Threaded)
    }

    /// Accepts requests and never answers. Callbacks stay alive so the
    /// caller sees a pending response, not a dropped connection.
    pub fn stalled() -> Arc<Self> {
        Self::with_mode(Mode::Stalled)
    }

    pub fn insert(&self, tx: &Arc<Transaction>) {
        self.txs.lock().insert(tx.txid(), tx.clone());
    }

    /// Requests served so far.
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

impl Network for MockNetwork {
    fn send(&self, requests: Vec<Request>, callback: ResponseCallback) {
        self.requests.fetch_add(requests.len(), Ordering::SeqCst);
        if self.mode == Mode::Stalled {
            self.held.lock().push(callback);
            return;
        }
        let answers: Vec<Response> = {
            let txs = self.txs.lock();
            requests
                .into_iter()
                .map(|request| {
                    let result = request
                        .txid()
                        .and_then(|t| txs.get(&t).cloned())
                        .ok_or_else(|| RpcError { code: 2, message: "No such mempool or blockchain transaction".into() });
                    Response { request, result }
                })
                .collect()
        };
        if self.mode == Mode::Threaded {
            std::thread::spawn(move || answers.into_iter().for_each(|a| callback(a)));
        } else {
            answers.into_iter().for_each(|a| callback(a));
        }
    }
}

// ───────────────────────────────────────────────────────────────────────────
// Builders
// ───────────────────────────────────────────────────────────────────────────

pub fn make_id(n: u128) -> TxId {
    TxId::from_u128(n)
}

pub fn make_addr(n: u8) -> Address {
    Address::p2pkh([n; 20])
}

/// Output 0 carries `msg`; outputs 1.. pay 546 sats to distinct addresses.
pub fn make_tx(txid: u128, spends: &[(u128, u32)], msg: &TokenMessage, n_outputs: usize) -> Arc<Transaction> {
    let inputs = spends
        .iter()
        .map(|&(t, v)| TxInput::from_address(OutPoint::new(make_id(t), v), make_addr(7)))
        .collect();
    let mut outputs = vec![TxOutput::op_return(msg.to_script())];
    for i in 1..n_outputs {
        outputs.push(TxOutput::to_address(make_addr(i as u8), 546));
    }
    Arc::new(Transaction::new(make_id(txid), inputs, outputs))
}

/// Spent by every GENESIS; never a token output.
pub const FUNDING: u128 = 0xf00;

pub fn make_genesis(txid: u128, token_type: TokenType, quantity: u64) -> Arc<Transaction> {
    let msg = TokenMessage::genesis(token_type, 0, None, quantity);
    make_tx(txid, &[(FUNDING, 0)], &msg, 2)
}

pub fn make_send(txid: u128, token: u128, token_type: TokenType, spends: &[(u128, u32)], amounts: Vec<u64>) -> Arc<Transaction> {
    let n_outputs = amounts.len() + 1;
    let msg = TokenMessage::send(token_type, make_id(token), amounts);
    make_tx(txid, spends, &msg, n_outputs)
}

/// GENESIS of `quantity` with its mint baton at vout 2.
pub fn make_baton_genesis(txid: u128, quantity: u64) -> Arc<Transaction> {
    let msg = TokenMessage::genesis(TokenType::Fungible, 0, Some(2), quantity);
    make_tx(txid, &[(FUNDING, 0)], &msg, 3)
}

/// MINT of `token` spending `baton`, passing the baton on to vout 2.
pub fn make_mint(txid: u128, token: u128, baton: (u128, u32), quantity: u64) -> Arc<Transaction> {
    let msg = TokenMessage::mint(TokenType::Fungible, make_id(token), Some(2), quantity);
    make_tx(txid, &[baton], &msg, 3)
}

/// Fungible chain `G(100) → S1[100] → S2[amounts]`. Returns `[G, S1, S2]`.
pub fn make_fungible_chain(base: u128, amounts: Vec<u64>) -> [Arc<Transaction>; 3] {
    let genesis = make_genesis(base, TokenType::Fungible, 100);
    let send1 = make_send(base + 1, base, TokenType::Fungible, &[(base, 1)], vec![100]);
    let send2 = make_send(base + 2, base, TokenType::Fungible, &[(base + 1, 1)], amounts);
    [genesis, send1, send2]
}

pub fn make_context(config: ValidationConfig) -> Arc<GraphContext> {
    GraphContext::new("test", config, None)
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
