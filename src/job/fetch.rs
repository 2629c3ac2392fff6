//! Network fetch primitive and the bounded-wait adapter over it.

use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::types::{Transaction, TxId};

/// Longest a cancellable fetch waits between checks of its predicate.
pub const CANCEL_POLL: Duration = Duration::from_millis(25);

/// One request to the network collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// RPC method.
    pub method: &'static str,
    /// Positional parameters.
    pub params: Vec<String>,
}

impl Request {
    /// Transaction-by-id lookup.
    pub const TRANSACTION_GET: &'static str = "blockchain.transaction.get";

    /// Request the transaction `txid`.
    pub fn transaction_get(txid: TxId) -> Self {
        Self { method: Self::TRANSACTION_GET, params: vec![txid.to_hex()] }
    }

    /// Txid parameter of a transaction lookup.
    pub fn txid(&self) -> Option<TxId> {
        if self.method != Self::TRANSACTION_GET {
            return None;
        }
        self.params.first().and_then(|p| TxId::from_hex(p).ok())
    }
}

/// Error reported by the remote end.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("rpc error {code}: {message}")]
pub struct RpcError {
    /// Server error code.
    pub code: i64,
    /// Server message.
    pub message: String,
}

/// Answer to one [`Request`].
#[derive(Debug, Clone)]
pub struct Response {
    /// Request being answered.
    pub request: Request,
    /// Parsed transaction or the server's error.
    pub result: Result<Arc<Transaction>, RpcError>,
}

/// Invoked once per response, possibly from another thread and possibly
/// before `send` returns.
pub type ResponseCallback = Arc<dyn Fn(Response) + Send + Sync>;

/// Asynchronous request/response primitive supplied by the embedder.
pub trait Network: Send + Sync {
    /// Send `requests`; `callback` receives each response.
    fn send(&self, requests: Vec<Request>, callback: ResponseCallback);
}

/// Failures collected by [`fetch_blocking`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// Server answered with an error.
    #[error("tx request error for {txid}: {error}")]
    Rpc {
        /// Requested transaction.
        txid: TxId,
        /// Server error.
        error: RpcError,
    },
    /// A transaction nobody asked for arrived.
    #[error("received un-requested txid {0}")]
    Unrequested(TxId),
    /// No response within the per-response timeout.
    #[error("timed out with {pending} responses outstanding")]
    Timeout {
        /// Responses never received.
        pending: usize,
    },
    /// The caller stopped waiting.
    #[error("cancelled with {pending} responses outstanding")]
    Cancelled {
        /// Responses never received.
        pending: usize,
    },
}

/// Outcome of a bounded batch fetch.
#[derive(Default)]
pub struct FetchReport {
    /// Transactions received for requested txids.
    pub received: Vec<Arc<Transaction>>,
    /// Everything that went wrong.
    pub errors: Vec<FetchError>,
}

impl fmt::Debug for FetchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchReport")
            .field("received", &self.received.len())
            .field("errors", &self.errors)
            .finish()
    }
}

impl FetchReport {
    /// True if the wait ran out.
    pub fn timed_out(&self) -> bool {
        self.errors.iter().any(|e| matches!(e, FetchError::Timeout { .. }))
    }
}

/// Request `txids` at once and block until every response arrived or no
/// response came within `timeout`. A timeout is reported, never fatal;
/// late responses are dropped.
pub fn fetch_blocking(network: &dyn Network, txids: &[TxId], timeout: Duration) -> FetchReport {
    fetch_until(network, txids, timeout, &|| false)
}

/// [`fetch_blocking`] that gives up as soon as `cancelled` returns true.
/// The predicate is polled every [`CANCEL_POLL`] while waiting.
pub fn fetch_until(
    network: &dyn Network,
    txids: &[TxId],
    timeout: Duration,
    cancelled: &dyn Fn() -> bool,
) -> FetchReport {
    let mut report = FetchReport::default();
    if txids.is_empty() {
        return report;
    }
    let (sender, receiver) = mpsc::channel::<Response>();
    let sender = Mutex::new(sender);
    let callback: ResponseCallback = Arc::new(move |resp| {
        // The receiver is gone once the wait gave up.
        let _ = sender.lock().send(resp);
    });

    let requests = txids.iter().map(|&t| Request::transaction_get(t)).collect();
    network.send(requests, callback);

    let mut outstanding: BTreeSet<TxId> = txids.iter().copied().collect();
    'responses: for received in 0..txids.len() {
        let pending = txids.len() - received;
        let deadline = Instant::now() + timeout;
        let resp = loop {
            let left = deadline.saturating_duration_since(Instant::now());
            match receiver.recv_timeout(left.min(CANCEL_POLL)) {
                Ok(resp) => break resp,
                Err(RecvTimeoutError::Timeout) if cancelled() => {
                    report.errors.push(FetchError::Cancelled { pending });
                    break 'responses;
                }
                Err(RecvTimeoutError::Timeout) if Instant::now() < deadline => {}
                Err(_) => {
                    report.errors.push(FetchError::Timeout { pending });
                    break 'responses;
                }
            }
        };
        let requested = resp.request.txid();
        match resp.result {
            Err(error) => {
                let txid = requested.unwrap_or(TxId::new([0; 32]));
                tracing::warn!(txid = %txid.short(10), %error, "tx request error");
                report.errors.push(FetchError::Rpc { txid, error });
            }
            Ok(tx) => {
                if outstanding.remove(&tx.txid()) {
                    report.received.push(tx);
                } else {
                    tracing::warn!(txid = %tx.txid(), "received un-requested txid, ignoring");
                    report.errors.push(FetchError::Unrequested(tx.txid()));
                }
            }
        }
    }
    report
}
