//! Parsed base-layer transactions.
//!
//! Raw (de)serialization belongs to the wallet; the engine only needs the
//! txid, the spent outpoints and the shape of each output.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::id::{OutPoint, TxId};

/// Kind of a standard address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AddressKind {
    /// Pay to public key hash.
    P2pkh,
    /// Pay to script hash.
    P2sh,
}

/// A standard single-signature or script-hash address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address {
    /// Address kind.
    pub kind: AddressKind,
    /// 20-byte hash160.
    pub hash: [u8; 20],
}

impl Address {
    /// P2PKH address for a hash.
    pub fn p2pkh(hash: [u8; 20]) -> Self {
        Self { kind: AddressKind::P2pkh, hash }
    }

    /// P2SH address for a hash.
    pub fn p2sh(hash: [u8; 20]) -> Self {
        Self { kind: AddressKind::P2sh, hash }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = match self.kind {
            AddressKind::P2pkh => "p2pkh",
            AddressKind::P2sh => "p2sh",
        };
        write!(f, "{}:{}", prefix, hex::encode(self.hash))
    }
}

/// What an output pays to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputKind {
    /// Provably unspendable data carrier; holds the full script bytes.
    OpReturn(Vec<u8>),
    /// Standard address output.
    Address(Address),
    /// Any other script.
    Other(Vec<u8>),
}

/// One transaction output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    /// Value in satoshis.
    pub value: u64,
    /// Destination.
    pub kind: OutputKind,
}

impl TxOutput {
    /// OP_RETURN output with zero value.
    pub fn op_return(script: Vec<u8>) -> Self {
        Self { value: 0, kind: OutputKind::OpReturn(script) }
    }

    /// Address output.
    pub fn to_address(address: Address, value: u64) -> Self {
        Self { value, kind: OutputKind::Address(address) }
    }

    /// True for P2PKH or P2SH outputs.
    pub fn is_standard_address(&self) -> bool {
        matches!(self.kind, OutputKind::Address(_))
    }
}

/// One transaction input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    /// The output being spent.
    pub prevout: OutPoint,
    /// Address of the spent coin, when the wallet knows it.
    pub address: Option<Address>,
}

impl TxInput {
    /// Input spending `prevout` with no address information.
    pub fn new(prevout: OutPoint) -> Self {
        Self { prevout, address: None }
    }

    /// Input spending `prevout` from `address`.
    pub fn from_address(prevout: OutPoint, address: Address) -> Self {
        Self { prevout, address: Some(address) }
    }
}

/// A transaction as handed over by the wallet's deserializer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    txid: TxId,
    inputs: Vec<TxInput>,
    outputs: Vec<TxOutput>,
}

impl Transaction {
    /// Assemble a transaction. The txid is trusted as given.
    pub fn new(txid: TxId, inputs: Vec<TxInput>, outputs: Vec<TxOutput>) -> Self {
        Self { txid, inputs, outputs }
    }

    /// Transaction id.
    pub fn txid(&self) -> TxId {
        self.txid
    }

    /// Inputs in order.
    pub fn inputs(&self) -> &[TxInput] {
        &self.inputs
    }

    /// Outputs in order.
    pub fn outputs(&self) -> &[TxOutput] {
        &self.outputs
    }

    /// Script of output 0 if it is an OP_RETURN, where token metadata lives.
    pub fn metadata_script(&self) -> Option<&[u8]> {
        match self.outputs.first().map(|o| &o.kind) {
            Some(OutputKind::OpReturn(script)) => Some(script),
            _ => None,
        }
    }
}
