//! Core types shared by the validation engine and the precondition checker.

pub mod id;
pub mod transaction;
pub mod validity;

pub use id::{IdParseError, OutPoint, TokenId, TxId};
pub use transaction::{Address, AddressKind, OutputKind, Transaction, TxInput, TxOutput};
pub use validity::{TokenType, Validity};
