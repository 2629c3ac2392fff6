//! Token metadata codec.
//!
//! Token transactions carry their metadata in an OP_RETURN script at output 0:
//!
//! ```text
//! OP_RETURN <"SLP\0"> <token_type> <kind> <fields...>
//! ```
//!
//! Every chunk after OP_RETURN must be a data push (direct push or
//! PUSHDATA1/2/4). Quantities are 8-byte big-endian integers, and the
//! quantity list of a SEND maps onto outputs 1.. because output 0 is the
//! metadata carrier itself.
//!
//! Parsing distinguishes an *unsupported* token type from *invalid* metadata:
//! the former is retried if support is added later, the latter is final.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{TokenId, TokenType, Transaction, TxId};

/// Lokad prefix identifying token metadata.
pub const LOKAD_ID: &[u8] = b"SLP\0";

/// Maximum number of declared SEND outputs.
pub const MAX_SEND_OUTPUTS: usize = 19;

const OP_RETURN: u8 = 0x6a;
const OP_PUSHDATA1: u8 = 0x4c;
const OP_PUSHDATA2: u8 = 0x4d;
const OP_PUSHDATA4: u8 = 0x4e;

/// Metadata parse failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// Well-formed prefix but a token type this crate does not know.
    #[error("unsupported token type {0:#04x}")]
    UnsupportedTokenType(u16),
    /// Not token metadata, or structurally invalid.
    #[error("invalid token message: {0}")]
    Invalid(&'static str),
}

impl ParseError {
    /// True for unsupported-version failures.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::UnsupportedTokenType(_))
    }
}

/// Consensus transaction kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxKind {
    /// Creates a token family.
    Genesis,
    /// Issues more units using a baton.
    Mint,
    /// Moves units.
    Send,
    /// Commitment; carries no value as far as validation is concerned.
    Commit,
}

impl TxKind {
    /// Wire keyword.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Genesis => "GENESIS",
            Self::Mint => "MINT",
            Self::Send => "SEND",
            Self::Commit => "COMMIT",
        }
    }
}

impl fmt::Display for TxKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// GENESIS fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenesisFields {
    /// Ticker bytes (may be empty).
    pub ticker: Vec<u8>,
    /// Name bytes (may be empty).
    pub name: Vec<u8>,
    /// Document URL bytes (may be empty).
    pub document_url: Vec<u8>,
    /// Optional 32-byte document hash.
    pub document_hash: Option<[u8; 32]>,
    /// Decimal places, 0..=9.
    pub decimals: u8,
    /// Output holding the minting baton, if any (always >= 2).
    pub mint_baton_vout: Option<u32>,
    /// Quantity delivered to output 1.
    pub initial_quantity: u64,
}

/// MINT fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MintFields {
    /// Token being minted.
    pub token_id: TokenId,
    /// Output receiving the new baton, if any (always >= 2).
    pub mint_baton_vout: Option<u32>,
    /// Quantity delivered to output 1.
    pub additional_quantity: u64,
}

/// SEND fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendFields {
    /// Token being moved.
    pub token_id: TokenId,
    /// `amounts[i]` is delivered to output `i + 1`.
    pub amounts: Vec<u64>,
}

/// COMMIT fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitFields {
    /// Token committed to.
    pub token_id: TokenId,
    /// Remaining chunks, uninterpreted.
    pub extra: Vec<Vec<u8>>,
}

/// Token value carried by one output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutputToken {
    /// Token units (possibly zero).
    Amount(u64),
    /// Minting baton.
    Baton,
}

impl OutputToken {
    /// True for a baton or a non-zero amount.
    pub fn is_value_bearing(self) -> bool {
        !matches!(self, Self::Amount(0))
    }
}

/// Kind-specific body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenBody {
    /// GENESIS.
    Genesis(GenesisFields),
    /// MINT.
    Mint(MintFields),
    /// SEND.
    Send(SendFields),
    /// COMMIT.
    Commit(CommitFields),
}

/// Parsed token metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenMessage {
    /// Declared protocol version.
    pub token_type: TokenType,
    /// Kind-specific fields.
    pub body: TokenBody,
}

impl TokenMessage {
    /// Parse metadata from an output script.
    pub fn parse(script: &[u8]) -> Result<Self, ParseError> {
        let chunks = split_pushes(script)?;
        if chunks.is_empty() {
            return Err(ParseError::Invalid("empty OP_RETURN"));
        }
        if chunks[0] != LOKAD_ID {
            return Err(ParseError::Invalid("missing lokad id"));
        }
        let type_chunk = chunks.get(1).ok_or(ParseError::Invalid("missing token type"))?;
        let type_code = match type_chunk.len() {
            1 => u16::from(type_chunk[0]),
            2 => u16::from_be_bytes([type_chunk[0], type_chunk[1]]),
            _ => return Err(ParseError::Invalid("token type must be 1 or 2 bytes")),
        };
        let token_type =
            TokenType::from_code(type_code).ok_or(ParseError::UnsupportedTokenType(type_code))?;
        let kind = chunks.get(2).ok_or(ParseError::Invalid("missing transaction type"))?;

        let body = match kind.as_slice() {
            b"GENESIS" => TokenBody::Genesis(parse_genesis(&chunks)?),
            b"MINT" => TokenBody::Mint(parse_mint(&chunks)?),
            b"SEND" => TokenBody::Send(parse_send(&chunks)?),
            b"COMMIT" => TokenBody::Commit(parse_commit(&chunks)?),
            _ => return Err(ParseError::Invalid("unknown transaction type")),
        };
        Ok(Self { token_type, body })
    }

    /// Parse the metadata carried by a transaction's first output.
    pub fn from_transaction(tx: &Transaction) -> Result<Self, ParseError> {
        let script = tx
            .metadata_script()
            .ok_or(ParseError::Invalid("output 0 is not OP_RETURN"))?;
        Self::parse(script)
    }

    /// Transaction kind.
    pub fn kind(&self) -> TxKind {
        match self.body {
            TokenBody::Genesis(_) => TxKind::Genesis,
            TokenBody::Mint(_) => TxKind::Mint,
            TokenBody::Send(_) => TxKind::Send,
            TokenBody::Commit(_) => TxKind::Commit,
        }
    }

    /// Token id governing a transaction carrying this message: its own txid
    /// for GENESIS, the declared id otherwise.
    pub fn token_id(&self, txid: TxId) -> TokenId {
        match &self.body {
            TokenBody::Genesis(_) => txid,
            TokenBody::Mint(m) => m.token_id,
            TokenBody::Send(s) => s.token_id,
            TokenBody::Commit(c) => c.token_id,
        }
    }

    /// Baton output declared by a GENESIS or MINT.
    pub fn mint_baton_vout(&self) -> Option<u32> {
        match &self.body {
            TokenBody::Genesis(g) => g.mint_baton_vout,
            TokenBody::Mint(m) => m.mint_baton_vout,
            _ => None,
        }
    }

    /// Token value this message assigns to output `vout`.
    ///
    /// Output 0 is the metadata carrier and never holds tokens. A SEND
    /// assigns `amounts[vout - 1]`; a GENESIS or MINT assigns its quantity to
    /// output 1 and the baton to its declared baton output. COMMIT assigns
    /// nothing.
    pub fn token_output(&self, vout: u32) -> Option<OutputToken> {
        if vout == 0 {
            return None;
        }
        let (quantity, baton) = match &self.body {
            TokenBody::Send(s) => {
                return s.amounts.get(vout as usize - 1).copied().map(OutputToken::Amount)
            }
            TokenBody::Genesis(g) => (g.initial_quantity, g.mint_baton_vout),
            TokenBody::Mint(m) => (m.additional_quantity, m.mint_baton_vout),
            TokenBody::Commit(_) => return None,
        };
        if vout == 1 {
            Some(OutputToken::Amount(quantity))
        } else if baton == Some(vout) {
            Some(OutputToken::Baton)
        } else {
            None
        }
    }

    /// Sum of declared SEND quantities (0 for other kinds).
    pub fn send_total(&self) -> u128 {
        match &self.body {
            TokenBody::Send(s) => s.amounts.iter().map(|&a| u128::from(a)).sum(),
            _ => 0,
        }
    }

    /// Encode as an OP_RETURN script with minimal pushes.
    pub fn to_script(&self) -> Vec<u8> {
        let mut chunks: Vec<Vec<u8>> = vec![LOKAD_ID.to_vec()];
        let code = self.token_type.code();
        if code <= 0xff {
            chunks.push(vec![code as u8]);
        } else {
            chunks.push(code.to_be_bytes().to_vec());
        }
        chunks.push(self.kind().as_str().as_bytes().to_vec());

        match &self.body {
            TokenBody::Genesis(g) => {
                chunks.push(g.ticker.clone());
                chunks.push(g.name.clone());
                chunks.push(g.document_url.clone());
                chunks.push(g.document_hash.map(|h| h.to_vec()).unwrap_or_default());
                chunks.push(vec![g.decimals]);
                chunks.push(baton_chunk(g.mint_baton_vout));
                chunks.push(g.initial_quantity.to_be_bytes().to_vec());
            }
            TokenBody::Mint(m) => {
                chunks.push(m.token_id.as_bytes().to_vec());
                chunks.push(baton_chunk(m.mint_baton_vout));
                chunks.push(m.additional_quantity.to_be_bytes().to_vec());
            }
            TokenBody::Send(s) => {
                chunks.push(s.token_id.as_bytes().to_vec());
                for amount in &s.amounts {
                    chunks.push(amount.to_be_bytes().to_vec());
                }
            }
            TokenBody::Commit(c) => {
                chunks.push(c.token_id.as_bytes().to_vec());
                chunks.extend(c.extra.iter().cloned());
            }
        }

        let mut script = vec![OP_RETURN];
        for chunk in &chunks {
            push_data(&mut script, chunk);
        }
        script
    }

    /// GENESIS message with empty ticker, name and document fields.
    pub fn genesis(
        token_type: TokenType,
        decimals: u8,
        mint_baton_vout: Option<u32>,
        initial_quantity: u64,
    ) -> Self {
        Self {
            token_type,
            body: TokenBody::Genesis(GenesisFields {
                ticker: Vec::new(),
                name: Vec::new(),
                document_url: Vec::new(),
                document_hash: None,
                decimals,
                mint_baton_vout,
                initial_quantity,
            }),
        }
    }

    /// MINT message.
    pub fn mint(
        token_type: TokenType,
        token_id: TokenId,
        mint_baton_vout: Option<u32>,
        additional_quantity: u64,
    ) -> Self {
        Self {
            token_type,
            body: TokenBody::Mint(MintFields { token_id, mint_baton_vout, additional_quantity }),
        }
    }

    /// SEND message.
    pub fn send(token_type: TokenType, token_id: TokenId, amounts: Vec<u64>) -> Self {
        Self { token_type, body: TokenBody::Send(SendFields { token_id, amounts }) }
    }
}

fn baton_chunk(vout: Option<u32>) -> Vec<u8> {
    match vout {
        Some(v) => vec![v as u8],
        None => Vec::new(),
    }
}

fn push_data(script: &mut Vec<u8>, data: &[u8]) {
    let len = data.len();
    if len == 0 {
        script.extend_from_slice(&[OP_PUSHDATA1, 0]);
    } else if len < OP_PUSHDATA1 as usize {
        script.push(len as u8);
    } else if len <= 0xff {
        script.extend_from_slice(&[OP_PUSHDATA1, len as u8]);
    } else if len <= 0xffff {
        script.push(OP_PUSHDATA2);
        script.extend_from_slice(&(len as u16).to_le_bytes());
    } else {
        script.push(OP_PUSHDATA4);
        script.extend_from_slice(&(len as u32).to_le_bytes());
    }
    script.extend_from_slice(data);
}

/// Split an OP_RETURN script into its pushed chunks.
fn split_pushes(script: &[u8]) -> Result<Vec<Vec<u8>>, ParseError> {
    if script.first() != Some(&OP_RETURN) {
        return Err(ParseError::Invalid("not an OP_RETURN script"));
    }
    let mut chunks = Vec::new();
    let mut pos = 1;
    while pos < script.len() {
        let op = script[pos];
        pos += 1;
        let len = match op {
            0x01..=0x4b => op as usize,
            OP_PUSHDATA1 => read_len(script, &mut pos, 1)?,
            OP_PUSHDATA2 => read_len(script, &mut pos, 2)?,
            OP_PUSHDATA4 => read_len(script, &mut pos, 4)?,
            _ => return Err(ParseError::Invalid("non-push opcode")),
        };
        let end = pos
            .checked_add(len)
            .filter(|&end| end <= script.len())
            .ok_or(ParseError::Invalid("push past end of script"))?;
        chunks.push(script[pos..end].to_vec());
        pos = end;
    }
    Ok(chunks)
}

fn read_len(script: &[u8], pos: &mut usize, width: usize) -> Result<usize, ParseError> {
    let bytes = script
        .get(*pos..*pos + width)
        .ok_or(ParseError::Invalid("truncated push length"))?;
    *pos += width;
    let mut buf = [0u8; 4];
    buf[..width].copy_from_slice(bytes);
    Ok(u32::from_le_bytes(buf) as usize)
}

fn parse_quantity(chunk: &[u8]) -> Result<u64, ParseError> {
    let arr: [u8; 8] = chunk
        .try_into()
        .map_err(|_| ParseError::Invalid("quantity must be 8 bytes"))?;
    Ok(u64::from_be_bytes(arr))
}

fn parse_token_id(chunk: &[u8]) -> Result<TokenId, ParseError> {
    TxId::from_slice(chunk).map_err(|_| ParseError::Invalid("token id must be 32 bytes"))
}

fn parse_baton(chunk: &[u8]) -> Result<Option<u32>, ParseError> {
    match chunk {
        [] => Ok(None),
        [v] if *v >= 2 => Ok(Some(u32::from(*v))),
        [_] => Err(ParseError::Invalid("mint baton vout must be >= 2")),
        _ => Err(ParseError::Invalid("mint baton vout must be 0 or 1 bytes")),
    }
}

fn parse_genesis(chunks: &[Vec<u8>]) -> Result<GenesisFields, ParseError> {
    if chunks.len() != 10 {
        return Err(ParseError::Invalid("GENESIS with wrong number of chunks"));
    }
    let document_hash = match chunks[6].len() {
        0 => None,
        32 => {
            let mut h = [0u8; 32];
            h.copy_from_slice(&chunks[6]);
            Some(h)
        }
        _ => return Err(ParseError::Invalid("document hash must be 0 or 32 bytes")),
    };
    let decimals = match chunks[7].as_slice() {
        [d] if *d <= 9 => *d,
        [_] => return Err(ParseError::Invalid("decimals above 9")),
        _ => return Err(ParseError::Invalid("decimals must be 1 byte")),
    };
    Ok(GenesisFields {
        ticker: chunks[3].clone(),
        name: chunks[4].clone(),
        document_url: chunks[5].clone(),
        document_hash,
        decimals,
        mint_baton_vout: parse_baton(&chunks[8])?,
        initial_quantity: parse_quantity(&chunks[9])?,
    })
}

fn parse_mint(chunks: &[Vec<u8>]) -> Result<MintFields, ParseError> {
    if chunks.len() != 6 {
        return Err(ParseError::Invalid("MINT with wrong number of chunks"));
    }
    Ok(MintFields {
        token_id: parse_token_id(&chunks[3])?,
        mint_baton_vout: parse_baton(&chunks[4])?,
        additional_quantity: parse_quantity(&chunks[5])?,
    })
}

fn parse_send(chunks: &[Vec<u8>]) -> Result<SendFields, ParseError> {
    if chunks.len() < 5 {
        return Err(ParseError::Invalid("SEND without outputs"));
    }
    if chunks.len() > 4 + MAX_SEND_OUTPUTS {
        return Err(ParseError::Invalid("SEND with more than 19 outputs"));
    }
    let amounts = chunks[4..]
        .iter()
        .map(|c| parse_quantity(c))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(SendFields { token_id: parse_token_id(&chunks[3])?, amounts })
}

fn parse_commit(chunks: &[Vec<u8>]) -> Result<CommitFields, ParseError> {
    let token_id = chunks
        .get(3)
        .ok_or(ParseError::Invalid("COMMIT without token id"))
        .and_then(|c| parse_token_id(c))?;
    Ok(CommitFields { token_id, extra: chunks[4..].to_vec() })
}
