//! Minimal Solidity ABI codec for the registry contract.
//!
//! Only the shapes the contract uses are supported: calls whose arguments are
//! all `string`, and the `(string, string, string, bool)` tuple returned by
//! `verifyProduct`.

use super::traits::AbiError;
use sha3::{Digest, Keccak256};

const WORD: usize = 32;

pub const VERIFY_PRODUCT: &str = "verifyProduct(string)";
pub const REGISTER_PRODUCT: &str = "registerProduct(string,string,string,string)";

/// Selector of the standard `Error(string)` revert payload.
const ERROR_SELECTOR: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];

/// First four bytes of the keccak-256 hash of a function signature.
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = Keccak256::digest(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// Encodes `signature` applied to string arguments.
pub fn encode_call(signature: &str, args: &[&str]) -> Vec<u8> {
    let mut out = selector(signature).to_vec();
    out.extend(encode_strings(args));
    out
}

fn encode_strings(args: &[&str]) -> Vec<u8> {
    let head_len = WORD * args.len();
    let mut head = Vec::with_capacity(head_len);
    let mut tail = Vec::new();

    for arg in args {
        head.extend_from_slice(&usize_word(head_len + tail.len()));
        tail.extend_from_slice(&usize_word(arg.len()));
        tail.extend_from_slice(arg.as_bytes());
        let padding = (WORD - arg.len() % WORD) % WORD;
        tail.resize(tail.len() + padding, 0);
    }

    head.extend(tail);
    head
}

fn usize_word(value: usize) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    word[WORD - 8..].copy_from_slice(&(value as u64).to_be_bytes());
    word
}

fn read_word(data: &[u8], offset: usize) -> Result<&[u8], AbiError> {
    let end = offset.checked_add(WORD).ok_or(AbiError::OutOfRange(offset))?;
    data.get(offset..end).ok_or(AbiError::Truncated(offset))
}

fn read_usize(data: &[u8], offset: usize) -> Result<usize, AbiError> {
    let word = read_word(data, offset)?;
    if word[..WORD - 8].iter().any(|b| *b != 0) {
        return Err(AbiError::OutOfRange(offset));
    }
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&word[WORD - 8..]);
    usize::try_from(u64::from_be_bytes(bytes)).map_err(|_| AbiError::OutOfRange(offset))
}

fn read_string(data: &[u8], head_offset: usize) -> Result<String, AbiError> {
    let start = read_usize(data, head_offset)?;
    let len = read_usize(data, start)?;
    // Offsets come from the node; never trust them to fit
    let body_start = start.checked_add(WORD).ok_or(AbiError::OutOfRange(head_offset))?;
    let body_end = body_start
        .checked_add(len)
        .ok_or(AbiError::OutOfRange(body_start))?;
    let body = data
        .get(body_start..body_end)
        .ok_or(AbiError::Truncated(body_start))?;
    String::from_utf8(body.to_vec()).map_err(|_| AbiError::InvalidUtf8(body_start))
}

fn read_bool(data: &[u8], offset: usize) -> Result<bool, AbiError> {
    Ok(read_usize(data, offset)? != 0)
}

/// Return value of `verifyProduct`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductTuple {
    pub product_name: String,
    pub manufacturer: String,
    pub batch_number: String,
    pub is_authentic: bool,
}

pub fn decode_product_tuple(data: &[u8]) -> Result<ProductTuple, AbiError> {
    Ok(ProductTuple {
        product_name: read_string(data, 0)?,
        manufacturer: read_string(data, WORD)?,
        batch_number: read_string(data, 2 * WORD)?,
        is_authentic: read_bool(data, 3 * WORD)?,
    })
}

/// Extracts the message from `Error(string)` revert data.
pub fn decode_revert_reason(data: &[u8]) -> Option<String> {
    if data.len() < 4 || data[..4] != ERROR_SELECTOR {
        return None;
    }
    read_string(&data[4..], 0).ok()
}

pub fn to_hex(data: &[u8]) -> String {
    format!("0x{}", hex::encode(data))
}

pub fn from_hex(value: &str) -> Result<Vec<u8>, AbiError> {
    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value);
    hex::decode(digits).map_err(|e| AbiError::InvalidHex(e.to_string()))
}

#[cfg(test)]
pub(crate) fn encode_product_tuple(tuple: &ProductTuple) -> Vec<u8> {
    // Three dynamic heads followed by the static bool, then the string tails
    let strings = [
        tuple.product_name.as_str(),
        tuple.manufacturer.as_str(),
        tuple.batch_number.as_str(),
    ];
    let head_len = WORD * 4;
    let mut head = Vec::new();
    let mut tail = Vec::new();
    for s in strings {
        head.extend_from_slice(&usize_word(head_len + tail.len()));
        tail.extend_from_slice(&usize_word(s.len()));
        tail.extend_from_slice(s.as_bytes());
        let padding = (WORD - s.len() % WORD) % WORD;
        tail.resize(tail.len() + padding, 0);
    }
    head.extend_from_slice(&usize_word(tuple.is_authentic as usize));
    head.extend(tail);
    head
}
