//! Minimal ABI codec for the Greeter method surface.

use shared::{
    domain::Address,
    protocol::{ContractCall, ContractInterface, ContractTransaction},
};
use thiserror::Error;

const WORD: usize = 32;
/// Selector of the standard `Error(string)` revert payload.
const ERROR_STRING_SELECTOR: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AbiError {
    #[error("invalid hex payload: {0}")]
    InvalidHex(String),
    #[error("return data too short: expected at least {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
    #[error("string return data is not valid utf-8")]
    InvalidUtf8,
    #[error("quantity {0} does not fit in 128 bits")]
    QuantityOverflow(String),
    #[error("deploy requires contract bytecode")]
    MissingBytecode,
}

pub fn encode_call(interface: &ContractInterface, call: ContractCall) -> Vec<u8> {
    match call {
        ContractCall::Greet => interface.greet_selector.to_vec(),
        ContractCall::Owner => interface.owner_selector.to_vec(),
    }
}

/// Calldata for a transaction; deploys append the constructor argument to `bytecode`.
pub fn encode_transaction(
    interface: &ContractInterface,
    tx: &ContractTransaction,
    bytecode: Option<&[u8]>,
) -> Result<Vec<u8>, AbiError> {
    match tx {
        ContractTransaction::Deploy { initial_greeting } => {
            let bytecode = bytecode.ok_or(AbiError::MissingBytecode)?;
            let mut data = bytecode.to_vec();
            data.extend(encode_string_argument(initial_greeting));
            Ok(data)
        }
        ContractTransaction::SetGreeting { text, .. } => {
            let mut data = interface.set_greeting_selector.to_vec();
            data.extend(encode_string_argument(text));
            Ok(data)
        }
        ContractTransaction::Withdraw { amount_wei, .. } => {
            let mut data = interface.withdraw_selector.to_vec();
            data.extend(encode_uint(*amount_wei));
            Ok(data)
        }
    }
}

pub fn encode_uint(value: u128) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    word[WORD - 16..].copy_from_slice(&value.to_be_bytes());
    word
}

/// Head/tail encoding of a single dynamic `string` argument.
pub fn encode_string_argument(value: &str) -> Vec<u8> {
    let bytes = value.as_bytes();
    let padded_len = bytes.len().div_ceil(WORD) * WORD;
    let mut out = Vec::with_capacity(2 * WORD + padded_len);
    out.extend(encode_uint(WORD as u128));
    out.extend(encode_uint(bytes.len() as u128));
    out.extend(bytes);
    out.resize(2 * WORD + padded_len, 0);
    out
}

pub fn decode_string(data: &[u8]) -> Result<String, AbiError> {
    let offset = read_usize(data, 0)?;
    let len = read_usize(data, offset)?;
    let start = offset + WORD;
    let end = start + len;
    let bytes = data.get(start..end).ok_or(AbiError::Truncated {
        expected: end,
        actual: data.len(),
    })?;
    String::from_utf8(bytes.to_vec()).map_err(|_| AbiError::InvalidUtf8)
}

pub fn decode_address(data: &[u8]) -> Result<Address, AbiError> {
    let word = data.get(..WORD).ok_or(AbiError::Truncated {
        expected: WORD,
        actual: data.len(),
    })?;
    Ok(Address(format!("0x{}", hex::encode(&word[12..]))))
}

/// Extracts the reason from an `Error(string)` revert payload.
pub fn decode_revert_reason(data: &[u8]) -> Option<String> {
    let payload = data.strip_prefix(&ERROR_STRING_SELECTOR)?;
    decode_string(payload).ok()
}

pub fn decode_hex(value: &str) -> Result<Vec<u8>, AbiError> {
    let trimmed = value.trim();
    let digits = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    hex::decode(digits).map_err(|_| AbiError::InvalidHex(value.to_string()))
}

pub fn encode_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

pub fn quantity(value: u128) -> String {
    format!("0x{value:x}")
}

/// Converts a JSON-RPC hex quantity into a decimal string.
pub fn quantity_to_decimal(value: &str) -> Result<String, AbiError> {
    let digits = value.trim().trim_start_matches("0x");
    if digits.is_empty() {
        return Ok("0".to_string());
    }
    if digits.len() > 32 && digits.trim_start_matches('0').len() > 32 {
        return Err(AbiError::QuantityOverflow(value.to_string()));
    }
    u128::from_str_radix(digits, 16)
        .map(|parsed| parsed.to_string())
        .map_err(|_| AbiError::InvalidHex(value.to_string()))
}

fn read_usize(data: &[u8], at: usize) -> Result<usize, AbiError> {
    let end = at + WORD;
    let word = data.get(at..end).ok_or(AbiError::Truncated {
        expected: end,
        actual: data.len(),
    })?;
    if word[..WORD - 8].iter().any(|b| *b != 0) {
        return Err(AbiError::QuantityOverflow(hex::encode(word)));
    }
    let mut tail = [0u8; 8];
    tail.copy_from_slice(&word[WORD - 8..]);
    usize::try_from(u64::from_be_bytes(tail))
        .map_err(|_| AbiError::QuantityOverflow(hex::encode(word)))
}
