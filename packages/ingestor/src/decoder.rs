//! Call Data Decoder
//!
//! Decodes router call data into a method name and an ordered argument map.
//! The arguments follow the standard contract ABI tuple layout: a head of
//! 32-byte slots (static values in place, dynamic values as offsets) followed
//! by a tail holding length-prefixed dynamic values.

use alloy::dyn_abi::{DynSolType, DynSolValue};
use alloy::primitives::{Address, Function, B256, I256, U256};
use thiserror::Error;

use crate::abi::{AbiRegistry, MethodSelector, MethodSpec};

/// Size of one ABI word
pub const WORD: usize = 32;

/// Errors that can occur during call data decoding
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Call data too short for a selector ({0} bytes)")]
    TooShort(usize),

    #[error("Unknown selector 0x{}", hex::encode(.0))]
    UnknownSelector(MethodSelector),

    #[error("Malformed call data: {0}")]
    Malformed(String),
}

impl DecodeError {
    /// Short name of the error kind, as written to the sink
    pub fn kind(&self) -> &'static str {
        match self {
            DecodeError::TooShort(_) => "TooShort",
            DecodeError::UnknownSelector(_) => "UnknownSelector",
            DecodeError::Malformed(_) => "Malformed",
        }
    }
}

fn malformed(reason: impl Into<String>) -> DecodeError {
    DecodeError::Malformed(reason.into())
}

/// A decoded method call
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedCall {
    /// Method name (e.g., "swapExactTokensForTokens")
    pub method: String,
    /// Selector the method was matched on
    pub selector: MethodSelector,
    /// (parameter name, value) pairs in declaration order
    pub args: Vec<(String, DynSolValue)>,
}

impl DecodedCall {
    /// Get the selector as a hex string with 0x prefix
    pub fn selector_hex(&self) -> String {
        format!("0x{}", hex::encode(self.selector))
    }

    /// Look up an argument by parameter name
    pub fn arg(&self, name: &str) -> Option<&DynSolValue> {
        self.args.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }
}

/// Decode call data against a registry
///
/// # Arguments
/// * `registry` - Selector lookup table for the router's interface
/// * `call_data` - The full transaction input (selector + arguments)
///
/// # Returns
/// The decoded call, or why it could not be decoded
pub fn decode_call(registry: &AbiRegistry, call_data: &[u8]) -> Result<DecodedCall, DecodeError> {
    let selector = extract_selector(call_data).ok_or(DecodeError::TooShort(call_data.len()))?;
    let spec = registry
        .lookup(&selector)
        .ok_or(DecodeError::UnknownSelector(selector))?;
    decode_with_spec(spec, &call_data[4..])
}

/// Decode the argument bytes (selector already stripped) for a known method
pub fn decode_with_spec(spec: &MethodSpec, args: &[u8]) -> Result<DecodedCall, DecodeError> {
    let mut budget = args.len();
    let values = decode_sequence(spec.param_types(), args, &mut budget)?;
    Ok(DecodedCall {
        method: spec.name.clone(),
        selector: spec.selector,
        args: spec
            .params
            .iter()
            .map(|p| p.name.clone())
            .zip(values)
            .collect(),
    })
}

/// Extract the method selector from call data
///
/// # Returns
/// `Some([u8; 4])` if the input has at least 4 bytes, `None` otherwise
pub fn extract_selector(call_data: &[u8]) -> Option<MethodSelector> {
    call_data.get(..4)?.try_into().ok()
}

/// Whether a type is encoded through an offset into the tail
fn is_dynamic(ty: &DynSolType) -> bool {
    match ty {
        DynSolType::Bytes | DynSolType::String | DynSolType::Array(_) => true,
        DynSolType::FixedArray(inner, _) => is_dynamic(inner),
        DynSolType::Tuple(types) => types.iter().any(is_dynamic),
        _ => false,
    }
}

/// Bytes a type occupies in the head of its enclosing tuple
fn head_size(ty: &DynSolType) -> usize {
    if is_dynamic(ty) {
        return WORD;
    }
    match ty {
        DynSolType::FixedArray(inner, len) => head_size(inner).saturating_mul(*len),
        DynSolType::Tuple(types) => types.iter().map(head_size).fold(0, usize::saturating_add),
        _ => WORD,
    }
}

/// Read the 32-byte word at `at`
fn word(data: &[u8], at: usize) -> Result<&[u8; WORD], DecodeError> {
    at.checked_add(WORD)
        .and_then(|end| data.get(at..end))
        .and_then(|w| w.try_into().ok())
        .ok_or_else(|| malformed(format!("need 32 bytes at {at}, buffer has {}", data.len())))
}

/// Read a word as an offset or length
fn read_usize(data: &[u8], at: usize) -> Result<usize, DecodeError> {
    let w = word(data, at)?;
    if w[..24].iter().any(|b| *b != 0) {
        return Err(malformed(format!("offset or length at {at} does not fit in 64 bits")));
    }
    let mut low = [0u8; 8];
    low.copy_from_slice(&w[24..]);
    usize::try_from(u64::from_be_bytes(low))
        .map_err(|_| malformed(format!("offset or length at {at} exceeds usize")))
}

/// Deduct `bytes` from the decode budget
///
/// The budget starts at the argument length. Every scalar, length word and
/// byte payload is charged, so offsets that alias one tail cannot produce
/// more decoded data than the call data carries.
fn charge(budget: &mut usize, bytes: usize) -> Result<(), DecodeError> {
    *budget = budget
        .checked_sub(bytes)
        .ok_or_else(|| malformed("decoded size exceeds call data, offsets overlap"))?;
    Ok(())
}

/// Decode a tuple-shaped region: one head slot per type, dynamic values via offsets
///
/// Offsets are relative to the start of `data`.
fn decode_sequence<'t>(
    types: impl IntoIterator<Item = &'t DynSolType>,
    data: &[u8],
    budget: &mut usize,
) -> Result<Vec<DynSolValue>, DecodeError> {
    let mut head = 0usize;
    let mut values = Vec::new();
    for ty in types {
        let value = if is_dynamic(ty) {
            let offset = read_usize(data, head)?;
            if offset > data.len() {
                return Err(malformed(format!(
                    "offset {offset} points outside buffer of {} bytes",
                    data.len()
                )));
            }
            decode_value(ty, &data[offset..], budget)?
        } else {
            let region = data
                .get(head..)
                .ok_or_else(|| malformed(format!("head slot {head} beyond {} bytes", data.len())))?;
            decode_value(ty, region, budget)?
        };
        values.push(value);
        head = head
            .checked_add(head_size(ty))
            .ok_or_else(|| malformed("head size overflow"))?;
    }
    Ok(values)
}

/// Decode a single value whose encoding starts at `data[0]`
fn decode_value(ty: &DynSolType, data: &[u8], budget: &mut usize) -> Result<DynSolValue, DecodeError> {
    // composites are charged through their elements
    if !matches!(ty, DynSolType::Tuple(_) | DynSolType::FixedArray(..)) {
        charge(budget, WORD)?;
    }
    match ty {
        DynSolType::Bool => {
            let w = word(data, 0)?;
            if w[..31].iter().any(|b| *b != 0) || w[31] > 1 {
                return Err(malformed("bool is neither 0 nor 1"));
            }
            Ok(DynSolValue::Bool(w[31] == 1))
        }
        DynSolType::Uint(bits) => {
            let w = word(data, 0)?;
            let pad = WORD - bits / 8;
            if w[..pad].iter().any(|b| *b != 0) {
                return Err(malformed(format!("value does not fit uint{bits}")));
            }
            Ok(DynSolValue::Uint(U256::from_be_slice(w), *bits))
        }
        DynSolType::Int(bits) => {
            let w = word(data, 0)?;
            let pad = WORD - bits / 8;
            let fill = if w[pad] & 0x80 != 0 { 0xff } else { 0x00 };
            if w[..pad].iter().any(|b| *b != fill) {
                return Err(malformed(format!("value is not sign-extended int{bits}")));
            }
            Ok(DynSolValue::Int(I256::from_raw(U256::from_be_slice(w)), *bits))
        }
        DynSolType::Address => {
            let w = word(data, 0)?;
            if w[..12].iter().any(|b| *b != 0) {
                return Err(malformed("address has non-zero padding"));
            }
            Ok(DynSolValue::Address(Address::from_slice(&w[12..])))
        }
        DynSolType::FixedBytes(size) => {
            let w = word(data, 0)?;
            let mut out = B256::ZERO;
            out[..*size].copy_from_slice(&w[..*size]);
            Ok(DynSolValue::FixedBytes(out, *size))
        }
        DynSolType::Function => {
            let w = word(data, 0)?;
            Ok(DynSolValue::Function(Function::from_slice(&w[..24])))
        }
        DynSolType::Bytes => {
            let raw = read_length_prefixed(data)?;
            charge(budget, raw.len())?;
            Ok(DynSolValue::Bytes(raw.to_vec()))
        }
        DynSolType::String => {
            let raw = read_length_prefixed(data)?;
            charge(budget, raw.len())?;
            String::from_utf8(raw.to_vec())
                .map(DynSolValue::String)
                .map_err(|_| malformed("string is not valid UTF-8"))
        }
        DynSolType::Array(inner) => {
            let len = read_usize(data, 0)?;
            let body = &data[WORD..];
            let needed = len
                .checked_mul(head_size(inner).max(1))
                .ok_or_else(|| malformed(format!("array length {len} overflows")))?;
            if needed > body.len() {
                return Err(malformed(format!(
                    "array length {len} exceeds remaining {} bytes",
                    body.len()
                )));
            }
            decode_sequence(std::iter::repeat(inner.as_ref()).take(len), body, budget).map(DynSolValue::Array)
        }
        DynSolType::FixedArray(inner, len) => {
            decode_sequence(std::iter::repeat(inner.as_ref()).take(*len), data, budget)
                .map(DynSolValue::FixedArray)
        }
        DynSolType::Tuple(types) => decode_sequence(types, data, budget).map(DynSolValue::Tuple),
        #[allow(unreachable_patterns)]
        other => Err(malformed(format!("unsupported parameter type {other}"))),
    }
}

/// Read a length word followed by that many bytes
fn read_length_prefixed(data: &[u8]) -> Result<&[u8], DecodeError> {
    let len = read_usize(data, 0)?;
    WORD.checked_add(len)
        .and_then(|end| data.get(WORD..end))
        .ok_or_else(|| {
            malformed(format!(
                "byte length {len} exceeds remaining {} bytes",
                data.len().saturating_sub(WORD)
            ))
        })
}

/// Parse a hex string to bytes (with or without 0x prefix)
pub fn hex_to_bytes(hex_str: &str) -> Result<Vec<u8>, hex::FromHexError> {
    let hex_str = hex_str.strip_prefix("0x").unwrap_or(hex_str);
    hex::decode(hex_str)
}
