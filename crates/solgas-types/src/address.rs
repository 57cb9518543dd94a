//! Hex and address normalization.
//!
//! An EVM address is rendered canonically as 40 lowercase hex characters, no
//! `0x` prefix, zero padded. Every cache key in the profiler (contract registry,
//! call targets) goes through [`normalize_address`] so that "0xABC...", "abc...",
//! and a zero-padded 32 byte stack word all collide on the same entry.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HexError {
    #[error("odd-length hex string: {0}")]
    OddLength(String),
    #[error("non-hex character in {0}")]
    NotHex(String),
}

/// Strips an optional `0x`/`0X` prefix, lowercases, and validates that every
/// remaining character is a hex digit.
pub fn strip_and_validate_hex(input: &str) -> Result<String, HexError> {
    let trimmed = input.trim();
    let body = trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")).unwrap_or(trimmed);
    if !body.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(HexError::NotHex(input.to_string()));
    }
    Ok(body.to_ascii_lowercase())
}

/// Normalizes any hex representation of an address (with/without `0x`, any
/// case, any leading zero padding up to 32 bytes) to 40 lowercase hex chars.
///
/// Idempotent: `normalize_address(normalize_address(x)?)? == normalize_address(x)?`.
pub fn normalize_address(input: &str) -> Result<String, HexError> {
    let lower = strip_and_validate_hex(input)?;
    let padded = format!("{lower:0>64}");
    Ok(padded[padded.len() - 40..].to_string())
}

/// Reduces a (possibly shorter) big-endian hex stack word to the low 20 bytes,
/// rendered as a canonical address per [`normalize_address`].
pub fn stack_word_to_address(word: &str) -> Result<String, HexError> {
    normalize_address(word)
}
