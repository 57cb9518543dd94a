//! Decodes solc's compressed source-map format: `s:l:f:j;s:l:f:j;...` where an
//! empty field inherits the same field from the previous entry.
//!
//! Implemented as an explicit fold over an initial all-undefined entry rather
//! than a mutable sliding-previous variable, per the "dynamic field
//! inheritance" design note: each step is a pure function of (previous, raw
//! segment) -> next.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SourceMapError {
    #[error("source-map segment has more than four fields: {0}")]
    TooManyFields(String),
    #[error("non-integer field in source-map segment: {0}")]
    NotAnInteger(String),
    #[error("jump field is not a single character: {0}")]
    InvalidJumpTag(String),
}

/// A single decoded source-map entry, one per instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SourceMapEntry {
    /// Byte offset into the source file.
    pub s: i64,
    /// Length in bytes.
    pub l: i64,
    /// Source id; -1 denotes a compiler-generated instruction with no source.
    pub f: i64,
    /// Opaque jump tag ('i', 'o', or '-').
    pub j: char,
}

impl Default for SourceMapEntry {
    /// The conventional zero entry a solc source map folds from: unset `f`
    /// reads as "no source" until the first segment supplies one.
    fn default() -> Self {
        SourceMapEntry { s: 0, l: 0, f: -1, j: '-' }
    }
}

/// Decodes a raw compressed source map into one entry per instruction.
pub fn decode_source_map(raw: &str) -> Result<Vec<SourceMapEntry>, SourceMapError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(Vec::new());
    }
    let mut entries = Vec::new();
    let mut previous = SourceMapEntry::default();
    for segment in raw.split(';') {
        let entry = decode_segment(segment, &previous)?;
        entries.push(entry);
        previous = entry;
    }
    Ok(entries)
}

fn decode_segment(segment: &str, previous: &SourceMapEntry) -> Result<SourceMapEntry, SourceMapError> {
    let fields: Vec<&str> = segment.split(':').collect();
    if fields.len() > 4 {
        return Err(SourceMapError::TooManyFields(segment.to_string()));
    }
    let s = inherit_int(fields.first().copied(), previous.s)?;
    let l = inherit_int(fields.get(1).copied(), previous.l)?;
    let f = inherit_int(fields.get(2).copied(), previous.f)?;
    let j = inherit_jump(fields.get(3).copied(), previous.j)?;
    Ok(SourceMapEntry { s, l, f, j })
}

fn inherit_int(field: Option<&str>, previous: i64) -> Result<i64, SourceMapError> {
    match field {
        None | Some("") => Ok(previous),
        Some(text) => text.parse::<i64>().map_err(|_| SourceMapError::NotAnInteger(text.to_string())),
    }
}

fn inherit_jump(field: Option<&str>, previous: char) -> Result<char, SourceMapError> {
    match field {
        None | Some("") => Ok(previous),
        Some(text) if text.chars().count() == 1 => Ok(text.chars().next().unwrap()),
        Some(text) => Err(SourceMapError::InvalidJumpTag(text.to_string())),
    }
}
