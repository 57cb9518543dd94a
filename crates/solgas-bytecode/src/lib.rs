//! Walks deployed or constructor bytecode to build a PC -> instruction index
//! table, skipping PUSHn immediates so they are never mistaken for opcodes.

use std::collections::HashMap;

use thiserror::Error;

const PUSH1: u8 = 0x60;
const PUSH32: u8 = 0x7f;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BytecodeError {
    #[error("bytecode hex string has odd length")]
    OddLength,
    #[error("bytecode contains non-hex characters: {0}")]
    InvalidHex(String),
    #[error("PUSH at pc {pc} reads past the end of the bytecode")]
    BytecodeTruncated { pc: usize },
}

/// PC (byte offset) -> sequential instruction index. Only contains entries for
/// opcode start PCs; a PC landing inside a PUSH's immediates has no entry.
pub type PcToIdx = HashMap<u64, u64>;

/// Decodes `code_hex` (no `0x` prefix, even length) and returns the PC -> index
/// map plus the ordered list of opcode bytes (for callers that want the raw
/// opcode stream alongside the map, e.g. for testing).
pub fn map_pc_to_instruction_index(code_hex: &str) -> Result<PcToIdx, BytecodeError> {
    let bytes = decode_hex(code_hex)?;
    let mut map = PcToIdx::new();
    let mut pc: usize = 0;
    let mut idx: u64 = 0;
    while pc < bytes.len() {
        map.insert(pc as u64, idx);
        let opcode = bytes[pc];
        let step = if (PUSH1..=PUSH32).contains(&opcode) {
            1 + (opcode - PUSH1 + 1) as usize
        } else {
            1
        };
        if pc + step > bytes.len() && step > 1 {
            return Err(BytecodeError::BytecodeTruncated { pc });
        }
        pc += step;
        idx += 1;
    }
    Ok(map)
}

fn decode_hex(code_hex: &str) -> Result<Vec<u8>, BytecodeError> {
    if code_hex.len() % 2 != 0 {
        return Err(BytecodeError::OddLength);
    }
    hex::decode(code_hex).map_err(|_| BytecodeError::InvalidHex(code_hex.to_string()))
}
