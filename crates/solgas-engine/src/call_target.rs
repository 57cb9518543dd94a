//! From a CALL-family or CREATE-family trace entry, computes the target
//! address and whether the call is a construction.

use solgas_types::{address::stack_word_to_address, trace::StructLog};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CallTarget {
    pub address_hex: Option<String>,
    pub is_construction_call: bool,
}

/// Stack is bottom-to-top; the top of the stack is the last element.
fn stack_from_top(stack: &[String], n_from_top: usize) -> Option<&str> {
    let idx = stack.len().checked_sub(1 + n_from_top)?;
    stack.get(idx).map(String::as_str)
}

/// Computes the call/create target for `logs[i]`. For `CREATE`/`CREATE2` the
/// target address is unknown until execution re-emerges at the caller's
/// depth, so this scans forward through `logs`.
pub fn extract_call_target(logs: &[StructLog], i: usize) -> CallTarget {
    let log = &logs[i];
    match log.op.as_str() {
        "CALL" | "CALLCODE" | "DELEGATECALL" | "STATICCALL" => {
            // Stack top is `gas`; the target is second from top.
            let address_hex = stack_from_top(&log.stack, 1).and_then(|w| stack_word_to_address(w).ok());
            CallTarget { address_hex, is_construction_call: false }
        }
        "CREATE" | "CREATE2" => {
            let depth = log.depth;
            let address_hex = logs[i + 1..]
                .iter()
                .find(|candidate| candidate.depth == depth)
                .and_then(|reemerged| reemerged.stack.last())
                .and_then(|word| stack_word_to_address(word).ok());
            CallTarget { address_hex, is_construction_call: true }
        }
        _ => CallTarget::default(),
    }
}
