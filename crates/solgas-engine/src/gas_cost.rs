//! Gas-cost normalization (spec §4.7): a narrow compensation for a known
//! trace-provider quirk, never generalized to other opcodes.

use solgas_types::trace::StructLog;

/// `log.gasCost`, except 0 when it is negative and the opcode is one of
/// RETURN/REVERT/STOP (some providers report the final step with a negative
/// cost). Negative costs on any other opcode propagate as-is.
pub fn gas_cost(log: &StructLog) -> i64 {
    if log.gas_cost < 0 && matches!(log.op.as_str(), "RETURN" | "REVERT" | "STOP") {
        0
    } else {
        log.gas_cost
    }
}
