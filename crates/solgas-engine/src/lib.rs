//! The trace-replay attribution engine: walks an ordered `debug_traceTransaction`
//! result, maintains a virtual call stack, and distributes each step's gas to
//! the source line responsible for it.

pub mod call_target;
pub mod gas_cost;

use log::warn;
use thiserror::Error;

use call_target::extract_call_target;
use gas_cost::gas_cost;
use solgas_contracts::{Contract, ContractError, ContractRegistry};
use solgas_sourcemap::SourceMapEntry;
use solgas_sources::{SourceRegistry, SourceRegistryConfig};
use solgas_types::{
    address::{normalize_address, HexError},
    bundle::CompilerBundle,
    chain::{ChainClient, ChainError},
    trace::StructLog,
};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Contract(#[from] ContractError),
    #[error(transparent)]
    Hex(#[from] HexError),
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error("trace is empty")]
    EmptyTrace,
    #[error("a CALL/CALLCODE/DELEGATECALL/STATICCALL or CREATE/CREATE2 at step {0} pushed a frame with no further trace steps")]
    TruncatedTrace(usize),
}

/// A single active contract invocation.
#[derive(Clone, Debug)]
pub struct CallStackItem {
    pub address_hex: String,
    pub is_construction_call: bool,
    pub gas_before: i64,
    /// `Some` iff this frame is currently awaiting a nested call's return.
    pub gas_before_outgoing_call: Option<i64>,
    pub outgoing_call_source: Option<i64>,
    pub outgoing_call_line: Option<usize>,
}

impl CallStackItem {
    fn new(address_hex: String, is_construction_call: bool, gas_before: i64) -> Self {
        CallStackItem {
            address_hex,
            is_construction_call,
            gas_before,
            gas_before_outgoing_call: None,
            outgoing_call_source: None,
            outgoing_call_line: None,
        }
    }

    fn awaiting_return(&self) -> bool {
        self.outgoing_call_source.is_some()
    }
}

/// Owns the caches (contract-by-address, source-by-id/file-name) for one
/// profiling run. Released as a unit when dropped; nothing here is
/// process-wide state.
pub struct Session {
    pub contracts: ContractRegistry,
    pub sources: SourceRegistry,
}

impl Session {
    pub fn new(source_config: SourceRegistryConfig) -> Self {
        Session { contracts: ContractRegistry::new(), sources: SourceRegistry::new(source_config) }
    }

    /// Replays `logs` (a `debug_traceTransaction` structLogs array, already in
    /// trace order) starting from `entry_address`, attributing gas to the
    /// Source/Contract caches as it goes.
    pub async fn attribute_trace<C: ChainClient>(
        &mut self,
        chain: &C,
        bundle: &CompilerBundle,
        entry_address: &str,
        entry_is_construction: bool,
        logs: &[StructLog],
    ) -> Result<(), EngineError> {
        let Some(first) = logs.first() else { return Err(EngineError::EmptyTrace) };
        let bottom_depth = first.depth;
        let entry_addr = normalize_address(entry_address)?;
        self.contracts.get_or_fetch(chain, bundle, &entry_addr).await?;

        let mut stack = vec![CallStackItem::new(entry_addr.clone(), entry_is_construction, first.gas)];

        for i in 0..logs.len() {
            let log = &logs[i];

            self.unwind_returns(bundle, &mut stack, logs, i, bottom_depth);

            let top = stack.last().expect("entry frame is never popped");
            let position = self.resolve_position(bundle, &top.address_hex, top.is_construction_call, log.pc);

            let target = extract_call_target(logs, i);
            let pushes_frame = target.address_hex.is_some() && logs.get(i + 1).is_some_and(|next| next.depth > log.depth);

            if pushes_frame {
                let target_addr = target.address_hex.expect("checked above");
                let next_gas = logs[i + 1].gas;
                {
                    let caller = stack.last_mut().expect("entry frame is never popped");
                    caller.outgoing_call_source = position.map(|(source_id, _)| source_id);
                    caller.outgoing_call_line = position.map(|(_, line)| line);
                    caller.gas_before_outgoing_call = Some(log.gas);
                }
                self.contracts.get_or_fetch(chain, bundle, &target_addr).await?;
                stack.push(CallStackItem::new(normalize_address(&target_addr)?, target.is_construction_call, next_gas));
            } else {
                match position {
                    Some((source_id, line)) => {
                        if let Some(source) = self.sources.get_or_create_by_id(bundle, source_id) {
                            source.add_gas(line, gas_cost(log));
                        }
                        if let Some(contract) = self.contracts.get_mut(&top.address_hex) {
                            contract.sources_by_id.insert(source_id);
                        }
                    }
                    None => {
                        if let Some(contract) = self.contracts.get_mut(&top.address_hex) {
                            contract.synth_gas_cost += gas_cost(log);
                        }
                    }
                }
            }
        }

        let last = logs.last().expect("checked non-empty above");
        if let Some(entry_contract) = self.contracts.get_mut(&entry_addr) {
            entry_contract.total_gas_cost = first.gas - last.gas + gas_cost(last);
        }
        Ok(())
    }

    /// Pops completed frames while the trace's depth indicates they have
    /// returned, reconciling each popped frame's total cost and folding the
    /// whole subtree's cost into the caller's outgoing-call line.
    fn unwind_returns(
        &mut self,
        bundle: &CompilerBundle,
        stack: &mut Vec<CallStackItem>,
        logs: &[StructLog],
        i: usize,
        bottom_depth: u64,
    ) {
        let log = &logs[i];
        while (log.depth as i64 - bottom_depth as i64) < (stack.len() as i64 - 1) {
            let Some(prev) = stack.pop() else { break };
            let prev_log = &logs[i - 1];
            if let Some(contract) = self.contracts.get_mut(&prev.address_hex) {
                contract.total_gas_cost += prev.gas_before - prev_log.gas + gas_cost(prev_log);
            }

            let Some(caller) = stack.last_mut() else { continue };
            if !caller.awaiting_return() {
                continue;
            }
            let source_id = caller.outgoing_call_source.expect("checked by awaiting_return");
            let line = caller.outgoing_call_line.expect("set alongside outgoing_call_source");
            let gas_before_call = caller.gas_before_outgoing_call.expect("set alongside outgoing_call_source");
            caller.outgoing_call_source = None;
            caller.outgoing_call_line = None;
            caller.gas_before_outgoing_call = None;

            if let Some(source) = self.sources.get_or_create_by_id(bundle, source_id) {
                source.add_gas(line, gas_before_call - log.gas);
                source.mark_call(line);
            }
        }
    }

    /// Resolves a PC to a (source id, line) pair, registering the Source on
    /// first sight. `None` when the instruction is synthetic (`f == -1`) or
    /// when the source's text could not be read (no line table to search).
    fn resolve_position(
        &mut self,
        bundle: &CompilerBundle,
        address_hex: &str,
        is_construction_call: bool,
        pc: u64,
    ) -> Option<(i64, usize)> {
        let entry = self.source_map_entry(address_hex, is_construction_call, pc)?;
        if entry.f == -1 {
            return None;
        }
        let source = self.sources.get_or_create_by_id(bundle, entry.f)?;
        let line = source.line_for_offset(entry.s)?;
        Some((entry.f, line))
    }

    fn source_map_entry(&self, address_hex: &str, is_construction_call: bool, pc: u64) -> Option<SourceMapEntry> {
        let contract: &Contract = self.contracts.get(address_hex)?;
        let (pc_to_idx, source_map) = if is_construction_call {
            (&contract.construction_pc_to_idx, &contract.constructor_source_map)
        } else {
            (&contract.pc_to_idx, &contract.source_map)
        };
        let idx = *pc_to_idx.get(&pc)?;
        source_map.get(idx as usize).copied()
    }
}

/// Validates that every CALL/CREATE that pushed a frame has a subsequent log —
/// a CALL pushing a frame with nothing after it is a malformed/truncated
/// trace, treated as fatal per the spec's open question.
pub fn check_trace_not_truncated(logs: &[StructLog]) -> Result<(), EngineError> {
    for (i, log) in logs.iter().enumerate() {
        let target = extract_call_target(logs, i);
        if target.address_hex.is_some() && logs.get(i + 1).is_none() {
            warn!("step {i} ({}) is the last step in the trace; treating as truncated", log.op);
            return Err(EngineError::TruncatedTrace(i));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use solgas_sources::SourceRegistryConfig;
    use solgas_types::bundle::{BytecodeOutput, CompiledContract, EvmOutput, SourceIndexEntry};
    use solgas_types::trace::{TraceResult, Transaction, TransactionReceipt};
    use std::collections::HashMap;
    use std::fs;

    struct FakeChain {
        code_by_address: HashMap<String, String>,
    }

    impl ChainClient for FakeChain {
        async fn get_transaction_receipt(&self, _tx_hash: &str) -> Result<TransactionReceipt, ChainError> {
            unimplemented!()
        }
        async fn get_transaction(&self, _tx_hash: &str) -> Result<Transaction, ChainError> {
            unimplemented!()
        }
        async fn get_code(&self, address: &str) -> Result<String, ChainError> {
            Ok(self.code_by_address.get(address).cloned().unwrap_or_default())
        }
        async fn debug_trace_transaction(&self, _tx_hash: &str) -> Result<TraceResult, ChainError> {
            unimplemented!()
        }
    }

    fn log(pc: u64, op: &str, gas: i64, gas_cost: i64, depth: u64, stack: Vec<&str>) -> StructLog {
        StructLog { pc, op: op.to_string(), gas, gas_cost, depth, stack: stack.into_iter().map(String::from).collect() }
    }

    fn addr(byte: u8) -> String {
        format!("0x{}", hex::encode(vec![byte; 20]))
    }

    fn single_contract_bundle(deployed_hex: &str, source_map: &str, text: &str, file_name: &str) -> (CompilerBundle, tempdir::TempSrc) {
        let temp = tempdir::TempSrc::new(file_name, text);
        let mut bundle = CompilerBundle::default();
        bundle.sources.insert(file_name.to_string(), SourceIndexEntry { id: 0 });
        let mut contracts = HashMap::new();
        contracts.insert(
            "C".to_string(),
            CompiledContract {
                evm: EvmOutput {
                    deployed_bytecode: BytecodeOutput { object: deployed_hex.to_string(), source_map: source_map.to_string() },
                    bytecode: BytecodeOutput { object: deployed_hex.to_string(), source_map: source_map.to_string() },
                },
            },
        );
        bundle.contracts.insert(file_name.to_string(), contracts);
        (bundle, temp)
    }

    mod tempdir {
        use std::{
            fs,
            path::PathBuf,
            sync::atomic::{AtomicU64, Ordering},
        };

        static COUNTER: AtomicU64 = AtomicU64::new(0);

        /// Minimal scratch-directory helper so source-registry file resolution
        /// has something real to read during tests; removed on drop.
        pub struct TempSrc {
            pub dir: PathBuf,
        }

        impl TempSrc {
            pub fn new(file_name: &str, text: &str) -> Self {
                let unique = COUNTER.fetch_add(1, Ordering::Relaxed);
                let dir = std::env::temp_dir().join(format!("solgas-test-{}-{}", std::process::id(), unique));
                fs::create_dir_all(&dir).unwrap();
                fs::write(dir.join(file_name), text).unwrap();
                TempSrc { dir }
            }
        }

        impl Drop for TempSrc {
            fn drop(&mut self) {
                let _ = fs::remove_dir_all(&self.dir);
            }
        }
    }

    #[tokio::test]
    async fn single_contract_no_calls_attributes_every_step() {
        // PUSH1 0x01 (pc0-1), PUSH1 0x02 (pc2-3), ADD (pc4), STOP (pc5)
        let code = "600160020100";
        let (bundle, temp) = single_contract_bundle(code, "0:1:0:-;0:1:0:-;0:1:0:-;0:1:0:-", "uint x = 1;", "C.sol");
        let mut chain = FakeChain { code_by_address: HashMap::new() };
        let entry = addr(1);
        chain.code_by_address.insert(entry.trim_start_matches("0x").to_string(), code.to_string());

        let mut session = Session::new(SourceRegistryConfig { skip_substrings: vec![], src_root: temp.dir.clone() });
        let logs = vec![
            log(0, "PUSH1", 100, 3, 1, vec![]),
            log(2, "PUSH1", 97, 3, 1, vec![]),
            log(4, "ADD", 94, 3, 1, vec![]),
            log(5, "STOP", 91, 0, 1, vec![]),
        ];
        session.attribute_trace(&chain, &bundle, &entry, false, &logs).await.unwrap();

        let contract = session.contracts.get(entry.trim_start_matches("0x")).unwrap();
        assert_eq!(contract.synth_gas_cost, 0);
        assert_eq!(contract.total_gas_cost, 100 - 91 + 0);

        let source = session.sources.get_or_create_by_id(&bundle, 0).unwrap();
        let total: i64 = source.line_gas.values().sum();
        assert_eq!(total, contract.total_gas_cost);
    }

    #[tokio::test]
    async fn call_that_returns_folds_subtree_cost_into_caller_line() {
        // Caller: PUSH1 (pc0, line 0), CALL (pc2, line 1), STOP (pc3, line 1).
        let caller_code = "6001f100";
        // Callee: PUSH1 (pc0), STOP (pc2) -- a separate source entirely.
        let callee_code = "600100";

        let caller_file = tempdir::TempSrc::new("Caller.sol", "uint x;\ncall();\n");
        fs::write(caller_file.dir.join("Callee.sol"), "uint y;\n").unwrap();

        let mut bundle = CompilerBundle::default();
        bundle.sources.insert("Caller.sol".into(), SourceIndexEntry { id: 0 });
        bundle.sources.insert("Callee.sol".into(), SourceIndexEntry { id: 1 });
        let mut caller_contracts = HashMap::new();
        caller_contracts.insert(
            "Caller".to_string(),
            CompiledContract {
                evm: EvmOutput {
                    deployed_bytecode: BytecodeOutput { object: caller_code.into(), source_map: "0:1:0:-;8:1:0:-;8:1:0:-".into() },
                    bytecode: BytecodeOutput { object: caller_code.into(), source_map: "0:1:0:-;8:1:0:-;8:1:0:-".into() },
                },
            },
        );
        bundle.contracts.insert("Caller.sol".into(), caller_contracts);
        let mut callee_contracts = HashMap::new();
        callee_contracts.insert(
            "Callee".to_string(),
            CompiledContract {
                evm: EvmOutput {
                    deployed_bytecode: BytecodeOutput { object: callee_code.into(), source_map: "0:1:1:-;0:1:1:-".into() },
                    bytecode: BytecodeOutput { object: callee_code.into(), source_map: "0:1:1:-;0:1:1:-".into() },
                },
            },
        );
        bundle.contracts.insert("Callee.sol".into(), callee_contracts);

        let caller = addr(1);
        let callee = addr(2);
        let mut chain = FakeChain { code_by_address: HashMap::new() };
        chain.code_by_address.insert(caller.trim_start_matches("0x").to_string(), caller_code.to_string());
        chain.code_by_address.insert(callee.trim_start_matches("0x").to_string(), callee_code.to_string());

        let mut session = Session::new(SourceRegistryConfig { skip_substrings: vec![], src_root: caller_file.dir.clone() });
        let target_word = callee.trim_start_matches("0x").to_string();
        let logs = vec![
            log(0, "PUSH1", 200, 3, 1, vec![]),                                       // caller line 0
            log(2, "CALL", 197, 100, 1, vec!["0x64", &target_word, "0x2710"]), // issues the call, caller line 1
            log(0, "PUSH1", 150, 3, 2, vec![]),                                       // inside callee
            log(2, "STOP", 147, 0, 2, vec![]),
            log(3, "STOP", 140, 0, 1, vec![]),                                        // re-emerged at caller depth, line 1
        ];
        session.attribute_trace(&chain, &bundle, &caller, false, &logs).await.unwrap();

        let caller_source = session.sources.get_or_create_by_id(&bundle, 0).unwrap();
        assert!(caller_source.lines_with_calls.contains(&1));
        assert_eq!(caller_source.line_gas.get(&0), Some(&3));
        // The CALL line received exactly the folded subtree cost and nothing
        // else: gas at the call (197) minus gas observed back at caller depth
        // (140), with the trailing STOP (cost 0) adding nothing further.
        assert_eq!(caller_source.line_gas.get(&1), Some(&(197 - 140)));

        let callee_contract = session.contracts.get(&callee.trim_start_matches("0x").to_string()).unwrap();
        assert_eq!(callee_contract.total_gas_cost, 150 - 147 + 0);
    }

    #[tokio::test]
    async fn call_that_fails_to_enter_attributes_its_own_cost_with_no_call_marker() {
        // PUSH1 (pc0, line 0), CALL (pc2, line 1) that never increases depth
        // (e.g. target has no code), STOP (pc3, line 1) at the same depth.
        let code = "6001f100";
        let (bundle, temp) = single_contract_bundle(code, "0:1:0:-;8:1:0:-;8:1:0:-", "uint x;\ncall();\n", "C.sol");
        let entry = addr(1);
        let target = addr(2);
        let mut chain = FakeChain { code_by_address: HashMap::new() };
        chain.code_by_address.insert(entry.trim_start_matches("0x").to_string(), code.to_string());

        let mut session = Session::new(SourceRegistryConfig { skip_substrings: vec![], src_root: temp.dir.clone() });
        let target_word = target.trim_start_matches("0x").to_string();
        let logs = vec![
            log(0, "PUSH1", 200, 3, 1, vec![]),
            log(2, "CALL", 197, 100, 1, vec!["0x64", &target_word, "0x2710"]),
            log(3, "STOP", 97, 0, 1, vec![]),
        ];
        session.attribute_trace(&chain, &bundle, &entry, false, &logs).await.unwrap();

        let source = session.sources.get_or_create_by_id(&bundle, 0).unwrap();
        assert!(!source.lines_with_calls.contains(&1));
        assert_eq!(source.line_gas.get(&1), Some(&100));

        // The target was never fetched or registered: the call never entered it.
        assert!(session.contracts.get(target.trim_start_matches("0x")).is_none());
    }

    #[tokio::test]
    async fn create_end_to_end_uses_constructor_maps_during_the_construction_frame() {
        // Caller: CREATE (pc0, line 0), STOP (pc1, line 0).
        let caller_code = "f000";
        // The deployed code later sitting at the new address, whose deployed
        // source map points at a different file than its constructor map, so
        // the assertions below can tell which map the engine actually used.
        let deployed_code = "600300"; // PUSH1 0x03 (pc0-1), STOP (pc2)
        // The constructor (init) code actually executing during creation.
        let construction_code = "600100"; // PUSH1 0x01 (pc0-1), STOP (pc2)

        let temp = tempdir::TempSrc::new("Caller.sol", "create();\n");
        fs::write(temp.dir.join("Deployed.sol"), "uint deployed;\n").unwrap();
        fs::write(temp.dir.join("Construct.sol"), "uint ctor;\n").unwrap();

        let mut bundle = CompilerBundle::default();
        bundle.sources.insert("Caller.sol".into(), SourceIndexEntry { id: 0 });
        bundle.sources.insert("Deployed.sol".into(), SourceIndexEntry { id: 1 });
        bundle.sources.insert("Construct.sol".into(), SourceIndexEntry { id: 2 });

        let mut caller_contracts = HashMap::new();
        caller_contracts.insert(
            "Caller".to_string(),
            CompiledContract {
                evm: EvmOutput {
                    deployed_bytecode: BytecodeOutput { object: caller_code.into(), source_map: "0:1:0:-;0:1:0:-".into() },
                    bytecode: BytecodeOutput { object: caller_code.into(), source_map: "0:1:0:-;0:1:0:-".into() },
                },
            },
        );
        bundle.contracts.insert("Caller.sol".into(), caller_contracts);

        let mut created_contracts = HashMap::new();
        created_contracts.insert(
            "Created".to_string(),
            CompiledContract {
                evm: EvmOutput {
                    deployed_bytecode: BytecodeOutput { object: deployed_code.into(), source_map: "0:1:1:-;0:1:1:-".into() },
                    bytecode: BytecodeOutput { object: construction_code.into(), source_map: "0:1:2:-;0:1:2:-".into() },
                },
            },
        );
        bundle.contracts.insert("Created.sol".into(), created_contracts);

        let caller = addr(1);
        let created = addr(2);
        let mut chain = FakeChain { code_by_address: HashMap::new() };
        chain.code_by_address.insert(caller.trim_start_matches("0x").to_string(), caller_code.to_string());
        // What the created address holds once construction completes.
        chain.code_by_address.insert(created.trim_start_matches("0x").to_string(), deployed_code.to_string());

        let mut session = Session::new(SourceRegistryConfig { skip_substrings: vec![], src_root: temp.dir.clone() });
        let created_word = created.trim_start_matches("0x").to_string();
        let logs = vec![
            log(0, "CREATE", 300, 32000, 1, vec![]),
            log(0, "PUSH1", 260, 3, 2, vec![]),                 // inside the constructor
            log(2, "STOP", 257, 0, 2, vec![]),
            log(1, "STOP", 250, 0, 1, vec![&created_word]),     // re-emerged with the new address on top
        ];
        session.attribute_trace(&chain, &bundle, &caller, false, &logs).await.unwrap();

        // The constructor's own PUSH1 was resolved through the construction
        // maps (source id 2), never through the deployed maps (source id 1).
        let construct_source = session.sources.get_or_create_by_id(&bundle, 2).unwrap();
        assert_eq!(construct_source.line_gas.get(&0), Some(&3));
        let deployed_source = session.sources.get_or_create_by_id(&bundle, 1).unwrap();
        assert!(deployed_source.line_gas.is_empty());

        let created_contract = session.contracts.get(created.trim_start_matches("0x")).unwrap();
        assert_eq!(created_contract.name.as_deref(), Some("Created"));
        // Entry gas 260 down to the constructor's last recorded step (257, its
        // own STOP costing 0): the PUSH1's cost of 3 is the whole frame.
        assert_eq!(created_contract.total_gas_cost, 260 - 257 + 0);
    }

    #[tokio::test]
    async fn one_contract_with_a_source_map_spanning_multiple_files_populates_every_id() {
        // PUSH1 (pc0, id 0), PUSH1 (pc2, id 1), ADD (pc4, id 0), STOP (pc5, id 1).
        let code = "600160020100";
        let source_map = "0:1:0:-;0:1:1:-;0:1:0:-;0:1:1:-";
        let temp = tempdir::TempSrc::new("A.sol", "uint a;\n");
        fs::write(temp.dir.join("B.sol"), "uint b;\n").unwrap();

        let mut bundle = CompilerBundle::default();
        bundle.sources.insert("A.sol".into(), SourceIndexEntry { id: 0 });
        bundle.sources.insert("B.sol".into(), SourceIndexEntry { id: 1 });
        let mut contracts = HashMap::new();
        contracts.insert(
            "C".to_string(),
            CompiledContract {
                evm: EvmOutput {
                    deployed_bytecode: BytecodeOutput { object: code.into(), source_map: source_map.into() },
                    bytecode: BytecodeOutput { object: code.into(), source_map: source_map.into() },
                },
            },
        );
        bundle.contracts.insert("A.sol".into(), contracts);

        let entry = addr(1);
        let mut chain = FakeChain { code_by_address: HashMap::new() };
        chain.code_by_address.insert(entry.trim_start_matches("0x").to_string(), code.to_string());

        let mut session = Session::new(SourceRegistryConfig { skip_substrings: vec![], src_root: temp.dir.clone() });
        let logs = vec![
            log(0, "PUSH1", 100, 3, 1, vec![]),
            log(2, "PUSH1", 97, 3, 1, vec![]),
            log(4, "ADD", 94, 3, 1, vec![]),
            log(5, "STOP", 91, 0, 1, vec![]),
        ];
        session.attribute_trace(&chain, &bundle, &entry, false, &logs).await.unwrap();

        let contract = session.contracts.get(entry.trim_start_matches("0x")).unwrap();
        assert!(contract.sources_by_id.len() >= 2);
        assert!(contract.sources_by_id.contains(&0));
        assert!(contract.sources_by_id.contains(&1));
    }

    #[test]
    fn gas_conservation_formula_matches_receipt_style_accounting() {
        let first_gas = 1_000_000i64;
        let last_gas = 979_000i64;
        let last_cost = 0i64;
        assert_eq!(first_gas - last_gas + last_cost, 21_000);
    }
}
