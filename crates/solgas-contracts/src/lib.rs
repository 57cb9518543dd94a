//! Caches deployed contracts by address, fetching bytecode via a
//! [`ChainClient`] and matching it against a compiler bundle by exact-string
//! equality (the only identity a compiled artifact has that survives linking).

use std::collections::HashSet;

use indexmap::IndexMap;
use log::warn;
use solgas_bytecode::{map_pc_to_instruction_index, BytecodeError, PcToIdx};
use solgas_sourcemap::{decode_source_map, SourceMapEntry, SourceMapError};
use solgas_types::{
    address::{normalize_address, strip_and_validate_hex, HexError},
    bundle::CompilerBundle,
    chain::{ChainClient, ChainError},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ContractError {
    #[error("chain error: {0}")]
    Chain(#[from] ChainError),
    #[error("hex error: {0}")]
    Hex(#[from] HexError),
    #[error(transparent)]
    Bytecode(#[from] BytecodeError),
    #[error(transparent)]
    SourceMap(#[from] SourceMapError),
}

/// A contract touched by the profiled transaction.
#[derive(Clone, Debug)]
pub struct Contract {
    pub address_hex: String,
    pub code_hex: Option<String>,
    pub construction_code_hex: Option<String>,
    pub name: Option<String>,
    pub file_name: Option<String>,
    /// Ids of sources referenced by this contract's instructions, for report
    /// grouping; the sources themselves live in the (separate) source registry.
    pub sources_by_id: HashSet<i64>,
    pub source_map: Vec<SourceMapEntry>,
    pub constructor_source_map: Vec<SourceMapEntry>,
    pub pc_to_idx: PcToIdx,
    pub construction_pc_to_idx: PcToIdx,
    pub total_gas_cost: i64,
    pub synth_gas_cost: i64,
}

impl Contract {
    fn skeleton(address_hex: String) -> Self {
        Contract {
            address_hex,
            code_hex: None,
            construction_code_hex: None,
            name: None,
            file_name: None,
            sources_by_id: HashSet::new(),
            source_map: Vec::new(),
            constructor_source_map: Vec::new(),
            pc_to_idx: PcToIdx::new(),
            construction_pc_to_idx: PcToIdx::new(),
            total_gas_cost: 0,
            synth_gas_cost: 0,
        }
    }

    /// `true` once bytecode has been fetched, regardless of whether it
    /// matched a compiled contract in the bundle.
    pub fn has_code(&self) -> bool {
        self.code_hex.is_some()
    }

    /// `true` once the deployed bytecode has been matched to a bundle entry.
    pub fn is_resolved(&self) -> bool {
        self.name.is_some()
    }
}

/// Cache of [`Contract`]s by address.
#[derive(Default)]
pub struct ContractRegistry {
    by_address: IndexMap<String, Contract>,
}

impl ContractRegistry {
    pub fn new() -> Self {
        ContractRegistry { by_address: IndexMap::new() }
    }

    pub fn get(&self, address_hex: &str) -> Option<&Contract> {
        self.by_address.get(address_hex)
    }

    pub fn get_mut(&mut self, address_hex: &str) -> Option<&mut Contract> {
        self.by_address.get_mut(address_hex)
    }

    /// Touched contracts in the order they were first resolved.
    pub fn contracts(&self) -> impl Iterator<Item = &Contract> {
        self.by_address.values()
    }

    /// Returns the cached contract for `address`, fetching and resolving it
    /// on first sight. The skeletal entry is cached *before* any I/O so a
    /// contract that (directly or indirectly) calls itself during resolution
    /// finds itself already present rather than recursing.
    pub async fn get_or_fetch<C: ChainClient>(
        &mut self,
        chain: &C,
        bundle: &CompilerBundle,
        address: &str,
    ) -> Result<&mut Contract, ContractError> {
        let addr = normalize_address(address)?;
        if !self.by_address.contains_key(&addr) {
            self.by_address.insert(addr.clone(), Contract::skeleton(addr.clone()));
            self.resolve(chain, bundle, &addr).await?;
        }
        Ok(self.by_address.get_mut(&addr).expect("just inserted"))
    }

    async fn resolve<C: ChainClient>(
        &mut self,
        chain: &C,
        bundle: &CompilerBundle,
        addr: &str,
    ) -> Result<(), ContractError> {
        let raw_code = chain.get_code(addr).await?;
        let code_hex = strip_and_validate_hex(&raw_code)?;
        if code_hex.is_empty() {
            warn!("address {addr} has no code; attribution for this frame is synthetic-only");
            return Ok(());
        }
        let pc_to_idx = map_pc_to_instruction_index(&code_hex)?;

        let contract = self.by_address.get_mut(addr).expect("just inserted");
        contract.code_hex = Some(code_hex.clone());
        contract.pc_to_idx = pc_to_idx;

        match bundle.find_by_deployed_bytecode(&code_hex) {
            Some((file_name, contract_name, compiled)) => {
                let construction_code_hex = compiled.evm.bytecode.object.clone();
                let construction_pc_to_idx = map_pc_to_instruction_index(&construction_code_hex)?;
                let source_map = decode_source_map(&compiled.evm.deployed_bytecode.source_map)?;
                let constructor_source_map = decode_source_map(&compiled.evm.bytecode.source_map)?;

                let contract = self.by_address.get_mut(addr).expect("just inserted");
                contract.name = Some(contract_name.to_string());
                contract.file_name = Some(file_name.to_string());
                contract.construction_code_hex = Some(construction_code_hex);
                contract.construction_pc_to_idx = construction_pc_to_idx;
                contract.source_map = source_map;
                contract.constructor_source_map = constructor_source_map;
            }
            None => {
                warn!("deployed bytecode at {addr} does not match any contract in the compiler bundle");
            }
        }
        Ok(())
    }
}
