//! The compiler-output bundle: deployed/constructor bytecode, source maps, and
//! the file-name-to-numeric-id index, as produced by `solc`'s combined-json /
//! standard-json output and consumed unmodified here.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Top level compiler-output document (see spec §6 "Compiler-output bundle").
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct CompilerBundle {
    /// fileName -> source index entry (carries the numeric source id).
    pub sources: HashMap<String, SourceIndexEntry>,
    /// fileName -> contractName -> compiled contract.
    pub contracts: HashMap<String, HashMap<String, CompiledContract>>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SourceIndexEntry {
    pub id: i64,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CompiledContract {
    pub evm: EvmOutput,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct EvmOutput {
    #[serde(rename = "deployedBytecode")]
    pub deployed_bytecode: BytecodeOutput,
    pub bytecode: BytecodeOutput,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct BytecodeOutput {
    pub object: String,
    #[serde(rename = "sourceMap", default)]
    pub source_map: String,
}

impl CompilerBundle {
    /// Looks up the numeric source id assigned to a file name, if the bundle
    /// references it.
    pub fn source_id(&self, file_name: &str) -> Option<i64> {
        self.sources.get(file_name).map(|e| e.id)
    }

    /// Finds the file name whose numeric id matches, scanning the source index.
    ///
    /// The index is file-name-keyed, so this is a linear scan; bundles are
    /// small enough (one compilation unit) that this is not worth indexing.
    pub fn file_name_for_id(&self, id: i64) -> Option<&str> {
        self.sources
            .iter()
            .find(|(_, entry)| entry.id == id)
            .map(|(name, _)| name.as_str())
    }

    /// Scans every contract in the bundle for one whose deployed bytecode
    /// exactly matches `deployed_hex` (case-sensitive, no `0x` prefix on either
    /// side). Returns the defining file name, contract name, and contract.
    pub fn find_by_deployed_bytecode(
        &self,
        deployed_hex: &str,
    ) -> Option<(&str, &str, &CompiledContract)> {
        for (file_name, contracts) in &self.contracts {
            for (contract_name, contract) in contracts {
                if contract.evm.deployed_bytecode.object == deployed_hex {
                    return Some((file_name, contract_name, contract));
                }
            }
        }
        None
    }
}
