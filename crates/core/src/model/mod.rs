//! Core data model for extracted traces.
//!
//! Everything here is plain serializable data. The field names on the wire follow the
//! established dataset layout (`bin`, `functions`, `blocks`, `bbs`, `eps`, `vex`, ...) so
//! artifacts stay readable by existing downstream tooling.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Byte order of the target architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Endianness {
    Little,
    Big,
}

/// Architecture descriptor as reported by the loader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchInfo {
    /// Canonical architecture name (e.g., x86_64, x86, arm64).
    pub name: String,
    pub bits: u32,
    pub endianness: Endianness,
}

impl ArchInfo {
    pub fn new(name: impl Into<String>, bits: u32, endianness: Endianness) -> Self {
        Self { name: name.into(), bits, endianness }
    }
}

/// Binary-level metadata. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryMetadata {
    pub arch: ArchInfo,
    pub entry: u64,
    /// Recognized routine addresses mapped to their display names.
    #[serde(rename = "sim_procedures", default)]
    pub routines: BTreeMap<u64, Vec<String>>,
}

/// One decoded machine instruction and the IR text lifted from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstructionRecord {
    #[serde(rename = "addr")]
    pub address: u64,
    #[serde(rename = "mne")]
    pub mnemonic: String,
    #[serde(rename = "oprs")]
    pub operands: String,
    #[serde(rename = "vex", default)]
    pub ir: Vec<String>,
}

/// A basic block with its instructions sorted ascending by address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRecord {
    #[serde(rename = "addr")]
    pub address: u64,
    #[serde(rename = "f_addr")]
    pub function: u64,
    pub size: u64,
    #[serde(rename = "ins")]
    pub instructions: Vec<InstructionRecord>,
}

/// Evaluated inputs and block history of one collected symbolic state.
///
/// `variables` and `values` are not index-aligned: zero-valued resolutions are dropped from
/// `values` only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPath {
    #[serde(rename = "vars")]
    pub variables: Vec<String>,
    #[serde(rename = "vars_res")]
    pub values: Vec<String>,
    #[serde(rename = "addr")]
    pub history: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionRecord {
    #[serde(rename = "addr")]
    pub address: u64,
    pub name: String,
    #[serde(rename = "bbs_len")]
    pub block_count: usize,
    pub size: u64,
    #[serde(rename = "bbs")]
    pub blocks: Vec<u64>,
    #[serde(rename = "eps")]
    pub endpoints: Vec<u64>,
    #[serde(default)]
    pub paths: Vec<ExecutionPath>,
}

/// The per-binary unit of caching and persistence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    #[serde(rename = "bin")]
    pub binary: BinaryMetadata,
    pub functions: Vec<FunctionRecord>,
    pub blocks: Vec<BlockRecord>,
}

impl Artifact {
    pub fn new(
        binary: BinaryMetadata,
        functions: Vec<FunctionRecord>,
        blocks: Vec<BlockRecord>,
    ) -> Self {
        Self { binary, functions, blocks }
    }

    pub fn function(&self, name: &str) -> Option<&FunctionRecord> {
        self.functions.iter().find(|f| f.name == name)
    }

    /// Blocks owned by the function at `address`, in catalog order.
    pub fn blocks_of(&self, address: u64) -> impl Iterator<Item = &BlockRecord> {
        self.blocks.iter().filter(move |b| b.function == address)
    }

    pub fn path_count(&self) -> usize {
        self.functions.iter().map(|f| f.paths.len()).sum()
    }
}
