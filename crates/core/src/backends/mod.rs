//! Collaborator interfaces.
//!
//! Loading, CFG recovery, instruction decoding, IR lifting, and the symbolic engine itself
//! live behind these traits. The orchestration in `analysis` and `services` is written
//! against them only, so any loader/engine pair can drive it (see
//! `services::backends` for the bundled capstone loader and control-flow walker).

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use num_bigint::BigUint;
use thiserror::Error;

use crate::model::BinaryMetadata;

/// Failures raised by the loader, CFG recovery, or lifter.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Binary not found at {0}")]
    MissingBinary(PathBuf),
    #[error("Failed to load {path}: {reason}")]
    Load { path: PathBuf, reason: String },
    #[error("CFG recovery failed: {0}")]
    Cfg(String),
    #[error("No block at 0x{0:x}")]
    MissingBlock(u64),
    #[error("IR lifting failed at 0x{address:x}: {reason}")]
    Lift { address: u64, reason: String },
}

/// Failures raised while stepping a state or querying the solver.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Cannot create state at 0x{0:x}")]
    InvalidEntry(u64),
    #[error("Step failed at 0x{address:x}: {reason}")]
    Step { address: u64, reason: String },
    #[error("Solver query failed: {0}")]
    Solver(String),
}

/// Function as reported by CFG recovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogFunction {
    pub address: u64,
    pub name: String,
    pub size: u64,
    /// Block start addresses in recovery order.
    pub blocks: Vec<u64>,
    /// Blocks with no successor inside the function.
    pub endpoints: Vec<u64>,
}

/// Recovered control-flow graph over block start addresses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControlFlowGraph {
    edges: BTreeMap<u64, BTreeSet<u64>>,
}

impl ControlFlowGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a block with no edges yet (no-op if already known).
    pub fn add_node(&mut self, block: u64) {
        self.edges.entry(block).or_default();
    }

    pub fn add_edge(&mut self, from: u64, to: u64) {
        self.edges.entry(from).or_default().insert(to);
        self.edges.entry(to).or_default();
    }

    pub fn contains(&self, block: u64) -> bool {
        self.edges.contains_key(&block)
    }

    pub fn has_edge(&self, from: u64, to: u64) -> bool {
        self.edges.get(&from).is_some_and(|succ| succ.contains(&to))
    }

    pub fn successors(&self, block: u64) -> impl Iterator<Item = u64> + '_ {
        self.edges.get(&block).into_iter().flat_map(|succ| succ.iter().copied())
    }

    pub fn nodes(&self) -> impl Iterator<Item = u64> + '_ {
        self.edges.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedInstruction {
    pub address: u64,
    pub mnemonic: String,
    pub operands: String,
}

/// One lifted IR statement. Instruction-marker statements carry `address`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrStatement {
    pub address: Option<u64>,
    pub text: String,
}

impl IrStatement {
    pub fn marker(address: u64, text: impl Into<String>) -> Self {
        Self { address: Some(address), text: text.into() }
    }

    pub fn plain(text: impl Into<String>) -> Self {
        Self { address: None, text: text.into() }
    }
}

/// A single basic block as seen by the extractor.
pub trait BlockSource {
    fn size(&self) -> u64;
    /// Decoded instructions, in decode order (not necessarily sorted).
    fn instructions(&self) -> Vec<DecodedInstruction>;
    /// Lifted IR statements. An error means the lift was malformed or partial.
    fn ir_statements(&self) -> Result<Vec<IrStatement>, BackendError>;
}

/// A loaded binary plus its recovered CFG.
pub trait Project {
    type Block: BlockSource;
    type Engine: SymbolicEngine;

    fn metadata(&self) -> &BinaryMetadata;
    fn functions(&self) -> Vec<CatalogFunction>;
    fn block(&self, address: u64) -> Result<Self::Block, BackendError>;
    fn cfg(&self) -> &ControlFlowGraph;
    fn engine(&self) -> Result<Self::Engine, BackendError>;
}

/// Entry point into a loader/CFG backend; callers select by name.
pub trait BinaryLoader: Send + Sync {
    type Project: Project;

    fn load(&self, path: &Path) -> Result<Self::Project, BackendError>;
    fn name(&self) -> &'static str;
}

/// Identity of a symbolic value as tracked by the solving context.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum VariableKey {
    /// Return value or argument of an external call.
    Api(String),
    /// Processor register, by offset into the register file.
    Register(u64),
    /// Memory location, by address.
    Memory(u64),
    /// File or stream identifier.
    File(String),
    /// Anything the engine tags differently; kept verbatim.
    Other { tag: String, name: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolicVariable {
    pub key: VariableKey,
    pub bits: u32,
}

impl SymbolicVariable {
    pub fn new(key: VariableKey, bits: u32) -> Self {
        Self { key, bits }
    }
}

pub trait SymbolicState: Clone {
    /// Address of the next block to execute.
    fn address(&self) -> u64;
    /// Addresses of the blocks executed so far, oldest first.
    fn history(&self) -> &[u64];
    /// True once the state has left the explored code (e.g. returned from its entry frame).
    fn is_halted(&self) -> bool {
        false
    }
    fn variables(&self) -> Vec<SymbolicVariable>;
    /// Resolve all `variables` with a single solver query, in order.
    fn batch_eval(&self, variables: &[SymbolicVariable]) -> Result<Vec<BigUint>, EngineError>;
}

pub trait SymbolicEngine {
    type State: SymbolicState;

    /// Fresh call state at `address`.
    fn entry_state(&self, address: u64) -> Result<Self::State, EngineError>;
    /// Execute one block. An empty result means the state has no successors.
    fn step(&self, state: &Self::State) -> Result<Vec<Self::State>, EngineError>;
}
