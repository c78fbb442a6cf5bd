//! Scripted in-memory collaborators for exercising the orchestration layer.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use num_bigint::BigUint;
use symtrace_core::backends::{
    BackendError, BinaryLoader, BlockSource, CatalogFunction, ControlFlowGraph,
    DecodedInstruction, EngineError, IrStatement, Project, SymbolicEngine, SymbolicState,
    SymbolicVariable, VariableKey,
};
use symtrace_core::model::{ArchInfo, BinaryMetadata, Endianness};

#[derive(Debug, Clone)]
pub struct ScriptedBlock {
    pub size: u64,
    pub instructions: Vec<DecodedInstruction>,
    pub ir: Result<Vec<IrStatement>, String>,
    pub variables: Vec<(SymbolicVariable, BigUint)>,
}

impl ScriptedBlock {
    fn at(address: u64) -> Self {
        Self {
            size: 4,
            instructions: vec![insn(address, "nop", "")],
            ir: Ok(vec![IrStatement::marker(address, format!("IMark(0x{address:x}, 4, 0)"))]),
            variables: Vec::new(),
        }
    }
}

impl BlockSource for ScriptedBlock {
    fn size(&self) -> u64 {
        self.size
    }

    fn instructions(&self) -> Vec<DecodedInstruction> {
        self.instructions.clone()
    }

    fn ir_statements(&self) -> Result<Vec<IrStatement>, BackendError> {
        self.ir.clone().map_err(|reason| BackendError::Lift { address: 0, reason })
    }
}

pub fn insn(address: u64, mnemonic: &str, operands: &str) -> DecodedInstruction {
    DecodedInstruction {
        address,
        mnemonic: mnemonic.to_string(),
        operands: operands.to_string(),
    }
}

pub fn var(key: VariableKey, bits: u32) -> SymbolicVariable {
    SymbolicVariable::new(key, bits)
}

/// Counters shared by every clone of a project and its engines.
#[derive(Debug, Default)]
pub struct Counters {
    pub steps: AtomicUsize,
    pub solver_queries: AtomicUsize,
    pub entry_states: AtomicUsize,
}

impl Counters {
    pub fn steps(&self) -> usize {
        self.steps.load(Ordering::SeqCst)
    }

    pub fn solver_queries(&self) -> usize {
        self.solver_queries.load(Ordering::SeqCst)
    }

    pub fn entry_states(&self) -> usize {
        self.entry_states.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct ScriptedProject {
    pub metadata: BinaryMetadata,
    pub functions: Vec<CatalogFunction>,
    pub blocks: BTreeMap<u64, ScriptedBlock>,
    pub cfg: ControlFlowGraph,
    pub failing_steps: Vec<u64>,
    pub failing_solver: bool,
    pub counters: Arc<Counters>,
}

impl ScriptedProject {
    pub fn new() -> Self {
        Self {
            metadata: BinaryMetadata {
                arch: ArchInfo::new("x86_64", 64, Endianness::Little),
                entry: 0x1000,
                routines: BTreeMap::from([(0x2000, vec!["puts".to_string()])]),
            },
            functions: Vec::new(),
            blocks: BTreeMap::new(),
            cfg: ControlFlowGraph::new(),
            failing_steps: Vec::new(),
            failing_solver: false,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Add a function whose blocks are listed with their successors; the first block is
    /// the entry.
    pub fn function(mut self, name: &str, blocks: &[(u64, &[u64])]) -> Self {
        let address = blocks[0].0;
        for (block, succs) in blocks {
            self.cfg.add_node(*block);
            for succ in *succs {
                self.cfg.add_edge(*block, *succ);
            }
            self.blocks.entry(*block).or_insert_with(|| ScriptedBlock::at(*block));
        }
        let endpoints =
            blocks.iter().filter(|(_, succs)| succs.is_empty()).map(|(b, _)| *b).collect();
        self.functions.push(CatalogFunction {
            address,
            name: name.to_string(),
            size: 4 * blocks.len() as u64,
            blocks: blocks.iter().map(|(b, _)| *b).collect(),
            endpoints,
        });
        self
    }

    pub fn block_mut(&mut self, address: u64) -> &mut ScriptedBlock {
        self.blocks.get_mut(&address).expect("scripted block")
    }

    pub fn with_variables(mut self, block: u64, vars: Vec<(SymbolicVariable, u64)>) -> Self {
        self.block_mut(block).variables =
            vars.into_iter().map(|(v, value)| (v, BigUint::from(value))).collect();
        self
    }

    pub fn failing_step_at(mut self, block: u64) -> Self {
        self.failing_steps.push(block);
        self
    }

    pub fn failing_solver(mut self) -> Self {
        self.failing_solver = true;
        self
    }
}

impl Default for ScriptedProject {
    fn default() -> Self {
        Self::new()
    }
}

impl Project for ScriptedProject {
    type Block = ScriptedBlock;
    type Engine = ScriptedEngine;

    fn metadata(&self) -> &BinaryMetadata {
        &self.metadata
    }

    fn functions(&self) -> Vec<CatalogFunction> {
        self.functions.clone()
    }

    fn block(&self, address: u64) -> Result<ScriptedBlock, BackendError> {
        self.blocks.get(&address).cloned().ok_or(BackendError::MissingBlock(address))
    }

    fn cfg(&self) -> &ControlFlowGraph {
        &self.cfg
    }

    fn engine(&self) -> Result<ScriptedEngine, BackendError> {
        Ok(ScriptedEngine { project: self.clone() })
    }
}

#[derive(Debug, Clone)]
pub struct ScriptedEngine {
    project: ScriptedProject,
}

#[derive(Debug, Clone)]
pub struct ScriptedState {
    address: u64,
    history: Vec<u64>,
    halted: bool,
    variables: Vec<(SymbolicVariable, BigUint)>,
    counters: Arc<Counters>,
    failing_solver: bool,
}

impl ScriptedState {
    pub fn detached(address: u64, history: Vec<u64>) -> Self {
        Self {
            address,
            history,
            halted: false,
            variables: Vec::new(),
            counters: Arc::new(Counters::default()),
            failing_solver: false,
        }
    }

    pub fn with_values(mut self, vars: Vec<(SymbolicVariable, BigUint)>) -> Self {
        self.variables = vars;
        self
    }

    pub fn with_failing_solver(mut self) -> Self {
        self.failing_solver = true;
        self
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }
}

impl SymbolicState for ScriptedState {
    fn address(&self) -> u64 {
        self.address
    }

    fn history(&self) -> &[u64] {
        &self.history
    }

    fn is_halted(&self) -> bool {
        self.halted
    }

    fn variables(&self) -> Vec<SymbolicVariable> {
        self.variables.iter().map(|(v, _)| v.clone()).collect()
    }

    fn batch_eval(&self, variables: &[SymbolicVariable]) -> Result<Vec<BigUint>, EngineError> {
        self.counters.solver_queries.fetch_add(1, Ordering::SeqCst);
        if self.failing_solver {
            return Err(EngineError::Solver("scripted solver failure".into()));
        }
        Ok(variables
            .iter()
            .map(|wanted| {
                self.variables
                    .iter()
                    .find(|(v, _)| v == wanted)
                    .map(|(_, value)| value.clone())
                    .unwrap_or_default()
            })
            .collect())
    }
}

impl SymbolicEngine for ScriptedEngine {
    type State = ScriptedState;

    fn entry_state(&self, address: u64) -> Result<ScriptedState, EngineError> {
        if !self.project.blocks.contains_key(&address) {
            return Err(EngineError::InvalidEntry(address));
        }
        self.project.counters.entry_states.fetch_add(1, Ordering::SeqCst);
        Ok(ScriptedState {
            address,
            history: Vec::new(),
            halted: false,
            variables: Vec::new(),
            counters: Arc::clone(&self.project.counters),
            failing_solver: self.project.failing_solver,
        })
    }

    fn step(&self, state: &ScriptedState) -> Result<Vec<ScriptedState>, EngineError> {
        self.project.counters.steps.fetch_add(1, Ordering::SeqCst);
        if self.project.failing_steps.contains(&state.address) {
            return Err(EngineError::Step {
                address: state.address,
                reason: "scripted step failure".into(),
            });
        }
        let block = self
            .project
            .blocks
            .get(&state.address)
            .ok_or(EngineError::InvalidEntry(state.address))?;

        let mut next = state.clone();
        next.history.push(state.address);
        for (v, value) in &block.variables {
            if !next.variables.iter().any(|(existing, _)| existing == v) {
                next.variables.push((v.clone(), value.clone()));
            }
        }

        let succs: Vec<u64> = self.project.cfg.successors(state.address).collect();
        if succs.is_empty() {
            next.halted = true;
            return Ok(vec![next]);
        }
        Ok(succs
            .into_iter()
            .map(|address| ScriptedState { address, ..next.clone() })
            .collect())
    }
}

/// Loader handing out clones of one scripted project for any existing file.
///
/// Files whose name contains `corrupt` fail to load.
#[derive(Debug, Clone)]
pub struct ScriptedLoader {
    pub project: ScriptedProject,
    pub loads: Arc<AtomicUsize>,
}

impl ScriptedLoader {
    pub fn new(project: ScriptedProject) -> Self {
        Self { project, loads: Arc::new(AtomicUsize::new(0)) }
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl BinaryLoader for ScriptedLoader {
    type Project = ScriptedProject;

    fn load(&self, path: &Path) -> Result<ScriptedProject, BackendError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if !path.is_file() {
            return Err(BackendError::MissingBinary(path.to_path_buf()));
        }
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        if name.contains("corrupt") {
            return Err(BackendError::Load {
                path: path.to_path_buf(),
                reason: "unrecognized format".into(),
            });
        }
        Ok(self.project.clone())
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// Single-function binary: `main` at 0x1000 branching to 0x1010/0x1020 which join at
/// 0x1030.
pub fn diamond() -> ScriptedProject {
    ScriptedProject::new().function(
        "main",
        &[
            (0x1000, &[0x1010, 0x1020]),
            (0x1010, &[0x1030]),
            (0x1020, &[0x1030]),
            (0x1030, &[]),
        ],
    )
}
