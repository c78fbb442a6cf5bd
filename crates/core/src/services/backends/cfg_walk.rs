use num_bigint::BigUint;

use crate::backends::{
    ControlFlowGraph, EngineError, SymbolicEngine, SymbolicState, SymbolicVariable,
};

/// Control-flow-only engine: follows recovered successor edges and tracks no symbolic
/// values. Paths produced with it carry block histories and empty variable lists.
#[derive(Debug, Clone)]
pub struct CfgWalkEngine {
    cfg: ControlFlowGraph,
}

impl CfgWalkEngine {
    pub fn new(cfg: ControlFlowGraph) -> Self {
        Self { cfg }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkState {
    address: u64,
    history: Vec<u64>,
    halted: bool,
}

impl SymbolicState for WalkState {
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
        Vec::new()
    }

    fn batch_eval(&self, variables: &[SymbolicVariable]) -> Result<Vec<BigUint>, EngineError> {
        if variables.is_empty() {
            Ok(Vec::new())
        } else {
            Err(EngineError::Solver("control-flow walker tracks no symbolic values".into()))
        }
    }
}

impl SymbolicEngine for CfgWalkEngine {
    type State = WalkState;

    fn entry_state(&self, address: u64) -> Result<WalkState, EngineError> {
        if !self.cfg.contains(address) {
            return Err(EngineError::InvalidEntry(address));
        }
        Ok(WalkState { address, history: Vec::new(), halted: false })
    }

    fn step(&self, state: &WalkState) -> Result<Vec<WalkState>, EngineError> {
        let mut history = state.history.clone();
        history.push(state.address);

        let successors: Vec<u64> = self.cfg.successors(state.address).collect();
        if successors.is_empty() {
            return Ok(vec![WalkState { address: state.address, history, halted: true }]);
        }
        Ok(successors
            .into_iter()
            .map(|address| WalkState { address, history: history.clone(), halted: false })
            .collect())
    }
}
