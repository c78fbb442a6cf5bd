use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::iter;

use log::{debug, error, trace};
use thiserror::Error;

use crate::analysis::evaluate::{EvalError, StateEvaluator};
use crate::backends::{
    CatalogFunction, ControlFlowGraph, EngineError, SymbolicEngine, SymbolicState,
};
use crate::model::ExecutionPath;

#[derive(Debug, Error)]
pub enum ExploreError {
    #[error("Exploration of {function} failed: {source}")]
    Engine {
        function: String,
        #[source]
        source: EngineError,
    },
    #[error("Evaluation in {function} failed: {source}")]
    Eval {
        function: String,
        #[source]
        source: EvalError,
    },
}

/// How each function is explored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExplorationMode {
    /// One run from the function entry to completion.
    Full,
    /// One fixed-length run from every block.
    Tracelet { steps: usize, allow_overlap: bool },
}

impl ExplorationMode {
    /// Negative `tracelet` selects full-function mode.
    pub fn from_tracelet(tracelet: i64, allow_overlap: bool) -> Self {
        match usize::try_from(tracelet) {
            Ok(steps) => Self::Tracelet { steps, allow_overlap },
            Err(_) => Self::Full,
        }
    }
}

/// Loop-bounding exploration technique.
///
/// A state is spinning once it has traversed any single back edge more than `bound` times.
/// Back edges come from a depth-first walk of the recovered CFG; a transition the CFG does
/// not know about counts as a back edge when it returns to an already visited block.
#[derive(Debug, Clone)]
pub struct LoopBound {
    known_edges: HashSet<(u64, u64)>,
    back_edges: HashSet<(u64, u64)>,
    bound: u32,
}

impl LoopBound {
    pub fn new(cfg: &ControlFlowGraph, entries: impl IntoIterator<Item = u64>, bound: u32) -> Self {
        let known_edges =
            cfg.nodes().flat_map(|from| cfg.successors(from).map(move |to| (from, to))).collect();
        Self { known_edges, back_edges: back_edges(cfg, entries), bound }
    }

    pub fn bound(&self) -> u32 {
        self.bound
    }

    pub fn is_back_edge(&self, from: u64, to: u64) -> bool {
        self.back_edges.contains(&(from, to))
    }

    pub fn is_spinning<S: SymbolicState>(&self, state: &S) -> bool {
        let mut seen = HashSet::new();
        let mut traversals: BTreeMap<(u64, u64), u32> = BTreeMap::new();
        let mut prev: Option<u64> = None;

        for addr in state.history().iter().copied().chain(iter::once(state.address())) {
            if let Some(from) = prev {
                let back = if self.known_edges.contains(&(from, addr)) {
                    self.back_edges.contains(&(from, addr))
                } else {
                    seen.contains(&addr)
                };
                if back {
                    let count = traversals.entry((from, addr)).or_insert(0);
                    *count += 1;
                    if *count > self.bound {
                        return true;
                    }
                }
            }
            seen.insert(addr);
            prev = Some(addr);
        }
        false
    }
}

fn back_edges(
    cfg: &ControlFlowGraph,
    entries: impl IntoIterator<Item = u64>,
) -> HashSet<(u64, u64)> {
    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Mark {
        Open,
        Done,
    }

    let mut marks: BTreeMap<u64, Mark> = BTreeMap::new();
    let mut found = HashSet::new();
    let roots: Vec<u64> = entries.into_iter().chain(cfg.nodes()).collect();

    for root in roots {
        if marks.contains_key(&root) {
            continue;
        }
        marks.insert(root, Mark::Open);
        let mut stack: Vec<(u64, Vec<u64>, usize)> =
            vec![(root, cfg.successors(root).collect(), 0)];

        while let Some((node, succs, idx)) = stack.last_mut() {
            let Some(&next) = succs.get(*idx) else {
                marks.insert(*node, Mark::Done);
                stack.pop();
                continue;
            };
            *idx += 1;
            let from = *node;
            match marks.get(&next) {
                Some(Mark::Open) => {
                    found.insert((from, next));
                }
                Some(Mark::Done) => {}
                None => {
                    marks.insert(next, Mark::Open);
                    stack.push((next, cfg.successors(next).collect(), 0));
                }
            }
        }
    }
    found
}

/// Stash-based driver for one symbolic run.
pub struct SimulationManager<'a, E: SymbolicEngine> {
    engine: &'a E,
    loop_bound: &'a LoopBound,
    active: Vec<E::State>,
    deadended: Vec<E::State>,
    spinning: Vec<E::State>,
    stopped: Vec<E::State>,
}

impl<'a, E: SymbolicEngine> SimulationManager<'a, E> {
    pub fn new(engine: &'a E, loop_bound: &'a LoopBound, initial: E::State) -> Self {
        Self {
            engine,
            loop_bound,
            active: vec![initial],
            deadended: Vec::new(),
            spinning: Vec::new(),
            stopped: Vec::new(),
        }
    }

    /// Advance every active state by one block.
    pub fn step(&mut self) -> Result<(), EngineError> {
        for state in std::mem::take(&mut self.active) {
            let successors = self.engine.step(&state)?;
            if successors.is_empty() {
                self.deadended.push(state);
                continue;
            }
            for succ in successors {
                if succ.is_halted() {
                    self.deadended.push(succ);
                } else if self.loop_bound.is_spinning(&succ) {
                    trace!("Loop bound reached at 0x{:x}", succ.address());
                    self.spinning.push(succ);
                } else {
                    self.active.push(succ);
                }
            }
        }
        Ok(())
    }

    /// Step until no active state remains.
    pub fn run(&mut self) -> Result<(), EngineError> {
        while !self.active.is_empty() {
            self.step()?;
        }
        Ok(())
    }

    /// Move active states matching `stop` to the stopped stash without stepping them.
    pub fn stop_active(&mut self, mut stop: impl FnMut(&E::State) -> bool) {
        let (stopped, active): (Vec<_>, Vec<_>) =
            std::mem::take(&mut self.active).into_iter().partition(|state| stop(state));
        self.active = active;
        self.stopped.extend(stopped);
    }

    pub fn active(&self) -> &[E::State] {
        &self.active
    }

    pub fn deadended(&self) -> &[E::State] {
        &self.deadended
    }

    pub fn spinning(&self) -> &[E::State] {
        &self.spinning
    }

    pub fn stopped(&self) -> &[E::State] {
        &self.stopped
    }
}

/// Drives exploration for the functions of one binary, strictly one run at a time.
pub struct Explorer<'a, E: SymbolicEngine> {
    engine: &'a E,
    loop_bound: &'a LoopBound,
    evaluator: &'a StateEvaluator,
    mode: ExplorationMode,
    strict: bool,
}

impl<'a, E: SymbolicEngine> Explorer<'a, E> {
    pub fn new(
        engine: &'a E,
        loop_bound: &'a LoopBound,
        evaluator: &'a StateEvaluator,
        mode: ExplorationMode,
    ) -> Self {
        Self { engine, loop_bound, evaluator, mode, strict: false }
    }

    /// Propagate exploration failures instead of logging them.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Explore `function`; unless strict, a failure yields no paths.
    pub fn explore_or_recover(
        &self,
        function: &CatalogFunction,
    ) -> Result<Vec<ExecutionPath>, ExploreError> {
        match self.explore(function) {
            Ok(paths) => Ok(paths),
            Err(err) if self.strict => Err(err),
            Err(err) => {
                error!("{err}");
                Ok(Vec::new())
            }
        }
    }

    pub fn explore(&self, function: &CatalogFunction) -> Result<Vec<ExecutionPath>, ExploreError> {
        match self.mode {
            ExplorationMode::Full => self.explore_full(function),
            ExplorationMode::Tracelet { steps, allow_overlap } => {
                self.explore_tracelets(function, steps, allow_overlap)
            }
        }
    }

    fn explore_full(&self, function: &CatalogFunction) -> Result<Vec<ExecutionPath>, ExploreError> {
        let engine_err =
            |source: EngineError| ExploreError::Engine { function: function.name.clone(), source };

        let initial = self.engine.entry_state(function.address).map_err(engine_err)?;
        let mut simgr = SimulationManager::new(self.engine, self.loop_bound, initial);
        debug!("Running {} from 0x{:x}", function.name, function.address);
        simgr.run().map_err(engine_err)?;
        debug!(
            "{}: {} deadended, {} spinning",
            function.name,
            simgr.deadended().len(),
            simgr.spinning().len()
        );

        simgr.deadended().iter().map(|state| self.evaluate(function, state)).collect()
    }

    fn explore_tracelets(
        &self,
        function: &CatalogFunction,
        steps: usize,
        allow_overlap: bool,
    ) -> Result<Vec<ExecutionPath>, ExploreError> {
        let engine_err =
            |source: EngineError| ExploreError::Engine { function: function.name.clone(), source };

        // Blocks already in a recorded history. Without overlap no tracelet starts at or
        // steps into one of them, so histories from different starts stay disjoint.
        let mut claimed: BTreeSet<u64> = BTreeSet::new();
        let mut paths = Vec::new();
        for &start in &function.blocks {
            if !allow_overlap && claimed.contains(&start) {
                continue;
            }
            let initial = self.engine.entry_state(start).map_err(engine_err)?;
            let mut simgr = SimulationManager::new(self.engine, self.loop_bound, initial);
            for _ in 0..steps {
                if !allow_overlap {
                    simgr.stop_active(|state| claimed.contains(&state.address()));
                }
                simgr.step().map_err(engine_err)?;
            }
            for state in simgr.active().iter().chain(simgr.deadended()).chain(simgr.stopped()) {
                let path = self.evaluate(function, state)?;
                claimed.extend(path.history.iter().copied());
                paths.push(path);
            }
        }
        Ok(paths)
    }

    fn evaluate(
        &self,
        function: &CatalogFunction,
        state: &E::State,
    ) -> Result<ExecutionPath, ExploreError> {
        self.evaluator
            .evaluate(state)
            .map_err(|source| ExploreError::Eval { function: function.name.clone(), source })
    }
}
