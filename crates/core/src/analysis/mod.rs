//! Extraction, exploration, and state evaluation.
//!
//! - `extract`: function and block records from the recovered catalog, with IR joined
//!   back to instructions.
//! - `explore`: bounded symbolic runs per function, in full or tracelet mode.
//! - `evaluate`: classification and decoding of a collected state's symbolic inputs.

pub mod evaluate;
pub mod explore;
pub mod extract;

pub use evaluate::{ExclusionTable, StateEvaluator};
pub use explore::{ExplorationMode, Explorer, LoopBound, SimulationManager};
pub use extract::FunctionFilter;
