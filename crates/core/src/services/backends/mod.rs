#[cfg(feature = "capstone-backend")]
pub mod capstone;
pub mod cfg_walk;

#[cfg(feature = "capstone-backend")]
pub use capstone::{CapstoneBackend, CapstoneBlock, CapstoneProject};
pub use cfg_walk::{CfgWalkEngine, WalkState};
