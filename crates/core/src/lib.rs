//! symtrace-core
//!
//! Core library for extracting per-function symbolic execution traces from compiled
//! binaries and persisting them as compressed datasets.
//!
//! The crate owns the orchestration: walking the recovered function catalog, driving
//! bounded symbolic exploration (full-function or tracelet), evaluating collected states,
//! and assembling/persisting the per-binary artifact. Loading, CFG recovery, lifting, and
//! the symbolic engine are collaborators behind the traits in [`backends`].

pub mod analysis;
pub mod backends;
pub mod config;
pub mod logging;
pub mod model;
pub mod services;

/// Returns the library version as encoded at compile time.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
