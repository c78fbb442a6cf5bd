//! Process-wide logger setup.

use std::sync::Once;

use log::LevelFilter;

static INIT: Once = Once::new();

/// Collaborator crates that are silenced below `error`.
const QUIET_MODULES: &[&str] = &["goblin", "capstone"];

/// Level for this crate at a given verbosity.
pub fn level_for(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// Install the `env_logger` backend once per process. Later calls are no-ops.
///
/// `RUST_LOG`, when set, takes precedence over `verbosity`.
pub fn init(verbosity: u8) {
    INIT.call_once(|| {
        let mut builder = env_logger::Builder::new();
        builder.filter_level(level_for(verbosity));
        for module in QUIET_MODULES {
            builder.filter_module(module, LevelFilter::Error);
        }
        if let Ok(spec) = std::env::var("RUST_LOG") {
            builder.parse_filters(&spec);
        }
        // Another logger may already be installed by an embedding application.
        let _ = builder.try_init();
    });
}
