pub mod batch;
pub mod dump;
pub mod show;
pub mod util;

pub use batch::*;
pub use dump::*;
pub use show::*;
pub use util::*;
