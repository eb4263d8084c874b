// Shared utilities module
pub mod errors;
pub mod logging;
pub mod hash;
pub mod incremental;
pub mod watch;
pub mod config_loader;

pub use errors::*;
pub use logging::*;
pub use incremental::*;
