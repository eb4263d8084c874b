// Infrastructure layer
pub mod file_system;
pub mod resolver;
pub mod processors;
pub mod emitter;
pub mod watcher;

pub use file_system::*;
pub use resolver::*;
pub use emitter::*;
pub use watcher::*;
