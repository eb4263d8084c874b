// Processors module
pub mod imports;
pub mod transforms;
pub mod loader_pipeline;
pub mod chunk_planner;
pub mod chunk_renderer;

pub use loader_pipeline::*;
pub use chunk_planner::*;
pub use chunk_renderer::*;
