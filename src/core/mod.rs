// Core domain layer
pub mod models;
pub mod config;
pub mod interfaces;
pub mod graph_builder;
pub mod services;

pub use models::*;
pub use interfaces::*;
pub use services::*;
