pub mod chain;
pub mod config;
pub mod generator;
pub mod metadata;
pub mod repair;
pub mod sampler;
pub mod utils;

pub use config::*;
pub use generator::*;
pub use metadata::*;
