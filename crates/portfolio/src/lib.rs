pub mod config;
pub mod normalizer;

pub use config::*;
pub use normalizer::*;
