pub mod config;
pub mod engine;
pub mod metrics;

pub use config::*;
pub use engine::*;
pub use metrics::*;
