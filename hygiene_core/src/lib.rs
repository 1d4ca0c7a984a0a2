// Internal modules
pub mod config;
#[macro_use]
pub mod logging;
pub mod utils;

// Re-export key types for library consumers
pub use config::{ConfigError, RuntimeConfig, TiePolicy};
pub use logging::{Code, LogEvent, LogLevel};
