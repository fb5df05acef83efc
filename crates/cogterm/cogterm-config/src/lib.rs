pub mod config;

pub use config::{ConfigError, ResetLine, SerialConfig, TermConfig};
