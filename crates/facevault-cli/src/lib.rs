//! facevault-cli — Configuration and application context behind the
//! `facevault` binary.

pub mod config;
pub mod context;

pub use config::{Config, ConfigError};
pub use context::{AppContext, ServiceError};
