pub mod config;
pub mod error;

pub use config::PushgateConfig;
pub use error::{ConfigError, Result};
