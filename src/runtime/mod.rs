//! Runtime: configuration, lifecycle, and the HTTP server.

mod config;
mod lifecycle;
mod server;

pub use config::{ConfigError, EnvSource, ServerConfig, Settings, DEFAULT_PORT_ENV_VAR};
pub use lifecycle::{ServerHandle, CLOSE_ENV_VAR};
pub use server::{DevServer, StartupError};
