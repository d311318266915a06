//! Server configuration: builder, environment plumbing, fail-fast
//! resolution into immutable settings.

use crate::handler::HandlerRef;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use tracing::debug;

/// Environment variable consulted for the default port when none is
/// configured.
pub const DEFAULT_PORT_ENV_VAR: &str = "LDS_DEFAULT_PORT";

const DEFAULT_PORT: u16 = 8080;

/// Configuration for the development server.
///
/// Built up with the consuming setter methods, then resolved once by
/// [`crate::runtime::DevServer::bind`]; invalid combinations fail fast
/// there, before the listener binds.
#[derive(Debug, Default)]
pub struct ServerConfig {
    /// Handler reference: a callable or a path to loadable code.
    pub handler: Option<HandlerRef>,
    /// Port to listen on; pass 0 for an ephemeral port. Defaults to
    /// [`DEFAULT_PORT_ENV_VAR`], then 8080.
    pub port: Option<u16>,
    /// Directory relative handler paths resolve against. Defaults to the
    /// process working directory.
    pub root: Option<PathBuf>,
    /// Re-resolve the handler on every request. Defaults to true for path
    /// handlers; incompatible with callable handlers.
    pub reload: Option<bool>,
    /// Close the listener after this many counted requests.
    pub max_requests: Option<u64>,
    /// Inject `Access-Control-Allow-Origin: *` when the handler does not
    /// set it.
    pub cors: bool,
    /// Verbose per-request logging (consumed by the CLI's filter setup).
    pub debug: bool,
    /// Answer per-request errors with 500 instead of the dev-friendly 200.
    pub strict_status: bool,
    /// Environment applied to the process before startup.
    pub env: Option<EnvSource>,
}

impl ServerConfig {
    /// Create an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the handler reference.
    pub fn handler(mut self, handler: HandlerRef) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Set the port (0 requests an ephemeral port).
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set the root directory.
    pub fn root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    /// Set the reload policy explicitly.
    pub fn reload(mut self, reload: bool) -> Self {
        self.reload = Some(reload);
        self
    }

    /// Cap the number of requests served.
    pub fn max_requests(mut self, max: u64) -> Self {
        self.max_requests = Some(max);
        self
    }

    /// Enable cross-origin header injection.
    pub fn cors(mut self, cors: bool) -> Self {
        self.cors = cors;
        self
    }

    /// Enable verbose per-request logging.
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Map per-request errors to 500 instead of 200.
    pub fn strict_status(mut self, strict: bool) -> Self {
        self.strict_status = strict;
        self
    }

    /// Set the environment source.
    pub fn env(mut self, env: EnvSource) -> Self {
        self.env = Some(env);
        self
    }

    /// Shorthand for `env(EnvSource::File(..))`.
    pub fn env_file(self, path: impl Into<PathBuf>) -> Self {
        self.env(EnvSource::File(path.into()))
    }

    /// Apply the environment source and resolve into immutable
    /// [`Settings`], failing fast on invalid combinations.
    pub fn resolve(self) -> Result<Settings, ConfigError> {
        if let Some(env) = &self.env {
            env.apply()?;
        }

        let handler = self.handler.ok_or(ConfigError::MissingHandler)?;
        if let HandlerRef::Path(path) = &handler {
            if path.as_os_str().is_empty() {
                return Err(ConfigError::MissingHandler);
            }
        }

        let reload = match (&handler, self.reload) {
            (HandlerRef::Callable(_), Some(true)) => return Err(ConfigError::ReloadWithCallable),
            (HandlerRef::Callable(_), _) => false,
            (HandlerRef::Path(_), reload) => reload.unwrap_or(true),
        };
        debug!(
            "{}reloading handler on each request",
            if reload { "" } else { "**not** " }
        );

        let root = match self.root {
            Some(root) => root,
            None => {
                let cwd = std::env::current_dir()
                    .map_err(|err| ConfigError::WorkingDir(err.to_string()))?;
                debug!("root not set so using current working directory {:?}", cwd);
                cwd
            }
        };

        let handler = match handler {
            HandlerRef::Path(path) if path.is_relative() => HandlerRef::Path(root.join(path)),
            other => other,
        };

        let port = match self.port {
            Some(port) => port,
            None => match std::env::var(DEFAULT_PORT_ENV_VAR) {
                Ok(value) => value
                    .parse()
                    .map_err(|_| ConfigError::InvalidPort(value))?,
                Err(_) => DEFAULT_PORT,
            },
        };

        if self.max_requests == Some(0) {
            return Err(ConfigError::InvalidMaxRequests);
        }
        if let Some(max) = self.max_requests {
            debug!("serving at most {max} requests");
        }

        Ok(Settings {
            handler,
            reload,
            port,
            root,
            max_requests: self.max_requests,
            cors: self.cors,
            debug: self.debug,
            strict_status: self.strict_status,
        })
    }
}

/// Immutable configuration captured once at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub handler: HandlerRef,
    pub reload: bool,
    pub port: u16,
    pub root: PathBuf,
    pub max_requests: Option<u64>,
    pub cors: bool,
    pub debug: bool,
    pub strict_status: bool,
}

/// Environment injected into the process before the server starts.
#[derive(Debug, Clone)]
pub enum EnvSource {
    /// A `.env`-style file; must be referenced by an absolute path.
    File(PathBuf),
    /// Inline key/value pairs.
    Inline(HashMap<String, String>),
}

impl EnvSource {
    fn apply(&self) -> Result<(), ConfigError> {
        match self {
            EnvSource::File(path) => {
                if !path.is_absolute() {
                    return Err(ConfigError::RelativeEnvPath(path.clone()));
                }
                let contents =
                    std::fs::read_to_string(path).map_err(|err| ConfigError::EnvRead {
                        path: path.clone(),
                        message: err.to_string(),
                    })?;
                for (key, value) in parse_env_file(&contents) {
                    debug!("setting {key} from env file");
                    std::env::set_var(key, value);
                }
                Ok(())
            }
            EnvSource::Inline(vars) => {
                for (key, value) in vars {
                    std::env::set_var(key, value);
                }
                Ok(())
            }
        }
    }
}

/// Parse `.env`-style contents into key/value pairs.
///
/// One `KEY=VALUE` per line; lines whose first non-whitespace character is
/// `#` are comments; double-quoted values are unwrapped; lines without
/// `=` are skipped.
fn parse_env_file(contents: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for line in contents.lines() {
        if line.trim_start().starts_with('#') {
            continue;
        }
        let Some(eq) = line.find('=') else {
            continue;
        };
        let key = &line[..eq];
        let mut value = &line[eq + 1..];
        if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
            value = &value[1..value.len() - 1];
        }
        pairs.push((key.to_string(), value.to_string()));
    }
    pairs
}

/// Errors raised while resolving configuration, before the listener binds.
#[derive(Debug)]
pub enum ConfigError {
    /// No handler reference was configured (or the path was empty).
    MissingHandler,
    /// `reload=true` combined with a callable handler reference.
    ReloadWithCallable,
    /// The `.env` file was referenced by a relative path.
    RelativeEnvPath(PathBuf),
    /// The `.env` file could not be read.
    EnvRead { path: PathBuf, message: String },
    /// The port environment variable held a non-numeric value.
    InvalidPort(String),
    /// `max_requests` must be at least 1 when set.
    InvalidMaxRequests,
    /// The working directory could not be determined for the default root.
    WorkingDir(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::MissingHandler => f.write_str("handler must be set"),
            ConfigError::ReloadWithCallable => f.write_str(
                "cannot reload a callable handler on each request; pass a path to the handler instead or disable reload",
            ),
            ConfigError::RelativeEnvPath(path) => {
                write!(f, "env must not be a relative path: {:?}", path)
            }
            ConfigError::EnvRead { path, message } => {
                write!(f, "failed to read env file {:?}: {}", path, message)
            }
            ConfigError::InvalidPort(value) => {
                write!(f, "{DEFAULT_PORT_ENV_VAR} is not a valid port: {:?}", value)
            }
            ConfigError::InvalidMaxRequests => f.write_str("max_requests must be at least 1"),
            ConfigError::WorkingDir(message) => {
                write!(f, "failed to determine working directory: {}", message)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
