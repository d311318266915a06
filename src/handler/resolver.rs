//! Handler references and their resolution into invocable capabilities.

use crate::handler::{handler_fn, Handler, HandlerError};
use crate::invocation::{InvocationContext, InvocationEvent, InvocationResult};
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// A configured reference to handler code: either a callable value or a
/// path to loadable code.
pub enum HandlerRef {
    /// An in-process handler, invoked directly. Always cached; reload is
    /// disallowed for this variant at configuration time.
    Callable(Arc<dyn Handler>),
    /// A path to a loadable handler library. Relative paths are resolved
    /// against the configured root directory at startup.
    Path(PathBuf),
}

impl HandlerRef {
    /// Wrap an in-process [`Handler`] impl.
    pub fn callable<H>(handler: H) -> Self
    where
        H: Handler + 'static,
    {
        HandlerRef::Callable(Arc::new(handler))
    }

    /// Wrap an in-process async function or closure.
    pub fn callable_fn<F, Fut>(f: F) -> Self
    where
        F: Fn(InvocationEvent, InvocationContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<InvocationResult, HandlerError>> + Send + 'static,
    {
        HandlerRef::Callable(Arc::new(handler_fn(f)))
    }

    /// Reference handler code on disk.
    pub fn path(path: impl Into<PathBuf>) -> Self {
        HandlerRef::Path(path.into())
    }

    /// Whether this reference is an in-process callable.
    pub fn is_callable(&self) -> bool {
        matches!(self, HandlerRef::Callable(_))
    }
}

impl Clone for HandlerRef {
    fn clone(&self) -> Self {
        match self {
            HandlerRef::Callable(handler) => HandlerRef::Callable(Arc::clone(handler)),
            HandlerRef::Path(path) => HandlerRef::Path(path.clone()),
        }
    }
}

impl fmt::Debug for HandlerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerRef::Callable(_) => f.write_str("Callable(..)"),
            HandlerRef::Path(path) => f.debug_tuple("Path").field(path).finish(),
        }
    }
}

/// Loads handler code from a path, producing an invocable capability.
///
/// The default implementation is [`crate::handler::DylibLoader`]; tests
/// inject stub loaders to exercise reload semantics without real
/// libraries on disk.
pub trait HandlerLoader: Send + Sync {
    /// Load the handler at `path`.
    fn load(&self, path: &Path) -> Result<Arc<dyn Handler>, ResolveError>;
}

/// Failure to turn a handler reference into an invocable capability.
#[derive(Debug)]
pub enum ResolveError {
    /// The path was missing, unreadable, or not a loadable library.
    Load {
        /// Path the load was attempted from.
        path: PathBuf,
        /// Underlying loader message.
        message: String,
    },
    /// The library loaded but exposes neither accepted handler shape.
    UnrecognizedShape {
        /// Path the library was loaded from.
        path: PathBuf,
    },
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolveError::Load { path, message } => {
                write!(f, "failed to load handler from {:?}: {}", path, message)
            }
            ResolveError::UnrecognizedShape { path } => write!(
                f,
                "handler library {:?} exposes neither a named `handler` export nor a module-level entry point",
                path
            ),
        }
    }
}

impl std::error::Error for ResolveError {}

/// Resolves the configured handler reference on demand, caching per the
/// reload policy.
///
/// With reload enabled the cached module is discarded before every load,
/// so each request sees the latest on-disk content; with reload disabled
/// the first load is kept for the process lifetime. Callables skip the
/// loader entirely.
pub struct HandlerResolver {
    reference: HandlerRef,
    reload: bool,
    loader: Box<dyn HandlerLoader>,
    cache: Mutex<Option<Arc<dyn Handler>>>,
}

impl HandlerResolver {
    /// Create a resolver for `reference` under the given reload policy.
    pub fn new(reference: HandlerRef, reload: bool, loader: Box<dyn HandlerLoader>) -> Self {
        Self {
            reference,
            reload,
            loader,
            cache: Mutex::new(None),
        }
    }

    /// Produce the invocable handler for the next request.
    pub fn resolve(&self) -> Result<Arc<dyn Handler>, ResolveError> {
        match &self.reference {
            HandlerRef::Callable(handler) => Ok(Arc::clone(handler)),
            HandlerRef::Path(path) => {
                let mut cache = self.cache.lock().expect("handler cache poisoned");
                if self.reload {
                    // unload first so the fresh load sees latest disk state
                    *cache = None;
                }
                if let Some(handler) = cache.as_ref() {
                    return Ok(Arc::clone(handler));
                }
                debug!("loading handler from {:?}", path);
                let handler = self.loader.load(path)?;
                *cache = Some(Arc::clone(&handler));
                Ok(handler)
            }
        }
    }
}
