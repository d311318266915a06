//! Default loader: handler code as a dynamic library.

use crate::handler::abi::{self, FreeFn, InvokeFn};
use crate::handler::{Handler, HandlerError, HandlerLoader, ResolveError};
use crate::invocation::{InvocationContext, InvocationEvent, InvocationResult};
use async_trait::async_trait;
use libloading::{Library, Symbol};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Loads handler libraries through the [`crate::handler::abi`] contract.
#[derive(Debug, Default)]
pub struct DylibLoader;

impl DylibLoader {
    /// Create a new loader.
    pub fn new() -> Self {
        Self
    }
}

impl HandlerLoader for DylibLoader {
    fn load(&self, path: &Path) -> Result<Arc<dyn Handler>, ResolveError> {
        let library = unsafe { Library::new(path) }.map_err(|err| ResolveError::Load {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        let library = Arc::new(library);

        // Two accepted shapes: a named `handler` export, or a library that
        // is itself the entry point via `lds_handler`.
        let entry = if has_symbol::<InvokeFn>(&library, abi::NAMED_SYMBOL) {
            abi::NAMED_SYMBOL
        } else if has_symbol::<InvokeFn>(&library, abi::MODULE_SYMBOL) {
            abi::MODULE_SYMBOL
        } else {
            return Err(ResolveError::UnrecognizedShape {
                path: path.to_path_buf(),
            });
        };
        if !has_symbol::<FreeFn>(&library, abi::FREE_SYMBOL) {
            return Err(ResolveError::UnrecognizedShape {
                path: path.to_path_buf(),
            });
        }

        debug!("loaded handler library {:?}", path);
        Ok(Arc::new(DylibHandler { library, entry }))
    }
}

fn has_symbol<T>(library: &Library, name: &[u8]) -> bool {
    unsafe { library.get::<T>(name).is_ok() }
}

/// A loaded library invoked through the bytes-first ABI.
///
/// The library stays loaded for as long as any invocation (or the
/// resolver cache) holds the handler; dropping the last reference unloads
/// it, which is what makes reload pick up fresh on-disk content.
struct DylibHandler {
    library: Arc<Library>,
    entry: &'static [u8],
}

#[async_trait]
impl Handler for DylibHandler {
    async fn invoke(
        &self,
        event: InvocationEvent,
        context: InvocationContext,
    ) -> Result<InvocationResult, HandlerError> {
        let payload = abi::encode_invocation(&event, &context)?;
        let library = Arc::clone(&self.library);
        let entry = self.entry;

        // The exported function is synchronous C code; keep it off the
        // event loop.
        let bytes = tokio::task::spawn_blocking(move || unsafe {
            let invoke: Symbol<InvokeFn> =
                library.get(entry).map_err(|err| err.to_string())?;
            let free: Symbol<FreeFn> = library
                .get(abi::FREE_SYMBOL)
                .map_err(|err| err.to_string())?;

            let owned = invoke(abi::HandlerSlice {
                ptr: payload.as_ptr(),
                len: payload.len(),
            });
            if owned.ptr.is_null() && owned.len != 0 {
                return Err("handler returned a null buffer".to_string());
            }
            let bytes = if owned.len == 0 {
                Vec::new()
            } else {
                std::slice::from_raw_parts(owned.ptr, owned.len).to_vec()
            };
            free(owned);
            Ok::<Vec<u8>, String>(bytes)
        })
        .await
        .map_err(|err| HandlerError::new(format!("handler call failed to run: {err}")))?
        .map_err(HandlerError::new)?;

        match abi::decode_outcome(&bytes) {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(message)) => Err(HandlerError::new(message)),
            Err(err) => Err(HandlerError::new(format!(
                "invalid response from handler library: {err}"
            ))),
        }
    }
}
