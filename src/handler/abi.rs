//! Bytes-first C ABI for handler code loaded from dynamic libraries.
//!
//! A loadable handler is a `cdylib` exporting one of two shapes: a named
//! `handler` member, or a module-level `lds_handler` entry point. Either
//! is paired with an `lds_free` deallocator for the buffers it returns.
//! Payloads are JSON: the host passes `{event, context}` in and receives a
//! `Result<InvocationResult, String>` back. The [`export_handler!`] macro
//! generates the unsafe wrappers so handler crates only write a plain
//! function.

use crate::handler::HandlerError;
use crate::invocation::{InvocationContext, InvocationEvent, InvocationResult};
use serde::{Deserialize, Serialize};

/// Borrowed byte buffer handed across the FFI boundary.
#[repr(C)]
pub struct HandlerSlice {
    pub ptr: *const u8,
    pub len: usize,
}

/// Owned byte buffer returned across the FFI boundary.
///
/// Carries the capacity so the exporting side can reconstruct its `Vec`
/// exactly when freeing.
#[repr(C)]
pub struct HandlerOwned {
    pub ptr: *mut u8,
    pub len: usize,
    pub cap: usize,
}

/// Signature of a handler entry point exported by a loaded library.
pub type InvokeFn = unsafe extern "C" fn(HandlerSlice) -> HandlerOwned;

/// Signature of the paired buffer deallocator.
pub type FreeFn = unsafe extern "C" fn(HandlerOwned);

/// Symbol name of a library's named `handler` member.
pub const NAMED_SYMBOL: &[u8] = b"handler";

/// Symbol name of a library that is itself the handler.
pub const MODULE_SYMBOL: &[u8] = b"lds_handler";

/// Symbol name of the deallocator paired with either entry point.
pub const FREE_SYMBOL: &[u8] = b"lds_free";

/// Invocation payload encoded for a loaded handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireInvocation {
    pub event: InvocationEvent,
    pub context: InvocationContext,
}

/// Outcome decoded from a loaded handler: a result, or an error message.
pub type WireOutcome = Result<InvocationResult, String>;

pub fn encode_invocation(
    event: &InvocationEvent,
    context: &InvocationContext,
) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(&WireInvocation {
        event: event.clone(),
        context: *context,
    })
}

pub fn decode_invocation(bytes: &[u8]) -> Result<WireInvocation, serde_json::Error> {
    serde_json::from_slice(bytes)
}

pub fn encode_outcome(outcome: &WireOutcome) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(outcome)
}

pub fn decode_outcome(bytes: &[u8]) -> Result<WireOutcome, serde_json::Error> {
    serde_json::from_slice(bytes)
}

/// Hand a `Vec` across the boundary without dropping it.
pub fn owned_from_vec(bytes: Vec<u8>) -> HandlerOwned {
    let mut bytes = std::mem::ManuallyDrop::new(bytes);
    HandlerOwned {
        ptr: bytes.as_mut_ptr(),
        len: bytes.len(),
        cap: bytes.capacity(),
    }
}

/// Reclaim a buffer previously produced by [`owned_from_vec`].
///
/// # Safety
///
/// `owned` must come from [`owned_from_vec`] in this same compilation, and
/// must not be reclaimed twice.
pub unsafe fn vec_from_owned(owned: HandlerOwned) -> Vec<u8> {
    if owned.ptr.is_null() {
        return Vec::new();
    }
    Vec::from_raw_parts(owned.ptr, owned.len, owned.cap)
}

/// Run `func` behind the exported-handler ABI: decode the invocation, call
/// the function, catch panics at the FFI boundary, and encode the outcome.
///
/// # Safety
///
/// `req.ptr` must point to `req.len` valid bytes (or be null with zero
/// length).
pub unsafe fn invoke_exported<F>(req: HandlerSlice, func: F) -> HandlerOwned
where
    F: FnOnce(InvocationEvent, InvocationContext) -> Result<InvocationResult, HandlerError>,
{
    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        if req.ptr.is_null() && req.len != 0 {
            return Err("null invocation pointer with non-zero length".to_string());
        }
        let bytes = if req.len == 0 {
            &[][..]
        } else {
            std::slice::from_raw_parts(req.ptr, req.len)
        };
        let invocation =
            decode_invocation(bytes).map_err(|err| format!("invalid invocation payload: {err}"))?;
        func(invocation.event, invocation.context).map_err(|err| err.to_string())
    }));

    let outcome: WireOutcome = match outcome {
        Ok(outcome) => outcome,
        Err(panic) => Err(panic_message(panic)),
    };

    owned_from_vec(encode_outcome(&outcome).unwrap_or_default())
}

/// Drop a buffer handed out by [`invoke_exported`].
///
/// # Safety
///
/// `owned` must come from [`invoke_exported`] and not be freed twice.
pub unsafe fn free_exported(owned: HandlerOwned) {
    drop(vec_from_owned(owned));
}

/// Best-effort extraction of a panic payload's message.
pub(crate) fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_string()
    }
}

/// Export a plain function as a loadable handler module.
///
/// The function has the synchronous shape
/// `fn(InvocationEvent, InvocationContext) -> Result<InvocationResult, HandlerError>`;
/// the host moves the call off its event loop. Expands to the named
/// `handler` export plus the paired `lds_free` deallocator.
///
/// ```ignore
/// use lambda_dev_server::prelude::*;
///
/// fn greet(event: InvocationEvent, _ctx: InvocationContext) -> Result<InvocationResult, HandlerError> {
///     let name = event.param("name").unwrap_or("world").to_string();
///     Ok(InvocationResult::text(format!("hello, {name}")))
/// }
///
/// lambda_dev_server::export_handler!(greet);
/// ```
#[macro_export]
macro_rules! export_handler {
    ($func:expr) => {
        #[no_mangle]
        pub unsafe extern "C" fn handler(
            req: $crate::handler::abi::HandlerSlice,
        ) -> $crate::handler::abi::HandlerOwned {
            $crate::handler::abi::invoke_exported(req, $func)
        }

        #[no_mangle]
        pub unsafe extern "C" fn lds_free(buf: $crate::handler::abi::HandlerOwned) {
            $crate::handler::abi::free_exported(buf)
        }
    };
}
