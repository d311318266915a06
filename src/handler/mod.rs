//! Handler contract, resolution, and dynamic loading.

pub mod abi;
mod contract;
mod dylib;
mod resolver;

pub use contract::{handler_fn, Handler, HandlerError, HandlerFn};
pub use dylib::DylibLoader;
pub use resolver::{HandlerLoader, HandlerRef, HandlerResolver, ResolveError};
