//! Invocation types exchanged with handlers.

mod event;
mod result;

pub use event::{InvocationContext, InvocationEvent};
pub use result::InvocationResult;
