//! # lambda-dev-server
//!
//! A local development server that emulates a cloud function-as-a-service
//! invocation model over plain HTTP: an incoming GET request is translated
//! into an invocation event, dispatched to a user-supplied handler, and the
//! handler's structured result is rendered back onto the HTTP response.
//! The point is fast iteration on serverless-style handler code without
//! deploying anywhere.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                       HTTP (hyper, one port)                     │
//! └──────────────────────────────────────────────────────────────────┘
//!                                  │
//!                                  ▼
//! ┌──────────────────────────────────────────────────────────────────┐
//! │ Router/Guard ─► Event Builder ─► Resolver ─► Dispatch ─► Render  │
//! │      │                             │                             │
//! │  favicon drop /               Callable | Path (dylib,            │
//! │  302-to-root                  reload or load-once cache)         │
//! └──────────────────────────────────────────────────────────────────┘
//!                                  │
//!                    Lifecycle (max requests, close signal)
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use lambda_dev_server::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let config = ServerConfig::new()
//!         .handler(HandlerRef::callable_fn(
//!             |event: InvocationEvent, _ctx: InvocationContext| async move {
//!                 let name = event.param("name").unwrap_or("world").to_string();
//!                 Ok::<_, HandlerError>(InvocationResult::text(format!("hello, {name}")))
//!             },
//!         ))
//!         .port(8080);
//!
//!     let server = DevServer::bind(config).await?;
//!     server.serve().await?;
//!     Ok(())
//! }
//! ```
//!
//! Handlers can also live in a dynamic library on disk (see
//! [`handler::abi`] and the [`export_handler!`] macro). Path handlers are
//! re-loaded on every request by default so edits show up immediately;
//! pass `reload(false)` to load once and keep module state across requests.
//!
//! ## Development-only error behavior
//!
//! Any per-request failure (handler resolution, execution, contract
//! violation) is answered with HTTP 200, `Content-Type: text/plain`, and a
//! body carrying the error message plus a backtrace. This trades correct
//! status semantics for visibility while iterating locally; enable
//! `strict_status` on the config to get 500s instead.

pub mod handler;
pub mod invocation;
pub mod runtime;

/// Re-export commonly used types.
pub mod prelude {
    pub use crate::handler::{handler_fn, Handler, HandlerError, HandlerLoader, HandlerRef};
    pub use crate::invocation::{InvocationContext, InvocationEvent, InvocationResult};
    pub use crate::runtime::{DevServer, EnvSource, ServerConfig, ServerHandle};
    pub use async_trait::async_trait;
}

// Re-export for convenience
pub use handler::{handler_fn, Handler, HandlerError, HandlerLoader, HandlerRef};
pub use invocation::{InvocationContext, InvocationEvent, InvocationResult};
pub use runtime::{DevServer, EnvSource, ServerConfig, ServerHandle};
