//! The development server: accept loop, request guard, invocation
//! dispatch, and response rendering.

use crate::handler::abi::panic_message;
use crate::handler::{
    DylibLoader, HandlerError, HandlerLoader, HandlerResolver, ResolveError,
};
use crate::invocation::{InvocationContext, InvocationEvent, InvocationResult};
use crate::runtime::config::{ConfigError, ServerConfig, Settings};
use crate::runtime::lifecycle::{Lifecycle, ServerHandle};
use base64::Engine;
use bytes::Bytes;
use futures::FutureExt;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::header::{HeaderValue, CONTENT_TYPE, LOCATION};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::backtrace::Backtrace;
use std::fmt;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

const DEFAULT_CONTENT_TYPE: &str = "application/json";

/// Errors that prevent the server from starting.
#[derive(Debug)]
pub enum StartupError {
    /// The configuration failed to resolve.
    Config(ConfigError),
    /// The listener could not bind.
    Bind { port: u16, message: String },
}

impl fmt::Display for StartupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartupError::Config(err) => fmt::Display::fmt(err, f),
            StartupError::Bind { port, message } => {
                write!(f, "failed to bind port {}: {}", port, message)
            }
        }
    }
}

impl std::error::Error for StartupError {}

impl From<ConfigError> for StartupError {
    fn from(err: ConfigError) -> Self {
        StartupError::Config(err)
    }
}

/// The development server, bound and ready to serve.
pub struct DevServer {
    settings: Arc<Settings>,
    resolver: Arc<HandlerResolver>,
    lifecycle: Arc<Lifecycle>,
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl std::fmt::Debug for DevServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DevServer")
            .field("local_addr", &self.local_addr)
            .finish_non_exhaustive()
    }
}

impl DevServer {
    /// Resolve `config`, apply its environment source, and bind the
    /// loopback listener. Path handlers load through the default
    /// [`DylibLoader`].
    pub async fn bind(config: ServerConfig) -> Result<Self, StartupError> {
        Self::bind_with_loader(config, Box::new(DylibLoader::new())).await
    }

    /// Like [`DevServer::bind`], with a custom loader for path handlers.
    pub async fn bind_with_loader(
        config: ServerConfig,
        loader: Box<dyn HandlerLoader>,
    ) -> Result<Self, StartupError> {
        let settings = config.resolve()?;
        let lifecycle = Arc::new(Lifecycle::new(settings.max_requests));
        let resolver = Arc::new(HandlerResolver::new(
            settings.handler.clone(),
            settings.reload,
            loader,
        ));

        let addr = SocketAddr::from(([127, 0, 0, 1], settings.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|err| StartupError::Bind {
                port: settings.port,
                message: err.to_string(),
            })?;
        let local_addr = listener.local_addr().map_err(|err| StartupError::Bind {
            port: settings.port,
            message: err.to_string(),
        })?;
        info!("listening on {local_addr}");

        Ok(Self {
            settings: Arc::new(settings),
            resolver,
            lifecycle,
            listener,
            local_addr,
        })
    }

    /// The bound address (useful when the configured port was 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Handle for closing this server instance out-of-band.
    pub fn handle(&self) -> ServerHandle {
        ServerHandle::new(Arc::clone(&self.lifecycle))
    }

    /// Accept and serve connections until the lifecycle reaches CLOSED,
    /// then drop the listener, drain in-flight connections, and return.
    pub async fn serve(self) -> std::io::Result<()> {
        let Self {
            settings,
            resolver,
            lifecycle,
            listener,
            local_addr,
        } = self;
        info!("server is ready at http://{local_addr}");

        let mut closed = lifecycle.subscribe();
        let mut connections = JoinSet::new();
        loop {
            if lifecycle.is_closed() {
                break;
            }
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, remote_addr) = accepted?;
                    debug!("accepted connection from {remote_addr}");
                    connections.spawn(serve_connection(
                        stream,
                        Arc::clone(&settings),
                        Arc::clone(&resolver),
                        Arc::clone(&lifecycle),
                    ));
                }
                _ = closed.changed() => {}
            }
        }

        drop(listener);
        while connections.join_next().await.is_some() {}
        info!("server closed after {} request(s)", lifecycle.served());
        Ok(())
    }
}

/// Drive one connection, shutting it down gracefully once the lifecycle
/// closes so in-flight requests still complete.
async fn serve_connection(
    stream: TcpStream,
    settings: Arc<Settings>,
    resolver: Arc<HandlerResolver>,
    lifecycle: Arc<Lifecycle>,
) {
    let io = TokioIo::new(stream);
    let mut closed = lifecycle.subscribe();

    let service = service_fn({
        let settings = Arc::clone(&settings);
        let resolver = Arc::clone(&resolver);
        let lifecycle = Arc::clone(&lifecycle);
        move |req| {
            let settings = Arc::clone(&settings);
            let resolver = Arc::clone(&resolver);
            let lifecycle = Arc::clone(&lifecycle);
            async move { handle_request(req, settings, resolver, lifecycle).await }
        }
    });

    let conn = http1::Builder::new().serve_connection(io, service);
    tokio::pin!(conn);

    let mut shutting_down = false;
    if lifecycle.is_closed() {
        conn.as_mut().graceful_shutdown();
        shutting_down = true;
    }
    loop {
        tokio::select! {
            result = conn.as_mut() => {
                if let Err(err) = result {
                    // dropped favicon probes surface here as service errors
                    debug!("connection ended: {err}");
                }
                break;
            }
            changed = closed.changed(), if !shutting_down => {
                if changed.is_ok() && *closed.borrow() {
                    shutting_down = true;
                    conn.as_mut().graceful_shutdown();
                }
            }
        }
    }
}

/// Guard error for requests that get no response at all: the connection
/// simply ends.
#[derive(Debug)]
struct RequestDropped;

impl fmt::Display for RequestDropped {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("request dropped without a response")
    }
}

impl std::error::Error for RequestDropped {}

/// Per-request failure, all classes surfaced to the client the same way.
#[derive(Debug)]
enum RequestError {
    Resolve(ResolveError),
    Execution(HandlerError),
    Contract(String),
    Render(String),
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestError::Resolve(err) => fmt::Display::fmt(err, f),
            RequestError::Execution(err) => fmt::Display::fmt(err, f),
            RequestError::Contract(message) | RequestError::Render(message) => {
                f.write_str(message)
            }
        }
    }
}

async fn handle_request(
    req: Request<Incoming>,
    settings: Arc<Settings>,
    resolver: Arc<HandlerResolver>,
    lifecycle: Arc<Lifecycle>,
) -> Result<Response<Full<Bytes>>, RequestDropped> {
    lifecycle.poll_external_close();

    let uri = req.uri();
    debug!("received request for {uri}");

    let path = uri.path();
    if path.starts_with("/favicon.ico") {
        debug!("dropping favicon probe");
        return Err(RequestDropped);
    }

    // every path except root collapses onto the single logical endpoint
    if !path.is_empty() && path != "/" {
        let response = redirect_to_root(uri.query());
        lifecycle.record_served();
        return Ok(response);
    }

    let event = InvocationEvent::from_query(uri.query());
    debug!("event is {event:?}");

    let outcome = match run_invocation(&resolver, event).await {
        Ok(result) => render(result, &settings),
        Err(err) => Err(err),
    };
    let response = match outcome {
        Ok(response) => response,
        Err(err) => {
            log_request_error(&err);
            error_response(&err, &settings)
        }
    };

    lifecycle.record_served();
    Ok(response)
}

/// Resolve the handler, invoke it, and enforce the result contract.
async fn run_invocation(
    resolver: &HandlerResolver,
    event: InvocationEvent,
) -> Result<InvocationResult, RequestError> {
    let handler = resolver.resolve().map_err(RequestError::Resolve)?;

    let invocation = AssertUnwindSafe(handler.invoke(event, InvocationContext::new()));
    let result = match invocation.catch_unwind().await {
        Ok(Ok(result)) => result,
        Ok(Err(err)) => return Err(RequestError::Execution(err)),
        Err(panic) => {
            return Err(RequestError::Execution(HandlerError::new(panic_message(
                panic,
            ))))
        }
    };

    match &result.body {
        Some(body) if !body.is_empty() => Ok(result),
        Some(_) => Err(RequestError::Contract(
            "handler returned body \"\"".to_string(),
        )),
        None => Err(RequestError::Contract(
            "handler returned no body".to_string(),
        )),
    }
}

/// Map an invocation result onto the outgoing HTTP response.
fn render(
    result: InvocationResult,
    settings: &Settings,
) -> Result<Response<Full<Bytes>>, RequestError> {
    let InvocationResult {
        status_code,
        is_base64_encoded,
        mut headers,
        body,
    } = result;

    if !headers.contains_key("Content-Type") {
        debug!("Content-Type not set, defaulting to {DEFAULT_CONTENT_TYPE:?}");
        headers.insert("Content-Type".to_string(), DEFAULT_CONTENT_TYPE.to_string());
    }
    if settings.cors && !headers.contains_key("Access-Control-Allow-Origin") {
        headers.insert(
            "Access-Control-Allow-Origin".to_string(),
            "*".to_string(),
        );
    }

    let status = StatusCode::from_u16(status_code).unwrap_or_else(|_| {
        warn!("invalid status code {status_code}, falling back to 500 Internal Server Error");
        StatusCode::INTERNAL_SERVER_ERROR
    });

    let body = body.unwrap_or_default();
    let body = if is_base64_encoded {
        debug!("decoding base64-encoded body");
        Bytes::from(
            base64::engine::general_purpose::STANDARD
                .decode(body.as_bytes())
                .map_err(|err| RequestError::Render(format!("invalid base64 body: {err}")))?,
        )
    } else {
        Bytes::from(body)
    };

    let mut builder = Response::builder().status(status);
    for (name, value) in &headers {
        builder = builder.header(name, value);
    }
    builder
        .body(Full::new(body))
        .map_err(|err| RequestError::Render(err.to_string()))
}

/// 302 to the root path, preserving the query string verbatim.
fn redirect_to_root(query: Option<&str>) -> Response<Full<Bytes>> {
    let location = match query {
        Some(query) if !query.is_empty() => format!("/?{query}"),
        _ => "/".to_string(),
    };
    debug!("redirecting to {location:?}");

    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = StatusCode::FOUND;
    let value =
        HeaderValue::from_str(&location).unwrap_or_else(|_| HeaderValue::from_static("/"));
    response.headers_mut().insert(LOCATION, value);
    response
}

fn log_request_error(err: &RequestError) {
    match err {
        RequestError::Resolve(cause) => error!("failed to resolve handler: {cause}"),
        RequestError::Execution(cause) => {
            error!("encountered error while running handler: {cause}")
        }
        RequestError::Contract(cause) => error!("handler broke the invocation contract: {cause}"),
        RequestError::Render(cause) => error!("failed to render handler result: {cause}"),
    }
}

/// Per-request errors are answered 200 `text/plain` with the message and a
/// backtrace in the body: local-development visibility over
/// production-correct status semantics. `strict_status` opts into 500s.
fn error_response(err: &RequestError, settings: &Settings) -> Response<Full<Bytes>> {
    let status = if settings.strict_status {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::OK
    };
    let body = format!("Error: {err}\n{}", Backtrace::force_capture());

    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    response
}
