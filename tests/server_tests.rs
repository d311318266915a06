//! End-to-end tests driving a bound server over real HTTP connections,
//! the way the server is used from a shell: raw requests in, raw
//! responses out.

use http_body_util::{BodyExt, Empty};
use hyper::body::Bytes;
use hyper::header::HeaderMap;
use hyper::{Request, StatusCode};
use hyper_util::rt::TokioIo;
use lambda_dev_server::handler::ResolveError;
use lambda_dev_server::prelude::*;
use lambda_dev_server::runtime::{ConfigError, StartupError};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;

type ServeTask = tokio::task::JoinHandle<std::io::Result<()>>;

async fn spawn_server(config: ServerConfig) -> (SocketAddr, ServerHandle, ServeTask) {
    let server = DevServer::bind(config.port(0)).await.expect("bind server");
    let addr = server.local_addr();
    let handle = server.handle();
    let task = tokio::spawn(server.serve());
    (addr, handle, task)
}

/// Bare HTTP/1.1 GET against the server, no redirect following.
async fn get(
    addr: SocketAddr,
    target: &str,
) -> Result<(StatusCode, HeaderMap, String), Box<dyn std::error::Error + Send + Sync>> {
    let stream = TcpStream::connect(addr).await?;
    let io = TokioIo::new(stream);
    let (mut sender, connection) = hyper::client::conn::http1::handshake(io).await?;
    tokio::spawn(connection);

    let request = Request::builder()
        .uri(target)
        .header(hyper::header::HOST, "localhost")
        .body(Empty::<Bytes>::new())?;
    let response = sender.send_request(request).await?;
    let (parts, body) = response.into_parts();
    let bytes = body.collect().await?.to_bytes();
    Ok((
        parts.status,
        parts.headers,
        String::from_utf8_lossy(&bytes).into_owned(),
    ))
}

fn hello_handler() -> HandlerRef {
    HandlerRef::callable_fn(
        |event: InvocationEvent, _ctx: InvocationContext| async move {
            let name = event.param("name").unwrap_or("world").to_string();
            Ok::<_, HandlerError>(InvocationResult::text(format!("hello, {name}")))
        },
    )
}

async fn finished(task: ServeTask) {
    timeout(Duration::from_secs(5), task)
        .await
        .expect("server did not close in time")
        .expect("server task panicked")
        .expect("server returned an error");
}

#[tokio::test]
async fn serves_hello_world() {
    let config = ServerConfig::new().handler(hello_handler()).max_requests(2);
    let (addr, _handle, task) = spawn_server(config).await;

    let (status, _, body) = get(addr, "/").await.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "hello, world");

    let (_, _, body) = get(addr, "/?name=Daniel").await.unwrap();
    assert_eq!(body, "hello, Daniel");

    finished(task).await;
}

#[tokio::test]
async fn missing_content_type_defaults_to_json() {
    let handler = HandlerRef::callable_fn(
        |_event: InvocationEvent, _ctx: InvocationContext| async move {
            Ok::<_, HandlerError>(InvocationResult::new().body(r#"{"ok":true}"#))
        },
    );
    let config = ServerConfig::new().handler(handler).max_requests(1);
    let (addr, _handle, task) = spawn_server(config).await;

    let (_, headers, body) = get(addr, "/").await.unwrap();
    assert_eq!(headers["content-type"], "application/json");
    assert_eq!(body, r#"{"ok":true}"#);

    finished(task).await;
}

#[tokio::test]
async fn handler_errors_are_captured_in_the_body() {
    let handler = HandlerRef::callable_fn(
        |_event: InvocationEvent, _ctx: InvocationContext| async move {
            Err::<InvocationResult, _>(HandlerError::new("uh oh"))
        },
    );
    let config = ServerConfig::new().handler(handler).max_requests(1);
    let (addr, _handle, task) = spawn_server(config).await;

    let (status, headers, body) = get(addr, "/").await.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers["content-type"], "text/plain");
    assert!(body.starts_with("Error: uh oh"), "body was: {body}");

    finished(task).await;
}

#[tokio::test]
async fn missing_body_is_reported_as_a_contract_violation() {
    let handler = HandlerRef::callable_fn(
        |_event: InvocationEvent, _ctx: InvocationContext| async move {
            Ok::<_, HandlerError>(InvocationResult::new())
        },
    );
    let config = ServerConfig::new().handler(handler).max_requests(1);
    let (addr, _handle, task) = spawn_server(config).await;

    let (status, _, body) = get(addr, "/").await.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert!(body.starts_with("Error: handler returned no body"), "body was: {body}");

    finished(task).await;
}

#[tokio::test]
async fn strict_status_maps_errors_to_500() {
    let handler = HandlerRef::callable_fn(
        |_event: InvocationEvent, _ctx: InvocationContext| async move {
            Err::<InvocationResult, _>(HandlerError::new("uh oh"))
        },
    );
    let config = ServerConfig::new()
        .handler(handler)
        .strict_status(true)
        .max_requests(1);
    let (addr, _handle, task) = spawn_server(config).await;

    let (status, _, body) = get(addr, "/").await.unwrap();
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body.starts_with("Error: uh oh"));

    finished(task).await;
}

#[tokio::test]
async fn callable_handler_state_persists_across_requests() {
    let counter = Arc::new(AtomicU64::new(0));
    let handler = HandlerRef::callable_fn({
        let counter = Arc::clone(&counter);
        move |_event: InvocationEvent, _ctx: InvocationContext| {
            let counter = Arc::clone(&counter);
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                Ok::<_, HandlerError>(InvocationResult::text(n.to_string()))
            }
        }
    });
    let config = ServerConfig::new().handler(handler).max_requests(5);
    let (addr, _handle, task) = spawn_server(config).await;

    for expected in 1..=5u64 {
        let (_, _, body) = get(addr, "/").await.unwrap();
        assert_eq!(body, expected.to_string());
    }

    finished(task).await;
}

/// Loader standing in for on-disk handler code: each load hands out a
/// counting handler with fresh module state.
struct CountingModuleLoader {
    loads: Arc<AtomicU64>,
}

impl HandlerLoader for CountingModuleLoader {
    fn load(&self, _path: &Path) -> Result<Arc<dyn Handler>, ResolveError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let module_state = Arc::new(AtomicU64::new(0));
        Ok(Arc::new(handler_fn(
            move |_event: InvocationEvent, _ctx: InvocationContext| {
                let module_state = Arc::clone(&module_state);
                async move {
                    let n = module_state.fetch_add(1, Ordering::SeqCst) + 1;
                    Ok::<_, HandlerError>(InvocationResult::text(n.to_string()))
                }
            },
        )))
    }
}

#[tokio::test]
async fn reload_resets_module_state_every_request() {
    let loads = Arc::new(AtomicU64::new(0));
    let loader = CountingModuleLoader {
        loads: Arc::clone(&loads),
    };
    // path handlers reload by default
    let config = ServerConfig::new()
        .handler(HandlerRef::path("/srv/counting-handler.so"))
        .max_requests(4)
        .port(0);
    let server = DevServer::bind_with_loader(config, Box::new(loader))
        .await
        .unwrap();
    let addr = server.local_addr();
    let task = tokio::spawn(server.serve());

    for _ in 0..4 {
        let (_, _, body) = get(addr, "/").await.unwrap();
        assert_eq!(body, "1");
    }
    assert_eq!(loads.load(Ordering::SeqCst), 4);

    finished(task).await;
}

#[tokio::test]
async fn no_reload_keeps_module_state() {
    let loads = Arc::new(AtomicU64::new(0));
    let loader = CountingModuleLoader {
        loads: Arc::clone(&loads),
    };
    let config = ServerConfig::new()
        .handler(HandlerRef::path("/srv/counting-handler.so"))
        .reload(false)
        .max_requests(4)
        .port(0);
    let server = DevServer::bind_with_loader(config, Box::new(loader))
        .await
        .unwrap();
    let addr = server.local_addr();
    let task = tokio::spawn(server.serve());

    for expected in 1..=4u64 {
        let (_, _, body) = get(addr, "/").await.unwrap();
        assert_eq!(body, expected.to_string());
    }
    assert_eq!(loads.load(Ordering::SeqCst), 1);

    finished(task).await;
}

#[tokio::test]
async fn reload_with_callable_is_rejected_at_startup() {
    let config = ServerConfig::new()
        .handler(hello_handler())
        .reload(true)
        .port(0);
    let err = DevServer::bind(config).await.unwrap_err();
    assert!(matches!(
        err,
        StartupError::Config(ConfigError::ReloadWithCallable)
    ));
}

#[tokio::test]
async fn cors_header_is_injected_when_enabled() {
    let config = ServerConfig::new()
        .handler(hello_handler())
        .cors(true)
        .max_requests(1);
    let (addr, _handle, task) = spawn_server(config).await;

    let (_, headers, _) = get(addr, "/").await.unwrap();
    assert_eq!(headers["access-control-allow-origin"], "*");

    finished(task).await;
}

#[tokio::test]
async fn explicit_cors_header_wins_over_injection() {
    let handler = HandlerRef::callable_fn(
        |_event: InvocationEvent, _ctx: InvocationContext| async move {
            Ok::<_, HandlerError>(
                InvocationResult::text("hi")
                    .header("Access-Control-Allow-Origin", "https://example.com"),
            )
        },
    );
    let config = ServerConfig::new()
        .handler(handler)
        .cors(true)
        .max_requests(1);
    let (addr, _handle, task) = spawn_server(config).await;

    let (_, headers, _) = get(addr, "/").await.unwrap();
    assert_eq!(headers["access-control-allow-origin"], "https://example.com");

    finished(task).await;
}

#[tokio::test]
async fn env_file_values_reach_the_handler() {
    let dir = tempfile::tempdir().unwrap();
    let env_path = dir.path().join("test.env");
    std::fs::write(
        &env_path,
        "# region used by the handler below\nAWS_REGION=us-east-1\n",
    )
    .unwrap();

    let handler = HandlerRef::callable_fn(
        |_event: InvocationEvent, _ctx: InvocationContext| async move {
            Ok::<_, HandlerError>(InvocationResult::text(
                std::env::var("AWS_REGION").unwrap_or_default(),
            ))
        },
    );
    let config = ServerConfig::new()
        .handler(handler)
        .env(EnvSource::File(env_path))
        .max_requests(1);
    let (addr, _handle, task) = spawn_server(config).await;

    let (_, _, body) = get(addr, "/").await.unwrap();
    assert_eq!(body, "us-east-1");

    finished(task).await;
}

#[tokio::test]
async fn relative_env_path_is_rejected_at_startup() {
    let config = ServerConfig::new()
        .handler(hello_handler())
        .env(EnvSource::File("relative.env".into()))
        .port(0);
    let err = DevServer::bind(config).await.unwrap_err();
    assert!(matches!(
        err,
        StartupError::Config(ConfigError::RelativeEnvPath(_))
    ));
}

#[tokio::test]
async fn listener_closes_after_max_requests() {
    let config = ServerConfig::new().handler(hello_handler()).max_requests(2);
    let (addr, _handle, task) = spawn_server(config).await;

    get(addr, "/").await.unwrap();
    get(addr, "/").await.unwrap();
    finished(task).await;

    // the socket is closed, further connection attempts fail
    assert!(get(addr, "/").await.is_err());
}

#[tokio::test]
async fn non_root_paths_redirect_to_root_preserving_the_query() {
    let config = ServerConfig::new().handler(hello_handler()).max_requests(1);
    let (addr, _handle, task) = spawn_server(config).await;

    let (status, headers, _) = get(addr, "/some/other/path?x=1").await.unwrap();
    assert_eq!(status, StatusCode::FOUND);
    assert_eq!(headers["location"], "/?x=1");

    // the redirect counted toward the maximum
    finished(task).await;
}

#[tokio::test]
async fn favicon_probes_get_no_response_and_are_not_counted() {
    let config = ServerConfig::new().handler(hello_handler()).max_requests(1);
    let (addr, _handle, task) = spawn_server(config).await;

    // the connection ends without a response
    assert!(get(addr, "/favicon.ico").await.is_err());

    // the probe did not consume the single allowed request
    let (_, _, body) = get(addr, "/").await.unwrap();
    assert_eq!(body, "hello, world");

    finished(task).await;
}

#[tokio::test]
async fn base64_bodies_are_decoded_on_the_wire() {
    let handler = HandlerRef::callable_fn(
        |_event: InvocationEvent, _ctx: InvocationContext| async move {
            Ok::<_, HandlerError>(
                InvocationResult::new()
                    .header("Content-Type", "application/octet-stream")
                    .base64_body(b"binary hello"),
            )
        },
    );
    let config = ServerConfig::new().handler(handler).max_requests(1);
    let (addr, _handle, task) = spawn_server(config).await;

    let (_, _, body) = get(addr, "/").await.unwrap();
    assert_eq!(body, "binary hello");

    finished(task).await;
}

#[tokio::test]
async fn missing_handler_library_surfaces_as_a_resolution_error() {
    let config = ServerConfig::new()
        .handler(HandlerRef::path("/nonexistent/handler.so"))
        .max_requests(1);
    let (addr, _handle, task) = spawn_server(config).await;

    let (status, _, body) = get(addr, "/").await.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert!(
        body.starts_with("Error: failed to load handler"),
        "body was: {body}"
    );

    finished(task).await;
}

#[tokio::test]
async fn handle_closes_the_server_out_of_band() {
    let config = ServerConfig::new().handler(hello_handler());
    let (addr, handle, task) = spawn_server(config).await;

    let (_, _, body) = get(addr, "/").await.unwrap();
    assert_eq!(body, "hello, world");

    handle.close();
    finished(task).await;
    assert!(get(addr, "/").await.is_err());
}

#[tokio::test]
async fn servers_are_independent_instances() {
    let first = ServerConfig::new().handler(hello_handler());
    let (first_addr, first_handle, first_task) = spawn_server(first).await;

    let second_handler = HandlerRef::callable_fn(
        |_event: InvocationEvent, _ctx: InvocationContext| async move {
            Ok::<_, HandlerError>(InvocationResult::text("second"))
        },
    );
    let second = ServerConfig::new().handler(second_handler);
    let (second_addr, second_handle, second_task) = spawn_server(second).await;

    first_handle.close();
    finished(first_task).await;

    // closing one server leaves the other serving
    let (_, _, body) = get(second_addr, "/").await.unwrap();
    assert_eq!(body, "second");
    assert!(get(first_addr, "/").await.is_err());

    second_handle.close();
    finished(second_task).await;
}
