//! lambda-dev-server CLI: the thin argument/config collaborator around the
//! core server.

use clap::Parser;
use lambda_dev_server::prelude::*;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Serve a serverless-style handler locally over plain HTTP.
#[derive(Parser, Debug)]
#[command(name = "lambda-dev-server", version, about)]
struct Cli {
    /// Path to the handler library (resolved against --root when relative)
    #[arg(long)]
    handler: PathBuf,

    /// Port to listen on (defaults to LDS_DEFAULT_PORT, then 8080)
    #[arg(long)]
    port: Option<u16>,

    /// Directory relative handler paths resolve against (defaults to the
    /// working directory)
    #[arg(long)]
    root: Option<PathBuf>,

    /// Absolute path to a .env-style file applied before startup
    #[arg(long)]
    env: Option<PathBuf>,

    /// Close the server after this many requests
    #[arg(long)]
    max: Option<u64>,

    /// Reload the handler on each request (default: true)
    #[arg(long)]
    reload: Option<bool>,

    /// Inject Access-Control-Allow-Origin: * when the handler doesn't set it
    #[arg(long)]
    cors: bool,

    /// Verbose per-request logging
    #[arg(long)]
    debug: bool,

    /// Answer per-request errors with 500 instead of the dev-friendly 200
    #[arg(long)]
    strict_status: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = Cli::parse();

    let default_filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    tracing::info!("starting lambda-dev-server");

    let mut config = ServerConfig::new()
        .handler(HandlerRef::path(cli.handler))
        .cors(cli.cors)
        .debug(cli.debug)
        .strict_status(cli.strict_status);
    if let Some(port) = cli.port {
        config = config.port(port);
    }
    if let Some(root) = cli.root {
        config = config.root(root);
    }
    if let Some(env) = cli.env {
        config = config.env(EnvSource::File(env));
    }
    if let Some(max) = cli.max {
        config = config.max_requests(max);
    }
    if let Some(reload) = cli.reload {
        config = config.reload(reload);
    }

    let server = DevServer::bind(config).await?;
    tracing::info!("server is ready at http://{}", server.local_addr());
    server.serve().await?;
    Ok(())
}
