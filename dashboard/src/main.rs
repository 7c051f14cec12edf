mod request;
mod routes;

use anyhow::Result;
use std::path::PathBuf;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_ADDR: &str = "0.0.0.0:5000";
const DEFAULT_DATABASE: &str = "iow.db";

/// Largest request head we are willing to buffer
const MAX_HEAD: usize = 8 * 1024;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let mut args = std::env::args().skip(1);
    let database = args
        .next()
        .or_else(|| std::env::var("IOW_DATABASE").ok())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATABASE));
    let addr = args
        .next()
        .or_else(|| std::env::var("IOW_DASHBOARD_ADDR").ok())
        .unwrap_or_else(|| DEFAULT_ADDR.to_string());

    let listener = TcpListener::bind(&addr).await?;
    info!("Dashboard listening on {}", addr);
    info!("  Database: {}", database.display());

    loop {
        let (socket, peer) = listener.accept().await?;
        debug!("Connection from: {}", peer);

        let database = database.clone();
        tokio::spawn(async move {
            if let Err(e) = serve(socket, database).await {
                warn!("Request from {} failed: {}", peer, e);
            }
        });
    }
}

async fn serve(mut socket: TcpStream, database: PathBuf) -> Result<()> {
    let mut head = Vec::with_capacity(1024);
    let mut buf = [0u8; 1024];

    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        if head.len() > MAX_HEAD {
            anyhow::bail!("request head larger than {} bytes", MAX_HEAD);
        }
        let n = socket.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        head.extend_from_slice(&buf[..n]);
    }

    let head = String::from_utf8_lossy(&head);
    let response = match request::parse_request_line(&head) {
        Some(request) => {
            debug!(method = %request.method, path = %request.path, "Request");
            routes::route(request, database).await
        }
        None => routes::Response::not_found(),
    };

    socket.write_all(&response.to_bytes()).await?;
    socket.shutdown().await?;
    Ok(())
}
