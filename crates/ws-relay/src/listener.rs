use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use session_log::TranscriptConfig;
use tokio::net::{TcpListener, TcpStream};

use crate::body::BoxBody;
use crate::origin::OriginPolicy;
use crate::passthrough;
use crate::session::{self, SESSION_PREFIX};
use crate::settings::WsSettings;

/// Configuration for the DevTools proxy.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Address to bind the listening socket to, e.g. `localhost:9223`.
    pub listen_addr: String,
    /// `host:port` of the real DevTools endpoint, e.g. `localhost:9222`.
    pub remote_addr: String,
    /// Buffer sizes for both sides of every session.
    pub websocket: WsSettings,
    /// Which `Origin` headers inbound handshakes may carry.
    pub origin: OriginPolicy,
    /// Where session transcripts are written.
    pub transcript: TranscriptConfig,
}

/// State shared read-only by every connection.
pub struct ProxyContext {
    pub config: ProxyConfig,
    pub http: reqwest::Client,
}

/// The DevTools proxy server.
///
/// Serves HTTP/1.1 on the listening address. `/devtools/...` WebSocket
/// handshakes become relayed sessions; every other request is passed through
/// to the remote endpoint unchanged.
pub struct Proxy {
    ctx: Arc<ProxyContext>,
}

impl Proxy {
    pub fn new(config: ProxyConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            ctx: Arc::new(ProxyContext { config, http }),
        })
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.ctx.config
    }

    /// Bind to `listen_addr` and serve forever.
    pub async fn run(&self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(&self.ctx.config.listen_addr)
            .await
            .with_context(|| format!("failed to bind {}", self.ctx.config.listen_addr))?;
        self.serve(listener).await
    }

    /// Serve connections from an already-bound listener. Each connection is
    /// handled in its own Tokio task.
    pub async fn serve(&self, listener: TcpListener) -> anyhow::Result<()> {
        tracing::info!(
            addr = %listener.local_addr()?,
            remote = %self.ctx.config.remote_addr,
            "cdp proxy listening"
        );

        loop {
            let (stream, remote_addr) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(err) => {
                    tracing::error!(%err, "failed to accept connection");
                    continue;
                }
            };
            let ctx = Arc::clone(&self.ctx);

            tokio::spawn(async move {
                if let Err(err) = handle_connection(stream, remote_addr, ctx).await {
                    tracing::debug!(%remote_addr, %err, "connection handler error");
                }
            });
        }
    }
}

/// Serve HTTP on one accepted connection, keeping upgrades enabled so a
/// session handshake can take the socket over.
async fn handle_connection(
    stream: TcpStream,
    remote_addr: SocketAddr,
    ctx: Arc<ProxyContext>,
) -> Result<(), hyper::Error> {
    let service = service_fn(move |req| {
        let ctx = Arc::clone(&ctx);
        async move { Ok::<_, Infallible>(route(req, remote_addr, ctx).await) }
    });

    http1::Builder::new()
        .serve_connection(TokioIo::new(stream), service)
        .with_upgrades()
        .await
}

async fn route(
    req: Request<Incoming>,
    remote_addr: SocketAddr,
    ctx: Arc<ProxyContext>,
) -> Response<BoxBody> {
    if req.uri().path().starts_with(SESSION_PREFIX) {
        session::handle(req, remote_addr, ctx).await
    } else {
        passthrough::forward(req, &ctx.http, &ctx.config.remote_addr).await
    }
}
