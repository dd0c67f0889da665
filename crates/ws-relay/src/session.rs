use std::net::SocketAddr;
use std::sync::Arc;

use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use session_log::{Transcript, TranscriptHandle};
use tokio_util::sync::CancellationToken;

use crate::body::{text_response, BoxBody};
use crate::connector::{self, UpstreamSocket};
use crate::listener::ProxyContext;
use crate::probe::{self, VERSION_PATH};
use crate::relay::Relay;
use crate::upgrade::{self, PendingUpgrade};

/// Path prefix of every WebSocket session the proxy relays.
pub const SESSION_PREFIX: &str = "/devtools/";

/// The parts of a session request path the orchestrator needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPath {
    /// Everything before the final segment, e.g. `/devtools/page`.
    pub dir: String,
    /// The final segment, verbatim.
    pub id: String,
}

impl SessionPath {
    /// Split `path` into directory and final segment. Trailing slashes are
    /// ignored.
    pub fn parse(path: &str) -> Self {
        let trimmed = path.trim_end_matches('/');
        match trimmed.rsplit_once('/') {
            Some((dir, id)) => Self {
                dir: if dir.is_empty() { "/".to_string() } else { dir.to_string() },
                id: id.to_string(),
            },
            None => Self {
                dir: "/".to_string(),
                id: trimmed.to_string(),
            },
        }
    }
}

/// Everything established before the `101` response is sent.
struct Prepared {
    upstream: UpstreamSocket,
    pending: PendingUpgrade,
    response: Response<BoxBody>,
}

/// Handle a `/devtools/...` request: probe the browser, dial it, upgrade the
/// client and relay until either side goes away.
///
/// Pre-upgrade failures are answered with `500` and a plain-text reason. On
/// success the `101` response is returned immediately and the relay keeps
/// running in its own task.
pub async fn handle(
    mut req: Request<Incoming>,
    remote_addr: SocketAddr,
    ctx: Arc<ProxyContext>,
) -> Response<BoxBody> {
    let path = SessionPath::parse(req.uri().path());
    let connection_id = uuid::Uuid::new_v4();

    // ------------------------------------------------------------------
    // 1. Open the session transcript; without it the session is refused.
    // ------------------------------------------------------------------
    let (transcript, transcript_handle) =
        match Transcript::open(&ctx.config.transcript, &path.id).await {
            Ok(opened) => opened,
            Err(err) => {
                tracing::error!(
                    %connection_id,
                    %remote_addr,
                    session_id = %path.id,
                    %err,
                    "cannot open session log; refusing session"
                );
                return text_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("could not open session log, got: {err}"),
                );
            }
        };

    transcript
        .marker(format!(
            "---------- connection from {remote_addr} ----------"
        ))
        .await;
    tracing::info!(%connection_id, %remote_addr, session_id = %path.id, "session requested");

    // ------------------------------------------------------------------
    // 2. Probe, dial and validate before answering the handshake.
    // ------------------------------------------------------------------
    match prepare(&mut req, &path, remote_addr, &ctx, &transcript).await {
        Ok(prepared) => {
            // ----------------------------------------------------------
            // 3. Relay in the background; the 101 goes out right away.
            // ----------------------------------------------------------
            tokio::spawn(run(
                prepared.pending,
                prepared.upstream,
                transcript,
                transcript_handle,
                remote_addr,
                connection_id,
            ));
            prepared.response
        }
        Err(message) => {
            tracing::warn!(%connection_id, %remote_addr, %message, "session refused");
            transcript.marker(message.clone()).await;
            drop(transcript);
            transcript_handle.finish().await;
            text_response(StatusCode::INTERNAL_SERVER_ERROR, message)
        }
    }
}

/// Probe, dial and validate the handshake. A failure is returned as the text
/// of the `500` response; the caller writes it to the transcript.
async fn prepare(
    req: &mut Request<Incoming>,
    path: &SessionPath,
    remote_addr: SocketAddr,
    ctx: &ProxyContext,
    transcript: &Transcript,
) -> Result<Prepared, String> {
    let remote = &ctx.config.remote_addr;

    // ------------------------------------------------------------------
    // 1. Check the browser answers /json/version.
    // ------------------------------------------------------------------
    let version = probe::check_version(&ctx.http, remote)
        .await
        .map_err(|err| format!("version error, got: {err}"))?;
    transcript
        .marker(format!(
            "endpoint {remote}{VERSION_PATH} reported: {}",
            String::from_utf8_lossy(&version)
        ))
        .await;

    // ------------------------------------------------------------------
    // 2. Dial the browser's WebSocket for the same session path.
    // ------------------------------------------------------------------
    let endpoint = connector::upstream_endpoint(remote, &path.dir, &path.id);
    transcript.marker(format!("connecting to {endpoint}")).await;
    let mut upstream = connector::connect(&endpoint, &ctx.config.websocket)
        .await
        .map_err(|err| format!("could not connect to {endpoint}, got: {err}"))?;
    transcript.marker(format!("connected to {endpoint}")).await;

    // ------------------------------------------------------------------
    // 3. Validate the client handshake; close the browser side on failure.
    // ------------------------------------------------------------------
    transcript
        .marker(format!("upgrading connection on {remote_addr}"))
        .await;
    match upgrade::prepare(req, &ctx.config.websocket, &ctx.config.origin) {
        Ok((response, pending)) => Ok(Prepared {
            upstream,
            pending,
            response,
        }),
        Err(err) => {
            if let Err(close_err) = upstream.close(None).await {
                tracing::debug!(%close_err, %endpoint, "closing upstream after failed upgrade");
            }
            Err(format!(
                "could not upgrade websocket from {remote_addr}, got: {err}"
            ))
        }
    }
}

/// Wait for the socket hand-over, relay until the first terminal outcome,
/// then tear everything down and release the transcript.
async fn run(
    pending: PendingUpgrade,
    mut upstream: UpstreamSocket,
    transcript: Transcript,
    transcript_handle: TranscriptHandle,
    remote_addr: SocketAddr,
    connection_id: uuid::Uuid,
) {
    let client = match pending.accept().await {
        Ok(client) => client,
        Err(err) => {
            transcript
                .marker(format!(
                    "could not upgrade websocket from {remote_addr}, got: {err}"
                ))
                .await;
            tracing::warn!(%connection_id, %remote_addr, %err, "upgrade hand-over failed");
            if let Err(close_err) = upstream.close(None).await {
                tracing::debug!(%connection_id, %close_err, "closing upstream after failed upgrade");
            }
            drop(transcript);
            transcript_handle.finish().await;
            return;
        }
    };
    transcript
        .marker(format!("upgraded connection on {remote_addr}"))
        .await;
    tracing::info!(%connection_id, %remote_addr, "relay started");

    let cancel = CancellationToken::new();
    let mut relay = Relay::spawn(client, upstream, transcript.clone(), cancel.clone());

    let outcome = relay.first_outcome().await;
    tracing::info!(%connection_id, %remote_addr, %outcome, "relay finished");

    cancel.cancel();
    relay.join().await;

    transcript
        .marker(format!("---------- closing {remote_addr} ----------"))
        .await;
    drop(transcript);
    transcript_handle.finish().await;
}
