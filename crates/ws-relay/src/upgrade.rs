use hyper::header::{self, HeaderMap, HeaderValue};
use hyper::upgrade::{OnUpgrade, Upgraded};
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use thiserror::Error;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::{Role, WebSocketConfig};
use tokio_tungstenite::WebSocketStream;

use crate::body::{empty, BoxBody};
use crate::origin::{OriginPolicy, OriginRejection};
use crate::settings::WsSettings;

/// The client-facing side of a session.
pub type InboundSocket = WebSocketStream<TokioIo<Upgraded>>;

#[derive(Debug, Error)]
pub enum UpgradeError {
    #[error("websocket handshake requires GET, got {0}")]
    Method(Method),
    #[error("'upgrade' token not found in 'Connection' header")]
    ConnectionHeader,
    #[error("'websocket' token not found in 'Upgrade' header")]
    UpgradeHeader,
    #[error("unsupported websocket version")]
    Version,
    #[error("'Sec-WebSocket-Key' header is missing")]
    MissingKey,
    #[error("request origin not allowed: {0}")]
    Origin(#[from] OriginRejection),
    #[error("connection was not handed over after 101: {0}")]
    Upgrade(#[from] hyper::Error),
}

/// An accepted handshake whose socket has not been handed over yet.
///
/// The `101 Switching Protocols` response has to reach the client before the
/// HTTP layer releases the connection, so the WebSocket only becomes
/// available through [`accept`](Self::accept) after the response is returned.
pub struct PendingUpgrade {
    on_upgrade: OnUpgrade,
    config: WebSocketConfig,
}

impl PendingUpgrade {
    pub async fn accept(self) -> Result<InboundSocket, UpgradeError> {
        let upgraded = self.on_upgrade.await?;
        Ok(WebSocketStream::from_raw_socket(
            TokioIo::new(upgraded),
            Role::Server,
            Some(self.config),
        )
        .await)
    }
}

/// Validate `req` as a WebSocket handshake and build the `101` response.
///
/// Nothing is written to the client on error; the caller decides how to
/// answer.
pub fn prepare<B>(
    req: &mut Request<B>,
    settings: &WsSettings,
    origin: &OriginPolicy,
) -> Result<(Response<BoxBody>, PendingUpgrade), UpgradeError> {
    if req.method() != Method::GET {
        return Err(UpgradeError::Method(req.method().clone()));
    }

    let headers = req.headers();
    if !header_has_token(headers, header::CONNECTION, "upgrade") {
        return Err(UpgradeError::ConnectionHeader);
    }
    if !header_has_token(headers, header::UPGRADE, "websocket") {
        return Err(UpgradeError::UpgradeHeader);
    }
    if headers
        .get(header::SEC_WEBSOCKET_VERSION)
        .map(|v| v.as_bytes())
        != Some(b"13".as_slice())
    {
        return Err(UpgradeError::Version);
    }
    let key = headers
        .get(header::SEC_WEBSOCKET_KEY)
        .ok_or(UpgradeError::MissingKey)?;

    let origin_header = headers.get(header::ORIGIN).and_then(|v| v.to_str().ok());
    origin.check(origin_header)?;

    let accept = derive_accept_key(key.as_bytes());
    let mut response = Response::new(empty());
    *response.status_mut() = StatusCode::SWITCHING_PROTOCOLS;
    let response_headers = response.headers_mut();
    response_headers.insert(header::CONNECTION, HeaderValue::from_static("Upgrade"));
    response_headers.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
    response_headers.insert(
        header::SEC_WEBSOCKET_ACCEPT,
        HeaderValue::from_str(&accept).expect("base64 accept key is a valid header value"),
    );

    let pending = PendingUpgrade {
        on_upgrade: hyper::upgrade::on(req),
        config: settings.inbound(),
    };

    Ok((response, pending))
}

/// Whether a comma-separated header contains `token` (case-insensitive).
fn header_has_token(headers: &HeaderMap, name: header::HeaderName, token: &str) -> bool {
    headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|t| t.trim().eq_ignore_ascii_case(token))
}
