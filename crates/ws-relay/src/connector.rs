use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::settings::WsSettings;

/// The browser-facing side of a session.
pub type UpstreamSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Dial the real DevTools endpoint.
pub async fn connect(
    endpoint: &str,
    settings: &WsSettings,
) -> Result<UpstreamSocket, tungstenite::Error> {
    let (socket, response) =
        tokio_tungstenite::connect_async_with_config(endpoint, Some(settings.outbound()), true)
            .await?;
    tracing::debug!(%endpoint, status = %response.status(), "upstream handshake complete");
    Ok(socket)
}

/// Build the browser-side URL for a session: the remote host plus the
/// directory portion of the request path, with `id` as the final segment.
pub fn upstream_endpoint(remote: &str, dir: &str, id: &str) -> String {
    let dir = dir.trim_end_matches('/');
    format!("ws://{remote}{dir}/{id}")
}
