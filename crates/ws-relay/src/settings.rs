use serde::Deserialize;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;

const INCOMING_BUFFER_SIZE: usize = 10 * 1024 * 1024;
const OUTGOING_BUFFER_SIZE: usize = 25 * 1024 * 1024;

/// Buffer configuration shared by the inbound upgrader and the outbound
/// connector.
///
/// Built once at startup and shared read-only by every session. "Incoming"
/// traffic is what the DevTools client sends, "outgoing" is what the browser
/// sends back, so each side reads with one size and writes with the other.
#[derive(Debug, Clone, Deserialize)]
pub struct WsSettings {
    #[serde(default = "default_incoming")]
    pub incoming_buffer_size: usize,
    #[serde(default = "default_outgoing")]
    pub outgoing_buffer_size: usize,
    /// Largest accepted message (and frame). `None` accepts any size.
    #[serde(default)]
    pub max_message_size: Option<usize>,
}

impl Default for WsSettings {
    fn default() -> Self {
        Self {
            incoming_buffer_size: default_incoming(),
            outgoing_buffer_size: default_outgoing(),
            max_message_size: None,
        }
    }
}

impl WsSettings {
    /// Configuration for the client-facing (upgraded) connection.
    pub fn inbound(&self) -> WebSocketConfig {
        self.build(self.incoming_buffer_size, self.outgoing_buffer_size)
    }

    /// Configuration for the browser-facing (dialed) connection.
    pub fn outbound(&self) -> WebSocketConfig {
        self.build(self.outgoing_buffer_size, self.incoming_buffer_size)
    }

    fn build(&self, read: usize, write: usize) -> WebSocketConfig {
        WebSocketConfig::default()
            .read_buffer_size(read)
            .write_buffer_size(write)
            .max_message_size(self.max_message_size)
            .max_frame_size(self.max_message_size)
    }
}

fn default_incoming() -> usize {
    INCOMING_BUFFER_SIZE
}

fn default_outgoing() -> usize {
    OUTGOING_BUFFER_SIZE
}
