//! Recording WebSocket relay for the Chrome DevTools Protocol.
//!
//! This crate implements a transparent proxy that sits between a DevTools
//! client (a browser-automation driver, the DevTools frontend, ...) and a
//! browser's DevTools endpoint. Every WebSocket frame is forwarded unchanged
//! in both directions and recorded, tagged with its direction, in a
//! per-session transcript.
//!
//! # Architecture
//!
//! ```text
//! Client  <--WS-->  ws-relay  <--WS-->  Browser
//!                      |
//!                 [Transcript]
//! ```
//!
//! For each `/devtools/...` request the proxy probes the browser's
//! `/json/version`, dials the matching browser WebSocket, upgrades the client
//! connection, and runs two concurrent forwarding flows until either side
//! fails or closes. All other HTTP requests are passed straight through.

pub mod body;
pub mod connector;
pub mod listener;
pub mod origin;
pub mod passthrough;
pub mod probe;
pub mod relay;
pub mod session;
pub mod settings;
pub mod upgrade;

// Re-export the primary public types at the crate root for convenience.
pub use listener::{Proxy, ProxyConfig};
pub use origin::OriginPolicy;
pub use relay::{Relay, RelayOutcome};
pub use session_log::{Direction, TranscriptConfig};
pub use settings::WsSettings;
