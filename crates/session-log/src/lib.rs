//! Append-only per-session transcripts for the DevTools relay.
//!
//! Every relayed WebSocket frame and every session lifecycle event is written
//! as one timestamped line to standard output and, unless disabled, to a
//! per-session log file whose name is derived from a template.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use session_log::{Direction, Transcript, TranscriptConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let (transcript, handle) = Transcript::open(&TranscriptConfig::default(), "E3F1A0B2").await?;
//!
//! transcript.marker("---------- connection from 127.0.0.1:50123 ----------").await;
//! transcript.frame(Direction::ClientToServer, br#"{"id":1,"method":"Page.enable"}"#).await;
//!
//! drop(transcript);
//! handle.finish().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod entry;
pub mod sink;
pub mod writer;

pub use config::{sanitize_session_id, TranscriptConfig};
pub use entry::{Direction, Record, TranscriptEntry};
pub use sink::{Transcript, TranscriptHandle};
pub use writer::{TranscriptError, TranscriptWriter};
