use std::fmt;

/// Timestamp layout used at the start of every transcript line.
const TIMESTAMP_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

/// Which way a relayed frame travelled.
///
/// The direction is only ever used to tag transcript lines; the relay never
/// routes on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// DevTools client -> browser
    ClientToServer,
    /// Browser -> DevTools client
    ServerToClient,
}

impl Direction {
    /// The fixed marker written in front of a frame's payload.
    pub fn tag(self) -> &'static str {
        match self {
            Direction::ClientToServer => "<-",
            Direction::ServerToClient => "->",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::ClientToServer => f.write_str("client->server"),
            Direction::ServerToClient => f.write_str("server->client"),
        }
    }
}

/// The content of one transcript line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    /// Lifecycle marker such as "connected to ..." or the session banners.
    Marker(String),
    /// A relayed frame, payload rendered as text.
    Frame { direction: Direction, payload: String },
}

/// A single transcript record stamped with the local time it was observed.
#[derive(Debug, Clone)]
pub struct TranscriptEntry {
    pub timestamp: chrono::DateTime<chrono::Local>,
    pub record: Record,
}

impl TranscriptEntry {
    /// Stamp `record` with the current local time.
    pub fn new(record: Record) -> Self {
        Self {
            timestamp: chrono::Local::now(),
            record,
        }
    }

    /// Build a frame record. Non-UTF-8 payloads are rendered lossily.
    pub fn frame(direction: Direction, payload: &[u8]) -> Self {
        Self::new(Record::Frame {
            direction,
            payload: String::from_utf8_lossy(payload).into_owned(),
        })
    }

    pub fn marker(text: impl Into<String>) -> Self {
        Self::new(Record::Marker(text.into()))
    }

    /// Render the entry as one newline-terminated line.
    pub fn to_line(&self) -> String {
        let ts = self.timestamp.format(TIMESTAMP_FORMAT);
        match &self.record {
            Record::Marker(text) => format!("{ts} {text}\n"),
            Record::Frame { direction, payload } => {
                format!("{ts} {} {payload}\n", direction.tag())
            }
        }
    }
}
