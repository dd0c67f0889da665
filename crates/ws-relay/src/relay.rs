use std::fmt;
use std::time::Duration;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use session_log::{Direction, Transcript};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_util::sync::CancellationToken;

/// Upper bound on the courtesy close sent to a peer during teardown.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Why a relay stopped. Only the first outcome of a session is acted upon.
#[derive(Debug)]
pub enum RelayOutcome {
    /// The source side of `direction` closed (Close frame or end of stream).
    Closed { direction: Direction },
    /// Reading from the source side of `direction` failed.
    ReadFailed { direction: Direction, error: WsError },
    /// Writing to the destination side of `direction` failed.
    WriteFailed { direction: Direction, error: WsError },
    /// Both flows were cancelled before either reported anything.
    Cancelled,
}

impl RelayOutcome {
    pub fn direction(&self) -> Option<Direction> {
        match self {
            RelayOutcome::Closed { direction }
            | RelayOutcome::ReadFailed { direction, .. }
            | RelayOutcome::WriteFailed { direction, .. } => Some(*direction),
            RelayOutcome::Cancelled => None,
        }
    }
}

impl fmt::Display for RelayOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayOutcome::Closed { direction } => write!(f, "{direction}: source closed"),
            RelayOutcome::ReadFailed { direction, error } => {
                write!(f, "{direction}: read failed: {error}")
            }
            RelayOutcome::WriteFailed { direction, error } => {
                write!(f, "{direction}: write failed: {error}")
            }
            RelayOutcome::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// A running bidirectional relay between a DevTools client and a browser.
///
/// Two flows run as separate tasks, one per direction. Each reports at most
/// one [`RelayOutcome`]; [`first_outcome`](Self::first_outcome) yields the
/// earliest and any later one is discarded. Once the session's cancellation
/// token fires, both flows stop, close the connection they write to, and
/// drop their halves so the underlying sockets are released.
pub struct Relay {
    outcomes: mpsc::Receiver<RelayOutcome>,
    flows: [JoinHandle<()>; 2],
}

impl Relay {
    pub fn spawn<C, S>(
        client: C,
        server: S,
        transcript: Transcript,
        cancel: CancellationToken,
    ) -> Self
    where
        C: Stream<Item = Result<Message, WsError>> + Sink<Message, Error = WsError> + Send + 'static,
        S: Stream<Item = Result<Message, WsError>> + Sink<Message, Error = WsError> + Send + 'static,
    {
        let (client_write, client_read) = client.split();
        let (server_write, server_read) = server.split();

        // Room for both outcomes so neither flow ever waits on reporting.
        let (tx, rx) = mpsc::channel(2);

        let up = tokio::spawn(forward(
            client_read,
            server_write,
            Direction::ClientToServer,
            transcript.clone(),
            cancel.clone(),
            tx.clone(),
        ));
        let down = tokio::spawn(forward(
            server_read,
            client_write,
            Direction::ServerToClient,
            transcript,
            cancel,
            tx,
        ));

        Self {
            outcomes: rx,
            flows: [up, down],
        }
    }

    /// Wait for the first terminal outcome from either flow.
    pub async fn first_outcome(&mut self) -> RelayOutcome {
        self.outcomes.recv().await.unwrap_or(RelayOutcome::Cancelled)
    }

    /// Wait until both flows have stopped and released their connections.
    ///
    /// Only returns once the session's cancellation token has been cancelled
    /// or both sides have ended on their own.
    pub async fn join(self) {
        for flow in self.flows {
            if let Err(err) = flow.await {
                tracing::error!(%err, "relay flow panicked");
            }
        }
    }
}

/// Forward frames from `reader` to `writer` until the source ends, an I/O
/// error occurs, or `cancel` fires.
async fn forward<R, W>(
    mut reader: R,
    mut writer: W,
    direction: Direction,
    transcript: Transcript,
    cancel: CancellationToken,
    outcomes: mpsc::Sender<RelayOutcome>,
) where
    R: Stream<Item = Result<Message, WsError>> + Unpin,
    W: Sink<Message, Error = WsError> + Unpin,
{
    let outcome = loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break None,
            next = reader.next() => next,
        };

        let msg = match next {
            Some(Ok(msg)) => msg,
            Some(Err(error)) => break Some(RelayOutcome::ReadFailed { direction, error }),
            None => break Some(RelayOutcome::Closed { direction }),
        };

        match &msg {
            Message::Text(text) => transcript.frame(direction, text.as_bytes()).await,
            Message::Binary(data) => transcript.frame(direction, data).await,
            Message::Close(frame) => {
                tracing::debug!(%direction, ?frame, "close frame received");
                break Some(RelayOutcome::Closed { direction });
            }
            // Control frames are answered by each connection itself.
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
        }

        // A logged frame is always delivered or reported as a write failure.
        if let Err(error) = writer.send(msg).await {
            break Some(RelayOutcome::WriteFailed { direction, error });
        }
    };

    if let Some(outcome) = outcome {
        tracing::debug!(%direction, %outcome, "relay flow stopped");
        let _ = outcomes.try_send(outcome);
    }

    match tokio::time::timeout(CLOSE_TIMEOUT, writer.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => tracing::trace!(%direction, %err, "close after relay failed"),
        Err(_) => tracing::debug!(%direction, "timed out closing destination"),
    }
}
