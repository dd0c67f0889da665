use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::TranscriptConfig;
use crate::entry::{Direction, TranscriptEntry};
use crate::writer::{TranscriptError, TranscriptWriter};

/// Records queued between producers and the background writer. A full queue
/// holds producers back until the writer catches up.
const CHANNEL_BUFFER: usize = 64;

/// A cheap, cloneable handle used to append records to one session's
/// transcript.
///
/// Records are queued on a bounded channel and a single background task
/// drains them in order, so concurrent producers can never interleave within
/// a line.
#[derive(Clone)]
pub struct Transcript {
    tx: mpsc::Sender<TranscriptEntry>,
}

/// Scoped ownership of a transcript's background writer.
///
/// The writer exits once every [`Transcript`] clone has been dropped.
/// [`finish`](Self::finish) waits for that, guaranteeing every queued record
/// has been written and the targets flushed and closed.
pub struct TranscriptHandle {
    task: JoinHandle<()>,
}

impl Transcript {
    /// Open the transcript for `session_id`: stdout always, plus the file
    /// resolved from `config` unless file output is disabled.
    ///
    /// A file that cannot be opened is a configuration error and is returned
    /// rather than degrading to stdout only.
    pub async fn open(
        config: &TranscriptConfig,
        session_id: &str,
    ) -> Result<(Self, TranscriptHandle), TranscriptError> {
        let mut writer = TranscriptWriter::new().with_stdout();
        if let Some(path) = config.file_path(session_id) {
            writer = writer.with_file(&path).await?;
            tracing::debug!(path = %path.display(), session_id, "transcript file opened");
        }
        Ok(Self::start(writer))
    }

    /// Spawn the background writer task over an already-configured
    /// [`TranscriptWriter`].
    pub fn start(writer: TranscriptWriter) -> (Self, TranscriptHandle) {
        let (tx, rx) = mpsc::channel::<TranscriptEntry>(CHANNEL_BUFFER);
        let task = tokio::spawn(run_writer_loop(writer, rx));
        (Self { tx }, TranscriptHandle { task })
    }

    /// Append a lifecycle marker line.
    pub async fn marker(&self, text: impl Into<String>) {
        self.append(TranscriptEntry::marker(text)).await;
    }

    /// Append a frame record tagged with its direction.
    pub async fn frame(&self, direction: Direction, payload: &[u8]) {
        self.append(TranscriptEntry::frame(direction, payload)).await;
    }

    async fn append(&self, entry: TranscriptEntry) {
        if self.tx.send(entry).await.is_err() {
            tracing::warn!("transcript writer has exited; record dropped");
        }
    }
}

impl TranscriptHandle {
    /// Wait for the writer to drain and release its targets.
    pub async fn finish(self) {
        if let Err(err) = self.task.await {
            tracing::error!(%err, "transcript writer task failed");
        }
    }
}

/// Drain entries until every sender is gone. Targets are flushed each time
/// the queue runs empty and once more on close.
async fn run_writer_loop(mut writer: TranscriptWriter, mut rx: mpsc::Receiver<TranscriptEntry>) {
    while let Some(entry) = rx.recv().await {
        write_entry(&mut writer, &entry).await;
        while let Ok(entry) = rx.try_recv() {
            write_entry(&mut writer, &entry).await;
        }
        if let Err(err) = writer.flush().await {
            tracing::error!(%err, "failed to flush transcript");
        }
    }
    if let Err(err) = writer.flush().await {
        tracing::error!(%err, "failed to flush transcript on close");
    }
    tracing::debug!("transcript writer shutting down");
}

async fn write_entry(writer: &mut TranscriptWriter, entry: &TranscriptEntry) {
    if let Err(err) = writer.write(entry).await {
        tracing::error!(%err, "failed to write transcript record");
    }
}
