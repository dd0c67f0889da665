use std::path::{Path, PathBuf};

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::entry::TranscriptEntry;

/// Errors that can occur while opening or writing a session transcript.
#[derive(Debug, thiserror::Error)]
pub enum TranscriptError {
    #[error("failed to create log directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to open log file {path}: {source}")]
    OpenFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write transcript record: {0}")]
    Write(std::io::Error),

    #[error("failed to flush transcript: {0}")]
    Flush(std::io::Error),
}

type Target = Box<dyn AsyncWrite + Send + Unpin>;

/// Fan-out writer that appends each [`TranscriptEntry`] as one line to every
/// configured target.
///
/// Each line is handed to a target in a single `write_all`.
pub struct TranscriptWriter {
    targets: Vec<Target>,
}

impl TranscriptWriter {
    pub fn new() -> Self {
        Self {
            targets: Vec::new(),
        }
    }

    /// Add an arbitrary output target.
    pub fn with_target(mut self, target: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        self.targets.push(Box::new(target));
        self
    }

    /// Add standard output as a target.
    pub fn with_stdout(self) -> Self {
        self.with_target(tokio::io::stdout())
    }

    /// Open (or create) `path` in append mode and add it as a target.
    ///
    /// Parent directories are created if they do not exist.
    pub async fn with_file(self, path: impl AsRef<Path>) -> Result<Self, TranscriptError> {
        let file = open_append(path.as_ref()).await?;
        Ok(self.with_target(file))
    }

    /// Append `entry` to every target.
    ///
    /// All targets are attempted; the first error encountered is returned.
    pub async fn write(&mut self, entry: &TranscriptEntry) -> Result<(), TranscriptError> {
        let line = entry.to_line();
        let mut result = Ok(());

        for target in &mut self.targets {
            if let Err(err) = target.write_all(line.as_bytes()).await {
                if result.is_ok() {
                    result = Err(TranscriptError::Write(err));
                }
            }
        }

        result
    }

    pub async fn flush(&mut self) -> Result<(), TranscriptError> {
        for target in &mut self.targets {
            target.flush().await.map_err(TranscriptError::Flush)?;
        }
        Ok(())
    }
}

impl Default for TranscriptWriter {
    fn default() -> Self {
        Self::new()
    }
}

async fn open_append(path: &Path) -> Result<tokio::fs::File, TranscriptError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| TranscriptError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
    }

    tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|source| TranscriptError::OpenFile {
            path: path.to_path_buf(),
            source,
        })
}
