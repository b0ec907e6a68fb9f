//! Scoped byte sink for downloaded content.
//!
//! A [`Writer`] owns the destination for one download attempt: a file on
//! disk or a growable in-memory buffer. Every appended chunk is first fed
//! through the registered validators in registration order, then written to
//! the sink. The download opens the writer before sending and closes it on
//! every exit path, success or failure.

use std::path::PathBuf;

use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::error::DownloadError;
use super::validation::Validation;

/// Where downloaded bytes end up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// Write to a file, creating the parent directory tree as needed.
    File(PathBuf),
    /// Collect into an in-memory buffer.
    Memory,
}

#[derive(Debug)]
enum Sink {
    File(Option<File>),
    Memory(Vec<u8>),
}

/// Scoped sink streaming each chunk through the registered validators.
#[derive(Debug)]
pub struct Writer {
    destination: Destination,
    sink: Sink,
    opened: bool,
    closed: bool,
    validations: Vec<Validation>,
}

impl Writer {
    /// Creates a writer for the destination, taking ownership of the
    /// validators for the duration of the attempt.
    #[must_use]
    pub fn new(destination: Destination, validations: Vec<Validation>) -> Self {
        let sink = match &destination {
            Destination::File(_) => Sink::File(None),
            Destination::Memory => Sink::Memory(Vec::new()),
        };
        Self {
            destination,
            sink,
            opened: false,
            closed: false,
            validations,
        }
    }

    /// Opens the sink. Idempotent.
    ///
    /// The file-backed variant creates the parent directory tree (an already
    /// existing directory is fine, any other OS failure propagates) and then
    /// opens the destination for writing, truncating a partial left by an
    /// earlier attempt. Validator state from an earlier attempt is cleared.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::Io`] when the directory tree or the file
    /// cannot be created.
    pub async fn open(&mut self) -> Result<(), DownloadError> {
        if self.opened {
            return Ok(());
        }
        for validation in &mut self.validations {
            validation.reset();
        }
        if let Destination::File(path) = &self.destination {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)
                    .await
                    .map_err(|e| DownloadError::io(parent, e))?;
            }
            let file = File::create(path)
                .await
                .map_err(|e| DownloadError::io(path.clone(), e))?;
            if let Sink::File(handle) = &mut self.sink {
                *handle = Some(file);
            }
            debug!(path = %path.display(), "writer opened");
        }
        self.opened = true;
        Ok(())
    }

    /// Appends a chunk, feeding it to every validator's update in
    /// registration order before writing to the sink.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::Io`] when the writer is not open or the
    /// write fails.
    pub async fn append(&mut self, data: &[u8]) -> Result<usize, DownloadError> {
        let path = self.path();
        if !self.opened || self.closed {
            return Err(DownloadError::io(
                path,
                std::io::Error::other("writer is not open"),
            ));
        }
        for validation in &mut self.validations {
            validation.update(data);
        }
        match &mut self.sink {
            Sink::File(Some(file)) => {
                file.write_all(data)
                    .await
                    .map_err(|e| DownloadError::io(path, e))?;
            }
            Sink::File(None) => {
                return Err(DownloadError::io(
                    path,
                    std::io::Error::other("writer is not open"),
                ));
            }
            Sink::Memory(buffer) => buffer.extend_from_slice(data),
        }
        Ok(data.len())
    }

    /// Releases the sink. Idempotent.
    ///
    /// Secondary failures (a flush that fails while tearing down) are logged
    /// rather than returned so a primary error from the attempt is never
    /// masked.
    pub async fn close(&mut self) {
        if !self.opened || self.closed {
            return;
        }
        self.closed = true;
        let path = self.path();
        if let Sink::File(handle) = &mut self.sink {
            if let Some(mut file) = handle.take() {
                if let Err(error) = file.flush().await {
                    warn!(path = %path.display(), %error, "flush failed while closing writer");
                }
            }
        }
    }

    /// Removes a partially written file. No-op for in-memory sinks.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::Io`] when the file exists but cannot be
    /// removed.
    pub async fn discard(&mut self) -> Result<(), DownloadError> {
        self.close().await;
        if let Destination::File(path) = &self.destination {
            match fs::remove_file(path).await {
                Ok(()) => debug!(path = %path.display(), "partial download discarded"),
                Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
                Err(error) => return Err(DownloadError::io(path.clone(), error)),
            }
        }
        Ok(())
    }

    /// The buffered body for in-memory sinks.
    #[must_use]
    pub fn buffered(&self) -> Option<&[u8]> {
        match &self.sink {
            Sink::Memory(buffer) => Some(buffer),
            Sink::File(_) => None,
        }
    }

    /// Hands the validators back after the attempt.
    pub(crate) fn take_validations(&mut self) -> Vec<Validation> {
        std::mem::take(&mut self.validations)
    }

    fn path(&self) -> PathBuf {
        match &self.destination {
            Destination::File(path) => path.clone(),
            Destination::Memory => PathBuf::from("<in-memory>"),
        }
    }
}
