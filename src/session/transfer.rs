//! Kernel payload reception
//!
//! Once the transfer announcement is recognized, prompt matching stops and the
//! payload is written to a staged `.part` file next to its final location.
//! The staged file is deleted unless the finalizer takes it over.

use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::error::{Error, Result, TransportError};
use crate::transport::{Chunk, CloseHandle, Transport};
use crate::types::{Event, Stage};

/// Name collisions tolerated before staging gives up
const MAX_STAGING_ATTEMPTS: u32 = 8;

/// Payload file being written, removed on drop unless kept
#[derive(Debug)]
pub(crate) struct StagedFile {
    path: PathBuf,
    file: Option<tokio::fs::File>,
    keep: bool,
}

impl StagedFile {
    /// Create `<output_dir>/.<object>.<random>.bsp.part`
    ///
    /// The name is unique per call, so negotiations for the same object never
    /// share a staged file.
    pub(crate) async fn create(output_dir: &Path, object: &str) -> Result<Self> {
        tokio::fs::create_dir_all(output_dir).await?;
        let mut attempt = 1;
        loop {
            let path = output_dir.join(staged_file_name(object, rand::random()));
            let opened = tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await;
            match opened {
                Ok(file) => {
                    tracing::debug!(path = %path.display(), "Staging kernel");
                    return Ok(Self {
                        path,
                        file: Some(file),
                        keep: false,
                    });
                }
                Err(e)
                    if e.kind() == std::io::ErrorKind::AlreadyExists
                        && attempt < MAX_STAGING_ATTEMPTS =>
                {
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        match self.file.as_mut() {
            Some(file) => Ok(file.write_all(bytes).await?),
            None => Err(Error::Io(std::io::Error::other("staged file already finished"))),
        }
    }

    /// Flush to disk and release the handle
    async fn finish(&mut self) -> Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
            file.sync_all().await?;
        }
        Ok(())
    }

    /// The file now belongs to someone else; do not delete it
    pub(crate) fn persist(&mut self) {
        self.keep = true;
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        drop(self.file.take());
        if !self.keep
            && let Err(e) = std::fs::remove_file(&self.path)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to remove staged kernel");
        }
    }
}

fn staged_file_name(object: &str, token: u32) -> String {
    let safe: String = object
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    format!(".{safe}.{token:08x}.bsp.part")
}

/// Emits monotonic transfer progress when enabled
#[derive(Debug)]
pub(crate) struct ProgressReporter {
    object: String,
    events: Option<broadcast::Sender<Event>>,
    last: Option<u64>,
}

impl ProgressReporter {
    pub(crate) fn new(object: &str, events: Option<broadcast::Sender<Event>>) -> Self {
        Self {
            object: object.to_string(),
            events,
            last: None,
        }
    }

    pub(crate) fn report(&mut self, received: u64, total: Option<u64>) {
        let Some(events) = &self.events else {
            return;
        };
        if self.last.is_some_and(|last| received <= last) {
            return;
        }
        self.last = Some(received);

        let percent = total
            .filter(|&total| total > 0)
            .map(|total| (received.saturating_mul(100) / total).min(100) as u8);
        // No subscribers is fine
        events
            .send(Event::TransferProgress {
                object: self.object.clone(),
                received,
                total,
                percent,
            })
            .ok();
    }
}

/// Receive a payload carried on the session itself
///
/// With `expected` set, exactly that many bytes are read and anything after
/// them is ignored; otherwise bytes are read until the service closes the
/// connection. `residual` holds payload bytes that arrived together with the
/// announcement.
pub(crate) async fn receive_in_band<T: Transport + ?Sized>(
    transport: &mut T,
    residual: Vec<u8>,
    expected: Option<u64>,
    staged: &mut StagedFile,
    idle_timeout: Duration,
    progress: &mut ProgressReporter,
    object: &str,
) -> Result<u64> {
    let mut received = 0u64;
    let mut pending = residual;

    loop {
        if !pending.is_empty() {
            let take = match expected {
                Some(total) => (total - received).min(pending.len() as u64) as usize,
                None => pending.len(),
            };
            staged.write(&pending[..take]).await?;
            received += take as u64;
            progress.report(received, expected);
            pending.clear();
        }

        if expected.is_some_and(|total| received >= total) {
            break;
        }

        match transport.read_available(Instant::now() + idle_timeout).await {
            Ok(Chunk::Data(bytes)) => pending = bytes,
            Ok(Chunk::Eof) => match expected {
                Some(total) => {
                    return Err(Error::IncompleteTransfer {
                        object: object.to_string(),
                        received,
                        expected: Some(total),
                        reason: format!("connection closed after {received} of {total} bytes"),
                    });
                }
                None => break,
            },
            Err(TransportError::DeadlineElapsed) => {
                return Err(Error::Timeout {
                    stage: Stage::ReceivingFile,
                    elapsed: idle_timeout,
                    unmatched: format!("{received} payload bytes received"),
                });
            }
            Err(TransportError::Closed) => {
                return Err(Error::Cancelled {
                    stage: Stage::ReceivingFile,
                });
            }
            Err(e) => return Err(e.into()),
        }
    }

    staged.finish().await?;
    Ok(received)
}

/// Fetch a kernel announced as a download URL
///
/// `idle_timeout` bounds the wait for the response and for every chunk.
/// Closing `cancel` aborts the download.
pub(crate) async fn download(
    url: &str,
    staged: &mut StagedFile,
    idle_timeout: Duration,
    progress: &mut ProgressReporter,
    object: &str,
    cancel: &CloseHandle,
) -> Result<u64> {
    let unsupported = || TransportError::UnsupportedUrl {
        url: url.to_string(),
    };
    let parsed = url::Url::parse(url).map_err(|_| unsupported())?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(unsupported().into());
    }

    let client = reqwest::Client::builder()
        .connect_timeout(idle_timeout)
        .build()
        .map_err(TransportError::Http)?;

    let request = client.get(parsed).send();
    let mut response = tokio::select! {
        biased;
        _ = cancel.closed() => return Err(Error::Cancelled { stage: Stage::ReceivingFile }),
        result = tokio::time::timeout(idle_timeout, request) => match result {
            Err(_) => return Err(download_timeout(idle_timeout, 0)),
            Ok(response) => response.map_err(TransportError::Http)?,
        },
    };

    let status = response.status();
    if !status.is_success() {
        return Err(TransportError::HttpStatus {
            url: url.to_string(),
            status: status.as_u16(),
        }
        .into());
    }

    let total = response.content_length();
    let mut received = 0u64;
    loop {
        let chunk = tokio::select! {
            biased;
            _ = cancel.closed() => return Err(Error::Cancelled { stage: Stage::ReceivingFile }),
            result = tokio::time::timeout(idle_timeout, response.chunk()) => match result {
                Err(_) => return Err(download_timeout(idle_timeout, received)),
                Ok(chunk) => chunk.map_err(TransportError::Http)?,
            },
        };
        let Some(bytes) = chunk else {
            break;
        };
        staged.write(&bytes).await?;
        received += bytes.len() as u64;
        progress.report(received, total);
    }

    if let Some(total) = total
        && received < total
    {
        return Err(Error::IncompleteTransfer {
            object: object.to_string(),
            received,
            expected: Some(total),
            reason: format!("download ended after {received} of {total} bytes"),
        });
    }

    staged.finish().await?;
    Ok(received)
}

fn download_timeout(elapsed: Duration, received: u64) -> Error {
    Error::Timeout {
        stage: Stage::ReceivingFile,
        elapsed,
        unmatched: format!("{received} bytes downloaded"),
    }
}
