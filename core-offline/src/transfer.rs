//! # Resumable Transfer Engine
//!
//! Streams one remote payload into the byte cache.
//!
//! ## Workflow
//!
//! 1. Reconcile staged bytes with the persisted offset
//! 2. `GET` the source, with `Range: bytes={offset}-` when resuming
//! 3. Append each chunk to `staging/{id}` and report it to the observer
//! 4. On end of stream, verify the length and commit the staged bytes under
//!    the source URL
//!
//! Cancellation is only observed while waiting on the network, so staged and
//! persisted byte counts always agree at the boundary where a transfer stops.

use crate::error::TransferError;
use crate::models::{DownloadId, DownloadItem};
use async_trait::async_trait;
use bridge_traits::{ByteCache, ByteStream, HttpClient, HttpRequest};
use bytes::Bytes;
use core_runtime::logging::redact_url;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Cache key prefix for partially transferred payloads.
pub const STAGING_PREFIX: &str = "staging/";

/// Cache key holding the partial bytes of a download.
pub fn staging_key(id: &DownloadId) -> String {
    format!("{}{}", STAGING_PREFIX, id)
}

/// Receives progress at every chunk boundary.
///
/// The engine waits for the observer before reading the next chunk; an
/// error aborts the transfer.
#[async_trait]
pub trait TransferObserver: Send + Sync {
    async fn chunk_staged(
        &self,
        bytes: u64,
        total: Option<u64>,
    ) -> std::result::Result<(), String>;
}

/// What a transfer needs to know about its item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferJob {
    pub id: DownloadId,
    pub url: String,
    /// Bytes already staged by an earlier attempt
    pub offset: u64,
    /// Total size learned by an earlier attempt
    pub size: Option<u64>,
}

impl From<&DownloadItem> for TransferJob {
    fn from(item: &DownloadItem) -> Self {
        Self {
            id: item.id,
            url: item.url.clone(),
            offset: item.bytes_downloaded,
            size: item.size,
        }
    }
}

/// Result of a single transfer attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    /// Payload committed under the source URL
    Completed { bytes: u64 },
    /// Stopped by the cancellation token
    Cancelled,
    /// Genuine failure to record on the item
    Failed(TransferError),
}

/// Executes transfers against the HTTP and cache bridges
pub struct TransferEngine {
    http: Arc<dyn HttpClient>,
    cache: Arc<dyn ByteCache>,
    stall_timeout: Option<Duration>,
}

impl TransferEngine {
    pub fn new(http: Arc<dyn HttpClient>, cache: Arc<dyn ByteCache>) -> Self {
        Self {
            http,
            cache,
            stall_timeout: None,
        }
    }

    /// Fail when no chunk arrives within `timeout`.
    pub fn with_stall_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.stall_timeout = timeout;
        self
    }

    /// Run one transfer attempt to completion, cancellation or failure.
    #[instrument(skip_all, fields(id = %job.id, url = %redact_url(&job.url)))]
    pub async fn run(
        &self,
        job: TransferJob,
        observer: &dyn TransferObserver,
        cancel: CancellationToken,
    ) -> TransferOutcome {
        match self.transfer(&job, observer, &cancel).await {
            Ok(Some(bytes)) => {
                info!(bytes, "Transfer completed");
                TransferOutcome::Completed { bytes }
            }
            Ok(None) => {
                debug!("Transfer cancelled");
                TransferOutcome::Cancelled
            }
            Err(e) => {
                warn!(error = %e, "Transfer failed");
                TransferOutcome::Failed(e)
            }
        }
    }

    /// `Ok(None)` means cancelled.
    async fn transfer(
        &self,
        job: &TransferJob,
        observer: &dyn TransferObserver,
        cancel: &CancellationToken,
    ) -> Result<Option<u64>, TransferError> {
        let staging = staging_key(&job.id);
        let mut offset = self.reconcile(job, &staging, observer).await?;

        if offset > 0 && job.size == Some(offset) {
            debug!(offset, "All bytes already staged");
            self.commit(&job.url, &staging, Some(offset), offset).await?;
            return Ok(Some(offset));
        }

        let mut request = HttpRequest::get(job.url.as_str());
        if offset > 0 {
            request = request.range_from(offset);
        }

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(None),
            response = self.http.open_stream(request) => {
                response.map_err(|e| TransferError::Request(e.to_string()))?
            }
        };

        if !response.is_success() {
            return Err(TransferError::HttpStatus(response.status));
        }

        if offset > 0 && !response.is_partial() {
            warn!(offset, "Server ignored range request, restarting from zero");
            self.discard_staging(&staging).await?;
            offset = 0;
            observer
                .chunk_staged(0, job.size)
                .await
                .map_err(TransferError::Storage)?;
        }

        // A length-less 206 still owes exactly the size learned earlier.
        let total = response
            .content_length
            .map(|len| len + offset)
            .or_else(|| job.size.filter(|_| response.is_partial()));
        let mut body = response.body;

        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(None),
                chunk = self.next_chunk(&mut body) => chunk?,
            };

            let Some(chunk) = chunk else { break };
            if chunk.is_empty() {
                continue;
            }

            let received = offset + chunk.len() as u64;
            if let Some(expected) = total {
                if received > expected {
                    return Err(TransferError::LengthMismatch {
                        expected,
                        actual: received,
                    });
                }
            }

            self.cache
                .append(&staging, chunk)
                .await
                .map_err(|e| TransferError::Storage(e.to_string()))?;
            offset = received;

            observer
                .chunk_staged(offset, total)
                .await
                .map_err(TransferError::Storage)?;
        }

        self.commit(&job.url, &staging, total, offset).await?;
        Ok(Some(offset))
    }

    /// Align the staged payload with the persisted offset.
    ///
    /// Staging that disagrees with the record is discarded and the transfer
    /// restarts from zero.
    async fn reconcile(
        &self,
        job: &TransferJob,
        staging: &str,
        observer: &dyn TransferObserver,
    ) -> Result<u64, TransferError> {
        let staged = self
            .cache
            .size(staging)
            .await
            .map_err(|e| TransferError::Storage(e.to_string()))?
            .unwrap_or(0);

        if staged == job.offset {
            return Ok(job.offset);
        }

        warn!(
            staged,
            recorded = job.offset,
            "Staged bytes disagree with record, restarting from zero"
        );
        self.discard_staging(staging).await?;
        if job.offset > 0 {
            observer
                .chunk_staged(0, job.size)
                .await
                .map_err(TransferError::Storage)?;
        }
        Ok(0)
    }

    async fn next_chunk(&self, body: &mut ByteStream) -> Result<Option<Bytes>, TransferError> {
        let next = match self.stall_timeout {
            Some(limit) => tokio::time::timeout(limit, body.next())
                .await
                .map_err(|_| TransferError::Stalled(limit))?,
            None => body.next().await,
        };

        next.transpose()
            .map_err(|e| TransferError::Stream(e.to_string()))
    }

    async fn commit(
        &self,
        url: &str,
        staging: &str,
        total: Option<u64>,
        received: u64,
    ) -> Result<(), TransferError> {
        if let Some(expected) = total {
            if expected != received {
                return Err(TransferError::LengthMismatch {
                    expected,
                    actual: received,
                });
            }
        }

        let storage = |e: bridge_traits::BridgeError| TransferError::Storage(e.to_string());
        let payload = self
            .cache
            .get(staging)
            .await
            .map_err(storage)?
            .unwrap_or_default();

        if payload.len() as u64 != received {
            return Err(TransferError::Storage(format!(
                "staged {} bytes, expected {}",
                payload.len(),
                received
            )));
        }

        self.cache.put(url, payload).await.map_err(storage)?;
        self.cache.delete(staging).await.map_err(storage)?;
        Ok(())
    }

    async fn discard_staging(&self, staging: &str) -> Result<(), TransferError> {
        self.cache
            .delete(staging)
            .await
            .map_err(|e| TransferError::Storage(e.to_string()))
    }
}
