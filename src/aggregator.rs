use std::sync::Arc;
use bytes::Bytes;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use crate::config::AggregatorConfig;
use crate::transport::UploadTransport;
use super::errors::{AggregatorError, Result};
use super::types::{AggregatorCommand, AggregatorEvent, JobId, Snapshot, UploadJob};
use super::worker::AggregatorWorker;

/// Handle to the upload aggregator of one listing-creation session.
///
/// Cheap to clone; every clone talks to the same worker task, which owns the
/// jobs and applies operations one at a time. A mutating call returns once
/// the worker has applied it, so a following `snapshot` reflects it.
#[derive(Clone)]
pub struct UploadAggregator {
    command_tx: mpsc::Sender<AggregatorCommand>,
    event_tx: broadcast::Sender<AggregatorEvent>,
}

/// Aggregator handle plus its worker task
pub struct AggregatorHandle {
    pub aggregator: UploadAggregator,
    pub worker_handle: JoinHandle<()>,
}

impl AggregatorHandle {
    /// Stop the worker and cancel every in-flight upload.
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.aggregator.command_tx.send(AggregatorCommand::Shutdown).await;
        self.worker_handle
            .await
            .map_err(|_| AggregatorError::Shutdown)
    }
}

impl UploadAggregator {
    pub fn new<T>(transport: T, config: AggregatorConfig) -> AggregatorHandle
    where
        T: UploadTransport + 'static,
    {
        Self::with_transport(Arc::new(transport), config)
    }

    pub fn with_transport(transport: Arc<dyn UploadTransport>, config: AggregatorConfig) -> AggregatorHandle {
        let config = config.normalized();
        let (command_tx, command_rx) = mpsc::channel(config.command_buffer);
        let (event_tx, _) = broadcast::channel(config.event_capacity);

        let worker = AggregatorWorker::new(transport, &config, event_tx.clone());
        let worker_handle = tokio::spawn(worker.run(command_rx));

        let aggregator = Self {
            command_tx,
            event_tx,
        };

        AggregatorHandle {
            aggregator,
            worker_handle,
        }
    }

    /// Add a job and start its upload right away.
    pub async fn add_job(&self, id: impl Into<JobId>, payload: impl Into<Bytes>) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();

        self.send(AggregatorCommand::AddJob {
            id: id.into(),
            payload: payload.into(),
            reply: reply_tx,
        })
        .await?;

        reply_rx.await.map_err(|_| AggregatorError::Shutdown)?
    }

    /// Start a fresh attempt for a failed job with its stored payload.
    /// No-op for any other state.
    pub async fn retry_job(&self, id: impl Into<JobId>, payload: impl Into<Bytes>) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();

        self.send(AggregatorCommand::RetryJob {
            id: id.into(),
            payload: payload.into(),
            reply: reply_tx,
        })
        .await?;

        reply_rx.await.map_err(|_| AggregatorError::Shutdown)?
    }

    /// Remove a job, cancelling its upload if one is in flight. Removing an
    /// unknown id is not an error.
    pub async fn remove_job(&self, id: impl Into<JobId>) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();

        self.send(AggregatorCommand::RemoveJob {
            id: id.into(),
            reply: reply_tx,
        })
        .await?;

        reply_rx.await.map_err(|_| AggregatorError::Shutdown)
    }

    /// Drop every job and completed url.
    pub async fn reset(&self) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();

        self.send(AggregatorCommand::Reset { reply: reply_tx }).await?;

        reply_rx.await.map_err(|_| AggregatorError::Shutdown)
    }

    pub async fn job(&self, id: impl Into<JobId>) -> Result<Option<UploadJob>> {
        let (reply_tx, reply_rx) = oneshot::channel();

        self.send(AggregatorCommand::GetJob {
            id: id.into(),
            reply: reply_tx,
        })
        .await?;

        reply_rx.await.map_err(|_| AggregatorError::Shutdown)
    }

    pub async fn snapshot(&self) -> Result<Snapshot> {
        let (reply_tx, reply_rx) = oneshot::channel();

        self.send(AggregatorCommand::Snapshot { reply: reply_tx }).await?;

        reply_rx.await.map_err(|_| AggregatorError::Shutdown)
    }

    /// Subscribe to job events.
    ///
    /// A subscriber that falls behind loses the oldest events (lagged error);
    /// `snapshot` is always the source of truth.
    pub fn subscribe(&self) -> broadcast::Receiver<AggregatorEvent> {
        self.event_tx.subscribe()
    }

    /// Wait until no job is uploading and return the settled snapshot.
    pub async fn wait_until_settled(&self) -> Result<Snapshot> {
        let mut events = self.subscribe();

        loop {
            let snapshot = self.snapshot().await?;
            if snapshot.is_settled() {
                return Ok(snapshot);
            }

            tokio::select! {
                event = events.recv() => match event {
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return Err(AggregatorError::Shutdown),
                },
                _ = self.command_tx.closed() => return Err(AggregatorError::Shutdown),
            }
        }
    }

    async fn send(&self, command: AggregatorCommand) -> Result<()> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| AggregatorError::Shutdown)
    }
}
