#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{oneshot, Notify};
use url::Url;
use listing_uploader::{TransportError, UploadTransport};

type Outcome = Result<Url, TransportError>;

/// Transport whose calls stay pending until the test resolves them.
/// Calls are keyed by payload, so every job in a test uses distinct bytes.
#[derive(Default)]
pub struct ScriptedTransport {
    pending: Mutex<HashMap<Bytes, Vec<oneshot::Sender<Outcome>>>>,
    calls: AtomicUsize,
    notify: Notify,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Wait for the transport to be called with `payload`.
    pub async fn next_call(&self, payload: &'static [u8]) -> oneshot::Sender<Outcome> {
        loop {
            let notified = self.notify.notified();
            if let Some(sender) = self.take(payload) {
                return sender;
            }
            notified.await;
        }
    }

    pub async fn succeed(&self, payload: &'static [u8], url: &str) {
        let sender = self.next_call(payload).await;
        let _ = sender.send(Ok(Url::parse(url).unwrap()));
    }

    pub async fn fail(&self, payload: &'static [u8], message: &str) {
        let sender = self.next_call(payload).await;
        let _ = sender.send(Err(TransportError::other(message)));
    }

    /// Outstanding calls made with `payload`.
    pub fn pending_for(&self, payload: &[u8]) -> usize {
        self.pending.lock().unwrap().get(payload).map_or(0, Vec::len)
    }

    fn take(&self, payload: &[u8]) -> Option<oneshot::Sender<Outcome>> {
        let mut pending = self.pending.lock().unwrap();
        let senders = pending.get_mut(payload)?;
        if senders.is_empty() {
            return None;
        }
        Some(senders.remove(0))
    }
}

#[async_trait]
impl UploadTransport for ScriptedTransport {
    async fn upload(&self, payload: Bytes) -> Result<Url, TransportError> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().entry(payload).or_default().push(tx);
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.notify.notify_waiters();

        rx.await.unwrap_or(Err(TransportError::Cancelled))
    }
}

use listing_uploader::{Snapshot, UploadAggregator};

/// Poll snapshots, one per aggregator event, until `predicate` holds.
pub async fn wait_for<F>(aggregator: &UploadAggregator, predicate: F) -> Snapshot
where
    F: Fn(&Snapshot) -> bool,
{
    let mut events = aggregator.subscribe();
    loop {
        let snapshot = aggregator.snapshot().await.unwrap();
        if predicate(&snapshot) {
            return snapshot;
        }
        let _ = events.recv().await;
    }
}
