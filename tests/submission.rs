mod common;

use std::sync::{Arc, Mutex};
use async_trait::async_trait;
use listing_uploader::{
    submit_listing, AggregatorConfig, AggregatorError, AggregatorHandle, CreatedListing, ListingClient, ListingDraft, ListingRequest,
    OfferingType, SubmissionError, UploadAggregator,
};
use common::{wait_for, ScriptedTransport};

/// Records requests and answers with a canned result
struct RecordingClient {
    requests: Mutex<Vec<ListingRequest>>,
    fail: bool,
}

impl RecordingClient {
    fn new(fail: bool) -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            fail,
        }
    }
}

#[async_trait]
impl ListingClient for RecordingClient {
    async fn create_listing(&self, request: &ListingRequest) -> Result<CreatedListing, SubmissionError> {
        self.requests.lock().unwrap().push(request.clone());
        if self.fail {
            return Err(SubmissionError::Server {
                status_code: 500,
                message: "internal error".into(),
            });
        }

        Ok(CreatedListing {
            id: "listing-1".into(),
            image_urls: request.image_urls.clone(),
        })
    }
}

fn draft() -> ListingDraft {
    ListingDraft {
        title: "Sofa".into(),
        description: "Three seater".into(),
        category_id: "furniture".into(),
        offering_type: OfferingType::Sell,
        price: None,
    }
}

#[tokio::test(start_paused = true)]
async fn test_submit_is_gated_on_uploads() {
    let transport = Arc::new(ScriptedTransport::new());
    let handle = UploadAggregator::new(transport.clone(), AggregatorConfig::default());
    let aggregator = handle.aggregator.clone();
    let client = RecordingClient::new(false);

    let err = submit_listing(&aggregator, &client, draft()).await.unwrap_err();
    assert!(matches!(err, SubmissionError::NoImages));

    aggregator.add_job("a", &b"a"[..]).await.unwrap();
    let err = submit_listing(&aggregator, &client, draft()).await.unwrap_err();
    assert!(matches!(err, SubmissionError::UploadsPending));
    assert!(client.requests.lock().unwrap().is_empty());

    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_successful_submit_resets_aggregator() {
    let transport = Arc::new(ScriptedTransport::new());
    let handle = UploadAggregator::new(transport.clone(), AggregatorConfig::default());
    let aggregator = handle.aggregator.clone();
    let client = RecordingClient::new(false);

    aggregator.add_job("a", &b"a"[..]).await.unwrap();
    aggregator.add_job("b", &b"b"[..]).await.unwrap();
    transport.succeed(b"b", "https://cdn.example.com/b.jpg").await;
    wait_for(&aggregator, |s| s.completed_urls.len() == 1).await;
    transport.succeed(b"a", "https://cdn.example.com/a.jpg").await;
    let snapshot = wait_for(&aggregator, |s| s.all_uploaded).await;

    let listing = submit_listing(&aggregator, &client, draft()).await.unwrap();
    assert_eq!(listing.id, "listing-1");

    let requests = client.requests.lock().unwrap().clone();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].image_urls, snapshot.completed_urls);
    assert_eq!(requests[0].image_urls[0].as_str(), "https://cdn.example.com/b.jpg");

    assert!(aggregator.snapshot().await.unwrap().is_empty());

    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_failed_submit_keeps_uploads() {
    let transport = Arc::new(ScriptedTransport::new());
    let handle = UploadAggregator::new(transport.clone(), AggregatorConfig::default());
    let aggregator = handle.aggregator.clone();
    let client = RecordingClient::new(true);

    aggregator.add_job("a", &b"a"[..]).await.unwrap();
    transport.succeed(b"a", "https://cdn.example.com/a.jpg").await;
    wait_for(&aggregator, |s| s.all_uploaded).await;

    let err = submit_listing(&aggregator, &client, draft()).await.unwrap_err();
    assert!(matches!(err, SubmissionError::Server { status_code: 500, .. }));

    let snapshot = aggregator.snapshot().await.unwrap();
    assert!(snapshot.all_uploaded);
    assert_eq!(snapshot.completed_urls.len(), 1);
    assert_eq!(transport.calls(), 1);

    handle.shutdown().await.unwrap();
}

/// Shuts the aggregator down while the listing request is in flight
struct ShutdownClient {
    handle: tokio::sync::Mutex<Option<AggregatorHandle>>,
}

#[async_trait]
impl ListingClient for ShutdownClient {
    async fn create_listing(&self, request: &ListingRequest) -> Result<CreatedListing, SubmissionError> {
        if let Some(handle) = self.handle.lock().await.take() {
            handle.shutdown().await.unwrap();
        }

        Ok(CreatedListing {
            id: "listing-2".into(),
            image_urls: request.image_urls.clone(),
        })
    }
}

#[tokio::test(start_paused = true)]
async fn test_created_listing_survives_failed_reset() {
    let transport = Arc::new(ScriptedTransport::new());
    let handle = UploadAggregator::new(transport.clone(), AggregatorConfig::default());
    let aggregator = handle.aggregator.clone();

    aggregator.add_job("a", &b"a"[..]).await.unwrap();
    transport.succeed(b"a", "https://cdn.example.com/a.jpg").await;
    wait_for(&aggregator, |s| s.all_uploaded).await;

    let client = ShutdownClient {
        handle: tokio::sync::Mutex::new(Some(handle)),
    };

    let listing = submit_listing(&aggregator, &client, draft()).await.unwrap();
    assert_eq!(listing.id, "listing-2");
    assert_eq!(listing.image_urls[0].as_str(), "https://cdn.example.com/a.jpg");

    // The worker really is gone, so the reset could not have succeeded
    assert_eq!(aggregator.snapshot().await.unwrap_err(), AggregatorError::Shutdown);
}
