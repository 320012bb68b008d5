//! Listing creation, gated on the aggregator.
//!
//! A listing is only sent once every image is uploaded. The request carries
//! the completed urls exactly as the aggregator reports them. If the listing
//! call itself fails, uploads are left alone so the user can try again
//! without re-uploading.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use url::Url;
use crate::aggregator::UploadAggregator;
use crate::config::ListingConfig;
use crate::errors::SubmissionError;
use crate::types::Snapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfferingType {
    Sell,
    Rent,
    Service,
    Wanted,
    Free,
}

/// What the user typed in, before images are attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingDraft {
    pub title: String,
    pub description: String,
    pub category_id: String,
    pub offering_type: OfferingType,
    /// Price in minor currency units
    pub price: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingRequest {
    pub title: String,
    pub description: String,
    pub category_id: String,
    pub offering_type: OfferingType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<u64>,
    pub image_urls: Vec<Url>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatedListing {
    pub id: String,
    #[serde(default)]
    pub image_urls: Vec<Url>,
}

#[async_trait]
pub trait ListingClient: Send + Sync {
    async fn create_listing(&self, request: &ListingRequest) -> Result<CreatedListing, SubmissionError>;
}

/// Build the listing request from a snapshot, refusing while any image is
/// missing, failed or still uploading.
pub fn prepare_listing(snapshot: &Snapshot, draft: ListingDraft) -> Result<ListingRequest, SubmissionError> {
    if snapshot.is_empty() {
        return Err(SubmissionError::NoImages);
    }
    if snapshot.any_failed {
        return Err(SubmissionError::UploadsFailed);
    }
    if !snapshot.all_uploaded {
        return Err(SubmissionError::UploadsPending);
    }

    Ok(ListingRequest {
        title: draft.title,
        description: draft.description,
        category_id: draft.category_id,
        offering_type: draft.offering_type,
        price: draft.price,
        image_urls: snapshot.completed_urls.clone(),
    })
}

/// Create the listing and, once the server accepts it, reset the aggregator.
/// A listing the server created is returned even if the reset fails.
pub async fn submit_listing(
    aggregator: &UploadAggregator,
    client: &dyn ListingClient,
    draft: ListingDraft,
) -> Result<CreatedListing, SubmissionError> {
    let snapshot = aggregator.snapshot().await?;
    let request = prepare_listing(&snapshot, draft)?;

    match client.create_listing(&request).await {
        Ok(listing) => {
            info!(listing = %listing.id, images = request.image_urls.len(), "listing created");
            // The listing exists on the server; a failed reset must not hide it
            if let Err(err) = aggregator.reset().await {
                warn!(listing = %listing.id, error = %err, "listing created but uploads were not reset");
            }
            Ok(listing)
        }
        Err(err) => {
            warn!(error = %err, "listing creation failed, uploads kept");
            Err(err)
        }
    }
}

/// JSON-over-HTTP listing client
pub struct HttpListingClient {
    client: Client,
    config: ListingConfig,
}

impl HttpListingClient {
    pub fn new(config: ListingConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    pub fn with_client(client: Client, config: ListingConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl ListingClient for HttpListingClient {
    async fn create_listing(&self, request: &ListingRequest) -> Result<CreatedListing, SubmissionError> {
        let mut builder = self.client
            .post(self.config.endpoint.clone())
            .json(request);

        if let Some(token) = &self.config.token {
            builder = builder.bearer_auth(token);
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(SubmissionError::Server {
                status_code: status.as_u16(),
                message,
            });
        }

        Ok(response.json().await?)
    }
}
