pub mod aggregator;
pub mod config;
pub mod errors;
pub mod progress;
pub mod submission;
pub mod transport;
pub mod types;
mod worker;

pub use aggregator::{AggregatorHandle, UploadAggregator};
pub use config::{AggregatorConfig, AppConfig, HttpTransportConfig, ListingConfig};
pub use errors::{AggregatorError, ConfigError, Result, SubmissionError, TransportError};
pub use submission::{
    prepare_listing,
    submit_listing,
    CreatedListing,
    HttpListingClient,
    ListingClient,
    ListingDraft,
    ListingRequest,
    OfferingType,
};
pub use transport::{HttpTransport, UploadTransport};
pub use types::{AggregatorEvent, JobId, JobState, Snapshot, UploadJob};
