mod http;

use async_trait::async_trait;
use bytes::Bytes;
use url::Url;
use crate::errors::TransportError;

pub use http::HttpTransport;

/// Single-item upload primitive. Implementations do not retry; a failed call
/// surfaces as a failed job that the caller may retry.
#[async_trait]
pub trait UploadTransport: Send + Sync {
    /// Upload `payload` and return its remote location.
    async fn upload(&self, payload: Bytes) -> Result<Url, TransportError>;
}

#[async_trait]
impl<T: UploadTransport + ?Sized> UploadTransport for std::sync::Arc<T> {
    async fn upload(&self, payload: Bytes) -> Result<Url, TransportError> {
        (**self).upload(payload).await
    }
}
