use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{header, Client};
use tracing::debug;
use url::Url;
use crate::config::HttpTransportConfig;
use crate::errors::TransportError;
use super::UploadTransport;

/// Plain HTTP upload: POST the image bytes, read back where they landed.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    config: HttpTransportConfig,
}

impl HttpTransport {
    pub fn new(config: HttpTransportConfig) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()?;

        Ok(Self { client, config })
    }

    /// Use a preconfigured client, e.g. one shared with the listing client.
    pub fn with_client(client: Client, config: HttpTransportConfig) -> Self {
        Self { client, config }
    }

    fn resolve_url(&self, body: &str, location: Option<&str>) -> Result<Url, TransportError> {
        let from_body = serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|value| {
                value
                    .get(&self.config.url_field)
                    .and_then(|field| field.as_str())
                    .map(String::from)
            });

        match from_body.as_deref().or(location) {
            // Relative locations resolve against the upload endpoint
            Some(raw) => Ok(self.config.endpoint.join(raw)?),
            None => Err(TransportError::MissingUrl),
        }
    }
}

#[async_trait]
impl UploadTransport for HttpTransport {
    async fn upload(&self, payload: Bytes) -> Result<Url, TransportError> {
        let size = payload.len();
        let mut request = self.client
            .post(self.config.endpoint.clone())
            .header(header::CONTENT_TYPE, &self.config.content_type)
            .body(payload);

        if let Some(token) = &self.config.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();

        let location = response
            .headers()
            .get(header::LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(String::from);
        let body = response.text().await?;

        if !status.is_success() {
            return Err(TransportError::server_error(status.as_u16(), body));
        }

        let url = self.resolve_url(&body, location.as_deref())?;
        debug!(bytes = size, %url, "upload accepted");

        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport() -> HttpTransport {
        let endpoint = Url::parse("https://api.example.com/v1/images").unwrap();
        HttpTransport::new(HttpTransportConfig::new(endpoint)).unwrap()
    }

    #[test]
    fn test_url_from_json_body() {
        let url = transport()
            .resolve_url(r#"{"url":"https://cdn.example.com/a.jpg"}"#, None)
            .unwrap();
        assert_eq!(url.as_str(), "https://cdn.example.com/a.jpg");
    }

    #[test]
    fn test_url_falls_back_to_location() {
        let url = transport().resolve_url("", Some("/v1/images/42")).unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/v1/images/42");
    }

    #[test]
    fn test_missing_url() {
        let result = transport().resolve_url(r#"{"id":1}"#, None);
        assert!(matches!(result, Err(TransportError::MissingUrl)));
    }
}
