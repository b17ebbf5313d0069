use async_trait::async_trait;
use catalog_core::{Sample, SampleSink, SinkError};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode};
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Forwards samples to a catalog server (`POST {base}/api/samples`).
#[derive(Debug, Clone)]
pub struct HttpSink {
    client: Client,
    endpoint: String,
}

impl HttpSink {
    pub fn new(base_url: &str) -> Result<Self, SinkError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| SinkError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: format!("{}/api/samples", base_url.trim_end_matches('/')),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl SampleSink for HttpSink {
    async fn send(&self, sample: &Sample) -> Result<(), SinkError> {
        let body = serde_json::to_vec(sample)?;

        let response = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| SinkError::Transport(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::OK || status == StatusCode::CREATED {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(SinkError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_joins_base_url() {
        assert_eq!(
            HttpSink::new("http://localhost:8080").unwrap().endpoint(),
            "http://localhost:8080/api/samples"
        );
        assert_eq!(
            HttpSink::new("http://catalog:9000/").unwrap().endpoint(),
            "http://catalog:9000/api/samples"
        );
    }
}
