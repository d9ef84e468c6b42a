//! Remote analysis provider speaking a JSON scoring API.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::analysis::{AnalysisProvider, FrameAnalysis};
use crate::{Error, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Provider backed by an HTTP scoring service. Image and audio payloads
/// are posted as raw bytes; text goes as JSON.
pub struct HttpAnalysisProvider {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct TranscriptResponse {
    text: String,
}

impl HttpAnalysisProvider {
    pub fn new(api_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::config(format!("failed to build http client: {e}")))?;
        Ok(Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.api_url, path)
    }

    async fn post_bytes(&self, path: &str, payload: Vec<u8>) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(self.endpoint(path))
            .bearer_auth(&self.api_key)
            .header("content-type", "application/octet-stream")
            .body(payload)
            .send()
            .await
            .map_err(|e| Error::adapter(format!("analysis request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::adapter(format!(
                "analysis service returned {}",
                response.status()
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl AnalysisProvider for HttpAnalysisProvider {
    async fn analyze_image(&self, path: &Path) -> Result<FrameAnalysis> {
        debug!(path = %path.display(), "scoring image");
        let payload = tokio::fs::read(path).await?;
        let response = self.post_bytes("v1/analyze/image", payload).await?;
        response
            .json::<FrameAnalysis>()
            .await
            .map_err(|e| Error::adapter(format!("malformed analysis response: {e}")))
    }

    async fn analyze_text(&self, text: &str) -> Result<FrameAnalysis> {
        let response = self
            .client
            .post(self.endpoint("v1/analyze/text"))
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({ "text": text }))
            .send()
            .await
            .map_err(|e| Error::adapter(format!("analysis request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::adapter(format!(
                "analysis service returned {}",
                response.status()
            )));
        }
        response
            .json::<FrameAnalysis>()
            .await
            .map_err(|e| Error::adapter(format!("malformed analysis response: {e}")))
    }

    async fn transcribe(&self, path: &Path) -> Result<String> {
        debug!(path = %path.display(), "transcribing audio");
        let payload = tokio::fs::read(path).await?;
        let response = self.post_bytes("v1/transcribe", payload).await?;
        let transcript = response
            .json::<TranscriptResponse>()
            .await
            .map_err(|e| Error::adapter(format!("malformed transcript response: {e}")))?;
        Ok(transcript.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_strips_trailing_slash() {
        let provider = HttpAnalysisProvider::new("https://scores.example.com/", "key").unwrap();
        assert_eq!(
            provider.endpoint("v1/analyze/image"),
            "https://scores.example.com/v1/analyze/image"
        );
    }
}
