use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

use crate::core::config::SynthesisConfig;

/// One image synthesis call. `reference_images` order is meaningful: earlier
/// entries are higher-priority identity sources, trailing ones style-only.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SynthesisRequest {
    pub prompt: String,
    pub reference_images: Vec<String>,
    pub edit_mode: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_image: Option<String>,
}

impl SynthesisRequest {
    pub fn compose(prompt: String, reference_images: Vec<String>) -> Self {
        Self {
            prompt,
            reference_images,
            ..Default::default()
        }
    }

    pub fn edit(prompt: String, original_image: &str) -> Self {
        Self {
            prompt,
            reference_images: Vec::new(),
            edit_mode: true,
            original_image: Some(original_image.to_string()),
        }
    }
}

#[async_trait]
pub trait ImageSynthesizer: Send + Sync + Debug {
    /// Returns the URL of the produced image.
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<String>;
}

pub fn create_synthesizer(config: &SynthesisConfig) -> Box<dyn ImageSynthesizer> {
    Box::new(HttpImageSynthesizer::new(&config.base_url, config.api_key.as_deref()))
}

#[derive(Debug)]
pub struct HttpImageSynthesizer {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpImageSynthesizer {
    pub fn new(base_url: &str, api_key: Option<&str>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.map(str::to_string),
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SynthesisResponse {
    image_url: Option<String>,
    error: Option<String>,
}

fn image_url_from(response: SynthesisResponse) -> Result<String> {
    if let Some(err) = response.error {
        return Err(anyhow!("Image synthesis returned error: {}", err));
    }
    response
        .image_url
        .filter(|url| !url.is_empty())
        .ok_or_else(|| anyhow!("Image synthesis response missing imageUrl"))
}

#[async_trait]
impl ImageSynthesizer for HttpImageSynthesizer {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<String> {
        let url = format!("{}/generate-image", self.base_url);
        debug!(
            "synthesis request: edit_mode={}, {} reference images",
            request.edit_mode,
            request.reference_images.len()
        );

        let mut builder = self.client.post(&url).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", key));
        }
        let resp = builder
            .send()
            .await
            .context("Failed to send synthesis request")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let error_text = resp.text().await?;
            return Err(anyhow!("Image synthesis error ({}): {}", status, error_text));
        }

        let body: SynthesisResponse = resp
            .json()
            .await
            .context("Failed to parse synthesis response")?;
        image_url_from(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serializes_camel_case_and_keeps_order() {
        let request = SynthesisRequest::compose(
            "prompt".to_string(),
            vec!["model".to_string(), "own".to_string(), "rival".to_string()],
        );
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["referenceImages"][0], "model");
        assert_eq!(value["referenceImages"][2], "rival");
        assert_eq!(value["editMode"], false);
        assert!(value.get("originalImage").is_none());
    }

    #[test]
    fn test_edit_request_has_no_references() {
        let request = SynthesisRequest::edit("文字を大きく".to_string(), "https://img/last.png");
        assert!(request.edit_mode);
        assert!(request.reference_images.is_empty());
        assert_eq!(request.original_image.as_deref(), Some("https://img/last.png"));
    }

    #[test]
    fn test_response_error_and_missing_url() {
        let ok: SynthesisResponse =
            serde_json::from_str(r#"{"imageUrl": "https://img/1.png"}"#).unwrap();
        assert_eq!(image_url_from(ok).unwrap(), "https://img/1.png");

        let err: SynthesisResponse = serde_json::from_str(r#"{"error": "quota"}"#).unwrap();
        assert!(image_url_from(err).unwrap_err().to_string().contains("quota"));

        let empty: SynthesisResponse = serde_json::from_str(r#"{"imageUrl": ""}"#).unwrap();
        assert!(image_url_from(empty).is_err());
    }
}
