use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::debug;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

use crate::core::error::{WorkflowError, WorkflowResult};
use crate::services::parser;
use crate::utils::data_url;

/// Chat/completion collaborator. Returns free text that is expected, but not
/// guaranteed, to contain one JSON object.
#[async_trait]
pub trait LlmClient: Send + Sync + Debug {
    async fn complete(&self, system: &str, user: &str, image_urls: &[String]) -> Result<String>;
}

/// Completion call on the mandatory path: transport failures and unreadable
/// responses both fail the operation.
pub async fn ask_json<T: DeserializeOwned>(
    llm: &dyn LlmClient,
    operation: &'static str,
    system: &str,
    user: &str,
    image_urls: &[String],
) -> WorkflowResult<T> {
    let text = llm
        .complete(system, user, image_urls)
        .await
        .map_err(|e| WorkflowError::collaborator(operation, e))?;
    parser::extract_as(&text).map_err(|e| WorkflowError::parse(operation, e))
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LlmConfig {
    pub provider: String, // "gemini" or "openai"
    pub gemini: Option<GeminiConfig>,
    pub openai: Option<OpenAIConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OpenAIConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
}

pub fn create_llm(config: &LlmConfig) -> Result<Box<dyn LlmClient>> {
    match config.provider.as_str() {
        "gemini" => {
            let cfg = config.gemini.as_ref().context("Gemini config missing")?;
            Ok(Box::new(GeminiClient::new(&cfg.api_key, &cfg.model)))
        }
        "openai" => {
            let cfg = config.openai.as_ref().context("OpenAI config missing")?;
            Ok(Box::new(OpenAIClient::new(&cfg.api_key, &cfg.model, cfg.base_url.as_deref())))
        }
        _ => Err(anyhow!("Unknown LLM provider: {}", config.provider)),
    }
}

// --- Gemini ---
#[derive(Debug)]
struct GeminiClient {
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl GeminiClient {
    fn new(api_key: &str, model: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiSystemInstruction>,
}

#[derive(Serialize)]
struct GeminiContent {
    role: String,
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
struct GeminiSystemInstruction {
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum GeminiPart {
    Text {
        text: String,
    },
    File {
        #[serde(rename = "fileData")]
        file_data: GeminiFileData,
    },
    Inline {
        #[serde(rename = "inlineData")]
        inline_data: GeminiInlineData,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiInlineData {
    mime_type: String,
    data: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiFileData {
    mime_type: String,
    file_uri: String,
}

#[derive(Deserialize)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
    error: Option<GeminiError>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContentResponse>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct GeminiContentResponse {
    #[serde(default)]
    parts: Vec<GeminiPartResponse>,
}

#[derive(Deserialize)]
struct GeminiPartResponse {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize, Debug)]
struct GeminiError {
    message: String,
}

/// `data:` URLs travel inline; anything else is referenced by URI with the
/// MIME type taken from its path.
fn gemini_image_part(uri: &str) -> GeminiPart {
    if let Some((mime_type, data)) = data_url::parse(uri) {
        return GeminiPart::Inline {
            inline_data: GeminiInlineData {
                mime_type: mime_type.to_string(),
                data: data.to_string(),
            },
        };
    }

    let path = uri.split(|c| c == '?' || c == '#').next().unwrap_or(uri);
    let mime_type = match data_url::mime_for(path) {
        "application/octet-stream" => "image/jpeg",
        known => known,
    };
    GeminiPart::File {
        file_data: GeminiFileData {
            mime_type: mime_type.to_string(),
            file_uri: uri.to_string(),
        },
    }
}

fn gemini_text(result: GeminiResponse, raw: &str) -> Result<String> {
    if let Some(err) = result.error {
        return Err(anyhow!("Gemini API returned error: {}", err.message));
    }

    if let Some(first) = result.candidates.as_ref().and_then(|c| c.first()) {
        if let Some(content) = &first.content {
            if !content.parts.is_empty() {
                return Ok(content.parts.iter().map(|p| p.text.as_str()).collect());
            }
        }
        let reason = first.finish_reason.as_deref().unwrap_or("UNKNOWN");
        return Err(anyhow!("Gemini response empty. Finish reason: {}", reason));
    }

    Err(anyhow!("Gemini response format unexpected or empty. Body: {}", raw))
}

#[async_trait]
impl LlmClient for GeminiClient {
    async fn complete(&self, system: &str, user: &str, image_urls: &[String]) -> Result<String> {
        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent?key={}",
            self.model, self.api_key
        );

        let mut parts: Vec<GeminiPart> =
            image_urls.iter().map(|uri| gemini_image_part(uri)).collect();
        parts.push(GeminiPart::Text { text: user.to_string() });

        let request_body = GeminiRequest {
            contents: vec![GeminiContent {
                role: "user".to_string(),
                parts,
            }],
            system_instruction: Some(GeminiSystemInstruction {
                parts: vec![GeminiPart::Text { text: system.to_string() }],
            }),
        };

        debug!("Gemini request: {} images, {} prompt chars", image_urls.len(), user.len());
        let resp = self.client.post(&url).json(&request_body).send().await?;

        if !resp.status().is_success() {
            let error_text = resp.text().await?;
            return Err(anyhow!("Gemini API error: {}", error_text));
        }

        let response_text = resp.text().await?;
        let result: GeminiResponse = serde_json::from_str(&response_text)
            .map_err(|e| {
                anyhow!("Failed to parse Gemini response: {}. Body: {}", e, response_text)
            })?;
        gemini_text(result, &response_text)
    }
}

// --- OpenAI ---

#[derive(Debug)]
struct OpenAIClient {
    api_key: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAIClient {
    fn new(api_key: &str, model: &str, base_url: Option<&str>) -> Self {
        Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: base_url
                .unwrap_or("https://api.openai.com/v1")
                .trim_end_matches('/')
                .to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
}

#[derive(Serialize)]
struct OpenAIMessage {
    role: String,
    content: OpenAIContent,
}

#[derive(Serialize)]
#[serde(untagged)]
enum OpenAIContent {
    Text(String),
    Parts(Vec<OpenAIPart>),
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OpenAIPart {
    Text { text: String },
    ImageUrl { image_url: OpenAIImageUrl },
}

#[derive(Serialize)]
struct OpenAIImageUrl {
    url: String,
}

#[derive(Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessageResponse,
}

#[derive(Deserialize)]
struct OpenAIMessageResponse {
    content: Option<String>,
}

fn openai_user_content(user: &str, image_urls: &[String]) -> OpenAIContent {
    if image_urls.is_empty() {
        return OpenAIContent::Text(user.to_string());
    }
    let mut parts = vec![OpenAIPart::Text { text: user.to_string() }];
    parts.extend(image_urls.iter().map(|url| OpenAIPart::ImageUrl {
        image_url: OpenAIImageUrl { url: url.clone() },
    }));
    OpenAIContent::Parts(parts)
}

#[async_trait]
impl LlmClient for OpenAIClient {
    async fn complete(&self, system: &str, user: &str, image_urls: &[String]) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);

        let request_body = OpenAIRequest {
            model: self.model.clone(),
            messages: vec![
                OpenAIMessage {
                    role: "system".to_string(),
                    content: OpenAIContent::Text(system.to_string()),
                },
                OpenAIMessage {
                    role: "user".to_string(),
                    content: openai_user_content(user, image_urls),
                },
            ],
        };

        debug!("OpenAI request: {} images, {} prompt chars", image_urls.len(), user.len());
        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request_body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let error_text = resp.text().await?;
            return Err(anyhow!("OpenAI API error: {}", error_text));
        }

        let result: OpenAIResponse = resp.json().await?;
        if let Some(choice) = result.choices.first() {
            if let Some(content) = &choice.message.content {
                return Ok(content.clone());
            }
        }

        Err(anyhow!("OpenAI response empty or missing content"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gemini_response_parsing_safety_block() {
        let json = r#"{
            "candidates": [
                {
                    "finishReason": "SAFETY",
                    "index": 0
                }
            ]
        }"#;

        let result: GeminiResponse = serde_json::from_str(json).unwrap();
        let err = gemini_text(result, json).unwrap_err();
        assert!(err.to_string().contains("SAFETY"));
    }

    #[test]
    fn test_gemini_response_joins_text_parts() {
        let json = r#"{
            "candidates": [
                {
                    "content": {
                        "parts": [ { "text": "{\"a\":" }, { "text": " 1}" } ],
                        "role": "model"
                    },
                    "finishReason": "STOP"
                }
            ]
        }"#;

        let result: GeminiResponse = serde_json::from_str(json).unwrap();
        assert_eq!(gemini_text(result, json).unwrap(), "{\"a\": 1}");
    }

    #[test]
    fn test_gemini_request_serializes_image_parts() {
        let request = GeminiRequest {
            contents: vec![GeminiContent {
                role: "user".to_string(),
                parts: vec![
                    GeminiPart::File {
                        file_data: GeminiFileData {
                            mime_type: "image/jpeg".to_string(),
                            file_uri: "https://img/1.jpg".to_string(),
                        },
                    },
                    GeminiPart::Text { text: "analyze".to_string() },
                ],
            }],
            system_instruction: None,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value["contents"][0]["parts"][0]["fileData"]["fileUri"],
            "https://img/1.jpg"
        );
        assert_eq!(value["contents"][0]["parts"][1]["text"], "analyze");
        assert!(value.get("systemInstruction").is_none());
    }

    #[test]
    fn test_gemini_image_parts_follow_url_type() {
        let parts: Vec<serde_json::Value> = [
            "https://img.test/0.png?size=large",
            "https://i.ytimg.com/vi/abc/hqdefault.jpg",
            "https://img.test/render",
            "data:image/webp;base64,UklGRg==",
        ]
        .iter()
        .map(|uri| serde_json::to_value(gemini_image_part(uri)).unwrap())
        .collect();

        assert_eq!(parts[0]["fileData"]["mimeType"], "image/png");
        assert_eq!(parts[0]["fileData"]["fileUri"], "https://img.test/0.png?size=large");
        assert_eq!(parts[1]["fileData"]["mimeType"], "image/jpeg");
        assert_eq!(parts[2]["fileData"]["mimeType"], "image/jpeg");
        assert_eq!(parts[3]["inlineData"]["mimeType"], "image/webp");
        assert_eq!(parts[3]["inlineData"]["data"], "UklGRg==");
        assert!(parts[3].get("fileData").is_none());
    }

    #[test]
    fn test_openai_user_content_with_images() {
        let content = openai_user_content("describe", &["https://img/1.jpg".to_string()]);
        let value = serde_json::to_value(&content).unwrap();
        assert_eq!(value[0]["type"], "text");
        assert_eq!(value[1]["type"], "image_url");
        assert_eq!(value[1]["image_url"]["url"], "https://img/1.jpg");

        let plain = serde_json::to_value(openai_user_content("hi", &[])).unwrap();
        assert_eq!(plain, serde_json::Value::String("hi".to_string()));
    }

    #[test]
    fn test_openai_response_parsing_success() {
        let json = r#"{
            "id": "chatcmpl-123",
            "object": "chat.completion",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": "{\"patterns\": []}"
                },
                "finish_reason": "stop"
            }]
        }"#;

        let result: OpenAIResponse = serde_json::from_str(json).unwrap();
        assert_eq!(
            result.choices[0].message.content.as_deref(),
            Some("{\"patterns\": []}")
        );
    }

    #[test]
    fn test_unknown_provider_is_rejected() {
        let config = LlmConfig {
            provider: "ollama".to_string(),
            gemini: None,
            openai: None,
        };
        assert!(create_llm(&config).is_err());
    }
}
