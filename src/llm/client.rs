use crate::config::EngineConfig;
use crate::error::{ReconcilerError, Result};
use crate::extraction::{ExtractionRequest, Extractor};
use crate::llm::types::*;
use async_trait::async_trait;
use base64::Engine;
use log::debug;
use reqwest::Client;

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Gemini REST client. Documents are sent inline, so no upload round trip is needed.
#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl GeminiClient {
    pub fn new(api_key: String, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: GEMINI_BASE_URL.to_string(),
            model: model.into(),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        Ok(Self::new(config.require_api_key()?.to_string(), config.model.clone()))
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn generate_content(
        &self,
        contents: Vec<Content>,
        response_schema: Option<serde_json::Value>,
    ) -> Result<String> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );

        let payload = GenerateContentRequest {
            contents,
            system_instruction: None,
            generation_config: GenerationConfig {
                response_mime_type: "application/json".to_string(),
                response_json_schema: response_schema,
                temperature: Some(0.0),
            },
        };

        let res = self.client.post(&url).json(&payload).send().await?;
        let status = res.status();

        if !status.is_success() {
            let err_text = res.text().await?;
            return Err(ReconcilerError::ExtractionFailed(format!(
                "Gemini API Error (status {}): {}",
                status, err_text
            )));
        }

        let body: GenerateContentResponse = res.json().await?;
        Ok(body.text())
    }
}

#[async_trait]
impl Extractor for GeminiClient {
    async fn extract(&self, request: &ExtractionRequest, prompt: &str) -> Result<String> {
        let mime_type = mime_guess::from_path(&request.file_name)
            .first_or_octet_stream()
            .to_string();
        let data = base64::engine::general_purpose::STANDARD.encode(&request.document);
        let schema = serde_json::to_value(request.kind.response_schema())?;

        debug!(
            "Sending {} ({}, {} bytes) to {}",
            request.file_name,
            mime_type,
            request.document.len(),
            self.model
        );

        self.generate_content(
            vec![Content::user_with_document(prompt, mime_type, data)],
            Some(schema),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_requires_key() {
        assert!(matches!(
            GeminiClient::from_config(&EngineConfig::default()),
            Err(ReconcilerError::Config(_))
        ));

        let config = EngineConfig {
            api_key: Some("key".to_string()),
            ..EngineConfig::default()
        };
        let client = GeminiClient::from_config(&config).unwrap();
        assert_eq!(client.model(), crate::config::DEFAULT_MODEL);
    }
}
