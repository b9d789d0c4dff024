// src/services/generation_client.rs
use crate::errors::BatchError;
use crate::models::{AspectRatio, ImageModel, ModelApi};
use crate::services::ImageProcessor;
use async_trait::async_trait;
use log::debug;
use reqwest::{Client, Response};
use serde_json::json;

/// Anything that can turn one prompt into a list of encoded images.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    async fn generate_images(
        &self,
        prompt: &str,
        aspect_ratio: AspectRatio,
        count: u8,
        model: ImageModel,
    ) -> Result<Vec<String>, BatchError>;
}

pub struct GeminiClient {
    api_key: String,
    base_url: String,
    client: Client,
    image_processor: ImageProcessor,
}

impl GeminiClient {
    pub fn new(api_key: String, base_url: String) -> Self {
        Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::new(),
            image_processor: ImageProcessor::new(),
        }
    }

    fn endpoint(&self, model: ImageModel, method: &str) -> String {
        format!("{}/models/{}:{}", self.base_url, model.id(), method)
    }

    async fn post(&self, url: &str, body: serde_json::Value) -> Result<serde_json::Value, BatchError> {
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| BatchError::Generation(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(provider_error(response).await);
        }

        response
            .json()
            .await
            .map_err(|e| BatchError::Generation(format!("Failed to parse response: {}", e)))
    }

    async fn generate_with_imagen(
        &self,
        prompt: &str,
        aspect_ratio: AspectRatio,
        count: u8,
        model: ImageModel,
    ) -> Result<Vec<String>, BatchError> {
        let result = self
            .post(
                &self.endpoint(model, "predict"),
                json!({
                    "instances": [{ "prompt": prompt }],
                    "parameters": {
                        "sampleCount": count,
                        "aspectRatio": aspect_ratio.as_str(),
                        "outputOptions": { "mimeType": "image/jpeg" }
                    }
                }),
            )
            .await?;

        Ok(self.parse_predictions(&result))
    }

    async fn generate_with_gemini(
        &self,
        prompt: &str,
        aspect_ratio: AspectRatio,
        count: u8,
        model: ImageModel,
    ) -> Result<Vec<String>, BatchError> {
        let url = self.endpoint(model, "generateContent");
        let mut images = Vec::new();

        // One image per call.
        for _ in 0..count {
            let result = self
                .post(
                    &url,
                    json!({
                        "contents": [{ "parts": [{ "text": prompt }] }],
                        "generationConfig": {
                            "responseModalities": ["IMAGE"],
                            "imageConfig": { "aspectRatio": aspect_ratio.as_str() }
                        }
                    }),
                )
                .await?;
            images.extend(self.parse_inline_parts(&result));
        }

        Ok(images)
    }

    fn parse_predictions(&self, data: &serde_json::Value) -> Vec<String> {
        data["predictions"]
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|p| {
                        let bytes = p["bytesBase64Encoded"].as_str()?;
                        let mime = p["mimeType"].as_str().unwrap_or("image/jpeg");
                        Some(self.image_processor.to_data_url(mime, bytes))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn parse_inline_parts(&self, data: &serde_json::Value) -> Vec<String> {
        data["candidates"]
            .as_array()
            .map(|candidates| {
                candidates
                    .iter()
                    .filter_map(|c| c["content"]["parts"].as_array())
                    .flatten()
                    .filter_map(|part| {
                        let inline = &part["inlineData"];
                        let bytes = inline["data"].as_str()?;
                        let mime = inline["mimeType"].as_str().unwrap_or("image/png");
                        Some(self.image_processor.to_data_url(mime, bytes))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl GenerationClient for GeminiClient {
    async fn generate_images(
        &self,
        prompt: &str,
        aspect_ratio: AspectRatio,
        count: u8,
        model: ImageModel,
    ) -> Result<Vec<String>, BatchError> {
        debug!("Requesting {} image(s) from {}", count, model.id());

        match model.api() {
            ModelApi::Imagen => self.generate_with_imagen(prompt, aspect_ratio, count, model).await,
            ModelApi::GeminiNative => {
                self.generate_with_gemini(prompt, aspect_ratio, count, model).await
            }
        }
    }
}

async fn provider_error(response: Response) -> BatchError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    BatchError::Generation(error_message(status.as_u16(), &body))
}

/// Prefers the provider's `error.message`, then the raw body, then the status.
fn error_message(status: u16, body: &str) -> String {
    let from_json = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .filter(|msg| !msg.trim().is_empty());

    from_json
        .or_else(|| {
            let trimmed = body.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        })
        .unwrap_or_else(|| format!("Provider returned HTTP {}", status))
}
