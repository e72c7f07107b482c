use anyhow::{anyhow, Context};
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine};
use serde::Deserialize;
use serde_json::json;

use crate::{
    error::{ApiError, ProviderErrorKind},
    plans::QualityTier,
};

const IMAGE_MODEL: &str = "gpt-image-1";

#[derive(Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
}

/// Base64-encoded PNG returned by the image endpoints.
#[derive(Debug, Clone)]
pub struct GeneratedImage {
    pub b64_png: String,
}

#[derive(Debug, Deserialize)]
struct ImagesResponse {
    data: Vec<ImageDatum>,
}

#[derive(Debug, Deserialize)]
struct ImageDatum {
    b64_json: Option<String>,
}

impl OpenAiClient {
    pub fn new(base_url: String, api_key: Option<String>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .context("failed to create OpenAI HTTP client")?;

        Ok(Self {
            http,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn require_api_key(&self) -> Result<&str, ApiError> {
        self.api_key
            .as_deref()
            .filter(|value| !value.trim().is_empty())
            .ok_or(ApiError::Provider {
                kind: ProviderErrorKind::Auth,
                message: "OPENAI_API_KEY is not configured.".to_string(),
            })
    }

    pub async fn generate_image(
        &self,
        prompt: &str,
        size: &str,
        quality: QualityTier,
    ) -> Result<GeneratedImage, ApiError> {
        let key = self.require_api_key()?;
        let url = format!("{}/images/generations", self.base_url);

        let response = self
            .http
            .post(&url)
            .bearer_auth(key)
            .json(&json!({
                "model": IMAGE_MODEL,
                "prompt": prompt,
                "n": 1,
                "size": size,
                "quality": quality.provider_quality(),
            }))
            .send()
            .await
            .context("OpenAI image generation request failed")?;

        extract_image(response).await
    }

    /// Image edit with a decoded base64 source image and optional mask.
    /// The upstream endpoint only accepts multipart bodies.
    pub async fn edit_image(
        &self,
        prompt: &str,
        image_b64: &str,
        mask_b64: Option<&str>,
        size: &str,
        quality: QualityTier,
    ) -> Result<GeneratedImage, ApiError> {
        let key = self.require_api_key()?;
        let url = format!("{}/images/edits", self.base_url);

        let image_bytes = decode_image_payload(image_b64, "image")?;
        let mut form = reqwest::multipart::Form::new()
            .text("model", IMAGE_MODEL)
            .text("prompt", prompt.to_string())
            .text("n", "1")
            .text("size", size.to_string())
            .text("quality", quality.provider_quality())
            .part(
                "image",
                reqwest::multipart::Part::bytes(image_bytes)
                    .file_name("image.png")
                    .mime_str("image/png")
                    .context("failed to build image part")?,
            );

        if let Some(mask_b64) = mask_b64 {
            let mask_bytes = decode_image_payload(mask_b64, "mask")?;
            form = form.part(
                "mask",
                reqwest::multipart::Part::bytes(mask_bytes)
                    .file_name("mask.png")
                    .mime_str("image/png")
                    .context("failed to build mask part")?,
            );
        }

        let response = self
            .http
            .post(&url)
            .bearer_auth(key)
            .multipart(form)
            .send()
            .await
            .context("OpenAI image edit request failed")?;

        extract_image(response).await
    }
}

async fn extract_image(response: reqwest::Response) -> Result<GeneratedImage, ApiError> {
    let status = response.status();
    let text = response
        .text()
        .await
        .context("failed to read OpenAI response body")?;

    if !status.is_success() {
        let kind = ProviderErrorKind::classify(status.as_u16(), &text);
        let message = serde_json::from_str::<serde_json::Value>(&text)
            .ok()
            .and_then(|body| {
                body.pointer("/error/message")
                    .and_then(serde_json::Value::as_str)
                    .map(str::to_string)
            })
            .unwrap_or_else(|| format!("OpenAI request failed with status {status}"));
        return Err(ApiError::Provider { kind, message });
    }

    let parsed: ImagesResponse =
        serde_json::from_str(&text).context("failed to decode OpenAI images response")?;

    let b64_png = parsed
        .data
        .into_iter()
        .next()
        .and_then(|datum| datum.b64_json)
        .ok_or_else(|| anyhow!("OpenAI response contained no image payload"))?;

    Ok(GeneratedImage { b64_png })
}

fn decode_image_payload(b64: &str, field: &str) -> Result<Vec<u8>, ApiError> {
    // Tolerate data-URL prefixes from browser canvases.
    let raw = b64.rsplit(',').next().unwrap_or(b64).trim();
    BASE64_STANDARD
        .decode(raw)
        .map_err(|_| ApiError::InvalidInput(format!("Invalid base64 payload for {field}.")))
}

#[cfg(test)]
mod tests {
    use super::decode_image_payload;
    use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine};

    #[test]
    fn decodes_plain_and_data_url_payloads() {
        let encoded = BASE64_STANDARD.encode(b"png-bytes");
        assert_eq!(decode_image_payload(&encoded, "image").unwrap(), b"png-bytes");

        let data_url = format!("data:image/png;base64,{encoded}");
        assert_eq!(
            decode_image_payload(&data_url, "image").unwrap(),
            b"png-bytes"
        );
    }

    #[test]
    fn garbage_is_invalid_input() {
        assert!(decode_image_payload("!!not-base64!!", "mask").is_err());
    }
}
