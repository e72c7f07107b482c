use anyhow::{anyhow, Context};
use serde_json::{json, Value};

use crate::error::{ApiError, ProviderErrorKind};

const MESH_MODEL: &str = "fal-ai/trellis";
const MULTI_VIEW_MODEL: &str = "fal-ai/era-3d";

/// Fal.ai synchronous inference client (`POST {base}/{model}` with `Key`
/// authorization). Model outputs are JSON documents; the typed wrappers below
/// pull out the fields the handlers need.
#[derive(Clone)]
pub struct FalClient {
    http: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
}

#[derive(Debug, Clone)]
pub struct MeshResult {
    pub mesh_url: String,
    pub thumbnail_url: Option<String>,
}

impl FalClient {
    pub fn new(base_url: String, api_key: Option<String>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .context("failed to create Fal HTTP client")?;

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
                message: "FAL_KEY is not configured.".to_string(),
            })
    }

    pub async fn generate_mesh(&self, image_url: &str) -> Result<MeshResult, ApiError> {
        let output = self
            .run(MESH_MODEL, json!({ "image_url": image_url }))
            .await?;

        let mesh_url = output
            .pointer("/model_mesh/url")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| anyhow!("Fal mesh output missing model_mesh.url"))?;

        let thumbnail_url = output
            .pointer("/thumbnail/url")
            .and_then(Value::as_str)
            .map(str::to_string);

        Ok(MeshResult {
            mesh_url,
            thumbnail_url,
        })
    }

    pub async fn generate_multi_view(
        &self,
        image_url: &str,
        prompt: &str,
        view_count: i64,
    ) -> Result<Vec<String>, ApiError> {
        let output = self
            .run(
                MULTI_VIEW_MODEL,
                json!({
                    "image_url": image_url,
                    "prompt": prompt,
                    "num_views": view_count,
                }),
            )
            .await?;

        let views: Vec<String> = output
            .get("images")
            .and_then(Value::as_array)
            .map(|images| {
                images
                    .iter()
                    .filter_map(|image| {
                        image
                            .get("url")
                            .and_then(Value::as_str)
                            .map(str::to_string)
                    })
                    .collect()
            })
            .unwrap_or_default();

        if views.is_empty() {
            return Err(anyhow!("Fal multi-view output contained no images").into());
        }

        Ok(views)
    }

    async fn run(&self, model: &str, input: Value) -> Result<Value, ApiError> {
        let key = self.require_api_key()?;
        let url = format!("{}/{}", self.base_url, model);

        let response = self
            .http
            .post(&url)
            .header("Authorization", format!("Key {key}"))
            .json(&input)
            .send()
            .await
            .with_context(|| format!("Fal request failed for {model}"))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .with_context(|| format!("failed to read Fal response body for {model}"))?;

        if !status.is_success() {
            let kind = ProviderErrorKind::classify(status.as_u16(), &text);
            let message = serde_json::from_str::<Value>(&text)
                .ok()
                .and_then(|body| {
                    body.get("detail")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                })
                .unwrap_or_else(|| format!("Fal request for {model} failed with status {status}"));
            return Err(ApiError::Provider { kind, message });
        }

        serde_json::from_str(&text)
            .with_context(|| format!("failed to decode Fal response for {model}"))
            .map_err(ApiError::from)
    }
}
