use anyhow::{anyhow, Context};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Thin PostgREST + RPC client. The service-role key bypasses row level
/// security, so this client must only ever run server-side.
#[derive(Clone)]
pub struct SupabaseClient {
    base_url: String,
    http: reqwest::Client,
}

impl SupabaseClient {
    pub fn new(base_url: String, service_role_key: &str) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "apikey",
            HeaderValue::from_str(service_role_key).context("invalid Supabase service key")?,
        );
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {service_role_key}"))
                .context("invalid Supabase service key for Authorization header")?,
        );

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .context("failed to create Supabase HTTP client")?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    pub async fn select_many<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &[(&str, String)],
    ) -> anyhow::Result<Vec<T>> {
        let url = format!("{}/rest/v1/{}", self.base_url, table);
        let response = self
            .http
            .get(&url)
            .query(query)
            .send()
            .await
            .with_context(|| format!("Supabase select failed for {table}"))?;

        let value = parse_postgrest_response(response, table).await?;
        serde_json::from_value(value)
            .with_context(|| format!("failed to decode Supabase rows for {table}"))
    }

    pub async fn select_one<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &[(&str, String)],
    ) -> anyhow::Result<Option<T>> {
        let mut rows: Vec<T> = self.select_many(table, query).await?;
        if rows.is_empty() {
            Ok(None)
        } else {
            Ok(Some(rows.swap_remove(0)))
        }
    }

    /// Inserts a row and returns the database representation.
    pub async fn insert_returning<T: DeserializeOwned>(
        &self,
        table: &str,
        row: Value,
    ) -> anyhow::Result<T> {
        let url = format!("{}/rest/v1/{}", self.base_url, table);
        let response = self
            .http
            .post(&url)
            .header("Prefer", "return=representation")
            .json(&row)
            .send()
            .await
            .with_context(|| format!("Supabase insert failed for {table}"))?;

        let value = parse_postgrest_response(response, table).await?;
        let mut rows: Vec<T> = serde_json::from_value(value)
            .with_context(|| format!("failed to decode inserted row for {table}"))?;
        if rows.is_empty() {
            return Err(anyhow!("Supabase insert into {} returned no rows", table));
        }
        Ok(rows.swap_remove(0))
    }

    pub async fn update(
        &self,
        table: &str,
        query: &[(&str, String)],
        patch: Value,
    ) -> anyhow::Result<()> {
        let url = format!("{}/rest/v1/{}", self.base_url, table);
        let response = self
            .http
            .patch(&url)
            .query(query)
            .json(&patch)
            .send()
            .await
            .with_context(|| format!("Supabase update failed for {table}"))?;

        parse_postgrest_response(response, table).await.map(|_| ())
    }

    pub async fn rpc<T: DeserializeOwned>(&self, function: &str, args: Value) -> anyhow::Result<T> {
        let value = self.rpc_value(function, args).await?;
        serde_json::from_value(value)
            .with_context(|| format!("failed to decode RPC result for {function}"))
    }

    pub async fn rpc_value(&self, function: &str, args: Value) -> anyhow::Result<Value> {
        let url = format!("{}/rest/v1/rpc/{}", self.base_url, function);
        let response = self
            .http
            .post(&url)
            .json(&args)
            .send()
            .await
            .with_context(|| format!("Supabase RPC request failed for {function}"))?;

        parse_postgrest_response(response, function).await
    }
}

async fn parse_postgrest_response(
    response: reqwest::Response,
    target: &str,
) -> anyhow::Result<Value> {
    let status = response.status();
    let text = response
        .text()
        .await
        .with_context(|| format!("failed to read Supabase response body for {target}"))?;

    if !status.is_success() {
        // PostgREST error bodies carry {message, code, details, hint}.
        let detail = serde_json::from_str::<Value>(&text)
            .ok()
            .and_then(|body| {
                body.get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .unwrap_or(text);
        return Err(anyhow!(
            "Supabase request for {} failed with status {}: {}",
            target,
            status,
            detail
        ));
    }

    if text.trim().is_empty() {
        return Ok(Value::Null);
    }

    serde_json::from_str(&text)
        .with_context(|| format!("invalid JSON in Supabase response for {target}"))
}
