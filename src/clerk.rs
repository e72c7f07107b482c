use anyhow::{anyhow, Context};
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine};
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;

#[derive(Clone)]
pub struct ClerkClient {
    http: reqwest::Client,
    api_base: String,
    webhook_secret: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ClerkUser {
    pub primary_email_address_id: Option<String>,
    #[serde(default)]
    pub email_addresses: Vec<ClerkEmailAddress>,
}

#[derive(Debug, Deserialize)]
pub struct ClerkEmailAddress {
    pub id: String,
    pub email_address: String,
}

impl ClerkClient {
    pub fn new(
        api_base: String,
        secret_key: Option<&str>,
        webhook_secret: Option<String>,
    ) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        if let Some(secret) = secret_key {
            let value = format!("Bearer {}", secret);
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&value).context("invalid CLERK_SECRET_KEY for header")?,
            );
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .context("failed to build Clerk HTTP client")?;

        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            webhook_secret,
        })
    }

    pub async fn get_user(&self, user_id: &str) -> anyhow::Result<ClerkUser> {
        let url = format!("{}/users/{}", self.api_base, user_id);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("failed to call Clerk API for user {user_id}"))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!(
                "Clerk API get user failed with status {}: {}",
                status,
                body
            ));
        }

        response
            .json::<ClerkUser>()
            .await
            .context("failed to decode Clerk user response")
    }

    pub async fn get_primary_email(&self, user_id: &str) -> anyhow::Result<Option<String>> {
        let user = self.get_user(user_id).await?;
        let primary_id = match user.primary_email_address_id {
            Some(value) => value,
            None => return Ok(None),
        };

        let email = user
            .email_addresses
            .into_iter()
            .find(|entry| entry.id == primary_id)
            .map(|entry| entry.email_address);

        Ok(email)
    }

    /// Verifies a Clerk (Svix) webhook: HMAC-SHA256 over
    /// `{message id}.{timestamp}.{payload}` keyed with the decoded portion of
    /// the `whsec_` secret, compared in constant time against every candidate
    /// in the signature header.
    pub fn verify_webhook_signature(
        &self,
        message_id: &str,
        timestamp: &str,
        signature_header: &str,
        payload: &[u8],
    ) -> anyhow::Result<()> {
        let webhook_secret = self
            .webhook_secret
            .as_ref()
            .ok_or_else(|| anyhow!("CLERK_WEBHOOK_SECRET is not configured."))?;

        let timestamp_seconds = timestamp
            .trim()
            .parse::<i64>()
            .context("invalid webhook timestamp")?;
        let now = Utc::now().timestamp();
        if (now - timestamp_seconds).abs() > 300 {
            return Err(anyhow!("webhook timestamp outside tolerance."));
        }

        let secret = webhook_secret
            .strip_prefix("whsec_")
            .unwrap_or(webhook_secret);
        let key = BASE64_STANDARD
            .decode(secret)
            .context("invalid CLERK_WEBHOOK_SECRET encoding")?;

        let payload_str =
            std::str::from_utf8(payload).context("invalid UTF-8 payload for webhook signature")?;
        let signed_content = format!("{}.{}.{}", message_id, timestamp, payload_str);

        let mut mac =
            Hmac::<Sha256>::new_from_slice(&key).context("invalid Clerk webhook secret")?;
        mac.update(signed_content.as_bytes());
        let expected = BASE64_STANDARD.encode(mac.finalize().into_bytes());

        // Header format: space-delimited "v1,<base64>" entries.
        let is_match = signature_header
            .split_whitespace()
            .filter_map(|entry| entry.split_once(','))
            .filter(|(version, _)| *version == "v1")
            .any(|(_, candidate)| expected.as_bytes().ct_eq(candidate.as_bytes()).into());

        if !is_match {
            return Err(anyhow!("invalid webhook signature."));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_with_secret(secret: &str) -> ClerkClient {
        ClerkClient::new(
            "https://api.clerk.com/v1".to_string(),
            None,
            Some(secret.to_string()),
        )
        .unwrap()
    }

    fn sign(secret_b64: &str, message_id: &str, timestamp: &str, payload: &[u8]) -> String {
        let key = BASE64_STANDARD.decode(secret_b64).unwrap();
        let mut mac = Hmac::<Sha256>::new_from_slice(&key).unwrap();
        mac.update(
            format!(
                "{}.{}.{}",
                message_id,
                timestamp,
                std::str::from_utf8(payload).unwrap()
            )
            .as_bytes(),
        );
        format!("v1,{}", BASE64_STANDARD.encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn valid_signature_passes() {
        let secret_b64 = BASE64_STANDARD.encode(b"test-secret-key");
        let client = client_with_secret(&format!("whsec_{secret_b64}"));
        let timestamp = Utc::now().timestamp().to_string();
        let payload = br#"{"type":"user.created"}"#;
        let header = sign(&secret_b64, "msg_1", &timestamp, payload);

        assert!(client
            .verify_webhook_signature("msg_1", &timestamp, &header, payload)
            .is_ok());
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let secret_b64 = BASE64_STANDARD.encode(b"test-secret-key");
        let client = client_with_secret(&format!("whsec_{secret_b64}"));
        let timestamp = Utc::now().timestamp().to_string();
        let header = sign(&secret_b64, "msg_1", &timestamp, br#"{"type":"user.created"}"#);

        assert!(client
            .verify_webhook_signature("msg_1", &timestamp, &header, br#"{"type":"user.deleted"}"#)
            .is_err());
    }

    #[test]
    fn stale_timestamp_is_rejected() {
        let secret_b64 = BASE64_STANDARD.encode(b"test-secret-key");
        let client = client_with_secret(&format!("whsec_{secret_b64}"));
        let timestamp = (Utc::now().timestamp() - 3600).to_string();
        let payload = br#"{"type":"user.created"}"#;
        let header = sign(&secret_b64, "msg_1", &timestamp, payload);

        assert!(client
            .verify_webhook_signature("msg_1", &timestamp, &header, payload)
            .is_err());
    }

    #[test]
    fn missing_secret_is_an_error() {
        let client = ClerkClient::new("https://api.clerk.com/v1".to_string(), None, None).unwrap();
        assert!(client
            .verify_webhook_signature("msg_1", "0", "v1,abc", b"{}")
            .is_err());
    }
}
