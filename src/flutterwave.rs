use anyhow::{anyhow, Context};
use serde::Deserialize;
use serde_json::{json, Value};
use subtle::ConstantTimeEq;

#[derive(Clone)]
pub struct FlutterwaveClient {
    http: reqwest::Client,
    secret_key: Option<String>,
    secret_hash: Option<String>,
    base_url: String,
}

#[derive(Debug, Clone)]
pub struct PaymentIntent {
    pub tx_ref: String,
    pub amount: f64,
    pub currency: String,
    pub redirect_url: String,
    pub customer_email: String,
    pub meta: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FlutterwaveTransaction {
    pub status: String,
    pub amount: f64,
    pub currency: String,
    pub tx_ref: String,
    #[serde(default)]
    pub meta: Option<Value>,
}

impl FlutterwaveTransaction {
    pub fn is_successful(&self, expected_amount: f64, expected_currency: &str) -> bool {
        self.status.eq_ignore_ascii_case("successful")
            && self.amount >= expected_amount
            && self.currency.eq_ignore_ascii_case(expected_currency)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FlutterwaveEvent {
    pub event: String,
    pub data: Value,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    status: String,
    message: Option<String>,
    data: Option<Value>,
}

impl FlutterwaveClient {
    pub fn new(
        base_url: String,
        secret_key: Option<String>,
        secret_hash: Option<String>,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .context("failed to create Flutterwave HTTP client")?;

        Ok(Self {
            http,
            secret_key,
            secret_hash,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Flutterwave webhooks authenticate with a shared secret echoed in the
    /// `verif-hash` header, compared in constant time.
    pub fn verify_webhook_hash(&self, header_value: &str) -> anyhow::Result<()> {
        let secret_hash = self
            .secret_hash
            .as_ref()
            .ok_or_else(|| anyhow!("FLUTTERWAVE_SECRET_HASH is not configured."))?;

        let matches: bool = secret_hash
            .as_bytes()
            .ct_eq(header_value.trim().as_bytes())
            .into();
        if !matches {
            return Err(anyhow!("invalid verif-hash header."));
        }

        Ok(())
    }

    pub async fn initialize_payment(&self, intent: &PaymentIntent) -> anyhow::Result<String> {
        let body = json!({
            "tx_ref": intent.tx_ref,
            "amount": intent.amount,
            "currency": intent.currency,
            "redirect_url": intent.redirect_url,
            "customer": { "email": intent.customer_email },
            "meta": intent.meta,
        });

        let data = self.post_json("payments", body).await?;
        data.get("link")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| anyhow!("Flutterwave payment response missing hosted link"))
    }

    pub async fn verify_transaction(
        &self,
        transaction_id: &str,
    ) -> anyhow::Result<FlutterwaveTransaction> {
        let data = self
            .get_json(&format!("transactions/{}/verify", transaction_id))
            .await?;
        serde_json::from_value(data).context("failed to decode Flutterwave transaction")
    }

    fn require_secret_key(&self) -> anyhow::Result<&str> {
        self.secret_key
            .as_deref()
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| anyhow!("FLUTTERWAVE_SECRET_KEY is not configured."))
    }

    async fn post_json(&self, path: &str, body: Value) -> anyhow::Result<Value> {
        let key = self.require_secret_key()?;
        let url = format!("{}/{}", self.base_url, path);

        let response = self
            .http
            .post(&url)
            .bearer_auth(key)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Flutterwave POST failed for {path}"))?;

        parse_envelope(response, path).await
    }

    async fn get_json(&self, path: &str) -> anyhow::Result<Value> {
        let key = self.require_secret_key()?;
        let url = format!("{}/{}", self.base_url, path);

        let response = self
            .http
            .get(&url)
            .bearer_auth(key)
            .send()
            .await
            .with_context(|| format!("Flutterwave GET failed for {path}"))?;

        parse_envelope(response, path).await
    }
}

async fn parse_envelope(response: reqwest::Response, path: &str) -> anyhow::Result<Value> {
    let status = response.status();
    let text = response
        .text()
        .await
        .with_context(|| format!("failed to read Flutterwave response body for {path}"))?;

    if !status.is_success() {
        return Err(anyhow!(
            "Flutterwave API {} failed with status {}: {}",
            path,
            status,
            text
        ));
    }

    let envelope: Envelope = serde_json::from_str(&text)
        .with_context(|| format!("failed to decode Flutterwave response for {path}"))?;

    if envelope.status != "success" {
        return Err(anyhow!(
            "Flutterwave API {} returned error: {}",
            path,
            envelope.message.unwrap_or_default()
        ));
    }

    envelope
        .data
        .ok_or_else(|| anyhow!("Flutterwave API {} returned no data", path))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(hash: Option<&str>) -> FlutterwaveClient {
        FlutterwaveClient::new(
            "https://api.flutterwave.com/v3".to_string(),
            Some("FLWSECK_TEST".to_string()),
            hash.map(str::to_string),
        )
        .unwrap()
    }

    #[test]
    fn matching_hash_passes() {
        assert!(client(Some("hash-123"))
            .verify_webhook_hash("hash-123")
            .is_ok());
    }

    #[test]
    fn mismatched_or_missing_hash_fails() {
        assert!(client(Some("hash-123"))
            .verify_webhook_hash("hash-456")
            .is_err());
        assert!(client(None).verify_webhook_hash("hash-123").is_err());
    }

    #[test]
    fn transaction_success_requires_amount_and_currency() {
        let tx = FlutterwaveTransaction {
            status: "successful".to_string(),
            amount: 50.0,
            currency: "USD".to_string(),
            tx_ref: "tx_1".to_string(),
            meta: None,
        };
        assert!(tx.is_successful(50.0, "USD"));
        assert!(tx.is_successful(50.0, "usd"));
        assert!(!tx.is_successful(60.0, "USD"));
        assert!(!tx.is_successful(50.0, "NGN"));

        let failed = FlutterwaveTransaction {
            status: "failed".to_string(),
            ..tx
        };
        assert!(!failed.is_successful(50.0, "USD"));
    }
}
