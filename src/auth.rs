use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use tokio::sync::RwLock;

/// Verifies Clerk-issued RS256 bearer tokens against the issuer's JWKS.
/// Key sets are cached per issuer; authenticating does not call Clerk's
/// backend API on the hot path.
#[derive(Clone)]
pub struct IdentityVerifier {
    http: reqwest::Client,
    jwks_cache: Arc<RwLock<HashMap<String, CachedKeySet>>>,
    jwks_ttl: Duration,
    expected_issuer: Option<String>,
}

#[derive(Clone)]
struct CachedKeySet {
    keys: Vec<Jwk>,
    fetched_at: Instant,
}

#[derive(Debug, Deserialize, Clone)]
struct JwkSet {
    keys: Vec<Jwk>,
}

#[derive(Debug, Deserialize, Clone)]
struct Jwk {
    kid: Option<String>,
    kty: String,
    n: Option<String>,
    e: Option<String>,
    alg: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UnverifiedClaims {
    iss: Option<String>,
}

/// Claims of a verified token. `sub` is the identity-provider user id and the
/// primary key of the profiles table.
#[derive(Debug, Deserialize, Clone)]
pub struct IdentityClaims {
    pub sub: String,
    pub iss: String,
    pub exp: usize,
    pub nbf: Option<usize>,
}

impl IdentityVerifier {
    pub fn new(expected_issuer: Option<String>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .context("failed to build identity HTTP client")?;

        Ok(Self {
            http,
            jwks_cache: Arc::new(RwLock::new(HashMap::new())),
            jwks_ttl: Duration::from_secs(10 * 60),
            expected_issuer: expected_issuer
                .map(|value| value.trim().trim_end_matches('/').to_string())
                .filter(|value| !value.is_empty()),
        })
    }

    pub async fn verify_bearer_header(
        &self,
        authorization_header: &str,
    ) -> anyhow::Result<IdentityClaims> {
        let token = extract_bearer_token(authorization_header)?;
        self.verify_token(token).await
    }

    pub async fn verify_token(&self, token: &str) -> anyhow::Result<IdentityClaims> {
        let header = decode_header(token).context("invalid JWT header")?;
        let kid = header
            .kid
            .clone()
            .ok_or_else(|| anyhow!("JWT header missing kid"))?;

        let issuer = parse_unverified_issuer(token)?;

        if let Some(expected_issuer) = &self.expected_issuer {
            if issuer != *expected_issuer {
                return Err(anyhow!(
                    "JWT issuer mismatch. expected={}, got={}",
                    expected_issuer,
                    issuer
                ));
            }
        }

        let keys = self.key_set_for_issuer(&issuer).await?;
        let jwk = keys
            .iter()
            .find(|candidate| candidate.kid.as_deref() == Some(kid.as_str()))
            .ok_or_else(|| anyhow!("no matching JWK found for kid"))?;

        if jwk.kty != "RSA" {
            return Err(anyhow!("unsupported JWK type: {}", jwk.kty));
        }
        if let Some(alg) = &jwk.alg {
            if alg != "RS256" {
                return Err(anyhow!("unsupported JWK alg: {}", alg));
            }
        }

        let n = jwk
            .n
            .as_ref()
            .ok_or_else(|| anyhow!("JWK missing modulus (n)"))?;
        let e = jwk
            .e
            .as_ref()
            .ok_or_else(|| anyhow!("JWK missing exponent (e)"))?;
        let decoding_key =
            DecodingKey::from_rsa_components(n, e).context("failed to build RSA decoding key")?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_nbf = true;
        validation.set_issuer(&[issuer.as_str()]);

        let token_data = decode::<IdentityClaims>(token, &decoding_key, &validation)
            .context("JWT signature validation failed")?;

        Ok(token_data.claims)
    }

    async fn key_set_for_issuer(&self, issuer: &str) -> anyhow::Result<Vec<Jwk>> {
        {
            let cache = self.jwks_cache.read().await;
            if let Some(cached) = cache.get(issuer) {
                if cached.fetched_at.elapsed() < self.jwks_ttl {
                    return Ok(cached.keys.clone());
                }
            }
        }

        let jwks_url = format!("{}/.well-known/jwks.json", issuer.trim_end_matches('/'));
        let response = self
            .http
            .get(&jwks_url)
            .send()
            .await
            .with_context(|| format!("failed to fetch JWKS from {jwks_url}"))?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "failed to fetch JWKS from {}: HTTP {}",
                jwks_url,
                response.status()
            ));
        }

        let jwks: JwkSet = response
            .json()
            .await
            .with_context(|| format!("invalid JWKS response from {jwks_url}"))?;

        let keys = jwks.keys;
        let mut cache = self.jwks_cache.write().await;
        cache.insert(
            issuer.to_string(),
            CachedKeySet {
                keys: keys.clone(),
                fetched_at: Instant::now(),
            },
        );

        Ok(keys)
    }
}

pub fn extract_bearer_token(value: &str) -> anyhow::Result<&str> {
    let mut parts = value.splitn(2, ' ');
    let scheme = parts.next().unwrap_or_default();
    let token = parts.next().unwrap_or_default();

    if !scheme.eq_ignore_ascii_case("bearer") || token.trim().is_empty() {
        return Err(anyhow!("invalid Authorization header format"));
    }

    Ok(token.trim())
}

fn parse_unverified_issuer(token: &str) -> anyhow::Result<String> {
    let mut parts = token.split('.');
    let _header = parts.next();
    let payload = parts
        .next()
        .ok_or_else(|| anyhow!("JWT payload segment missing"))?;

    let decoded = URL_SAFE_NO_PAD
        .decode(payload.as_bytes())
        .context("failed to decode JWT payload")?;

    let claims = serde_json::from_slice::<UnverifiedClaims>(&decoded)
        .context("failed to parse unverified JWT claims")?;

    claims
        .iss
        .map(|issuer| issuer.trim().trim_end_matches('/').to_string())
        .ok_or_else(|| anyhow!("JWT missing iss claim"))
}
