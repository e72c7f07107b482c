use std::{env, path::PathBuf};

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub trust_proxy: bool,
    pub tls_key_path: Option<PathBuf>,
    pub tls_cert_path: Option<PathBuf>,
    pub supabase_url: String,
    pub supabase_service_role_key: String,
    pub clerk_secret_key: Option<String>,
    pub clerk_issuer: Option<String>,
    pub clerk_api_base: String,
    pub clerk_webhook_secret: Option<String>,
    pub openai_api_key: Option<String>,
    pub openai_api_base: String,
    pub fal_api_key: Option<String>,
    pub fal_api_base: String,
    pub flutterwave_secret_key: Option<String>,
    pub flutterwave_secret_hash: Option<String>,
    pub flutterwave_api_base: String,
    pub app_url: Option<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let port = parse_u16(env::var("PORT").ok(), 9301);

        let trust_proxy = match env::var("TRUST_PROXY") {
            Ok(value) => {
                let normalized = value.trim().to_lowercase();
                !matches!(normalized.as_str(), "false" | "0" | "off" | "no")
            }
            Err(_) => true,
        };

        let supabase_url = env::var("SUPABASE_URL")
            .or_else(|_| env::var("NEXT_PUBLIC_SUPABASE_URL"))
            .map_err(|_| anyhow::anyhow!("SUPABASE_URL environment variable is not set"))?;
        let supabase_url = supabase_url.trim().trim_end_matches('/').to_string();

        let supabase_service_role_key = env::var("SUPABASE_SERVICE_ROLE_KEY").map_err(|_| {
            anyhow::anyhow!("SUPABASE_SERVICE_ROLE_KEY environment variable is not set")
        })?;

        Ok(Self {
            port,
            trust_proxy,
            tls_key_path: env::var("TLS_KEY_PATH").ok().map(PathBuf::from),
            tls_cert_path: env::var("TLS_CERT_PATH").ok().map(PathBuf::from),
            supabase_url,
            supabase_service_role_key,
            clerk_secret_key: non_empty(env::var("CLERK_SECRET_KEY").ok()),
            clerk_issuer: non_empty(env::var("CLERK_ISSUER").ok()),
            clerk_api_base: env::var("CLERK_API_BASE")
                .unwrap_or_else(|_| "https://api.clerk.com/v1".to_string()),
            clerk_webhook_secret: non_empty(env::var("CLERK_WEBHOOK_SECRET").ok()),
            openai_api_key: non_empty(env::var("OPENAI_API_KEY").ok()),
            openai_api_base: env::var("OPENAI_API_BASE")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            fal_api_key: non_empty(
                env::var("FAL_KEY")
                    .ok()
                    .or_else(|| env::var("FAL_AI_API_KEY").ok()),
            ),
            fal_api_base: env::var("FAL_API_BASE")
                .unwrap_or_else(|_| "https://fal.run".to_string()),
            flutterwave_secret_key: non_empty(env::var("FLUTTERWAVE_SECRET_KEY").ok()),
            flutterwave_secret_hash: non_empty(env::var("FLUTTERWAVE_SECRET_HASH").ok()),
            flutterwave_api_base: env::var("FLUTTERWAVE_API_BASE")
                .unwrap_or_else(|_| "https://api.flutterwave.com/v3".to_string()),
            app_url: non_empty(
                env::var("APP_URL")
                    .ok()
                    .or_else(|| env::var("NEXT_PUBLIC_APP_URL").ok()),
            ),
        })
    }
}

fn parse_u16(value: Option<String>, fallback: u16) -> u16 {
    value
        .and_then(|v| v.parse::<u16>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(fallback)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::{non_empty, parse_u16};

    #[test]
    fn parse_u16_rejects_zero_and_garbage() {
        assert_eq!(parse_u16(Some("0".to_string()), 9301), 9301);
        assert_eq!(parse_u16(Some("nope".to_string()), 9301), 9301);
        assert_eq!(parse_u16(Some("8080".to_string()), 9301), 8080);
        assert_eq!(parse_u16(None, 9301), 9301);
    }

    #[test]
    fn non_empty_trims_and_filters() {
        assert_eq!(non_empty(Some("  ".to_string())), None);
        assert_eq!(non_empty(Some(" k ".to_string())), Some("k".to_string()));
        assert_eq!(non_empty(None), None);
    }
}
