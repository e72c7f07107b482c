use std::{sync::Arc, time::Duration};

use crate::{
    auth::IdentityVerifier, clerk::ClerkClient, config::Config, fal::FalClient,
    flutterwave::FlutterwaveClient, openai::OpenAiClient, rate_limit::SlidingWindowLimiter,
    supabase::SupabaseClient,
};

/// Explicitly constructed clients shared across handlers. Nothing here is
/// initialized at import time; tests inject doubles by pointing the base
/// URLs at local mock servers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub supabase: SupabaseClient,
    pub auth: IdentityVerifier,
    pub clerk: ClerkClient,
    pub openai: OpenAiClient,
    pub fal: FalClient,
    pub flutterwave: FlutterwaveClient,
    pub generation_limiter: Arc<SlidingWindowLimiter>,
    pub api_limiter: Arc<SlidingWindowLimiter>,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        supabase: SupabaseClient,
        auth: IdentityVerifier,
        clerk: ClerkClient,
        openai: OpenAiClient,
        fal: FalClient,
        flutterwave: FlutterwaveClient,
    ) -> Self {
        Self {
            generation_limiter: Arc::new(SlidingWindowLimiter::new(
                Duration::from_secs(15 * 60),
                30,
            )),
            api_limiter: Arc::new(SlidingWindowLimiter::new(Duration::from_secs(15 * 60), 300)),
            config: Arc::new(config),
            supabase,
            auth,
            clerk,
            openai,
            fal,
            flutterwave,
        }
    }

    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        let supabase = SupabaseClient::new(
            config.supabase_url.clone(),
            &config.supabase_service_role_key,
        )?;
        let auth = IdentityVerifier::new(config.clerk_issuer.clone())?;
        let clerk = ClerkClient::new(
            config.clerk_api_base.clone(),
            config.clerk_secret_key.as_deref(),
            config.clerk_webhook_secret.clone(),
        )?;
        let openai = OpenAiClient::new(config.openai_api_base.clone(), config.openai_api_key.clone())?;
        let fal = FalClient::new(config.fal_api_base.clone(), config.fal_api_key.clone())?;
        let flutterwave = FlutterwaveClient::new(
            config.flutterwave_api_base.clone(),
            config.flutterwave_secret_key.clone(),
            config.flutterwave_secret_hash.clone(),
        )?;

        Ok(Self::new(
            config, supabase, auth, clerk, openai, fal, flutterwave,
        ))
    }
}
