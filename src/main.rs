mod assets;
mod auth;
mod clerk;
mod config;
mod credits;
mod entitlement;
mod error;
mod fal;
mod flutterwave;
mod handlers;
mod invitations;
mod middleware;
mod notifications;
mod openai;
mod org_funding;
mod plans;
mod rate_limit;
mod serde_pg;
mod state;
mod supabase;

use std::{collections::HashSet, env, net::SocketAddr, path::PathBuf};

use anyhow::Context;
use axum::{
    extract::DefaultBodyLimit,
    http::Method,
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use axum_server::tls_rustls::RustlsConfig;
use config::Config;
use state::AppState;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let loaded_env_files = load_env_files()?;
    init_tracing();
    if loaded_env_files.is_empty() {
        tracing::warn!("No .env or .env.local file found. Using process environment only.");
    } else {
        let files = loaded_env_files
            .iter()
            .map(|path| path.display().to_string())
            .collect::<Vec<_>>()
            .join(", ");
        tracing::info!(files = %files, "Loaded environment files");
    }

    let config = Config::from_env()?;

    let production = env::var("NODE_ENV")
        .ok()
        .map(|value| value.eq_ignore_ascii_case("production"))
        .unwrap_or(false);

    if config.flutterwave_secret_key.is_none() || config.flutterwave_secret_hash.is_none() {
        if production {
            return Err(anyhow::anyhow!(
                "FLUTTERWAVE_SECRET_KEY and FLUTTERWAVE_SECRET_HASH must be set in production"
            ));
        }
        tracing::warn!(
            "Flutterwave secrets are not set. Payments will not work until they are provided."
        );
    }

    if config.clerk_issuer.is_none() {
        tracing::warn!(
            "CLERK_ISSUER is not set. JWT verification will accept any valid Clerk issuer."
        );
    }
    if config.clerk_webhook_secret.is_none() {
        tracing::warn!(
            "CLERK_WEBHOOK_SECRET is not set. Sign-up webhooks will be rejected until it is provided."
        );
    }
    if config.openai_api_key.is_none() {
        tracing::warn!("OPENAI_API_KEY is not set. Image generation will not work.");
    }
    if config.fal_api_key.is_none() {
        tracing::warn!("FAL_KEY is not set. Multi-view and 3D generation will not work.");
    }

    let state = AppState::from_config(config.clone())?;

    match state
        .supabase
        .select_many::<serde_json::Value>(
            "subscription_plans",
            &[("select", "id".to_string()), ("limit", "1".to_string())],
        )
        .await
    {
        Ok(_) => {
            tracing::info!("Supabase connectivity check passed");
        }
        Err(error) => {
            tracing::error!(
                error = ?error,
                supabase_url = %config.supabase_url,
                "Supabase connectivity check failed. Verify SUPABASE_URL and SUPABASE_SERVICE_ROLE_KEY."
            );
        }
    }

    let app = build_router(state.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));

    if let Some((cert_path, key_path)) = valid_tls_paths(&config) {
        let tls_config = RustlsConfig::from_pem_file(cert_path, key_path)
            .await
            .context("failed to load TLS certificate/key")?;

        tracing::info!(
            port = config.port,
            "TLS configuration loaded. Running in HTTPS mode."
        );

        axum_server::bind_rustls(addr, tls_config)
            .serve(app.into_make_service_with_connect_info::<SocketAddr>())
            .await
            .context("HTTPS server failed")?;
    } else {
        tracing::info!(port = config.port, "Running in HTTP mode.");
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .context("failed to bind TCP listener")?;

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .context("HTTP server failed")?;
    }

    Ok(())
}

fn build_router(state: AppState) -> Router {
    let generation_router = Router::new()
        .route("/render-image", post(handlers::generation::render_image))
        .route("/edit-image", post(handlers::generation::edit_image))
        .route(
            "/generate-multi-view",
            post(handlers::generation::generate_multi_view),
        )
        .route("/generate-3d", post(handlers::generation::generate_3d))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::generation_rate_limit,
        ));

    let account_router = Router::new()
        .route("/profile", get(handlers::account::get_profile))
        .route("/assets", get(handlers::account::list_assets))
        .route("/notifications", get(handlers::account::list_notifications))
        .route(
            "/notifications/read",
            post(handlers::account::mark_notification_read),
        );

    let payment_router = Router::new()
        .route(
            "/payment/initialize",
            post(handlers::payments::initialize_payment),
        )
        .route("/payment/verify", post(handlers::payments::verify_payment));

    let team_router = Router::new()
        .route(
            "/invitations",
            post(handlers::team::create_invitation).get(handlers::team::list_invitations),
        )
        .route(
            "/invitations/accept",
            post(handlers::team::accept_invitation),
        )
        .route(
            "/invitations/{id}/resend",
            post(handlers::team::resend_invitation),
        );

    let api_router = Router::new()
        .merge(generation_router)
        .merge(account_router)
        .merge(payment_router)
        .merge(team_router)
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::api_rate_limit,
        ));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    Router::new()
        .route(
            "/api/webhooks/clerk",
            post(handlers::webhooks::handle_clerk_webhook),
        )
        .route(
            "/api/webhooks/flutterwave",
            post(handlers::webhooks::handle_flutterwave_webhook),
        )
        .nest("/health", Router::new().route("/", get(handlers::health)))
        .nest("/api", api_router)
        .fallback(handlers::not_found)
        .with_state(state)
        .layer(DefaultBodyLimit::max(25 * 1024 * 1024))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

fn valid_tls_paths(config: &Config) -> Option<(String, String)> {
    let cert_path = config
        .tls_cert_path
        .as_ref()
        .map(|path| path.to_string_lossy().to_string());
    let key_path = config
        .tls_key_path
        .as_ref()
        .map(|path| path.to_string_lossy().to_string());

    match (cert_path, key_path) {
        (Some(cert_path), Some(key_path)) => {
            let cert_exists = std::path::Path::new(&cert_path).exists();
            let key_exists = std::path::Path::new(&key_path).exists();

            if cert_exists && key_exists {
                Some((cert_path, key_path))
            } else {
                if !key_exists {
                    tracing::error!(path = %key_path, "TLS key file not found");
                }
                if !cert_exists {
                    tracing::error!(path = %cert_path, "TLS certificate file not found");
                }
                tracing::error!("Proceeding without TLS.");
                None
            }
        }
        (Some(cert_path), None) => {
            tracing::error!(path = %cert_path, "TLS certificate file provided but TLS key path missing");
            tracing::error!("Proceeding without TLS.");
            None
        }
        (None, Some(key_path)) => {
            tracing::error!(path = %key_path, "TLS key file provided but TLS certificate path missing");
            tracing::error!("Proceeding without TLS.");
            None
        }
        (None, None) => None,
    }
}

fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

fn load_env_files() -> anyhow::Result<Vec<PathBuf>> {
    let mut roots = Vec::new();
    if let Ok(cwd) = env::current_dir() {
        roots.push(cwd);
    }
    if let Ok(executable_path) = env::current_exe() {
        if let Some(executable_dir) = executable_path.parent() {
            roots.push(executable_dir.to_path_buf());
        }
    }
    roots.push(PathBuf::from(env!("CARGO_MANIFEST_DIR")));

    let mut seen_roots = HashSet::new();
    let mut loaded = Vec::new();

    for root in roots {
        let key = root.to_string_lossy().to_string();
        if !seen_roots.insert(key) {
            continue;
        }

        for filename in [".env", ".env.local"] {
            let path = root.join(filename);
            if path.is_file() {
                dotenvy::from_path(&path)
                    .with_context(|| format!("failed to load {}", path.display()))?;
                loaded.push(path);
            }
        }
    }

    if loaded.is_empty() {
        if let Ok(path) = dotenvy::dotenv() {
            loaded.push(path);
        }
    }

    Ok(loaded)
}

#[cfg(test)]
mod router_tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn test_config(supabase_url: &str) -> Config {
        Config {
            port: 0,
            trust_proxy: true,
            tls_key_path: None,
            tls_cert_path: None,
            supabase_url: supabase_url.trim_end_matches('/').to_string(),
            supabase_service_role_key: "service-role-test-key".to_string(),
            clerk_secret_key: None,
            clerk_issuer: None,
            clerk_api_base: "http://127.0.0.1:1".to_string(),
            clerk_webhook_secret: None,
            openai_api_key: Some("sk-test".to_string()),
            openai_api_base: "http://127.0.0.1:1".to_string(),
            fal_api_key: Some("fal-test".to_string()),
            fal_api_base: "http://127.0.0.1:1".to_string(),
            flutterwave_secret_key: Some("flw-test".to_string()),
            flutterwave_secret_hash: Some("hash-test".to_string()),
            flutterwave_api_base: "http://127.0.0.1:1".to_string(),
            app_url: Some("https://app.test".to_string()),
        }
    }

    fn test_state(config: Config) -> AppState {
        AppState::from_config(config).unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn protected_routes_reject_missing_token() {
        let state = test_state(test_config("http://127.0.0.1:1"));
        let app = build_router(state);

        for (method, uri) in [
            ("POST", "/api/render-image"),
            ("POST", "/api/generate-3d"),
            ("GET", "/api/profile"),
            ("POST", "/api/payment/initialize"),
            ("POST", "/api/invitations/accept"),
        ] {
            let response = app
                .clone()
                .oneshot(
                    Request::builder()
                        .method(method)
                        .uri(uri)
                        .header("content-type", "application/json")
                        .body(Body::from("{}"))
                        .unwrap(),
                )
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{uri}");
            let body = body_json(response).await;
            assert_eq!(body["type"], "UNAUTHORIZED");
        }
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let state = test_state(test_config("http://127.0.0.1:1"));
        let app = build_router(state);

        let response = app
            .oneshot(Request::builder().uri("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn health_reports_ok_when_database_answers() {
        let mut server = mockito::Server::new_async().await;
        let plans_mock = server
            .mock("GET", "/rest/v1/subscription_plans")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"[{"id":"plan_basic"}]"#)
            .create_async()
            .await;

        let state = test_state(test_config(&server.url()));
        let app = build_router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
        plans_mock.assert_async().await;
    }

    #[tokio::test]
    async fn flutterwave_webhook_rejects_bad_hash_without_writes() {
        let mut server = mockito::Server::new_async().await;
        let verify_mock = server
            .mock("GET", mockito::Matcher::Regex("/transactions/.*".to_string()))
            .expect(0)
            .create_async()
            .await;
        let rpc_mock = server
            .mock("POST", "/rest/v1/rpc/handle_payment_verification")
            .expect(0)
            .create_async()
            .await;

        let mut config = test_config(&server.url());
        config.flutterwave_api_base = server.url();
        let state = test_state(config);
        let app = build_router(state);

        let payload = json!({
            "event": "charge.completed",
            "data": { "id": 12345 }
        });
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/webhooks/flutterwave")
                    .header("content-type", "application/json")
                    .header("verif-hash", "not-the-right-hash")
                    .body(Body::from(payload.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        verify_mock.assert_async().await;
        rpc_mock.assert_async().await;
    }

    #[tokio::test]
    async fn flutterwave_webhook_requires_hash_header() {
        let state = test_state(test_config("http://127.0.0.1:1"));
        let app = build_router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/webhooks/flutterwave")
                    .header("content-type", "application/json")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn clerk_webhook_rejects_missing_signature_headers() {
        let state = test_state(test_config("http://127.0.0.1:1"));
        let app = build_router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/webhooks/clerk")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"type":"user.created","data":{}}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
