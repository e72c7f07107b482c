use anyhow::anyhow;
use axum::{
    extract::{Extension, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{
    assets, credits,
    entitlement::{self, check_entitlement},
    error::ApiError,
    middleware::AuthenticatedUser,
    org_funding::{resolve_org_funding, OrgFunding},
    plans::{credit_cost, Operation, QualityTier},
    state::AppState,
};

const DEFAULT_IMAGE_SIZE: &str = "1024x1024";
const MAX_VIEW_COUNT: i64 = 12;

/// How a generation is being paid for. Org-funded operations carry no
/// reservation; personally funded ones must be committed or released.
struct Funding {
    credit_cost: i64,
    org: Option<OrgFunding>,
    reservation_id: Option<String>,
}

impl Funding {
    fn org_funded(&self) -> bool {
        self.org.is_some()
    }

    fn credits_charged(&self) -> i64 {
        if self.org_funded() {
            0
        } else {
            self.credit_cost
        }
    }
}

/// Organization funding check, personal entitlement gate, and credit
/// reservation, in that order. An org-funded operation never touches the
/// personal gate or balance. Returning an error here guarantees the provider
/// was never called and no credits moved.
async fn authorize_and_reserve(
    state: &AppState,
    user_id: &str,
    operation: Operation,
    quality: QualityTier,
) -> Result<Funding, ApiError> {
    let profile = entitlement::load_profile(&state.supabase, user_id).await?;
    let cost = credit_cost(operation, profile.plan.as_ref());

    if let Some(organization_id) = profile.organization_id.as_deref() {
        let funding = resolve_org_funding(&state.supabase, organization_id, operation.kind()).await;
        if funding.can_generate {
            return Ok(Funding {
                credit_cost: cost,
                org: Some(funding),
                reservation_id: None,
            });
        }
    }

    let credit_cost = check_entitlement(&profile, operation, quality)?;
    let reservation =
        credits::reserve_credits(&state.supabase, user_id, credit_cost, operation.kind()).await?;

    if !reservation.allowed {
        return Err(ApiError::InsufficientCredits {
            required: credit_cost,
            available: reservation.balance_remaining.unwrap_or(0),
        });
    }

    let reservation_id = reservation
        .reservation_id
        .ok_or_else(|| anyhow!("credit reservation returned no id"))?;

    Ok(Funding {
        credit_cost,
        org: None,
        reservation_id: Some(reservation_id),
    })
}

/// Commits the reservation after a successful provider call, releases it
/// after a failed one. Org-funded operations have nothing to settle.
async fn settle(state: &AppState, user_id: &str, funding: &Funding, success: bool) {
    let Some(reservation_id) = funding.reservation_id.as_deref() else {
        return;
    };

    if success {
        match credits::commit_reservation(&state.supabase, user_id, reservation_id).await {
            Ok(result) if !result.committed => {
                tracing::warn!(user_id = %user_id, "credit reservation commit was rejected");
            }
            Ok(_) => {}
            Err(error) => {
                tracing::warn!(error = ?error, user_id = %user_id, "failed to commit credit reservation");
            }
        }
    } else if let Err(error) =
        credits::release_reservation(&state.supabase, user_id, reservation_id).await
    {
        tracing::warn!(error = ?error, user_id = %user_id, "failed to release credit reservation");
    }
}

fn funding_body(funding: &Funding) -> Value {
    json!({
        "credits_charged": funding.credits_charged(),
        "org_funded": funding.org_funded(),
        "org_funding": funding.org,
    })
}

#[derive(Debug, Deserialize)]
pub struct RenderImageRequest {
    pub prompt: String,
    #[serde(default)]
    pub quality: QualityTier,
    pub size: Option<String>,
    pub style: Option<String>,
}

pub async fn render_image(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(body): Json<RenderImageRequest>,
) -> Result<Json<Value>, ApiError> {
    let prompt = body.prompt.trim();
    if prompt.is_empty() {
        return Err(ApiError::InvalidInput("Missing prompt.".to_string()));
    }

    let operation = Operation::RenderImage;
    let funding = authorize_and_reserve(&state, &user.user_id, operation, body.quality).await?;

    let full_prompt = match body.style.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(style) => format!("{prompt}, in {style} architectural style"),
        None => prompt.to_string(),
    };
    let size = body.size.as_deref().unwrap_or(DEFAULT_IMAGE_SIZE);

    let result = state
        .openai
        .generate_image(&full_prompt, size, body.quality)
        .await;

    settle(&state, &user.user_id, &funding, result.is_ok()).await;
    let image = result?;

    let asset_url = format!("data:image/png;base64,{}", image.b64_png);
    assets::persist_generated_asset(
        &state.supabase,
        &user.user_id,
        operation,
        &asset_url,
        &full_prompt,
        json!({ "quality": body.quality, "size": size }),
    )
    .await;

    let mut response = funding_body(&funding);
    response["image_b64"] = json!(image.b64_png);
    response["asset_type"] = json!(operation.asset_type());
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
pub struct EditImageRequest {
    pub prompt: String,
    /// Base64 PNG of the image to edit, optionally a data URL.
    pub image: String,
    /// Optional base64 PNG mask; transparent regions are repainted.
    pub mask: Option<String>,
    #[serde(default)]
    pub quality: QualityTier,
    pub size: Option<String>,
}

pub async fn edit_image(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(body): Json<EditImageRequest>,
) -> Result<Json<Value>, ApiError> {
    let prompt = body.prompt.trim();
    if prompt.is_empty() {
        return Err(ApiError::InvalidInput("Missing prompt.".to_string()));
    }
    if body.image.trim().is_empty() {
        return Err(ApiError::InvalidInput("Missing image payload.".to_string()));
    }

    let operation = Operation::EditImage;
    let funding = authorize_and_reserve(&state, &user.user_id, operation, body.quality).await?;

    let size = body.size.as_deref().unwrap_or(DEFAULT_IMAGE_SIZE);
    let result = state
        .openai
        .edit_image(prompt, &body.image, body.mask.as_deref(), size, body.quality)
        .await;

    settle(&state, &user.user_id, &funding, result.is_ok()).await;
    let image = result?;

    let asset_url = format!("data:image/png;base64,{}", image.b64_png);
    assets::persist_generated_asset(
        &state.supabase,
        &user.user_id,
        operation,
        &asset_url,
        prompt,
        json!({ "quality": body.quality, "size": size, "masked": body.mask.is_some() }),
    )
    .await;

    let mut response = funding_body(&funding);
    response["image_b64"] = json!(image.b64_png);
    response["asset_type"] = json!(operation.asset_type());
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
pub struct MultiViewRequest {
    pub image_url: String,
    #[serde(default)]
    pub prompt: String,
    pub view_count: Option<i64>,
}

pub async fn generate_multi_view(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(body): Json<MultiViewRequest>,
) -> Result<Json<Value>, ApiError> {
    if body.image_url.trim().is_empty() {
        return Err(ApiError::InvalidInput("Missing image_url.".to_string()));
    }

    let view_count = body.view_count.unwrap_or(4);
    if !(1..=MAX_VIEW_COUNT).contains(&view_count) {
        return Err(ApiError::InvalidInput(format!(
            "view_count must be between 1 and {MAX_VIEW_COUNT}."
        )));
    }

    let operation = Operation::MultiView { view_count };
    // Multi-view has no quality tier; the gate only prices it.
    let funding =
        authorize_and_reserve(&state, &user.user_id, operation, QualityTier::None).await?;

    let result = state
        .fal
        .generate_multi_view(&body.image_url, body.prompt.trim(), view_count)
        .await;

    settle(&state, &user.user_id, &funding, result.is_ok()).await;
    let views = result?;

    if let Some(first_view) = views.first() {
        assets::persist_generated_asset(
            &state.supabase,
            &user.user_id,
            operation,
            first_view,
            body.prompt.trim(),
            json!({ "view_count": view_count, "views": &views }),
        )
        .await;
    }

    let mut response = funding_body(&funding);
    response["views"] = json!(views);
    response["asset_type"] = json!(operation.asset_type());
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
pub struct GenerateModelRequest {
    pub image_url: String,
    #[serde(default)]
    pub prompt: String,
}

pub async fn generate_3d(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(body): Json<GenerateModelRequest>,
) -> Result<Json<Value>, ApiError> {
    if body.image_url.trim().is_empty() {
        return Err(ApiError::InvalidInput("Missing image_url.".to_string()));
    }

    let operation = Operation::GenerateModel;
    let funding =
        authorize_and_reserve(&state, &user.user_id, operation, QualityTier::None).await?;

    let result = state.fal.generate_mesh(&body.image_url).await;

    settle(&state, &user.user_id, &funding, result.is_ok()).await;
    let mesh = result?;

    assets::persist_generated_asset(
        &state.supabase,
        &user.user_id,
        operation,
        &mesh.mesh_url,
        body.prompt.trim(),
        json!({ "thumbnail_url": &mesh.thumbnail_url, "source_image_url": body.image_url }),
    )
    .await;

    let mut response = funding_body(&funding);
    response["mesh_url"] = json!(mesh.mesh_url);
    response["thumbnail_url"] = json!(mesh.thumbnail_url);
    response["asset_type"] = json!(operation.asset_type());
    Ok(Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn test_state(base_url: &str) -> AppState {
        let config = Config {
            port: 0,
            trust_proxy: true,
            tls_key_path: None,
            tls_cert_path: None,
            supabase_url: base_url.trim_end_matches('/').to_string(),
            supabase_service_role_key: "service-role-test-key".to_string(),
            clerk_secret_key: None,
            clerk_issuer: None,
            clerk_api_base: base_url.to_string(),
            clerk_webhook_secret: None,
            openai_api_key: Some("sk-test".to_string()),
            openai_api_base: base_url.to_string(),
            fal_api_key: Some("fal-test".to_string()),
            fal_api_base: base_url.to_string(),
            flutterwave_secret_key: Some("flw-test".to_string()),
            flutterwave_secret_hash: Some("hash-test".to_string()),
            flutterwave_api_base: base_url.to_string(),
            app_url: None,
        };
        AppState::from_config(config).unwrap()
    }

    fn caller() -> Extension<AuthenticatedUser> {
        Extension(AuthenticatedUser {
            user_id: "user_1".to_string(),
        })
    }

    fn profile_row(balance: i64, organization_id: Option<&str>) -> String {
        json!([{
            "id": "user_1",
            "email": "owner@example.com",
            "credits_balance": balance,
            "subscription_status": "ACTIVE",
            "current_plan_id": null,
            "organization_id": organization_id,
            "subscription_plans": null,
        }])
        .to_string()
    }

    #[tokio::test]
    async fn insufficient_balance_never_reaches_the_provider() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/rest/v1/profiles")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(profile_row(50, None))
            .create_async()
            .await;
        let openai_mock = server
            .mock("POST", "/images/generations")
            .expect(0)
            .create_async()
            .await;
        let reserve_mock = server
            .mock("POST", "/rest/v1/rpc/reserve_generation_credits")
            .expect(0)
            .create_async()
            .await;

        let state = test_state(&server.url());
        let result = render_image(
            State(state),
            caller(),
            Json(RenderImageRequest {
                prompt: "a lakeside pavilion".to_string(),
                quality: QualityTier::None,
                size: None,
                style: None,
            }),
        )
        .await;

        match result {
            Err(ApiError::InsufficientCredits {
                required,
                available,
            }) => {
                assert_eq!(required, 100);
                assert_eq!(available, 50);
            }
            other => panic!("unexpected result: {other:?}"),
        }
        openai_mock.assert_async().await;
        reserve_mock.assert_async().await;
    }

    #[tokio::test]
    async fn org_funded_generation_skips_personal_credits() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/rest/v1/profiles")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(profile_row(0, Some("org_1")))
            .create_async()
            .await;
        server
            .mock("GET", "/rest/v1/organization_subscriptions")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!([{
                    "status": "active",
                    "is_trial": false,
                    "current_period_end": null,
                    "credits_remaining": 400,
                }])
                .to_string(),
            )
            .create_async()
            .await;
        let reserve_mock = server
            .mock("POST", "/rest/v1/rpc/reserve_generation_credits")
            .expect(0)
            .create_async()
            .await;
        let commit_mock = server
            .mock("POST", "/rest/v1/rpc/commit_credit_reservation")
            .expect(0)
            .create_async()
            .await;
        server
            .mock("POST", "/images/generations")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({ "data": [{ "b64_json": "aGVsbG8=" }] }).to_string())
            .create_async()
            .await;
        server
            .mock("POST", "/rest/v1/user_assets")
            .with_status(201)
            .with_header("content-type", "application/json")
            .with_body(json!([{ "id": "asset_1" }]).to_string())
            .create_async()
            .await;

        let state = test_state(&server.url());
        let Json(response) = render_image(
            State(state),
            caller(),
            Json(RenderImageRequest {
                prompt: "a brutalist library".to_string(),
                quality: QualityTier::None,
                size: None,
                style: None,
            }),
        )
        .await
        .unwrap();

        assert_eq!(response["org_funded"], json!(true));
        assert_eq!(response["credits_charged"], json!(0));
        assert_eq!(response["image_b64"], json!("aGVsbG8="));
        reserve_mock.assert_async().await;
        commit_mock.assert_async().await;
    }

    #[tokio::test]
    async fn provider_failure_releases_the_reservation() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/rest/v1/profiles")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(profile_row(500, None))
            .create_async()
            .await;
        server
            .mock("POST", "/rest/v1/rpc/reserve_generation_credits")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "allowed": true,
                    "reservation_id": "res_1",
                    "balance_remaining": 400,
                })
                .to_string(),
            )
            .create_async()
            .await;
        server
            .mock("POST", "/images/generations")
            .with_status(429)
            .with_header("content-type", "application/json")
            .with_body(json!({ "error": { "message": "Rate limit reached" } }).to_string())
            .create_async()
            .await;
        let release_mock = server
            .mock("POST", "/rest/v1/rpc/release_credit_reservation")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body("{}")
            .create_async()
            .await;
        let commit_mock = server
            .mock("POST", "/rest/v1/rpc/commit_credit_reservation")
            .expect(0)
            .create_async()
            .await;

        let state = test_state(&server.url());
        let result = render_image(
            State(state),
            caller(),
            Json(RenderImageRequest {
                prompt: "a timber atrium".to_string(),
                quality: QualityTier::None,
                size: None,
                style: None,
            }),
        )
        .await;

        match result {
            Err(ApiError::Provider { kind, .. }) => {
                assert_eq!(kind, crate::error::ProviderErrorKind::RateLimit);
            }
            other => panic!("unexpected result: {other:?}"),
        }
        release_mock.assert_async().await;
        commit_mock.assert_async().await;
    }
}
