use axum::{
    extract::{Extension, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{
    assets, entitlement,
    error::ApiError,
    middleware::AuthenticatedUser,
    notifications,
    state::AppState,
};

pub async fn get_profile(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<Value>, ApiError> {
    let profile = entitlement::load_profile(&state.supabase, &user.user_id).await?;

    Ok(Json(json!({
        "id": profile.id,
        "email": profile.email,
        "credits_balance": profile.credits_balance,
        "subscription_status": profile.subscription_status,
        "current_plan_id": profile.current_plan_id,
        "organization_id": profile.organization_id,
        "plan": profile.plan,
    })))
}

pub async fn list_assets(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<Value>, ApiError> {
    let assets = assets::list_for_user(&state.supabase, &user.user_id).await?;
    Ok(Json(json!({ "assets": assets })))
}

pub async fn list_notifications(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<Value>, ApiError> {
    // Include email-keyed rows so pre-registration invitations surface even
    // if the sign-up webhook has not claimed them yet.
    let email = entitlement::load_profile(&state.supabase, &user.user_id)
        .await
        .ok()
        .and_then(|profile| profile.email);

    let notifications =
        notifications::list_for_user(&state.supabase, &user.user_id, email.as_deref()).await?;
    Ok(Json(json!({ "notifications": notifications })))
}

#[derive(Debug, Deserialize)]
pub struct MarkReadRequest {
    pub id: String,
}

pub async fn mark_notification_read(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(body): Json<MarkReadRequest>,
) -> Result<Json<Value>, ApiError> {
    if body.id.trim().is_empty() {
        return Err(ApiError::InvalidInput(
            "Missing notification id.".to_string(),
        ));
    }

    notifications::mark_read(&state.supabase, &user.user_id, &body.id).await?;
    Ok(Json(json!({ "updated": true })))
}
