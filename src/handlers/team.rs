use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{
    entitlement,
    error::ApiError,
    invitations,
    middleware::AuthenticatedUser,
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct CreateInvitationRequest {
    pub project_id: String,
    pub email: String,
    pub role: Option<String>,
    pub permission: Option<String>,
}

pub async fn create_invitation(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(body): Json<CreateInvitationRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    if body.project_id.trim().is_empty() {
        return Err(ApiError::InvalidInput("Missing project_id.".to_string()));
    }
    let email = body.email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(ApiError::InvalidInput(
            "A valid invitee email is required.".to_string(),
        ));
    }

    let invitation = invitations::create_invitation(
        &state.supabase,
        body.project_id.trim(),
        email,
        body.role.as_deref().unwrap_or("member"),
        body.permission.as_deref().unwrap_or("view"),
        &user.user_id,
    )
    .await?;

    Ok((StatusCode::CREATED, Json(json!({ "invitation": invitation }))))
}

#[derive(Debug, Deserialize)]
pub struct AcceptInvitationRequest {
    pub token: String,
}

pub async fn accept_invitation(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(body): Json<AcceptInvitationRequest>,
) -> Result<Json<Value>, ApiError> {
    if body.token.trim().is_empty() {
        return Err(ApiError::InvalidInput("Missing token.".to_string()));
    }

    let caller_email = resolve_caller_email(&state, &user.user_id).await?;
    let member = invitations::accept_invitation(
        &state.supabase,
        body.token.trim(),
        &user.user_id,
        &caller_email,
    )
    .await?;

    Ok(Json(json!({ "member": member })))
}

#[derive(Debug, Deserialize)]
pub struct ResendInvitationPath {
    pub id: String,
}

pub async fn resend_invitation(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(path): Path<ResendInvitationPath>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    if path.id.trim().is_empty() {
        return Err(ApiError::InvalidInput("Missing invitation id.".to_string()));
    }

    let invitation =
        invitations::resend_invitation(&state.supabase, path.id.trim(), &user.user_id).await?;

    Ok((StatusCode::CREATED, Json(json!({ "invitation": invitation }))))
}

#[derive(Debug, Deserialize)]
pub struct ListInvitationsQuery {
    pub project_id: String,
}

pub async fn list_invitations(
    State(state): State<AppState>,
    Extension(_user): Extension<AuthenticatedUser>,
    Query(query): Query<ListInvitationsQuery>,
) -> Result<Json<Value>, ApiError> {
    if query.project_id.trim().is_empty() {
        return Err(ApiError::InvalidInput("Missing project_id.".to_string()));
    }

    let invitations =
        invitations::list_for_project(&state.supabase, query.project_id.trim()).await?;
    Ok(Json(json!({ "invitations": invitations })))
}

/// The invitee email must match the signed-in identity. Clerk is the
/// authority when a backend key is configured; otherwise the profile row's
/// email (populated from the sign-up webhook) is used.
async fn resolve_caller_email(state: &AppState, user_id: &str) -> Result<String, ApiError> {
    if state.config.clerk_secret_key.is_some() {
        match state.clerk.get_primary_email(user_id).await {
            Ok(Some(email)) => return Ok(email),
            Ok(None) => {
                tracing::warn!(user_id = %user_id, "user has no primary email in Clerk");
            }
            Err(error) => {
                tracing::warn!(error = %error, user_id = %user_id, "failed to load Clerk user, falling back to profile email");
            }
        }
    }

    let profile = entitlement::load_profile(&state.supabase, user_id).await?;
    profile.email.ok_or_else(|| {
        ApiError::InvalidInput("No email address on record for this account.".to_string())
    })
}
