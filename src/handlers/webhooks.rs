use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{
    credits,
    flutterwave::FlutterwaveEvent,
    notifications, org_funding,
    plans::{SubscriptionStatus, TRIAL_CREDIT_GRANT},
    state::AppState,
};

#[derive(Debug, Deserialize)]
struct ClerkEvent {
    #[serde(rename = "type")]
    event_type: String,
    data: Value,
}

#[derive(Debug, Deserialize)]
struct ClerkUserPayload {
    id: String,
    primary_email_address_id: Option<String>,
    #[serde(default)]
    email_addresses: Vec<ClerkEmailPayload>,
}

#[derive(Debug, Deserialize)]
struct ClerkEmailPayload {
    id: String,
    email_address: String,
}

impl ClerkUserPayload {
    fn primary_email(&self) -> Option<String> {
        let primary_id = self.primary_email_address_id.as_deref()?;
        self.email_addresses
            .iter()
            .find(|entry| entry.id == primary_id)
            .map(|entry| entry.email_address.trim().to_lowercase())
    }
}

pub async fn handle_clerk_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let (message_id, timestamp, signature) = match (
        header_str(&headers, "svix-id"),
        header_str(&headers, "svix-timestamp"),
        header_str(&headers, "svix-signature"),
    ) {
        (Some(id), Some(ts), Some(sig)) => (id, ts, sig),
        _ => {
            return (StatusCode::UNAUTHORIZED, "Missing webhook signature headers.")
                .into_response()
        }
    };

    if let Err(error) = state
        .clerk
        .verify_webhook_signature(message_id, timestamp, signature, &body)
    {
        tracing::error!(error = %error, "Clerk webhook signature verification failed");
        if error.to_string().contains("CLERK_WEBHOOK_SECRET") {
            return (StatusCode::INTERNAL_SERVER_ERROR, "Webhook not configured.").into_response();
        }
        return (StatusCode::UNAUTHORIZED, "Invalid signature.").into_response();
    }

    let event: ClerkEvent = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(error) => {
            tracing::error!(error = %error, "invalid Clerk webhook payload");
            return (StatusCode::BAD_REQUEST, "Invalid payload.").into_response();
        }
    };

    let result = match event.event_type.as_str() {
        "user.created" => on_user_created(&state, event.data).await,
        "user.updated" => on_user_updated(&state, event.data).await,
        _ => Ok(()),
    };

    match result {
        Ok(_) => (StatusCode::OK, Json(json!({ "received": true }))).into_response(),
        Err(error) => {
            tracing::error!(error = ?error, "Clerk webhook handling failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "Webhook handler failed.").into_response()
        }
    }
}

/// First sign-in: provision the profile with trial status and starter
/// credits, then attach any invitations that arrived before registration.
/// Webhook deliveries can repeat, so an existing profile is left untouched.
async fn on_user_created(state: &AppState, data: Value) -> anyhow::Result<()> {
    let user: ClerkUserPayload = serde_json::from_value(data)?;
    let email = user.primary_email();

    let existing: Option<Value> = state
        .supabase
        .select_one(
            "profiles",
            &[
                ("id", format!("eq.{}", user.id)),
                ("select", "id".to_string()),
            ],
        )
        .await?;

    if existing.is_none() {
        let _row: Value = state
            .supabase
            .insert_returning(
                "profiles",
                json!({
                    "id": user.id.as_str(),
                    "email": email.as_deref(),
                    "credits_balance": TRIAL_CREDIT_GRANT,
                    "subscription_status": SubscriptionStatus::Trial.as_str(),
                }),
            )
            .await?;
    }

    if let Some(email) = email {
        if let Err(error) =
            notifications::claim_email_notifications(&state.supabase, &user.id, &email).await
        {
            tracing::warn!(error = ?error, user_id = %user.id, "failed to claim email-keyed notifications");
        }
    }

    Ok(())
}

async fn on_user_updated(state: &AppState, data: Value) -> anyhow::Result<()> {
    let user: ClerkUserPayload = serde_json::from_value(data)?;
    let Some(email) = user.primary_email() else {
        return Ok(());
    };

    state
        .supabase
        .update(
            "profiles",
            &[("id", format!("eq.{}", user.id))],
            json!({ "email": email }),
        )
        .await
}

pub async fn handle_flutterwave_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let verif_hash = match header_str(&headers, "verif-hash") {
        Some(value) => value,
        None => return (StatusCode::UNAUTHORIZED, "Missing verif-hash header.").into_response(),
    };

    if let Err(error) = state.flutterwave.verify_webhook_hash(verif_hash) {
        tracing::error!(error = %error, "Flutterwave webhook hash verification failed");
        if error.to_string().contains("FLUTTERWAVE_SECRET_HASH") {
            return (StatusCode::INTERNAL_SERVER_ERROR, "Webhook not configured.").into_response();
        }
        return (StatusCode::UNAUTHORIZED, "Invalid verif-hash.").into_response();
    }

    let event: FlutterwaveEvent = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(error) => {
            tracing::error!(error = %error, "invalid Flutterwave webhook payload");
            return (StatusCode::BAD_REQUEST, "Invalid payload.").into_response();
        }
    };

    let result = match event.event.as_str() {
        "charge.completed" => on_charge_completed(&state, event.data).await,
        _ => Ok(()),
    };

    match result {
        Ok(_) => (StatusCode::OK, Json(json!({ "received": true }))).into_response(),
        Err(error) => {
            tracing::error!(error = ?error, "Flutterwave webhook handling failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "Webhook handler failed.").into_response()
        }
    }
}

/// The webhook payload is advisory: the charge is re-verified against the
/// Flutterwave API before any state changes.
async fn on_charge_completed(state: &AppState, data: Value) -> anyhow::Result<()> {
    let transaction_id = data
        .get("id")
        .map(|id| match id {
            Value::Number(number) => number.to_string(),
            Value::String(text) => text.clone(),
            other => other.to_string(),
        })
        .ok_or_else(|| anyhow::anyhow!("charge.completed payload missing transaction id"))?;

    let transaction = state
        .flutterwave
        .verify_transaction(&transaction_id)
        .await?;

    if !transaction.status.eq_ignore_ascii_case("successful") {
        tracing::warn!(
            tx_ref = %transaction.tx_ref,
            status = %transaction.status,
            "charge.completed webhook for a non-successful transaction"
        );
        return Ok(());
    }

    let Some(user_id) = transaction
        .meta
        .as_ref()
        .and_then(|meta| meta.get("user_id"))
        .and_then(Value::as_str)
        .map(str::to_string)
    else {
        tracing::warn!(tx_ref = %transaction.tx_ref, "verified transaction missing user_id metadata");
        return Ok(());
    };

    credits::apply_payment_verification(
        &state.supabase,
        &user_id,
        &transaction.tx_ref,
        transaction.amount,
    )
    .await?;

    if let Some(organization_id) = transaction
        .meta
        .as_ref()
        .and_then(|meta| meta.get("organization_id"))
        .and_then(Value::as_str)
    {
        let plan_type = transaction
            .meta
            .as_ref()
            .and_then(|meta| meta.get("plan_type"))
            .and_then(Value::as_str);
        org_funding::activate_subscription(&state.supabase, organization_id, plan_type).await?;
    }

    Ok(())
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}
