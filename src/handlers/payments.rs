use axum::{
    extract::{Extension, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    credits, entitlement,
    error::ApiError,
    flutterwave::PaymentIntent,
    middleware::AuthenticatedUser,
    org_funding,
    state::AppState,
};

const DEFAULT_CURRENCY: &str = "USD";

#[derive(Debug, Deserialize)]
pub struct InitializePaymentRequest {
    pub plan_type: String,
    pub amount: f64,
    pub currency: Option<String>,
    pub organization_id: Option<String>,
}

pub async fn initialize_payment(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(body): Json<InitializePaymentRequest>,
) -> Result<Json<Value>, ApiError> {
    if body.plan_type.trim().is_empty() {
        return Err(ApiError::InvalidInput("Missing plan_type.".to_string()));
    }
    if !(body.amount > 0.0) {
        return Err(ApiError::InvalidInput(
            "Amount must be greater than zero.".to_string(),
        ));
    }

    let profile = entitlement::load_profile(&state.supabase, &user.user_id).await?;
    let customer_email = profile.email.ok_or_else(|| {
        ApiError::InvalidInput("Profile has no email address on record.".to_string())
    })?;

    // Record the subscription intent before redirecting to checkout so the
    // verify/webhook path has a row to activate.
    if let Some(organization_id) = body.organization_id.as_deref() {
        org_funding::ensure_pending_subscription(&state.supabase, organization_id, &body.plan_type)
            .await?;
    }

    let tx_ref = format!("chx_{}", Uuid::new_v4().simple());
    let currency = body
        .currency
        .unwrap_or_else(|| DEFAULT_CURRENCY.to_string());
    let redirect_url = format!(
        "{}/payment/complete",
        state
            .config
            .app_url
            .as_deref()
            .unwrap_or_default()
            .trim_end_matches('/')
    );

    let intent = PaymentIntent {
        tx_ref: tx_ref.clone(),
        amount: body.amount,
        currency,
        redirect_url,
        customer_email,
        meta: json!({
            "user_id": user.user_id,
            "plan_type": body.plan_type,
            "organization_id": body.organization_id,
        }),
    };

    let link = state.flutterwave.initialize_payment(&intent).await?;

    Ok(Json(json!({ "link": link, "tx_ref": tx_ref })))
}

#[derive(Debug, Deserialize)]
pub struct VerifyPaymentRequest {
    pub transaction_id: String,
    pub tx_ref: String,
    pub expected_amount: Option<f64>,
    pub currency: Option<String>,
}

pub async fn verify_payment(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(body): Json<VerifyPaymentRequest>,
) -> Result<Json<Value>, ApiError> {
    if body.transaction_id.trim().is_empty() || body.tx_ref.trim().is_empty() {
        return Err(ApiError::InvalidInput(
            "Missing transaction_id or tx_ref.".to_string(),
        ));
    }

    let transaction = state
        .flutterwave
        .verify_transaction(body.transaction_id.trim())
        .await?;

    if !transaction.status.eq_ignore_ascii_case("successful") {
        return Err(ApiError::InvalidInput(
            "Transaction was not successful.".to_string(),
        ));
    }
    if transaction.tx_ref != body.tx_ref.trim() {
        return Err(ApiError::InvalidInput(
            "Transaction reference mismatch.".to_string(),
        ));
    }
    // The payment intent records its beneficiary; knowing someone else's
    // transaction id must not be enough to claim their credits.
    if let Some(meta_user_id) = transaction
        .meta
        .as_ref()
        .and_then(|meta| meta.get("user_id"))
        .and_then(Value::as_str)
    {
        if meta_user_id != user.user_id {
            return Err(ApiError::InvalidInput(
                "Transaction belongs to a different account.".to_string(),
            ));
        }
    }
    if let Some(expected_amount) = body.expected_amount {
        let currency = body.currency.as_deref().unwrap_or(DEFAULT_CURRENCY);
        if !transaction.is_successful(expected_amount, currency) {
            return Err(ApiError::InvalidInput(
                "Transaction amount or currency mismatch.".to_string(),
            ));
        }
    }

    let result = credits::apply_payment_verification(
        &state.supabase,
        &user.user_id,
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

    Ok(Json(json!({
        "processed": result.processed,
        "credits_added": result.credits_added,
    })))
}
