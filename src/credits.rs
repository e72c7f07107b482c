use anyhow::Context;
use serde::Deserialize;
use serde_json::json;

use crate::{serde_pg::de_i64_from_number, supabase::SupabaseClient};

/// Credit mutation protocol: reserve before calling the provider, commit on
/// success, release on failure. The balance check inside the reserve RPC is
/// the authoritative one; the entitlement gate only pre-screens so concurrent
/// requests cannot double-spend a balance the gate saw as sufficient.
#[derive(Debug, Clone, Deserialize)]
pub struct CreditReservation {
    pub allowed: bool,
    pub reservation_id: Option<String>,
    #[serde(default, deserialize_with = "crate::serde_pg::de_opt_i64_from_number")]
    pub balance_remaining: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct CommitResult {
    pub committed: bool,
    #[serde(default, deserialize_with = "crate::serde_pg::de_opt_i64_from_number")]
    pub new_balance: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct PaymentVerificationResult {
    pub processed: bool,
    #[serde(deserialize_with = "de_i64_from_number")]
    pub credits_added: i64,
}

pub async fn reserve_credits(
    supabase: &SupabaseClient,
    user_id: &str,
    amount: i64,
    operation: &str,
) -> anyhow::Result<CreditReservation> {
    supabase
        .rpc(
            "reserve_generation_credits",
            json!({
                "p_user_id": user_id,
                "p_amount": amount,
                "p_operation": operation,
            }),
        )
        .await
        .with_context(|| {
            format!("failed to reserve credits (user_id={user_id}, amount={amount})")
        })
}

pub async fn commit_reservation(
    supabase: &SupabaseClient,
    user_id: &str,
    reservation_id: &str,
) -> anyhow::Result<CommitResult> {
    supabase
        .rpc(
            "commit_credit_reservation",
            json!({
                "p_user_id": user_id,
                "p_reservation_id": reservation_id,
            }),
        )
        .await
        .context("failed to commit credit reservation")
}

pub async fn release_reservation(
    supabase: &SupabaseClient,
    user_id: &str,
    reservation_id: &str,
) -> anyhow::Result<()> {
    let _value: serde_json::Value = supabase
        .rpc(
            "release_credit_reservation",
            json!({
                "p_user_id": user_id,
                "p_reservation_id": reservation_id,
            }),
        )
        .await
        .context("failed to release credit reservation")?;

    Ok(())
}

/// Records a verified payment and credits the purchaser. The amount is always
/// passed explicitly; the procedure has no default.
pub async fn apply_payment_verification(
    supabase: &SupabaseClient,
    user_id: &str,
    tx_ref: &str,
    amount: f64,
) -> anyhow::Result<PaymentVerificationResult> {
    supabase
        .rpc(
            "handle_payment_verification",
            json!({
                "p_user_id": user_id,
                "p_tx_ref": tx_ref,
                "p_amount": amount,
            }),
        )
        .await
        .with_context(|| format!("failed to record payment verification (tx_ref={tx_ref})"))
}
