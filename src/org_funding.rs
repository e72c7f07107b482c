use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::supabase::SupabaseClient;

/// Outcome of the organization funding check. When `can_generate` is true the
/// operation is funded by the organization's subscription and the personal
/// credit reservation is skipped entirely.
#[derive(Debug, Clone, Serialize)]
pub struct OrgFunding {
    pub can_generate: bool,
    pub trial_credits_used: bool,
    pub credits_remaining: i64,
}

impl OrgFunding {
    fn personal_fallback() -> Self {
        Self {
            can_generate: false,
            trial_credits_used: false,
            credits_remaining: 0,
        }
    }
}

#[derive(Debug, Deserialize)]
struct OrgSubscriptionRow {
    status: Option<String>,
    #[serde(default)]
    is_trial: bool,
    current_period_end: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "crate::serde_pg::de_opt_i64_from_number")]
    credits_remaining: Option<i64>,
}

impl OrgSubscriptionRow {
    fn covers(&self, now: DateTime<Utc>) -> bool {
        let active = self
            .status
            .as_deref()
            .map(|status| status.trim().eq_ignore_ascii_case("active"))
            .unwrap_or(false);
        let in_period = self
            .current_period_end
            .map(|end| end > now)
            .unwrap_or(true);
        active && in_period
    }
}

/// Best-effort lookup: any error is logged and treated as "no org funding",
/// falling back to the personal entitlement gate. Never surfaces to the caller.
pub async fn resolve_org_funding(
    supabase: &SupabaseClient,
    organization_id: &str,
    operation: &str,
) -> OrgFunding {
    let rows: anyhow::Result<Vec<OrgSubscriptionRow>> = supabase
        .select_many(
            "organization_subscriptions",
            &[
                ("organization_id", format!("eq.{organization_id}")),
                (
                    "select",
                    "status,is_trial,current_period_end,credits_remaining".to_string(),
                ),
            ],
        )
        .await;

    let rows = match rows {
        Ok(rows) => rows,
        Err(error) => {
            tracing::warn!(
                error = ?error,
                organization_id = %organization_id,
                operation = %operation,
                "organization funding lookup failed, falling back to personal credits"
            );
            return OrgFunding::personal_fallback();
        }
    };

    let now = Utc::now();
    match rows.into_iter().find(|row| row.covers(now)) {
        Some(subscription) => OrgFunding {
            can_generate: true,
            trial_credits_used: subscription.is_trial,
            credits_remaining: subscription.credits_remaining.unwrap_or(0),
        },
        None => OrgFunding::personal_fallback(),
    }
}

/// Marks a pending subscription intent as paid-for. Called from payment
/// verification and the payment webhook, both after server-side transaction
/// verification.
pub async fn activate_subscription(
    supabase: &SupabaseClient,
    organization_id: &str,
    plan_type: Option<&str>,
) -> anyhow::Result<()> {
    let now = Utc::now();
    let mut patch = serde_json::json!({
        "status": "active",
        "is_trial": false,
        "current_period_start": now,
        "current_period_end": now + chrono::Duration::days(30),
    });
    if let Some(plan_type) = plan_type {
        patch["plan_type"] = serde_json::json!(plan_type);
    }

    supabase
        .update(
            "organization_subscriptions",
            &[("organization_id", format!("eq.{organization_id}"))],
            patch,
        )
        .await
}

/// Records a subscription intent before the customer is sent to checkout.
pub async fn ensure_pending_subscription(
    supabase: &SupabaseClient,
    organization_id: &str,
    plan_type: &str,
) -> anyhow::Result<()> {
    let existing: Option<serde_json::Value> = supabase
        .select_one(
            "organization_subscriptions",
            &[
                ("organization_id", format!("eq.{organization_id}")),
                ("select", "organization_id,status".to_string()),
            ],
        )
        .await?;

    if existing.is_some() {
        return Ok(());
    }

    let _row: serde_json::Value = supabase
        .insert_returning(
            "organization_subscriptions",
            serde_json::json!({
                "organization_id": organization_id,
                "plan_type": plan_type,
                "status": "pending",
                "is_trial": false,
            }),
        )
        .await?;

    Ok(())
}
