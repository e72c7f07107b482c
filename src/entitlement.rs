use serde::Deserialize;

use crate::{
    error::ApiError,
    plans::{check_quality_allowed, credit_cost, Operation, PlanDetails, QualityTier, SubscriptionStatus},
    serde_pg::de_i64_from_number,
    supabase::SupabaseClient,
};

/// Profile row joined with its subscription plan. The id is the
/// identity-provider user id.
#[derive(Debug, Clone, Deserialize)]
pub struct Profile {
    pub id: String,
    pub email: Option<String>,
    #[serde(deserialize_with = "de_i64_from_number")]
    pub credits_balance: i64,
    pub subscription_status: SubscriptionStatus,
    pub current_plan_id: Option<String>,
    pub organization_id: Option<String>,
    #[serde(rename = "subscription_plans", default)]
    pub plan: Option<PlanDetails>,
}

const PROFILE_SELECT: &str = "id,email,credits_balance,subscription_status,current_plan_id,\
                              organization_id,subscription_plans(name,image_credit_cost,model_credit_cost)";

pub async fn load_profile(
    supabase: &SupabaseClient,
    user_id: &str,
) -> Result<Profile, ApiError> {
    let profile: Option<Profile> = supabase
        .select_one(
            "profiles",
            &[
                ("id", format!("eq.{user_id}")),
                ("select", PROFILE_SELECT.to_string()),
            ],
        )
        .await?;

    profile.ok_or(ApiError::ProfileNotFound)
}

/// Entitlement gate for a paid operation. Returns the credit cost the caller
/// must reserve. No side effects; the reservation itself happens afterwards
/// so a rejection here guarantees the provider is never invoked.
pub fn check_entitlement(
    profile: &Profile,
    operation: Operation,
    quality: QualityTier,
) -> Result<i64, ApiError> {
    if !profile.subscription_status.allows_generation() {
        return Err(ApiError::SubscriptionExpired);
    }

    check_quality_allowed(quality, profile.subscription_status, profile.plan.as_ref())?;

    let cost = credit_cost(operation, profile.plan.as_ref());
    if profile.credits_balance < cost {
        return Err(ApiError::InsufficientCredits {
            required: cost,
            available: profile.credits_balance,
        });
    }

    Ok(cost)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(balance: i64, status: SubscriptionStatus, plan: Option<PlanDetails>) -> Profile {
        Profile {
            id: "user_1".to_string(),
            email: Some("owner@example.com".to_string()),
            credits_balance: balance,
            subscription_status: status,
            current_plan_id: plan.as_ref().map(|_| "plan_1".to_string()),
            organization_id: None,
            plan,
        }
    }

    #[test]
    fn render_costs_100_and_insufficient_balance_is_rejected() {
        let p = profile(50, SubscriptionStatus::Trial, None);
        let error = check_entitlement(&p, Operation::RenderImage, QualityTier::None).unwrap_err();
        match error {
            ApiError::InsufficientCredits {
                required,
                available,
            } => {
                assert_eq!(required, 100);
                assert_eq!(available, 50);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn sufficient_balance_returns_the_cost() {
        let p = profile(500, SubscriptionStatus::Active, None);
        assert_eq!(
            check_entitlement(&p, Operation::RenderImage, QualityTier::None).unwrap(),
            100
        );
        assert_eq!(
            check_entitlement(&p, Operation::MultiView { view_count: 6 }, QualityTier::None)
                .unwrap(),
            60
        );
    }

    #[test]
    fn expired_subscription_short_circuits_before_balance() {
        let p = profile(10_000, SubscriptionStatus::Expired, None);
        assert!(matches!(
            check_entitlement(&p, Operation::RenderImage, QualityTier::None),
            Err(ApiError::SubscriptionExpired)
        ));
    }

    #[test]
    fn major_quality_needs_an_active_pro_plan() {
        let pro = PlanDetails {
            name: Some("Studio Pro".to_string()),
            image_credit_cost: None,
            model_credit_cost: None,
        };

        let p = profile(1_000, SubscriptionStatus::Active, Some(pro.clone()));
        assert!(check_entitlement(&p, Operation::RenderImage, QualityTier::Major).is_ok());

        let p = profile(1_000, SubscriptionStatus::Active, None);
        assert!(matches!(
            check_entitlement(&p, Operation::RenderImage, QualityTier::Major),
            Err(ApiError::QualityNotAllowed { .. })
        ));

        let p = profile(1_000, SubscriptionStatus::Trial, Some(pro));
        assert!(matches!(
            check_entitlement(&p, Operation::RenderImage, QualityTier::Major),
            Err(ApiError::QualityNotAllowed { .. })
        ));
    }

    #[test]
    fn profile_decodes_with_embedded_plan() {
        let row = serde_json::json!({
            "id": "user_1",
            "email": "owner@example.com",
            "credits_balance": "750",
            "subscription_status": "ACTIVE",
            "current_plan_id": "plan_pro",
            "organization_id": null,
            "subscription_plans": {
                "name": "Studio Pro",
                "image_credit_cost": 80,
                "model_credit_cost": 160
            }
        });

        let profile: Profile = serde_json::from_value(row).unwrap();
        assert_eq!(profile.credits_balance, 750);
        assert!(profile.plan.as_ref().unwrap().is_pro());
    }
}
