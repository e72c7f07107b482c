use serde::{Deserialize, Serialize};

use crate::error::ApiError;

pub const DEFAULT_IMAGE_CREDIT_COST: i64 = 100;
pub const DEFAULT_MODEL_CREDIT_COST: i64 = 200;
pub const MULTI_VIEW_CREDIT_COST_PER_VIEW: i64 = 10;

/// Credits granted to a freshly created profile (trial period).
pub const TRIAL_CREDIT_GRANT: i64 = 500;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SubscriptionStatus {
    Trial,
    Active,
    Cancelled,
    Expired,
}

impl SubscriptionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SubscriptionStatus::Trial => "TRIAL",
            SubscriptionStatus::Active => "ACTIVE",
            SubscriptionStatus::Cancelled => "CANCELLED",
            SubscriptionStatus::Expired => "EXPIRED",
        }
    }

    /// TRIAL and ACTIVE may generate; CANCELLED and EXPIRED may not.
    pub fn allows_generation(self) -> bool {
        matches!(self, SubscriptionStatus::Trial | SubscriptionStatus::Active)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    #[default]
    None,
    Minor,
    Major,
}

impl QualityTier {
    pub fn as_str(self) -> &'static str {
        match self {
            QualityTier::None => "none",
            QualityTier::Minor => "minor",
            QualityTier::Major => "major",
        }
    }

    /// Provider-side quality value for the OpenAI image API.
    pub fn provider_quality(self) -> &'static str {
        match self {
            QualityTier::None => "low",
            QualityTier::Minor => "medium",
            QualityTier::Major => "high",
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Operation {
    RenderImage,
    EditImage,
    MultiView { view_count: i64 },
    GenerateModel,
}

impl Operation {
    pub fn kind(&self) -> &'static str {
        match self {
            Operation::RenderImage => "render_image",
            Operation::EditImage => "edit_image",
            Operation::MultiView { .. } => "multi_view",
            Operation::GenerateModel => "generate_3d",
        }
    }

    pub fn asset_type(&self) -> &'static str {
        match self {
            Operation::RenderImage | Operation::EditImage => "image",
            Operation::MultiView { .. } => "multi_view",
            Operation::GenerateModel => "3d",
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PlanDetails {
    pub name: Option<String>,
    pub image_credit_cost: Option<i64>,
    pub model_credit_cost: Option<i64>,
}

impl PlanDetails {
    /// Plans whose name contains "pro" (case-insensitive) unlock major quality.
    pub fn is_pro(&self) -> bool {
        self.name
            .as_deref()
            .map(|name| name.to_ascii_lowercase().contains("pro"))
            .unwrap_or(false)
    }
}

/// Credit cost of an operation: per-plan rates where the catalog defines them,
/// fixed defaults otherwise. Multi-view is always priced per view.
pub fn credit_cost(operation: Operation, plan: Option<&PlanDetails>) -> i64 {
    match operation {
        Operation::RenderImage | Operation::EditImage => plan
            .and_then(|p| p.image_credit_cost)
            .filter(|cost| *cost > 0)
            .unwrap_or(DEFAULT_IMAGE_CREDIT_COST),
        Operation::MultiView { view_count } => MULTI_VIEW_CREDIT_COST_PER_VIEW * view_count.max(1),
        Operation::GenerateModel => plan
            .and_then(|p| p.model_credit_cost)
            .filter(|cost| *cost > 0)
            .unwrap_or(DEFAULT_MODEL_CREDIT_COST),
    }
}

/// Quality-tier gate: `none` is always allowed, `minor` requires an active
/// subscription, `major` requires an active subscription on a pro plan.
pub fn check_quality_allowed(
    quality: QualityTier,
    status: SubscriptionStatus,
    plan: Option<&PlanDetails>,
) -> Result<(), ApiError> {
    let allowed = match quality {
        QualityTier::None => true,
        QualityTier::Minor => status == SubscriptionStatus::Active,
        QualityTier::Major => {
            status == SubscriptionStatus::Active && plan.map(PlanDetails::is_pro).unwrap_or(false)
        }
    };

    if allowed {
        Ok(())
    } else {
        Err(ApiError::QualityNotAllowed {
            quality: quality.as_str(),
        })
    }
}
