use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Client-facing error taxonomy. Every variant carries a stable
/// machine-readable `type` discriminant so the UI can branch without
/// substring-matching error messages.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Unauthorized")]
    Unauthorized,

    #[error("Profile not found")]
    ProfileNotFound,

    #[error("Your subscription has expired. Please renew to continue.")]
    SubscriptionExpired,

    #[error("Insufficient credits. Required {required}, available {available}.")]
    InsufficientCredits { required: i64, available: i64 },

    #[error("Quality tier \"{quality}\" is not available on your current plan.")]
    QualityNotAllowed { quality: &'static str },

    #[error("{0}")]
    InvalidInput(String),

    #[error("{message}")]
    Provider {
        kind: ProviderErrorKind,
        message: String,
    },

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    Auth,
    Quota,
    RateLimit,
    Api,
}

impl ProviderErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderErrorKind::Auth => "AUTH_ERROR",
            ProviderErrorKind::Quota => "QUOTA_ERROR",
            ProviderErrorKind::RateLimit => "RATE_LIMIT",
            ProviderErrorKind::Api => "API_ERROR",
        }
    }

    pub fn status(self) -> StatusCode {
        match self {
            ProviderErrorKind::Auth => StatusCode::UNAUTHORIZED,
            ProviderErrorKind::Quota => StatusCode::PAYMENT_REQUIRED,
            ProviderErrorKind::RateLimit => StatusCode::TOO_MANY_REQUESTS,
            ProviderErrorKind::Api => StatusCode::BAD_GATEWAY,
        }
    }

    /// Maps a generation-provider failure onto the taxonomy. Keyword checks
    /// run before the 429 branch because providers report exhausted billing
    /// quotas with 429 as well.
    pub fn classify(status: u16, body: &str) -> Self {
        let lowered = body.to_ascii_lowercase();
        if status == 401 || lowered.contains("invalid api key") || lowered.contains("incorrect api key") {
            return ProviderErrorKind::Auth;
        }
        if status == 402
            || lowered.contains("quota")
            || lowered.contains("billing")
            || lowered.contains("insufficient funds")
        {
            return ProviderErrorKind::Quota;
        }
        if status == 429 {
            return ProviderErrorKind::RateLimit;
        }
        ProviderErrorKind::Api
    }
}

impl ApiError {
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::Unauthorized => "UNAUTHORIZED",
            ApiError::ProfileNotFound => "PROFILE_NOT_FOUND",
            ApiError::SubscriptionExpired => "SUBSCRIPTION_EXPIRED",
            ApiError::InsufficientCredits { .. } => "INSUFFICIENT_CREDITS",
            ApiError::QualityNotAllowed { .. } => "QUALITY_NOT_ALLOWED",
            ApiError::InvalidInput(_) => "INVALID_INPUT",
            ApiError::Provider { kind, .. } => kind.as_str(),
            ApiError::Internal(_) => "SERVER_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::ProfileNotFound => StatusCode::NOT_FOUND,
            ApiError::SubscriptionExpired
            | ApiError::InsufficientCredits { .. }
            | ApiError::QualityNotAllowed { .. } => StatusCode::FORBIDDEN,
            ApiError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ApiError::Provider { kind, .. } => kind.status(),
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // Internal detail stays in the server log; clients get the reduced message.
        if let ApiError::Internal(error) = &self {
            tracing::error!(error = ?error, "request failed");
        }

        let mut body = json!({
            "type": self.kind(),
            "error": self.to_string(),
        });

        match &self {
            ApiError::InsufficientCredits {
                required,
                available,
            } => {
                body["required"] = json!(required);
                body["available"] = json!(available);
            }
            ApiError::Internal(_) => {
                body["error"] = json!("Internal server error");
            }
            _ => {}
        }

        (self.status(), Json(body)).into_response()
    }
}
