use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{error::ApiError, plans::Operation, supabase::SupabaseClient};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAsset {
    pub id: String,
    pub user_id: String,
    pub asset_type: String,
    pub asset_url: String,
    pub prompt: Option<String>,
    #[serde(default)]
    pub metadata: Value,
}

/// Best-effort persistence of a generated artifact. The generation response
/// is already committed by the time this runs, so a failure here is logged
/// and never turns a successful generation into an error.
pub async fn persist_generated_asset(
    supabase: &SupabaseClient,
    user_id: &str,
    operation: Operation,
    asset_url: &str,
    prompt: &str,
    metadata: Value,
) {
    let result: anyhow::Result<UserAsset> = supabase
        .insert_returning(
            "user_assets",
            json!({
                "id": Uuid::new_v4().to_string(),
                "user_id": user_id,
                "asset_type": operation.asset_type(),
                "asset_url": asset_url,
                "prompt": prompt,
                "metadata": metadata,
            }),
        )
        .await;

    if let Err(error) = result {
        tracing::warn!(
            error = ?error,
            user_id = %user_id,
            asset_type = operation.asset_type(),
            "failed to persist generated asset"
        );
    }
}

pub async fn list_for_user(
    supabase: &SupabaseClient,
    user_id: &str,
) -> Result<Vec<UserAsset>, ApiError> {
    let assets = supabase
        .select_many(
            "user_assets",
            &[
                ("user_id", format!("eq.{user_id}")),
                ("order", "created_at.desc".to_string()),
            ],
        )
        .await?;

    Ok(assets)
}
