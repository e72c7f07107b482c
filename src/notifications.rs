use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{error::ApiError, supabase::SupabaseClient};

/// Notifications are dual-keyed: `user_id` for registered users, `email` for
/// invitees who have not signed up yet. On sign-up the Clerk webhook claims
/// email-keyed rows for the new user id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub user_id: Option<String>,
    pub email: Option<String>,
    #[serde(rename = "type")]
    pub notification_type: String,
    #[serde(default)]
    pub metadata: Value,
    pub is_read: bool,
}

pub async fn create_invitation_notification(
    supabase: &SupabaseClient,
    invitee_email: &str,
    invitation_id: &str,
    project_id: &str,
) -> anyhow::Result<()> {
    let user_id = lookup_user_by_email(supabase, invitee_email).await?;

    let _row: Notification = supabase
        .insert_returning(
            "notifications",
            json!({
                "id": Uuid::new_v4().to_string(),
                "user_id": user_id,
                "email": invitee_email,
                "type": "team_invitation",
                "metadata": {
                    "invitation_id": invitation_id,
                    "project_id": project_id,
                },
                "is_read": false,
            }),
        )
        .await?;

    Ok(())
}

/// Attaches email-keyed notifications to a newly registered user.
pub async fn claim_email_notifications(
    supabase: &SupabaseClient,
    user_id: &str,
    email: &str,
) -> anyhow::Result<()> {
    supabase
        .update(
            "notifications",
            &[
                ("email", format!("eq.{}", email.trim().to_lowercase())),
                ("user_id", "is.null".to_string()),
            ],
            json!({ "user_id": user_id }),
        )
        .await
}

pub async fn list_for_user(
    supabase: &SupabaseClient,
    user_id: &str,
    email: Option<&str>,
) -> Result<Vec<Notification>, ApiError> {
    let filter = match email {
        Some(email) => format!(
            "or=(user_id.eq.{user_id},email.eq.{})",
            email.trim().to_lowercase()
        ),
        None => format!("user_id=eq.{user_id}"),
    };

    // PostgREST or-filters go in a single query parameter.
    let (key, value) = filter.split_once('=').unwrap_or(("user_id", ""));
    let notifications = supabase
        .select_many(
            "notifications",
            &[
                (key, value.to_string()),
                ("order", "is_read.asc".to_string()),
            ],
        )
        .await?;

    Ok(notifications)
}

pub async fn mark_read(
    supabase: &SupabaseClient,
    user_id: &str,
    notification_id: &str,
) -> Result<(), ApiError> {
    supabase
        .update(
            "notifications",
            &[
                ("id", format!("eq.{notification_id}")),
                ("user_id", format!("eq.{user_id}")),
            ],
            json!({ "is_read": true }),
        )
        .await?;

    Ok(())
}

async fn lookup_user_by_email(
    supabase: &SupabaseClient,
    email: &str,
) -> anyhow::Result<Option<String>> {
    #[derive(Deserialize)]
    struct IdRow {
        id: String,
    }

    let row: Option<IdRow> = supabase
        .select_one(
            "profiles",
            &[
                ("email", format!("eq.{}", email.trim().to_lowercase())),
                ("select", "id".to_string()),
            ],
        )
        .await?;

    Ok(row.map(|row| row.id))
}
