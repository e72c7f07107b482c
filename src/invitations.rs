use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::{error::ApiError, notifications, supabase::SupabaseClient};

pub const INVITATION_TTL_DAYS: i64 = 7;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvitationStatus {
    Pending,
    Accepted,
    Expired,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamInvitation {
    pub id: String,
    pub project_id: String,
    pub email: String,
    pub role: String,
    pub permission: String,
    pub status: InvitationStatus,
    pub token: String,
    pub invited_by: Option<String>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProjectMember {
    pub project_id: String,
    pub user_id: String,
    pub role: String,
    pub permission: String,
}

/// Pure acceptance check. Tokens are single-use: anything other than a live
/// pending invitation addressed to the caller is rejected with a descriptive
/// error, so repeated accepts cannot create duplicate members.
pub fn validate_for_acceptance(
    invitation: &TeamInvitation,
    caller_email: &str,
    now: DateTime<Utc>,
) -> Result<(), ApiError> {
    match invitation.status {
        InvitationStatus::Accepted => {
            return Err(ApiError::InvalidInput(
                "This invitation has already been accepted.".to_string(),
            ))
        }
        InvitationStatus::Expired => {
            return Err(ApiError::InvalidInput(
                "This invitation has expired. Ask for a new one.".to_string(),
            ))
        }
        InvitationStatus::Pending => {}
    }

    if invitation.expires_at <= now {
        return Err(ApiError::InvalidInput(
            "This invitation has expired. Ask for a new one.".to_string(),
        ));
    }

    if !invitation.email.eq_ignore_ascii_case(caller_email.trim()) {
        return Err(ApiError::InvalidInput(
            "This invitation was issued to a different email address.".to_string(),
        ));
    }

    Ok(())
}

pub async fn create_invitation(
    supabase: &SupabaseClient,
    project_id: &str,
    email: &str,
    role: &str,
    permission: &str,
    invited_by: &str,
) -> Result<TeamInvitation, ApiError> {
    let invitation: TeamInvitation = supabase
        .insert_returning(
            "team_invitations",
            json!({
                "id": Uuid::new_v4().to_string(),
                "project_id": project_id,
                "email": email.trim().to_lowercase(),
                "role": role,
                "permission": permission,
                "status": "pending",
                "token": Uuid::new_v4().to_string(),
                "invited_by": invited_by,
                "expires_at": (Utc::now() + Duration::days(INVITATION_TTL_DAYS)),
            }),
        )
        .await?;

    // Dual-keyed so invitees who have not signed up yet still see it after
    // registration. Best-effort: a notification failure does not undo the invite.
    if let Err(error) = notifications::create_invitation_notification(
        supabase,
        &invitation.email,
        &invitation.id,
        project_id,
    )
    .await
    {
        tracing::warn!(error = ?error, invitation_id = %invitation.id, "failed to create invitation notification");
    }

    Ok(invitation)
}

pub async fn load_by_token(
    supabase: &SupabaseClient,
    token: &str,
) -> Result<TeamInvitation, ApiError> {
    let invitation: Option<TeamInvitation> = supabase
        .select_one("team_invitations", &[("token", format!("eq.{token}"))])
        .await?;

    invitation.ok_or_else(|| ApiError::InvalidInput("Invitation not found.".to_string()))
}

pub async fn load_by_id(
    supabase: &SupabaseClient,
    invitation_id: &str,
) -> Result<TeamInvitation, ApiError> {
    let invitation: Option<TeamInvitation> = supabase
        .select_one("team_invitations", &[("id", format!("eq.{invitation_id}"))])
        .await?;

    invitation.ok_or_else(|| ApiError::InvalidInput("Invitation not found.".to_string()))
}

/// Accepts an invitation for the signed-in user: validates the token, creates
/// the membership if absent, and marks the invitation accepted.
pub async fn accept_invitation(
    supabase: &SupabaseClient,
    token: &str,
    user_id: &str,
    caller_email: &str,
) -> Result<ProjectMember, ApiError> {
    let invitation = load_by_token(supabase, token).await?;
    validate_for_acceptance(&invitation, caller_email, Utc::now())?;

    let existing: Option<ProjectMember> = supabase
        .select_one(
            "project_members",
            &[
                ("project_id", format!("eq.{}", invitation.project_id)),
                ("user_id", format!("eq.{user_id}")),
            ],
        )
        .await?;

    if existing.is_some() {
        return Err(ApiError::InvalidInput(
            "You are already a member of this project.".to_string(),
        ));
    }

    // The pre-check above is advisory; two concurrent accepts can both pass
    // it. The unique constraint on (project_id, user_id) is authoritative.
    let insert = supabase
        .insert_returning(
            "project_members",
            json!({
                "project_id": invitation.project_id,
                "user_id": user_id,
                "role": invitation.role,
                "permission": invitation.permission,
            }),
        )
        .await;
    let member: ProjectMember = match insert {
        Ok(member) => member,
        Err(error) if is_unique_violation(&error) => {
            return Err(ApiError::InvalidInput(
                "You are already a member of this project.".to_string(),
            ))
        }
        Err(error) => return Err(error.into()),
    };

    supabase
        .update(
            "team_invitations",
            &[("id", format!("eq.{}", invitation.id))],
            json!({ "status": "accepted" }),
        )
        .await?;

    Ok(member)
}

/// Postgres signals a unique-constraint conflict with SQLSTATE 23505; the
/// PostgREST error body repeats it as a "duplicate key" message.
fn is_unique_violation(error: &anyhow::Error) -> bool {
    let text = format!("{error:#}").to_ascii_lowercase();
    text.contains("duplicate key") || text.contains("23505")
}

/// Resend: the old row is expired (its token stops validating) and a brand
/// new row is issued. Ids and tokens are never reused.
pub async fn resend_invitation(
    supabase: &SupabaseClient,
    invitation_id: &str,
    requested_by: &str,
) -> Result<TeamInvitation, ApiError> {
    let previous = load_by_id(supabase, invitation_id).await?;

    if previous.status == InvitationStatus::Accepted {
        return Err(ApiError::InvalidInput(
            "This invitation has already been accepted.".to_string(),
        ));
    }

    supabase
        .update(
            "team_invitations",
            &[("id", format!("eq.{}", previous.id))],
            json!({ "status": "expired" }),
        )
        .await?;

    create_invitation(
        supabase,
        &previous.project_id,
        &previous.email,
        &previous.role,
        &previous.permission,
        requested_by,
    )
    .await
}

pub async fn list_for_project(
    supabase: &SupabaseClient,
    project_id: &str,
) -> Result<Vec<TeamInvitation>, ApiError> {
    let invitations = supabase
        .select_many(
            "team_invitations",
            &[
                ("project_id", format!("eq.{project_id}")),
                ("order", "expires_at.desc".to_string()),
            ],
        )
        .await?;

    Ok(invitations)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invitation(status: InvitationStatus, expires_in_days: i64) -> TeamInvitation {
        TeamInvitation {
            id: "inv_1".to_string(),
            project_id: "proj_1".to_string(),
            email: "invitee@example.com".to_string(),
            role: "editor".to_string(),
            permission: "write".to_string(),
            status,
            token: "tok_1".to_string(),
            invited_by: Some("user_owner".to_string()),
            expires_at: Utc::now() + Duration::days(expires_in_days),
        }
    }

    #[test]
    fn pending_unexpired_matching_email_is_accepted() {
        let inv = invitation(InvitationStatus::Pending, 3);
        assert!(validate_for_acceptance(&inv, "invitee@example.com", Utc::now()).is_ok());
        // Email matching ignores case.
        assert!(validate_for_acceptance(&inv, "Invitee@Example.COM", Utc::now()).is_ok());
    }

    #[test]
    fn accepted_token_cannot_be_reused() {
        let inv = invitation(InvitationStatus::Accepted, 3);
        assert!(matches!(
            validate_for_acceptance(&inv, "invitee@example.com", Utc::now()),
            Err(ApiError::InvalidInput(_))
        ));
    }

    #[test]
    fn expired_status_and_lapsed_deadline_both_fail() {
        let inv = invitation(InvitationStatus::Expired, 3);
        assert!(validate_for_acceptance(&inv, "invitee@example.com", Utc::now()).is_err());

        let inv = invitation(InvitationStatus::Pending, -1);
        assert!(validate_for_acceptance(&inv, "invitee@example.com", Utc::now()).is_err());
    }

    #[test]
    fn wrong_email_is_rejected() {
        let inv = invitation(InvitationStatus::Pending, 3);
        assert!(validate_for_acceptance(&inv, "stranger@example.com", Utc::now()).is_err());
    }

    #[test]
    fn unique_violations_are_recognized() {
        assert!(is_unique_violation(&anyhow::anyhow!(
            "Supabase request for project_members failed with status 409 Conflict: \
             duplicate key value violates unique constraint \"project_members_pkey\""
        )));
        assert!(is_unique_violation(&anyhow::anyhow!("SQLSTATE 23505")));
        assert!(!is_unique_violation(&anyhow::anyhow!("connection reset")));
    }

    #[tokio::test]
    async fn concurrent_accept_losing_the_insert_race_reports_existing_membership() {
        let mut server = mockito::Server::new_async().await;
        let supabase = SupabaseClient::new(server.url(), "service-role-test-key").unwrap();

        server
            .mock("GET", "/rest/v1/team_invitations")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                serde_json::to_string(&vec![invitation(InvitationStatus::Pending, 3)]).unwrap(),
            )
            .create_async()
            .await;
        // Pre-check sees no membership, but another accept commits first.
        server
            .mock("GET", "/rest/v1/project_members")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body("[]")
            .create_async()
            .await;
        server
            .mock("POST", "/rest/v1/project_members")
            .with_status(409)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "code": "23505",
                    "message": "duplicate key value violates unique constraint \"project_members_project_id_user_id_key\"",
                })
                .to_string(),
            )
            .create_async()
            .await;
        let accept_update_mock = server
            .mock("PATCH", "/rest/v1/team_invitations")
            .match_query(mockito::Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let result =
            accept_invitation(&supabase, "tok_1", "user_2", "invitee@example.com").await;

        match result {
            Err(ApiError::InvalidInput(message)) => {
                assert!(message.contains("already a member"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
        accept_update_mock.assert_async().await;
    }
}
