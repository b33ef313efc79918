use chrono::{DateTime, Utc};
use sqlx::{Sqlite, SqliteConnection, SqlitePool, Transaction};
use thiserror::Error;

use jobboard_core::invitation::{
    Decision, InvitationStats, InvitationStatus, JobInvitation, ResponseRejection,
};

use crate::{corrupt, to_rfc3339};

const INVITATION_COLUMNS: &str =
    "id, company_id, job_listing_id, candidate_id, status, responded_at, message, created_at";

/// Repository for company-to-candidate job invitations.
#[derive(Clone)]
pub struct InvitationRepository {
    pub(crate) pool: SqlitePool,
}

impl InvitationRepository {
    /// Inserts a pending invitation.
    pub async fn insert(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        invitation: &NewInvitation<'_>,
    ) -> Result<JobInvitation, InvitationError> {
        let row = sqlx::query_as::<_, InvitationRow>(&format!(
            "INSERT INTO job_invitations \
             (company_id, job_listing_id, candidate_id, status, message, created_at) \
             VALUES (?, ?, ?, 'pending', ?, ?) \
             RETURNING {INVITATION_COLUMNS}"
        ))
        .bind(invitation.company_id)
        .bind(invitation.job_listing_id)
        .bind(invitation.candidate_id)
        .bind(invitation.message)
        .bind(to_rfc3339(invitation.created_at))
        .fetch_one(&mut **tx)
        .await?;

        row.into_domain()
    }

    /// Moves a pending invitation owned by `actor_id` to `decision`.
    ///
    /// The guarded update runs first. When it matches nothing the row is read
    /// back inside the same transaction to report why.
    pub async fn respond(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        invitation_id: i64,
        actor_id: i64,
        decision: Decision,
        now: DateTime<Utc>,
    ) -> Result<JobInvitation, InvitationError> {
        let updated = sqlx::query_as::<_, InvitationRow>(&format!(
            "UPDATE job_invitations \
             SET status = ?, responded_at = ? \
             WHERE id = ? AND candidate_id = ? AND status = 'pending' \
             RETURNING {INVITATION_COLUMNS}"
        ))
        .bind(decision.status().as_str())
        .bind(to_rfc3339(now))
        .bind(invitation_id)
        .bind(actor_id)
        .fetch_optional(&mut **tx)
        .await?;

        if let Some(row) = updated {
            return row.into_domain();
        }

        let current = fetch_invitation(&mut **tx, invitation_id).await?;
        match current.check_response(actor_id, decision) {
            Err(ResponseRejection::Forbidden) => Err(InvitationError::Forbidden),
            Err(ResponseRejection::AlreadyResponded(status)) => {
                Err(InvitationError::AlreadyResponded(status))
            }
            // The row changed between the update and the read; treat it as answered.
            Ok(_) => Err(InvitationError::AlreadyResponded(current.status)),
        }
    }

    pub async fn fetch(&self, invitation_id: i64) -> Result<JobInvitation, InvitationError> {
        let mut conn = self.pool.acquire().await?;
        fetch_invitation(&mut *conn, invitation_id).await
    }

    /// Invitations addressed to a candidate, newest first.
    pub async fn list_for_candidate(
        &self,
        candidate_id: i64,
    ) -> Result<Vec<JobInvitation>, InvitationError> {
        let rows = sqlx::query_as::<_, InvitationRow>(&format!(
            "SELECT {INVITATION_COLUMNS} FROM job_invitations \
             WHERE candidate_id = ? \
             ORDER BY created_at DESC, id DESC"
        ))
        .bind(candidate_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(InvitationRow::into_domain).collect()
    }

    /// Per-status counts for one company.
    pub async fn stats(&self, company_id: i64) -> Result<InvitationStats, InvitationError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) FROM job_invitations WHERE company_id = ? GROUP BY status",
        )
        .bind(company_id)
        .fetch_all(&self.pool)
        .await?;

        let mut stats = InvitationStats::default();
        for (status, count) in rows {
            let status = status.parse::<InvitationStatus>().map_err(corrupt)?;
            stats.record(status, count);
        }
        Ok(stats)
    }
}

async fn fetch_invitation(
    conn: &mut SqliteConnection,
    invitation_id: i64,
) -> Result<JobInvitation, InvitationError> {
    let row = sqlx::query_as::<_, InvitationRow>(&format!(
        "SELECT {INVITATION_COLUMNS} FROM job_invitations WHERE id = ?"
    ))
    .bind(invitation_id)
    .fetch_optional(conn)
    .await?
    .ok_or(InvitationError::NotFound)?;

    row.into_domain()
}

pub struct NewInvitation<'a> {
    pub company_id: i64,
    pub job_listing_id: Option<i64>,
    pub candidate_id: i64,
    pub message: &'a str,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct InvitationRow {
    id: i64,
    company_id: i64,
    job_listing_id: Option<i64>,
    candidate_id: i64,
    status: String,
    responded_at: Option<DateTime<Utc>>,
    message: String,
    created_at: DateTime<Utc>,
}

impl InvitationRow {
    fn into_domain(self) -> Result<JobInvitation, InvitationError> {
        let status = self.status.parse::<InvitationStatus>().map_err(corrupt)?;
        Ok(JobInvitation {
            id: self.id,
            company_id: self.company_id,
            job_listing_id: self.job_listing_id,
            candidate_id: self.candidate_id,
            status,
            responded_at: self.responded_at,
            message: self.message,
            created_at: self.created_at,
        })
    }
}

#[derive(Debug, Error)]
pub enum InvitationError {
    #[error("invitation not found")]
    NotFound,
    #[error("invitation belongs to another candidate")]
    Forbidden,
    #[error("invitation was already {0}")]
    AlreadyResponded(InvitationStatus),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{seed_company, seed_user, setup_db};
    use crate::Database;

    async fn seed_invitation(db: &Database, company_id: i64, candidate_id: i64) -> JobInvitation {
        let mut tx = db.begin().await.expect("begin");
        let invitation = db
            .invitations()
            .insert(
                &mut tx,
                &NewInvitation {
                    company_id,
                    job_listing_id: None,
                    candidate_id,
                    message: "We would like to meet you",
                    created_at: Utc::now(),
                },
            )
            .await
            .expect("insert invitation");
        tx.commit().await.expect("commit");
        invitation
    }

    async fn respond(
        db: &Database,
        invitation_id: i64,
        actor_id: i64,
        decision: Decision,
    ) -> Result<JobInvitation, InvitationError> {
        let mut tx = db.begin().await.expect("begin");
        let result = db
            .invitations()
            .respond(&mut tx, invitation_id, actor_id, decision, Utc::now())
            .await;
        if result.is_ok() {
            tx.commit().await.expect("commit");
        }
        result
    }

    #[tokio::test]
    async fn second_response_is_rejected_and_first_sticks() {
        let db = setup_db().await;
        let company_id = seed_company(&db, 0).await;
        let candidate_id = seed_user(&db, "cand@example.test", None).await;
        let invitation = seed_invitation(&db, company_id, candidate_id).await;

        let accepted = respond(&db, invitation.id, candidate_id, Decision::Accepted)
            .await
            .expect("accept");
        assert_eq!(accepted.status, InvitationStatus::Accepted);
        assert!(accepted.responded_at.is_some());

        let err = respond(&db, invitation.id, candidate_id, Decision::Declined)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            InvitationError::AlreadyResponded(InvitationStatus::Accepted)
        ));

        let stored = db.invitations().fetch(invitation.id).await.expect("fetch");
        assert_eq!(stored.status, InvitationStatus::Accepted);
    }

    #[tokio::test]
    async fn stranger_is_forbidden_before_and_after_response() {
        let db = setup_db().await;
        let company_id = seed_company(&db, 0).await;
        let candidate_id = seed_user(&db, "cand@example.test", None).await;
        let stranger_id = seed_user(&db, "other@example.test", None).await;
        let invitation = seed_invitation(&db, company_id, candidate_id).await;

        let err = respond(&db, invitation.id, stranger_id, Decision::Accepted)
            .await
            .unwrap_err();
        assert!(matches!(err, InvitationError::Forbidden));

        respond(&db, invitation.id, candidate_id, Decision::Declined)
            .await
            .expect("decline");
        let err = respond(&db, invitation.id, stranger_id, Decision::Accepted)
            .await
            .unwrap_err();
        assert!(matches!(err, InvitationError::Forbidden));
    }

    #[tokio::test]
    async fn missing_invitation_is_not_found() {
        let db = setup_db().await;
        let err = respond(&db, 77, 1, Decision::Accepted).await.unwrap_err();
        assert!(matches!(err, InvitationError::NotFound));
    }

    #[tokio::test]
    async fn stats_and_listing_follow_responses() {
        let db = setup_db().await;
        let company_id = seed_company(&db, 0).await;
        let candidate_id = seed_user(&db, "cand@example.test", None).await;
        let first = seed_invitation(&db, company_id, candidate_id).await;
        seed_invitation(&db, company_id, candidate_id).await;

        respond(&db, first.id, candidate_id, Decision::Accepted)
            .await
            .expect("accept");

        let stats = db.invitations().stats(company_id).await.expect("stats");
        assert_eq!(
            stats,
            InvitationStats {
                total: 2,
                pending: 1,
                accepted: 1,
                declined: 0,
            }
        );

        let listed = db
            .invitations()
            .list_for_candidate(candidate_id)
            .await
            .expect("list");
        assert_eq!(listed.len(), 2);
    }
}
