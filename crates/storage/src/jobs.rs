use chrono::{DateTime, Utc};
use sqlx::{Sqlite, SqliteConnection, SqlitePool, Transaction};
use thiserror::Error;

use jobboard_core::jobs::{ApplicationStatus, JobApplication, JobListing, JobStatus};

use crate::{corrupt, is_unique_violation, to_rfc3339};

const LISTING_COLUMNS: &str =
    "id, company_id, title, description, location, status, created_at, closed_at";
const APPLICATION_COLUMNS: &str =
    "id, job_listing_id, candidate_id, cover_letter, status, created_at, updated_at";

#[derive(Clone)]
pub struct JobRepository {
    pub(crate) pool: SqlitePool,
}

impl JobRepository {
    /// Inserts an open listing. Point accounting is the caller's job.
    pub async fn insert(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        listing: &NewJobListing<'_>,
    ) -> Result<JobListing, JobError> {
        let row = sqlx::query_as::<_, ListingRow>(&format!(
            "INSERT INTO job_listings (company_id, title, description, location, status, created_at) \
             VALUES (?, ?, ?, ?, 'open', ?) \
             RETURNING {LISTING_COLUMNS}"
        ))
        .bind(listing.company_id)
        .bind(listing.title)
        .bind(listing.description)
        .bind(listing.location)
        .bind(to_rfc3339(listing.created_at))
        .fetch_one(&mut **tx)
        .await?;

        row.into_domain()
    }

    pub async fn fetch(&self, listing_id: i64) -> Result<JobListing, JobError> {
        let mut conn = self.pool.acquire().await?;
        fetch_listing(&mut *conn, listing_id).await
    }

    pub async fn fetch_in(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        listing_id: i64,
    ) -> Result<JobListing, JobError> {
        fetch_listing(&mut **tx, listing_id).await
    }

    /// Closes an open listing owned by `company_id`.
    ///
    /// Returns `false` when the listing was already closed.
    pub async fn close(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        listing_id: i64,
        company_id: i64,
        now: DateTime<Utc>,
    ) -> Result<bool, JobError> {
        let closed: Option<(i64,)> = sqlx::query_as(
            "UPDATE job_listings SET status = 'closed', closed_at = ? \
             WHERE id = ? AND company_id = ? AND status = 'open' \
             RETURNING id",
        )
        .bind(to_rfc3339(now))
        .bind(listing_id)
        .bind(company_id)
        .fetch_optional(&mut **tx)
        .await?;

        if closed.is_some() {
            return Ok(true);
        }

        let listing = fetch_listing(&mut **tx, listing_id).await?;
        if listing.company_id != company_id {
            return Err(JobError::Forbidden);
        }
        Ok(false)
    }
}

async fn fetch_listing(conn: &mut SqliteConnection, listing_id: i64) -> Result<JobListing, JobError> {
    let row = sqlx::query_as::<_, ListingRow>(&format!(
        "SELECT {LISTING_COLUMNS} FROM job_listings WHERE id = ?"
    ))
    .bind(listing_id)
    .fetch_optional(conn)
    .await?
    .ok_or(JobError::NotFound)?;

    row.into_domain()
}

pub struct NewJobListing<'a> {
    pub company_id: i64,
    pub title: &'a str,
    pub description: &'a str,
    pub location: &'a str,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct ListingRow {
    id: i64,
    company_id: i64,
    title: String,
    description: String,
    location: String,
    status: String,
    created_at: DateTime<Utc>,
    closed_at: Option<DateTime<Utc>>,
}

impl ListingRow {
    fn into_domain(self) -> Result<JobListing, JobError> {
        let status = self.status.parse::<JobStatus>().map_err(corrupt)?;
        Ok(JobListing {
            id: self.id,
            company_id: self.company_id,
            title: self.title,
            description: self.description,
            location: self.location,
            status,
            created_at: self.created_at,
            closed_at: self.closed_at,
        })
    }
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error("job listing not found")]
    NotFound,
    #[error("job listing belongs to another company")]
    Forbidden,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Clone)]
pub struct ApplicationRepository {
    pub(crate) pool: SqlitePool,
}

impl ApplicationRepository {
    /// Files a pending application against an open listing.
    pub async fn insert(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        job_listing_id: i64,
        candidate_id: i64,
        cover_letter: &str,
        now: DateTime<Utc>,
    ) -> Result<JobApplication, ApplicationError> {
        let created_at = to_rfc3339(now);
        let inserted = sqlx::query_as::<_, ApplicationRow>(&format!(
            "INSERT INTO job_applications \
             (job_listing_id, candidate_id, cover_letter, status, created_at, updated_at) \
             SELECT ?, ?, ?, 'pending', ?, ? \
             WHERE EXISTS (SELECT 1 FROM job_listings WHERE id = ? AND status = 'open') \
             RETURNING {APPLICATION_COLUMNS}"
        ))
        .bind(job_listing_id)
        .bind(candidate_id)
        .bind(cover_letter)
        .bind(&created_at)
        .bind(&created_at)
        .bind(job_listing_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                ApplicationError::DuplicateApplication
            } else {
                ApplicationError::Database(err)
            }
        })?;

        match inserted {
            Some(row) => row.into_domain(),
            None => match fetch_listing(&mut **tx, job_listing_id).await {
                Ok(_) => Err(ApplicationError::ListingClosed),
                Err(JobError::NotFound) => Err(ApplicationError::ListingNotFound),
                Err(JobError::Database(err)) => Err(ApplicationError::Database(err)),
                Err(JobError::Forbidden) => Err(ApplicationError::ListingClosed),
            },
        }
    }

    pub async fn fetch(&self, application_id: i64) -> Result<JobApplication, ApplicationError> {
        let mut conn = self.pool.acquire().await?;
        fetch_application(&mut *conn, application_id).await
    }

    /// Moves an application forward. Backwards or repeated moves are rejected.
    pub async fn update_status(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        application_id: i64,
        next: ApplicationStatus,
        now: DateTime<Utc>,
    ) -> Result<JobApplication, ApplicationError> {
        let allowed_from: Vec<&'static str> = [
            ApplicationStatus::Pending,
            ApplicationStatus::Reviewed,
            ApplicationStatus::Accepted,
            ApplicationStatus::Rejected,
        ]
        .into_iter()
        .filter(|status| status.can_transition_to(next))
        .map(ApplicationStatus::as_str)
        .collect();

        if !allowed_from.is_empty() {
            let placeholders = vec!["?"; allowed_from.len()].join(", ");
            let sql = format!(
                "UPDATE job_applications SET status = ?, updated_at = ? \
                 WHERE id = ? AND status IN ({placeholders}) \
                 RETURNING {APPLICATION_COLUMNS}"
            );
            let mut query = sqlx::query_as::<_, ApplicationRow>(&sql)
                .bind(next.as_str())
                .bind(to_rfc3339(now))
                .bind(application_id);
            for status in &allowed_from {
                query = query.bind(*status);
            }
            if let Some(row) = query.fetch_optional(&mut **tx).await? {
                return row.into_domain();
            }
        }

        let current = fetch_application(&mut **tx, application_id).await?;
        Err(ApplicationError::InvalidTransition {
            from: current.status,
            to: next,
        })
    }

    /// Applications for one listing, oldest first.
    pub async fn list_for_listing(
        &self,
        job_listing_id: i64,
    ) -> Result<Vec<JobApplication>, ApplicationError> {
        let rows = sqlx::query_as::<_, ApplicationRow>(&format!(
            "SELECT {APPLICATION_COLUMNS} FROM job_applications \
             WHERE job_listing_id = ? ORDER BY id"
        ))
        .bind(job_listing_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ApplicationRow::into_domain).collect()
    }
}

async fn fetch_application(
    conn: &mut SqliteConnection,
    application_id: i64,
) -> Result<JobApplication, ApplicationError> {
    let row = sqlx::query_as::<_, ApplicationRow>(&format!(
        "SELECT {APPLICATION_COLUMNS} FROM job_applications WHERE id = ?"
    ))
    .bind(application_id)
    .fetch_optional(conn)
    .await?
    .ok_or(ApplicationError::NotFound)?;

    row.into_domain()
}

#[derive(Debug, sqlx::FromRow)]
struct ApplicationRow {
    id: i64,
    job_listing_id: i64,
    candidate_id: i64,
    cover_letter: String,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ApplicationRow {
    fn into_domain(self) -> Result<JobApplication, ApplicationError> {
        let status = self.status.parse::<ApplicationStatus>().map_err(corrupt)?;
        Ok(JobApplication {
            id: self.id,
            job_listing_id: self.job_listing_id,
            candidate_id: self.candidate_id,
            cover_letter: self.cover_letter,
            status,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("application not found")]
    NotFound,
    #[error("job listing not found")]
    ListingNotFound,
    #[error("job listing is closed")]
    ListingClosed,
    #[error("candidate already applied to this listing")]
    DuplicateApplication,
    #[error("cannot move application from {} to {}", .from.as_str(), .to.as_str())]
    InvalidTransition {
        from: ApplicationStatus,
        to: ApplicationStatus,
    },
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{seed_company, seed_user, setup_db};
    use crate::Database;

    async fn seed_listing(db: &Database, company_id: i64) -> JobListing {
        let mut tx = db.begin().await.expect("begin");
        let listing = db
            .jobs()
            .insert(
                &mut tx,
                &NewJobListing {
                    company_id,
                    title: "Backend Engineer",
                    description: "Rust and SQLite",
                    location: "Jakarta",
                    created_at: Utc::now(),
                },
            )
            .await
            .expect("insert listing");
        tx.commit().await.expect("commit");
        listing
    }

    async fn apply(
        db: &Database,
        listing_id: i64,
        candidate_id: i64,
    ) -> Result<JobApplication, ApplicationError> {
        let mut tx = db.begin().await.expect("begin");
        let result = db
            .applications()
            .insert(&mut tx, listing_id, candidate_id, "Hello", Utc::now())
            .await;
        if result.is_ok() {
            tx.commit().await.expect("commit");
        }
        result
    }

    #[tokio::test]
    async fn close_is_idempotent_and_owner_checked() {
        let db = setup_db().await;
        let company_id = seed_company(&db, 0).await;
        let listing = seed_listing(&db, company_id).await;

        let mut tx = db.begin().await.expect("begin");
        let repo = db.jobs();
        assert!(matches!(
            repo.close(&mut tx, listing.id, company_id + 1, Utc::now()).await,
            Err(JobError::Forbidden)
        ));
        assert!(repo.close(&mut tx, listing.id, company_id, Utc::now()).await.expect("close"));
        assert!(!repo.close(&mut tx, listing.id, company_id, Utc::now()).await.expect("again"));
        tx.commit().await.expect("commit");

        let stored = repo.fetch(listing.id).await.expect("fetch");
        assert_eq!(stored.status, JobStatus::Closed);
        assert!(stored.closed_at.is_some());
    }

    #[tokio::test]
    async fn one_application_per_candidate() {
        let db = setup_db().await;
        let company_id = seed_company(&db, 0).await;
        let candidate_id = seed_user(&db, "cand@example.test", None).await;
        let listing = seed_listing(&db, company_id).await;

        apply(&db, listing.id, candidate_id).await.expect("first");
        let err = apply(&db, listing.id, candidate_id).await.unwrap_err();
        assert!(matches!(err, ApplicationError::DuplicateApplication));
    }

    #[tokio::test]
    async fn closed_or_missing_listing_rejects_applications() {
        let db = setup_db().await;
        let company_id = seed_company(&db, 0).await;
        let candidate_id = seed_user(&db, "cand@example.test", None).await;
        let listing = seed_listing(&db, company_id).await;

        let mut tx = db.begin().await.expect("begin");
        db.jobs()
            .close(&mut tx, listing.id, company_id, Utc::now())
            .await
            .expect("close");
        tx.commit().await.expect("commit");

        assert!(matches!(
            apply(&db, listing.id, candidate_id).await,
            Err(ApplicationError::ListingClosed)
        ));
        assert!(matches!(
            apply(&db, 999, candidate_id).await,
            Err(ApplicationError::ListingNotFound)
        ));
    }

    #[tokio::test]
    async fn status_moves_forward_only() {
        let db = setup_db().await;
        let company_id = seed_company(&db, 0).await;
        let candidate_id = seed_user(&db, "cand@example.test", None).await;
        let listing = seed_listing(&db, company_id).await;
        let application = apply(&db, listing.id, candidate_id).await.expect("apply");
        let repo = db.applications();

        let mut tx = db.begin().await.expect("begin");
        let reviewed = repo
            .update_status(&mut tx, application.id, ApplicationStatus::Reviewed, Utc::now())
            .await
            .expect("review");
        assert_eq!(reviewed.status, ApplicationStatus::Reviewed);

        let err = repo
            .update_status(&mut tx, application.id, ApplicationStatus::Pending, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ApplicationError::InvalidTransition {
                from: ApplicationStatus::Reviewed,
                to: ApplicationStatus::Pending,
            }
        ));

        repo.update_status(&mut tx, application.id, ApplicationStatus::Accepted, Utc::now())
            .await
            .expect("accept");
        tx.commit().await.expect("commit");

        let listed = repo.list_for_listing(listing.id).await.expect("list");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].status, ApplicationStatus::Accepted);
    }
}
