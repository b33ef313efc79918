use chrono::{DateTime, Utc};
use sqlx::{Sqlite, SqliteConnection, SqlitePool, Transaction};
use thiserror::Error;

use jobboard_core::company::{Company, VerificationStatus};

use crate::{corrupt, to_rfc3339};

const COMPANY_COLUMNS: &str = "id, name, email, phone, point_balance, active_job_post_count, \
     max_active_jobs, verification_status";

/// Repository for company profiles and their active-job accounting.
#[derive(Clone)]
pub struct CompanyRepository {
    pub(crate) pool: SqlitePool,
}

impl CompanyRepository {
    /// Inserts a company and returns the stored profile.
    pub async fn insert(&self, company: &NewCompany) -> Result<Company, CompanyError> {
        let created_at = to_rfc3339(company.created_at);
        let row = sqlx::query_as::<_, CompanyRow>(&format!(
            "INSERT INTO companies \
             (name, email, phone, max_active_jobs, verification_status, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?) \
             RETURNING {COMPANY_COLUMNS}"
        ))
        .bind(&company.name)
        .bind(&company.email)
        .bind(&company.phone)
        .bind(company.max_active_jobs)
        .bind(company.verification_status.as_str())
        .bind(&created_at)
        .bind(&created_at)
        .fetch_one(&self.pool)
        .await?;

        row.into_domain()
    }

    /// Loads a company by id.
    pub async fn fetch(&self, company_id: i64) -> Result<Company, CompanyError> {
        let mut conn = self.pool.acquire().await?;
        fetch_company(&mut *conn, company_id).await
    }

    /// Loads a company inside an open transaction.
    pub async fn fetch_in(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        company_id: i64,
    ) -> Result<Company, CompanyError> {
        fetch_company(&mut **tx, company_id).await
    }

    /// Claims one active-job slot, honouring `max_active_jobs`.
    ///
    /// The conditional update runs first so the write lock is held before the
    /// company row is read back for error classification.
    pub async fn reserve_job_slot(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        company_id: i64,
        now: DateTime<Utc>,
    ) -> Result<i64, CompanyError> {
        let updated: Option<(i64,)> = sqlx::query_as(
            "UPDATE companies \
             SET active_job_post_count = active_job_post_count + 1, updated_at = ? \
             WHERE id = ? \
               AND (max_active_jobs = 0 OR active_job_post_count < max_active_jobs) \
             RETURNING active_job_post_count",
        )
        .bind(to_rfc3339(now))
        .bind(company_id)
        .fetch_optional(&mut **tx)
        .await?;

        match updated {
            Some((count,)) => Ok(count),
            None => {
                let company = fetch_company(&mut **tx, company_id).await?;
                Err(CompanyError::JobLimitReached {
                    max_active_jobs: company.max_active_jobs,
                })
            }
        }
    }

    /// Gives back one active-job slot. The count never drops below zero.
    pub async fn release_job_slot(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        company_id: i64,
        now: DateTime<Utc>,
    ) -> Result<(), CompanyError> {
        sqlx::query(
            "UPDATE companies \
             SET active_job_post_count = MAX(active_job_post_count - 1, 0), updated_at = ? \
             WHERE id = ?",
        )
        .bind(to_rfc3339(now))
        .bind(company_id)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Records an admin verification decision.
    pub async fn set_verification(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        company_id: i64,
        status: VerificationStatus,
        note: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Company, CompanyError> {
        let row = sqlx::query_as::<_, CompanyRow>(&format!(
            "UPDATE companies \
             SET verification_status = ?, verification_note = ?, updated_at = ? \
             WHERE id = ? \
             RETURNING {COMPANY_COLUMNS}"
        ))
        .bind(status.as_str())
        .bind(note)
        .bind(to_rfc3339(now))
        .bind(company_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(CompanyError::NotFound)?;

        row.into_domain()
    }
}

async fn fetch_company(
    conn: &mut SqliteConnection,
    company_id: i64,
) -> Result<Company, CompanyError> {
    let row = sqlx::query_as::<_, CompanyRow>(&format!(
        "SELECT {COMPANY_COLUMNS} FROM companies WHERE id = ?"
    ))
    .bind(company_id)
    .fetch_optional(conn)
    .await?
    .ok_or(CompanyError::NotFound)?;

    row.into_domain()
}

/// Data required to register a company.
pub struct NewCompany {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub max_active_jobs: i64,
    pub verification_status: VerificationStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct CompanyRow {
    id: i64,
    name: String,
    email: String,
    phone: Option<String>,
    point_balance: i64,
    active_job_post_count: i64,
    max_active_jobs: i64,
    verification_status: String,
}

impl CompanyRow {
    fn into_domain(self) -> Result<Company, CompanyError> {
        let verification_status = self
            .verification_status
            .parse::<VerificationStatus>()
            .map_err(corrupt)?;
        Ok(Company {
            id: self.id,
            name: self.name,
            email: self.email,
            phone: self.phone,
            point_balance: self.point_balance,
            active_job_post_count: self.active_job_post_count,
            max_active_jobs: self.max_active_jobs,
            verification_status,
        })
    }
}

/// Errors that can occur while reading or mutating companies.
#[derive(Debug, Error)]
pub enum CompanyError {
    #[error("company not found")]
    NotFound,
    #[error("active job limit of {max_active_jobs} reached")]
    JobLimitReached { max_active_jobs: i64 },
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{seed_company, setup_db};

    #[tokio::test]
    async fn reserve_respects_cap() {
        let db = setup_db().await;
        let company = db
            .companies()
            .insert(&NewCompany {
                name: "Capped".to_string(),
                email: "ops@capped.test".to_string(),
                phone: None,
                max_active_jobs: 1,
                verification_status: VerificationStatus::Verified,
                created_at: Utc::now(),
            })
            .await
            .expect("insert");

        let repo = db.companies();
        let mut tx = db.begin().await.expect("begin");
        let count = repo
            .reserve_job_slot(&mut tx, company.id, Utc::now())
            .await
            .expect("first slot");
        assert_eq!(count, 1);
        let err = repo
            .reserve_job_slot(&mut tx, company.id, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, CompanyError::JobLimitReached { max_active_jobs: 1 }));
        tx.commit().await.expect("commit");

        assert_eq!(repo.fetch(company.id).await.expect("fetch").active_job_post_count, 1);
    }

    #[tokio::test]
    async fn release_never_goes_negative() {
        let db = setup_db().await;
        let company_id = seed_company(&db, 0).await;
        let repo = db.companies();

        let mut tx = db.begin().await.expect("begin");
        repo.release_job_slot(&mut tx, company_id, Utc::now())
            .await
            .expect("release");
        tx.commit().await.expect("commit");

        assert_eq!(repo.fetch(company_id).await.expect("fetch").active_job_post_count, 0);
    }

    #[tokio::test]
    async fn reserve_reports_missing_company() {
        let db = setup_db().await;
        let mut tx = db.begin().await.expect("begin");
        let err = db
            .companies()
            .reserve_job_slot(&mut tx, 404, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, CompanyError::NotFound));
    }

    #[tokio::test]
    async fn verification_updates_status() {
        let db = setup_db().await;
        let company_id = seed_company(&db, 0).await;
        let mut tx = db.begin().await.expect("begin");
        let company = db
            .companies()
            .set_verification(
                &mut tx,
                company_id,
                VerificationStatus::Rejected,
                Some("missing documents"),
                Utc::now(),
            )
            .await
            .expect("update");
        tx.commit().await.expect("commit");
        assert_eq!(company.verification_status, VerificationStatus::Rejected);
    }
}
