mod companies;
mod invitations;
mod jobs;
mod ledger;
mod notifications;
mod payments;
mod users;

use std::{str::FromStr, time::Duration};

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{
    migrate::MigrateError,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
    Sqlite, SqlitePool, Transaction,
};
use thiserror::Error;

pub use companies::{CompanyError, CompanyRepository, NewCompany};
pub use invitations::{InvitationError, InvitationRepository, NewInvitation};
pub use jobs::{ApplicationError, ApplicationRepository, JobError, JobRepository, NewJobListing};
pub use ledger::{LedgerEntry, LedgerError, PointLedgerRepository};
pub use notifications::{NotificationError, NotificationRepository};
pub use payments::{NewPaymentEvent, NewPaymentOrder, PaymentError, PaymentRepository};
pub use users::{NewUser, User, UserError, UserRepository};

/// SQLite extended result code for a violated UNIQUE constraint.
const SQLITE_CONSTRAINT_UNIQUE: &str = "2067";
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Top-level database handle that owns the SQLite connection pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Establishes a new SQLite connection pool for the provided connection string.
    ///
    /// Pragmas are set on the connect options so every pooled connection gets
    /// the same busy timeout and foreign key enforcement.
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(StorageError::Connect)?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(StorageError::Connect)?;

        Ok(Self { pool })
    }

    /// Applies migrations located under `migrations/`.
    pub async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(StorageError::Migration)?;
        Ok(())
    }

    /// Begins a transaction shared by several repositories.
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>, sqlx::Error> {
        self.pool.begin().await
    }

    /// Returns a handle for company profiles and job-slot accounting.
    pub fn companies(&self) -> CompanyRepository {
        CompanyRepository {
            pool: self.pool.clone(),
        }
    }

    /// Returns a handle for candidate and company user records.
    pub fn users(&self) -> UserRepository {
        UserRepository {
            pool: self.pool.clone(),
        }
    }

    /// Returns a handle to the point ledger.
    pub fn ledger(&self) -> PointLedgerRepository {
        PointLedgerRepository {
            pool: self.pool.clone(),
        }
    }

    /// Returns a handle for payment orders and webhook audit events.
    pub fn payments(&self) -> PaymentRepository {
        PaymentRepository {
            pool: self.pool.clone(),
        }
    }

    /// Returns a handle for job listings.
    pub fn jobs(&self) -> JobRepository {
        JobRepository {
            pool: self.pool.clone(),
        }
    }

    /// Returns a handle for job applications.
    pub fn applications(&self) -> ApplicationRepository {
        ApplicationRepository {
            pool: self.pool.clone(),
        }
    }

    /// Returns a handle for job invitations.
    pub fn invitations(&self) -> InvitationRepository {
        InvitationRepository {
            pool: self.pool.clone(),
        }
    }

    /// Returns a handle for the notification sink.
    pub fn notifications(&self) -> NotificationRepository {
        NotificationRepository {
            pool: self.pool.clone(),
        }
    }

    /// Exposes the inner pool when lower level access is required.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// General storage level errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to connect to sqlite: {0}")]
    Connect(sqlx::Error),
    #[error("failed to run database migrations: {0}")]
    Migration(MigrateError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub(crate) fn to_rfc3339(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some(SQLITE_CONSTRAINT_UNIQUE),
        _ => false,
    }
}

/// Persisted enum column carrying a value this build cannot decode.
pub(crate) fn corrupt(err: jobboard_core::company::UnknownVariant) -> sqlx::Error {
    sqlx::Error::Decode(Box::new(err))
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use jobboard_core::company::VerificationStatus;

    pub async fn setup_db() -> Database {
        let db = Database::connect("sqlite::memory:").await.expect("connect");
        db.run_migrations().await.expect("migrations");
        db
    }

    pub async fn seed_company(db: &Database, balance: i64) -> i64 {
        let company = db
            .companies()
            .insert(&NewCompany {
                name: "Acme".to_string(),
                email: "hr@acme.test".to_string(),
                phone: Some("628123456789".to_string()),
                max_active_jobs: 0,
                verification_status: VerificationStatus::Verified,
                created_at: Utc::now(),
            })
            .await
            .expect("insert company");
        if balance > 0 {
            let mut tx = db.begin().await.expect("begin");
            db.ledger()
                .credit(
                    &mut tx,
                    &LedgerEntry::bonus(company.id, balance, "opening balance"),
                    Utc::now(),
                )
                .await
                .expect("seed balance");
            tx.commit().await.expect("commit");
        }
        company.id
    }

    pub async fn seed_user(db: &Database, email: &str, company_id: Option<i64>) -> i64 {
        db.users()
            .insert(&NewUser {
                name: email.split('@').next().unwrap_or(email).to_string(),
                email: email.to_string(),
                phone: None,
                company_id,
                created_at: Utc::now(),
            })
            .await
            .expect("insert user")
            .id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn migrations_apply() {
        let db = Database::connect("sqlite::memory:").await.expect("connect");
        db.run_migrations().await.expect("migrations");

        let tables: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'")
                .fetch_one(db.pool())
                .await
                .expect("fetch tables");
        assert!(tables.0 >= 9, "expected core tables to be created");
    }

    #[tokio::test]
    async fn connect_creates_missing_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("fresh.db");
        let url = format!("sqlite://{}", path.display());

        let db = Database::connect(&url).await.expect("connect");
        db.run_migrations().await.expect("migrations");
        assert!(path.exists());
    }
}
