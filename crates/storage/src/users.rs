use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{Sqlite, SqliteConnection, SqlitePool, Transaction};
use thiserror::Error;

use crate::{is_unique_violation, to_rfc3339};

/// Minimal user record; authentication lives outside this service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub company_id: Option<i64>,
}

#[derive(Clone)]
pub struct UserRepository {
    pub(crate) pool: SqlitePool,
}

impl UserRepository {
    pub async fn insert(&self, user: &NewUser) -> Result<User, UserError> {
        sqlx::query_as::<_, User>(
            "INSERT INTO users (name, email, phone, company_id, created_at) \
             VALUES (?, ?, ?, ?, ?) \
             RETURNING id, name, email, phone, company_id",
        )
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.phone)
        .bind(user.company_id)
        .bind(to_rfc3339(user.created_at))
        .fetch_one(&self.pool)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                UserError::DuplicateEmail
            } else {
                UserError::Database(err)
            }
        })
    }

    pub async fn fetch(&self, user_id: i64) -> Result<User, UserError> {
        let mut conn = self.pool.acquire().await?;
        fetch_user(&mut *conn, user_id).await
    }

    pub async fn fetch_in(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        user_id: i64,
    ) -> Result<User, UserError> {
        fetch_user(&mut **tx, user_id).await
    }
}

async fn fetch_user(conn: &mut SqliteConnection, user_id: i64) -> Result<User, UserError> {
    sqlx::query_as::<_, User>("SELECT id, name, email, phone, company_id FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_optional(conn)
        .await?
        .ok_or(UserError::NotFound)
}

pub struct NewUser {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub company_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum UserError {
    #[error("user not found")]
    NotFound,
    #[error("email is already registered")]
    DuplicateEmail,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}
