use chrono::{DateTime, Utc};
use sqlx::{Sqlite, SqliteConnection, SqlitePool, Transaction};
use thiserror::Error;
use uuid::Uuid;

use jobboard_core::payment::{OrderStatus, PaymentOrder, PaymentStatus};

use crate::{corrupt, is_unique_violation, to_rfc3339};

const ORDER_COLUMNS: &str =
    "order_id, company_id, package_id, points, gross_amount, status, created_at, updated_at";

/// Repository for point purchase orders and the webhook audit trail.
#[derive(Clone)]
pub struct PaymentRepository {
    pub(crate) pool: SqlitePool,
}

impl PaymentRepository {
    /// Stores a new pending order.
    pub async fn insert_order(&self, order: &NewPaymentOrder<'_>) -> Result<PaymentOrder, PaymentError> {
        let created_at = to_rfc3339(order.created_at);
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "INSERT INTO payment_orders \
             (order_id, company_id, package_id, points, gross_amount, status, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, 'pending', ?, ?) \
             RETURNING {ORDER_COLUMNS}"
        ))
        .bind(order.order_id)
        .bind(order.company_id)
        .bind(order.package_id)
        .bind(order.points)
        .bind(order.gross_amount)
        .bind(&created_at)
        .bind(&created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                PaymentError::DuplicateOrder
            } else {
                PaymentError::Database(err)
            }
        })?;

        row.into_domain()
    }

    /// Remembers the provider token handed to the browser.
    pub async fn attach_token(&self, order_id: &str, token: &str) -> Result<(), PaymentError> {
        sqlx::query("UPDATE payment_orders SET snap_token = ? WHERE order_id = ?")
            .bind(token)
            .bind(order_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn fetch_order(&self, order_id: &str) -> Result<PaymentOrder, PaymentError> {
        let mut conn = self.pool.acquire().await?;
        fetch_order(&mut *conn, order_id).await
    }

    pub async fn fetch_order_in(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        order_id: &str,
    ) -> Result<PaymentOrder, PaymentError> {
        fetch_order(&mut **tx, order_id).await
    }

    /// Marks an order paid. Returns `false` when it was already paid.
    pub async fn mark_paid(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        order_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, PaymentError> {
        let result = sqlx::query(
            "UPDATE payment_orders SET status = 'paid', updated_at = ? \
             WHERE order_id = ? AND status != 'paid'",
        )
        .bind(to_rfc3339(now))
        .bind(order_id)
        .execute(&mut **tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Marks a still-pending order failed. Paid orders are left alone.
    pub async fn mark_failed(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        order_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, PaymentError> {
        let result = sqlx::query(
            "UPDATE payment_orders SET status = 'failed', updated_at = ? \
             WHERE order_id = ? AND status = 'pending'",
        )
        .bind(to_rfc3339(now))
        .bind(order_id)
        .execute(&mut **tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Appends a received notification to the audit trail.
    pub async fn record_event(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        event: &NewPaymentEvent<'_>,
    ) -> Result<String, PaymentError> {
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO payment_events \
             (id, order_id, transaction_status, status, payload_json, received_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(event.order_id)
        .bind(event.transaction_status)
        .bind(event.status.as_str())
        .bind(event.payload_json)
        .bind(to_rfc3339(event.received_at))
        .execute(&mut **tx)
        .await?;
        Ok(id)
    }

    /// Number of audit rows recorded for an order.
    pub async fn count_events(&self, order_id: &str) -> Result<i64, PaymentError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM payment_events WHERE order_id = ?")
                .bind(order_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}

async fn fetch_order(conn: &mut SqliteConnection, order_id: &str) -> Result<PaymentOrder, PaymentError> {
    let row = sqlx::query_as::<_, OrderRow>(&format!(
        "SELECT {ORDER_COLUMNS} FROM payment_orders WHERE order_id = ?"
    ))
    .bind(order_id)
    .fetch_optional(conn)
    .await?
    .ok_or(PaymentError::OrderNotFound)?;

    row.into_domain()
}

pub struct NewPaymentOrder<'a> {
    pub order_id: &'a str,
    pub company_id: i64,
    pub package_id: &'a str,
    pub points: i64,
    pub gross_amount: i64,
    pub created_at: DateTime<Utc>,
}

pub struct NewPaymentEvent<'a> {
    pub order_id: &'a str,
    pub transaction_status: &'a str,
    pub status: PaymentStatus,
    pub payload_json: &'a str,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct OrderRow {
    order_id: String,
    company_id: i64,
    package_id: String,
    points: i64,
    gross_amount: i64,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl OrderRow {
    fn into_domain(self) -> Result<PaymentOrder, PaymentError> {
        let status = self.status.parse::<OrderStatus>().map_err(corrupt)?;
        Ok(PaymentOrder {
            order_id: self.order_id,
            company_id: self.company_id,
            package_id: self.package_id,
            points: self.points,
            gross_amount: self.gross_amount,
            status,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("payment order not found")]
    OrderNotFound,
    #[error("payment order id already exists")]
    DuplicateOrder,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}
