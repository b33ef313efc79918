use chrono::{DateTime, Utc};
use sqlx::{Sqlite, SqliteConnection, SqlitePool, Transaction};
use thiserror::Error;

use jobboard_core::ledger::{validate_amount, AmountError, PointTransaction, TransactionKind};

use crate::{corrupt, is_unique_violation, to_rfc3339};

const TRANSACTION_COLUMNS: &str =
    "id, company_id, type, amount, balance_after, reference_id, description, created_at";

/// Repository for the append-only point ledger.
///
/// Balance changes and ledger rows are always written through the same
/// transaction; callers commit or drop it.
#[derive(Clone)]
pub struct PointLedgerRepository {
    pub(crate) pool: SqlitePool,
}

impl PointLedgerRepository {
    /// Removes `entry.amount` points, refusing to go below zero.
    pub async fn debit(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        entry: &LedgerEntry<'_>,
        now: DateTime<Utc>,
    ) -> Result<PointTransaction, LedgerError> {
        validate_amount(entry.amount)?;
        let updated_at = to_rfc3339(now);

        // The guarded update takes the write lock before anything is read, so two
        // debits on one company serialize instead of both seeing the old balance.
        let balance: Option<(i64,)> = sqlx::query_as(
            "UPDATE companies \
             SET point_balance = point_balance - ?, updated_at = ? \
             WHERE id = ? AND point_balance >= ? \
             RETURNING point_balance",
        )
        .bind(entry.amount)
        .bind(&updated_at)
        .bind(entry.company_id)
        .bind(entry.amount)
        .fetch_optional(&mut **tx)
        .await?;

        let Some((balance_after,)) = balance else {
            return Err(classify_rejected_debit(&mut **tx, entry).await);
        };

        append_entry(
            &mut **tx,
            entry,
            TransactionKind::Debit,
            balance_after,
            &updated_at,
        )
        .await
    }

    /// Adds `entry.amount` points. A repeated `reference_id` is rejected.
    pub async fn credit(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        entry: &LedgerEntry<'_>,
        now: DateTime<Utc>,
    ) -> Result<PointTransaction, LedgerError> {
        validate_amount(entry.amount)?;
        if entry.kind == TransactionKind::Debit {
            return Err(LedgerError::InvalidKind(entry.kind));
        }
        let updated_at = to_rfc3339(now);

        let balance: Option<(i64,)> = sqlx::query_as(
            "UPDATE companies \
             SET point_balance = point_balance + ?, updated_at = ? \
             WHERE id = ? \
             RETURNING point_balance",
        )
        .bind(entry.amount)
        .bind(&updated_at)
        .bind(entry.company_id)
        .fetch_optional(&mut **tx)
        .await?;

        let Some((balance_after,)) = balance else {
            return Err(LedgerError::CompanyNotFound);
        };

        append_entry(&mut **tx, entry, entry.kind, balance_after, &updated_at).await
    }

    /// Current spendable balance.
    pub async fn balance(&self, company_id: i64) -> Result<i64, LedgerError> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT point_balance FROM companies WHERE id = ?")
            .bind(company_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|(balance,)| balance)
            .ok_or(LedgerError::CompanyNotFound)
    }

    /// Most recent entries first; `before_id` pages further back.
    pub async fn history(
        &self,
        company_id: i64,
        limit: i64,
        before_id: Option<i64>,
    ) -> Result<Vec<PointTransaction>, LedgerError> {
        let rows = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM point_transactions \
             WHERE company_id = ? AND (? IS NULL OR id < ?) \
             ORDER BY id DESC \
             LIMIT ?"
        ))
        .bind(company_id)
        .bind(before_id)
        .bind(before_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TransactionRow::into_domain).collect()
    }

    /// Full history oldest first, used for audits and consistency checks.
    pub async fn full_history(&self, company_id: i64) -> Result<Vec<PointTransaction>, LedgerError> {
        let rows = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM point_transactions \
             WHERE company_id = ? ORDER BY id ASC"
        ))
        .bind(company_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TransactionRow::into_domain).collect()
    }
}

async fn classify_rejected_debit(conn: &mut SqliteConnection, entry: &LedgerEntry<'_>) -> LedgerError {
    let current: Result<Option<(i64,)>, sqlx::Error> =
        sqlx::query_as("SELECT point_balance FROM companies WHERE id = ?")
            .bind(entry.company_id)
            .fetch_optional(conn)
            .await;

    match current {
        Ok(Some((balance,))) => LedgerError::InsufficientBalance {
            balance,
            required: entry.amount,
        },
        Ok(None) => LedgerError::CompanyNotFound,
        Err(err) => LedgerError::Database(err),
    }
}

async fn append_entry(
    conn: &mut SqliteConnection,
    entry: &LedgerEntry<'_>,
    kind: TransactionKind,
    balance_after: i64,
    created_at: &str,
) -> Result<PointTransaction, LedgerError> {
    let row = sqlx::query_as::<_, TransactionRow>(&format!(
        "INSERT INTO point_transactions \
         (company_id, type, amount, balance_after, reference_id, description, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?) \
         RETURNING {TRANSACTION_COLUMNS}"
    ))
    .bind(entry.company_id)
    .bind(kind.as_str())
    .bind(kind.signed(entry.amount))
    .bind(balance_after)
    .bind(entry.reference_id)
    .bind(entry.description)
    .bind(created_at)
    .fetch_one(conn)
    .await
    .map_err(|err| {
        if is_unique_violation(&err) {
            LedgerError::DuplicateReference(entry.reference_id.unwrap_or_default().to_string())
        } else {
            LedgerError::Database(err)
        }
    })?;

    row.into_domain()
}

/// Movement requested against a company's balance.
#[derive(Debug, Clone, Copy)]
pub struct LedgerEntry<'a> {
    pub company_id: i64,
    pub kind: TransactionKind,
    pub amount: i64,
    pub reference_id: Option<&'a str>,
    pub description: &'a str,
}

impl<'a> LedgerEntry<'a> {
    pub fn debit(company_id: i64, amount: i64, reason: &'a str) -> Self {
        Self {
            company_id,
            kind: TransactionKind::Debit,
            amount,
            reference_id: None,
            description: reason,
        }
    }

    pub fn purchase(company_id: i64, amount: i64, order_id: &'a str, description: &'a str) -> Self {
        Self {
            company_id,
            kind: TransactionKind::Purchase,
            amount,
            reference_id: Some(order_id),
            description,
        }
    }

    pub fn bonus(company_id: i64, amount: i64, description: &'a str) -> Self {
        Self {
            company_id,
            kind: TransactionKind::Bonus,
            amount,
            reference_id: None,
            description,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TransactionRow {
    id: i64,
    company_id: i64,
    #[sqlx(rename = "type")]
    kind: String,
    amount: i64,
    balance_after: i64,
    reference_id: Option<String>,
    description: String,
    created_at: DateTime<Utc>,
}

impl TransactionRow {
    fn into_domain(self) -> Result<PointTransaction, LedgerError> {
        let kind = self.kind.parse::<TransactionKind>().map_err(corrupt)?;
        Ok(PointTransaction {
            id: self.id,
            company_id: self.company_id,
            kind,
            amount: self.amount,
            balance_after: self.balance_after,
            reference_id: self.reference_id,
            description: self.description,
            created_at: self.created_at,
        })
    }
}

/// Errors raised by ledger mutations.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("company not found")]
    CompanyNotFound,
    #[error("insufficient balance: {balance} available, {required} required")]
    InsufficientBalance { balance: i64, required: i64 },
    #[error("reference {0} was already credited")]
    DuplicateReference(String),
    #[error("{0:?} entries cannot be credited")]
    InvalidKind(TransactionKind),
    #[error(transparent)]
    InvalidAmount(#[from] AmountError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{seed_company, setup_db};
    use crate::Database;
    use jobboard_core::ledger::replay;

    async fn debit(db: &Database, company_id: i64, amount: i64) -> Result<PointTransaction, LedgerError> {
        let mut tx = db.begin().await.expect("begin");
        let result = db
            .ledger()
            .debit(&mut tx, &LedgerEntry::debit(company_id, amount, "job post"), Utc::now())
            .await;
        if result.is_ok() {
            tx.commit().await.expect("commit");
        }
        result
    }

    async fn credit(
        db: &Database,
        company_id: i64,
        amount: i64,
        reference: &str,
    ) -> Result<PointTransaction, LedgerError> {
        let mut tx = db.begin().await.expect("begin");
        let result = db
            .ledger()
            .credit(
                &mut tx,
                &LedgerEntry::purchase(company_id, amount, reference, "package"),
                Utc::now(),
            )
            .await;
        if result.is_ok() {
            tx.commit().await.expect("commit");
        }
        result
    }

    #[tokio::test]
    async fn debit_to_zero_then_rejects() {
        let db = setup_db().await;
        let company_id = seed_company(&db, 5).await;

        let entry = debit(&db, company_id, 5).await.expect("debit succeeds");
        assert_eq!(entry.balance_after, 0);
        assert_eq!(entry.amount, -5);

        let err = debit(&db, company_id, 1).await.unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InsufficientBalance {
                balance: 0,
                required: 1
            }
        ));
        assert_eq!(db.ledger().balance(company_id).await.expect("balance"), 0);
    }

    #[tokio::test]
    async fn duplicate_reference_is_rejected_and_rolled_back() {
        let db = setup_db().await;
        let company_id = seed_company(&db, 0).await;

        credit(&db, company_id, 12, "PTS-1").await.expect("first credit");
        let err = credit(&db, company_id, 12, "PTS-1").await.unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateReference(ref id) if id == "PTS-1"));

        assert_eq!(db.ledger().balance(company_id).await.expect("balance"), 12);
        let history = db.ledger().full_history(company_id).await.expect("history");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].kind, TransactionKind::Purchase);
        assert_eq!(history[0].reference_id.as_deref(), Some("PTS-1"));
    }

    #[tokio::test]
    async fn mixed_sequence_keeps_ledger_consistent() {
        let db = setup_db().await;
        let company_id = seed_company(&db, 0).await;

        let script: &[(bool, i64)] = &[
            (true, 5),
            (false, 2),
            (false, 4),
            (true, 3),
            (false, 6),
            (false, 1),
            (true, 1),
            (false, 2),
        ];
        for (index, (is_credit, amount)) in script.iter().enumerate() {
            if *is_credit {
                credit(&db, company_id, *amount, &format!("ref-{index}"))
                    .await
                    .expect("credit");
            } else {
                let _ = debit(&db, company_id, *amount).await;
            }
        }

        let history = db.ledger().full_history(company_id).await.expect("history");
        let replayed = replay(&history).expect("ledger is consistent");
        let sum: i64 = history.iter().map(|entry| entry.amount).sum();
        assert_eq!(replayed, sum);
        assert_eq!(db.ledger().balance(company_id).await.expect("balance"), sum);
    }

    #[tokio::test]
    async fn rejects_non_positive_amounts_and_unknown_company() {
        let db = setup_db().await;
        let company_id = seed_company(&db, 3).await;

        assert!(matches!(
            debit(&db, company_id, 0).await,
            Err(LedgerError::InvalidAmount(_))
        ));
        assert!(matches!(
            debit(&db, 999, 1).await,
            Err(LedgerError::CompanyNotFound)
        ));
        assert!(matches!(
            credit(&db, 999, 1, "PTS-x").await,
            Err(LedgerError::CompanyNotFound)
        ));
    }

    #[tokio::test]
    async fn history_pages_newest_first() {
        let db = setup_db().await;
        let company_id = seed_company(&db, 10).await;
        for _ in 0..3 {
            debit(&db, company_id, 1).await.expect("debit");
        }

        let page = db.ledger().history(company_id, 2, None).await.expect("page");
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].balance_after, 7);
        let older = db
            .ledger()
            .history(company_id, 10, Some(page[1].id))
            .await
            .expect("older");
        assert_eq!(older.len(), 2);
        assert_eq!(older.last().map(|entry| entry.kind), Some(TransactionKind::Bonus));
    }

    #[tokio::test]
    async fn concurrent_credits_with_same_reference_apply_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let url = format!("sqlite://{}", dir.path().join("ledger.db").display());
        let db = Database::connect(&url).await.expect("connect");
        db.run_migrations().await.expect("migrations");
        let company_id = seed_company(&db, 0).await;

        let mut handles = Vec::new();
        for _ in 0..4 {
            let db = db.clone();
            handles.push(tokio::spawn(async move {
                credit(&db, company_id, 5, "PTS-race").await
            }));
        }

        let mut applied = 0;
        let mut duplicates = 0;
        for handle in handles {
            match handle.await.expect("task") {
                Ok(_) => applied += 1,
                Err(LedgerError::DuplicateReference(_)) => duplicates += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(applied, 1);
        assert_eq!(duplicates, 3);
        assert_eq!(db.ledger().balance(company_id).await.expect("balance"), 5);
    }
}
