use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::company::UnknownVariant;

/// Kind of a point ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Purchase,
    Debit,
    Bonus,
}

impl TransactionKind {
    /// Returns the canonical database representation for the kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Purchase => "purchase",
            Self::Debit => "debit",
            Self::Bonus => "bonus",
        }
    }

    /// Debits remove points, every other kind adds them.
    pub fn signed(self, amount: i64) -> i64 {
        match self {
            Self::Debit => -amount,
            Self::Purchase | Self::Bonus => amount,
        }
    }
}

impl FromStr for TransactionKind {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "purchase" => Ok(Self::Purchase),
            "debit" => Ok(Self::Debit),
            "bonus" => Ok(Self::Bonus),
            other => Err(UnknownVariant::new("transaction type", other)),
        }
    }
}

/// Immutable ledger entry. `amount` is signed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointTransaction {
    pub id: i64,
    pub company_id: i64,
    pub kind: TransactionKind,
    pub amount: i64,
    pub balance_after: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_id: Option<String>,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// Largest number of points a single ledger entry may move.
pub const MAX_AMOUNT: i64 = 1_000_000;

/// Rejects zero, negative and oversized movements before they reach storage.
///
/// The cap keeps `balance + amount` far from `i64::MAX`; SQLite silently
/// promotes an overflowing integer sum to a float.
pub fn validate_amount(amount: i64) -> Result<(), AmountError> {
    if amount <= 0 {
        return Err(AmountError::NotPositive(amount));
    }
    if amount > MAX_AMOUNT {
        return Err(AmountError::TooLarge(amount));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AmountError {
    #[error("amount must be greater than zero (got {0})")]
    NotPositive(i64),
    #[error("amount must be at most {} (got {})", MAX_AMOUNT, .0)]
    TooLarge(i64),
}

/// Walks a company's history oldest first and returns the resulting balance.
///
/// Every entry must carry the balance obtained by applying its signed amount
/// to the previous one, and no intermediate balance may drop below zero.
pub fn replay(entries: &[PointTransaction]) -> Result<i64, LedgerInconsistency> {
    let mut balance = 0i64;
    for entry in entries {
        balance += entry.amount;
        if balance < 0 {
            return Err(LedgerInconsistency::NegativeBalance {
                transaction_id: entry.id,
            });
        }
        if balance != entry.balance_after {
            return Err(LedgerInconsistency::BalanceMismatch {
                transaction_id: entry.id,
                expected: balance,
                recorded: entry.balance_after,
            });
        }
    }
    Ok(balance)
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerInconsistency {
    #[error("transaction {transaction_id} drives the balance below zero")]
    NegativeBalance { transaction_id: i64 },
    #[error("transaction {transaction_id} records balance {recorded}, expected {expected}")]
    BalanceMismatch {
        transaction_id: i64,
        expected: i64,
        recorded: i64,
    },
}

/// Purchasable bundle of points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PointPackage {
    pub id: &'static str,
    pub name: &'static str,
    pub points: i64,
    /// Price in rupiah.
    pub price: i64,
}

pub const POINT_PACKAGES: &[PointPackage] = &[
    PointPackage {
        id: "basic",
        name: "Basic",
        points: 5,
        price: 250_000,
    },
    PointPackage {
        id: "standard",
        name: "Standard",
        points: 12,
        price: 500_000,
    },
    PointPackage {
        id: "premium",
        name: "Premium",
        points: 30,
        price: 1_000_000,
    },
];

pub fn find_package(id: &str) -> Option<&'static PointPackage> {
    POINT_PACKAGES.iter().find(|package| package.id == id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: i64, kind: TransactionKind, amount: i64, balance_after: i64) -> PointTransaction {
        PointTransaction {
            id,
            company_id: 1,
            kind,
            amount: kind.signed(amount),
            balance_after,
            reference_id: None,
            description: String::new(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn replay_sums_signed_amounts() {
        let entries = vec![
            entry(1, TransactionKind::Purchase, 5, 5),
            entry(2, TransactionKind::Debit, 3, 2),
            entry(3, TransactionKind::Bonus, 4, 6),
        ];
        assert_eq!(replay(&entries), Ok(6));
    }

    #[test]
    fn replay_flags_negative_balance() {
        let entries = vec![
            entry(1, TransactionKind::Purchase, 1, 1),
            entry(2, TransactionKind::Debit, 2, -1),
        ];
        assert_eq!(
            replay(&entries),
            Err(LedgerInconsistency::NegativeBalance { transaction_id: 2 })
        );
    }

    #[test]
    fn replay_flags_balance_mismatch() {
        let entries = vec![entry(1, TransactionKind::Purchase, 5, 4)];
        assert!(matches!(
            replay(&entries),
            Err(LedgerInconsistency::BalanceMismatch { expected: 5, .. })
        ));
    }

    #[test]
    fn rejects_non_positive_amounts() {
        assert!(validate_amount(1).is_ok());
        assert_eq!(validate_amount(0), Err(AmountError::NotPositive(0)));
        assert_eq!(validate_amount(-3), Err(AmountError::NotPositive(-3)));
    }

    #[test]
    fn rejects_amounts_above_the_cap() {
        assert!(validate_amount(MAX_AMOUNT).is_ok());
        assert_eq!(
            validate_amount(MAX_AMOUNT + 1),
            Err(AmountError::TooLarge(MAX_AMOUNT + 1))
        );
        assert_eq!(validate_amount(i64::MAX), Err(AmountError::TooLarge(i64::MAX)));
    }

    #[test]
    fn finds_packages_by_id() {
        let package = find_package("standard").expect("package exists");
        assert_eq!(package.points, 12);
        assert!(find_package("gold").is_none());
    }
}
