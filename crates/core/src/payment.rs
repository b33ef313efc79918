use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::company::UnknownVariant;

/// Outcome of a provider notification after mapping the provider's vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Success,
    Pending,
    Failure,
}

impl PaymentStatus {
    /// Maps Midtrans `transaction_status` and `fraud_status` values.
    ///
    /// A `capture` flagged as `challenge` waits for manual review, so it is
    /// treated as pending. Unknown statuses never credit.
    pub fn from_provider(transaction_status: &str, fraud_status: Option<&str>) -> Self {
        match transaction_status {
            "capture" => match fraud_status {
                None | Some("accept") => Self::Success,
                Some("challenge") => Self::Pending,
                Some(_) => Self::Failure,
            },
            "settlement" => Self::Success,
            "pending" => Self::Pending,
            "deny" | "cancel" | "expire" | "failure" | "refund" | "partial_refund" => {
                Self::Failure
            }
            _ => Self::Pending,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Pending => "pending",
            Self::Failure => "failure",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Paid,
    Failed,
}

impl OrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for OrderStatus {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(Self::Pending),
            "paid" => Ok(Self::Paid),
            "failed" => Ok(Self::Failed),
            other => Err(UnknownVariant::new("order status", other)),
        }
    }
}

/// Point purchase awaiting or holding payment confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentOrder {
    pub order_id: String,
    pub company_id: i64,
    pub package_id: String,
    pub points: i64,
    pub gross_amount: i64,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentOrder {
    /// Compares against the provider's decimal string, e.g. `"250000.00"`.
    pub fn amount_matches(&self, gross_amount: &str) -> bool {
        let whole = match gross_amount.split_once('.') {
            Some((whole, fraction)) if fraction.chars().all(|c| c == '0') => whole,
            Some(_) => return false,
            None => gross_amount,
        };
        whole.parse::<i64>().map(|value| value == self.gross_amount).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_provider_statuses() {
        assert_eq!(PaymentStatus::from_provider("settlement", None), PaymentStatus::Success);
        assert_eq!(
            PaymentStatus::from_provider("capture", Some("accept")),
            PaymentStatus::Success
        );
        assert_eq!(
            PaymentStatus::from_provider("capture", Some("challenge")),
            PaymentStatus::Pending
        );
        assert_eq!(PaymentStatus::from_provider("pending", None), PaymentStatus::Pending);
        assert_eq!(PaymentStatus::from_provider("expire", None), PaymentStatus::Failure);
        assert_eq!(PaymentStatus::from_provider("deny", None), PaymentStatus::Failure);
    }

    #[test]
    fn gross_amount_comparison_ignores_zero_fraction() {
        let order = PaymentOrder {
            order_id: "PTS-1".to_string(),
            company_id: 1,
            package_id: "basic".to_string(),
            points: 5,
            gross_amount: 250_000,
            status: OrderStatus::Pending,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(order.amount_matches("250000.00"));
        assert!(order.amount_matches("250000"));
        assert!(!order.amount_matches("250000.50"));
        assert!(!order.amount_matches("25000.00"));
        assert!(!order.amount_matches("abc"));
    }
}
