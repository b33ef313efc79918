use axum::http::StatusCode;
use thiserror::Error;
use tracing::error;

use jobboard_core::invitation::InvitationStatus;
use jobboard_gateway::GatewayError;
use jobboard_storage::{
    ApplicationError, CompanyError, InvitationError, JobError, LedgerError, NotificationError,
    PaymentError, UserError,
};

use crate::messages::{Entity, Locale, Message};
use crate::problem::ProblemResponse;

/// Failures surfaced by the request-handling services.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid {0}")]
    Validation(&'static str),
    #[error("forbidden")]
    Forbidden,
    #[error("{0:?} not found")]
    NotFound(Entity),
    #[error("invitation already {0}")]
    AlreadyResponded(InvitationStatus),
    #[error("duplicate application")]
    DuplicateApplication,
    #[error("insufficient balance: {balance} available, {required} required")]
    InsufficientBalance { balance: i64, required: i64 },
    #[error("company is not verified")]
    CompanyNotVerified,
    #[error("active job limit of {max_active_jobs} reached")]
    JobLimitReached { max_active_jobs: i64 },
    #[error("job listing is closed")]
    ListingClosed,
    #[error("invalid application status transition")]
    InvalidTransition,
    #[error("gross amount does not match the order")]
    AmountMismatch,
    #[error("invalid signature")]
    InvalidSignature,
    #[error("payment gateway error: {0}")]
    Gateway(#[from] GatewayError),
    #[error("storage error: {0}")]
    Storage(String),
}

impl ServiceError {
    pub fn into_problem(self, locale: Locale) -> ProblemResponse {
        let (status, problem_type, message) = match &self {
            Self::Validation(field) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "validation_error",
                Message::Validation(*field),
            ),
            Self::Forbidden => (StatusCode::FORBIDDEN, "forbidden", Message::Forbidden),
            Self::NotFound(entity) => (StatusCode::NOT_FOUND, "not_found", Message::NotFound(*entity)),
            Self::AlreadyResponded(status) => (
                StatusCode::CONFLICT,
                "already_responded",
                Message::AlreadyResponded(*status),
            ),
            Self::DuplicateApplication => (
                StatusCode::CONFLICT,
                "duplicate_application",
                Message::DuplicateApplication,
            ),
            Self::InsufficientBalance { balance, required } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "insufficient_balance",
                Message::InsufficientBalance {
                    balance: *balance,
                    required: *required,
                },
            ),
            Self::CompanyNotVerified => (
                StatusCode::FORBIDDEN,
                "company_not_verified",
                Message::CompanyNotVerified,
            ),
            Self::JobLimitReached { max_active_jobs } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "job_limit_reached",
                Message::JobLimitReached {
                    max_active_jobs: *max_active_jobs,
                },
            ),
            Self::ListingClosed => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "listing_closed",
                Message::ListingClosed,
            ),
            Self::InvalidTransition => (
                StatusCode::CONFLICT,
                "invalid_transition",
                Message::InvalidTransition,
            ),
            Self::AmountMismatch => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "amount_mismatch",
                Message::AmountMismatch,
            ),
            Self::InvalidSignature => (
                StatusCode::FORBIDDEN,
                "invalid_signature",
                Message::InvalidSignature,
            ),
            Self::Gateway(err) => {
                error!(stage = "app", error = %err, "payment gateway request failed");
                (
                    StatusCode::BAD_GATEWAY,
                    "payment_gateway_error",
                    Message::GatewayUnavailable,
                )
            }
            Self::Storage(err) => {
                error!(stage = "app", error = %err, "storage operation failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "storage_error", Message::Internal)
            }
        };
        ProblemResponse::localized(status, problem_type, &message, locale)
    }
}

impl From<sqlx::Error> for ServiceError {
    fn from(err: sqlx::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<LedgerError> for ServiceError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::CompanyNotFound => Self::NotFound(Entity::Company),
            LedgerError::InsufficientBalance { balance, required } => {
                Self::InsufficientBalance { balance, required }
            }
            LedgerError::InvalidAmount(_) => Self::Validation("amount"),
            other => Self::Storage(other.to_string()),
        }
    }
}

impl From<CompanyError> for ServiceError {
    fn from(err: CompanyError) -> Self {
        match err {
            CompanyError::NotFound => Self::NotFound(Entity::Company),
            CompanyError::JobLimitReached { max_active_jobs } => {
                Self::JobLimitReached { max_active_jobs }
            }
            CompanyError::Database(err) => err.into(),
        }
    }
}

impl From<UserError> for ServiceError {
    fn from(err: UserError) -> Self {
        match err {
            UserError::NotFound => Self::NotFound(Entity::User),
            UserError::DuplicateEmail => Self::Validation("email"),
            UserError::Database(err) => err.into(),
        }
    }
}

impl From<InvitationError> for ServiceError {
    fn from(err: InvitationError) -> Self {
        match err {
            InvitationError::NotFound => Self::NotFound(Entity::Invitation),
            InvitationError::Forbidden => Self::Forbidden,
            InvitationError::AlreadyResponded(status) => Self::AlreadyResponded(status),
            InvitationError::Database(err) => err.into(),
        }
    }
}

impl From<NotificationError> for ServiceError {
    fn from(err: NotificationError) -> Self {
        match err {
            NotificationError::NotFound => Self::NotFound(Entity::Notification),
            NotificationError::MissingTitle => Self::Validation("title"),
            other => Self::Storage(other.to_string()),
        }
    }
}

impl From<JobError> for ServiceError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::NotFound => Self::NotFound(Entity::JobListing),
            JobError::Forbidden => Self::Forbidden,
            JobError::Database(err) => err.into(),
        }
    }
}

impl From<ApplicationError> for ServiceError {
    fn from(err: ApplicationError) -> Self {
        match err {
            ApplicationError::NotFound => Self::NotFound(Entity::Application),
            ApplicationError::ListingNotFound => Self::NotFound(Entity::JobListing),
            ApplicationError::ListingClosed => Self::ListingClosed,
            ApplicationError::DuplicateApplication => Self::DuplicateApplication,
            ApplicationError::InvalidTransition { .. } => Self::InvalidTransition,
            ApplicationError::Database(err) => err.into(),
        }
    }
}

impl From<PaymentError> for ServiceError {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::OrderNotFound => Self::NotFound(Entity::PaymentOrder),
            other => Self::Storage(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_maps_to_status_codes() {
        let cases = [
            (ServiceError::Forbidden, StatusCode::FORBIDDEN, "forbidden"),
            (
                ServiceError::AlreadyResponded(InvitationStatus::Accepted),
                StatusCode::CONFLICT,
                "already_responded",
            ),
            (
                ServiceError::InsufficientBalance {
                    balance: 0,
                    required: 1,
                },
                StatusCode::UNPROCESSABLE_ENTITY,
                "insufficient_balance",
            ),
            (
                ServiceError::NotFound(Entity::Invitation),
                StatusCode::NOT_FOUND,
                "not_found",
            ),
            (
                ServiceError::Storage("boom".to_string()),
                StatusCode::INTERNAL_SERVER_ERROR,
                "storage_error",
            ),
        ];
        for (err, status, problem_type) in cases {
            let problem = err.into_problem(Locale::En);
            assert_eq!(problem.status(), status);
            assert_eq!(problem.problem_type(), problem_type);
        }
    }
}
