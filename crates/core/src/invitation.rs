use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::company::UnknownVariant;

/// Lifecycle of a job invitation. `Pending` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvitationStatus {
    Pending,
    Accepted,
    Declined,
}

impl InvitationStatus {
    /// Returns the canonical database representation for the status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Declined => "declined",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for InvitationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InvitationStatus {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(Self::Pending),
            "accepted" => Ok(Self::Accepted),
            "declined" => Ok(Self::Declined),
            other => Err(UnknownVariant::new("invitation status", other)),
        }
    }
}

/// Candidate's answer to an invitation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Accepted,
    Declined,
}

impl Decision {
    pub fn status(self) -> InvitationStatus {
        match self {
            Self::Accepted => InvitationStatus::Accepted,
            Self::Declined => InvitationStatus::Declined,
        }
    }

    pub fn as_str(self) -> &'static str {
        self.status().as_str()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobInvitation {
    pub id: i64,
    pub company_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_listing_id: Option<i64>,
    pub candidate_id: i64,
    pub status: InvitationStatus,
    pub responded_at: Option<DateTime<Utc>>,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl JobInvitation {
    /// Checks whether `actor_id` may move this invitation to `decision`.
    ///
    /// Ownership is checked before state so a stranger always sees `Forbidden`,
    /// even for invitations that were already answered.
    pub fn check_response(
        &self,
        actor_id: i64,
        decision: Decision,
    ) -> Result<InvitationStatus, ResponseRejection> {
        if actor_id != self.candidate_id {
            return Err(ResponseRejection::Forbidden);
        }
        if self.status.is_terminal() {
            return Err(ResponseRejection::AlreadyResponded(self.status));
        }
        Ok(decision.status())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ResponseRejection {
    #[error("invitation belongs to another candidate")]
    Forbidden,
    #[error("invitation was already {0}")]
    AlreadyResponded(InvitationStatus),
}

/// Per-company invitation counts served on the company dashboard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvitationStats {
    pub total: i64,
    pub pending: i64,
    pub accepted: i64,
    pub declined: i64,
}

impl InvitationStats {
    pub fn record(&mut self, status: InvitationStatus, count: i64) {
        self.total += count;
        match status {
            InvitationStatus::Pending => self.pending += count,
            InvitationStatus::Accepted => self.accepted += count,
            InvitationStatus::Declined => self.declined += count,
        }
    }
}
