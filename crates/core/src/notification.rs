use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::company::UnknownVariant;
use crate::invitation::{Decision, JobInvitation};
use crate::jobs::ApplicationStatus;

/// Roles an authenticated actor may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    CompanyAdmin,
    Candidate,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::CompanyAdmin => "company_admin",
            Self::Candidate => "candidate",
        }
    }
}

/// Identity resolved from a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub user_id: i64,
    pub roles: Vec<Role>,
    pub company_id: Option<i64>,
}

impl Actor {
    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }
}

/// Who a notification is addressed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Audience {
    User {
        user_id: i64,
    },
    /// Holders of any listed role, optionally restricted to one company.
    Roles {
        roles: Vec<Role>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        company_id: Option<i64>,
    },
    Company {
        company_id: i64,
    },
}

impl Audience {
    pub fn company_admins(company_id: i64) -> Self {
        Self::Roles {
            roles: vec![Role::CompanyAdmin],
            company_id: Some(company_id),
        }
    }

    /// Returns `true` when `actor` is part of this audience.
    pub fn matches(&self, actor: &Actor) -> bool {
        match self {
            Self::User { user_id } => *user_id == actor.user_id,
            Self::Roles { roles, company_id } => {
                let scoped = match company_id {
                    Some(id) => actor.company_id == Some(*id),
                    None => true,
                };
                scoped && roles.iter().any(|role| actor.has_role(*role))
            }
            Self::Company { company_id } => actor.company_id == Some(*company_id),
        }
    }

    /// Storage discriminator.
    pub fn kind_str(&self) -> &'static str {
        match self {
            Self::User { .. } => "user",
            Self::Roles { .. } => "roles",
            Self::Company { .. } => "company",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
        }
    }
}

impl FromStr for Priority {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "low" => Ok(Self::Low),
            "normal" => Ok(Self::Normal),
            "high" => Ok(Self::High),
            other => Err(UnknownVariant::new("priority", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub message: String,
    pub audience: Audience,
    pub priority: Priority,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_url: Option<String>,
    pub data: Value,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn is_read(&self) -> bool {
        self.read_at.is_some()
    }
}

/// Notification waiting to be inserted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewNotification {
    pub kind: String,
    pub title: String,
    pub message: String,
    pub audience: Audience,
    pub priority: Priority,
    pub action_url: Option<String>,
    pub data: Value,
}

impl NewNotification {
    pub fn new(
        kind: impl Into<String>,
        title: impl Into<String>,
        message: impl Into<String>,
        audience: Audience,
    ) -> Self {
        Self {
            kind: kind.into(),
            title: title.into(),
            message: message.into(),
            audience,
            priority: Priority::Normal,
            action_url: None,
            data: Value::Object(Default::default()),
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_action_url(mut self, url: impl Into<String>) -> Self {
        self.action_url = Some(url.into());
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    /// Addressed to the inviting company's admins once the candidate answers.
    pub fn invitation_response(
        invitation: &JobInvitation,
        decision: Decision,
        candidate_name: &str,
    ) -> Self {
        let (title, priority) = match decision {
            Decision::Accepted => ("Invitation accepted", Priority::High),
            Decision::Declined => ("Invitation declined", Priority::Normal),
        };
        Self::new(
            "job_invitation_response",
            title,
            format!("{candidate_name} has {} your job invitation.", decision.as_str()),
            Audience::company_admins(invitation.company_id),
        )
        .with_priority(priority)
        .with_action_url(format!("/company/job-invitations/{}", invitation.id))
        .with_data(json!({
            "invitation_id": invitation.id,
            "candidate_id": invitation.candidate_id,
            "job_listing_id": invitation.job_listing_id,
            "status": decision.as_str(),
        }))
    }

    pub fn invitation_received(invitation: &JobInvitation, company_name: &str) -> Self {
        Self::new(
            "job_invitation",
            "New job invitation",
            format!("{company_name} invited you to apply."),
            Audience::User {
                user_id: invitation.candidate_id,
            },
        )
        .with_action_url("/user/job-invitations")
        .with_data(json!({
            "invitation_id": invitation.id,
            "company_id": invitation.company_id,
            "job_listing_id": invitation.job_listing_id,
        }))
    }

    pub fn application_status_changed(
        application_id: i64,
        candidate_id: i64,
        job_title: &str,
        status: ApplicationStatus,
    ) -> Self {
        Self::new(
            "application_status",
            "Application updated",
            format!("Your application for {job_title} is now {}.", status.as_str()),
            Audience::User {
                user_id: candidate_id,
            },
        )
        .with_data(json!({
            "application_id": application_id,
            "status": status.as_str(),
        }))
    }

    pub fn application_received(
        company_id: i64,
        application_id: i64,
        job_listing_id: i64,
        job_title: &str,
    ) -> Self {
        Self::new(
            "application_received",
            "New application",
            format!("A candidate applied for {job_title}."),
            Audience::company_admins(company_id),
        )
        .with_action_url(format!("/company/jobs/{job_listing_id}/applications"))
        .with_data(json!({
            "application_id": application_id,
            "job_listing_id": job_listing_id,
        }))
    }

    pub fn points_credited(company_id: i64, points: i64, order_id: &str) -> Self {
        Self::new(
            "points_credited",
            "Points added",
            format!("{points} points were added to your balance."),
            Audience::Company { company_id },
        )
        .with_data(json!({ "order_id": order_id, "points": points }))
    }

    pub fn verification_changed(company_id: i64, status: &str, reason: Option<&str>) -> Self {
        let message = match reason {
            Some(reason) => format!("Your company verification is {status}: {reason}"),
            None => format!("Your company verification is {status}."),
        };
        Self::new(
            "company_verification",
            "Verification update",
            message,
            Audience::Company { company_id },
        )
        .with_priority(Priority::High)
        .with_data(json!({ "status": status }))
    }
}
