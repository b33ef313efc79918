use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use metrics::counter;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use jobboard_core::invitation::{Decision, InvitationStats, JobInvitation};
use jobboard_core::notification::NewNotification;
use jobboard_storage::NewInvitation;

use crate::auth::{require_company_admin, CurrentActor};
use crate::cache::invitation_stats_key;
use crate::error::ServiceError;
use crate::extract::JsonBody;
use crate::messages::{Locale, Message};
use crate::problem::ProblemResponse;
use crate::router::AppState;

pub const ACCEPTED_TEMPLATE: &str = "invitation_accepted";

/// Company admin invites a candidate, optionally for one of its listings.
pub async fn create(
    state: &AppState,
    company_id: i64,
    candidate_id: i64,
    job_listing_id: Option<i64>,
    message: &str,
) -> Result<JobInvitation, ServiceError> {
    let storage = state.storage();
    let company = storage.companies().fetch(company_id).await?;
    storage.users().fetch(candidate_id).await?;
    if let Some(listing_id) = job_listing_id {
        let listing = storage.jobs().fetch(listing_id).await?;
        if listing.company_id != company_id {
            return Err(ServiceError::Validation("job_listing_id"));
        }
    }

    let now = state.now();
    let mut tx = storage.begin().await?;
    let invitation = storage
        .invitations()
        .insert(
            &mut tx,
            &NewInvitation {
                company_id,
                job_listing_id,
                candidate_id,
                message,
                created_at: now,
            },
        )
        .await?;
    storage
        .notifications()
        .create_in(
            &mut tx,
            &NewNotification::invitation_received(&invitation, &company.name),
            now,
        )
        .await?;
    tx.commit().await?;
    state.cache().forget(&invitation_stats_key(company_id));

    info!(
        stage = "invitation",
        invitation_id = invitation.id,
        company_id,
        candidate_id,
        "invitation created"
    );
    Ok(invitation)
}

/// Records the candidate's answer. Only the first answer sticks.
///
/// The status change and the company notification share one transaction.
/// Cached stats are dropped after commit. The acceptance email goes out after
/// commit too and its failure never undoes the answer.
pub async fn respond(
    state: &AppState,
    invitation_id: i64,
    actor_id: i64,
    decision: Decision,
) -> Result<JobInvitation, ServiceError> {
    let storage = state.storage();
    let now = state.now();

    let mut tx = storage.begin().await?;
    let invitation = storage
        .invitations()
        .respond(&mut tx, invitation_id, actor_id, decision, now)
        .await?;
    let candidate = storage.users().fetch_in(&mut tx, actor_id).await?;
    storage
        .notifications()
        .create_in(
            &mut tx,
            &NewNotification::invitation_response(&invitation, decision, &candidate.name),
            now,
        )
        .await?;
    tx.commit().await?;
    state.cache().forget(&invitation_stats_key(invitation.company_id));

    counter!("invitation_responses_total", "decision" => decision.as_str()).increment(1);
    info!(
        stage = "invitation",
        invitation_id,
        company_id = invitation.company_id,
        decision = decision.as_str(),
        "invitation answered"
    );

    if decision == Decision::Accepted {
        send_acceptance_email(state, &invitation, &candidate.name).await;
    }
    Ok(invitation)
}

async fn send_acceptance_email(state: &AppState, invitation: &JobInvitation, candidate_name: &str) {
    let company = match state.storage().companies().fetch(invitation.company_id).await {
        Ok(company) => company,
        Err(err) => {
            warn!(stage = "delivery", channel = "email", error = %err, "company lookup failed");
            counter!("notification_delivery_failures_total", "channel" => "email").increment(1);
            return;
        }
    };
    let variables = json!({
        "company_name": company.name,
        "candidate_name": candidate_name,
        "invitation_id": invitation.id,
        "job_listing_id": invitation.job_listing_id,
    });
    if let Err(err) = state
        .mailer()
        .send(ACCEPTED_TEMPLATE, &company.email, &variables)
        .await
    {
        warn!(
            stage = "delivery",
            channel = "email",
            invitation_id = invitation.id,
            error = %err,
            "acceptance email not delivered"
        );
        counter!("notification_delivery_failures_total", "channel" => "email").increment(1);
    }
}

/// Cached per-company counts.
pub async fn stats(state: &AppState, company_id: i64) -> Result<InvitationStats, ServiceError> {
    let key = invitation_stats_key(company_id);
    if let Some(cached) = state.cache().get(&key) {
        if let Ok(stats) = serde_json::from_value::<InvitationStats>(cached) {
            return Ok(stats);
        }
    }

    let stats = state.storage().invitations().stats(company_id).await?;
    if let Ok(value) = serde_json::to_value(stats) {
        state.cache().set(&key, value, state.invitation_stats_ttl());
    }
    Ok(stats)
}

#[derive(Debug, Deserialize)]
pub struct CreateInvitationRequest {
    candidate_id: i64,
    #[serde(default)]
    job_listing_id: Option<i64>,
    #[serde(default)]
    message: String,
}

pub async fn create_handler(
    State(state): State<AppState>,
    locale: Locale,
    CurrentActor(actor): CurrentActor,
    JsonBody(request): JsonBody<CreateInvitationRequest>,
) -> Result<(StatusCode, Json<JobInvitation>), ProblemResponse> {
    let company_id = require_company_admin(&actor).map_err(|err| err.into_problem(locale))?;
    create(
        &state,
        company_id,
        request.candidate_id,
        request.job_listing_id,
        &request.message,
    )
    .await
    .map(|invitation| (StatusCode::CREATED, Json(invitation)))
    .map_err(|err| err.into_problem(locale))
}

pub async fn stats_handler(
    State(state): State<AppState>,
    locale: Locale,
    CurrentActor(actor): CurrentActor,
) -> Result<Json<InvitationStats>, ProblemResponse> {
    let company_id = require_company_admin(&actor).map_err(|err| err.into_problem(locale))?;
    stats(&state, company_id)
        .await
        .map(Json)
        .map_err(|err| err.into_problem(locale))
}

pub async fn list_handler(
    State(state): State<AppState>,
    locale: Locale,
    CurrentActor(actor): CurrentActor,
) -> Result<Json<Value>, ProblemResponse> {
    let invitations = state
        .storage()
        .invitations()
        .list_for_candidate(actor.user_id)
        .await
        .map_err(|err| ServiceError::from(err).into_problem(locale))?;
    Ok(Json(json!({ "invitations": invitations })))
}

#[derive(Debug, Deserialize)]
pub struct RespondRequest {
    status: Decision,
}

pub async fn respond_handler(
    State(state): State<AppState>,
    locale: Locale,
    CurrentActor(actor): CurrentActor,
    Path(invitation_id): Path<i64>,
    JsonBody(request): JsonBody<RespondRequest>,
) -> Result<Json<Value>, ProblemResponse> {
    let invitation = respond(&state, invitation_id, actor.user_id, request.status)
        .await
        .map_err(|err| err.into_problem(locale))?;
    Ok(Json(json!({
        "message": Message::InvitationAnswered(invitation.status).render(locale),
        "invitation": invitation,
    })))
}
