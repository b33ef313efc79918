use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use metrics::counter;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use jobboard_core::jobs::{ApplicationStatus, JobApplication, JobListing};
use jobboard_core::notification::{NewNotification, Role};
use jobboard_storage::{LedgerEntry, NewJobListing};

use crate::auth::{require_company_admin, require_role, CurrentActor};
use crate::error::ServiceError;
use crate::extract::JsonBody;
use crate::messages::Locale;
use crate::problem::ProblemResponse;
use crate::router::AppState;

pub struct JobDraft<'a> {
    pub title: &'a str,
    pub description: &'a str,
    pub location: &'a str,
}

/// Opens a listing, paying the posting cost from the company's points.
///
/// Debit, active-count increment and insert commit together or not at all.
pub async fn post_job(
    state: &AppState,
    company_id: i64,
    draft: &JobDraft<'_>,
) -> Result<JobListing, ServiceError> {
    if draft.title.trim().is_empty() {
        return Err(ServiceError::Validation("title"));
    }
    let storage = state.storage();
    let company = storage.companies().fetch(company_id).await?;
    if !company.is_verified() {
        return Err(ServiceError::CompanyNotVerified);
    }

    let now = state.now();
    let cost = state.job_post_cost();
    let reason = format!("Job post: {}", draft.title.trim());

    let mut tx = storage.begin().await?;
    let debit = storage
        .ledger()
        .debit(&mut tx, &LedgerEntry::debit(company_id, cost, &reason), now)
        .await?;
    storage.companies().reserve_job_slot(&mut tx, company_id, now).await?;
    let listing = storage
        .jobs()
        .insert(
            &mut tx,
            &NewJobListing {
                company_id,
                title: draft.title.trim(),
                description: draft.description,
                location: draft.location,
                created_at: now,
            },
        )
        .await?;
    tx.commit().await?;

    counter!("ledger_debits_total").increment(1);
    info!(
        stage = "ledger",
        company_id,
        listing_id = listing.id,
        cost,
        balance_after = debit.balance_after,
        "job posted"
    );
    Ok(listing)
}

/// Closes a listing and frees its active slot. Closing twice changes nothing.
pub async fn close_job(
    state: &AppState,
    company_id: i64,
    listing_id: i64,
) -> Result<JobListing, ServiceError> {
    let storage = state.storage();
    let now = state.now();

    let mut tx = storage.begin().await?;
    if storage.jobs().close(&mut tx, listing_id, company_id, now).await? {
        storage.companies().release_job_slot(&mut tx, company_id, now).await?;
    }
    let listing = storage.jobs().fetch_in(&mut tx, listing_id).await?;
    tx.commit().await?;
    Ok(listing)
}

pub async fn apply(
    state: &AppState,
    candidate_id: i64,
    listing_id: i64,
    cover_letter: &str,
) -> Result<JobApplication, ServiceError> {
    let storage = state.storage();
    let now = state.now();

    let mut tx = storage.begin().await?;
    let application = storage
        .applications()
        .insert(&mut tx, listing_id, candidate_id, cover_letter, now)
        .await?;
    let listing = storage.jobs().fetch_in(&mut tx, listing_id).await?;
    storage
        .notifications()
        .create_in(
            &mut tx,
            &NewNotification::application_received(
                listing.company_id,
                application.id,
                listing.id,
                &listing.title,
            ),
            now,
        )
        .await?;
    tx.commit().await?;
    Ok(application)
}

pub async fn applications_for(
    state: &AppState,
    company_id: i64,
    listing_id: i64,
) -> Result<Vec<JobApplication>, ServiceError> {
    let listing = state.storage().jobs().fetch(listing_id).await?;
    if listing.company_id != company_id {
        return Err(ServiceError::Forbidden);
    }
    Ok(state
        .storage()
        .applications()
        .list_for_listing(listing_id)
        .await?)
}

/// Moves an application forward and tells the candidate.
pub async fn review_application(
    state: &AppState,
    company_id: i64,
    application_id: i64,
    next: ApplicationStatus,
) -> Result<JobApplication, ServiceError> {
    let storage = state.storage();
    let current = storage.applications().fetch(application_id).await?;
    let listing = storage.jobs().fetch(current.job_listing_id).await?;
    if listing.company_id != company_id {
        return Err(ServiceError::Forbidden);
    }

    let now = state.now();
    let mut tx = storage.begin().await?;
    let updated = storage
        .applications()
        .update_status(&mut tx, application_id, next, now)
        .await?;
    storage
        .notifications()
        .create_in(
            &mut tx,
            &NewNotification::application_status_changed(
                updated.id,
                updated.candidate_id,
                &listing.title,
                updated.status,
            ),
            now,
        )
        .await?;
    tx.commit().await?;
    Ok(updated)
}

#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    location: String,
}

pub async fn create_handler(
    State(state): State<AppState>,
    locale: Locale,
    CurrentActor(actor): CurrentActor,
    JsonBody(request): JsonBody<CreateJobRequest>,
) -> Result<(StatusCode, Json<JobListing>), ProblemResponse> {
    let company_id = require_company_admin(&actor).map_err(|err| err.into_problem(locale))?;
    let draft = JobDraft {
        title: &request.title,
        description: &request.description,
        location: &request.location,
    };
    post_job(&state, company_id, &draft)
        .await
        .map(|listing| (StatusCode::CREATED, Json(listing)))
        .map_err(|err| err.into_problem(locale))
}

pub async fn close_handler(
    State(state): State<AppState>,
    locale: Locale,
    CurrentActor(actor): CurrentActor,
    Path(listing_id): Path<i64>,
) -> Result<Json<JobListing>, ProblemResponse> {
    let company_id = require_company_admin(&actor).map_err(|err| err.into_problem(locale))?;
    close_job(&state, company_id, listing_id)
        .await
        .map(Json)
        .map_err(|err| err.into_problem(locale))
}

pub async fn applications_handler(
    State(state): State<AppState>,
    locale: Locale,
    CurrentActor(actor): CurrentActor,
    Path(listing_id): Path<i64>,
) -> Result<Json<Value>, ProblemResponse> {
    let company_id = require_company_admin(&actor).map_err(|err| err.into_problem(locale))?;
    let applications = applications_for(&state, company_id, listing_id)
        .await
        .map_err(|err| err.into_problem(locale))?;
    Ok(Json(json!({ "applications": applications })))
}

#[derive(Debug, Deserialize)]
pub struct ReviewRequest {
    status: ApplicationStatus,
}

pub async fn review_handler(
    State(state): State<AppState>,
    locale: Locale,
    CurrentActor(actor): CurrentActor,
    Path(application_id): Path<i64>,
    JsonBody(request): JsonBody<ReviewRequest>,
) -> Result<Json<JobApplication>, ProblemResponse> {
    let company_id = require_company_admin(&actor).map_err(|err| err.into_problem(locale))?;
    review_application(&state, company_id, application_id, request.status)
        .await
        .map(Json)
        .map_err(|err| err.into_problem(locale))
}

#[derive(Debug, Deserialize)]
pub struct ApplyRequest {
    job_listing_id: i64,
    #[serde(default)]
    cover_letter: String,
}

pub async fn apply_handler(
    State(state): State<AppState>,
    locale: Locale,
    CurrentActor(actor): CurrentActor,
    JsonBody(request): JsonBody<ApplyRequest>,
) -> Result<(StatusCode, Json<JobApplication>), ProblemResponse> {
    require_role(&actor, Role::Candidate).map_err(|err| err.into_problem(locale))?;
    apply(
        &state,
        actor.user_id,
        request.job_listing_id,
        &request.cover_letter,
    )
    .await
    .map(|application| (StatusCode::CREATED, Json(application)))
    .map_err(|err| err.into_problem(locale))
}
