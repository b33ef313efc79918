use axum::{
    extract::{Path, State},
    Json,
};
use metrics::counter;
use serde::Deserialize;
use tracing::info;

use jobboard_core::company::{Company, VerificationStatus};
use jobboard_core::ledger::PointTransaction;
use jobboard_core::notification::{NewNotification, Role};
use jobboard_storage::LedgerEntry;

use crate::auth::{require_role, CurrentActor};
use crate::error::ServiceError;
use crate::extract::JsonBody;
use crate::messages::Locale;
use crate::problem::ProblemResponse;
use crate::router::AppState;

/// Sets the company's review state and tells its members.
pub async fn set_verification(
    state: &AppState,
    company_id: i64,
    status: VerificationStatus,
    note: Option<&str>,
) -> Result<Company, ServiceError> {
    let storage = state.storage();
    let now = state.now();
    let note = note.map(str::trim).filter(|note| !note.is_empty());

    let mut tx = storage.begin().await?;
    let company = storage
        .companies()
        .set_verification(&mut tx, company_id, status, note, now)
        .await?;
    storage
        .notifications()
        .create_in(
            &mut tx,
            &NewNotification::verification_changed(company_id, status.as_str(), note),
            now,
        )
        .await?;
    tx.commit().await?;

    info!(stage = "app", company_id, status = status.as_str(), "company verification updated");
    Ok(company)
}

pub async fn grant_bonus(
    state: &AppState,
    company_id: i64,
    amount: i64,
    description: &str,
) -> Result<PointTransaction, ServiceError> {
    let storage = state.storage();
    let mut tx = storage.begin().await?;
    let transaction = storage
        .ledger()
        .credit(
            &mut tx,
            &LedgerEntry::bonus(company_id, amount, description),
            state.now(),
        )
        .await?;
    tx.commit().await?;

    counter!("ledger_credits_total", "kind" => "bonus").increment(1);
    info!(
        stage = "ledger",
        company_id,
        amount,
        balance_after = transaction.balance_after,
        "bonus points credited"
    );
    Ok(transaction)
}

#[derive(Debug, Deserialize)]
pub struct VerificationRequest {
    status: VerificationStatus,
    #[serde(default)]
    note: Option<String>,
}

pub async fn verification_handler(
    State(state): State<AppState>,
    locale: Locale,
    CurrentActor(actor): CurrentActor,
    Path(company_id): Path<i64>,
    JsonBody(request): JsonBody<VerificationRequest>,
) -> Result<Json<Company>, ProblemResponse> {
    require_role(&actor, Role::Admin).map_err(|err| err.into_problem(locale))?;
    set_verification(&state, company_id, request.status, request.note.as_deref())
        .await
        .map(Json)
        .map_err(|err| err.into_problem(locale))
}

#[derive(Debug, Deserialize)]
pub struct BonusRequest {
    amount: i64,
    #[serde(default)]
    description: Option<String>,
}

pub async fn bonus_handler(
    State(state): State<AppState>,
    locale: Locale,
    CurrentActor(actor): CurrentActor,
    Path(company_id): Path<i64>,
    JsonBody(request): JsonBody<BonusRequest>,
) -> Result<Json<PointTransaction>, ProblemResponse> {
    require_role(&actor, Role::Admin).map_err(|err| err.into_problem(locale))?;
    let description = request.description.as_deref().unwrap_or("Bonus points");
    grant_bonus(&state, company_id, request.amount, description)
        .await
        .map(Json)
        .map_err(|err| err.into_problem(locale))
}
