use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};
use ulid::Ulid;

use jobboard_core::ledger::{find_package, PointTransaction, POINT_PACKAGES};
use jobboard_gateway::{SnapCustomer, SnapRequest, SnapTransaction};
use jobboard_storage::NewPaymentOrder;

use crate::auth::{require_company_admin, CurrentActor};
use crate::error::ServiceError;
use crate::extract::JsonBody;
use crate::messages::Locale;
use crate::problem::ProblemResponse;
use crate::router::AppState;

const DEFAULT_HISTORY_LIMIT: i64 = 20;
const MAX_HISTORY_LIMIT: i64 = 100;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    limit: Option<i64>,
    #[serde(default)]
    before: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct PointsSummary {
    pub company_id: i64,
    pub balance: i64,
    pub active_job_post_count: i64,
    pub transactions: Vec<PointTransaction>,
}

pub async fn summary(
    state: &AppState,
    company_id: i64,
    limit: i64,
    before: Option<i64>,
) -> Result<PointsSummary, ServiceError> {
    let company = state.storage().companies().fetch(company_id).await?;
    let transactions = state
        .storage()
        .ledger()
        .history(company_id, limit, before)
        .await?;
    Ok(PointsSummary {
        company_id,
        balance: company.point_balance,
        active_job_post_count: company.active_job_post_count,
        transactions,
    })
}

/// Creates a pending order and asks the provider for a checkout token.
pub async fn purchase(
    state: &AppState,
    company_id: i64,
    package_id: &str,
) -> Result<(String, SnapTransaction), ServiceError> {
    let package = find_package(package_id).ok_or(ServiceError::Validation("package_id"))?;
    let company = state.storage().companies().fetch(company_id).await?;
    if !company.is_verified() {
        return Err(ServiceError::CompanyNotVerified);
    }

    let order_id = format!("PTS-{}", Ulid::new());
    let payments = state.storage().payments();
    payments
        .insert_order(&NewPaymentOrder {
            order_id: &order_id,
            company_id,
            package_id: package.id,
            points: package.points,
            gross_amount: package.price,
            created_at: state.now(),
        })
        .await?;

    let request = SnapRequest {
        order_id: order_id.clone(),
        gross_amount: package.price,
        item_id: package.id.to_string(),
        item_name: format!("{} ({} points)", package.name, package.points),
        customer: SnapCustomer {
            first_name: company.name.clone(),
            email: company.email.clone(),
            phone: company.phone.clone(),
        },
    };

    let transaction = match state.payment_gateway().create_transaction(&request).await {
        Ok(transaction) => transaction,
        Err(err) => {
            warn!(stage = "ledger", %order_id, error = %err, "snap transaction creation failed");
            let mut tx = state.storage().begin().await?;
            payments.mark_failed(&mut tx, &order_id, state.now()).await?;
            tx.commit().await?;
            return Err(err.into());
        }
    };
    payments.attach_token(&order_id, &transaction.token).await?;

    info!(
        stage = "ledger",
        %order_id,
        company_id,
        package = package.id,
        "payment order created"
    );
    Ok((order_id, transaction))
}

pub async fn show(
    State(state): State<AppState>,
    locale: Locale,
    CurrentActor(actor): CurrentActor,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<PointsSummary>, ProblemResponse> {
    let company_id = require_company_admin(&actor).map_err(|err| err.into_problem(locale))?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);
    summary(&state, company_id, limit, query.before)
        .await
        .map(Json)
        .map_err(|err| err.into_problem(locale))
}

pub async fn packages(
    locale: Locale,
    CurrentActor(actor): CurrentActor,
) -> Result<Json<Value>, ProblemResponse> {
    require_company_admin(&actor).map_err(|err| err.into_problem(locale))?;
    Ok(Json(json!({ "packages": POINT_PACKAGES })))
}

#[derive(Debug, Deserialize)]
pub struct PurchaseRequest {
    package_id: String,
}

pub async fn create_purchase(
    State(state): State<AppState>,
    locale: Locale,
    CurrentActor(actor): CurrentActor,
    JsonBody(request): JsonBody<PurchaseRequest>,
) -> Result<(StatusCode, Json<Value>), ProblemResponse> {
    let company_id = require_company_admin(&actor).map_err(|err| err.into_problem(locale))?;
    let (order_id, transaction) = purchase(&state, company_id, &request.package_id)
        .await
        .map_err(|err| err.into_problem(locale))?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "order_id": order_id,
            "token": transaction.token,
            "redirect_url": transaction.redirect_url,
        })),
    ))
}
