use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use jobboard_core::notification::{Actor, Notification};
use jobboard_storage::NotificationError;

use crate::auth::CurrentActor;
use crate::error::ServiceError;
use crate::messages::{Locale, Message};
use crate::problem::ProblemResponse;
use crate::router::AppState;

const DEFAULT_LIMIT: i64 = 20;
const MAX_LIMIT: i64 = 100;

/// Marks one notification read on behalf of `actor`. Repeating it is harmless.
pub async fn mark_read(
    state: &AppState,
    notification_id: i64,
    actor: &Actor,
) -> Result<Notification, ServiceError> {
    let repo = state.storage().notifications();
    let notification = repo.fetch(notification_id).await?;
    if !notification.audience.matches(actor) {
        return Err(ServiceError::Forbidden);
    }
    if repo.mark_read(notification_id, state.now()).await? {
        debug!(stage = "notification", notification_id, user_id = actor.user_id, "marked read");
    }
    Ok(repo.fetch(notification_id).await?)
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    limit: Option<i64>,
}

pub async fn list(
    State(state): State<AppState>,
    locale: Locale,
    CurrentActor(actor): CurrentActor,
    Query(query): Query<ListQuery>,
) -> Result<Json<Value>, ProblemResponse> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let repo = state.storage().notifications();
    let problem = |err: NotificationError| ServiceError::from(err).into_problem(locale);

    let unread_count = repo.unread_count(&actor).await.map_err(problem)?;
    let notifications = repo.recent(&actor, limit).await.map_err(problem)?;
    Ok(Json(json!({
        "unread_count": unread_count,
        "notifications": notifications,
    })))
}

pub async fn unread_count(
    State(state): State<AppState>,
    locale: Locale,
    CurrentActor(actor): CurrentActor,
) -> Result<Json<Value>, ProblemResponse> {
    let count = state
        .storage()
        .notifications()
        .unread_count(&actor)
        .await
        .map_err(|err| ServiceError::from(err).into_problem(locale))?;
    Ok(Json(json!({ "unread_count": count })))
}

pub async fn mark_one(
    State(state): State<AppState>,
    locale: Locale,
    CurrentActor(actor): CurrentActor,
    Path(notification_id): Path<i64>,
) -> Result<Json<Notification>, ProblemResponse> {
    mark_read(&state, notification_id, &actor)
        .await
        .map(Json)
        .map_err(|err| err.into_problem(locale))
}

pub async fn mark_all(
    State(state): State<AppState>,
    locale: Locale,
    CurrentActor(actor): CurrentActor,
) -> Result<Json<Value>, ProblemResponse> {
    let updated = state
        .storage()
        .notifications()
        .mark_all_read(&actor, state.now())
        .await
        .map_err(|err| ServiceError::from(err).into_problem(locale))?;
    Ok(Json(json!({
        "updated": updated,
        "message": Message::NotificationsMarked(updated).render(locale),
    })))
}
