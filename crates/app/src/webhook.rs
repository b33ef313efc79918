use std::time::Instant;

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    Json,
};
use metrics::{counter, histogram};
use serde_json::{json, Value};
use tracing::{info, warn};

use jobboard_core::company::Company;
use jobboard_core::notification::NewNotification;
use jobboard_core::payment::{PaymentOrder, PaymentStatus};
use jobboard_gateway::PaymentNotification;
use jobboard_storage::{LedgerEntry, LedgerError, NewPaymentEvent};

use crate::error::ServiceError;
use crate::messages::{Locale, Message};
use crate::problem::ProblemResponse;
use crate::router::AppState;

/// What a verified notification did to the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    Credited,
    AlreadyProcessed,
    Pending,
    Failed,
}

impl WebhookOutcome {
    fn message(self) -> Message {
        match self {
            Self::Credited => Message::PaymentCredited,
            Self::AlreadyProcessed => Message::PaymentAlreadyProcessed,
            Self::Pending => Message::PaymentPending,
            Self::Failed => Message::PaymentFailed,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Credited => "credited",
            Self::AlreadyProcessed => "already_processed",
            Self::Pending => "pending",
            Self::Failed => "failed",
        }
    }
}

pub async fn handle(
    State(state): State<AppState>,
    locale: Locale,
    body: Bytes,
) -> Result<Json<Value>, ProblemResponse> {
    let start = Instant::now();
    let result = handle_notification(&state, &body).await;
    histogram!("webhook_ack_latency_seconds").record(start.elapsed().as_secs_f64());

    match result {
        Ok(outcome) => Ok(Json(json!({
            "status": outcome.as_str(),
            "message": outcome.message().render(locale),
        }))),
        Err(WebhookFailure::Malformed(detail)) => Err(ProblemResponse::new(
            StatusCode::BAD_REQUEST,
            "invalid_payload",
            detail,
        )),
        Err(WebhookFailure::Service(err)) => Err(err.into_problem(locale)),
    }
}

enum WebhookFailure {
    Malformed(String),
    Service(ServiceError),
}

impl From<ServiceError> for WebhookFailure {
    fn from(err: ServiceError) -> Self {
        Self::Service(err)
    }
}

async fn handle_notification(state: &AppState, body: &[u8]) -> Result<WebhookOutcome, WebhookFailure> {
    let payload = std::str::from_utf8(body)
        .map_err(|_| WebhookFailure::Malformed("request body must be valid UTF-8".to_string()))?;
    let notification: PaymentNotification = serde_json::from_str(payload)
        .map_err(|err| WebhookFailure::Malformed(format!("failed to parse payload: {err}")))?;

    if !state.signature_verifier().verify(&notification) {
        counter!("payment_invalid_signature_total").increment(1);
        warn!(
            stage = "webhook",
            order_id = %notification.order_id,
            "payment notification rejected: signature mismatch"
        );
        return Err(ServiceError::InvalidSignature.into());
    }

    let status = PaymentStatus::from_provider(
        &notification.transaction_status,
        notification.fraud_status.as_deref(),
    );
    counter!("payment_webhook_total", "status" => status.as_str()).increment(1);
    info!(
        stage = "webhook",
        order_id = %notification.order_id,
        transaction_status = %notification.transaction_status,
        status = status.as_str(),
        "payment notification received"
    );

    Ok(process(state, &notification, status, payload).await?)
}

/// Applies a verified notification. Safe to call repeatedly for one order.
pub async fn process(
    state: &AppState,
    notification: &PaymentNotification,
    status: PaymentStatus,
    payload: &str,
) -> Result<WebhookOutcome, ServiceError> {
    let now = state.now();
    let payments = state.storage().payments();
    let order_id = notification.order_id.as_str();
    let event = NewPaymentEvent {
        order_id,
        transaction_status: &notification.transaction_status,
        status,
        payload_json: payload,
        received_at: now,
    };

    // The audit insert is the first statement so the transaction holds the
    // write lock before the order row is read.
    let mut tx = state.storage().begin().await?;
    payments.record_event(&mut tx, &event).await?;

    let order = match payments.fetch_order_in(&mut tx, order_id).await {
        Ok(order) => order,
        Err(err) => {
            tx.commit().await?;
            warn!(stage = "webhook", order_id, "notification for unknown order");
            return Err(err.into());
        }
    };

    if !order.amount_matches(&notification.gross_amount) {
        tx.commit().await?;
        warn!(
            stage = "webhook",
            order_id,
            expected = order.gross_amount,
            received = %notification.gross_amount,
            "gross amount mismatch"
        );
        return Err(ServiceError::AmountMismatch);
    }

    match status {
        PaymentStatus::Pending => {
            tx.commit().await?;
            Ok(WebhookOutcome::Pending)
        }
        PaymentStatus::Failure => {
            let marked = payments.mark_failed(&mut tx, order_id, now).await?;
            tx.commit().await?;
            info!(stage = "webhook", order_id, marked, "payment failed");
            Ok(WebhookOutcome::Failed)
        }
        PaymentStatus::Success => {
            if !payments.mark_paid(&mut tx, order_id, now).await? {
                tx.commit().await?;
                info!(stage = "webhook", order_id, "order already paid; skipping credit");
                return Ok(WebhookOutcome::AlreadyProcessed);
            }

            let description = format!("Purchase of package {}", order.package_id);
            let entry = LedgerEntry::purchase(order.company_id, order.points, order_id, &description);
            match state.storage().ledger().credit(&mut tx, &entry, now).await {
                Ok(transaction) => {
                    state
                        .storage()
                        .notifications()
                        .create_in(
                            &mut tx,
                            &NewNotification::points_credited(order.company_id, order.points, order_id),
                            now,
                        )
                        .await?;
                    tx.commit().await?;
                    counter!("ledger_credits_total", "kind" => "purchase").increment(1);
                    info!(
                        stage = "ledger",
                        order_id,
                        company_id = order.company_id,
                        points = order.points,
                        balance_after = transaction.balance_after,
                        "points credited"
                    );
                    send_confirmation(state, &order).await;
                    Ok(WebhookOutcome::Credited)
                }
                Err(LedgerError::DuplicateReference(_)) => {
                    drop(tx);
                    record_event_only(state, &event).await?;
                    info!(stage = "webhook", order_id, "duplicate credit ignored");
                    Ok(WebhookOutcome::AlreadyProcessed)
                }
                Err(err) => Err(err.into()),
            }
        }
    }
}

async fn record_event_only(state: &AppState, event: &NewPaymentEvent<'_>) -> Result<(), ServiceError> {
    let mut tx = state.storage().begin().await?;
    state.storage().payments().record_event(&mut tx, event).await?;
    tx.commit().await?;
    Ok(())
}

async fn send_confirmation(state: &AppState, order: &PaymentOrder) {
    let company: Company = match state.storage().companies().fetch(order.company_id).await {
        Ok(company) => company,
        Err(err) => {
            warn!(stage = "delivery", channel = "whatsapp", error = %err, "company lookup failed");
            counter!("notification_delivery_failures_total", "channel" => "whatsapp").increment(1);
            return;
        }
    };
    let Some(phone) = company.phone.as_deref() else {
        return;
    };

    let message = Message::PointsCreditedWhatsApp {
        company: company.name.clone(),
        points: order.points,
        order_id: order.order_id.clone(),
    }
    .render(Locale::Id);

    if let Err(err) = state.whatsapp().send(phone, &message).await {
        warn!(
            stage = "delivery",
            channel = "whatsapp",
            order_id = %order.order_id,
            error = %err,
            "payment confirmation not delivered"
        );
        counter!("notification_delivery_failures_total", "channel" => "whatsapp").increment(1);
    }
}
