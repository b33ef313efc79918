use std::{sync::Arc, time::Duration};

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, patch, post},
    Router,
};
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;

use jobboard_gateway::{Mailer, PaymentGateway, SignatureVerifier, WhatsAppSender};
use jobboard_storage::Database;

use crate::auth::TokenValidator;
use crate::cache::Cache;
use crate::{admin, invitations, jobs, notifications, points, telemetry, webhook};

/// External services the handlers talk to.
#[derive(Clone)]
pub struct Collaborators {
    pub cache: Arc<dyn Cache>,
    pub mailer: Arc<dyn Mailer>,
    pub whatsapp: Arc<dyn WhatsAppSender>,
    pub payment_gateway: Arc<dyn PaymentGateway>,
    pub signature_verifier: Arc<dyn SignatureVerifier>,
}

#[derive(Clone)]
pub struct AppState {
    metrics: PrometheusHandle,
    storage: Database,
    clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
    token_validator: TokenValidator,
    collaborators: Collaborators,
    job_post_cost: i64,
    invitation_stats_ttl: Duration,
}

impl AppState {
    pub fn new(
        metrics: PrometheusHandle,
        storage: Database,
        token_secret: &[u8],
        collaborators: Collaborators,
        job_post_cost: i64,
        invitation_stats_ttl: Duration,
    ) -> Self {
        Self {
            metrics,
            storage,
            clock: Arc::new(Utc::now),
            token_validator: TokenValidator::new(token_secret),
            collaborators,
            job_post_cost,
            invitation_stats_ttl,
        }
    }

    #[cfg(test)]
    pub fn with_clock(mut self, clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>) -> Self {
        self.clock = clock;
        self
    }

    pub fn metrics(&self) -> &PrometheusHandle {
        &self.metrics
    }

    pub fn storage(&self) -> &Database {
        &self.storage
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    pub fn token_validator(&self) -> &TokenValidator {
        &self.token_validator
    }

    pub fn cache(&self) -> &dyn Cache {
        self.collaborators.cache.as_ref()
    }

    pub fn mailer(&self) -> &dyn Mailer {
        self.collaborators.mailer.as_ref()
    }

    pub fn whatsapp(&self) -> &dyn WhatsAppSender {
        self.collaborators.whatsapp.as_ref()
    }

    pub fn payment_gateway(&self) -> &dyn PaymentGateway {
        self.collaborators.payment_gateway.as_ref()
    }

    pub fn signature_verifier(&self) -> &dyn SignatureVerifier {
        self.collaborators.signature_verifier.as_ref()
    }

    /// Points charged for opening one listing.
    pub fn job_post_cost(&self) -> i64 {
        self.job_post_cost
    }

    pub fn invitation_stats_ttl(&self) -> Duration {
        self.invitation_stats_ttl
    }
}

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .route("/webhook/midtrans", post(webhook::handle))
        .route("/company/points", get(points::show))
        .route("/company/points/packages", get(points::packages))
        .route("/company/points/purchase", post(points::create_purchase))
        .route("/company/jobs", post(jobs::create_handler))
        .route("/company/jobs/:id/close", post(jobs::close_handler))
        .route("/company/jobs/:id/applications", get(jobs::applications_handler))
        .route("/company/applications/:id", patch(jobs::review_handler))
        .route("/company/job-invitations", post(invitations::create_handler))
        .route("/company/job-invitations/stats", get(invitations::stats_handler))
        .route("/user/applications", post(jobs::apply_handler))
        .route("/user/job-invitations", get(invitations::list_handler))
        .route("/user/job-invitations/:id", patch(invitations::respond_handler))
        .route("/user/notifications", get(notifications::list))
        .route("/user/notifications/unread-count", get(notifications::unread_count))
        .route("/user/notifications/mark-all-as-read", post(notifications::mark_all))
        .route("/user/notifications/:id/mark-as-read", post(notifications::mark_one))
        .route(
            "/admin/companies/:id/verification",
            patch(admin::verification_handler),
        )
        .route("/admin/companies/:id/points/bonus", post(admin::bonus_handler))
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = telemetry::render_metrics(state.metrics());
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
}
