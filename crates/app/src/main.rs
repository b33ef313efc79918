mod admin;
mod auth;
mod cache;
mod error;
mod extract;
mod invitations;
mod jobs;
mod messages;
mod notifications;
mod points;
mod problem;
mod router;
mod telemetry;
mod webhook;

use std::{net::SocketAddr, sync::Arc};

use reqwest::Client;
use tracing::info;
use url::Url;

use jobboard_gateway::{
    HttpMailer, HttpWhatsAppSender, LogMailer, LogWhatsAppSender, Mailer, MidtransClient,
    MidtransSignatureVerifier, WhatsAppSender,
};
use jobboard_storage::Database;
use jobboard_util::{load_env_file, AppConfig};

use crate::cache::MemoryCache;
use crate::router::Collaborators;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    load_env_file();
    let config = AppConfig::from_env()?;

    telemetry::init_tracing(&config)?;
    let metrics = telemetry::init_metrics()?;

    let database = Database::connect(&config.database_url).await?;
    database.run_migrations().await?;

    let collaborators = build_collaborators(&config)?;
    let state = router::AppState::new(
        metrics,
        database,
        &config.auth_token_secret,
        collaborators,
        config.job_post_cost,
        config.invitation_stats_ttl,
    );

    let addr: SocketAddr = config.bind_addr;
    info!(stage = "app", %addr, env = %config.environment.as_str(), "starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router::app_router(state))
        .await
        .map_err(|err| err.into())
}

fn build_collaborators(config: &AppConfig) -> Result<Collaborators, Box<dyn std::error::Error>> {
    let http = Client::builder()
        .user_agent(concat!("jobboard/", env!("CARGO_PKG_VERSION")))
        .build()?;

    let snap_url = Url::parse(&config.midtrans.snap_url)?;
    info!(
        stage = "app",
        %snap_url,
        production = config.midtrans.is_production,
        "payment gateway configured"
    );

    let mailer: Arc<dyn Mailer> = match &config.mail {
        Some(mail) => Arc::new(HttpMailer::new(
            Url::parse(&mail.api_url)?,
            mail.api_key.clone(),
            mail.from_address.clone(),
            http.clone(),
        )),
        None => Arc::new(LogMailer),
    };
    let whatsapp: Arc<dyn WhatsAppSender> = match &config.whatsapp {
        Some(whatsapp) => Arc::new(HttpWhatsAppSender::new(
            Url::parse(&whatsapp.api_url)?,
            whatsapp.token.clone(),
            http.clone(),
        )),
        None => Arc::new(LogWhatsAppSender),
    };

    Ok(Collaborators {
        cache: Arc::new(MemoryCache::new()),
        mailer,
        whatsapp,
        payment_gateway: Arc::new(MidtransClient::new(
            config.midtrans.server_key.clone(),
            snap_url,
            http,
        )),
        signature_verifier: Arc::new(MidtransSignatureVerifier::new(
            config.midtrans.server_key.clone(),
        )),
    })
}
