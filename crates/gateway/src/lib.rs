//! Outbound collaborators: the payment provider, transactional mail and WhatsApp.

pub mod mail;
pub mod midtrans;
pub mod whatsapp;

use reqwest::{Response, StatusCode};
use thiserror::Error;

pub use mail::{HttpMailer, LogMailer, Mailer};
pub use midtrans::{
    MidtransClient, MidtransSignatureVerifier, PaymentGateway, PaymentNotification, SignatureVerifier,
    SnapCustomer, SnapRequest, SnapTransaction,
};
pub use whatsapp::{HttpWhatsAppSender, LogWhatsAppSender, WhatsAppSender};

/// Failure talking to an external HTTP service. Callers treat it as transient.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("failed to build url: {0}")]
    Url(#[from] url::ParseError),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {status}: {body}")]
    Status { status: StatusCode, body: String },
}

async fn ensure_success(response: Response) -> Result<Response, GatewayError> {
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<unavailable>"));
        return Err(GatewayError::Status { status, body });
    }
    Ok(response)
}
