use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use reqwest::{header::AUTHORIZATION, Client};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};
use subtle::ConstantTimeEq;
use url::Url;

use crate::{ensure_success, GatewayError};

/// Creates hosted-checkout transactions with the payment provider.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_transaction(
        &self,
        request: &SnapRequest,
    ) -> Result<SnapTransaction, GatewayError>;
}

/// Checks that an inbound notification was produced by the provider.
pub trait SignatureVerifier: Send + Sync {
    fn verify(&self, notification: &PaymentNotification) -> bool;
}

/// Client for the Midtrans Snap API.
#[derive(Clone)]
pub struct MidtransClient {
    http: Client,
    snap_url: Url,
    server_key: String,
}

impl MidtransClient {
    /// `snap_url` is treated as a directory: a missing trailing slash is added
    /// so `join` keeps the last path segment.
    pub fn new(server_key: impl Into<String>, mut snap_url: Url, http: Client) -> Self {
        if !snap_url.path().ends_with('/') {
            let path = format!("{}/", snap_url.path());
            snap_url.set_path(&path);
        }
        Self {
            http,
            snap_url,
            server_key: server_key.into(),
        }
    }

    fn authorization(&self) -> String {
        format!("Basic {}", STANDARD.encode(format!("{}:", self.server_key)))
    }
}

#[async_trait]
impl PaymentGateway for MidtransClient {
    async fn create_transaction(
        &self,
        request: &SnapRequest,
    ) -> Result<SnapTransaction, GatewayError> {
        let url = self.snap_url.join("transactions")?;
        let body = SnapBody {
            transaction_details: TransactionDetails {
                order_id: &request.order_id,
                gross_amount: request.gross_amount,
            },
            item_details: [ItemDetails {
                id: &request.item_id,
                name: &request.item_name,
                price: request.gross_amount,
                quantity: 1,
            }],
            customer_details: &request.customer,
        };

        let response = self
            .http
            .post(url)
            .header(AUTHORIZATION, self.authorization())
            .json(&body)
            .send()
            .await?;

        Ok(ensure_success(response).await?.json().await?)
    }
}

/// Checkout request for a single point package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapRequest {
    pub order_id: String,
    pub gross_amount: i64,
    pub item_id: String,
    pub item_name: String,
    pub customer: SnapCustomer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapCustomer {
    pub first_name: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

/// Token and hosted payment page returned by Snap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapTransaction {
    pub token: String,
    pub redirect_url: String,
}

#[derive(Serialize)]
struct SnapBody<'a> {
    transaction_details: TransactionDetails<'a>,
    item_details: [ItemDetails<'a>; 1],
    customer_details: &'a SnapCustomer,
}

#[derive(Serialize)]
struct TransactionDetails<'a> {
    order_id: &'a str,
    gross_amount: i64,
}

#[derive(Serialize)]
struct ItemDetails<'a> {
    id: &'a str,
    name: &'a str,
    price: i64,
    quantity: u32,
}

/// HTTP notification body posted by Midtrans.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentNotification {
    pub order_id: String,
    pub status_code: String,
    pub gross_amount: String,
    pub signature_key: String,
    pub transaction_status: String,
    #[serde(default)]
    pub fraud_status: Option<String>,
    #[serde(default)]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub payment_type: Option<String>,
}

/// `hex(SHA-512(order_id + status_code + gross_amount + server_key))`.
#[derive(Clone)]
pub struct MidtransSignatureVerifier {
    server_key: String,
}

impl MidtransSignatureVerifier {
    pub fn new(server_key: impl Into<String>) -> Self {
        Self {
            server_key: server_key.into(),
        }
    }

    pub fn expected_signature(&self, order_id: &str, status_code: &str, gross_amount: &str) -> String {
        let mut hasher = Sha512::new();
        hasher.update(order_id.as_bytes());
        hasher.update(status_code.as_bytes());
        hasher.update(gross_amount.as_bytes());
        hasher.update(self.server_key.as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl SignatureVerifier for MidtransSignatureVerifier {
    fn verify(&self, notification: &PaymentNotification) -> bool {
        let expected = self.expected_signature(
            &notification.order_id,
            &notification.status_code,
            &notification.gross_amount,
        );
        let provided = notification.signature_key.to_ascii_lowercase();
        expected.as_bytes().ct_eq(provided.as_bytes()).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use reqwest::StatusCode;
    use serde_json::json;

    fn notification(signature_key: String) -> PaymentNotification {
        PaymentNotification {
            order_id: "PTS-01".to_string(),
            status_code: "200".to_string(),
            gross_amount: "250000.00".to_string(),
            signature_key,
            transaction_status: "settlement".to_string(),
            fraud_status: None,
            transaction_id: None,
            payment_type: None,
        }
    }

    fn request() -> SnapRequest {
        SnapRequest {
            order_id: "PTS-01".to_string(),
            gross_amount: 250_000,
            item_id: "basic".to_string(),
            item_name: "Basic (5 points)".to_string(),
            customer: SnapCustomer {
                first_name: "Acme".to_string(),
                email: "hr@acme.test".to_string(),
                phone: None,
            },
        }
    }

    #[test]
    fn accepts_provider_signature() {
        let verifier = MidtransSignatureVerifier::new("server-key");
        let signature = verifier.expected_signature("PTS-01", "200", "250000.00");
        assert_eq!(signature.len(), 128);
        assert!(verifier.verify(&notification(signature.to_ascii_uppercase())));
    }

    #[test]
    fn rejects_tampered_fields() {
        let verifier = MidtransSignatureVerifier::new("server-key");
        let signature = verifier.expected_signature("PTS-01", "200", "250000.00");
        let mut tampered = notification(signature);
        tampered.gross_amount = "1.00".to_string();
        assert!(!verifier.verify(&tampered));
        assert!(!verifier.verify(&notification("short".to_string())));
    }

    #[tokio::test]
    async fn create_transaction_posts_basic_auth() {
        let server = MockServer::start_async().await;
        let base = Url::parse(&server.url("/snap/v1/")).expect("url");
        let client = MidtransClient::new("server-key", base, Client::new());

        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/snap/v1/transactions")
                    .header("Authorization", "Basic c2VydmVyLWtleTo=")
                    .json_body_partial(
                        r#"{"transaction_details":{"order_id":"PTS-01","gross_amount":250000}}"#,
                    );
                then.status(201).json_body(json!({
                    "token": "snap-token",
                    "redirect_url": "https://app.sandbox.midtrans.com/snap/v2/vtweb/snap-token"
                }));
            })
            .await;

        let created = client.create_transaction(&request()).await.expect("create");
        mock.assert_async().await;
        assert_eq!(created.token, "snap-token");
    }

    #[tokio::test]
    async fn base_without_trailing_slash_keeps_version_segment() {
        let server = MockServer::start_async().await;
        let base = Url::parse(&server.url("/snap/v1")).expect("url");
        let client = MidtransClient::new("server-key", base, Client::new());

        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/snap/v1/transactions");
                then.status(201).json_body(json!({
                    "token": "snap-token",
                    "redirect_url": "https://pay.test/snap-token"
                }));
            })
            .await;

        client.create_transaction(&request()).await.expect("create");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn provider_errors_surface_status() {
        let server = MockServer::start_async().await;
        let base = Url::parse(&server.url("/snap/v1/")).expect("url");
        let client = MidtransClient::new("server-key", base, Client::new());

        server
            .mock_async(|when, then| {
                when.method(POST).path("/snap/v1/transactions");
                then.status(401).body("unauthorized");
            })
            .await;

        match client.create_transaction(&request()).await {
            Err(GatewayError::Status { status, body }) => {
                assert_eq!(status, StatusCode::UNAUTHORIZED);
                assert_eq!(body, "unauthorized");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
