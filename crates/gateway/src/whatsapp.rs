use async_trait::async_trait;
use reqwest::{header::AUTHORIZATION, Client};
use serde::Serialize;
use url::Url;

use crate::{ensure_success, GatewayError};

/// Delivers a rendered text message to a phone number.
#[async_trait]
pub trait WhatsAppSender: Send + Sync {
    async fn send(&self, phone_number: &str, message: &str) -> Result<(), GatewayError>;
}

/// Sender for a token-authenticated WhatsApp gateway.
#[derive(Clone)]
pub struct HttpWhatsAppSender {
    http: Client,
    api_url: Url,
    token: String,
}

impl HttpWhatsAppSender {
    pub fn new(api_url: Url, token: impl Into<String>, http: Client) -> Self {
        Self {
            http,
            api_url,
            token: token.into(),
        }
    }
}

#[derive(Serialize)]
struct MessageBody<'a> {
    target: &'a str,
    message: &'a str,
}

#[async_trait]
impl WhatsAppSender for HttpWhatsAppSender {
    async fn send(&self, phone_number: &str, message: &str) -> Result<(), GatewayError> {
        let response = self
            .http
            .post(self.api_url.clone())
            .header(AUTHORIZATION, &self.token)
            .json(&MessageBody {
                target: phone_number,
                message,
            })
            .send()
            .await?;
        ensure_success(response).await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct LogWhatsAppSender;

#[async_trait]
impl WhatsAppSender for LogWhatsAppSender {
    async fn send(&self, phone_number: &str, message: &str) -> Result<(), GatewayError> {
        tracing::info!(
            stage = "delivery",
            channel = "whatsapp",
            phone_number,
            message,
            "whatsapp delivery skipped (no gateway configured)"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    #[tokio::test]
    async fn sends_raw_token_header() {
        let server = MockServer::start_async().await;
        let url = Url::parse(&server.url("/send")).expect("url");
        let sender = HttpWhatsAppSender::new(url, "wa-token", Client::new());

        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/send")
                    .header("Authorization", "wa-token")
                    .json_body(json!({ "target": "628123456789", "message": "hi" }));
                then.status(200).json_body(json!({ "status": true }));
            })
            .await;

        sender.send("628123456789", "hi").await.expect("send");
        mock.assert_async().await;
    }
}
