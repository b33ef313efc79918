use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use url::Url;

use crate::{ensure_success, GatewayError};

/// Sends templated transactional email.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(
        &self,
        template_key: &str,
        recipient: &str,
        variables: &Value,
    ) -> Result<(), GatewayError>;
}

/// Mailer backed by a JSON mail API.
#[derive(Clone)]
pub struct HttpMailer {
    http: Client,
    api_url: Url,
    api_key: String,
    from_address: String,
}

impl HttpMailer {
    pub fn new(
        api_url: Url,
        api_key: impl Into<String>,
        from_address: impl Into<String>,
        http: Client,
    ) -> Self {
        Self {
            http,
            api_url,
            api_key: api_key.into(),
            from_address: from_address.into(),
        }
    }
}

#[derive(Serialize)]
struct MailBody<'a> {
    from: &'a str,
    to: &'a str,
    template: &'a str,
    variables: &'a Value,
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send(
        &self,
        template_key: &str,
        recipient: &str,
        variables: &Value,
    ) -> Result<(), GatewayError> {
        let response = self
            .http
            .post(self.api_url.clone())
            .bearer_auth(&self.api_key)
            .json(&MailBody {
                from: &self.from_address,
                to: recipient,
                template: template_key,
                variables,
            })
            .send()
            .await?;
        ensure_success(response).await?;
        Ok(())
    }
}

/// Development mailer that only logs.
#[derive(Debug, Clone, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(
        &self,
        template_key: &str,
        recipient: &str,
        variables: &Value,
    ) -> Result<(), GatewayError> {
        tracing::info!(
            stage = "delivery",
            channel = "email",
            template = template_key,
            recipient,
            %variables,
            "email delivery skipped (no mail api configured)"
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
    async fn posts_template_and_variables() {
        let server = MockServer::start_async().await;
        let url = Url::parse(&server.url("/v1/send")).expect("url");
        let mailer = HttpMailer::new(url, "mail-key", "no-reply@jobboard.test", Client::new());

        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/send")
                    .header("Authorization", "Bearer mail-key")
                    .json_body(json!({
                        "from": "no-reply@jobboard.test",
                        "to": "hr@acme.test",
                        "template": "invitation_accepted",
                        "variables": { "candidate_name": "Dana" }
                    }));
                then.status(202);
            })
            .await;

        mailer
            .send(
                "invitation_accepted",
                "hr@acme.test",
                &json!({ "candidate_name": "Dana" }),
            )
            .await
            .expect("send");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn server_error_is_reported() {
        let server = MockServer::start_async().await;
        let url = Url::parse(&server.url("/v1/send")).expect("url");
        let mailer = HttpMailer::new(url, "mail-key", "no-reply@jobboard.test", Client::new());

        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/send");
                then.status(503).body("down");
            })
            .await;

        let err = mailer
            .send("invitation_accepted", "hr@acme.test", &json!({}))
            .await
            .expect_err("should fail");
        assert!(matches!(err, GatewayError::Status { .. }));
    }
}
