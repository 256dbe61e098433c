//! Delivery by HTTP webhook.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Serialize;
use tracing::{debug, warn};

use nudge_scheduler::{Notifier, NotifyError};

/// JSON body posted to the webhook.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookPayload<'a> {
    pub to: &'a str,
    pub subject: &'a str,
    pub body: &'a str,
}

/// Posts each reminder to an HTTP endpoint.
///
/// Any 2xx response counts as delivered. Other statuses become
/// [`NotifyError::Rejected`], connection failures [`NotifyError::Transport`].
pub struct WebhookNotifier {
    http: Client,
    url: Url,
    token: Option<String>,
}

impl WebhookNotifier {
    /// Create a notifier for the given endpoint, with an optional bearer token.
    pub fn new(url: &str, token: Option<String>) -> Result<Self, NotifyError> {
        let url = Url::parse(url)
            .map_err(|e| NotifyError::InvalidConfig(format!("invalid webhook url {url:?}: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(NotifyError::InvalidConfig(format!(
                "webhook url must be http or https, got {}",
                url.scheme()
            )));
        }

        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| NotifyError::InvalidConfig(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            url,
            token: token.filter(|t| !t.is_empty()),
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), NotifyError> {
        let payload = WebhookPayload { to, subject, body };

        let mut request = self.http.post(self.url.clone()).json(&payload);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, to = %to, "webhook rejected reminder");
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        debug!(status = %status, to = %to, "webhook accepted reminder");
        Ok(())
    }
}
