use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use tracing::debug;

use docflow_core::config::MailerConfig;
use docflow_core::notifications::{
    ApprovalCompleteNote, ApprovalRequestNote, Notifier, NotifyError, RejectNote,
};

use crate::messages::MailMessage;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("mail gateway request failed: {0}")]
    Transport(String),
    #[error("mail gateway returned status {0}")]
    Status(u16),
    #[error("mail gateway client could not be built: {0}")]
    Client(String),
}

/// Transport seam under the notifier, so the delivery mechanism can be
/// swapped (and recorded in tests) without touching message construction.
#[async_trait]
pub trait MailGateway: Send + Sync {
    async fn deliver(&self, message: MailMessage) -> Result<(), MailError>;
}

/// Gateway speaking the internal mail relay's HTTP API.
pub struct HttpMailGateway {
    client: reqwest::Client,
    base_url: String,
    api_token: Option<SecretString>,
    from_address: String,
}

impl HttpMailGateway {
    pub fn from_config(config: &MailerConfig) -> Result<Self, MailError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| MailError::Client(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_token: config.api_token.clone(),
            from_address: config.from_address.clone(),
        })
    }
}

#[derive(serde::Serialize)]
struct RelayPayload<'a> {
    from: &'a str,
    to: &'a str,
    to_name: &'a str,
    subject: &'a str,
    body: &'a str,
}

#[async_trait]
impl MailGateway for HttpMailGateway {
    async fn deliver(&self, message: MailMessage) -> Result<(), MailError> {
        let url = format!("{}/api/v1/messages", self.base_url);
        let payload = RelayPayload {
            from: &self.from_address,
            to: &message.to_email,
            to_name: &message.to_name,
            subject: &message.subject,
            body: &message.body,
        };

        let mut request = self.client.post(&url).json(&payload);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token.expose_secret());
        }

        let response =
            request.send().await.map_err(|e| MailError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(MailError::Status(response.status().as_u16()));
        }

        debug!(to = %message.to_email, subject = %message.subject, "mail delivered");
        Ok(())
    }
}

/// Test gateway that records deliveries, optionally failing each one.
#[derive(Default)]
pub struct RecordingMailGateway {
    delivered: Mutex<Vec<MailMessage>>,
    fail: bool,
}

impl RecordingMailGateway {
    pub fn failing() -> Self {
        Self { delivered: Mutex::new(Vec::new()), fail: true }
    }

    pub fn delivered(&self) -> Vec<MailMessage> {
        match self.delivered.lock() {
            Ok(delivered) => delivered.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl MailGateway for RecordingMailGateway {
    async fn deliver(&self, message: MailMessage) -> Result<(), MailError> {
        if self.fail {
            return Err(MailError::Status(503));
        }
        match self.delivered.lock() {
            Ok(mut delivered) => delivered.push(message),
            Err(poisoned) => poisoned.into_inner().push(message),
        }
        Ok(())
    }
}

/// The `Notifier` the workflow engine is wired with in production: builds a
/// mail per note and hands it to the gateway.
pub struct MailNotifier {
    gateway: Arc<dyn MailGateway>,
}

impl MailNotifier {
    pub fn new(gateway: Arc<dyn MailGateway>) -> Self {
        Self { gateway }
    }

    async fn deliver(&self, message: MailMessage) -> Result<(), NotifyError> {
        self.gateway.deliver(message).await.map_err(|e| NotifyError(e.to_string()))
    }
}

#[async_trait]
impl Notifier for MailNotifier {
    async fn send_approval_request(&self, note: ApprovalRequestNote) -> Result<(), NotifyError> {
        self.deliver(MailMessage::approval_request(&note)).await
    }

    async fn send_approval_complete(&self, note: ApprovalCompleteNote) -> Result<(), NotifyError> {
        self.deliver(MailMessage::approval_complete(&note)).await
    }

    async fn send_reject(&self, note: RejectNote) -> Result<(), NotifyError> {
        self.deliver(MailMessage::reject(&note)).await
    }
}
