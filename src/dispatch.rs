//! Hand-off of verification links to whatever visits them.

use crate::config::DispatchConfig;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, Mutex};

const DEFAULT_WEBHOOK_TIMEOUT_SECONDS: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationMessage {
    pub url: String,
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Dispatch channel unavailable: {0}")]
    Unavailable(String),
    #[error("Dispatch I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Dispatch HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Failed to encode dispatch message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Fire-and-forget sink for verification links.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn send(&self, message: VerificationMessage) -> Result<(), DispatchError>;
}

/// In-process queue; the receiving half belongs to the consumer.
pub struct ChannelDispatcher {
    sender: mpsc::UnboundedSender<VerificationMessage>,
}

impl ChannelDispatcher {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<VerificationMessage>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl Dispatcher for ChannelDispatcher {
    async fn send(&self, message: VerificationMessage) -> Result<(), DispatchError> {
        self.sender
            .send(message)
            .map_err(|e| DispatchError::Unavailable(format!("receiver dropped: {e}")))
    }
}

/// Appends one JSON object per line to a spool file.
pub struct SpoolDispatcher {
    path: PathBuf,
    lock: Mutex<()>,
}

impl SpoolDispatcher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl Dispatcher for SpoolDispatcher {
    async fn send(&self, message: VerificationMessage) -> Result<(), DispatchError> {
        let mut line = serde_json::to_string(&message)?;
        line.push('\n');

        let _guard = self.lock.lock().await;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        log::debug!("Spooled verification link to {}", self.path.display());
        Ok(())
    }
}

/// POSTs the JSON message to an HTTP endpoint.
pub struct WebhookDispatcher {
    client: Client,
    endpoint: String,
}

impl WebhookDispatcher {
    pub fn new(endpoint: &str, timeout_seconds: u64) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .user_agent(concat!("token-harvester/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            endpoint: endpoint.to_string(),
        }
    }
}

#[async_trait]
impl Dispatcher for WebhookDispatcher {
    async fn send(&self, message: VerificationMessage) -> Result<(), DispatchError> {
        let body = serde_json::to_string(&message)?;
        let response = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(DispatchError::Unavailable(format!(
                "{} answered {status}",
                self.endpoint
            )));
        }
        Ok(())
    }
}

pub fn build_dispatcher(config: &DispatchConfig) -> Arc<dyn Dispatcher> {
    match config {
        DispatchConfig::Spool { path } => Arc::new(SpoolDispatcher::new(path)),
        DispatchConfig::Webhook {
            url,
            timeout_seconds,
        } => Arc::new(WebhookDispatcher::new(
            url,
            timeout_seconds.unwrap_or(DEFAULT_WEBHOOK_TIMEOUT_SECONDS),
        )),
    }
}
