use crate::classifier::{Classification, MessageClassifier};
use crate::config::Config;
use crate::decoder::{BodyDecoder, DecodeError};
use crate::dispatch::{DispatchError, Dispatcher, VerificationMessage};
use crate::extract::{LinkExtractor, TokenExtractor};
use crate::message::InboundMessage;
use crate::store::{IdentityRecord, IdentityStatus, IdentityStore, StoreError};
use std::sync::Arc;

/// What became of one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Not part of the workflow; the transport forwards it verbatim
    Forward { to: String },
    LinkDispatched { url: String },
    TokenStored { address: String, token: String },
    /// A token arrived for an address that already has one and overwriting is off
    TokenKept { address: String },
    /// Workflow mail whose body did not contain what it should have
    NoMatch { classification: Classification },
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Malformed message body: {0}")]
    MalformedBody(#[from] DecodeError),
    #[error(transparent)]
    StoreUnavailable(#[from] StoreError),
    #[error(transparent)]
    DispatchUnavailable(#[from] DispatchError),
}

pub struct TokenPipeline {
    classifier: MessageClassifier,
    decoder: BodyDecoder,
    link_extractor: LinkExtractor,
    token_extractor: TokenExtractor,
    store: Arc<dyn IdentityStore>,
    dispatcher: Arc<dyn Dispatcher>,
    forward_to: String,
    overwrite_tokens: bool,
}

impl TokenPipeline {
    pub fn new(
        config: &Config,
        store: Arc<dyn IdentityStore>,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Self {
        Self {
            classifier: MessageClassifier::new(&config.service),
            decoder: BodyDecoder::new(),
            link_extractor: LinkExtractor::new(&config.service.verify_base_url),
            token_extractor: TokenExtractor::new(),
            store,
            dispatcher,
            forward_to: config.forward_to.clone(),
            overwrite_tokens: config.overwrite_tokens,
        }
    }

    pub async fn handle(&self, message: &InboundMessage) -> Result<Disposition, PipelineError> {
        let subject = message.subject();
        log::info!(
            "Got email from {} to {} with subject: {}",
            message.from,
            message.to,
            subject.as_deref().unwrap_or("<none>")
        );

        let classification = self.classifier.classify(subject.as_deref());
        if classification == Classification::Unrelated {
            log::info!("Forwarding unrelated message to {}", self.forward_to);
            return Ok(Disposition::Forward {
                to: self.forward_to.clone(),
            });
        }

        let body = self.decoder.decode(&message.raw)?;
        log::debug!("Decoded body: {body}");

        if message.to.is_empty() {
            log::warn!("{classification:?} message has no recipient, nothing to key it by");
            return Ok(Disposition::NoMatch { classification });
        }

        match classification {
            Classification::VerificationRequest => self.handle_verification(message, &body).await,
            Classification::TokenDelivery => self.handle_token_delivery(message, &body).await,
            Classification::Unrelated => unreachable!("unrelated mail returns early"),
        }
    }

    async fn handle_verification(
        &self,
        message: &InboundMessage,
        body: &str,
    ) -> Result<Disposition, PipelineError> {
        log::info!("{} got an email verification request", message.to);

        let Some(url) = self.link_extractor.extract(body) else {
            return Ok(Disposition::NoMatch {
                classification: Classification::VerificationRequest,
            });
        };

        self.dispatcher
            .send(VerificationMessage { url: url.clone() })
            .await?;
        log::info!("Dispatched verification link for {}", message.to);

        match self.store.get(&message.to).await? {
            Some(record) if matches!(record.status, IdentityStatus::TokenReceived { .. }) => {
                log::debug!("{} already has a token, status unchanged", message.to);
            }
            Some(_) => {
                self.store
                    .put(&message.to, IdentityRecord::link_dispatched(url.as_str()))
                    .await?;
            }
            None => {
                log::warn!("{} was never reserved, not tracking its progress", message.to);
            }
        }

        Ok(Disposition::LinkDispatched { url })
    }

    async fn handle_token_delivery(
        &self,
        message: &InboundMessage,
        body: &str,
    ) -> Result<Disposition, PipelineError> {
        let Some(token) = self.token_extractor.extract(body) else {
            return Ok(Disposition::NoMatch {
                classification: Classification::TokenDelivery,
            });
        };
        log::info!("{} got a token", message.to);

        let existing = self.store.get(&message.to).await?;
        match existing.as_ref().and_then(IdentityRecord::token) {
            Some(stored) if !self.overwrite_tokens => {
                log::warn!(
                    "{} already holds a token, keeping it (stored {}, received {})",
                    message.to,
                    stored,
                    token
                );
                return Ok(Disposition::TokenKept {
                    address: message.to.clone(),
                });
            }
            Some(stored) if stored != token => {
                log::warn!("Replacing previously stored token for {}", message.to);
            }
            _ => {}
        }
        if existing.is_none() {
            log::warn!("Storing token for {} which was never reserved", message.to);
        }

        self.store
            .put(&message.to, IdentityRecord::token_received(token.as_str()))
            .await?;
        log::info!("Stored token for {}: {}", message.to, token);

        Ok(Disposition::TokenStored {
            address: message.to.clone(),
            token,
        })
    }
}
