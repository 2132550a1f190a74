use crate::message::{extract_email_from_header, InboundMessage};
use crate::pipeline::{Disposition, PipelineError, TokenPipeline};
use indymilter::{run, Actions, Callbacks, Config as IndyConfig, ContextActions, Status};
use std::sync::Arc;
use tokio::net::UnixListener;

/// Envelope, headers and body of one SMTP transaction.
#[derive(Debug, Default)]
pub struct Transaction {
    sender: String,
    recipients: Vec<String>,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl Transaction {
    fn message_for(&self, recipient: &str) -> InboundMessage {
        let body = String::from_utf8_lossy(&self.body);
        InboundMessage::from_parts(&self.sender, recipient, self.headers.clone(), &body)
    }
}

fn domain_of(address: &str) -> Option<String> {
    let address = extract_email_from_header(address)?;
    address
        .rsplit_once('@')
        .map(|(_, domain)| domain.to_lowercase())
}

/// Recipients (as given in RCPT TO) that belong to the identity domain.
pub fn identity_recipients(recipients: &[String], domain: &str) -> Vec<String> {
    let domain = domain.to_lowercase();
    recipients
        .iter()
        .filter(|rcpt| domain_of(rcpt).as_deref() == Some(domain.as_str()))
        .cloned()
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Discard,
    Tempfail,
}

/// Envelope changes to apply at end of message.
#[derive(Debug, PartialEq, Eq)]
pub struct EomPlan {
    pub verdict: Verdict,
    pub add_recipients: Vec<String>,
    pub delete_recipients: Vec<String>,
}

impl EomPlan {
    fn verdict_only(verdict: Verdict) -> Self {
        EomPlan {
            verdict,
            add_recipients: Vec::new(),
            delete_recipients: Vec::new(),
        }
    }
}

/// Turn per-recipient pipeline results into one milter decision.
///
/// `recipients` is every RCPT TO of the transaction; `outcomes` covers the
/// identity-domain ones. Handled identity recipients are removed from the
/// envelope, forwarded ones are replaced by the inspection address, and the
/// message is only discarded when no recipient is left.
pub fn plan_eom(
    recipients: &[String],
    outcomes: Vec<(String, Result<Disposition, PipelineError>)>,
) -> EomPlan {
    let mut add_recipients: Vec<String> = Vec::new();
    let mut delete_recipients = Vec::new();

    for (rcpt, outcome) in outcomes {
        match outcome {
            Ok(Disposition::Forward { to }) => {
                log::info!("Forwarding message for {} to {}", rcpt, to);
                if !add_recipients.contains(&to) {
                    add_recipients.push(to);
                }
                delete_recipients.push(rcpt);
            }
            Ok(disposition) => {
                log::info!("Consumed message for {}: {:?}", rcpt, disposition);
                delete_recipients.push(rcpt);
            }
            Err(PipelineError::MalformedBody(e)) => {
                // Redelivery would fail the same way
                log::error!("Cannot process message for {}: {}", rcpt, e);
            }
            Err(e) => {
                log::error!("Processing failed for {}: {}", rcpt, e);
                return EomPlan::verdict_only(Verdict::Tempfail);
            }
        }
    }

    let remaining: Vec<String> = recipients
        .iter()
        .filter(|rcpt| !delete_recipients.contains(rcpt))
        .filter_map(|rcpt| extract_email_from_header(rcpt))
        .map(|address| address.to_lowercase())
        .collect();

    // Already a recipient, no need to add it again
    add_recipients.retain(|to| !remaining.contains(&to.to_lowercase()));

    if remaining.is_empty() && add_recipients.is_empty() {
        return EomPlan::verdict_only(Verdict::Discard);
    }

    EomPlan {
        verdict: Verdict::Accept,
        add_recipients,
        delete_recipients,
    }
}

pub struct Milter {
    pipeline: Arc<TokenPipeline>,
    domain: String,
}

impl Milter {
    pub fn new(pipeline: Arc<TokenPipeline>, domain: &str) -> Self {
        Milter {
            pipeline,
            domain: domain.to_string(),
        }
    }

    pub async fn run(&self, socket_path: &str) -> anyhow::Result<()> {
        log::info!("Starting milter on: {}", socket_path);
        // Remove existing socket if it exists
        if std::path::Path::new(socket_path).exists() {
            std::fs::remove_file(socket_path)?;
        }

        let listener = UnixListener::bind(socket_path)?;
        let pipeline = self.pipeline.clone();
        let domain = self.domain.clone();

        let callbacks: Callbacks<Transaction> = Callbacks {
            connect: Some(Box::new(
                move |_ctx: &mut indymilter::Context<Transaction>, hostname, _addr| {
                    Box::pin(async move {
                        log::debug!("Connection from: {}", hostname.to_string_lossy());
                        Status::Continue
                    })
                },
            )),

            mail: Some(Box::new(
                move |ctx: &mut indymilter::Context<Transaction>, args| {
                    Box::pin(async move {
                        let sender = args
                            .first()
                            .map(|s| s.to_string_lossy().into_owned())
                            .unwrap_or_default();
                        log::debug!("Mail from: {}", sender);
                        // A new transaction starts with every MAIL FROM
                        ctx.data = Some(Transaction {
                            sender,
                            ..Default::default()
                        });
                        Status::Continue
                    })
                },
            )),

            rcpt: Some(Box::new(
                move |ctx: &mut indymilter::Context<Transaction>, args| {
                    Box::pin(async move {
                        if let Some(recipient) = args.first() {
                            let recipient = recipient.to_string_lossy().into_owned();
                            log::debug!("Rcpt to: {}", recipient);
                            if let Some(transaction) = ctx.data.as_mut() {
                                transaction.recipients.push(recipient);
                            }
                        }
                        Status::Continue
                    })
                },
            )),

            header: Some(Box::new(
                move |ctx: &mut indymilter::Context<Transaction>, name, value| {
                    Box::pin(async move {
                        let name_str = name.to_string_lossy().into_owned();
                        let value_str = value.to_string_lossy().into_owned();
                        log::debug!("Header: {}: {}", name_str, value_str);
                        if let Some(transaction) = ctx.data.as_mut() {
                            transaction.headers.push((name_str, value_str));
                        }
                        Status::Continue
                    })
                },
            )),

            body: Some(Box::new(
                move |ctx: &mut indymilter::Context<Transaction>, chunk| {
                    Box::pin(async move {
                        if let Some(transaction) = ctx.data.as_mut() {
                            transaction.body.extend_from_slice(&chunk);
                        }
                        Status::Continue
                    })
                },
            )),

            eom: Some(Box::new(move |ctx: &mut indymilter::EomContext<Transaction>| {
                let pipeline = pipeline.clone();
                let domain = domain.clone();
                Box::pin(async move {
                    let Some(transaction) = ctx.data.take() else {
                        return Status::Accept;
                    };

                    let ours = identity_recipients(&transaction.recipients, &domain);
                    if ours.is_empty() {
                        log::debug!("No recipient in {}, passing message through", domain);
                        return Status::Accept;
                    }

                    let mut outcomes = Vec::with_capacity(ours.len());
                    for recipient in ours {
                        log::info!("End of message for {} - evaluating", recipient);
                        let message = transaction.message_for(&recipient);
                        let result = pipeline.handle(&message).await;
                        outcomes.push((recipient, result));
                    }

                    let plan = plan_eom(&transaction.recipients, outcomes);
                    match plan.verdict {
                        Verdict::Tempfail => return Status::Tempfail,
                        Verdict::Discard => return Status::Discard,
                        Verdict::Accept => {}
                    }

                    for rcpt in &plan.add_recipients {
                        if let Err(e) = ctx.actions.add_recipient(rcpt.clone()).await {
                            log::error!("Failed to forward to {}: {}", rcpt, e);
                            return Status::Tempfail;
                        }
                    }
                    for rcpt in &plan.delete_recipients {
                        if let Err(e) = ctx.actions.delete_recipient(rcpt.clone()).await {
                            log::warn!("Failed to remove recipient {}: {}", rcpt, e);
                        }
                    }
                    Status::Accept
                })
            })),

            abort: Some(Box::new(
                move |ctx: &mut indymilter::Context<Transaction>| {
                    Box::pin(async move {
                        ctx.data = None;
                        Status::Continue
                    })
                },
            )),

            ..Default::default()
        };

        let config = IndyConfig {
            actions: Actions::ADD_RCPT | Actions::DELETE_RCPT,
            ..Default::default()
        };

        run(listener, callbacks, config, tokio::signal::ctrl_c()).await?;
        Ok(())
    }
}
