use crate::config::ServiceConfig;
use serde::Serialize;

/// Workflow stage a single inbound message belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Classification {
    VerificationRequest,
    TokenDelivery,
    Unrelated,
}

/// Routes messages by subject line alone.
///
/// The service marker is checked first so that unrelated mail is never
/// decoded. All checks are case-sensitive substring matches.
pub struct MessageClassifier {
    service_marker: String,
    verification_marker: String,
    delivery_marker: String,
}

impl MessageClassifier {
    pub fn new(config: &ServiceConfig) -> Self {
        Self {
            service_marker: config.subject_marker.clone(),
            verification_marker: config.verification_subject.clone(),
            delivery_marker: config.welcome_subject.clone(),
        }
    }

    pub fn classify(&self, subject: Option<&str>) -> Classification {
        let subject = match subject {
            Some(subject) if subject.contains(&self.service_marker) => subject,
            _ => return Classification::Unrelated,
        };

        if subject.contains(&self.verification_marker) {
            Classification::VerificationRequest
        } else if subject.contains(&self.delivery_marker) {
            Classification::TokenDelivery
        } else {
            log::debug!("Recognized service but unknown message type: {subject}");
            Classification::Unrelated
        }
    }
}
