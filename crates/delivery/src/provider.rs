//! Outbound email provider boundary.
//!
//! The engine hands a fully rendered message to a `DeliveryProvider` and
//! never retries internally — retries, if any, are the provider adapter's
//! concern.

use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

/// A rendered, addressed message ready for the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundEmail {
    pub to: String,
    pub from_email: String,
    pub from_name: String,
    pub subject: String,
    pub body: String,
    pub html_body: Option<String>,
    pub workflow_id: Option<Uuid>,
    pub execution_id: Option<Uuid>,
}

/// Result of one send attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    pub success: bool,
    pub provider_message_id: Option<String>,
    pub error: Option<String>,
}

impl DeliveryReceipt {
    pub fn accepted(provider_message_id: String) -> Self {
        Self {
            success: true,
            provider_message_id: Some(provider_message_id),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            provider_message_id: None,
            error: Some(error.into()),
        }
    }
}

/// Narrow contract for the external delivery collaborator.
pub trait DeliveryProvider: Send + Sync {
    fn send(&self, email: &OutboundEmail) -> DeliveryReceipt;
}

/// Development provider: logs the message and reports success with a
/// fabricated provider message id. In production this is replaced by an
/// SMTP/SES/SendGrid adapter behind the same trait.
pub struct LoggingProvider;

impl DeliveryProvider for LoggingProvider {
    fn send(&self, email: &OutboundEmail) -> DeliveryReceipt {
        debug!(
            to = %email.to,
            subject = %email.subject,
            "delivering email (logging provider)"
        );
        metrics::counter!("courseflow.emails_sent").increment(1);
        DeliveryReceipt::accepted(format!("log-{}", Uuid::new_v4()))
    }
}

/// Test double that records every message it is asked to send.
#[derive(Default)]
pub struct CaptureProvider {
    sent: Mutex<Vec<OutboundEmail>>,
}

impl CaptureProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<OutboundEmail> {
        self.sent.lock().expect("capture provider mutex poisoned").clone()
    }

    pub fn count(&self) -> usize {
        self.sent.lock().expect("capture provider mutex poisoned").len()
    }
}

impl DeliveryProvider for CaptureProvider {
    fn send(&self, email: &OutboundEmail) -> DeliveryReceipt {
        self.sent
            .lock()
            .expect("capture provider mutex poisoned")
            .push(email.clone());
        DeliveryReceipt::accepted(format!("capture-{}", Uuid::new_v4()))
    }
}

/// Test double that fails every send.
pub struct FailingProvider {
    pub error: String,
}

impl FailingProvider {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

impl DeliveryProvider for FailingProvider {
    fn send(&self, email: &OutboundEmail) -> DeliveryReceipt {
        warn!(to = %email.to, "delivery failed (failing provider)");
        metrics::counter!("courseflow.emails_failed").increment(1);
        DeliveryReceipt::failed(self.error.clone())
    }
}
