//! Translation of domain events into signed webhook payloads for external
//! consumers subscribing to the read-only event stream.

use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;

use crate::bus::DomainEvent;

type HmacSha256 = Hmac<Sha256>;

/// Outbound DTO mirroring a `DomainEvent`, stripped of internal framing.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookEvent {
    pub event_type: String,
    pub payload: serde_json::Value,
}

impl From<&DomainEvent> for WebhookEvent {
    fn from(event: &DomainEvent) -> Self {
        Self {
            event_type: event.event_type().to_string(),
            payload: serde_json::to_value(event).unwrap_or(serde_json::Value::Null),
        }
    }
}

/// Signs a webhook body with HMAC-SHA256, returning the lowercase hex
/// digest a receiver verifies against the `X-Webhook-Signature` header,
/// sent as `sha256=<digest>` alongside `X-Webhook-Event` and
/// `X-Webhook-Delivery`.
pub fn sign_payload(secret: &str, body: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts a key of any length");
    mac.update(body.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Verifies a received signature in constant time via `Mac::verify_slice`.
pub fn verify_signature(secret: &str, body: &str, signature_hex: &str) -> bool {
    let Ok(signature) = hex::decode(signature_hex) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body.as_bytes());
    mac.verify_slice(&signature).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn webhook_event_carries_the_event_type_tag() {
        let event = DomainEvent::RemediationRequested { action_id: Uuid::nil() };
        let webhook: WebhookEvent = (&event).into();
        assert_eq!(webhook.event_type, "remediation.requested");
    }

    #[test]
    fn signature_round_trips() {
        let body = r#"{"hello":"world"}"#;
        let signature = sign_payload("shared-secret", body);
        assert!(verify_signature("shared-secret", body, &signature));
    }

    #[test]
    fn tampered_body_fails_verification() {
        let body = r#"{"hello":"world"}"#;
        let signature = sign_payload("shared-secret", body);
        assert!(!verify_signature("shared-secret", r#"{"hello":"mallory"}"#, &signature));
    }

    #[test]
    fn wrong_secret_fails_verification() {
        let body = r#"{"hello":"world"}"#;
        let signature = sign_payload("shared-secret", body);
        assert!(!verify_signature("different-secret", body, &signature));
    }
}
