//! Webhook Event Types
//!
//! Strongly-typed representation of one provider delivery. An envelope is
//! decoded once per delivery attempt and discarded after processing; only
//! its id and outcome survive, in the idempotency ledger.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::billing::subscription::PlanTier;
use crate::webhook::error::DecodeError;

/// Event kinds this consumer acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// A checkout session completed and a subscription period was paid for
    #[serde(rename = "checkout.completed")]
    CheckoutCompleted,

    /// Plan tier or billing period changed
    #[serde(rename = "subscription.updated")]
    SubscriptionUpdated,

    /// The subscription ended
    #[serde(rename = "subscription.cancelled")]
    SubscriptionCancelled,

    /// A renewal payment failed
    #[serde(rename = "invoice.payment_failed")]
    InvoicePaymentFailed,

    /// A payment cleared, possibly after earlier failures
    #[serde(rename = "invoice.payment_succeeded")]
    InvoicePaymentSucceeded,

    /// Catch-all for event types we don't explicitly handle
    #[serde(other)]
    Unknown,
}

impl FromStr for EventKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "checkout.completed" => Self::CheckoutCompleted,
            "subscription.updated" => Self::SubscriptionUpdated,
            "subscription.cancelled" => Self::SubscriptionCancelled,
            "invoice.payment_failed" => Self::InvoicePaymentFailed,
            "invoice.payment_succeeded" => Self::InvoicePaymentSucceeded,
            _ => Self::Unknown,
        })
    }
}

impl EventKind {
    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CheckoutCompleted => "checkout.completed",
            Self::SubscriptionUpdated => "subscription.updated",
            Self::SubscriptionCancelled => "subscription.cancelled",
            Self::InvoicePaymentFailed => "invoice.payment_failed",
            Self::InvoicePaymentSucceeded => "invoice.payment_succeeded",
            Self::Unknown => "unknown",
        }
    }

    /// Check if this is a known event kind
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

/// One decoded webhook delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Provider-assigned unique id; the idempotency key
    pub id: String,

    /// Raw event type string
    #[serde(rename = "type")]
    pub event_type: String,

    /// When the event occurred at the provider.
    ///
    /// Used for ordering decisions only, never for idempotency.
    #[serde(with = "chrono::serde::ts_seconds")]
    pub occurred_at: DateTime<Utc>,

    /// Object containing event data
    pub data: EventData,
}

/// Event data container
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventData {
    /// The kind-specific payload object
    pub object: serde_json::Value,
}

impl EventEnvelope {
    /// Decode raw delivery bytes into an envelope.
    ///
    /// An unrecognized event type does NOT fail here; it surfaces as
    /// [`EventKind::Unknown`] so the caller can acknowledge and ignore it.
    pub fn decode(raw_body: &[u8]) -> Result<Self, DecodeError> {
        serde_json::from_slice(raw_body).map_err(|e| DecodeError::InvalidFormat(e.to_string()))
    }

    /// Get the typed event kind
    pub fn kind(&self) -> EventKind {
        // Infallible error type means this can never fail
        EventKind::from_str(&self.event_type).unwrap()
    }

    /// The typed kind, or `UnknownType` for event types this consumer does
    /// not recognize. Callers acknowledge and ignore those rather than
    /// rejecting: the provider adds event types faster than consumers do.
    pub fn known_kind(&self) -> Result<EventKind, DecodeError> {
        match self.kind() {
            EventKind::Unknown => Err(DecodeError::UnknownType(self.event_type.clone())),
            kind => Ok(kind),
        }
    }

    /// Extract the plan change carried by checkout and update events.
    pub fn plan_change_payload(&self) -> Result<PlanChangePayload, DecodeError> {
        match self.kind() {
            EventKind::CheckoutCompleted | EventKind::SubscriptionUpdated => {
                serde_json::from_value(self.data.object.clone())
                    .map_err(|e| DecodeError::InvalidFormat(e.to_string()))
            }
            _ => Err(DecodeError::InvalidFormat(format!(
                "event {} carries no plan change",
                self.event_type
            ))),
        }
    }

    /// Extract the provider customer reference every known event carries.
    pub fn customer_ref(&self) -> Result<String, DecodeError> {
        let payload: CustomerRefPayload = serde_json::from_value(self.data.object.clone())
            .map_err(|e| DecodeError::InvalidFormat(e.to_string()))?;
        Ok(payload.customer)
    }
}

/// Plan tier and period carried by checkout and subscription-update events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanChangePayload {
    /// Provider customer reference
    pub customer: String,

    /// Plan tier the tenant paid for
    pub plan_tier: PlanTier,

    /// End of the paid-for period
    #[serde(with = "chrono::serde::ts_seconds")]
    pub current_period_end: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
struct CustomerRefPayload {
    customer: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind_parsing() {
        assert_eq!(
            EventKind::from_str("checkout.completed").unwrap(),
            EventKind::CheckoutCompleted
        );
        assert_eq!(
            EventKind::from_str("invoice.payment_failed").unwrap(),
            EventKind::InvoicePaymentFailed
        );
        assert_eq!(EventKind::from_str("refund.created").unwrap(), EventKind::Unknown);
    }

    #[test]
    fn test_kind_roundtrip() {
        for kind in [
            EventKind::CheckoutCompleted,
            EventKind::SubscriptionUpdated,
            EventKind::SubscriptionCancelled,
            EventKind::InvoicePaymentFailed,
            EventKind::InvoicePaymentSucceeded,
        ] {
            assert_eq!(EventKind::from_str(kind.as_str()).unwrap(), kind);
            assert!(kind.is_known());
        }
        assert!(!EventKind::Unknown.is_known());
    }

    #[test]
    fn test_decode_checkout_event() {
        let json = r#"{
            "id": "evt_1234567890",
            "type": "checkout.completed",
            "occurred_at": 1717000000,
            "data": {
                "object": {
                    "customer": "cus_1234567890",
                    "plan_tier": "pro",
                    "current_period_end": 1719592000
                }
            }
        }"#;

        let event = EventEnvelope::decode(json.as_bytes()).unwrap();
        assert_eq!(event.id, "evt_1234567890");
        assert_eq!(event.kind(), EventKind::CheckoutCompleted);
        assert_eq!(event.occurred_at.timestamp(), 1717000000);

        let plan = event.plan_change_payload().unwrap();
        assert_eq!(plan.customer, "cus_1234567890");
        assert_eq!(plan.plan_tier, PlanTier::Pro);
        assert_eq!(plan.current_period_end.timestamp(), 1719592000);

        assert_eq!(event.customer_ref().unwrap(), "cus_1234567890");
    }

    #[test]
    fn test_decode_unknown_type_succeeds() {
        let json = r#"{
            "id": "evt_x",
            "type": "payout.settled",
            "occurred_at": 1717000000,
            "data": { "object": {} }
        }"#;

        let event = EventEnvelope::decode(json.as_bytes()).unwrap();
        assert_eq!(event.kind(), EventKind::Unknown);
        assert_eq!(event.event_type, "payout.settled");
        assert!(matches!(event.known_kind(), Err(DecodeError::UnknownType(_))));
    }

    #[test]
    fn test_decode_malformed_body_fails() {
        for raw in [&b"not json"[..], b"", b"{\"id\":\"evt_1\"}"] {
            assert!(matches!(
                EventEnvelope::decode(raw),
                Err(DecodeError::InvalidFormat(_))
            ));
        }
    }

    #[test]
    fn test_plan_change_rejected_for_wrong_kind() {
        let json = r#"{
            "id": "evt_c",
            "type": "subscription.cancelled",
            "occurred_at": 1717000000,
            "data": { "object": { "customer": "cus_1" } }
        }"#;

        let event = EventEnvelope::decode(json.as_bytes()).unwrap();
        assert!(event.plan_change_payload().is_err());
        assert_eq!(event.customer_ref().unwrap(), "cus_1");
    }

    #[test]
    fn test_missing_customer_ref_fails() {
        let json = r#"{
            "id": "evt_c",
            "type": "subscription.cancelled",
            "occurred_at": 1717000000,
            "data": { "object": {} }
        }"#;

        let event = EventEnvelope::decode(json.as_bytes()).unwrap();
        assert!(matches!(event.customer_ref(), Err(DecodeError::InvalidFormat(_))));
    }
}
