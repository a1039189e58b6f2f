//! Typed event bus and websocket/SSE broadcast hub.

mod bus;
mod hub;
mod webhook;

pub use bus::{DomainEvent, EventBus, Subscription};
pub use hub::WebsocketHub;
pub use webhook::{sign_payload, verify_signature, WebhookEvent};
