//! Per-session webhooks: configuration, event catalog, signing and delivery.

pub mod dispatcher;
pub mod domain;
pub mod events;
pub mod signing;

pub use dispatcher::{
    dispatch_channel, AttemptResult, Deliverer, DeliveryOutcome, DispatchSender, OutboundRequest,
    ReqwestSender, Sleeper, TokioSleeper, WebhookDispatcher, WebhookEvent, WebhookSender,
};
pub use domain::{has_event, WebhookService};
pub use events::{catalog, EventCatalog, EventCategory, EventType, ALL_EVENTS};
pub use signing::{generate_signature, verify_signature};
