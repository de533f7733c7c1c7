//! Outbound webhook dispatcher (§4.9).

pub mod dispatcher;

pub use dispatcher::{FailurePayload, SuccessPayload, WebhookDispatcher};
