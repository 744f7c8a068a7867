//! Inbound gateway notifications: source checks, signature, replay protection, payload.

pub mod authenticator;
pub mod nonce;
pub mod payload;
pub mod source_ip;

pub use authenticator::{WebhookAuthenticator, WebhookRejection};
pub use nonce::{MemoryNonceStore, NonceStore, NonceStoreError};
pub use payload::{AuthenticatedWebhook, EventFamily, EventKind, Notification};
