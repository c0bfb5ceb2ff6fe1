pub mod pg_client;
pub mod resilience;
pub mod webhook;

pub use pg_client::{ApprovalRequest, ApprovalResponse, HttpPgClient, PgClient, RefundResponse};
pub use resilience::{CircuitState, ResilientPgClient};
pub use webhook::{WebhookOutcome, WebhookPayload, WebhookProcessor, WebhookStatus, WebhookVerifier};
