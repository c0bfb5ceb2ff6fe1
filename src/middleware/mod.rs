pub mod idempotency_guard;
pub mod rate_limit;
pub mod tenant;

pub use idempotency_guard::{acquire as acquire_idempotency, is_guarded_endpoint, GuardDecision};
pub use rate_limit::TenantRateLimiter;
pub use tenant::TenantResolver;
