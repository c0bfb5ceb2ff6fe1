pub mod credit;
pub mod idempotency;
pub mod order;
pub mod outbox;
pub mod payment;
pub mod refund;
pub mod saga;

pub use credit::*;
pub use idempotency::*;
pub use order::*;
pub use outbox::*;
pub use payment::*;
pub use refund::*;
pub use saga::*;
