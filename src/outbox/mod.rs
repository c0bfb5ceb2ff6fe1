pub mod janitor;
pub mod publisher;

pub use janitor::OutboxJanitor;
pub use publisher::OutboxPublisher;
