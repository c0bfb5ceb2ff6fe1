pub mod cache;
pub mod config;
pub mod context;
pub mod credit;
pub mod db;
pub mod error;
pub mod event_bus;
pub mod handlers;
pub mod idempotency;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod outbox;
pub mod payment;
pub mod saga;
pub mod services;

pub use config::Config;
pub use error::{AppError, Result};
