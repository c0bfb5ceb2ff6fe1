//! Layered configuration: defaults -> config/{env}.toml -> env vars.
//! Modeled on `services/obligation-engine/src/config.rs`.

use config::{ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub nats: NatsConfig,
    pub idempotency: IdempotencyConfig,
    pub outbox: OutboxConfig,
    pub saga: SagaConfig,
    pub pg: PgConfig,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: usize,
    /// Base request budget handed to `RequestContext`, seconds.
    pub request_budget_secs: u64,
    /// Max time to wait for in-flight sagas during shutdown drain.
    pub drain_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RedisConfig {
    pub url: String,
    pub pool_size: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct NatsConfig {
    pub url: String,
    pub subject_prefix: String,
    pub dlq_prefix: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct IdempotencyConfig {
    pub ttl_hours: i64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct OutboxConfig {
    pub poll_interval_ms: u64,
    pub batch_size: i64,
    pub max_retries: i32,
    pub janitor_interval_secs: u64,
    pub processing_stale_after_secs: i64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SagaConfig {
    pub lease_seconds: i64,
    pub sweep_interval_secs: u64,
    pub max_compensation_retries: u32,
    pub sweep_batch_size: i64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PgConfig {
    pub base_url: String,
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
    pub total_timeout_ms: u64,
    pub cb_failure_rate_threshold: f64,
    pub cb_min_calls: u32,
    pub cb_open_seconds: u64,
    pub bulkhead_max_concurrent: usize,
    pub approval_max_age_hours: i64,
    pub webhook_hmac_secret: String,
    pub webhook_timestamp_tolerance_secs: i64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RateLimitConfig {
    pub requests_per_second: u32,
    pub burst: u32,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let mut builder = config::Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("server.workers", 4)?
            .set_default("server.request_budget_secs", 15)?
            .set_default("server.drain_timeout_secs", 30)?
            .set_default("database.max_connections", 20)?
            .set_default("database.min_connections", 2)?
            .set_default("redis.pool_size", 10)?
            .set_default("nats.subject_prefix", "fluxpay")?
            .set_default("nats.dlq_prefix", "fluxpay.dlq")?
            .set_default("idempotency.ttl_hours", 24)?
            .set_default("outbox.poll_interval_ms", 100)?
            .set_default("outbox.batch_size", 100)?
            .set_default("outbox.max_retries", 3)?
            .set_default("outbox.janitor_interval_secs", 30)?
            .set_default("outbox.processing_stale_after_secs", 60)?
            .set_default("saga.lease_seconds", 30)?
            .set_default("saga.sweep_interval_secs", 15)?
            .set_default("saga.max_compensation_retries", 3)?
            .set_default("saga.sweep_batch_size", 100)?
            .set_default("pg.connect_timeout_ms", 3000)?
            .set_default("pg.read_timeout_ms", 10000)?
            .set_default("pg.total_timeout_ms", 15000)?
            .set_default("pg.cb_failure_rate_threshold", 0.5)?
            .set_default("pg.cb_min_calls", 10)?
            .set_default("pg.cb_open_seconds", 30)?
            .set_default("pg.bulkhead_max_concurrent", 50)?
            .set_default("pg.approval_max_age_hours", 24)?
            .set_default("pg.webhook_hmac_secret", "")?
            .set_default("pg.webhook_timestamp_tolerance_secs", 300)?
            .set_default("rate_limit.requests_per_second", 50)?
            .set_default("rate_limit.burst", 100)?;

        if let Ok(config_file) = env::var("CONFIG_FILE") {
            builder = builder.add_source(File::with_name(&config_file).required(false));
        } else {
            builder = builder.add_source(
                File::with_name(&format!("config/{}", environment)).required(false),
            );
        }

        builder = builder.add_source(
            Environment::with_prefix("FLUXPAY")
                .separator("__")
                .list_separator(","),
        );

        if let Ok(db_url) = env::var("DATABASE_URL") {
            builder = builder.set_override("database.url", db_url)?;
        }
        if let Ok(redis_url) = env::var("REDIS_URL") {
            builder = builder.set_override("redis.url", redis_url)?;
        }
        if let Ok(nats_url) = env::var("NATS_URL") {
            builder = builder.set_override("nats.url", nats_url)?;
        }
        if let Ok(pg_url) = env::var("PG_BASE_URL") {
            builder = builder.set_override("pg.base_url", pg_url)?;
        }
        if let Ok(secret) = env::var("PG_WEBHOOK_HMAC_SECRET") {
            builder = builder.set_override("pg.webhook_hmac_secret", secret)?;
        }

        builder.build()?.try_deserialize()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("server port cannot be 0".into());
        }
        if self.database.url.is_empty() {
            return Err("database url is required".into());
        }
        if self.redis.url.is_empty() {
            return Err("redis url is required".into());
        }
        if self.nats.url.is_empty() {
            return Err("nats url is required".into());
        }
        if self.pg.cb_failure_rate_threshold <= 0.0 || self.pg.cb_failure_rate_threshold > 1.0 {
            return Err("pg.cb_failure_rate_threshold must be in (0, 1]".into());
        }
        Ok(())
    }
}
