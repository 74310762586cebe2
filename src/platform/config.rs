use std::{env, str::FromStr, time::Duration};

use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub amqp: Option<AmqpConfig>,
    pub business: BusinessConfig,
    pub payment_provider: PaymentProviderConfig,
    pub outbox: OutboxConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone)]
pub struct AmqpConfig {
    pub url: String,
    pub exchange: String,
}

#[derive(Debug, Clone)]
pub struct BusinessConfig {
    /// Offset of the shop's local time from UTC. Defaults to UTC+08:00.
    pub utc_offset_minutes: i32,
}

#[derive(Debug, Clone)]
pub struct PaymentProviderConfig {
    pub url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OutboxConfig {
    pub poll_interval: Duration,
    pub batch_size: i64,
    pub max_attempts: i32,
}

/// Loads configuration from the process environment.
///
/// Call `bootstrap::init_env` first so `.env` values are visible.
pub fn load() -> Result<Config> {
    Ok(Config {
        server: ServerConfig {
            port: parse_or("SERVER_PORT", 3000)?,
        },
        database: DatabaseConfig {
            url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            max_connections: parse_or("DATABASE_MAX_CONNECTIONS", 10)?,
        },
        amqp: env::var("AMQP_URL").ok().map(|url| AmqpConfig {
            url,
            exchange: env::var("AMQP_EXCHANGE").unwrap_or("groombook.events".to_string()),
        }),
        business: BusinessConfig {
            utc_offset_minutes: parse_or("BUSINESS_UTC_OFFSET_MINUTES", 8 * 60)?,
        },
        payment_provider: PaymentProviderConfig {
            url: env::var("PAYMENT_PROVIDER_URL").ok(),
        },
        outbox: OutboxConfig {
            poll_interval: Duration::from_millis(parse_or("OUTBOX_POLL_INTERVAL_MS", 1000)?),
            batch_size: parse_or("OUTBOX_BATCH_SIZE", 50)?,
            max_attempts: parse_or("OUTBOX_MAX_ATTEMPTS", 5)?,
        },
    })
}

fn parse_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} has an invalid value: {}", key, raw)),
        Err(_) => Ok(default),
    }
}
