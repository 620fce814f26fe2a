//! Runtime configuration: CLI flags with environment overrides.
//!
//! Flags are parsed first; a set environment variable always wins. The
//! resulting value is constructed once in `main` and passed through
//! constructors; nothing reads configuration globally.

use anyhow::Result;
use clap::Parser;

use crate::accrual::DEFAULT_POLL_INTERVAL_MS;

#[derive(Parser, Debug, Clone)]
#[command(name = "bonusledger", about = "Loyalty points service", version)]
pub struct Options {
    /// Address and port to run the server on
    #[arg(short = 'a', long = "run-address", default_value = ":8080")]
    pub run_address: String,

    /// Log level
    #[arg(short = 'l', long = "log-level", default_value = "info")]
    pub log_level: String,

    /// Postgres DSN; empty runs the service without durable storage
    #[arg(short = 'd', long = "database-uri", default_value = "")]
    pub database_uri: String,

    /// JWT signing key
    #[arg(short = 'j', long = "jwt-signing-key", default_value = "test_key")]
    pub jwt_signing_key: String,

    /// Accrual system base address
    #[arg(short = 'r', long = "accrual-address", default_value = ":8082")]
    pub accrual_address: String,

    /// Number of accrual poll workers
    #[arg(short = 'c', long = "concurrency", default_value_t = 5)]
    pub concurrency: usize,

    /// Accrual dispatcher tick, milliseconds
    #[arg(long = "poll-interval", default_value_t = DEFAULT_POLL_INTERVAL_MS)]
    pub poll_interval_ms: u64,
}

impl Options {
    /// Apply environment variable overrides. Environment takes precedence
    /// over flags:
    ///
    /// - `RUN_ADDRESS`
    /// - `LOG_LEVEL`
    /// - `DATABASE_URI`
    /// - `JWT_SIGNING_KEY`
    /// - `ACCRUAL_SYSTEM_ADDRESS`
    /// - `CONCURRENCY`
    pub fn apply_env_overrides(&mut self) {
        if let Ok(addr) = std::env::var("RUN_ADDRESS") {
            if !addr.is_empty() {
                self.run_address = addr;
            }
        }
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            if !level.is_empty() {
                self.log_level = level;
            }
        }
        if let Ok(dsn) = std::env::var("DATABASE_URI") {
            if !dsn.is_empty() {
                self.database_uri = dsn;
            }
        }
        if let Ok(key) = std::env::var("JWT_SIGNING_KEY") {
            if !key.is_empty() {
                self.jwt_signing_key = key;
            }
        }
        if let Ok(addr) = std::env::var("ACCRUAL_SYSTEM_ADDRESS") {
            if !addr.is_empty() {
                self.accrual_address = addr;
            }
        }
        if let Ok(concurrency) = std::env::var("CONCURRENCY") {
            match concurrency.parse::<usize>() {
                Ok(n) => self.concurrency = n,
                Err(_) => {
                    tracing::warn!(value = %concurrency, "cannot parse CONCURRENCY, keeping {}", self.concurrency);
                }
            }
        }
    }

    /// Validate configuration at startup.
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            anyhow::bail!(
                "invalid log level '{}': must be one of {:?}",
                self.log_level,
                valid_levels
            );
        }

        if self.concurrency == 0 {
            anyhow::bail!("invalid concurrency: must be > 0");
        }

        if self.poll_interval_ms == 0 {
            anyhow::bail!("invalid poll interval: must be > 0");
        }

        Ok(())
    }

    /// The bindable form of `run_address`: a bare `:port` listens on all
    /// interfaces.
    pub fn listen_addr(&self) -> String {
        if self.run_address.starts_with(':') {
            format!("0.0.0.0{}", self.run_address)
        } else {
            self.run_address.clone()
        }
    }
}
