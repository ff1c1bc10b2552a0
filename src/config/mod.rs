//! Configuration module for the AMQP metrics backend.
//!
//! Configuration is read either from environment variables or from a TOML
//! document. Both sources are first collected into a raw, all-optional form
//! and then resolved against the same defaults, so an option left unset means
//! the same thing regardless of where the configuration came from.

mod broker_config;
mod format_config;

pub use broker_config::{BrokerConfig, DEFAULT_PORT, DEFAULT_TLS_PORT, TlsConfig};
pub use format_config::FormatConfig;

use crate::domain::types::MessageFormat;
use anyhow::{Context, Result, bail};
use format_config::normalize_segment;
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_FLUSH_INTERVAL_MS: u64 = 10_000;
const DEFAULT_RETRY_DELAY_MS: u64 = 2_000;
const DEFAULT_OPERATION_TIMEOUT_MS: u64 = 10_000;

/// Complete backend configuration. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    pub broker: BrokerConfig,
    pub format: FormatConfig,
    /// Host flush cadence; informational for the backend itself
    pub flush_interval: Duration,
    /// Fixed delay between reconnect attempts
    pub retry_delay: Duration,
    /// Upper bound for any single connect/channel/publish operation
    pub operation_timeout: Duration,
    pub debug: bool,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            broker: BrokerConfig::default(),
            format: FormatConfig::default(),
            flush_interval: Duration::from_millis(DEFAULT_FLUSH_INTERVAL_MS),
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            operation_timeout: Duration::from_millis(DEFAULT_OPERATION_TIMEOUT_MS),
            debug: false,
        }
    }
}

impl BackendConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup using the environment
    /// variable names (`AMQP_HOST`, `STATSD_FLUSH_COUNTS`, ...).
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        RawConfig::from_lookup(&lookup)?.resolve()
    }

    /// Parse a TOML document.
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let raw: RawConfig = toml::from_str(input).context("Failed to parse backend config")?;
        raw.resolve()
    }

    /// Read and parse a TOML configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    /// Fail fast on a half-valid configuration.
    pub fn validate(&self) -> Result<()> {
        self.broker.validate().context("Invalid broker config")?;
        if self.retry_delay.is_zero() {
            bail!("Reconnect delay must be greater than zero");
        }
        if self.operation_timeout.is_zero() {
            bail!("Operation timeout must be greater than zero");
        }
        Ok(())
    }
}

/// Raw configuration as written by the operator; every field optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawConfig {
    debug: Option<bool>,
    flush_interval: Option<u64>,
    flush_counts: Option<bool>,
    prefix_stats: Option<String>,
    amqp: RawAmqp,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawAmqp {
    host: Option<String>,
    port: Option<u16>,
    login: Option<String>,
    password: Option<String>,
    vhost: Option<String>,
    default_exchange: Option<String>,
    message_format: Option<String>,
    ssl: Option<RawSsl>,
    global_prefix: Option<String>,
    prefix_counter: Option<String>,
    prefix_gauge: Option<String>,
    prefix_timer: Option<String>,
    global_suffix: Option<String>,
    retry_delay_ms: Option<u64>,
    operation_timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawSsl {
    enabled: bool,
    cert_file: Option<PathBuf>,
    key_file: Option<PathBuf>,
    ca_file: Option<PathBuf>,
    passphrase: Option<String>,
    reject_unauthorized: Option<bool>,
}

impl RawConfig {
    fn from_lookup<F>(lookup: &F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let ssl = if parse_var::<bool, _>(lookup, "AMQP_SSL_ENABLED")?.unwrap_or(false) {
            Some(RawSsl {
                enabled: true,
                cert_file: lookup("AMQP_SSL_CERT_FILE").map(PathBuf::from),
                key_file: lookup("AMQP_SSL_KEY_FILE").map(PathBuf::from),
                ca_file: lookup("AMQP_SSL_CA_FILE").map(PathBuf::from),
                passphrase: lookup("AMQP_SSL_PASSPHRASE"),
                reject_unauthorized: parse_var(lookup, "AMQP_SSL_REJECT_UNAUTHORIZED")?,
            })
        } else {
            None
        };

        Ok(Self {
            debug: parse_var(lookup, "STATSD_DEBUG")?,
            flush_interval: parse_var(lookup, "STATSD_FLUSH_INTERVAL")?,
            flush_counts: parse_var(lookup, "STATSD_FLUSH_COUNTS")?,
            prefix_stats: lookup("STATSD_PREFIX_STATS"),
            amqp: RawAmqp {
                host: lookup("AMQP_HOST"),
                port: parse_var(lookup, "AMQP_PORT")?,
                login: lookup("AMQP_LOGIN"),
                password: lookup("AMQP_PASSWORD"),
                vhost: lookup("AMQP_VHOST"),
                default_exchange: lookup("AMQP_EXCHANGE"),
                message_format: lookup("AMQP_MESSAGE_FORMAT"),
                ssl,
                global_prefix: lookup("AMQP_GLOBAL_PREFIX"),
                prefix_counter: lookup("AMQP_PREFIX_COUNTER"),
                prefix_gauge: lookup("AMQP_PREFIX_GAUGE"),
                prefix_timer: lookup("AMQP_PREFIX_TIMER"),
                global_suffix: lookup("AMQP_GLOBAL_SUFFIX"),
                retry_delay_ms: parse_var(lookup, "AMQP_RETRY_DELAY_MS")?,
                operation_timeout_ms: parse_var(lookup, "AMQP_OPERATION_TIMEOUT_MS")?,
            },
        })
    }

    fn resolve(self) -> Result<BackendConfig> {
        let defaults = BackendConfig::default();
        let amqp = self.amqp;

        let format = match amqp.message_format {
            Some(raw) => MessageFormat::from_str(&raw)?,
            None => defaults.format.format,
        };

        let tls = match amqp.ssl {
            Some(ssl) if ssl.enabled => Some(TlsConfig {
                cert_file: ssl.cert_file.unwrap_or_default(),
                key_file: ssl.key_file.unwrap_or_default(),
                ca_file: ssl.ca_file.unwrap_or_default(),
                passphrase: ssl.passphrase.unwrap_or_default(),
                reject_unauthorized: ssl.reject_unauthorized.unwrap_or(false),
            }),
            _ => None,
        };
        let default_port = if tls.is_some() {
            DEFAULT_TLS_PORT
        } else {
            DEFAULT_PORT
        };

        let broker = BrokerConfig {
            host: amqp.host.unwrap_or(defaults.broker.host),
            port: amqp.port.unwrap_or(default_port),
            login: amqp.login.unwrap_or(defaults.broker.login),
            password: amqp.password.unwrap_or(defaults.broker.password),
            vhost: amqp.vhost.unwrap_or(defaults.broker.vhost),
            exchange: amqp.default_exchange.unwrap_or(defaults.broker.exchange),
            tls,
        };

        let segment = |raw: Option<String>, default: String| {
            raw.map(|s| normalize_segment(&s)).unwrap_or(default)
        };
        let format = FormatConfig {
            format,
            global_prefix: segment(amqp.global_prefix, defaults.format.global_prefix),
            prefix_counter: segment(amqp.prefix_counter, defaults.format.prefix_counter),
            prefix_gauge: segment(amqp.prefix_gauge, defaults.format.prefix_gauge),
            prefix_timer: segment(amqp.prefix_timer, defaults.format.prefix_timer),
            global_suffix: segment(amqp.global_suffix, defaults.format.global_suffix),
            prefix_stats: segment(self.prefix_stats, defaults.format.prefix_stats),
            flush_counts: self.flush_counts.unwrap_or(defaults.format.flush_counts),
        };

        let config = BackendConfig {
            broker,
            format,
            flush_interval: self
                .flush_interval
                .map(Duration::from_millis)
                .unwrap_or(defaults.flush_interval),
            retry_delay: amqp
                .retry_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_delay),
            operation_timeout: amqp
                .operation_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.operation_timeout),
            debug: self.debug.unwrap_or(defaults.debug),
        };
        config.validate()?;
        Ok(config)
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("Invalid {}='{}': {}", key, raw, e)),
        _ => Ok(None),
    }
}
