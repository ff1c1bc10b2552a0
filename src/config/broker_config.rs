//! Broker connection configuration.
//!
//! Covers the AMQP endpoint, credentials, target exchange and the optional
//! TLS block.

use anyhow::{Result, bail};
use std::path::PathBuf;
use url::form_urlencoded;

pub const DEFAULT_PORT: u16 = 5672;
pub const DEFAULT_TLS_PORT: u16 = 5671;

/// TLS material locations and verification policy
///
/// The client identity is a PKCS#12 bundle (certificate and private key in
/// one file, e.g. from `openssl pkcs12 -export`). Separate PEM key files are
/// rejected because the AMQP client only accepts PKCS#12 identities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsConfig {
    /// PKCS#12 client bundle
    pub cert_file: PathBuf,
    /// Must stay unset; only kept to reject PEM key pairs with a clear error
    pub key_file: PathBuf,
    /// PEM CA chain used to verify the broker
    pub ca_file: PathBuf,
    /// Password of the PKCS#12 bundle, may be empty
    pub passphrase: String,
    pub reject_unauthorized: bool,
}

impl TlsConfig {
    /// The bundle and CA chain must exist; a separate key file is an error.
    pub fn validate(&self) -> Result<()> {
        if !self.key_file.as_os_str().is_empty() {
            bail!(
                "TLS key_file ({}) is not supported: bundle certificate and key into a PKCS#12 cert_file and set the passphrase",
                self.key_file.display()
            );
        }
        for (label, path) in [("cert_file", &self.cert_file), ("ca_file", &self.ca_file)] {
            if path.as_os_str().is_empty() {
                bail!("TLS is enabled but {} is not set", label);
            }
            if !path.is_file() {
                bail!("TLS {} not found: {}", label, path.display());
            }
        }
        Ok(())
    }
}

/// AMQP endpoint configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub login: String,
    pub password: String,
    pub vhost: String,
    /// Target topic exchange; `""` is the broker's default exchange
    pub exchange: String,
    pub tls: Option<TlsConfig>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            login: "guest".to_string(),
            password: "guest".to_string(),
            vhost: "/".to_string(),
            exchange: String::new(),
            tls: None,
        }
    }
}

impl BrokerConfig {
    pub fn scheme(&self) -> &'static str {
        if self.tls.is_some() { "amqps" } else { "amqp" }
    }

    /// `amqp[s]://login:password@host:port/vhost` with every user-supplied
    /// component percent-encoded.
    pub fn connection_uri(&self) -> String {
        format!(
            "{}://{}:{}@{}:{}/{}",
            self.scheme(),
            encode_component(&self.login),
            encode_component(&self.password),
            self.host,
            self.port,
            encode_component(&self.vhost)
        )
    }

    /// Same as [`connection_uri`](Self::connection_uri) with the password masked.
    pub fn redacted_uri(&self) -> String {
        format!(
            "{}://{}:***@{}:{}/{}",
            self.scheme(),
            encode_component(&self.login),
            self.host,
            self.port,
            encode_component(&self.vhost)
        )
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            bail!("Broker host must not be empty");
        }
        if self.port == 0 {
            bail!("Broker port must not be 0");
        }
        if let Some(tls) = &self.tls {
            tls.validate()?;
        }
        Ok(())
    }
}

fn encode_component(raw: &str) -> String {
    // form encoding turns spaces into '+', which URIs read literally
    form_urlencoded::byte_serialize(raw.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}
