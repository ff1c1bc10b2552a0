//! lapin-backed implementation of the broker ports.

use crate::config::{BrokerConfig, TlsConfig};
use crate::domain::errors::BrokerError;
use crate::domain::ports::{BrokerChannel, BrokerConnection, BrokerConnector};
use crate::domain::types::{MessageProperties, PublishRecord};
use crate::infrastructure::close_watch::wait_for_close;
use anyhow::{Context, Result};
use async_trait::async_trait;
use lapin::options::{BasicPublishOptions, ExchangeDeclareOptions};
use lapin::tcp::{OwnedIdentity, OwnedTLSConfig};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

const PERSISTENT_DELIVERY: u8 = 2;
const STATUS_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// TLS material read from disk once, at startup.
#[derive(Clone)]
struct TlsMaterial {
    ca_chain: String,
    /// PKCS#12 client bundle
    identity_der: Vec<u8>,
    password: String,
}

impl TlsMaterial {
    fn load(tls: &TlsConfig) -> Result<Self> {
        tls.validate()?;
        let ca_chain = std::fs::read_to_string(&tls.ca_file)
            .with_context(|| format!("Failed to read CA file {}", tls.ca_file.display()))?;
        let identity_der = std::fs::read(&tls.cert_file)
            .with_context(|| format!("Failed to read cert file {}", tls.cert_file.display()))?;

        if !tls.reject_unauthorized {
            warn!("AMQP TLS: reject_unauthorized=false is not supported; broker certificates are always verified");
        }

        Ok(Self {
            ca_chain,
            identity_der,
            password: tls.passphrase.clone(),
        })
    }

    fn to_lapin(&self) -> OwnedTLSConfig {
        OwnedTLSConfig {
            identity: Some(OwnedIdentity {
                der: self.identity_der.clone(),
                password: self.password.clone(),
            }),
            cert_chain: Some(self.ca_chain.clone()),
        }
    }
}

/// Opens AMQP 0-9-1 connections with lapin
pub struct LapinConnector {
    uri: String,
    redacted_uri: String,
    tls: Option<TlsMaterial>,
}

impl LapinConnector {
    /// Build a connector, reading any TLS material up front.
    pub fn from_config(config: &BrokerConfig) -> Result<Self> {
        let tls = config.tls.as_ref().map(TlsMaterial::load).transpose()?;
        Ok(Self {
            uri: config.connection_uri(),
            redacted_uri: config.redacted_uri(),
            tls,
        })
    }
}

#[async_trait]
impl BrokerConnector for LapinConnector {
    async fn connect(&self) -> Result<Arc<dyn BrokerConnection>, BrokerError> {
        debug!("Connecting to AMQP broker: {}", self.redacted_uri);

        let properties = ConnectionProperties::default();
        let result = match &self.tls {
            Some(tls) => Connection::connect_with_config(&self.uri, properties, tls.to_lapin()).await,
            None => Connection::connect(&self.uri, properties).await,
        };
        let connection = result.map_err(|e| BrokerError::Connect {
            reason: e.to_string(),
        })?;

        let (signal, errors) = watch::channel(None);
        connection.on_error(move |err| {
            signal.send_replace(Some(err.to_string()));
        });

        info!("AMQP connection established: {}", self.redacted_uri);
        Ok(Arc::new(LapinConnection { connection, errors }))
    }
}

struct LapinConnection {
    connection: Connection,
    errors: watch::Receiver<Option<String>>,
}

#[async_trait]
impl BrokerConnection for LapinConnection {
    async fn open_channel(&self) -> Result<Box<dyn BrokerChannel>, BrokerError> {
        let channel = self
            .connection
            .create_channel()
            .await
            .map_err(|e| BrokerError::Channel {
                reason: e.to_string(),
            })?;
        Ok(Box::new(LapinChannel { channel }))
    }

    async fn closed(&self) -> String {
        // A broker-initiated Connection.Close with reply code 200 skips the error hook
        wait_for_close(self.errors.clone(), STATUS_POLL_INTERVAL, || {
            let status = self.connection.status();
            (status.closed() || status.errored())
                .then(|| format!("connection {:?}", status.state()))
        })
        .await
    }
}

struct LapinChannel {
    channel: Channel,
}

#[async_trait]
impl BrokerChannel for LapinChannel {
    async fn declare_topic_exchange(&self, exchange: &str) -> Result<(), BrokerError> {
        self.channel
            .exchange_declare(
                exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..ExchangeDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::ExchangeDeclare {
                exchange: exchange.to_string(),
                reason: e.to_string(),
            })
    }

    async fn publish(
        &self,
        exchange: &str,
        record: &PublishRecord,
        properties: &MessageProperties,
    ) -> Result<(), BrokerError> {
        let mut amqp_properties = BasicProperties::default()
            .with_content_type(properties.content_type.into())
            .with_app_id(properties.app_id.into());
        if properties.persistent {
            amqp_properties = amqp_properties.with_delivery_mode(PERSISTENT_DELIVERY);
        }

        let to_error = |e: lapin::Error| BrokerError::Publish {
            routing_key: record.routing_key.clone(),
            reason: e.to_string(),
        };

        self.channel
            .basic_publish(
                exchange,
                &record.routing_key,
                BasicPublishOptions::default(),
                &record.payload,
                amqp_properties,
            )
            .await
            .map_err(to_error)?
            .await
            .map_err(to_error)?;
        Ok(())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.channel
            .close(200, "OK")
            .await
            .map_err(|e| BrokerError::Channel {
                reason: e.to_string(),
            })
    }
}
