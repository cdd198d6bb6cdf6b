// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! MQTT broker connection used by the bridge.
//!
//! [`BrokerConnection::connect`] performs the MQTT handshake (with the
//! bridge's last will attached) and hands back two halves:
//!
//! - the [`BrokerConnection`], a cheaply cloneable publishing handle
//! - the [`ConnectionDriver`], which owns the network event loop and must
//!   be polled for anything to reach the broker
//!
//! Publishes are queued on the client's request channel and written by the
//! driver alone, so any number of tasks may publish concurrently. Dropping
//! the driver closes the socket without a DISCONNECT packet, which makes the
//! broker publish the last will.
//!
//! # Examples
//!
//! ```no_run
//! use elro_mqtt::protocol::{BrokerConfig, BrokerConnection, Publisher, QoS};
//!
//! # async fn example() -> elro_mqtt::Result<()> {
//! let config = BrokerConfig::builder()
//!     .broker("192.168.1.50")
//!     .base_topic("home")
//!     .build()?;
//!
//! let (connection, driver) = BrokerConnection::connect(&config).await?;
//! let driver = tokio::spawn(driver.run());
//!
//! connection
//!     .publish("home/elro/status", QoS::AtLeastOnce, true, b"online".to_vec())
//!     .await?;
//! # drop(driver);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet, QoS};

use crate::error::ProtocolError;

use super::{BrokerConfig, Publisher};

/// Capacity of the client's outgoing request queue.
const REQUEST_CAPACITY: usize = 64;

/// Publishing handle to a connected MQTT broker.
///
/// `BrokerConnection` is cheaply cloneable (via `Arc`).
#[derive(Clone)]
pub struct BrokerConnection {
    inner: Arc<ConnectionInner>,
}

struct ConnectionInner {
    client: AsyncClient,
    uri: String,
    connected: AtomicBool,
}

impl BrokerConnection {
    /// Connects to the configured broker and waits for its acknowledgement.
    ///
    /// The last will from [`BrokerConfig::last_will`] is registered with the
    /// broker as part of the handshake.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::ConnectionFailed` if:
    /// - The broker cannot be reached
    /// - The broker refuses the connection
    /// - No acknowledgement arrives within the connection timeout
    pub async fn connect(
        config: &BrokerConfig,
    ) -> Result<(Self, ConnectionDriver), ProtocolError> {
        let mut mqtt_options = MqttOptions::new(config.client_id(), config.host(), config.port());
        mqtt_options.set_keep_alive(config.keep_alive());
        mqtt_options.set_clean_session(true);
        mqtt_options.set_last_will(config.last_will().into());

        if let Some((username, password)) = config.credentials() {
            mqtt_options.set_credentials(username, password);
        }

        let (client, mut event_loop) = AsyncClient::new(mqtt_options, REQUEST_CAPACITY);

        tracing::debug!(
            uri = %config.uri(),
            client_id = %config.client_id(),
            "Connecting to MQTT broker"
        );

        let timeout = config.connection_timeout();
        match tokio::time::timeout(timeout, wait_for_connack(&mut event_loop)).await {
            Ok(Ok(())) => {
                tracing::info!(uri = %config.uri(), "Connected to MQTT broker");
            }
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(ProtocolError::ConnectionFailed(format!(
                    "MQTT connection timeout after {}s",
                    timeout.as_secs()
                )));
            }
        }

        let inner = Arc::new(ConnectionInner {
            client,
            uri: config.uri().to_string(),
            connected: AtomicBool::new(true),
        });

        let driver = ConnectionDriver {
            event_loop,
            connection: Arc::clone(&inner),
        };

        Ok((Self { inner }, driver))
    }

    /// Returns the broker URI.
    #[must_use]
    pub fn uri(&self) -> &str {
        &self.inner.uri
    }

    /// Returns whether the driver still holds a live connection.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Acquire)
    }

    /// Sends a DISCONNECT packet.
    ///
    /// The broker discards the last will on a graceful disconnect.
    ///
    /// # Errors
    ///
    /// Returns error if the request cannot be queued.
    pub async fn disconnect(&self) -> Result<(), ProtocolError> {
        tracing::info!(uri = %self.inner.uri, "Disconnecting from MQTT broker");
        self.inner
            .client
            .disconnect()
            .await
            .map_err(ProtocolError::Mqtt)
    }
}

impl Publisher for BrokerConnection {
    async fn publish(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<(), ProtocolError> {
        self.inner
            .client
            .publish(topic, qos, retain, payload)
            .await
            .map_err(ProtocolError::Mqtt)
    }
}

impl std::fmt::Debug for BrokerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerConnection")
            .field("uri", &self.inner.uri)
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Owner of the MQTT network event loop.
///
/// Nothing is sent or received unless [`run`](Self::run) is being polled.
pub struct ConnectionDriver {
    event_loop: EventLoop,
    connection: Arc<ConnectionInner>,
}

impl ConnectionDriver {
    /// Drives the connection until it fails.
    ///
    /// There is no reconnection: the first network error ends the driver.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::ConnectionFailed` once the connection is
    /// lost or closed by the broker.
    pub async fn run(mut self) -> Result<(), ProtocolError> {
        let result = loop {
            match self.event_loop.poll().await {
                Ok(Event::Incoming(Packet::PubAck(puback))) => {
                    tracing::debug!(pkid = puback.pkid, "MQTT publish acknowledged");
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    tracing::info!("MQTT broker disconnected");
                    break Err(ProtocolError::ConnectionFailed(
                        "broker closed the connection".to_string(),
                    ));
                }
                Ok(Event::Outgoing(rumqttc::Outgoing::Disconnect)) => {
                    tracing::debug!("MQTT disconnect sent");
                    break Ok(());
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(error = %e, "MQTT broker event loop error");
                    break Err(ProtocolError::ConnectionFailed(e.to_string()));
                }
            }
        };

        self.connection.connected.store(false, Ordering::Release);
        result
    }
}

impl std::fmt::Debug for ConnectionDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionDriver")
            .field("uri", &self.connection.uri)
            .finish_non_exhaustive()
    }
}

impl Drop for ConnectionDriver {
    fn drop(&mut self) {
        self.connection.connected.store(false, Ordering::Release);
    }
}

/// Polls the event loop until the broker acknowledges the connection.
async fn wait_for_connack(event_loop: &mut EventLoop) -> Result<(), ProtocolError> {
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(connack))) => {
                tracing::debug!(?connack, "MQTT broker connected");
                if connack.code == ConnectReturnCode::Success {
                    return Ok(());
                }
                return Err(ProtocolError::ConnectionFailed(format!(
                    "broker refused connection: {:?}",
                    connack.code
                )));
            }
            Ok(_) => {}
            Err(e) => return Err(ProtocolError::ConnectionFailed(e.to_string())),
        }
    }
}
