// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The bridge between a [`Hub`] and an MQTT broker.
//!
//! A [`Bridge`] run opens one supervised scope:
//!
//! ```text
//! Bridge::run
//!   └─ BrokerConnection::connect        (last will: <base>/elro/status = offline)
//!        └─ publish <base>/elro/status = online (retained)
//!             └─ Supervisor
//!                  ├─ ConnectionDriver::run
//!                  └─ DiscoveryLoop → per device:
//!                       ├─ alarm task   → <base>/elro/<name or id> = alarm
//!                       └─ update task  → <base>/elro/<name or id> = state JSON
//! ```
//!
//! Leaving the scope for any reason (cancellation, connection loss, a failed
//! publish) stops every task and drops the connection; the broker then
//! publishes the last will.

mod discovery;
mod state;
mod supervisor;
mod watcher;

pub use state::BridgeState;
pub use supervisor::Supervisor;
pub use watcher::{ALARM_PAYLOAD, DeviceWatcher};

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::hub::{Discoveries, Hub};
use crate::protocol::{
    BrokerConfig, BrokerConnection, ConnectionDriver, ONLINE_PAYLOAD, Publisher, QoS, TopicNamer,
};

use discovery::DiscoveryLoop;

/// Publishes hub device alarms and updates to an MQTT broker.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// use elro_mqtt::bridge::Bridge;
/// use elro_mqtt::hub::{Device, Hub};
/// use elro_mqtt::protocol::BrokerConfig;
///
/// #[tokio::main]
/// async fn main() -> elro_mqtt::Result<()> {
///     let config = BrokerConfig::builder()
///         .broker("192.168.1.50")
///         .base_topic("home")
///         .build()?;
///
///     let hub = Arc::new(Hub::new());
///     let bridge = Bridge::new(config);
///
///     // Stop the bridge after an hour
///     let cancel = bridge.cancellation_token();
///     tokio::spawn(async move {
///         tokio::time::sleep(Duration::from_secs(3600)).await;
///         cancel.cancel();
///     });
///
///     hub.register(Device::new("42").with_name("Kitchen"));
///     bridge.run(&hub).await
/// }
/// ```
#[derive(Debug)]
pub struct Bridge {
    config: BrokerConfig,
    state_tx: watch::Sender<BridgeState>,
    cancel: CancellationToken,
    watched: AtomicUsize,
}

impl Bridge {
    /// Creates a bridge for the given broker configuration.
    #[must_use]
    pub fn new(config: BrokerConfig) -> Self {
        let (state_tx, _) = watch::channel(BridgeState::Disconnected);
        Self {
            config,
            state_tx,
            cancel: CancellationToken::new(),
            watched: AtomicUsize::new(0),
        }
    }

    /// Returns the broker configuration.
    #[must_use]
    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Returns the topic namer for the configured base topic.
    #[must_use]
    pub fn namer(&self) -> &TopicNamer {
        self.config.namer()
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> BridgeState {
        self.state_tx.borrow().clone()
    }

    /// Returns a receiver notified on every lifecycle transition.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<BridgeState> {
        self.state_tx.subscribe()
    }

    /// Returns the number of devices watched so far.
    #[must_use]
    pub fn watched_devices(&self) -> usize {
        self.watched.load(Ordering::Relaxed)
    }

    /// Returns the token that stops a running bridge.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stops a running bridge. Every watcher task is cancelled.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Connects to the broker and forwards device notifications until
    /// cancelled.
    ///
    /// Takes the hub's discovery sequence, so a hub can only be bridged once.
    /// A bridge cancelled before it is connected returns `Ok` without
    /// publishing anything.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The hub's discovery sequence was already taken
    /// - The broker connection cannot be established
    /// - The connection is lost while running
    /// - A publish fails
    pub async fn run(&self, hub: &Hub) -> Result<()> {
        let discoveries = hub.discoveries().ok_or(Error::DiscoveryUnavailable)?;

        self.set_state(BridgeState::Connecting);
        let connected = tokio::select! {
            biased;
            () = self.cancel.cancelled() => {
                tracing::info!("Bridge cancelled before connecting");
                self.set_state(BridgeState::Cancelled);
                return Ok(());
            }
            connected = BrokerConnection::connect(&self.config) => connected,
        };
        let (connection, driver) = match connected {
            Ok(connected) => connected,
            Err(e) => return Err(self.fail(e.into())),
        };

        self.run_scope(Arc::new(connection), Some(driver), hub, discoveries)
            .await
    }

    /// Forwards device notifications through an already connected publisher.
    ///
    /// Announces `online` on the status topic first, then runs discovery
    /// until cancelled. Nothing is published once the bridge is cancelled.
    /// The publisher's transport is not managed here.
    ///
    /// # Errors
    ///
    /// Returns error if a publish fails or a watcher task panics.
    pub async fn run_with_publisher<P: Publisher>(
        &self,
        publisher: Arc<P>,
        hub: &Hub,
        discoveries: Discoveries,
    ) -> Result<()> {
        self.run_scope(publisher, None, hub, discoveries).await
    }

    async fn run_scope<P: Publisher>(
        &self,
        publisher: Arc<P>,
        driver: Option<ConnectionDriver>,
        hub: &Hub,
        mut discoveries: Discoveries,
    ) -> Result<()> {
        let mut supervisor = Supervisor::with_token(self.cancel.child_token());

        if let Some(driver) = driver {
            supervisor.spawn("connection", async move {
                driver.run().await.map_err(Error::from)
            });
        }

        let result = self
            .announce_and_discover(publisher, hub, &mut discoveries, &mut supervisor)
            .await;

        supervisor.shutdown().await;

        match result {
            Ok(()) => {
                if self.cancel.is_cancelled() {
                    tracing::info!(devices = self.watched_devices(), "Bridge cancelled");
                } else {
                    tracing::info!(
                        devices = self.watched_devices(),
                        "Device discovery ended and every watcher stopped"
                    );
                }
                self.set_state(BridgeState::Cancelled);
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    async fn announce_and_discover<P: Publisher>(
        &self,
        publisher: Arc<P>,
        hub: &Hub,
        discoveries: &mut Discoveries,
        supervisor: &mut Supervisor,
    ) -> Result<()> {
        let namer = self.config.namer().clone();
        let status_topic = namer.status_topic();

        let cancel = supervisor.cancellation_token();
        let payload = ONLINE_PAYLOAD.to_vec();
        let online = publisher.publish(&status_topic, QoS::AtLeastOnce, true, payload);

        self.set_state(BridgeState::Announcing);
        tracing::info!(topic = %status_topic, "Announcing bridge online");
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                tracing::debug!("Bridge cancelled before announcing online");
                return Ok(());
            }
            published = online => published?,
        }

        self.set_state(BridgeState::Running);
        DiscoveryLoop::new(hub, publisher, namer, &self.watched)
            .run(discoveries, supervisor)
            .await
    }

    fn fail(&self, error: Error) -> Error {
        tracing::error!(error = %error, "Bridge failed");
        self.set_state(BridgeState::Failed(error.to_string()));
        error
    }

    fn set_state(&self, state: BridgeState) {
        tracing::debug!(state = %state, "Bridge state changed");
        self.state_tx.send_replace(state);
    }
}
