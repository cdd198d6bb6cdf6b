// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Broker-facing side of the bridge.
//!
//! - [`BrokerConfig`]: validated broker address, base topic and last will
//! - [`TopicNamer`]: maps devices to topics under `<base>/elro/`
//! - [`BrokerConnection`]: the shared MQTT connection used for publishing
//! - [`Publisher`]: the publishing surface watcher tasks are written against

mod config;
mod mqtt_broker;
mod topic;

pub use config::{BrokerConfig, BrokerConfigBuilder, LastWill, OFFLINE_PAYLOAD, ONLINE_PAYLOAD};
pub use mqtt_broker::{BrokerConnection, ConnectionDriver};
pub use rumqttc::QoS;
pub use topic::TopicNamer;

use std::future::Future;

use crate::error::ProtocolError;

/// A publishing surface shared by all watcher tasks.
///
/// Implementations must accept concurrent calls from many tasks. Messages
/// published by a single caller must reach the broker in call order.
pub trait Publisher: Send + Sync + 'static {
    /// Publishes a message.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError` if the message cannot be handed to the
    /// connection.
    fn publish(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: Vec<u8>,
    ) -> impl Future<Output = Result<(), ProtocolError>> + Send;
}
