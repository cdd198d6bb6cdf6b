// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `elro_mqtt` - Publish ELRO hub device events to an MQTT broker.
//!
//! The bridge watches every device registered with a [`Hub`] and forwards
//! its alarms and state updates to MQTT, one message per notification:
//!
//! | Event | Topic | Payload | Retain |
//! |---|---|---|---|
//! | Bridge connected | `<base>/elro/status` | `online` | yes |
//! | Bridge lost (last will) | `<base>/elro/status` | `offline` | yes |
//! | Device alarm | `<base>/elro/<name or id>` | `alarm` | no |
//! | Device update | `<base>/elro/<name or id>` | device state as JSON | no |
//!
//! All messages use QoS 1 (at least once).
//!
//! # Quick Start
//!
//! ```no_run
//! use elro_mqtt::{Bridge, BrokerConfig, Device, Hub};
//!
//! #[tokio::main]
//! async fn main() -> elro_mqtt::Result<()> {
//!     let config = BrokerConfig::builder()
//!         .broker("192.168.1.50")
//!         .base_topic("home")
//!         .build()?;
//!
//!     let hub = Hub::new();
//!     let kitchen = hub.register(Device::new("42").with_name("Kitchen"));
//!
//!     // Somewhere in the hub's receive loop:
//!     kitchen.alarm().fire();
//!
//!     // Runs until cancelled or the connection is lost
//!     Bridge::new(config).run(&hub).await
//! }
//! ```
//!
//! # Lifecycle
//!
//! The bridge owns a single supervised scope. Every watcher task runs inside
//! it, and leaving the scope (cancellation, connection loss or a failed
//! publish) stops all of them at once. There is no reconnection: a failed
//! bridge has to be started again by the caller.

pub mod bridge;
pub mod error;
pub mod hub;
pub mod protocol;

pub use bridge::{Bridge, BridgeState, Supervisor};
pub use error::{ConfigError, Error, ProtocolError, Result};
pub use hub::{Device, DeviceId, Discoveries, Hub, Signal};
pub use protocol::{BrokerConfig, BrokerConnection, Publisher, TopicNamer};
