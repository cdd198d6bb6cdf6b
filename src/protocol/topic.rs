// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Topic naming for bridge publications.
//!
//! All topics live under `<base topic>/elro/`:
//!
//! ```text
//! <base>/elro/status          online / offline (retained)
//! <base>/elro/<name or id>    alarm / device state
//! ```

use crate::hub::Device;

/// Segment inserted between the base topic and the last hierarchy level.
const NAMESPACE: &str = "elro";

/// Last hierarchy level of the presence topic.
const STATUS: &str = "status";

/// Maps a base topic and a device to MQTT topic names.
///
/// Device topics are resolved from the device's current name on every
/// call, so a renamed device publishes under its new name from then on.
///
/// # Examples
///
/// ```
/// use elro_mqtt::hub::Device;
/// use elro_mqtt::protocol::TopicNamer;
///
/// let namer = TopicNamer::new("home");
/// assert_eq!(namer.status_topic(), "home/elro/status");
///
/// let device = Device::new("42");
/// assert_eq!(namer.device_topic(&device), "home/elro/42");
///
/// device.set_name("Kitchen");
/// assert_eq!(namer.device_topic(&device), "home/elro/Kitchen");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicNamer {
    base_topic: String,
}

impl TopicNamer {
    /// Creates a namer for the given base topic. The base may be empty.
    #[must_use]
    pub fn new(base_topic: impl Into<String>) -> Self {
        Self {
            base_topic: base_topic.into(),
        }
    }

    /// Returns the base topic.
    #[must_use]
    pub fn base_topic(&self) -> &str {
        &self.base_topic
    }

    /// Returns the topic for the given last hierarchy level.
    #[must_use]
    pub fn topic(&self, suffix: &str) -> String {
        format!("{}/{NAMESPACE}/{suffix}", self.base_topic)
    }

    /// Returns the presence topic carrying `online` / `offline`.
    #[must_use]
    pub fn status_topic(&self) -> String {
        self.topic(STATUS)
    }

    /// Returns the topic for a device: its name, or its id when unnamed.
    #[must_use]
    pub fn device_topic(&self, device: &Device) -> String {
        let name = device.name();
        if name.is_empty() {
            self.topic(device.id().as_str())
        } else {
            self.topic(&name)
        }
    }
}
