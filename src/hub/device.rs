// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device model shared between the hub and the bridge.

use std::fmt;

use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;

use super::{DeviceId, Signal};

/// A device registered with the hub.
///
/// The hub owns devices and mutates their name and state; the bridge only
/// reads them and waits on their [`alarm`](Self::alarm) and
/// [`update`](Self::update) signals. Devices are shared as `Arc<Device>`.
///
/// # Examples
///
/// ```
/// use elro_mqtt::hub::Device;
///
/// let device = Device::new("42");
/// assert_eq!(device.name(), "");
///
/// device.set_name("Kitchen");
/// device.set_state(serde_json::json!({ "battery": 90 }));
/// device.update().fire();
/// ```
pub struct Device {
    id: DeviceId,
    name: RwLock<String>,
    state: RwLock<Value>,
    alarm: Signal,
    update: Signal,
}

/// The JSON document published for a device update.
#[derive(Serialize)]
struct DeviceSnapshot<'a> {
    id: &'a DeviceId,
    name: &'a str,
    state: &'a Value,
}

impl Device {
    /// Creates an unnamed device with empty state.
    #[must_use]
    pub fn new(id: impl Into<DeviceId>) -> Self {
        Self {
            id: id.into(),
            name: RwLock::new(String::new()),
            state: RwLock::new(Value::Null),
            alarm: Signal::new(),
            update: Signal::new(),
        }
    }

    /// Sets the initial name.
    #[must_use]
    pub fn with_name(self, name: impl Into<String>) -> Self {
        *self.name.write() = name.into();
        self
    }

    /// Returns the stable device identifier.
    #[must_use]
    pub fn id(&self) -> &DeviceId {
        &self.id
    }

    /// Returns the current name. Empty when the device has not been named.
    #[must_use]
    pub fn name(&self) -> String {
        self.name.read().clone()
    }

    /// Renames the device.
    pub fn set_name(&self, name: impl Into<String>) {
        *self.name.write() = name.into();
    }

    /// Returns a copy of the current device state.
    #[must_use]
    pub fn state(&self) -> Value {
        self.state.read().clone()
    }

    /// Replaces the current device state.
    pub fn set_state(&self, state: Value) {
        *self.state.write() = state;
    }

    /// Signal fired when the device raises an alarm.
    #[must_use]
    pub fn alarm(&self) -> &Signal {
        &self.alarm
    }

    /// Signal fired when the device state changed.
    #[must_use]
    pub fn update(&self) -> &Signal {
        &self.update
    }

    /// Renders the current device as JSON text.
    #[must_use]
    pub fn serialized_state(&self) -> String {
        let name = self.name.read();
        let state = self.state.read();
        let snapshot = DeviceSnapshot {
            id: &self.id,
            name: &name,
            state: &state,
        };
        // Serializing strings and a `Value` cannot fail.
        serde_json::to_string(&snapshot).unwrap_or_default()
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.id)
            .field("name", &*self.name.read())
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.name.read();
        if name.is_empty() {
            write!(f, "device {}", self.id)
        } else {
            write!(f, "device {} ({name})", self.id)
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn new_device_is_unnamed() {
        let device = Device::new("42");
        assert_eq!(device.id().as_str(), "42");
        assert!(device.name().is_empty());
        assert_eq!(device.state(), Value::Null);
    }

    #[test]
    fn rename_is_visible() {
        let device = Device::new("42").with_name("Hall");
        device.set_name("Kitchen");
        assert_eq!(device.name(), "Kitchen");
    }

    #[test]
    fn serialized_state_contains_identity_and_state() {
        let device = Device::new("7").with_name("Smoke");
        device.set_state(json!({ "battery": 80, "alarm": false }));

        let parsed: Value = serde_json::from_str(&device.serialized_state()).unwrap();
        assert_eq!(
            parsed,
            json!({ "id": "7", "name": "Smoke", "state": { "battery": 80, "alarm": false } })
        );
    }

    #[test]
    fn display_includes_name_when_set() {
        let device = Device::new("3");
        assert_eq!(device.to_string(), "device 3");
        device.set_name("Door");
        assert_eq!(device.to_string(), "device 3 (Door)");
    }
}
