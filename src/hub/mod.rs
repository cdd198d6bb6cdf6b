// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device registry and discovery source.
//!
//! The [`Hub`] owns every known [`Device`] and announces each newly
//! registered device exactly once on its discovery sequence
//! ([`Discoveries`]). The bridge takes the sequence once and looks devices
//! up by [`DeviceId`] as their identities arrive.
//!
//! # Examples
//!
//! ```
//! use elro_mqtt::hub::{Device, Hub};
//!
//! # async fn example() {
//! let hub = Hub::new();
//! let mut discoveries = hub.discoveries().expect("first take");
//!
//! let device = hub.register(Device::new("42").with_name("Kitchen"));
//!
//! let id = discoveries.next().await.unwrap();
//! assert_eq!(&id, device.id());
//! # }
//! ```

mod device;
mod device_id;
mod signal;

pub use device::Device;
pub use device_id::DeviceId;
pub use signal::Signal;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;

/// Registry of devices with a one-shot discovery sequence.
#[derive(Debug)]
pub struct Hub {
    devices: RwLock<HashMap<DeviceId, Arc<Device>>>,
    new_device_tx: mpsc::UnboundedSender<DeviceId>,
    new_device_rx: Mutex<Option<mpsc::UnboundedReceiver<DeviceId>>>,
}

impl Hub {
    /// Creates an empty hub.
    #[must_use]
    pub fn new() -> Self {
        let (new_device_tx, new_device_rx) = mpsc::unbounded_channel();
        Self {
            devices: RwLock::new(HashMap::new()),
            new_device_tx,
            new_device_rx: Mutex::new(Some(new_device_rx)),
        }
    }

    /// Registers a device and announces it on the discovery sequence.
    ///
    /// Registering an id that is already known keeps the stored device, so
    /// watchers already waiting on its signals keep working. The new
    /// registration's name and state are applied to it when set, and the
    /// stored device is returned.
    pub fn register(&self, device: Device) -> Arc<Device> {
        let mut devices = self.devices.write();

        if let Some(existing) = devices.get(device.id()) {
            let name = device.name();
            if !name.is_empty() {
                existing.set_name(name);
            }
            let state = device.state();
            if !state.is_null() {
                existing.set_state(state);
            }
            tracing::debug!(device = %existing.id(), "Device already registered with hub");
            return Arc::clone(existing);
        }

        let device = Arc::new(device);
        let id = device.id().clone();
        devices.insert(id.clone(), Arc::clone(&device));
        drop(devices);

        tracing::debug!(device = %id, "Device registered with hub");
        // Ignore send errors - nobody is consuming discoveries
        let _ = self.new_device_tx.send(id);

        device
    }

    /// Looks up a device by identifier.
    #[must_use]
    pub fn device(&self, id: &DeviceId) -> Option<Arc<Device>> {
        self.devices.read().get(id).cloned()
    }

    /// Returns the number of registered devices.
    #[must_use]
    pub fn device_count(&self) -> usize {
        self.devices.read().len()
    }

    /// Takes the discovery sequence.
    ///
    /// The sequence is not restartable: only the first call returns it,
    /// later calls return `None`.
    #[must_use]
    pub fn discoveries(&self) -> Option<Discoveries> {
        self.new_device_rx
            .lock()
            .take()
            .map(|rx| Discoveries { rx })
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

/// Lazy sequence of newly registered device identifiers.
///
/// The sequence only ends once the [`Hub`] that produced it is dropped.
#[derive(Debug)]
pub struct Discoveries {
    rx: mpsc::UnboundedReceiver<DeviceId>,
}

impl Discoveries {
    /// Creates a sequence fed from an arbitrary channel.
    ///
    /// Useful when device identities come from somewhere other than a
    /// [`Hub`], e.g. a hub implementation living in another crate.
    #[must_use]
    pub fn from_receiver(rx: mpsc::UnboundedReceiver<DeviceId>) -> Self {
        Self { rx }
    }

    /// Waits for the next newly registered device.
    ///
    /// Returns `None` when the sequence is exhausted. Cancel safe.
    pub async fn next(&mut self) -> Option<DeviceId> {
        self.rx.recv().await
    }
}
