// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-device forwarding of alarms and state updates.

use std::sync::Arc;

use crate::error::{Error, ProtocolError};
use crate::hub::Device;
use crate::protocol::{Publisher, QoS, TopicNamer};

use super::Supervisor;

/// Payload published when a device raises an alarm.
pub const ALARM_PAYLOAD: &[u8] = b"alarm";

/// Forwards one device's notifications to the broker.
///
/// A watcher runs as two independent tasks: one waits on the device's alarm
/// signal, the other on its update signal. Each task loops forever, so
/// publishes within one category stay ordered while alarms and updates may
/// interleave freely. The topic is resolved at every publish.
pub struct DeviceWatcher<P> {
    device: Arc<Device>,
    publisher: Arc<P>,
    namer: TopicNamer,
}

impl<P: Publisher> DeviceWatcher<P> {
    /// Creates a watcher for `device` publishing through `publisher`.
    #[must_use]
    pub fn new(device: Arc<Device>, publisher: Arc<P>, namer: TopicNamer) -> Self {
        Self {
            device,
            publisher,
            namer,
        }
    }

    /// Returns the watched device.
    #[must_use]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    /// Spawns the alarm and update tasks into `supervisor`.
    pub fn spawn(self, supervisor: &mut Supervisor) {
        let id = self.device.id().to_string();
        let alarms = self.clone();
        let updates = self;

        supervisor.spawn(&format!("alarm:{id}"), async move {
            alarms.forward_alarms().await
        });
        supervisor.spawn(&format!("update:{id}"), async move {
            updates.forward_updates().await
        });
    }

    /// Publishes every alarm until a publish fails.
    ///
    /// # Errors
    ///
    /// Returns the first publish error.
    pub async fn forward_alarms(&self) -> Result<(), Error> {
        loop {
            self.forward_alarm().await?;
        }
    }

    /// Publishes every state update until a publish fails.
    ///
    /// # Errors
    ///
    /// Returns the first publish error.
    pub async fn forward_updates(&self) -> Result<(), Error> {
        loop {
            self.forward_update().await?;
        }
    }

    /// Waits for the next alarm and publishes it.
    ///
    /// # Errors
    ///
    /// Returns error if the publish fails.
    pub async fn forward_alarm(&self) -> Result<(), ProtocolError> {
        self.device.alarm().wait().await;

        let topic = self.namer.device_topic(&self.device);
        tracing::info!(topic = %topic, payload = "alarm", "Publishing device alarm");

        self.publisher
            .publish(&topic, QoS::AtLeastOnce, false, ALARM_PAYLOAD.to_vec())
            .await
    }

    /// Waits for the next state update and publishes the device state.
    ///
    /// # Errors
    ///
    /// Returns error if the publish fails.
    pub async fn forward_update(&self) -> Result<(), ProtocolError> {
        self.device.update().wait().await;

        let topic = self.namer.device_topic(&self.device);
        let payload = self.device.serialized_state();
        tracing::info!(topic = %topic, payload = %payload, "Publishing device update");

        self.publisher
            .publish(&topic, QoS::AtLeastOnce, false, payload.into_bytes())
            .await
    }
}

impl<P> Clone for DeviceWatcher<P> {
    fn clone(&self) -> Self {
        Self {
            device: Arc::clone(&self.device),
            publisher: Arc::clone(&self.publisher),
            namer: self.namer.clone(),
        }
    }
}

impl<P> std::fmt::Debug for DeviceWatcher<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceWatcher")
            .field("device", &self.device.id())
            .field("base_topic", &self.namer.base_topic())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use tokio::sync::mpsc::UnboundedReceiver;

    use super::*;
    use crate::protocol::testing::{Published, RecordingPublisher};

    fn watcher(
        device: Device,
    ) -> (
        DeviceWatcher<RecordingPublisher>,
        UnboundedReceiver<Published>,
    ) {
        let (publisher, rx) = RecordingPublisher::new();
        let namer = TopicNamer::new("home");
        let watcher = DeviceWatcher::new(Arc::new(device), Arc::new(publisher), namer);
        (watcher, rx)
    }

    #[tokio::test]
    async fn alarm_publishes_literal_payload() {
        let (watcher, mut rx) = watcher(Device::new("42"));

        watcher.device().alarm().fire();
        watcher.forward_alarm().await.unwrap();

        let published = rx.try_recv().unwrap();
        assert_eq!(published.topic, "home/elro/42");
        assert_eq!(published.payload, b"alarm");
        assert_eq!(published.qos, QoS::AtLeastOnce);
        assert!(!published.retain);
    }

    #[tokio::test]
    async fn update_publishes_serialized_state() {
        let (watcher, mut rx) = watcher(Device::new("42").with_name("Kitchen"));
        watcher.device().set_state(json!({ "battery": 55 }));

        watcher.device().update().fire();
        watcher.forward_update().await.unwrap();

        let published = rx.try_recv().unwrap();
        assert_eq!(published.topic, "home/elro/Kitchen");
        assert_eq!(published.payload_str(), watcher.device().serialized_state());
        assert_eq!(published.qos, QoS::AtLeastOnce);
    }

    #[tokio::test]
    async fn repeated_alarms_publish_each_time() {
        let (watcher, mut rx) = watcher(Device::new("42"));
        let device = Arc::clone(watcher.device());

        let mut supervisor = Supervisor::new();
        watcher.spawn(&mut supervisor);

        for _ in 0..5 {
            device.alarm().fire();
            let published = tokio::time::timeout(Duration::from_secs(1), rx.recv())
                .await
                .expect("alarm should be published")
                .unwrap();
            assert_eq!(published.payload, b"alarm");
        }

        supervisor.shutdown().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn rename_between_updates_moves_topic() {
        let (watcher, mut rx) = watcher(Device::new("42").with_name("Hall"));

        watcher.device().update().fire();
        watcher.forward_update().await.unwrap();

        watcher.device().set_name("Attic");
        watcher.device().update().fire();
        watcher.forward_update().await.unwrap();

        assert_eq!(rx.try_recv().unwrap().topic, "home/elro/Hall");
        assert_eq!(rx.try_recv().unwrap().topic, "home/elro/Attic");
    }

    #[tokio::test]
    async fn publish_error_ends_task() {
        let (publisher, _rx) = RecordingPublisher::new();
        publisher.fail_from_now_on();
        let device = Arc::new(Device::new("42"));
        let watcher = DeviceWatcher::new(
            Arc::clone(&device),
            Arc::new(publisher),
            TopicNamer::new(""),
        );

        device.alarm().fire();
        let result = watcher.forward_alarms().await;
        assert!(matches!(
            result,
            Err(Error::Protocol(ProtocolError::ConnectionFailed(_)))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn alarm_and_update_are_independent() {
        let (watcher, mut rx) = watcher(Device::new("42"));
        let device = Arc::clone(watcher.device());

        let mut supervisor = Supervisor::new();
        watcher.spawn(&mut supervisor);

        device.update().fire();
        let published = rx.recv().await.unwrap();
        assert_ne!(published.payload, b"alarm");

        // The alarm task is still parked; nothing else arrives.
        let nothing = tokio::time::timeout(Duration::from_secs(60), rx.recv()).await;
        assert!(nothing.is_err());

        supervisor.shutdown().await;
    }
}
