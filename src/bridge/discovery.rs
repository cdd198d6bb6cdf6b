// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Discovery loop spawning a watcher for every new device.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::Error;
use crate::hub::{Discoveries, Hub};
use crate::protocol::{Publisher, TopicNamer};

use super::{DeviceWatcher, Supervisor};

/// Consumes the hub's discovery sequence and supervises the watchers.
///
/// The loop drives its [`Supervisor`]: while waiting for the next device it
/// also collects finished tasks, so the first failing task ends the loop
/// with that task's error.
pub(crate) struct DiscoveryLoop<'a, P> {
    hub: &'a Hub,
    publisher: Arc<P>,
    namer: TopicNamer,
    watched: &'a AtomicUsize,
}

impl<'a, P: Publisher> DiscoveryLoop<'a, P> {
    pub(crate) fn new(
        hub: &'a Hub,
        publisher: Arc<P>,
        namer: TopicNamer,
        watched: &'a AtomicUsize,
    ) -> Self {
        Self {
            hub,
            publisher,
            namer,
            watched,
        }
    }

    /// Runs until the scope is cancelled, a task fails, or the sequence is
    /// exhausted and every task has ended.
    pub(crate) async fn run(
        &self,
        discoveries: &mut Discoveries,
        supervisor: &mut Supervisor,
    ) -> Result<(), Error> {
        let cancel = supervisor.cancellation_token();
        let mut exhausted = false;

        loop {
            if exhausted && supervisor.is_empty() {
                return Ok(());
            }

            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    tracing::debug!("Discovery loop cancelled");
                    return Ok(());
                }
                next = discoveries.next(), if !exhausted => match next {
                    Some(id) => match self.hub.device(&id) {
                        Some(device) => {
                            tracing::info!(device = %device, "New device registered");
                            let publisher = Arc::clone(&self.publisher);
                            let namer = self.namer.clone();
                            DeviceWatcher::new(device, publisher, namer).spawn(supervisor);
                            self.watched.fetch_add(1, Ordering::Relaxed);
                        }
                        None => {
                            tracing::warn!(device = %id, "Unknown device discovered, skipping");
                        }
                    },
                    None => {
                        tracing::info!("Device discovery sequence exhausted");
                        exhausted = true;
                    }
                },
                Some(joined) = supervisor.join_next(), if !supervisor.is_empty() => joined?,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::mpsc;

    use super::*;
    use crate::hub::{Device, DeviceId};
    use crate::protocol::testing::RecordingPublisher;

    #[tokio::test]
    async fn spawns_watcher_pair_per_device() {
        let hub = Hub::new();
        let mut discoveries = hub.discoveries().unwrap();
        let (publisher, mut rx) = RecordingPublisher::new();
        let watched = AtomicUsize::new(0);
        let mut supervisor = Supervisor::new();
        let cancel = supervisor.cancellation_token();

        let first = hub.register(Device::new("1"));
        let second = hub.register(Device::new("2").with_name("Garage"));

        let namer = TopicNamer::new("home");
        let discovery = DiscoveryLoop::new(&hub, Arc::new(publisher), namer, &watched);
        let driver = discovery.run(&mut discoveries, &mut supervisor);
        let check = async {
            first.alarm().fire();
            second.alarm().fire();
            let mut topics = vec![
                rx.recv().await.unwrap().topic,
                rx.recv().await.unwrap().topic,
            ];
            topics.sort();
            assert_eq!(topics, ["home/elro/1", "home/elro/Garage"]);
            cancel.cancel();
        };

        let (result, ()) = tokio::time::timeout(Duration::from_secs(5), async {
            tokio::join!(driver, check)
        })
        .await
        .expect("loop should stop after cancel");

        assert!(result.is_ok());
        assert_eq!(watched.load(Ordering::Relaxed), 2);
        assert_eq!(supervisor.len(), 4);
        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn unknown_device_is_skipped() {
        let hub = Hub::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let mut discoveries = Discoveries::from_receiver(rx);
        let (publisher, _rx) = RecordingPublisher::new();
        let watched = AtomicUsize::new(0);
        let mut supervisor = Supervisor::new();

        tx.send(DeviceId::from("ghost")).unwrap();
        drop(tx);

        let namer = TopicNamer::new("");
        let discovery = DiscoveryLoop::new(&hub, Arc::new(publisher), namer, &watched);
        let result = discovery.run(&mut discoveries, &mut supervisor).await;

        assert!(result.is_ok());
        assert_eq!(watched.load(Ordering::Relaxed), 0);
        assert!(supervisor.is_empty());
    }

    #[tokio::test]
    async fn failing_watcher_ends_loop_with_error() {
        let hub = Hub::new();
        let mut discoveries = hub.discoveries().unwrap();
        let (publisher, _rx) = RecordingPublisher::new();
        publisher.fail_from_now_on();
        let watched = AtomicUsize::new(0);
        let mut supervisor = Supervisor::new();

        let device = hub.register(Device::new("1"));
        device.update().fire();

        let namer = TopicNamer::new("");
        let discovery = DiscoveryLoop::new(&hub, Arc::new(publisher), namer, &watched);
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            discovery.run(&mut discoveries, &mut supervisor),
        )
        .await
        .expect("failure should end the loop");

        assert!(matches!(result, Err(Error::Protocol(_))));
        supervisor.shutdown().await;
    }
}
