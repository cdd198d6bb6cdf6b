// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Integration tests against a mockforge-mqtt broker.

use std::collections::VecDeque;
use std::time::Duration;

use elro_mqtt::protocol::{BrokerConfig, BrokerConnection, Publisher, QoS};
use elro_mqtt::{Bridge, BridgeState, Device, Error, Hub, ProtocolError};
use mockforge_mqtt::broker::MqttConfig;
use mockforge_mqtt::start_mqtt_server;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, Publish};
use tokio::time::{sleep, timeout};

/// Helper to find an available port for testing.
fn get_test_port() -> u16 {
    use std::sync::atomic::{AtomicU16, Ordering};
    static PORT_COUNTER: AtomicU16 = AtomicU16::new(18950);
    PORT_COUNTER.fetch_add(1, Ordering::SeqCst)
}

/// Starts a mock MQTT broker on the given port.
async fn start_mock_broker(port: u16) {
    let config = MqttConfig {
        port,
        host: "127.0.0.1".to_string(),
        ..Default::default()
    };

    tokio::spawn(async move {
        let _ = start_mqtt_server(config).await;
    });

    // Give the broker time to start, bind to port, and be ready to accept connections
    sleep(Duration::from_millis(500)).await;
}

/// A second client recording what the broker delivers.
struct Subscriber {
    _client: AsyncClient,
    event_loop: EventLoop,
    pending: VecDeque<Publish>,
}

impl Subscriber {
    /// Connects and waits until the subscription is acknowledged.
    async fn connect(port: u16, filter: &str) -> Self {
        let mut options = MqttOptions::new(format!("subscriber-{port}"), "127.0.0.1", port);
        options.set_keep_alive(Duration::from_secs(30));

        let (client, event_loop) = AsyncClient::new(options, 10);
        client.subscribe(filter, QoS::AtLeastOnce).await.unwrap();

        let mut subscriber = Self {
            _client: client,
            event_loop,
            pending: VecDeque::new(),
        };
        loop {
            match subscriber.next_packet().await {
                Packet::SubAck(_) => break,
                Packet::Publish(publish) => subscriber.pending.push_back(publish),
                _ => {}
            }
        }
        subscriber
    }

    async fn next_packet(&mut self) -> Packet {
        loop {
            let event = timeout(Duration::from_secs(5), self.event_loop.poll())
                .await
                .expect("broker should deliver within 5s")
                .expect("subscriber connection failed");
            if let Event::Incoming(packet) = event {
                return packet;
            }
        }
    }

    /// Returns true if nothing is delivered for a short while.
    async fn is_quiet(&mut self) -> bool {
        timeout(Duration::from_millis(300), self.next_publish())
            .await
            .is_err()
    }

    async fn next_publish(&mut self) -> Publish {
        if let Some(publish) = self.pending.pop_front() {
            return publish;
        }
        loop {
            if let Packet::Publish(publish) = self.next_packet().await {
                return publish;
            }
        }
    }
}

fn config(broker: &str) -> BrokerConfig {
    BrokerConfig::builder()
        .broker(broker)
        .base_topic("test")
        .connection_timeout(Duration::from_secs(5))
        .build()
        .unwrap()
}

// ============================================================================
// BrokerConnection Tests
// ============================================================================

mod broker_connection {
    use super::*;

    #[tokio::test]
    async fn connect_reports_connected() {
        let port = get_test_port();
        start_mock_broker(port).await;

        let config = config(&format!("mqtt://127.0.0.1:{port}"));
        let result = BrokerConnection::connect(&config).await;
        assert!(result.is_ok(), "Failed to connect: {:?}", result.err());

        let (connection, _driver) = result.unwrap();
        assert!(connection.is_connected());
        assert_eq!(connection.uri(), format!("mqtt://127.0.0.1:{port}"));
    }

    #[tokio::test]
    async fn connect_without_scheme() {
        let port = get_test_port();
        start_mock_broker(port).await;

        let config = config(&format!("127.0.0.1:{port}"));
        let result = BrokerConnection::connect(&config).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn publish_through_driver() {
        let port = get_test_port();
        start_mock_broker(port).await;

        let config = config(&format!("127.0.0.1:{port}"));
        let (connection, driver) = BrokerConnection::connect(&config).await.unwrap();
        let driver = tokio::spawn(driver.run());

        let result = connection
            .publish("test/elro/status", QoS::AtLeastOnce, true, b"online".to_vec())
            .await;
        assert!(result.is_ok());

        driver.abort();
    }

    #[tokio::test]
    async fn dropping_driver_marks_disconnected() {
        let port = get_test_port();
        start_mock_broker(port).await;

        let config = config(&format!("127.0.0.1:{port}"));
        let (connection, driver) = BrokerConnection::connect(&config).await.unwrap();
        drop(driver);

        assert!(!connection.is_connected());
    }

    #[tokio::test]
    async fn last_will_published_when_driver_dropped() {
        let port = get_test_port();
        start_mock_broker(port).await;
        let mut subscriber = Subscriber::connect(port, "test/elro/status").await;

        let config = config(&format!("127.0.0.1:{port}"));
        let (connection, driver) = BrokerConnection::connect(&config).await.unwrap();
        drop(driver);
        assert!(!connection.is_connected());

        let will = subscriber.next_publish().await;
        assert_eq!(will.topic, "test/elro/status");
        assert_eq!(&will.payload[..], b"offline");
    }

    #[tokio::test]
    async fn disconnect_ends_driver() {
        let port = get_test_port();
        start_mock_broker(port).await;

        let config = config(&format!("127.0.0.1:{port}"));
        let (connection, driver) = BrokerConnection::connect(&config).await.unwrap();
        let driver = tokio::spawn(driver.run());

        connection.disconnect().await.unwrap();
        let result = tokio::time::timeout(Duration::from_secs(5), driver)
            .await
            .expect("driver should stop after disconnect")
            .unwrap();

        assert!(result.is_ok());
        assert!(!connection.is_connected());
    }

    #[tokio::test]
    async fn connection_refused() {
        // Nothing listens on this port.
        let port = get_test_port();

        let config = config(&format!("127.0.0.1:{port}"));
        let result = BrokerConnection::connect(&config).await;
        assert!(matches!(result, Err(ProtocolError::ConnectionFailed(_))));
    }
}

// ============================================================================
// Bridge Tests
// ============================================================================

mod bridge {
    use super::*;

    #[tokio::test]
    async fn announces_online_and_forwards_alarms() {
        let port = get_test_port();
        start_mock_broker(port).await;

        let hub = Hub::new();
        let device = hub.register(Device::new("42").with_name("Hall"));
        let bridge = Bridge::new(config(&format!("127.0.0.1:{port}")));

        let run = bridge.run(&hub);
        let control = async {
            let mut state = bridge.watch_state();
            state.wait_for(BridgeState::is_running).await.unwrap();
            // Let the broker store the retained status first.
            sleep(Duration::from_millis(200)).await;

            let mut subscriber = Subscriber::connect(port, "test/elro/#").await;
            let online = subscriber.next_publish().await;
            assert_eq!(online.topic, "test/elro/status");
            assert_eq!(&online.payload[..], b"online");
            assert!(online.retain);

            device.alarm().fire();
            let alarm = subscriber.next_publish().await;
            assert_eq!(alarm.topic, "test/elro/Hall");
            assert_eq!(&alarm.payload[..], b"alarm");
            assert!(!alarm.retain);
            assert_eq!(bridge.watched_devices(), 1);

            // Dropping the connection on cancel makes the broker publish the will.
            bridge.cancel();
            let offline = subscriber.next_publish().await;
            assert_eq!(offline.topic, "test/elro/status");
            assert_eq!(&offline.payload[..], b"offline");

            device.alarm().fire();
            assert!(subscriber.is_quiet().await);
        };

        let (result, ()) = timeout(Duration::from_secs(20), async {
            tokio::join!(run, control)
        })
        .await
        .expect("bridge should stop after cancel");

        assert!(result.is_ok(), "Bridge failed: {:?}", result.err());
        assert_eq!(bridge.state(), BridgeState::Cancelled);
    }

    #[tokio::test]
    async fn cancelled_bridge_leaves_no_status() {
        let port = get_test_port();
        start_mock_broker(port).await;

        let hub = Hub::new();
        let bridge = Bridge::new(config(&format!("127.0.0.1:{port}")));
        bridge.cancel();

        let result = bridge.run(&hub).await;
        assert!(result.is_ok());
        assert_eq!(bridge.state(), BridgeState::Cancelled);

        // No retained `online` was stored, so a new subscriber gets nothing.
        let mut subscriber = Subscriber::connect(port, "test/elro/#").await;
        assert!(subscriber.is_quiet().await);
    }

    #[tokio::test]
    async fn connection_failure_is_terminal() {
        let port = get_test_port();

        let hub = Hub::new();
        let bridge = Bridge::new(config(&format!("127.0.0.1:{port}")));

        let result = bridge.run(&hub).await;
        assert!(matches!(result, Err(Error::Protocol(_))));
        assert!(bridge.state().is_failed());

        // The discovery sequence was consumed by the failed run.
        let result = bridge.run(&hub).await;
        assert!(matches!(result, Err(Error::DiscoveryUnavailable)));
    }
}
