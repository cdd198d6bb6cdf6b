// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Broker connection configuration.

use std::net::{IpAddr, Ipv6Addr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use rumqttc::QoS;

use crate::error::ConfigError;

use super::TopicNamer;

/// Global counter for generating unique client IDs.
static CLIENT_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Scheme every broker URI is normalized to.
const SCHEME: &str = "mqtt://";

const DEFAULT_PORT: u16 = 1883;

/// Payload announcing the bridge is connected.
pub const ONLINE_PAYLOAD: &[u8] = b"online";

/// Payload the broker publishes on our behalf when the connection drops.
pub const OFFLINE_PAYLOAD: &[u8] = b"offline";

/// Message the broker publishes when the client disconnects ungracefully.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastWill {
    /// Topic of the will message.
    pub topic: String,
    /// Payload of the will message.
    pub payload: Vec<u8>,
    /// Quality of service of the will message.
    pub qos: QoS,
    /// Whether the broker retains the will message.
    pub retain: bool,
}

impl From<LastWill> for rumqttc::LastWill {
    fn from(will: LastWill) -> Self {
        rumqttc::LastWill::new(will.topic, will.payload, will.qos, will.retain)
    }
}

/// Validated configuration for the bridge's broker connection.
///
/// # Examples
///
/// ```
/// use elro_mqtt::protocol::BrokerConfig;
///
/// let config = BrokerConfig::builder()
///     .broker("192.168.1.50:1884")
///     .base_topic("home")
///     .build()
///     .unwrap();
///
/// assert_eq!(config.uri(), "mqtt://192.168.1.50:1884");
/// assert_eq!(config.port(), 1884);
/// assert_eq!(config.last_will().topic, "home/elro/status");
/// ```
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    uri: String,
    host: String,
    port: u16,
    namer: TopicNamer,
    credentials: Option<(String, String)>,
    client_id: String,
    keep_alive: Duration,
    connection_timeout: Duration,
}

impl BrokerConfig {
    /// Creates a new builder.
    #[must_use]
    pub fn builder() -> BrokerConfigBuilder {
        BrokerConfigBuilder::default()
    }

    /// Returns the broker URI, always with the `mqtt://` scheme.
    #[must_use]
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Returns the broker host.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the broker port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Returns the topic namer for the configured base topic.
    #[must_use]
    pub fn namer(&self) -> &TopicNamer {
        &self.namer
    }

    /// Returns the credentials if configured.
    #[must_use]
    pub fn credentials(&self) -> Option<(&str, &str)> {
        self.credentials
            .as_ref()
            .map(|(u, p)| (u.as_str(), p.as_str()))
    }

    /// Returns the MQTT client id.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Returns the keep-alive interval.
    #[must_use]
    pub fn keep_alive(&self) -> Duration {
        self.keep_alive
    }

    /// Returns how long to wait for the broker to acknowledge the connection.
    #[must_use]
    pub fn connection_timeout(&self) -> Duration {
        self.connection_timeout
    }

    /// Returns the last will: `offline`, retained, on the status topic.
    #[must_use]
    pub fn last_will(&self) -> LastWill {
        LastWill {
            topic: self.namer.status_topic(),
            payload: OFFLINE_PAYLOAD.to_vec(),
            qos: QoS::AtLeastOnce,
            retain: true,
        }
    }
}

/// Builder for [`BrokerConfig`].
#[derive(Debug)]
pub struct BrokerConfigBuilder {
    broker: String,
    base_topic: Option<String>,
    credentials: Option<(String, String)>,
    client_id: Option<String>,
    keep_alive: Duration,
    connection_timeout: Duration,
}

impl Default for BrokerConfigBuilder {
    fn default() -> Self {
        Self {
            broker: String::new(),
            base_topic: None,
            credentials: None,
            client_id: None,
            keep_alive: Duration::from_secs(30),
            connection_timeout: Duration::from_secs(10),
        }
    }
}

impl BrokerConfigBuilder {
    /// Sets the broker address: host or IP, optional port, optional
    /// `mqtt://` scheme.
    #[must_use]
    pub fn broker(mut self, broker: impl Into<String>) -> Self {
        self.broker = broker.into();
        self
    }

    /// Sets the base topic (default: empty).
    #[must_use]
    pub fn base_topic(mut self, base_topic: impl Into<String>) -> Self {
        self.base_topic = Some(base_topic.into());
        self
    }

    /// Sets authentication credentials.
    #[must_use]
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }

    /// Sets a custom client ID.
    #[must_use]
    pub fn client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = Some(id.into());
        self
    }

    /// Sets the keep-alive interval (default: 30 seconds).
    #[must_use]
    pub fn keep_alive(mut self, duration: Duration) -> Self {
        self.keep_alive = duration;
        self
    }

    /// Sets the connection timeout (default: 10 seconds).
    #[must_use]
    pub fn connection_timeout(mut self, duration: Duration) -> Self {
        self.connection_timeout = duration;
        self
    }

    /// Validates the settings and builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The broker address is empty
    /// - The host is neither an IP address nor a valid hostname
    /// - The port is not a number
    /// - The base topic contains characters other than letters, digits,
    ///   `/`, `_` and `-`
    pub fn build(self) -> Result<BrokerConfig, ConfigError> {
        let address = strip_scheme(self.broker.trim());
        let (host, port) = parse_address(address)?;

        let base_topic = self.base_topic.unwrap_or_default();
        if !is_valid_base_topic(&base_topic) {
            return Err(ConfigError::InvalidBaseTopic(base_topic));
        }

        let client_id = self.client_id.unwrap_or_else(|| {
            let counter = CLIENT_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
            format!("elro_{}_{}", std::process::id(), counter)
        });

        Ok(BrokerConfig {
            uri: format!("{SCHEME}{address}"),
            host,
            port,
            namer: TopicNamer::new(base_topic),
            credentials: self.credentials,
            client_id,
            keep_alive: self.keep_alive,
            connection_timeout: self.connection_timeout,
        })
    }
}

fn strip_scheme(broker: &str) -> &str {
    broker
        .strip_prefix(SCHEME)
        .or_else(|| broker.strip_prefix("tcp://"))
        .unwrap_or(broker)
}

/// Splits `host[:port]` and validates both parts.
fn parse_address(address: &str) -> Result<(String, u16), ConfigError> {
    if address.is_empty() {
        return Err(ConfigError::MissingHost);
    }

    // A bare IPv6 address contains colons but no port.
    if address.parse::<IpAddr>().is_ok() {
        return Ok((address.to_string(), DEFAULT_PORT));
    }

    if let Some(bracketed) = address.strip_prefix('[') {
        return parse_bracketed(bracketed);
    }

    let (host, port) = match address.rsplit_once(':') {
        Some((h, p)) => (h, parse_port(p)?),
        None => (address, DEFAULT_PORT),
    };

    if !is_valid_host(host) {
        return Err(ConfigError::InvalidHost(host.to_string()));
    }

    Ok((host.to_string(), port))
}

/// Parses `v6addr]` or `v6addr]:port`, the opening bracket already stripped.
fn parse_bracketed(bracketed: &str) -> Result<(String, u16), ConfigError> {
    let invalid = || ConfigError::InvalidHost(format!("[{bracketed}"));

    let (host, rest) = bracketed.split_once(']').ok_or_else(invalid)?;
    if host.parse::<Ipv6Addr>().is_err() {
        return Err(invalid());
    }

    let port = match rest {
        "" => DEFAULT_PORT,
        _ => {
            let p = rest
                .strip_prefix(':')
                .ok_or_else(|| ConfigError::InvalidPort(rest.to_string()))?;
            parse_port(p)?
        }
    };

    Ok((host.to_string(), port))
}

fn parse_port(port: &str) -> Result<u16, ConfigError> {
    port.parse()
        .map_err(|_| ConfigError::InvalidPort(port.to_string()))
}

fn is_valid_host(host: &str) -> bool {
    host.parse::<IpAddr>().is_ok() || is_valid_hostname(host)
}

/// RFC 1123 hostname: dot separated labels of letters, digits and inner hyphens.
fn is_valid_hostname(host: &str) -> bool {
    if host.is_empty() || host.len() > 253 {
        return false;
    }

    host.trim_end_matches('.').split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    })
}

fn is_valid_base_topic(topic: &str) -> bool {
    topic
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '_' | '-'))
}
