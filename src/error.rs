// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types for the `elro_mqtt` library.
//!
//! Errors fall into three groups: configuration errors detected while
//! building a [`BrokerConfig`](crate::protocol::BrokerConfig), protocol
//! errors raised by the broker connection, and supervision errors raised
//! while running the bridge.

use thiserror::Error;

/// The main error type for this library.
#[derive(Debug, Error)]
pub enum Error {
    /// The bridge configuration is invalid.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Error occurred during broker communication.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// A supervised task panicked or was aborted unexpectedly.
    #[error("task failed: {0}")]
    TaskFailed(String),

    /// The hub's discovery sequence has already been taken.
    #[error("device discovery sequence is no longer available")]
    DiscoveryUnavailable,
}

/// Errors detected while validating the broker configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// No broker address was given.
    #[error("broker host is required")]
    MissingHost,

    /// The broker host is neither an IP address nor a valid hostname.
    #[error("invalid broker host: {0}")]
    InvalidHost(String),

    /// The port part of the broker address could not be parsed.
    #[error("invalid broker port: {0}")]
    InvalidPort(String),

    /// The base topic contains characters outside `[A-Za-z0-9/_-]`.
    #[error("invalid base topic: {0}")]
    InvalidBaseTopic(String),
}

/// Errors related to the MQTT broker connection.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The MQTT client rejected a request.
    #[error("MQTT error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    /// Connection to the broker failed or was lost.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Internal channel was closed.
    #[error("channel closed: {0}")]
    ChannelClosed(String),
}

/// A specialized Result type for this library.
pub type Result<T> = std::result::Result<T, Error>;
