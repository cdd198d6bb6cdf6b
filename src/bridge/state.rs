// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Lifecycle state of a bridge run.

use std::fmt;

/// Where a [`Bridge`](super::Bridge) is in its lifecycle.
///
/// ```text
/// Disconnected → Connecting → Announcing → Running → Cancelled
///                     ↓            ↓          ↓
///                   Failed       Failed     Failed
///
/// Connecting ─(cancel)→ Cancelled
/// Announcing ─(cancel)→ Cancelled
/// ```
///
/// `Cancelled` and `Failed` are terminal; there is no reconnection.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum BridgeState {
    /// Not started yet.
    #[default]
    Disconnected,
    /// Waiting for the broker to acknowledge the connection.
    Connecting,
    /// Connected; publishing the `online` presence message.
    Announcing,
    /// Discovering devices and forwarding their notifications.
    Running,
    /// The scope was torn down and every task stopped.
    ///
    /// Also reached without a cancel request when the discovery sequence
    /// ends and every watcher has stopped.
    Cancelled,
    /// The connection could not be established or a task failed.
    Failed(String),
}

impl BridgeState {
    /// Returns true while devices are being watched.
    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// Returns true if the bridge ended with an error.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// Returns true once the bridge can no longer change state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Failed(_))
    }
}

impl fmt::Display for BridgeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => f.write_str("disconnected"),
            Self::Connecting => f.write_str("connecting"),
            Self::Announcing => f.write_str("announcing"),
            Self::Running => f.write_str("running"),
            Self::Cancelled => f.write_str("cancelled"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}
