// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Resettable notification condition.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

/// A condition that can be fired by the hub and waited on by a watcher.
///
/// Firing sets the condition; [`wait`](Self::wait) returns once the
/// condition is set and clears it again, so every observed firing produces
/// exactly one wake-up. Firings that happen while nobody has observed the
/// previous one are coalesced.
///
/// # Examples
///
/// ```
/// use elro_mqtt::hub::Signal;
///
/// # async fn example() {
/// let signal = Signal::new();
/// signal.fire();
/// assert!(signal.is_set());
///
/// signal.wait().await;
/// assert!(!signal.is_set());
/// # }
/// ```
#[derive(Debug, Default)]
pub struct Signal {
    set: AtomicBool,
    notify: Notify,
}

impl Signal {
    /// Creates a cleared signal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the condition and wakes any waiter.
    pub fn fire(&self) {
        self.set.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    /// Returns whether the condition is set and not yet observed.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.set.load(Ordering::Acquire)
    }

    /// Waits until the condition is set, then clears it.
    ///
    /// The wait is unbounded. It is cancel safe: dropping the future before
    /// it completes leaves the condition untouched.
    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking the flag so a concurrent fire is not lost.
            notified.as_mut().enable();

            if self.set.swap(false, Ordering::AcqRel) {
                return;
            }
            notified.await;
        }
    }
}
