// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Task group owning every task spawned by the bridge.

use std::future::Future;

use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::error::Error;

/// A structured-concurrency scope for an open-ended set of tasks.
///
/// Tasks can be added at any time. Cancelling the scope's token stops every
/// current task at its next suspension point, and [`shutdown`](Self::shutdown)
/// aborts whatever is left. Dropping the supervisor aborts all tasks too, so
/// no task outlives its scope.
///
/// # Examples
///
/// ```
/// use elro_mqtt::bridge::Supervisor;
///
/// # async fn example() {
/// let mut supervisor = Supervisor::new();
/// supervisor.spawn("ticker", async {
///     std::future::pending::<()>().await;
///     Ok(())
/// });
/// assert_eq!(supervisor.len(), 1);
///
/// supervisor.shutdown().await;
/// assert!(supervisor.is_empty());
/// # }
/// ```
#[derive(Debug)]
pub struct Supervisor {
    tasks: JoinSet<Result<(), Error>>,
    cancel: CancellationToken,
}

impl Supervisor {
    /// Creates a supervisor with its own cancellation token.
    #[must_use]
    pub fn new() -> Self {
        Self::with_token(CancellationToken::new())
    }

    /// Creates a supervisor cancelled by the given token.
    #[must_use]
    pub fn with_token(cancel: CancellationToken) -> Self {
        Self {
            tasks: JoinSet::new(),
            cancel,
        }
    }

    /// Returns the token that cancels this scope.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Returns whether the scope has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Spawns a task into the scope.
    ///
    /// The task runs inside a tracing span named after `name`. If the scope
    /// is cancelled first, the task ends with `Ok(())`.
    pub fn spawn<F>(&mut self, name: &str, task: F)
    where
        F: Future<Output = Result<(), Error>> + Send + 'static,
    {
        let cancel = self.cancel.clone();
        let span = tracing::debug_span!("task", name = %name);
        tracing::debug!(name = %name, running = self.tasks.len() + 1, "Spawning supervised task");

        self.tasks.spawn(
            async move {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => Ok(()),
                    result = task => result,
                }
            }
            .instrument(span),
        );
    }

    /// Returns the number of tasks that have not been joined yet.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Returns whether the scope has no tasks left.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Waits for the next task to end and returns its result.
    ///
    /// Returns `None` when the scope is empty. A panicked task is reported
    /// as [`Error::TaskFailed`]; an aborted task counts as success.
    /// Cancel safe.
    pub async fn join_next(&mut self) -> Option<Result<(), Error>> {
        let joined = self.tasks.join_next().await?;
        Some(joined.unwrap_or_else(|e| join_error(&e)))
    }

    /// Cancels the scope and aborts every remaining task.
    pub async fn shutdown(&mut self) {
        self.cancel.cancel();
        let remaining = self.tasks.len();
        self.tasks.shutdown().await;
        tracing::debug!(remaining, "Supervisor shut down");
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        // Tasks are aborted by the JoinSet itself.
        self.cancel.cancel();
    }
}

fn join_error(e: &JoinError) -> Result<(), Error> {
    if e.is_cancelled() {
        Ok(())
    } else {
        tracing::error!(error = %e, "Supervised task panicked");
        Err(Error::TaskFailed(e.to_string()))
    }
}
