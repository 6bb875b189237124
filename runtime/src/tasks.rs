// Copyright 2026 Pricewatch Contributors
// SPDX-License-Identifier: Apache-2.0

//! Tracked background work.
//!
//! Background refreshes are spawned into a [`JoinSet`] instead of detached,
//! so callers (tests, the CLI, shutdown) can wait for them to drain and
//! panics are logged rather than lost.

use std::future::Future;
use tokio::sync::Mutex;
use tokio::task::{JoinError, JoinSet};

#[derive(Default)]
pub struct BackgroundTasks {
    set: Mutex<JoinSet<()>>,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut set = self.set.lock().await;
        while let Some(done) = set.try_join_next() {
            log_join(done);
        }
        set.spawn(fut);
    }

    /// Tasks spawned and not yet reaped.
    pub async fn pending(&self) -> usize {
        self.set.lock().await.len()
    }

    /// Wait until every task has finished, including ones spawned meanwhile.
    pub async fn wait_idle(&self) {
        loop {
            let mut drained = std::mem::take(&mut *self.set.lock().await);
            if drained.is_empty() {
                return;
            }
            while let Some(done) = drained.join_next().await {
                log_join(done);
            }
        }
    }
}

fn log_join(result: Result<(), JoinError>) {
    if let Err(e) = result {
        if e.is_panic() {
            tracing::error!("background refresh panicked: {e}");
        } else {
            tracing::warn!("background refresh cancelled: {e}");
        }
    }
}
