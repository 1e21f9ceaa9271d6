// Copyright 2021-2022 Nectar Contributors
// SPDX-License-Identifier: Apache-2.0

use futures::future::BoxFuture;

use std::time::Duration;

/// Spawns background work on behalf of the client layer.
///
/// The root constructs one executor and passes handles down; nothing in the
/// client layer spawns onto a global runtime directly.
pub trait Executor: Send + Sync {
    /// Spawns a future.
    fn spawn(&self, future: BoxFuture<'static, ()>);

    /// Spawns a future after a delay.
    fn spawn_after(&self, delay: Duration, future: BoxFuture<'static, ()>);
}

/// An [`Executor`] backed by the ambient tokio runtime.
pub struct TokioExecutor;

impl Executor for TokioExecutor {
    fn spawn(&self, future: BoxFuture<'static, ()>) {
        tokio::spawn(future);
    }

    fn spawn_after(&self, delay: Duration, future: BoxFuture<'static, ()>) {
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            future.await;
        });
    }
}
