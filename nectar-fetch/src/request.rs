// Copyright 2021-2022 Nectar Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::{
    single_block::SingleBlockFetcher,
    splitfile::resume_splitfile,
    walker::{WalkOutput, Walker},
    FetchCallback, FetchContext, FetchError, FetchErrorKind, FetchResult,
};

use nectar_key::KeyUri;
use nectar_runtime::{Bucket, RandomAccess};
use nectar_schedule::{ClientId, PriorityClass};
use nectar_splitfile::SplitfileStore;

use tokio::sync::Notify;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

/// Shared state of one client request: the cancel flag, the live fetchers
/// and the splitfile store, all owned here so cancellation can fan out.
pub(crate) struct RequestState {
    uri: String,
    cancelled: AtomicBool,
    cancel_notify: Notify,
    finished: AtomicBool,
    fetchers: Mutex<Vec<Arc<SingleBlockFetcher>>>,
    store: Mutex<Option<Arc<SplitfileStore>>>,
}

impl RequestState {
    fn new(uri: String) -> Arc<Self> {
        Arc::new(Self {
            uri,
            cancelled: AtomicBool::new(false),
            cancel_notify: Notify::new(),
            finished: AtomicBool::new(false),
            fetchers: Mutex::new(Vec::new()),
            store: Mutex::new(None),
        })
    }

    pub(crate) fn uri(&self) -> &str {
        &self.uri
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Resolves once the request is cancelled; immediately when it already
    /// was.
    pub(crate) async fn cancelled_wait(&self) {
        if self.is_cancelled() {
            return;
        }
        // notify_one leaves a permit behind, so a cancel racing this await
        // is not lost.
        self.cancel_notify.notified().await;
    }

    pub(crate) fn attach_fetchers(&self, fetchers: &[Arc<SingleBlockFetcher>]) {
        self.fetchers
            .lock()
            .expect("poisoned request lock")
            .extend(fetchers.iter().cloned());
    }

    pub(crate) fn attach_store(&self, store: Arc<SplitfileStore>) {
        self.store.lock().expect("poisoned request lock").replace(store);
    }

    // The terminal callback fires exactly once across success, failure and
    // cancellation.
    fn claim_terminal(&self) -> bool {
        !self.finished.swap(true, Ordering::AcqRel)
    }
}

/// A running fetch, as handed back to the client. Dropping it does not
/// cancel the fetch; call [`ClientRequest::cancel`].
pub struct ClientRequest {
    client: ClientId,
    state: Arc<RequestState>,
}

impl ClientRequest {
    /// Returns the client identity this request is scheduled under.
    pub fn client(&self) -> ClientId {
        self.client
    }

    /// Cancels the request: every child fetcher is unregistered, the
    /// splitfile store stops accepting blocks, and the callback sees
    /// `on_cancelled` (unless a terminal outcome won the race).
    pub fn cancel(&self) {
        if self.state.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        self.state.cancel_notify.notify_one();

        if let Some(store) = self.state.store.lock().expect("poisoned request lock").take() {
            store.cancel(None);
        }

        let fetchers = std::mem::take(&mut *self.state.fetchers.lock().expect("poisoned request lock"));
        for fetcher in fetchers {
            fetcher.cancel();
        }
    }
}

/// Entry point: turns a [`KeyUri`] into a running request.
pub struct Getter;

impl Getter {
    /// Starts fetching `uri`. The callback sees progress events and exactly
    /// one terminal outcome.
    pub fn start(
        ctx: Arc<FetchContext>,
        uri: KeyUri,
        priority: PriorityClass,
        callback: Arc<dyn FetchCallback>,
    ) -> ClientRequest {
        let client = ctx.scheduler.allocate_client_id();
        let state = RequestState::new(uri.to_string());

        let walker = Walker::new(
            ctx.clone(),
            state.clone(),
            callback.clone(),
            client,
            priority,
            uri,
        );

        let task_state = state.clone();
        let executor = ctx.executor.clone();
        executor.spawn(Box::pin(async move {
            let outcome = walker.run().await;
            deliver(&ctx, &task_state, &callback, outcome);
        }));

        ClientRequest { client, state }
    }

    /// Resumes a splitfile download from its on-disk store. Only blocks not
    /// yet proven on disk are re-requested.
    pub fn resume(
        ctx: Arc<FetchContext>,
        file: Arc<dyn RandomAccess>,
        priority: PriorityClass,
        callback: Arc<dyn FetchCallback>,
    ) -> ClientRequest {
        let client = ctx.scheduler.allocate_client_id();
        let state = RequestState::new("resumed".to_string());

        let task_state = state.clone();
        let executor = ctx.executor.clone();
        executor.spawn(Box::pin(async move {
            let outcome = resume_splitfile(file, &ctx, client, priority, &task_state, &callback)
                .await
                .map(|(data, mime_type)| WalkOutput { data, mime_type });
            deliver(&ctx, &task_state, &callback, outcome);
        }));

        ClientRequest { client, state }
    }
}

fn deliver(
    ctx: &FetchContext,
    state: &RequestState,
    callback: &Arc<dyn FetchCallback>,
    outcome: Result<WalkOutput, FetchError>,
) {
    if !state.claim_terminal() {
        return;
    }

    match outcome {
        Ok(output) => {
            let size = output.data.len() as u64;

            let bucket = match ctx.bucket_factory.make_bucket(size) {
                Ok(bucket) => bucket,
                Err(e) => {
                    callback.on_failure(FetchError::from(e));
                    return;
                }
            };
            if let Err(e) = bucket.append(&output.data) {
                callback.on_failure(FetchError::from(e));
                return;
            }

            callback.on_success(FetchResult {
                output: bucket,
                mime_type: output.mime_type,
                size,
            });
        }
        Err(e) if e.kind() == FetchErrorKind::Cancelled => callback.on_cancelled(),
        Err(e) => callback.on_failure(e),
    }
}
