use std::{sync::Arc, time::Duration};

use tokio::{runtime::Runtime, sync::Semaphore};
use url::Url;

use crate::{events::EventBatch, Error, Result};

/// Sends flushed batches to the event endpoint on a small dedicated runtime.
///
/// At most `max_pending` requests are in flight; a batch that cannot get a slot is dropped.
pub(crate) struct EventDispatcher {
    runtime: Runtime,
    client: reqwest::Client,
    url: Url,
    permits: Arc<Semaphore>,
    max_pending: usize,
}

impl EventDispatcher {
    /// Worker threads of the dispatch runtime.
    pub const WORKER_THREADS: usize = 2;
    /// Maximum number of requests in flight.
    pub const MAX_PENDING_DISPATCHES: usize = 5;

    pub fn new(client: reqwest::Client, url: Url) -> Result<EventDispatcher> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(EventDispatcher::WORKER_THREADS)
            .thread_name("featureprobe-dispatch")
            .enable_all()
            .build()?;

        Ok(EventDispatcher {
            runtime,
            client,
            url,
            permits: Arc::new(Semaphore::new(EventDispatcher::MAX_PENDING_DISPATCHES)),
            max_pending: EventDispatcher::MAX_PENDING_DISPATCHES,
        })
    }

    /// Schedule a POST of `batch`. Never blocks.
    pub fn dispatch(&self, batch: EventBatch) {
        let permit = match self.permits.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                log::warn!(target: "featureprobe", events = batch.events.len(); "too many pending event requests, dropping batch");
                return;
            }
        };

        let client = self.client.clone();
        let url = self.url.clone();
        self.runtime.spawn(async move {
            let _permit = permit;
            match send(&client, &url, &batch).await {
                Ok(()) => {
                    log::debug!(target: "featureprobe", events = batch.events.len(); "sent events")
                }
                Err(err) => {
                    log::error!(target: "featureprobe", url = url.as_str(); "failed to send events: {err}")
                }
            }
        });
    }

    /// Wait up to `timeout` for in-flight requests, then tear the runtime down.
    pub fn shutdown(self, timeout: Duration) {
        let permits = self.permits.clone();
        let all = self.max_pending as u32;
        let drained = self.runtime.block_on(async move {
            tokio::time::timeout(timeout, permits.acquire_many_owned(all))
                .await
                .is_ok()
        });
        if !drained {
            log::warn!(target: "featureprobe", "timed out waiting for pending event requests");
        }
        self.runtime.shutdown_timeout(Duration::from_millis(100));
    }
}

async fn send(client: &reqwest::Client, url: &Url, batch: &EventBatch) -> Result<()> {
    let response = client.post(url.clone()).json(&[batch]).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(Error::Http(status));
    }
    Ok(())
}
