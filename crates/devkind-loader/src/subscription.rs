//! Cancellable streams of query results.

use crate::device::Device;
use chrono::{DateTime, Utc};
use devkind_core::{LoaderError, LoaderResult, Params, Record};
use futures::stream::{BoxStream, Stream, StreamExt};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// One emitted result, tagged with the time it was observed.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub timestamp: DateTime<Utc>,
    pub record: Record,
}

/// Handle that stops a [`Subscription`] from another task.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Stream of observations that ends as soon as it is cancelled.
pub struct Subscription {
    inner: BoxStream<'static, LoaderResult<Observation>>,
    cancel: CancelHandle,
}

impl Subscription {
    /// Wrap an arbitrary observation stream.
    pub fn from_stream(stream: impl Stream<Item = LoaderResult<Observation>> + Send + 'static) -> Self {
        Self {
            inner: stream.boxed(),
            cancel: CancelHandle::default(),
        }
    }

    /// Re-run `query` every `interval`, starting immediately.
    ///
    /// Each request runs on its own task: cancelling never aborts a request
    /// in flight, its result is dropped instead.
    pub fn polling(device: Device, query: String, params: Params, interval: Duration) -> Self {
        let cancel = CancelHandle::default();
        let flag = cancel.clone();

        let stream = async_stream::stream! {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                if flag.is_cancelled() {
                    break;
                }

                let request = {
                    let device = device.clone();
                    let query = query.clone();
                    let params = params.clone();
                    tokio::spawn(async move { device.get(&query, &params).await })
                };
                let result = request
                    .await
                    .unwrap_or_else(|e| Err(LoaderError::Communication(format!("poll task failed: {}", e))));

                if flag.is_cancelled() {
                    debug!(query = %query, "Discarding poll result after cancellation");
                    break;
                }

                match result {
                    Ok(records) => {
                        let timestamp = Utc::now();
                        for record in records {
                            yield Ok(Observation { timestamp, record });
                        }
                    }
                    Err(e) => {
                        warn!(kind = %device.kind(), query = %query, "Poll failed: {}", e);
                        yield Err(e);
                    }
                }
            }
        };

        Self {
            inner: stream.boxed(),
            cancel,
        }
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Stream for Subscription {
    type Item = LoaderResult<Observation>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.cancel.is_cancelled() {
            return Poll::Ready(None);
        }
        self.inner.poll_next_unpin(cx)
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
