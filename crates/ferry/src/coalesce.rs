//! Background writer for objects rewritten faster than they can be flushed.
//!
//! The queue is a single slot: enqueueing replaces whatever has not been
//! picked up yet, so only the newest payload is ever written. Stopping waits
//! for the worker, which makes one last attempt at the newest payload if it
//! was not persisted already.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::CoalescingConfig;
use crate::{Result, UploadError};

/// Persists one payload.
#[async_trait]
pub trait Flush: Send + Sync + 'static {
    type Output: Send + 'static;

    async fn flush(&self, payload: Bytes) -> Result<Self::Output>;
}

#[derive(Debug, Clone)]
struct Versioned {
    version: u64,
    payload: Bytes,
}

pub struct CoalescingWriter<O> {
    slot: watch::Sender<Option<Versioned>>,
    token: CancellationToken,
    worker: JoinHandle<Result<Option<O>>>,
}

impl<O: Send + 'static> CoalescingWriter<O> {
    /// Start the consumer task.
    pub fn spawn<F>(flusher: Arc<F>, config: CoalescingConfig) -> Self
    where
        F: Flush<Output = O>,
    {
        let (slot, receiver) = watch::channel(None);
        let token = CancellationToken::new();
        let worker = tokio::spawn(run_worker(flusher, receiver, token.clone(), config));
        Self {
            slot,
            token,
            worker,
        }
    }

    /// Replace the pending payload. Never blocks.
    pub fn enqueue(&self, payload: Bytes) {
        self.slot.send_modify(|slot| {
            let version = slot.as_ref().map_or(1, |pending| pending.version + 1);
            *slot = Some(Versioned { version, payload });
        });
    }

    /// Stop the worker after its final attempt.
    ///
    /// Returns the output for the newest payload, `None` if nothing was
    /// enqueued, or the error of the final attempt.
    pub async fn stop(self) -> Result<Option<O>> {
        self.token.cancel();
        self.worker.await?
    }

    /// Stop without a final attempt.
    pub fn abort(self) {
        self.worker.abort();
    }
}

async fn run_worker<F: Flush>(
    flusher: Arc<F>,
    mut receiver: watch::Receiver<Option<Versioned>>,
    token: CancellationToken,
    config: CoalescingConfig,
) -> Result<Option<F::Output>> {
    let mut persisted: Option<(u64, F::Output)> = None;
    let mut backoff = config.initial_backoff;

    'outer: loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            changed = receiver.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }

        let mut attempts = 0;
        loop {
            // Always the newest payload; anything older is dropped here.
            let Some(pending) = (*receiver.borrow_and_update()).clone() else {
                break;
            };
            if persisted.as_ref().is_some_and(|(version, _)| *version >= pending.version) {
                break;
            }

            attempts += 1;
            match flusher.flush(pending.payload).await {
                Ok(output) => {
                    debug!(version = pending.version, "Flushed pending payload");
                    persisted = Some((pending.version, output));
                    backoff = config.initial_backoff;
                    break;
                }
                Err(err) => {
                    warn!(
                        version = pending.version,
                        attempt = attempts,
                        delay_ms = backoff.as_millis() as u64,
                        error = %err,
                        "Background flush failed"
                    );
                    let delay = backoff;
                    backoff = config.next_backoff(backoff);
                    if attempts >= config.max_attempts.max(1) {
                        continue 'outer;
                    }
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => break 'outer,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    final_flush(flusher.as_ref(), &receiver, persisted).await
}

async fn final_flush<F: Flush>(
    flusher: &F,
    receiver: &watch::Receiver<Option<Versioned>>,
    persisted: Option<(u64, F::Output)>,
) -> Result<Option<F::Output>> {
    let latest = (*receiver.borrow()).clone();
    match (latest, persisted) {
        (None, _) => Ok(None),
        (Some(latest), Some((version, output))) if version >= latest.version => Ok(Some(output)),
        (Some(latest), _) => {
            debug!(version = latest.version, "Final flush of newest payload");
            flusher
                .flush(latest.payload)
                .await
                .map(Some)
                .map_err(|source| UploadError::FinalFlush {
                    source: Box::new(source),
                })
        }
    }
}
