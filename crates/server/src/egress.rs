//! Per-leg egress queue (spec §5 "Backpressure"). A bounded FIFO of
//! outbound envelopes with two distinct push policies: `audio` drops the
//! oldest entry on overflow (best-effort, lossy-tolerant per spec §1);
//! everything else blocks the producer until space frees up or a sustained
//! block trips `SlowConsumer`.
//!
//! `tokio::sync::mpsc` can't express the drop-oldest-on-overflow policy (a
//! bounded channel only rejects new sends, it can't evict), so this is a
//! plain `VecDeque` behind a `parking_lot::Mutex` paired with two `Notify`s
//! — one for "an item is now available", one for "space just freed up".

use callbroker_config::constants::session as thresholds;
use callbroker_core::{BrokerError, Envelope};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

pub struct EgressQueue {
    capacity: usize,
    inner: Mutex<VecDeque<Envelope>>,
    pushed: Notify,
    freed: Notify,
    closed: AtomicBool,
}

impl EgressQueue {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            capacity,
            inner: Mutex::new(VecDeque::with_capacity(capacity.min(256))),
            pushed: Notify::new(),
            freed: Notify::new(),
            closed: AtomicBool::new(false),
        })
    }

    /// `audio` envelopes: never blocks. Drops the oldest queued envelope if
    /// the queue is already at capacity (spec §5).
    pub fn push_audio(&self, envelope: Envelope) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        {
            let mut guard = self.inner.lock();
            if guard.len() >= self.capacity {
                guard.pop_front();
            }
            guard.push_back(envelope);
        }
        self.pushed.notify_one();
    }

    /// `transcript`/`coaching`/`intelligence`/control envelopes: never
    /// dropped. Blocks the caller until space frees up; a sustained block
    /// past `SLOW_CONSUMER_BLOCK_SECONDS` returns `SlowConsumer` (spec §5, §7).
    pub async fn push_reliable(&self, envelope: Envelope) -> Result<(), BrokerError> {
        if self.closed.load(Ordering::Acquire) {
            return Ok(());
        }
        let wait = async {
            let mut envelope = Some(envelope);
            loop {
                {
                    let mut guard = self.inner.lock();
                    if guard.len() < self.capacity {
                        guard.push_back(envelope.take().expect("pushed exactly once"));
                        drop(guard);
                        self.pushed.notify_one();
                        return;
                    }
                }
                self.freed.notified().await;
            }
        };

        tokio::time::timeout(Duration::from_secs(thresholds::SLOW_CONSUMER_BLOCK_SECONDS), wait)
            .await
            .map_err(|_| BrokerError::SlowConsumer)
    }

    /// Blocking pop for the per-leg egress writer task. Returns `None` once
    /// the queue is closed and drained.
    pub async fn pop(&self) -> Option<Envelope> {
        loop {
            {
                let mut guard = self.inner.lock();
                if let Some(envelope) = guard.pop_front() {
                    drop(guard);
                    self.freed.notify_one();
                    return Some(envelope);
                }
                if self.closed.load(Ordering::Acquire) {
                    return None;
                }
            }
            self.pushed.notified().await;
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Stops accepting pushes and wakes any writer blocked in `pop` so it
    /// can observe closure once the backlog drains (spec §4.7 teardown).
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.pushed.notify_waiters();
        self.freed.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use callbroker_core::Codec;

    fn audio(n: u64) -> Envelope {
        Envelope::Audio {
            codec: Codec::WavPcm,
            payload: vec![],
            seq: Some(n),
            from: None,
        }
    }

    #[tokio::test]
    async fn audio_overflow_drops_oldest() {
        let queue = EgressQueue::new(2);
        queue.push_audio(audio(1));
        queue.push_audio(audio(2));
        queue.push_audio(audio(3));

        assert_eq!(queue.len(), 2);
        let first = queue.pop().await.unwrap();
        match first {
            Envelope::Audio { seq, .. } => assert_eq!(seq, Some(2)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn reliable_push_unblocks_once_space_frees() {
        let queue = EgressQueue::new(1);
        queue.push_audio(audio(1));

        let queue2 = queue.clone();
        let handle = tokio::spawn(async move { queue2.push_reliable(Envelope::Ping).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.pop().await.unwrap();

        handle.await.unwrap().unwrap();
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn close_unblocks_pending_pop() {
        let queue = EgressQueue::new(4);
        let queue2 = queue.clone();
        let handle = tokio::spawn(async move { queue2.pop().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.close();
        assert!(handle.await.unwrap().is_none());
    }
}
