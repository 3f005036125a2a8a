//! Cancellable one-shot timers for idle detection.
//!
//! A [`Timer`] schedules ticks addressed to a connection and an
//! [`IdleAxis`]. When a tick fires, the I/O layer calls
//! [`Pipeline::on_idle_tick`](crate::Pipeline::on_idle_tick) on the owning
//! connection's context.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use dashmap::DashMap;
use tokio::{
    sync::{mpsc, oneshot},
    task::AbortHandle,
};

use crate::{idle::IdleAxis, session::ConnectionId};

/// Identifier of a scheduled timer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TimerKey(u64);

impl TimerKey {
    /// Create a key from its raw value.
    #[must_use]
    pub const fn new(raw: u64) -> Self { Self(raw) }

    /// Return the raw value.
    #[must_use]
    pub fn as_u64(&self) -> u64 { self.0 }
}

/// Schedules idle ticks.
pub trait Timer: Send + Sync {
    /// Arrange for a tick on `axis` of `connection` after `delay`.
    fn schedule(&self, connection: ConnectionId, axis: IdleAxis, delay: Duration) -> TimerKey;

    /// Cancel a pending tick. Unknown or fired keys are ignored.
    fn cancel(&self, key: TimerKey);
}

/// Timer that never fires. Used by pipelines built without one.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopTimer;

impl Timer for NoopTimer {
    fn schedule(&self, _connection: ConnectionId, _axis: IdleAxis, _delay: Duration) -> TimerKey {
        TimerKey(0)
    }

    fn cancel(&self, _key: TimerKey) {}
}

/// A fired tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Tick {
    /// Connection the tick is addressed to.
    pub connection: ConnectionId,
    /// Axis the tick was scheduled for.
    pub axis: IdleAxis,
}

/// [`Timer`] backed by Tokio sleeps, delivering ticks over a channel.
///
/// Scheduling spawns a task, so it must happen inside a Tokio runtime.
#[derive(Clone, Debug)]
pub struct TokioTimer {
    next: Arc<AtomicU64>,
    pending: Arc<DashMap<TimerKey, AbortHandle>>,
    tx: mpsc::UnboundedSender<Tick>,
}

impl TokioTimer {
    /// Create a timer and the receiver its ticks arrive on.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Tick>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let timer = Self {
            next: Arc::new(AtomicU64::new(1)),
            pending: Arc::new(DashMap::new()),
            tx,
        };
        (timer, rx)
    }

    /// Number of ticks scheduled and not yet fired or cancelled.
    #[must_use]
    pub fn pending(&self) -> usize { self.pending.len() }
}

impl Timer for TokioTimer {
    fn schedule(&self, connection: ConnectionId, axis: IdleAxis, delay: Duration) -> TimerKey {
        let key = TimerKey(self.next.fetch_add(1, Ordering::Relaxed));
        let pending = Arc::clone(&self.pending);
        let tx = self.tx.clone();
        // The task may only deregister itself once its handle is stored.
        let (registered, wait_registered) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            if wait_registered.await.is_err() {
                return;
            }
            tokio::time::sleep(delay).await;
            pending.remove(&key);
            // The receiver is gone once the connection task exits.
            let _ = tx.send(Tick { connection, axis });
        });
        self.pending.insert(key, task.abort_handle());
        let _ = registered.send(());
        key
    }

    fn cancel(&self, key: TimerKey) {
        if let Some((_, handle)) = self.pending.remove(&key) {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn fires_after_delay() {
        let (timer, mut ticks) = TokioTimer::new();
        let id = ConnectionId::new(1);
        timer.schedule(id, IdleAxis::Read, Duration::from_secs(5));

        tokio::time::advance(Duration::from_secs(4)).await;
        tokio::task::yield_now().await;
        assert!(ticks.try_recv().is_err());

        let tick = ticks.recv().await.expect("tick delivered");
        assert_eq!(
            tick,
            Tick {
                connection: id,
                axis: IdleAxis::Read
            }
        );
        assert_eq!(timer.pending(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn fired_timers_never_linger_in_pending() {
        let (timer, mut ticks) = TokioTimer::new();
        let id = ConnectionId::new(3);
        for _ in 0..200 {
            timer.schedule(id, IdleAxis::Write, Duration::ZERO);
        }
        for _ in 0..200 {
            ticks.recv().await.expect("tick delivered");
        }
        assert_eq!(timer.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_timer_never_fires() {
        let (timer, mut ticks) = TokioTimer::new();
        let key = timer.schedule(ConnectionId::new(2), IdleAxis::All, Duration::from_secs(1));
        timer.cancel(key);
        timer.cancel(key);

        tokio::time::advance(Duration::from_secs(2)).await;
        tokio::task::yield_now().await;
        assert!(ticks.try_recv().is_err());
        assert_eq!(timer.pending(), 0);
    }
}
