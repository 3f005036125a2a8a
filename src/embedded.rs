//! In-memory harness for exercising stages without sockets.
//!
//! [`EmbeddedPipeline`] wires a pipeline to a [`RecordingTransport`] and a
//! [`ManualTimer`], captures whatever reaches the tail, and records every
//! fault the recovery hook sees. Pair it with Tokio's paused clock to test
//! idle behaviour deterministically.
//!
//! ```
//! use bytes::Bytes;
//! use pipeframe::{
//!     embedded::EmbeddedPipeline,
//!     frame::{FixedLengthCodec, FramingStage},
//! };
//!
//! let mut channel = EmbeddedPipeline::builder()
//!     .stage("framer", FramingStage::new(FixedLengthCodec::new(3).expect("len")))
//!     .build()
//!     .expect("pipeline");
//! channel.write_inbound(Bytes::from_static(b"abcdefg"));
//! assert_eq!(channel.read_inbound::<Bytes>().as_deref(), Some(&b"abc"[..]));
//! assert_eq!(channel.read_inbound::<Bytes>().as_deref(), Some(&b"def"[..]));
//! assert!(channel.read_inbound::<Bytes>().is_none());
//! ```

use std::{
    collections::{HashSet, VecDeque},
    sync::{
        Arc,
        Mutex,
        MutexGuard,
        PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use bytes::Bytes;
use tokio::time::Instant;

use crate::{
    error::{PipelineError, Result},
    idle::{IdleAxis, IdleStateEvent},
    message::Message,
    pipeline::{Pipeline, PipelineBuilder, PipelineEvent, PipelineState, Stage, StageContext},
    recovery::{DefaultRecoveryPolicy, ErrorContext, RecoveryPolicy, RecoveryPolicyHook},
    session::ConnectionId,
    timer::{Tick, Timer, TimerKey},
    transport::Transport,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// [`Transport`] recording every write and close.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    writes: Mutex<Vec<(ConnectionId, Bytes)>>,
    closed: Mutex<Vec<ConnectionId>>,
    failing: Mutex<HashSet<ConnectionId>>,
}

impl RecordingTransport {
    /// Create an empty transport.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Bytes written to `id`, in order.
    #[must_use]
    pub fn written(&self, id: ConnectionId) -> Vec<Bytes> {
        lock(&self.writes)
            .iter()
            .filter(|(conn, _)| *conn == id)
            .map(|(_, bytes)| bytes.clone())
            .collect()
    }

    /// Remove and return the bytes written to `id`.
    pub fn take_written(&self, id: ConnectionId) -> Vec<Bytes> {
        let mut writes = lock(&self.writes);
        let (taken, kept): (Vec<_>, Vec<_>) = writes.drain(..).partition(|(conn, _)| *conn == id);
        *writes = kept;
        taken.into_iter().map(|(_, bytes)| bytes).collect()
    }

    /// Remove and return the oldest chunk written to `id`.
    pub fn pop_written(&self, id: ConnectionId) -> Option<Bytes> {
        let mut writes = lock(&self.writes);
        let index = writes.iter().position(|(conn, _)| *conn == id)?;
        Some(writes.remove(index).1)
    }

    /// Connections the pipeline asked to close, in order.
    #[must_use]
    pub fn closed(&self) -> Vec<ConnectionId> { lock(&self.closed).clone() }

    /// Make writes to `id` fail (or succeed again).
    pub fn fail_writes(&self, id: ConnectionId, fail: bool) {
        let mut failing = lock(&self.failing);
        if fail {
            failing.insert(id);
        } else {
            failing.remove(&id);
        }
    }
}

impl Transport for RecordingTransport {
    fn write(&self, connection: ConnectionId, bytes: Bytes) -> Result<()> {
        if lock(&self.failing).contains(&connection) {
            return Err(PipelineError::write_failure(connection, "connection reset"));
        }
        lock(&self.writes).push((connection, bytes));
        Ok(())
    }

    fn close(&self, connection: ConnectionId) { lock(&self.closed).push(connection); }
}

#[derive(Debug)]
struct Scheduled {
    key: TimerKey,
    tick: Tick,
    deadline: Instant,
}

/// [`Timer`] whose ticks are collected explicitly with
/// [`ManualTimer::due`].
///
/// Deadlines use Tokio's clock, so `tokio::time::advance` moves them.
#[derive(Debug)]
pub struct ManualTimer {
    next: AtomicU64,
    scheduled: Mutex<Vec<Scheduled>>,
}

impl Default for ManualTimer {
    fn default() -> Self {
        Self {
            next: AtomicU64::new(1),
            scheduled: Mutex::new(Vec::new()),
        }
    }
}

impl ManualTimer {
    /// Create a timer with nothing scheduled.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Number of scheduled ticks.
    #[must_use]
    pub fn pending(&self) -> usize { lock(&self.scheduled).len() }

    /// Delay until the earliest scheduled tick, if any.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Duration> {
        let now = Instant::now();
        lock(&self.scheduled)
            .iter()
            .map(|s| s.deadline.saturating_duration_since(now))
            .min()
    }

    /// Remove and return the ticks whose deadline has passed, earliest
    /// first.
    pub fn due(&self) -> Vec<Tick> {
        let now = Instant::now();
        let mut scheduled = lock(&self.scheduled);
        let (mut due, pending): (Vec<_>, Vec<_>) =
            scheduled.drain(..).partition(|s| s.deadline <= now);
        *scheduled = pending;
        due.sort_by_key(|s| (s.deadline, s.key.as_u64()));
        due.into_iter().map(|s| s.tick).collect()
    }
}

impl Timer for ManualTimer {
    fn schedule(&self, connection: ConnectionId, axis: IdleAxis, delay: Duration) -> TimerKey {
        let key = TimerKey::new(self.next.fetch_add(1, Ordering::Relaxed));
        lock(&self.scheduled).push(Scheduled {
            key,
            tick: Tick { connection, axis },
            deadline: Instant::now() + delay,
        });
        key
    }

    fn cancel(&self, key: TimerKey) { lock(&self.scheduled).retain(|s| s.key != key); }
}

/// A fault observed by the recovery hook.
#[derive(Clone, Debug)]
pub struct FaultRecord {
    /// [`PipelineError::error_type`] of the fault.
    pub kind: &'static str,
    /// Rendered error message.
    pub message: String,
    /// Stage that raised it.
    pub stage: String,
    /// Policy applied.
    pub policy: RecoveryPolicy,
}

struct RecordingHook {
    inner: Arc<dyn RecoveryPolicyHook>,
    faults: Arc<Mutex<Vec<FaultRecord>>>,
}

impl RecoveryPolicyHook for RecordingHook {
    fn recovery_policy(&self, error: &PipelineError, ctx: &ErrorContext) -> RecoveryPolicy {
        let policy = self.inner.recovery_policy(error, ctx);
        lock(&self.faults).push(FaultRecord {
            kind: error.error_type(),
            message: error.to_string(),
            stage: ctx.stage.clone(),
            policy,
        });
        policy
    }
}

#[derive(Default)]
struct Captured {
    inbound: VecDeque<Message>,
    events: VecDeque<PipelineEvent>,
}

/// Tail stage capturing everything that reaches it.
struct Sink(Arc<Mutex<Captured>>);

impl Stage for Sink {
    fn on_read(&mut self, _ctx: &mut StageContext<'_>, msg: Message) -> Result<()> {
        lock(&self.0).inbound.push_back(msg);
        Ok(())
    }

    fn on_event(&mut self, _ctx: &mut StageContext<'_>, event: PipelineEvent) -> Result<()> {
        lock(&self.0).events.push_back(event);
        Ok(())
    }
}

/// Name of the capturing stage [`EmbeddedPipeline`] appends.
pub const SINK_NAME: &str = "embedded-sink";

/// Builder for [`EmbeddedPipeline`].
pub struct EmbeddedBuilder {
    id: ConnectionId,
    stages: Vec<(String, Box<dyn Stage>)>,
    recovery: Arc<dyn RecoveryPolicyHook>,
    mailbox_capacity: Option<usize>,
}

impl EmbeddedBuilder {
    /// Use `id` as the connection identifier.
    #[must_use]
    pub fn id(mut self, id: ConnectionId) -> Self {
        self.id = id;
        self
    }

    /// Append a stage.
    #[must_use]
    pub fn stage(mut self, name: impl Into<String>, stage: impl Stage) -> Self {
        self.stages.push((name.into(), Box::new(stage)));
        self
    }

    /// Consult `hook` on faults; records are kept either way.
    #[must_use]
    pub fn recovery(mut self, hook: Arc<dyn RecoveryPolicyHook>) -> Self {
        self.recovery = hook;
        self
    }

    /// Bound the mailbox to `capacity` messages.
    #[must_use]
    pub fn mailbox_capacity(mut self, capacity: usize) -> Self {
        self.mailbox_capacity = Some(capacity);
        self
    }

    /// Build the pipeline and activate it.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfiguration`] for duplicate stage
    /// names.
    pub fn build(self) -> Result<EmbeddedPipeline> {
        let transport = Arc::new(RecordingTransport::new());
        let timer = Arc::new(ManualTimer::new());
        let faults = Arc::new(Mutex::new(Vec::new()));
        let captured = Arc::new(Mutex::new(Captured::default()));

        let mut builder: PipelineBuilder = Pipeline::builder(self.id, transport.clone())
            .timer(timer.clone())
            .recovery(Arc::new(RecordingHook {
                inner: self.recovery,
                faults: Arc::clone(&faults),
            }));
        if let Some(capacity) = self.mailbox_capacity {
            builder = builder.mailbox_capacity(capacity);
        }
        for (name, stage) in self.stages {
            builder.push_stage(name, stage);
        }
        builder.push_stage(SINK_NAME, Sink(Arc::clone(&captured)));

        let mut pipeline = builder.build()?;
        pipeline.on_connect();
        Ok(EmbeddedPipeline {
            pipeline,
            transport,
            timer,
            faults,
            captured,
        })
    }
}

/// A pipeline driven by hand, for tests.
pub struct EmbeddedPipeline {
    pipeline: Pipeline,
    transport: Arc<RecordingTransport>,
    timer: Arc<ManualTimer>,
    faults: Arc<Mutex<Vec<FaultRecord>>>,
    captured: Arc<Mutex<Captured>>,
}

impl EmbeddedPipeline {
    /// Start building an embedded pipeline for connection 1.
    #[must_use]
    pub fn builder() -> EmbeddedBuilder {
        EmbeddedBuilder {
            id: ConnectionId::new(1),
            stages: Vec::new(),
            recovery: Arc::new(DefaultRecoveryPolicy),
            mailbox_capacity: None,
        }
    }

    /// Connection identifier.
    #[must_use]
    pub fn id(&self) -> ConnectionId { self.pipeline.id() }

    /// Feed bytes as if read from the socket, then drain the mailbox.
    /// Returns true if anything reached the tail.
    pub fn write_inbound(&mut self, bytes: Bytes) -> bool {
        self.pipeline.on_data(bytes);
        self.pipeline.drain_mailbox();
        !lock(&self.captured).inbound.is_empty()
    }

    /// Take the next message that reached the tail, if it is a `T`.
    ///
    /// A message of another type stays queued.
    pub fn read_inbound<T: std::any::Any>(&mut self) -> Option<T> {
        let mut captured = lock(&self.captured);
        let msg = captured.inbound.pop_front()?;
        match msg.downcast::<T>() {
            Ok(value) => Some(value),
            Err(msg) => {
                captured.inbound.push_front(msg);
                None
            }
        }
    }

    /// Number of captured inbound messages.
    #[must_use]
    pub fn inbound_len(&self) -> usize { lock(&self.captured).inbound.len() }

    /// Take the next event that reached the tail.
    pub fn read_event(&mut self) -> Option<PipelineEvent> { lock(&self.captured).events.pop_front() }

    /// Take every idle event that reached the tail.
    pub fn idle_events(&mut self) -> Vec<IdleStateEvent> {
        let mut captured = lock(&self.captured);
        let events: Vec<_> = captured.events.drain(..).collect();
        let mut idle = Vec::new();
        for event in events {
            match event {
                PipelineEvent::Idle(state) => idle.push(state),
                other => captured.events.push_back(other),
            }
        }
        idle
    }

    /// Write `msg` from the tail.
    ///
    /// # Errors
    ///
    /// Returns the failure the write produced.
    pub fn write_outbound(&mut self, msg: Message) -> Result<()> { self.pipeline.write(msg) }

    /// Take the next chunk of bytes written to the transport.
    pub fn read_outbound(&mut self) -> Option<Bytes> { self.transport.pop_written(self.id()) }

    /// Take every chunk written to the transport.
    pub fn outbound(&mut self) -> Vec<Bytes> { self.transport.take_written(self.id()) }

    /// Dispatch `event` from the head.
    pub fn fire_event(&mut self, event: PipelineEvent) {
        self.pipeline.fire_event(event);
        self.pipeline.drain_mailbox();
    }

    /// Deliver every timer tick that is due, including ticks scheduled by
    /// the delivery itself. Returns how many were delivered.
    pub fn run_pending_timers(&mut self) -> usize {
        let mut delivered = 0;
        loop {
            let due = self.timer.due();
            if due.is_empty() {
                return delivered;
            }
            for tick in due {
                self.pipeline.on_idle_tick(tick.axis);
                delivered += 1;
            }
            self.pipeline.drain_mailbox();
        }
    }

    /// Advance Tokio's paused clock by `by` and deliver due ticks.
    ///
    /// Requires a runtime started with the clock paused.
    pub async fn advance(&mut self, by: Duration) -> usize {
        tokio::time::advance(by).await;
        self.run_pending_timers()
    }

    /// Faults observed so far.
    #[must_use]
    pub fn faults(&self) -> Vec<FaultRecord> { lock(&self.faults).clone() }

    /// Close locally.
    pub fn close(&mut self) { self.pipeline.close(); }

    /// Pipeline state.
    #[must_use]
    pub fn state(&self) -> PipelineState { self.pipeline.state() }

    /// Returns true until a close is requested.
    #[must_use]
    pub fn is_open(&self) -> bool { self.pipeline.is_open() }

    /// The recording transport.
    #[must_use]
    pub fn transport(&self) -> &RecordingTransport { &self.transport }

    /// The manual timer.
    #[must_use]
    pub fn timer(&self) -> &ManualTimer { &self.timer }

    /// The underlying pipeline, for runtime edits.
    pub fn pipeline_mut(&mut self) -> &mut Pipeline { &mut self.pipeline }
}
