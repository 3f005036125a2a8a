//! Registry of live pipelines driven by an external I/O layer.
//!
//! The [`Host`] owns one [`Pipeline`] per connection and exposes the entry
//! points an I/O layer calls: connect, data, idle tick, mailbox drain and
//! close. Each connection's pipeline sits behind its own lock so calls for
//! one connection are serialised while different connections proceed in
//! parallel. After every entry point the connection's own mailbox is drained
//! so messages a stage addressed to its own connection are written in the
//! same turn.

use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use dashmap::DashMap;

use crate::{
    config::HostConfig,
    error::{PipelineError, Result},
    idle::IdleAxis,
    message::Message,
    pipeline::{Pipeline, PipelineBuilder, PipelineState},
    recovery::{DefaultRecoveryPolicy, RecoveryPolicyHook},
    session::{ConnectionHandle, ConnectionId},
    timer::{NoopTimer, Timer},
    transport::Transport,
};

/// Installs the stages of a new connection's pipeline.
pub type PipelineInitializer =
    dyn Fn(&mut PipelineBuilder, &HostConfig) -> Result<()> + Send + Sync;

/// Builder for [`Host`].
pub struct HostBuilder {
    transport: Arc<dyn Transport>,
    timer: Arc<dyn Timer>,
    recovery: Arc<dyn RecoveryPolicyHook>,
    config: HostConfig,
    initializer: Arc<PipelineInitializer>,
}

impl HostBuilder {
    /// Use `timer` for every connection's idle ticks.
    #[must_use]
    pub fn timer(mut self, timer: Arc<dyn Timer>) -> Self {
        self.timer = timer;
        self
    }

    /// Use `hook` to decide how pipeline faults are handled.
    #[must_use]
    pub fn recovery(mut self, hook: Arc<dyn RecoveryPolicyHook>) -> Self {
        self.recovery = hook;
        self
    }

    /// Apply `config` to every connection.
    #[must_use]
    pub fn config(mut self, config: HostConfig) -> Self {
        self.config = config;
        self
    }

    /// Install stages with `initializer` whenever a connection is accepted.
    #[must_use]
    pub fn initializer<F>(mut self, initializer: F) -> Self
    where
        F: Fn(&mut PipelineBuilder, &HostConfig) -> Result<()> + Send + Sync + 'static,
    {
        self.initializer = Arc::new(initializer);
        self
    }

    /// Build the host.
    #[must_use]
    pub fn build(self) -> Host {
        Host {
            transport: self.transport,
            timer: self.timer,
            recovery: self.recovery,
            config: self.config,
            initializer: self.initializer,
            connections: DashMap::new(),
        }
    }
}

/// Owner of every live connection's pipeline.
pub struct Host {
    transport: Arc<dyn Transport>,
    timer: Arc<dyn Timer>,
    recovery: Arc<dyn RecoveryPolicyHook>,
    config: HostConfig,
    initializer: Arc<PipelineInitializer>,
    connections: DashMap<ConnectionId, Arc<Mutex<Pipeline>>>,
}

impl Host {
    /// Start building a host writing through `transport`.
    pub fn builder(transport: Arc<dyn Transport>) -> HostBuilder {
        HostBuilder {
            transport,
            timer: Arc::new(NoopTimer),
            recovery: Arc::new(DefaultRecoveryPolicy),
            config: HostConfig::default(),
            initializer: Arc::new(|_: &mut PipelineBuilder, _: &HostConfig| Ok(())),
        }
    }

    /// The configuration applied to new connections.
    #[must_use]
    pub fn config(&self) -> &HostConfig { &self.config }

    /// A connection was accepted: build, register and activate its
    /// pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfiguration`] if `id` is already
    /// registered or the initializer fails.
    pub fn on_connect(&self, id: ConnectionId) -> Result<ConnectionHandle> {
        if self.connections.contains_key(&id) {
            return Err(PipelineError::invalid_config(format!(
                "{id} is already registered"
            )));
        }
        let mut builder = Pipeline::builder(id, Arc::clone(&self.transport))
            .timer(Arc::clone(&self.timer))
            .recovery(Arc::clone(&self.recovery))
            .mailbox_capacity(self.config.mailbox_capacity);
        (self.initializer)(&mut builder, &self.config)?;
        let pipeline = builder.build()?;
        let handle = pipeline.handle();
        self.connections.insert(id, Arc::new(Mutex::new(pipeline)));
        tracing::info!(connection = %id, "connection registered");
        self.run(id, Pipeline::on_connect)?;
        Ok(handle)
    }

    /// Bytes arrived for `id`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Closed`] if `id` is not registered.
    pub fn on_data(&self, id: ConnectionId, bytes: Bytes) -> Result<()> {
        self.run(id, |pipeline| pipeline.on_data(bytes))
    }

    /// A timer scheduled for `id` fired.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Closed`] if `id` is not registered.
    pub fn on_idle_tick(&self, id: ConnectionId, axis: IdleAxis) -> Result<()> {
        self.run(id, |pipeline| pipeline.on_idle_tick(axis))
    }

    /// Write `msg` from the tail of `id`'s pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Closed`] if `id` is not registered, or the
    /// failure the write produced.
    pub fn write(&self, id: ConnectionId, msg: Message) -> Result<()> {
        self.run(id, |pipeline| pipeline.write(msg))?
    }

    /// Write every message queued for `id`. Returns how many succeeded.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Closed`] if `id` is not registered.
    pub fn drain_mailbox(&self, id: ConnectionId) -> Result<usize> {
        let pipeline = self.pipeline(id)?;
        let mut pipeline = pipeline.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(pipeline.drain_mailbox())
    }

    /// Drain every connection's mailbox. Returns how many messages were
    /// written.
    pub fn drain_all(&self) -> usize {
        self.ids()
            .into_iter()
            .filter_map(|id| self.drain_mailbox(id).ok())
            .sum()
    }

    /// Close `id` locally.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Closed`] if `id` is not registered.
    pub fn close(&self, id: ConnectionId) -> Result<()> { self.run(id, Pipeline::close) }

    /// The I/O layer reports `id` is gone. Returns false if it was not
    /// registered.
    pub fn on_close(&self, id: ConnectionId) -> bool {
        let Some((_, pipeline)) = self.connections.remove(&id) else {
            return false;
        };
        pipeline
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .on_close();
        tracing::info!(connection = %id, "connection deregistered");
        true
    }

    /// Handle addressing `id`.
    #[must_use]
    pub fn handle(&self, id: ConnectionId) -> Option<ConnectionHandle> {
        let pipeline = self.pipeline(id).ok()?;
        let handle = pipeline.lock().unwrap_or_else(PoisonError::into_inner).handle();
        Some(handle)
    }

    /// Lifecycle state of `id`'s pipeline.
    #[must_use]
    pub fn state(&self, id: ConnectionId) -> Option<PipelineState> {
        let pipeline = self.pipeline(id).ok()?;
        let state = pipeline.lock().unwrap_or_else(PoisonError::into_inner).state();
        Some(state)
    }

    /// Run `f` against `id`'s pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Closed`] if `id` is not registered.
    pub fn with_pipeline<R>(&self, id: ConnectionId, f: impl FnOnce(&mut Pipeline) -> R) -> Result<R> {
        let pipeline = self.pipeline(id)?;
        let mut pipeline = pipeline.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(f(&mut pipeline))
    }

    /// Identifiers of the registered connections, sorted.
    #[must_use]
    pub fn ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<_> = self.connections.iter().map(|entry| *entry.key()).collect();
        ids.sort_unstable();
        ids
    }

    /// Number of registered connections.
    #[must_use]
    pub fn len(&self) -> usize { self.connections.len() }

    /// Returns true if no connection is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.connections.is_empty() }

    fn pipeline(&self, id: ConnectionId) -> Result<Arc<Mutex<Pipeline>>> {
        self.connections
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(PipelineError::Closed)
    }

    fn run<R>(&self, id: ConnectionId, f: impl FnOnce(&mut Pipeline) -> R) -> Result<R> {
        let pipeline = self.pipeline(id)?;
        let mut pipeline = pipeline.lock().unwrap_or_else(PoisonError::into_inner);
        let out = f(&mut pipeline);
        pipeline.drain_mailbox();
        Ok(out)
    }
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("connections", &self.connections.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
