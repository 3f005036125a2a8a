#![doc(html_root_url = "https://docs.rs/pipeframe/latest")]
//! Public API for the `pipeframe` library.
//!
//! This crate provides building blocks for byte-stream protocol pipelines:
//! frame extractors, chainable codec stages, a per-connection pipeline that
//! can be rearranged while it runs, idle detection with heartbeats, and
//! broadcast groups for fanning messages out to many connections.
//!
//! The library performs no socket I/O itself. An I/O layer feeds bytes,
//! timer ticks and close notifications into a [`Host`] or directly into a
//! [`Pipeline`], and receives outbound bytes through a [`Transport`].

pub mod broadcast;
pub mod byte_order;
pub mod chat;
pub mod codec;
pub mod config;
pub mod embedded;
pub mod error;
pub mod frame;
pub mod host;
pub mod idle;
pub mod message;
pub mod metrics;
pub mod pipeline;
pub mod recovery;
pub mod session;
pub mod timer;
pub mod transport;

pub use broadcast::{BroadcastGroup, BroadcastReport, EchoPolicy, GroupMember};
pub use chat::ChatRoom;
pub use codec::{CodecStage, DecoderStage, EncoderStage, MessageDecoder, MessageEncoder};
pub use config::{EchoSetting, HostConfig};
pub use error::{PipelineError, Result};
pub use host::{Host, HostBuilder, PipelineInitializer};
pub use idle::{Heartbeat, IdleAxis, IdleConfig, IdleMonitor, IdleState, IdleStateEvent};
pub use message::Message;
pub use pipeline::{
    Pipeline,
    PipelineBuilder,
    PipelineEvent,
    PipelineState,
    Stage,
    StageContext,
    StageId,
};
pub use recovery::{
    DefaultRecoveryPolicy,
    Direction,
    ErrorContext,
    RecoveryPolicy,
    RecoveryPolicyHook,
};
pub use session::{ConnectionHandle, ConnectionId, Mailbox, MailboxEvent, Membership};
pub use timer::{NoopTimer, Tick, Timer, TimerKey, TokioTimer};
pub use transport::{ChannelTransport, Transport, TransportCommand};
