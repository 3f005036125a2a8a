//! Idle detection and heartbeat timing on Tokio's paused clock.

use std::time::Duration;

use bytes::Bytes;
use pipeframe::{
    Heartbeat,
    IdleConfig,
    IdleMonitor,
    IdleState,
    IdleStateEvent,
    Message,
    PipelineState,
    embedded::EmbeddedPipeline,
};

const ZERO: Duration = Duration::ZERO;

fn secs(n: u64) -> Duration { Duration::from_secs(n) }

fn monitored(config: IdleConfig) -> EmbeddedPipeline {
    EmbeddedPipeline::builder()
        .stage("idle", IdleMonitor::new(config))
        .build()
        .expect("pipeline")
}

fn heartbeat_pipeline(window: Duration) -> EmbeddedPipeline {
    EmbeddedPipeline::builder()
        .stage("idle", IdleMonitor::new(IdleConfig::all_idle(window)))
        .stage("heartbeat", Heartbeat::default())
        .build()
        .expect("pipeline")
}

#[tokio::test(start_paused = true)]
async fn read_idle_fires_once_per_window() {
    let mut channel = monitored(IdleConfig::new(secs(5), ZERO, ZERO));

    channel.advance(secs(4)).await;
    assert!(channel.idle_events().is_empty());

    channel.advance(secs(1)).await;
    assert_eq!(
        channel.idle_events(),
        [IdleStateEvent {
            state: IdleState::ReaderIdle,
            first: true
        }]
    );

    channel.advance(secs(4)).await;
    assert!(channel.idle_events().is_empty());
    channel.advance(secs(1)).await;
    assert_eq!(
        channel.idle_events(),
        [IdleStateEvent {
            state: IdleState::ReaderIdle,
            first: false
        }]
    );
}

#[tokio::test(start_paused = true)]
async fn read_resets_the_window() {
    let mut channel = monitored(IdleConfig::new(secs(5), ZERO, ZERO));

    channel.advance(secs(3)).await;
    channel.write_inbound(Bytes::from_static(b"ping"));

    channel.advance(secs(2)).await;
    assert!(channel.idle_events().is_empty(), "no event at t=5");
    channel.advance(secs(2)).await;
    assert!(channel.idle_events().is_empty(), "no event at t=7");

    channel.advance(secs(1)).await;
    let events = channel.idle_events();
    assert_eq!(events.len(), 1, "exactly one event at t=8");
    assert_eq!(events[0].state, IdleState::ReaderIdle);
    assert!(events[0].first);
}

#[tokio::test(start_paused = true)]
async fn only_successful_writes_reset_write_idle() {
    let mut channel = monitored(IdleConfig::new(ZERO, secs(5), ZERO));

    channel.advance(secs(3)).await;
    channel
        .write_outbound(Message::new(Bytes::from_static(b"out")))
        .expect("write");
    channel.advance(secs(4)).await;
    assert!(channel.idle_events().is_empty());

    channel.transport().fail_writes(channel.id(), true);
    assert!(
        channel
            .write_outbound(Message::new(Bytes::from_static(b"lost")))
            .is_err()
    );
    channel.advance(secs(1)).await;
    let events = channel.idle_events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].state, IdleState::WriterIdle);
}

#[tokio::test(start_paused = true)]
async fn all_idle_needs_both_directions_quiet() {
    let mut channel = monitored(IdleConfig::new(ZERO, ZERO, secs(10)));

    channel.advance(secs(6)).await;
    channel.write_inbound(Bytes::from_static(b"in"));
    channel.advance(secs(6)).await;
    channel
        .write_outbound(Message::new(Bytes::from_static(b"out")))
        .expect("write");
    channel.advance(secs(9)).await;
    assert!(channel.idle_events().is_empty());

    channel.advance(secs(1)).await;
    let events = channel.idle_events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].state, IdleState::AllIdle);
}

#[tokio::test(start_paused = true)]
async fn zero_windows_disable_monitoring() {
    let mut channel = monitored(IdleConfig::default());
    assert_eq!(channel.timer().pending(), 0);
    channel.advance(secs(3600)).await;
    assert!(channel.idle_events().is_empty());
}

#[tokio::test(start_paused = true)]
async fn heartbeat_is_written_when_idle() {
    let mut channel = heartbeat_pipeline(secs(60));

    channel.advance(secs(59)).await;
    assert!(channel.read_outbound().is_none());

    channel.advance(secs(1)).await;
    assert_eq!(channel.read_outbound(), Some(Bytes::from_static(b"HEARTBEAT")));
    assert!(channel.idle_events().is_empty(), "heartbeat consumes idle events");

    // The heartbeat itself counts as a write.
    channel.advance(secs(59)).await;
    assert!(channel.read_outbound().is_none());
    channel.advance(secs(1)).await;
    assert_eq!(channel.read_outbound(), Some(Bytes::from_static(b"HEARTBEAT")));
    assert!(channel.is_open());
}

#[tokio::test(start_paused = true)]
async fn failed_heartbeat_closes_the_connection() {
    let mut channel = heartbeat_pipeline(secs(60));
    channel.transport().fail_writes(channel.id(), true);

    channel.advance(secs(60)).await;
    assert_eq!(channel.state(), PipelineState::Closing);
    assert_eq!(channel.transport().closed(), [channel.id()]);
    assert_eq!(channel.timer().pending(), 0, "close cancels idle timers");
    assert!(channel.faults().is_empty());
}

#[tokio::test(start_paused = true)]
async fn closing_cancels_pending_timers() {
    let mut channel = monitored(IdleConfig::new(secs(1), secs(2), secs(3)));
    assert_eq!(channel.timer().pending(), 3);
    channel.close();
    assert_eq!(channel.timer().pending(), 0);
    channel.advance(secs(10)).await;
    assert!(channel.idle_events().is_empty());
}
