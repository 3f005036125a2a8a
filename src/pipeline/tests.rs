//! Unit tests for pipeline dispatch and runtime mutation.

use std::sync::{
    Arc,
    Mutex,
    atomic::{AtomicUsize, Ordering},
};

use bytes::Bytes;
use rstest::{fixture, rstest};
use tracing_test::traced_test;

use super::*;
use crate::{
    embedded::{EmbeddedPipeline, RecordingTransport, SINK_NAME},
    recovery::ErrorContext,
};

type Log = Arc<Mutex<Vec<String>>>;

fn entries(log: &Log) -> Vec<String> { log.lock().expect("log lock").clone() }

fn take(log: &Log) -> Vec<String> { std::mem::take(&mut *log.lock().expect("log lock")) }

/// Records every hook it sees and forwards messages unchanged.
struct Recorder {
    name: &'static str,
    log: Log,
}

impl Recorder {
    fn new(name: &'static str, log: &Log) -> Self {
        Self {
            name,
            log: Arc::clone(log),
        }
    }

    fn record(&self, hook: &str) {
        self.log
            .lock()
            .expect("log lock")
            .push(format!("{hook}:{}", self.name));
    }
}

impl Stage for Recorder {
    fn on_connect(&mut self, _ctx: &mut StageContext<'_>) -> Result<()> {
        self.record("connect");
        Ok(())
    }

    fn on_read(&mut self, ctx: &mut StageContext<'_>, msg: Message) -> Result<()> {
        self.record("read");
        ctx.fire_read(msg);
        Ok(())
    }

    fn on_write(&mut self, ctx: &mut StageContext<'_>, msg: Message) -> Result<()> {
        self.record("write");
        ctx.write(msg)
    }

    fn on_close(&mut self, _ctx: &mut StageContext<'_>) { self.record("close"); }
}

/// Removes itself on the first message it sees.
struct OneShot(Log);

impl Stage for OneShot {
    fn on_read(&mut self, ctx: &mut StageContext<'_>, msg: Message) -> Result<()> {
        self.0.lock().expect("log lock").push("read:oneshot".into());
        ctx.remove_self();
        ctx.fire_read(msg);
        Ok(())
    }

    fn on_close(&mut self, _ctx: &mut StageContext<'_>) {
        self.0.lock().expect("log lock").push("close:oneshot".into());
    }
}

/// Inserts a recorder behind itself on the first message it sees.
struct Inserter {
    log: Log,
    done: bool,
}

impl Stage for Inserter {
    fn on_read(&mut self, ctx: &mut StageContext<'_>, msg: Message) -> Result<()> {
        if !self.done {
            self.done = true;
            let name = ctx.name().to_string();
            ctx.add_after(&name, "late", Recorder::new("late", &self.log))?;
        }
        ctx.fire_read(msg);
        Ok(())
    }
}

/// Replaces itself with a recorder on the first message it sees.
struct Swapper(Log);

impl Stage for Swapper {
    fn on_read(&mut self, ctx: &mut StageContext<'_>, msg: Message) -> Result<()> {
        let name = ctx.name().to_string();
        ctx.replace(&name, "swapped", Recorder::new("swapped", &self.0))?;
        ctx.fire_read(msg);
        Ok(())
    }
}

/// Fails every inbound message.
struct Faulty {
    non_fatal: bool,
}

impl Stage for Faulty {
    fn on_read(&mut self, _ctx: &mut StageContext<'_>, _msg: Message) -> Result<()> {
        Err(PipelineError::malformed("bad frame"))
    }

    fn non_fatal(&self) -> bool { self.non_fatal }
}

/// Requests a close and then tries to keep forwarding.
struct Closer;

impl Stage for Closer {
    fn on_read(&mut self, ctx: &mut StageContext<'_>, msg: Message) -> Result<()> {
        ctx.close();
        assert!(!ctx.is_open());
        ctx.fire_read(msg);
        Ok(())
    }
}

/// Installs a recorder behind itself when connected, then steps aside.
struct Initializer {
    log: Log,
    install: bool,
}

impl Stage for Initializer {
    fn on_connect(&mut self, ctx: &mut StageContext<'_>) -> Result<()> {
        if self.install {
            let name = ctx.name().to_string();
            ctx.add_after(&name, "added", Recorder::new("added", &self.log))?;
        }
        ctx.remove_self();
        Ok(())
    }
}

/// Appends a recorder at the tail when connected.
struct Appender(Log);

impl Stage for Appender {
    fn on_connect(&mut self, ctx: &mut StageContext<'_>) -> Result<()> {
        ctx.add_last("added", Recorder::new("added", &self.0))?;
        Ok(())
    }
}

/// Counts on_close notifications.
struct CloseCounter(Arc<AtomicUsize>);

impl Stage for CloseCounter {
    fn on_close(&mut self, _ctx: &mut StageContext<'_>) { self.0.fetch_add(1, Ordering::SeqCst); }
}

#[fixture]
fn log() -> Log { Arc::new(Mutex::new(Vec::new())) }

#[rstest]
fn stages_connect_head_to_tail(log: Log) {
    let _channel = EmbeddedPipeline::builder()
        .stage("a", Recorder::new("a", &log))
        .stage("b", Recorder::new("b", &log))
        .build()
        .expect("pipeline");
    assert_eq!(entries(&log), ["connect:a", "connect:b"]);
}

#[rstest]
fn insertion_operations_place_stages(log: Log) {
    let mut channel = EmbeddedPipeline::builder()
        .stage("a", Recorder::new("a", &log))
        .stage("c", Recorder::new("c", &log))
        .build()
        .expect("pipeline");
    let pipeline = channel.pipeline_mut();
    pipeline.add_first("head", Recorder::new("head", &log)).expect("add_first");
    pipeline.add_after("a", "b", Recorder::new("b", &log)).expect("add_after");
    pipeline
        .add_before(SINK_NAME, "d", Recorder::new("d", &log))
        .expect("add_before");
    pipeline.add_last("tail", Recorder::new("tail", &log)).expect("add_last");
    assert_eq!(pipeline.names(), ["head", "a", "b", "c", "d", SINK_NAME, "tail"]);

    take(&log);
    channel.write_inbound(Bytes::from_static(b"x"));
    assert_eq!(entries(&log), ["read:head", "read:a", "read:b", "read:c", "read:d"]);
    assert_eq!(channel.read_inbound::<Bytes>(), Some(Bytes::from_static(b"x")));
}

#[rstest]
fn added_stages_see_connect_and_removed_stages_see_close(log: Log) {
    let mut channel = EmbeddedPipeline::builder().build().expect("pipeline");
    take(&log);
    let pipeline = channel.pipeline_mut();
    pipeline.add_first("a", Recorder::new("a", &log)).expect("add");
    assert!(pipeline.remove("a").is_some());
    assert_eq!(entries(&log), ["connect:a", "close:a"]);
}

#[rstest]
fn duplicate_names_and_missing_anchors_are_rejected(log: Log) {
    let mut channel = EmbeddedPipeline::builder()
        .stage("a", Recorder::new("a", &log))
        .build()
        .expect("pipeline");
    let pipeline = channel.pipeline_mut();
    let err = pipeline.add_last("a", Recorder::new("a", &log)).expect_err("duplicate");
    assert!(matches!(err, PipelineError::InvalidConfiguration { .. }));
    let err = pipeline
        .add_after("missing", "b", Recorder::new("b", &log))
        .expect_err("missing anchor");
    assert!(matches!(err, PipelineError::InvalidConfiguration { .. }));

    let err = Pipeline::builder(ConnectionId::new(9), Arc::new(RecordingTransport::new()))
        .stage("x", Recorder::new("x", &log))
        .stage("x", Recorder::new("x", &log))
        .build()
        .expect_err("duplicate at build");
    assert!(matches!(err, PipelineError::InvalidConfiguration { .. }));
}

#[rstest]
fn removing_a_missing_stage_is_a_noop(log: Log) {
    let mut channel = EmbeddedPipeline::builder()
        .stage("a", Recorder::new("a", &log))
        .build()
        .expect("pipeline");
    let pipeline = channel.pipeline_mut();
    assert!(pipeline.remove("missing").is_none());
    assert!(pipeline.remove("missing").is_none());
    assert_eq!(pipeline.names(), ["a", SINK_NAME]);
}

#[rstest]
fn second_replacement_is_final_occupant(log: Log) {
    let mut channel = EmbeddedPipeline::builder()
        .stage("codec", Recorder::new("first", &log))
        .build()
        .expect("pipeline");
    let pipeline = channel.pipeline_mut();
    let old = pipeline
        .replace("codec", "codec", Recorder::new("second", &log))
        .expect("first replace");
    assert!(old.is_some());
    pipeline
        .replace("codec", "codec", Recorder::new("third", &log))
        .expect("second replace");
    assert_eq!(pipeline.names(), ["codec", SINK_NAME]);

    take(&log);
    channel.write_inbound(Bytes::from_static(b"x"));
    assert_eq!(entries(&log), ["read:third"]);
}

#[rstest]
fn replace_rejects_missing_or_taken_names(log: Log) {
    let mut channel = EmbeddedPipeline::builder()
        .stage("a", Recorder::new("a", &log))
        .stage("b", Recorder::new("b", &log))
        .build()
        .expect("pipeline");
    let pipeline = channel.pipeline_mut();
    let err = pipeline
        .replace("missing", "c", Recorder::new("c", &log))
        .err()
        .expect("missing");
    assert!(matches!(err, PipelineError::InvalidConfiguration { .. }));
    let err = pipeline
        .replace("a", "b", Recorder::new("c", &log))
        .err()
        .expect("taken");
    assert!(matches!(err, PipelineError::InvalidConfiguration { .. }));
    assert_eq!(pipeline.names(), ["a", "b", SINK_NAME]);
}

#[rstest]
fn stage_removing_itself_keeps_traversal_intact(log: Log) {
    let mut channel = EmbeddedPipeline::builder()
        .stage("a", Recorder::new("a", &log))
        .stage("oneshot", OneShot(Arc::clone(&log)))
        .stage("b", Recorder::new("b", &log))
        .build()
        .expect("pipeline");
    take(&log);

    channel.write_inbound(Bytes::from_static(b"1"));
    assert_eq!(
        entries(&log),
        ["read:a", "read:oneshot", "read:b", "close:oneshot"]
    );
    take(&log);

    channel.write_inbound(Bytes::from_static(b"2"));
    assert_eq!(entries(&log), ["read:a", "read:b"]);
    assert_eq!(channel.inbound_len(), 2);
    assert_eq!(channel.pipeline_mut().names(), ["a", "b", SINK_NAME]);
}

#[rstest]
fn stage_inserted_mid_dispatch_receives_the_message(log: Log) {
    let mut channel = EmbeddedPipeline::builder()
        .stage(
            "inserter",
            Inserter {
                log: Arc::clone(&log),
                done: false,
            },
        )
        .stage("b", Recorder::new("b", &log))
        .build()
        .expect("pipeline");
    take(&log);

    channel.write_inbound(Bytes::from_static(b"x"));
    assert_eq!(entries(&log), ["connect:late", "read:late", "read:b"]);
    assert_eq!(channel.pipeline_mut().names(), ["inserter", "late", "b", SINK_NAME]);
}

#[rstest]
fn replacement_installed_mid_dispatch_receives_the_message(log: Log) {
    let mut channel = EmbeddedPipeline::builder()
        .stage("swapper", Swapper(Arc::clone(&log)))
        .build()
        .expect("pipeline");

    channel.write_inbound(Bytes::from_static(b"x"));
    assert_eq!(entries(&log), ["connect:swapped", "read:swapped"]);
    assert_eq!(channel.pipeline_mut().names(), ["swapped", SINK_NAME]);
    assert_eq!(channel.inbound_len(), 1);
}

#[rstest]
fn outbound_writes_travel_tail_to_head(log: Log) {
    let mut channel = EmbeddedPipeline::builder()
        .stage("a", Recorder::new("a", &log))
        .stage("b", Recorder::new("b", &log))
        .build()
        .expect("pipeline");
    take(&log);

    channel
        .write_outbound(Message::new(Bytes::from_static(b"out")))
        .expect("write");
    channel
        .write_outbound(Message::new(b"vec".to_vec()))
        .expect("write vec");
    assert_eq!(entries(&log), ["write:b", "write:a", "write:b", "write:a"]);
    assert_eq!(
        channel.outbound(),
        [Bytes::from_static(b"out"), Bytes::from_static(b"vec")]
    );
}

#[test]
#[traced_test]
fn fault_disconnects_once_by_default() {
    let mut channel = EmbeddedPipeline::builder()
        .stage("faulty", Faulty { non_fatal: false })
        .build()
        .expect("pipeline");

    channel.write_inbound(Bytes::from_static(b"x"));
    let faults = channel.faults();
    assert_eq!(faults.len(), 1);
    assert_eq!(faults[0].kind, "malformed_frame");
    assert_eq!(faults[0].stage, "faulty");
    assert_eq!(faults[0].policy, RecoveryPolicy::Disconnect);
    assert_eq!(channel.state(), PipelineState::Closing);
    assert_eq!(channel.transport().closed(), [channel.id()]);
    assert!(logs_contain("pipeline fault, closing connection"));

    channel.write_inbound(Bytes::from_static(b"y"));
    assert_eq!(channel.faults().len(), 1);
    assert_eq!(channel.inbound_len(), 0);
}

#[test]
fn drop_policy_keeps_connection_open() {
    let hook = |_: &PipelineError, _: &ErrorContext| RecoveryPolicy::Drop;
    let mut channel = EmbeddedPipeline::builder()
        .stage("faulty", Faulty { non_fatal: false })
        .recovery(Arc::new(hook))
        .build()
        .expect("pipeline");

    channel.write_inbound(Bytes::from_static(b"x"));
    channel.write_inbound(Bytes::from_static(b"y"));
    assert_eq!(channel.faults().len(), 2);
    assert!(channel.is_open());
    assert_eq!(channel.state(), PipelineState::Active);
    assert_eq!(channel.inbound_len(), 0);
}

#[test]
#[traced_test]
fn non_fatal_stage_drops_without_consulting_hook() {
    let mut channel = EmbeddedPipeline::builder()
        .stage("lenient", Faulty { non_fatal: true })
        .build()
        .expect("pipeline");

    channel.write_inbound(Bytes::from_static(b"x"));
    assert!(channel.faults().is_empty());
    assert!(channel.is_open());
    assert_eq!(channel.inbound_len(), 0);
    assert!(logs_contain("non-fatal stage fault"));
}

#[test]
fn head_rejects_non_byte_messages() {
    let mut channel = EmbeddedPipeline::builder().build().expect("pipeline");
    let err = channel
        .write_outbound(Message::new(7_u32))
        .expect_err("u32 cannot reach the transport");
    assert!(matches!(
        err,
        PipelineError::UnsupportedMessage { ref stage, type_name: "u32" } if stage == "head"
    ));
    let faults = channel.faults();
    assert_eq!(faults.len(), 1);
    assert_eq!(faults[0].stage, "head");
    assert_eq!(channel.state(), PipelineState::Closing);
}

#[test]
fn transport_failure_is_returned_to_the_writer() {
    let mut channel = EmbeddedPipeline::builder().build().expect("pipeline");
    channel.transport().fail_writes(channel.id(), true);
    let err = channel
        .write_outbound(Message::new(Bytes::from_static(b"x")))
        .expect_err("write fails");
    assert!(matches!(err, PipelineError::WriteFailure { .. }));
    assert!(channel.faults().is_empty());
    assert!(channel.is_open());
}

#[test]
fn close_is_deferred_and_transport_closed_once() {
    let closes = Arc::new(AtomicUsize::new(0));
    let mut channel = EmbeddedPipeline::builder()
        .stage("closer", Closer)
        .stage("counter", CloseCounter(Arc::clone(&closes)))
        .build()
        .expect("pipeline");

    channel.write_inbound(Bytes::from_static(b"x"));
    assert_eq!(channel.inbound_len(), 0);
    assert_eq!(channel.state(), PipelineState::Closing);
    assert_eq!(closes.load(Ordering::SeqCst), 1);

    channel.close();
    channel.pipeline_mut().on_close();
    assert_eq!(channel.state(), PipelineState::Closed);
    assert_eq!(channel.transport().closed().len(), 1);
    assert_eq!(closes.load(Ordering::SeqCst), 1);
}

#[test]
fn peer_close_does_not_close_transport() {
    let mut channel = EmbeddedPipeline::builder().build().expect("pipeline");
    channel.pipeline_mut().on_close();
    assert_eq!(channel.state(), PipelineState::Closed);
    assert!(channel.transport().closed().is_empty());
    let err = channel
        .write_outbound(Message::new(Bytes::from_static(b"late")))
        .expect_err("closed");
    assert!(matches!(err, PipelineError::Closed));
}

#[test]
fn user_events_reach_the_tail() {
    let mut channel = EmbeddedPipeline::builder().build().expect("pipeline");
    channel.fire_event(PipelineEvent::user(5_u8));
    match channel.read_event() {
        Some(PipelineEvent::User(msg)) => assert_eq!(msg.downcast::<u8>().ok(), Some(5)),
        other => panic!("unexpected event: {other:?}"),
    }
}

#[test]
fn mailbox_messages_are_written_on_drain() {
    let mut channel = EmbeddedPipeline::builder().build().expect("pipeline");
    let handle = channel.pipeline_mut().handle();
    handle
        .send(Message::new(Bytes::from_static(b"queued")))
        .expect("send");
    assert_eq!(channel.pipeline_mut().drain_mailbox(), 1);
    assert_eq!(channel.read_outbound(), Some(Bytes::from_static(b"queued")));

    handle.close();
    channel.pipeline_mut().drain_mailbox();
    assert_eq!(channel.state(), PipelineState::Closing);
}

#[test]
fn empty_reads_are_ignored() {
    let mut channel = EmbeddedPipeline::builder().build().expect("pipeline");
    assert!(!channel.write_inbound(Bytes::new()));
    assert_eq!(channel.inbound_len(), 0);
}

#[rstest]
fn stage_removed_while_connecting_does_not_skip_its_successor(log: Log) {
    let channel = EmbeddedPipeline::builder()
        .stage(
            "init",
            Initializer {
                log: Arc::clone(&log),
                install: false,
            },
        )
        .stage("b", Recorder::new("b", &log))
        .build()
        .expect("pipeline");
    assert_eq!(entries(&log), ["connect:b"]);
    assert!(channel.is_open());
}

#[rstest]
fn initializer_installs_stages_and_steps_aside(log: Log) {
    let mut channel = EmbeddedPipeline::builder()
        .stage(
            "init",
            Initializer {
                log: Arc::clone(&log),
                install: true,
            },
        )
        .stage("b", Recorder::new("b", &log))
        .build()
        .expect("pipeline");
    assert_eq!(take(&log), ["connect:added", "connect:b"]);

    let names = channel.pipeline_mut().names();
    assert_eq!(names, ["added", "b", SINK_NAME]);
    channel.write_inbound(Bytes::from_static(b"x"));
    assert_eq!(entries(&log), ["read:added", "read:b"]);
}

#[rstest]
fn stage_added_while_connecting_is_connected_once(log: Log) {
    let channel = EmbeddedPipeline::builder()
        .stage("appender", Appender(Arc::clone(&log)))
        .build()
        .expect("pipeline");
    assert_eq!(entries(&log), ["connect:added"]);
    assert!(channel.is_open());
}
