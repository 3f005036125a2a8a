//! End-to-end chat scenarios driven through a [`Host`].

use std::sync::Arc;

use bytes::Bytes;
use pipeframe::{
    BroadcastGroup,
    ChatRoom,
    ConnectionId,
    EchoPolicy,
    EchoSetting,
    Host,
    HostConfig,
    PipelineBuilder,
    PipelineError,
    PipelineState,
    codec::{CodecStage, Utf8Codec},
    embedded::RecordingTransport,
    frame::{DelimiterCodec, FramingStage},
};
use rstest::rstest;

const A: ConnectionId = ConnectionId::new(1);
const B: ConnectionId = ConnectionId::new(2);
const C: ConnectionId = ConnectionId::new(3);

fn chat_host(echo: EchoSetting) -> (Host, Arc<RecordingTransport>, BroadcastGroup<String>) {
    let transport = Arc::new(RecordingTransport::new());
    let config = HostConfig {
        echo,
        ..HostConfig::default()
    };
    let room = BroadcastGroup::new("room").with_echo_policy(EchoPolicy::from(config.echo));
    let shared = room.clone();
    let host = Host::builder(transport.clone())
        .config(config)
        .initializer(move |builder: &mut PipelineBuilder, _: &HostConfig| {
            builder
                .push_stage("framer", FramingStage::new(DelimiterCodec::lines(256)?))
                .push_stage("text", CodecStage::new(Utf8Codec))
                .push_stage("chat", ChatRoom::new(shared.clone()));
            Ok(())
        })
        .build();
    (host, transport, room)
}

fn lines(chunks: Vec<Bytes>) -> Vec<String> {
    chunks
        .into_iter()
        .map(|chunk| String::from_utf8(chunk.to_vec()).expect("utf8"))
        .collect()
}

fn connect_all(host: &Host, transport: &RecordingTransport) {
    for id in [A, B, C] {
        host.on_connect(id).expect("connect");
    }
    host.drain_all();
    for id in [A, B, C] {
        transport.take_written(id);
    }
}

#[rstest]
#[case::echo(EchoSetting::Include, vec!["[ConnectionId(1)] say: hi\n".to_string()])]
#[case::no_echo(EchoSetting::Exclude, vec![])]
fn message_from_a_reaches_the_room(#[case] echo: EchoSetting, #[case] expected_for_a: Vec<String>) {
    let (host, transport, room) = chat_host(echo);
    connect_all(&host, &transport);
    assert_eq!(room.ids(), [A, B, C]);

    host.on_data(A, Bytes::from_static(b"hi\n")).expect("data");
    host.drain_all();

    assert_eq!(lines(transport.take_written(A)), expected_for_a);
    assert_eq!(lines(transport.take_written(B)), ["[ConnectionId(1)] say: hi\n"]);
    assert_eq!(lines(transport.take_written(C)), ["[ConnectionId(1)] say: hi\n"]);
}

#[test]
fn members_hear_joins_and_leaves() {
    let (host, transport, room) = chat_host(EchoSetting::Include);
    host.on_connect(A).expect("connect A");
    host.on_connect(B).expect("connect B");
    host.drain_all();
    assert_eq!(
        lines(transport.take_written(A)),
        ["Client ConnectionId(2) joined!\n"]
    );
    assert!(transport.take_written(B).is_empty());

    assert!(host.on_close(B));
    host.drain_all();
    assert_eq!(
        lines(transport.take_written(A)),
        ["Client ConnectionId(2) left!\n"]
    );
    assert_eq!(room.ids(), [A]);
    assert!(!host.on_close(B));
}

#[test]
fn partial_lines_wait_for_their_terminator() {
    let (host, transport, _room) = chat_host(EchoSetting::Include);
    connect_all(&host, &transport);

    host.on_data(B, Bytes::from_static(b"hel")).expect("data");
    host.drain_all();
    assert!(transport.written(C).is_empty());

    host.on_data(B, Bytes::from_static(b"lo\r\nbye\n")).expect("data");
    host.drain_all();
    assert_eq!(
        lines(transport.take_written(C)),
        ["[ConnectionId(2)] say: hello\n", "[ConnectionId(2)] say: bye\n"]
    );
}

#[test]
fn failing_member_does_not_block_others() {
    let (host, transport, room) = chat_host(EchoSetting::Exclude);
    connect_all(&host, &transport);
    transport.fail_writes(B, true);

    host.on_data(A, Bytes::from_static(b"still here\n")).expect("data");
    host.drain_all();
    assert!(transport.written(B).is_empty());
    assert_eq!(
        lines(transport.take_written(C)),
        ["[ConnectionId(1)] say: still here\n"]
    );
    assert!(room.contains(B));
    assert_eq!(host.state(B), Some(PipelineState::Active));
}

#[test]
fn oversized_line_closes_only_the_sender() {
    let (host, transport, room) = chat_host(EchoSetting::Include);
    connect_all(&host, &transport);

    host.on_data(C, Bytes::from(vec![b'x'; 300])).expect("data");
    assert_eq!(host.state(C), Some(PipelineState::Closing));
    assert_eq!(transport.closed(), [C]);
    assert!(!room.contains(C));
    host.drain_all();
    assert_eq!(
        lines(transport.take_written(A)),
        ["Client ConnectionId(3) left!\n"]
    );
}

#[test]
fn host_rejects_duplicates_and_unknown_ids() {
    let (host, _transport, _room) = chat_host(EchoSetting::Include);
    host.on_connect(A).expect("connect");
    let err = host.on_connect(A).expect_err("duplicate id");
    assert!(matches!(err, PipelineError::InvalidConfiguration { .. }));

    let err = host
        .on_data(ConnectionId::new(99), Bytes::from_static(b"x\n"))
        .expect_err("unknown id");
    assert!(matches!(err, PipelineError::Closed));
    assert_eq!(host.len(), 1);
}

#[test]
fn closing_a_handle_closes_its_pipeline() {
    let (host, transport, room) = chat_host(EchoSetting::Include);
    connect_all(&host, &transport);

    let handle = host.handle(B).expect("handle");
    handle.close();
    assert!(!room.contains(B));
    host.drain_mailbox(B).expect("drain");
    assert_eq!(host.state(B), Some(PipelineState::Closing));
    assert_eq!(transport.closed(), [B]);

    assert!(host.on_close(B));
    assert_eq!(host.len(), 2);
}
