//! Round trips through complete framer and codec chains.

use bytes::{BufMut, Bytes, BytesMut};
use pipeframe::{
    Message,
    codec::{
        CodecStage,
        FrameKind,
        FrameTranslator,
        IntegerCodec,
        IntegerTextCodec,
        TaggedFrame,
        WireFrameCodec,
    },
    embedded::EmbeddedPipeline,
    frame::{FramingStage, LengthFieldConfig, LengthFormat, LengthPrefixedCodec},
};
use proptest::prelude::*;
use rstest::rstest;

fn length_prefixed() -> FramingStage<LengthPrefixedCodec> {
    let codec = LengthPrefixedCodec::new(LengthFieldConfig::new(LengthFormat::u32_be()))
        .expect("valid config");
    FramingStage::new(codec)
}

fn text_numbers() -> EmbeddedPipeline {
    EmbeddedPipeline::builder()
        .stage("framer", length_prefixed())
        .stage("int", IntegerCodec::<i16>::new())
        .stage("text", CodecStage::new(IntegerTextCodec::<i16>::new()))
        .build()
        .expect("pipeline")
}

fn websocket_like() -> EmbeddedPipeline {
    EmbeddedPipeline::builder()
        .stage("framer", length_prefixed())
        .stage("wire", CodecStage::new(WireFrameCodec))
        .stage("translate", CodecStage::new(FrameTranslator))
        .build()
        .expect("pipeline")
}

#[test]
fn text_number_chain_uses_the_documented_wire_format() {
    let mut channel = text_numbers();
    channel
        .write_outbound(Message::new(String::from("-2")))
        .expect("encode");
    assert_eq!(
        channel.read_outbound(),
        Some(Bytes::from_static(&[0, 0, 0, 2, 0xff, 0xfe]))
    );

    channel.write_inbound(Bytes::from_static(&[0, 0, 0, 2, 0x01, 0x00]));
    assert_eq!(channel.read_inbound::<String>().as_deref(), Some("256"));
}

#[test]
fn text_number_chain_rejects_values_wider_than_16_bits() {
    let mut channel = text_numbers();
    assert!(
        channel
            .write_outbound(Message::new(String::from("70000")))
            .is_err()
    );
    assert_eq!(channel.faults()[0].kind, "encoding_overflow");
    assert!(channel.outbound().is_empty());
}

#[rstest]
#[case(FrameKind::Continuation)]
#[case(FrameKind::Text)]
#[case(FrameKind::Binary)]
#[case(FrameKind::Close)]
#[case(FrameKind::Ping)]
#[case(FrameKind::Pong)]
fn every_frame_kind_survives_the_chain(#[case] kind: FrameKind) {
    let mut channel = websocket_like();
    let frame = TaggedFrame::new(kind, Bytes::from_static(b"payload"));
    channel
        .write_outbound(Message::new(frame.clone()))
        .expect("encode");
    let wire = channel.read_outbound().expect("one frame");

    channel.write_inbound(wire);
    assert_eq!(channel.read_inbound::<TaggedFrame>(), Some(frame));
}

#[test]
fn unknown_wire_opcode_is_reported_not_swallowed() {
    let mut channel = websocket_like();
    let mut wire = BytesMut::new();
    wire.put_u32(2);
    wire.put_slice(&[0x7, b'x']);
    channel.write_inbound(wire.freeze());
    assert_eq!(channel.inbound_len(), 0);
    let faults = channel.faults();
    assert_eq!(faults.len(), 1);
    assert_eq!(faults[0].kind, "unsupported_message");
    assert_eq!(faults[0].stage, "wire");
}

proptest! {
    #[test]
    fn any_i16_round_trips(value in any::<i16>()) {
        let mut channel = text_numbers();
        channel
            .write_outbound(Message::new(value.to_string()))
            .expect("in range");
        let wire = channel.read_outbound().expect("frame");
        channel.write_inbound(wire);
        prop_assert_eq!(channel.read_inbound::<String>(), Some(value.to_string()));
    }

    #[test]
    fn tagged_frames_round_trip_in_arbitrary_chunks(
        payload in proptest::collection::vec(any::<u8>(), 0..64),
        split in 0usize..80,
    ) {
        let mut channel = websocket_like();
        let frame = TaggedFrame::new(FrameKind::Binary, Bytes::from(payload));
        channel.write_outbound(Message::new(frame.clone())).expect("encode");
        let wire = channel.read_outbound().expect("frame");
        let split = split.min(wire.len());
        channel.write_inbound(wire.slice(..split));
        channel.write_inbound(wire.slice(split..));
        prop_assert_eq!(channel.read_inbound::<TaggedFrame>(), Some(frame));
    }
}
