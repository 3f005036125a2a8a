//! Translation between wire frame sub-types and a single tagged frame.
//!
//! [`WireFrame`] models the six WebSocket data and control frame kinds as
//! separate variants. [`TaggedFrame`] is the application-facing form: one
//! struct with an explicit [`FrameKind`] tag. Both conversions match
//! exhaustively, so a new kind must be handled on both sides before the
//! crate compiles.
//!
//! On the byte level a wire frame is a single opcode byte followed by the
//! payload. Opcodes follow RFC 6455.

use bytes::{BufMut, Bytes, BytesMut};

use super::{MessageDecoder, MessageEncoder};
use crate::{
    error::{PipelineError, Result},
    message::Message,
};

/// Kind tag carried by a [`TaggedFrame`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// Continuation of a fragmented message.
    Continuation,
    /// UTF-8 text data.
    Text,
    /// Binary data.
    Binary,
    /// Close handshake.
    Close,
    /// Keepalive request.
    Ping,
    /// Keepalive response.
    Pong,
}

impl FrameKind {
    /// RFC 6455 opcode of this kind.
    #[must_use]
    pub fn opcode(self) -> u8 {
        match self {
            FrameKind::Continuation => 0x0,
            FrameKind::Text => 0x1,
            FrameKind::Binary => 0x2,
            FrameKind::Close => 0x8,
            FrameKind::Ping => 0x9,
            FrameKind::Pong => 0xA,
        }
    }

    /// Kind for `opcode`, if it is one of the six known opcodes.
    #[must_use]
    pub fn from_opcode(opcode: u8) -> Option<Self> {
        match opcode {
            0x0 => Some(FrameKind::Continuation),
            0x1 => Some(FrameKind::Text),
            0x2 => Some(FrameKind::Binary),
            0x8 => Some(FrameKind::Close),
            0x9 => Some(FrameKind::Ping),
            0xA => Some(FrameKind::Pong),
            _ => None,
        }
    }
}

/// Wire-level frame, one variant per sub-type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WireFrame {
    /// Continuation frame.
    Continuation(Bytes),
    /// Text frame.
    Text(Bytes),
    /// Binary frame.
    Binary(Bytes),
    /// Close frame.
    Close(Bytes),
    /// Ping frame.
    Ping(Bytes),
    /// Pong frame.
    Pong(Bytes),
}

impl WireFrame {
    /// Parse an opcode byte followed by the payload.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::MalformedFrame`] for an empty frame and
    /// [`PipelineError::UnsupportedMessage`] for an unknown opcode.
    pub fn parse(mut bytes: Bytes) -> Result<Self> {
        if bytes.is_empty() {
            return Err(PipelineError::malformed("empty wire frame"));
        }
        let opcode = bytes[0];
        let payload = bytes.split_off(1);
        let kind = FrameKind::from_opcode(opcode).ok_or_else(|| {
            PipelineError::UnsupportedMessage {
                stage: format!("wire frame opcode {opcode:#04x}"),
                type_name: std::any::type_name::<WireFrame>(),
            }
        })?;
        Ok(TaggedFrame::new(kind, payload).into())
    }

    /// Serialise to an opcode byte followed by the payload.
    #[must_use]
    pub fn into_bytes(self) -> Bytes {
        let TaggedFrame { kind, payload } = self.into();
        let mut buf = BytesMut::with_capacity(payload.len() + 1);
        buf.put_u8(kind.opcode());
        buf.put_slice(&payload);
        buf.freeze()
    }

    /// Kind of this frame.
    #[must_use]
    pub fn kind(&self) -> FrameKind {
        match self {
            WireFrame::Continuation(_) => FrameKind::Continuation,
            WireFrame::Text(_) => FrameKind::Text,
            WireFrame::Binary(_) => FrameKind::Binary,
            WireFrame::Close(_) => FrameKind::Close,
            WireFrame::Ping(_) => FrameKind::Ping,
            WireFrame::Pong(_) => FrameKind::Pong,
        }
    }
}

/// Application-facing frame with an explicit kind tag.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaggedFrame {
    /// Sub-type of the frame.
    pub kind: FrameKind,
    /// Frame payload.
    pub payload: Bytes,
}

impl TaggedFrame {
    /// Create a tagged frame.
    #[must_use]
    pub fn new(kind: FrameKind, payload: Bytes) -> Self { Self { kind, payload } }
}

impl From<WireFrame> for TaggedFrame {
    fn from(frame: WireFrame) -> Self {
        match frame {
            WireFrame::Continuation(p) => Self::new(FrameKind::Continuation, p),
            WireFrame::Text(p) => Self::new(FrameKind::Text, p),
            WireFrame::Binary(p) => Self::new(FrameKind::Binary, p),
            WireFrame::Close(p) => Self::new(FrameKind::Close, p),
            WireFrame::Ping(p) => Self::new(FrameKind::Ping, p),
            WireFrame::Pong(p) => Self::new(FrameKind::Pong, p),
        }
    }
}

impl From<TaggedFrame> for WireFrame {
    fn from(frame: TaggedFrame) -> Self {
        let TaggedFrame { kind, payload } = frame;
        match kind {
            FrameKind::Continuation => WireFrame::Continuation(payload),
            FrameKind::Text => WireFrame::Text(payload),
            FrameKind::Binary => WireFrame::Binary(payload),
            FrameKind::Close => WireFrame::Close(payload),
            FrameKind::Ping => WireFrame::Ping(payload),
            FrameKind::Pong => WireFrame::Pong(payload),
        }
    }
}

/// Converts between raw frames and [`WireFrame`]s.
#[derive(Clone, Copy, Debug, Default)]
pub struct WireFrameCodec;

impl MessageDecoder for WireFrameCodec {
    type Input = Bytes;

    fn decode(&mut self, input: Bytes, out: &mut Vec<Message>) -> Result<()> {
        out.push(Message::new(WireFrame::parse(input)?));
        Ok(())
    }
}

impl MessageEncoder for WireFrameCodec {
    type Input = WireFrame;

    fn encode(&mut self, input: WireFrame, out: &mut Vec<Message>) -> Result<()> {
        out.push(Message::new(input.into_bytes()));
        Ok(())
    }
}

/// Converts inbound [`WireFrame`]s to [`TaggedFrame`]s and outbound
/// [`TaggedFrame`]s back to [`WireFrame`]s.
#[derive(Clone, Copy, Debug, Default)]
pub struct FrameTranslator;

impl MessageDecoder for FrameTranslator {
    type Input = WireFrame;

    fn decode(&mut self, input: WireFrame, out: &mut Vec<Message>) -> Result<()> {
        out.push(Message::new(TaggedFrame::from(input)));
        Ok(())
    }
}

impl MessageEncoder for FrameTranslator {
    type Input = TaggedFrame;

    fn encode(&mut self, input: TaggedFrame, out: &mut Vec<Message>) -> Result<()> {
        out.push(Message::new(WireFrame::from(input)));
        Ok(())
    }
}
