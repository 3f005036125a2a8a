//! Log line events for fan-out to many listeners.
//!
//! On the wire an event is `file_path ':' msg` in UTF-8. The separator is the
//! first colon, so a message may itself contain colons but a path may not.

use bytes::{BufMut, Bytes, BytesMut};

use super::{MessageDecoder, MessageEncoder};
use crate::{
    error::{PipelineError, Result},
    message::Message,
};

/// Byte separating the file path from the message.
pub const SEPARATOR: u8 = b':';

/// One line read from a log file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogEvent {
    /// File the line was read from.
    pub file_path: String,
    /// The line itself.
    pub msg: String,
}

impl LogEvent {
    /// Event for `msg` read from `file_path`.
    pub fn new(file_path: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            msg: msg.into(),
        }
    }
}

/// Converts frames to [`LogEvent`]s and back.
///
/// ```
/// use bytes::Bytes;
/// use pipeframe::codec::{LogEvent, LogEventCodec, MessageEncoder};
///
/// let mut codec = LogEventCodec;
/// let mut out = Vec::new();
/// codec
///     .encode(LogEvent::new("/var/log/app.log", "started"), &mut out)
///     .expect("encode");
/// let frame = out.remove(0).downcast::<Bytes>().expect("bytes");
/// assert_eq!(&frame[..], b"/var/log/app.log:started");
/// ```
#[derive(Clone, Copy, Debug, Default)]
pub struct LogEventCodec;

fn utf8(bytes: &[u8], part: &str) -> Result<String> {
    std::str::from_utf8(bytes)
        .map(str::to_owned)
        .map_err(|err| PipelineError::malformed(format!("log event {part}: {err}")))
}

impl MessageDecoder for LogEventCodec {
    type Input = Bytes;

    fn decode(&mut self, input: Bytes, out: &mut Vec<Message>) -> Result<()> {
        let Some(at) = input.iter().position(|&b| b == SEPARATOR) else {
            return Err(PipelineError::malformed(
                "log event is missing the `:` separator",
            ));
        };
        let file_path = utf8(&input[..at], "path")?;
        let msg = utf8(&input[at + 1..], "message")?;
        out.push(Message::new(LogEvent { file_path, msg }));
        Ok(())
    }
}

impl MessageEncoder for LogEventCodec {
    type Input = LogEvent;

    fn encode(&mut self, input: LogEvent, out: &mut Vec<Message>) -> Result<()> {
        if input.file_path.as_bytes().contains(&SEPARATOR) {
            return Err(PipelineError::malformed(format!(
                "log file path `{}` contains the separator",
                input.file_path
            )));
        }
        let mut frame = BytesMut::with_capacity(input.file_path.len() + 1 + input.msg.len());
        frame.put_slice(input.file_path.as_bytes());
        frame.put_u8(SEPARATOR);
        frame.put_slice(input.msg.as_bytes());
        out.push(Message::new(frame.freeze()));
        Ok(())
    }
}
