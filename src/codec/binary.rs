//! Structured messages serialised with `bincode`.

use std::marker::PhantomData;

use bincode::{Decode, Encode, config};
use bytes::Bytes;

use super::{MessageDecoder, MessageEncoder};
use crate::{
    error::{PipelineError, Result},
    message::Message,
};

/// Decodes whole frames into `M` and encodes `M` into frames using
/// `bincode`'s standard configuration.
///
/// A frame with bytes left over after decoding is malformed.
///
/// ```
/// use bincode::{Decode, Encode};
/// use pipeframe::codec::{BincodeCodec, CodecStage};
///
/// #[derive(Encode, Decode)]
/// struct Ping {
///     seq: u32,
/// }
///
/// let _stage = CodecStage::new(BincodeCodec::<Ping>::new());
/// ```
#[derive(Debug)]
pub struct BincodeCodec<M> {
    _marker: PhantomData<fn() -> M>,
}

impl<M> BincodeCodec<M> {
    /// Create the codec.
    #[must_use]
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<M> Default for BincodeCodec<M> {
    fn default() -> Self { Self::new() }
}

impl<M> MessageDecoder for BincodeCodec<M>
where
    M: Decode<()> + Send + 'static,
{
    type Input = Bytes;

    fn decode(&mut self, input: Bytes, out: &mut Vec<Message>) -> Result<()> {
        let (value, consumed): (M, usize) =
            bincode::decode_from_slice(&input, config::standard())
                .map_err(|err| PipelineError::malformed(format!("bincode decode: {err}")))?;
        if consumed != input.len() {
            return Err(PipelineError::malformed(format!(
                "{} trailing bytes after bincode message",
                input.len() - consumed
            )));
        }
        out.push(Message::new(value));
        Ok(())
    }
}

impl<M> MessageEncoder for BincodeCodec<M>
where
    M: Encode + Send + 'static,
{
    type Input = M;

    fn encode(&mut self, input: M, out: &mut Vec<Message>) -> Result<()> {
        let bytes = bincode::encode_to_vec(&input, config::standard())
            .map_err(|err| PipelineError::malformed(format!("bincode encode: {err}")))?;
        out.push(Message::new(Bytes::from(bytes)));
        Ok(())
    }
}
