//! Frame extraction strategies.
//!
//! Each strategy is a `tokio_util` [`Decoder`](tokio_util::codec::Decoder)
//! turning buffered bytes into discrete [`Bytes`](bytes::Bytes) frames, and
//! an [`Encoder`](tokio_util::codec::Encoder) writing frames back to the
//! wire. Decoders never consume a partial frame: whatever is not emitted
//! stays buffered for the next call. [`FramingStage`] runs any of them inside
//! a pipeline.

pub mod capped;
pub mod conversion;
pub mod delimiter;
pub mod fixed;
pub mod format;
pub mod length;
mod stage;

pub use capped::CappedGreedyCodec;
pub use conversion::{bytes_to_u64, u64_to_bytes};
pub use delimiter::DelimiterCodec;
pub use fixed::FixedLengthCodec;
pub use format::{Endianness, LengthFormat};
pub use length::{LengthFieldConfig, LengthPrefixedCodec};
pub use stage::FramingStage;
