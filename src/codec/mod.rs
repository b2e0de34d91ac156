//! Record to text conversion.
//!
//! Workers call a [`Codec`] once per record with their own
//! [`ScratchBuffer`]. A codec never allocates the output itself: it
//! either fills the buffer and returns the produced length (zero is a
//! valid, empty result) or reports [`CodecError::BufferTooSmall`] so the
//! caller can grow the buffer and try again.

pub use json::{FormatFlags, JsonCodec};
pub use scratch::ScratchBuffer;

use crate::message::{ElementRegistry, Record, RecordError};

mod json;
mod scratch;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("conversion buffer too small (required: {required:?})")]
    BufferTooSmall { required: Option<usize> },

    #[error("malformed record: {0}")]
    Malformed(#[from] RecordError),

    #[error("unsupported value: {0}")]
    Unsupported(String),
}

pub trait Codec: Send + Sync {
    fn convert(
        &self,
        record: &Record,
        elements: &ElementRegistry,
        out: &mut ScratchBuffer,
    ) -> Result<usize, CodecError>;
}
