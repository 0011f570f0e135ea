//! Binary frame codec

mod frame;

pub use frame::{
    apply_mask, decode, encode, encode_length, encode_with_mask, CloseNotice, Decoded,
    DecodedFrame, FrameHeader, FrameType, ABNORMAL_CLOSURE, NO_STATUS_RECEIVED,
};

/// Frame codec errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// The length does not fit the 63-bit extended length field
    #[error("payload too large to encode: {len} bytes")]
    PayloadTooLarge { len: u64 },

    #[error("incomplete frame header: {available} bytes available")]
    Incomplete { available: usize },
}
