//! Encoding entry points shared by every schema type.
//!
//! Schema types implement [`Pack`] once; framing, identifiers and size
//! prefixes are handled here so no message type repeats that logic.

use crate::builder::{Builder, Offset, WireTable};
use crate::IDENTIFIER_LEN;
use bytes::Bytes;
use tracing::trace;

/// An owned value that can be written into a [`Builder`]
pub trait Pack {
    /// File identifier written when this type is the root of a frame
    const IDENTIFIER: Option<&'static [u8; IDENTIFIER_LEN]> = None;

    /// Write the value (children first) and return the table offset
    fn pack(&self, builder: &mut Builder) -> Offset<WireTable>;
}

/// Encode `value` as a complete frame
pub fn encode<P: Pack>(value: &P) -> Bytes {
    encode_with(value, Builder::new(), false)
}

/// Encode `value` as a frame preceded by its 4-byte size prefix
pub fn encode_size_prefixed<P: Pack>(value: &P) -> Bytes {
    encode_with(value, Builder::new(), true)
}

/// Encode `value` into a builder sized for roughly `capacity` bytes
pub fn encode_with_capacity<P: Pack>(value: &P, capacity: usize) -> Bytes {
    encode_with(value, Builder::with_capacity(capacity), false)
}

fn encode_with<P: Pack>(value: &P, mut builder: Builder, size_prefixed: bool) -> Bytes {
    let root = value.pack(&mut builder);
    if size_prefixed {
        builder.finish_size_prefixed(root, P::IDENTIFIER);
    } else {
        builder.finish(root, P::IDENTIFIER);
    }
    let bytes = builder.into_bytes();
    trace!(
        "Encoded frame: {} bytes (size_prefixed={})",
        bytes.len(),
        size_prefixed
    );
    bytes
}
