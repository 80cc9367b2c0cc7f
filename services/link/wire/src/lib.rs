//! Table-based binary codec for the viewer link protocol.
//!
//! This crate provides the low-level encoding used between the viewer and its
//! backend: a back-to-front [`Builder`] that writes children before parents,
//! and lazy [`Table`] views that resolve fields through a vtable on demand
//! without copying the frame.
//!
//! ## Features
//!
//! - **Schema Evolution**: fields missing from an older vtable read as their
//!   default; trailing vtable entries from a newer writer are ignored
//! - **Zero-Copy Reads**: strings and byte vectors borrow the frame
//! - **Bounds Checked**: every read is validated, malformed frames surface as
//!   [`WireError`] instead of panics
//! - **Vtable Sharing**: identical vtables are written once per frame
//!
//! ## Wire Format
//!
//! ```text
//! +----------------------+--------------------------------------+
//! | u32 size (opt)       | size-prefixed variant only           |
//! +----------------------+--------------------------------------+
//! | i32 root_offset      | relative to the start of this field  |
//! +----------------------+--------------------------------------+
//! | identifier (opt, 4B) | file identifier of the root type     |
//! +----------------------+--------------------------------------+
//! | vtables / tables /   | written back-to-front, little-endian |
//! | strings / vectors    |                                      |
//! +----------------------+--------------------------------------+
//!
//! vtable: [u16 vtable_len][u16 object_len][u16 field_offset; N]  (0 = absent)
//! table:  [i32 offset back to vtable][fields...]
//! string: [u32 len][utf-8 bytes][0]
//! vector: [u32 count][elements]
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod builder;
pub mod codec;
pub mod error;
pub mod scalar;
pub mod table;

// Re-export main types
pub use builder::{Builder, Offset, WireStr, WireTable, WireVector};
pub use codec::{encode, encode_size_prefixed, encode_with_capacity, Pack};
pub use error::{Result, WireError};
pub use scalar::Scalar;
pub use table::{
    buffer_has_identifier, has_identifier, read_size_prefix, root, size_prefixed_root, Table,
    TableView, Vector,
};

/// Smallest well-formed frame: root offset, table vtable offset, empty vtable
pub const MIN_FRAME_SIZE: usize = 12;

/// Length of the optional size prefix
pub const SIZE_PREFIX_LEN: usize = 4;

/// Length of a file identifier
pub const IDENTIFIER_LEN: usize = 4;

/// Maximum frame size accepted from a peer (16 MiB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;
