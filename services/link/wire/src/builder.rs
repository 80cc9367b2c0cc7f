//! Back-to-front frame builder.
//!
//! Data is written from the end of an internal buffer towards its start, so
//! children (strings, vectors, nested tables) always land before the parents
//! that reference them. Every position handed out by the builder is measured
//! from the end of the buffer, which stays stable while the buffer grows.

use crate::scalar::Scalar;
use crate::{IDENTIFIER_LEN, SIZE_PREFIX_LEN};
use bytes::Bytes;
use std::marker::PhantomData;
use tracing::trace;

/// Size of an unsigned offset to a child object
const UOFFSET_SIZE: usize = 4;
/// Size of a vtable entry
const VOFFSET_SIZE: usize = 2;
/// Largest buffer the builder will grow to
const MAX_BUFFER_SIZE: usize = i32::MAX as usize;

/// Marker for string offsets
#[derive(Debug)]
pub enum WireStr {}

/// Marker for table offsets
#[derive(Debug)]
pub enum WireTable {}

/// Marker for vector offsets
#[derive(Debug)]
pub struct WireVector<T>(PhantomData<T>);

/// Position of an object written into a [`Builder`], measured from the end
/// of the buffer.
#[derive(Debug)]
pub struct Offset<T> {
    value: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Offset<T> {
    fn new(value: usize) -> Self {
        Self {
            value: value as u32,
            _marker: PhantomData,
        }
    }

    /// Raw distance from the end of the buffer
    pub fn value(&self) -> u32 {
        self.value
    }
}

impl<T> Clone for Offset<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Offset<T> {}

/// Growable builder for table-based frames
#[derive(Debug)]
pub struct Builder {
    buf: Vec<u8>,
    head: usize,
    min_align: usize,
    nested: bool,
    finished: bool,
    force_defaults: bool,
    object_start: usize,
    field_locs: Vec<(u16, usize)>,
    written_vtables: Vec<usize>,
}

impl Builder {
    /// Create a builder with a small initial buffer
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    /// Create a builder with room for `capacity` bytes before growing
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.clamp(16, MAX_BUFFER_SIZE);
        Self {
            buf: vec![0; capacity],
            head: capacity,
            min_align: 1,
            nested: false,
            finished: false,
            force_defaults: false,
            object_start: 0,
            field_locs: Vec::new(),
            written_vtables: Vec::new(),
        }
    }

    /// Write scalar fields even when they equal their schema default
    pub fn set_force_defaults(&mut self, force: bool) {
        self.force_defaults = force;
    }

    /// Clear all written data while keeping the allocation
    pub fn reset(&mut self) {
        self.head = self.buf.len();
        self.min_align = 1;
        self.nested = false;
        self.finished = false;
        self.object_start = 0;
        self.field_locs.clear();
        self.written_vtables.clear();
    }

    /// Bytes written so far
    pub fn used_space(&self) -> usize {
        self.buf.len() - self.head
    }

    /// Write a UTF-8 string: length prefix, bytes, and a null terminator
    pub fn create_string(&mut self, s: &str) -> Offset<WireStr> {
        self.assert_not_nested("create_string");
        self.align(s.len() + 1, UOFFSET_SIZE);
        self.push(0u8);
        let start = self.make_space(s.len());
        self.buf[start..start + s.len()].copy_from_slice(s.as_bytes());
        self.push(s.len() as u32);
        Offset::new(self.used_space())
    }

    /// Write a vector of scalars with a length prefix
    pub fn create_vector<T: Scalar>(&mut self, items: &[T]) -> Offset<WireVector<T>> {
        self.assert_not_nested("create_vector");
        let byte_len = items.len() * T::SIZE;
        self.align(byte_len, T::SIZE.max(UOFFSET_SIZE));
        let start = self.make_space(byte_len);
        for (i, item) in items.iter().enumerate() {
            let at = start + i * T::SIZE;
            item.write_le(&mut self.buf[at..at + T::SIZE]);
        }
        self.push(items.len() as u32);
        Offset::new(self.used_space())
    }

    /// Begin a table; fields are pushed until [`Builder::end_table`]
    pub fn start_table(&mut self) {
        self.assert_not_nested("start_table");
        self.nested = true;
        self.field_locs.clear();
        self.object_start = self.used_space();
    }

    /// Push a scalar field, skipping it when it equals the default
    pub fn push_slot<T: Scalar>(&mut self, field: u16, value: T, default: T) {
        if value == default && !self.force_defaults {
            return;
        }
        self.push_slot_always(field, value);
    }

    /// Push a scalar field unconditionally (optional scalars use this)
    pub fn push_slot_always<T: Scalar>(&mut self, field: u16, value: T) {
        self.assert_nested("push_slot_always");
        let loc = self.push(value);
        self.field_locs.push((field, loc));
    }

    /// Push a reference to a previously written child object
    pub fn push_offset<T>(&mut self, field: u16, offset: Offset<T>) {
        self.assert_nested("push_offset");
        let loc = self.push_uoffset(offset.value as usize);
        self.field_locs.push((field, loc));
    }

    /// Finish the open table, writing (or reusing) its vtable
    pub fn end_table(&mut self) -> Offset<WireTable> {
        self.assert_nested("end_table");

        // Placeholder for the offset back to the vtable
        let object_offset = self.push(0i32);
        let object_size = object_offset - self.object_start;

        let num_fields = self
            .field_locs
            .iter()
            .map(|(id, _)| *id as usize + 1)
            .max()
            .unwrap_or(0);
        let vtable_size = 2 * VOFFSET_SIZE + num_fields * VOFFSET_SIZE;

        let mut vtable = vec![0u8; vtable_size];
        (vtable_size as u16).write_le(&mut vtable[0..2]);
        (object_size as u16).write_le(&mut vtable[2..4]);
        for &(id, loc) in &self.field_locs {
            let slot = 2 * VOFFSET_SIZE + id as usize * VOFFSET_SIZE;
            ((object_offset - loc) as u16).write_le(&mut vtable[slot..slot + 2]);
        }

        let existing = self.written_vtables.iter().copied().find(|&vt| {
            let start = self.buf.len() - vt;
            self.buf
                .get(start..start + vtable_size)
                .map(|bytes| bytes == vtable.as_slice())
                .unwrap_or(false)
        });

        let vtable_offset = match existing {
            Some(vt) => vt,
            None => {
                let start = self.make_space(vtable_size);
                self.buf[start..start + vtable_size].copy_from_slice(&vtable);
                let vt = self.used_space();
                self.written_vtables.push(vt);
                vt
            }
        };

        let table_pos = self.buf.len() - object_offset;
        let soffset = vtable_offset as i32 - object_offset as i32;
        soffset.write_le(&mut self.buf[table_pos..table_pos + 4]);

        self.nested = false;
        self.field_locs.clear();
        trace!(
            "Finished table: size={}, fields={}, vtable_reused={}",
            object_size,
            num_fields,
            existing.is_some()
        );
        Offset::new(object_offset)
    }

    /// Write the root offset (and optional file identifier)
    pub fn finish(&mut self, root: Offset<WireTable>, identifier: Option<&[u8; IDENTIFIER_LEN]>) {
        self.finish_with(root, identifier, false);
    }

    /// Like [`Builder::finish`], preceded by a 4-byte size prefix
    pub fn finish_size_prefixed(
        &mut self,
        root: Offset<WireTable>,
        identifier: Option<&[u8; IDENTIFIER_LEN]>,
    ) {
        self.finish_with(root, identifier, true);
    }

    /// The finished frame
    pub fn finished_data(&self) -> &[u8] {
        assert!(self.finished, "finished_data called before finish");
        &self.buf[self.head..]
    }

    /// Consume the builder, returning the finished frame
    pub fn into_bytes(self) -> Bytes {
        assert!(self.finished, "into_bytes called before finish");
        Bytes::from(self.buf).slice(self.head..)
    }

    fn finish_with(
        &mut self,
        root: Offset<WireTable>,
        identifier: Option<&[u8; IDENTIFIER_LEN]>,
        size_prefixed: bool,
    ) {
        self.assert_not_nested("finish");
        let ident_len = if identifier.is_some() { IDENTIFIER_LEN } else { 0 };
        let prefix_len = if size_prefixed { SIZE_PREFIX_LEN } else { 0 };
        let min_align = self.min_align.max(UOFFSET_SIZE);
        self.align(UOFFSET_SIZE + ident_len + prefix_len, min_align);

        if let Some(ident) = identifier {
            let start = self.make_space(IDENTIFIER_LEN);
            self.buf[start..start + IDENTIFIER_LEN].copy_from_slice(ident);
        }
        self.push_uoffset(root.value as usize);
        if size_prefixed {
            let len = self.used_space();
            self.push(len as u32);
        }
        self.finished = true;
    }

    fn push<T: Scalar>(&mut self, value: T) -> usize {
        self.align(T::SIZE, T::SIZE);
        let start = self.make_space(T::SIZE);
        value.write_le(&mut self.buf[start..start + T::SIZE]);
        self.used_space()
    }

    fn push_uoffset(&mut self, target: usize) -> usize {
        self.align(UOFFSET_SIZE, UOFFSET_SIZE);
        assert!(target <= self.used_space(), "offset refers to unwritten data");
        let relative = self.used_space() + UOFFSET_SIZE - target;
        self.push(relative as u32)
    }

    /// Pad so that after writing `len` more bytes the position is aligned
    fn align(&mut self, len: usize, alignment: usize) {
        self.min_align = self.min_align.max(alignment);
        let pad = (!(self.used_space() + len)).wrapping_add(1) & (alignment - 1);
        let start = self.make_space(pad);
        self.buf[start..start + pad].fill(0);
    }

    fn make_space(&mut self, len: usize) -> usize {
        if len > self.head {
            self.grow(len);
        }
        self.head -= len;
        self.head
    }

    fn grow(&mut self, needed: usize) {
        let used = self.used_space();
        let new_len = (self.buf.len() * 2).max(used + needed);
        assert!(
            new_len <= MAX_BUFFER_SIZE,
            "cannot grow buffer beyond {} bytes",
            MAX_BUFFER_SIZE
        );
        let mut grown = vec![0u8; new_len];
        grown[new_len - used..].copy_from_slice(&self.buf[self.head..]);
        self.head = new_len - used;
        self.buf = grown;
    }

    fn assert_nested(&self, op: &str) {
        assert!(self.nested, "{} called outside of a table", op);
    }

    fn assert_not_nested(&self, op: &str) {
        assert!(!self.nested, "{} called while a table is open", op);
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}
