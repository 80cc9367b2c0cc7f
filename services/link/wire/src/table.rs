//! Lazy, buffer-backed views over encoded frames.
//!
//! A [`Table`] is a `(buffer, position)` pair. Nothing is copied when a frame
//! is decoded; each accessor resolves its field through the vtable on demand
//! and bounds-checks every read.

use crate::error::{Result, WireError};
use crate::scalar::Scalar;
use crate::{IDENTIFIER_LEN, MIN_FRAME_SIZE, SIZE_PREFIX_LEN};
use std::marker::PhantomData;

const UOFFSET_SIZE: usize = 4;
const VTABLE_HEADER_SIZE: usize = 4;

/// A schema view that can be rooted at a table
pub trait TableView<'a>: Sized {
    /// File identifier written after the root offset, if the type has one
    const IDENTIFIER: Option<&'static [u8; IDENTIFIER_LEN]> = None;

    /// Wrap a validated table
    fn from_table(table: Table<'a>) -> Self;
}

/// View of one table inside a frame
#[derive(Debug, Clone, Copy)]
pub struct Table<'a> {
    buf: &'a [u8],
    loc: usize,
    vtable: usize,
    vtable_len: usize,
    object_len: usize,
}

impl<'a> Table<'a> {
    /// Validate the table header and vtable at `loc`
    pub fn new(buf: &'a [u8], loc: usize) -> Result<Self> {
        let soffset = read_scalar::<i32>(buf, loc)?;
        let vtable = (loc as i64) - (soffset as i64);
        if vtable < 0 {
            return Err(WireError::Vtable { offset: loc });
        }
        let vtable = vtable as usize;

        let vtable_len = read_scalar::<u16>(buf, vtable)? as usize;
        let object_len = read_scalar::<u16>(buf, vtable + 2)? as usize;

        if vtable_len < VTABLE_HEADER_SIZE || vtable_len % 2 != 0 {
            return Err(WireError::Vtable { offset: vtable });
        }
        if vtable + vtable_len > buf.len() {
            return Err(WireError::OutOfBounds {
                offset: vtable + vtable_len,
                len: buf.len(),
            });
        }
        if object_len < UOFFSET_SIZE || loc + object_len > buf.len() {
            return Err(WireError::Vtable { offset: vtable });
        }

        Ok(Self {
            buf,
            loc,
            vtable,
            vtable_len,
            object_len,
        })
    }

    /// Position of this table inside the frame
    pub fn loc(&self) -> usize {
        self.loc
    }

    /// Underlying frame bytes
    pub fn buf(&self) -> &'a [u8] {
        self.buf
    }

    /// Whether the vtable records a value for `field`
    pub fn has_field(&self, field: u16) -> bool {
        self.field_offset(field) != 0
    }

    /// Read a scalar field, returning `default` when absent
    pub fn get<T: Scalar>(&self, field: u16, default: T) -> Result<T> {
        Ok(self.get_optional(field)?.unwrap_or(default))
    }

    /// Read a scalar field that has no schema default
    pub fn get_optional<T: Scalar>(&self, field: u16) -> Result<Option<T>> {
        match self.field_offset(field) {
            0 => Ok(None),
            voffset => {
                if voffset + T::SIZE > self.object_len {
                    return Err(WireError::Vtable {
                        offset: self.vtable,
                    });
                }
                read_scalar(self.buf, self.loc + voffset).map(Some)
            }
        }
    }

    /// Read a string field; absent strings are `None`, not empty
    pub fn get_str(&self, field: u16) -> Result<Option<&'a str>> {
        let Some(target) = self.indirect(field)? else {
            return Ok(None);
        };
        let bytes = read_length_prefixed(self.buf, target, 1)?;
        std::str::from_utf8(bytes)
            .map(Some)
            .map_err(|_| WireError::Utf8 { offset: target })
    }

    /// Read a nested table field
    pub fn get_table(&self, field: u16) -> Result<Option<Table<'a>>> {
        match self.indirect(field)? {
            Some(target) => Table::new(self.buf, target).map(Some),
            None => Ok(None),
        }
    }

    /// Read a scalar vector field
    pub fn get_vector<T: Scalar>(&self, field: u16) -> Result<Option<Vector<'a, T>>> {
        let Some(target) = self.indirect(field)? else {
            return Ok(None);
        };
        let bytes = read_length_prefixed(self.buf, target, T::SIZE)?;
        Ok(Some(Vector {
            bytes,
            _marker: PhantomData,
        }))
    }

    /// Field offset within the object, 0 when absent. Ids beyond an older
    /// writer's vtable read as absent.
    fn field_offset(&self, field: u16) -> usize {
        let slot = VTABLE_HEADER_SIZE + field as usize * 2;
        if slot + 2 > self.vtable_len {
            return 0;
        }
        // vtable bounds were checked in `new`
        u16::read_le(&self.buf[self.vtable + slot..]) as usize
    }

    /// Follow the unsigned offset stored in `field`
    fn indirect(&self, field: u16) -> Result<Option<usize>> {
        let Some(relative) = self.get_optional::<u32>(field)? else {
            return Ok(None);
        };
        let pos = self.loc + self.field_offset(field);
        let target = pos
            .checked_add(relative as usize)
            .filter(|&t| t < self.buf.len())
            .ok_or(WireError::OutOfBounds {
                offset: pos.saturating_add(relative as usize),
                len: self.buf.len(),
            })?;
        Ok(Some(target))
    }
}

/// Lazy view over a vector of scalars
#[derive(Debug, Clone, Copy)]
pub struct Vector<'a, T> {
    bytes: &'a [u8],
    _marker: PhantomData<T>,
}

impl<'a, T: Scalar + 'a> Vector<'a, T> {
    /// Number of elements
    pub fn len(&self) -> usize {
        self.bytes.len() / T::SIZE
    }

    /// Whether the vector has no elements
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Element at `index`
    pub fn get(&self, index: usize) -> Option<T> {
        let start = index.checked_mul(T::SIZE)?;
        self.bytes
            .get(start..start.checked_add(T::SIZE)?)
            .map(|raw| T::read_le(raw))
    }

    /// Iterate the elements in order
    pub fn iter(&self) -> impl Iterator<Item = T> + 'a {
        self.bytes.chunks_exact(T::SIZE).map(T::read_le)
    }

    /// Copy the elements out
    pub fn to_vec(&self) -> Vec<T> {
        self.iter().collect()
    }
}

impl<'a> Vector<'a, u8> {
    /// Borrow the raw bytes without copying
    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }
}

/// Decode the root table of a frame that starts at `offset` in `buf`
pub fn root<'a, V: TableView<'a>>(buf: &'a [u8], offset: usize) -> Result<V> {
    let frame = buf.get(offset..).ok_or(WireError::OutOfBounds {
        offset,
        len: buf.len(),
    })?;
    if frame.len() < MIN_FRAME_SIZE {
        return Err(WireError::TooShort {
            len: frame.len(),
            min: MIN_FRAME_SIZE,
        });
    }

    let root_offset = i32::read_le(frame);
    if root_offset < UOFFSET_SIZE as i32 || root_offset as usize >= frame.len() {
        return Err(WireError::OutOfBounds {
            offset: root_offset.max(0) as usize,
            len: frame.len(),
        });
    }

    Table::new(frame, root_offset as usize).map(V::from_table)
}

/// Decode the root table of a size-prefixed frame
pub fn size_prefixed_root<'a, V: TableView<'a>>(buf: &'a [u8]) -> Result<V> {
    let declared = read_size_prefix(buf).ok_or(WireError::TooShort {
        len: buf.len(),
        min: SIZE_PREFIX_LEN + MIN_FRAME_SIZE,
    })?;
    let actual = buf.len() - SIZE_PREFIX_LEN;
    if declared > actual {
        return Err(WireError::SizePrefix { declared, actual });
    }
    root(&buf[SIZE_PREFIX_LEN..SIZE_PREFIX_LEN + declared], 0)
}

/// Read the little-endian size prefix, if enough bytes are present
pub fn read_size_prefix(buf: &[u8]) -> Option<usize> {
    buf.get(..SIZE_PREFIX_LEN).map(|raw| u32::read_le(raw) as usize)
}

/// Whether the frame carries `identifier` right after its root offset
pub fn buffer_has_identifier(
    buf: &[u8],
    identifier: &[u8; IDENTIFIER_LEN],
    size_prefixed: bool,
) -> bool {
    let start = UOFFSET_SIZE + if size_prefixed { SIZE_PREFIX_LEN } else { 0 };
    buf.get(start..start + IDENTIFIER_LEN)
        .map(|found| found == identifier)
        .unwrap_or(false)
}

/// Whether `buf` carries the file identifier of `V`; types without one
/// match any frame
pub fn has_identifier<'a, V: TableView<'a>>(buf: &[u8], size_prefixed: bool) -> bool {
    V::IDENTIFIER.map_or(true, |identifier| {
        buffer_has_identifier(buf, identifier, size_prefixed)
    })
}

fn read_scalar<T: Scalar>(buf: &[u8], pos: usize) -> Result<T> {
    buf.get(pos..pos.saturating_add(T::SIZE))
        .filter(|raw| raw.len() == T::SIZE)
        .map(T::read_le)
        .ok_or(WireError::OutOfBounds {
            offset: pos,
            len: buf.len(),
        })
}

/// Slice of `count * elem_size` bytes following a u32 count at `pos`
fn read_length_prefixed(buf: &[u8], pos: usize, elem_size: usize) -> Result<&[u8]> {
    let count = read_scalar::<u32>(buf, pos)? as usize;
    let start = pos + UOFFSET_SIZE;
    let end = count
        .checked_mul(elem_size)
        .and_then(|len| start.checked_add(len))
        .filter(|&end| end <= buf.len())
        .ok_or(WireError::OutOfBounds {
            offset: start,
            len: buf.len(),
        })?;
    Ok(&buf[start..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::Builder;

    struct Sample<'a>(Table<'a>);

    impl<'a> TableView<'a> for Sample<'a> {
        fn from_table(table: Table<'a>) -> Self {
            Sample(table)
        }
    }

    fn sample_frame() -> Vec<u8> {
        let mut builder = Builder::new();
        let name = builder.create_string("cube");
        let data = builder.create_vector(&[1u32, 2, 3]);
        builder.start_table();
        builder.push_offset(0, name);
        builder.push_slot(1, 9u16, 0);
        builder.push_offset(2, data);
        let root = builder.end_table();
        builder.finish(root, Some(b"PRB0"));
        builder.finished_data().to_vec()
    }

    #[test]
    fn test_read_fields() {
        let frame = sample_frame();
        let Sample(table) = root::<Sample>(&frame, 0).unwrap();

        assert_eq!(table.get_str(0).unwrap(), Some("cube"));
        assert_eq!(table.get::<u16>(1, 0).unwrap(), 9);
        let vector = table.get_vector::<u32>(2).unwrap().unwrap();
        assert_eq!(vector.to_vec(), vec![1, 2, 3]);
        assert_eq!(vector.get(3), None);
    }

    #[test]
    fn test_absent_fields() {
        let frame = sample_frame();
        let Sample(table) = root::<Sample>(&frame, 0).unwrap();

        // field 5 lies beyond this vtable, as if written by an older peer
        assert!(!table.has_field(5));
        assert_eq!(table.get::<u8>(5, 4).unwrap(), 4);
        assert_eq!(table.get_optional::<u64>(5).unwrap(), None);
        assert_eq!(table.get_str(5).unwrap(), None);
        assert!(table.get_table(5).unwrap().is_none());
    }

    #[test]
    fn test_identifier() {
        let frame = sample_frame();
        assert!(buffer_has_identifier(&frame, b"PRB0", false));
        assert!(!buffer_has_identifier(&frame, b"XXXX", false));
        assert!(!buffer_has_identifier(&frame[..6], b"PRB0", false));
        // a view type without an identifier accepts any frame
        assert!(has_identifier::<Sample>(&frame[..6], false));
    }

    #[test]
    fn test_root_at_offset() {
        let mut padded = vec![0xAAu8; 7];
        padded.extend_from_slice(&sample_frame());
        let Sample(table) = root::<Sample>(&padded, 7).unwrap();
        assert_eq!(table.get_str(0).unwrap(), Some("cube"));
    }

    #[test]
    fn test_truncated_frames_fail() {
        let frame = sample_frame();
        for len in 0..MIN_FRAME_SIZE {
            assert!(matches!(
                root::<Sample>(&frame[..len], 0),
                Err(WireError::TooShort { .. })
            ));
        }
        // every prefix either fails cleanly or yields a table whose reads fail cleanly
        for len in MIN_FRAME_SIZE..frame.len() {
            if let Ok(Sample(table)) = root::<Sample>(&frame[..len], 0) {
                let _ = table.get_str(0);
                let _ = table.get_vector::<u32>(2);
            }
        }
    }

    #[test]
    fn test_bad_root_offset() {
        let mut frame = sample_frame();
        let past_end = (frame.len() as u32 + 100).to_le_bytes();
        frame[0..4].copy_from_slice(&past_end);
        assert!(matches!(
            root::<Sample>(&frame, 0),
            Err(WireError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_root_offset_past_buffer_start() {
        let frame = sample_frame();
        assert!(matches!(
            root::<Sample>(&frame, frame.len() + 1),
            Err(WireError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_string_length_out_of_bounds() {
        let mut builder = Builder::new();
        let name = builder.create_string("abcd");
        builder.start_table();
        builder.push_offset(0, name);
        let root_offset = builder.end_table();
        builder.finish(root_offset, None);
        let mut frame = builder.finished_data().to_vec();

        let pos = frame
            .windows(4)
            .position(|w| w == b"abcd")
            .expect("string bytes present");
        frame[pos - 4..pos].copy_from_slice(&1000u32.to_le_bytes());

        let Sample(table) = root::<Sample>(&frame, 0).unwrap();
        assert!(matches!(
            table.get_str(0),
            Err(WireError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_size_prefixed_root() {
        let mut builder = Builder::new();
        builder.start_table();
        builder.push_slot_always(0, 77u64);
        let root_offset = builder.end_table();
        builder.finish_size_prefixed(root_offset, None);
        let frame = builder.finished_data().to_vec();

        let Sample(table) = size_prefixed_root::<Sample>(&frame).unwrap();
        assert_eq!(table.get_optional::<u64>(0).unwrap(), Some(77));

        assert!(matches!(
            size_prefixed_root::<Sample>(&frame[..frame.len() - 1]),
            Err(WireError::SizePrefix { .. })
        ));
        assert!(matches!(
            size_prefixed_root::<Sample>(&frame[..2]),
            Err(WireError::TooShort { .. })
        ));
    }
}
