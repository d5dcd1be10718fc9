//! Append-only arena that every writer builds its output file in.
//!
//! Offsets into the arena stand in for pointers. A [`WritePtr`] is the
//! transient build-time handle; a [`RelPtr`] is the persisted form, a signed
//! 32-bit offset relative to its own storage address.

use std::marker::PhantomData;
use std::mem;

use bytemuck::{AnyBitPattern, NoUninit, Pod, Zeroable};

use crate::{write_name, AssetHeader, AssetType, MAGIC};

/// Build-time handle to a record inside an [`AssetBuffer`].
///
/// Only the byte offset is stored, so the handle stays valid across buffer
/// growth.
pub struct WritePtr<T> {
    offset: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T> WritePtr<T> {
    fn new(offset: usize) -> Self {
        Self {
            offset,
            _marker: PhantomData,
        }
    }

    pub fn offset(self) -> usize {
        self.offset
    }

    /// Handle to the `index`-th element of an allocated array.
    pub fn element(self, index: usize) -> Self {
        Self::new(self.offset + index * mem::size_of::<T>())
    }
}

impl<T> Clone for WritePtr<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for WritePtr<T> {}

impl<T> std::fmt::Debug for WritePtr<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("WritePtr").field(&self.offset).finish()
    }
}

/// Persisted pointer: a signed byte offset from this field to its target.
///
/// A stored value of zero is the null sentinel; no record can point at its
/// own pointer field.
#[repr(transparent)]
pub struct RelPtr<T> {
    offset: i32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> RelPtr<T> {
    pub fn is_null(&self) -> bool {
        self.offset == 0
    }

    pub fn raw(&self) -> i32 {
        self.offset
    }

    /// Absolute byte offset of the target, given the absolute offset of this
    /// field inside the file.
    pub fn target(&self, field_offset: usize) -> Option<usize> {
        if self.offset == 0 {
            return None;
        }

        Some((field_offset as i64 + i64::from(self.offset)) as usize)
    }
}

impl<T> Clone for RelPtr<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for RelPtr<T> {}

impl<T> std::fmt::Debug for RelPtr<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("RelPtr").field(&self.offset).finish()
    }
}

// `RelPtr` is a plain i32 on the wire. The marker is zero-sized and the
// `fn() -> T` spelling keeps the impls independent of `T`'s own traits.
unsafe impl<T: 'static> Zeroable for RelPtr<T> {}
unsafe impl<T: 'static> Pod for RelPtr<T> {}

/// Growable byte arena with the asset header pre-allocated at offset zero.
#[derive(Clone, Debug, Default)]
pub struct AssetBuffer {
    data: Vec<u8>,
}

impl AssetBuffer {
    pub fn new(asset_type: AssetType, name: &str) -> Self {
        let mut buffer = Self { data: Vec::new() };
        let ptr = buffer.alloc::<AssetHeader>(1);

        let mut header = AssetHeader::zeroed();
        header.magic = MAGIC;
        header.asset_type = asset_type as u16;
        write_name(&mut header.name, name);
        buffer.store(ptr, &header);

        buffer
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn header(&self) -> AssetHeader {
        self.read(WritePtr::new(0))
    }

    pub fn update_header(&mut self, f: impl FnOnce(&mut AssetHeader)) {
        self.update(WritePtr::new(0), f);
    }

    /// Reserves zeroed space for `count` values of `T` and returns a handle to
    /// the first one.
    pub fn alloc<T: Pod>(&mut self, count: usize) -> WritePtr<T> {
        let offset = self.data.len();
        self.data.resize(offset + mem::size_of::<T>() * count, 0);
        WritePtr::new(offset)
    }

    /// `alloc` followed by a copy. Repeated writes of the same data land at
    /// distinct offsets; the buffer never deduplicates.
    pub fn write_slice<T: NoUninit>(&mut self, src: &[T]) -> WritePtr<T> {
        let offset = self.data.len();
        self.data.extend_from_slice(bytemuck::cast_slice(src));
        WritePtr::new(offset)
    }

    pub fn read<T: AnyBitPattern>(&self, ptr: WritePtr<T>) -> T {
        let end = ptr.offset + mem::size_of::<T>();
        bytemuck::pod_read_unaligned(&self.data[ptr.offset..end])
    }

    pub fn store<T: NoUninit>(&mut self, ptr: WritePtr<T>, value: &T) {
        let end = ptr.offset + mem::size_of::<T>();
        self.data[ptr.offset..end].copy_from_slice(bytemuck::bytes_of(value));
    }

    /// Read-modify-write on a single record. The arena holds bytes, not
    /// aligned values, so mutation goes through a copy.
    pub fn update<T: AnyBitPattern + NoUninit>(
        &mut self,
        ptr: WritePtr<T>,
        f: impl FnOnce(&mut T),
    ) {
        let mut value = self.read(ptr);
        f(&mut value);
        self.store(ptr, &value);
    }

    /// Points the `RelPtr` field at `owner.offset() + field_offset` to
    /// `target`. Use `core::mem::offset_of!` for the field offset.
    pub fn link<P, T>(&mut self, owner: WritePtr<P>, field_offset: usize, target: WritePtr<T>) {
        let field = owner.offset + field_offset;
        debug_assert!(
            target.offset > field,
            "persisted pointers must point forward"
        );

        let value = (target.offset as i64 - field as i64) as i32;
        self.data[field..field + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// Appends zero bytes until the buffer length is a multiple of `align`.
    pub fn pad_to(&mut self, align: usize) {
        while self.data.len() % align != 0 {
            self.data.push(0);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::mem::offset_of;

    use bytemuck::{Pod, Zeroable};

    use super::{AssetBuffer, RelPtr};
    use crate::{AssetHeader, AssetType, MAGIC};

    #[derive(Copy, Clone, Pod, Zeroable)]
    #[repr(C)]
    struct Record {
        count: u32,
        payload: RelPtr<u32>,
    }

    #[test]
    fn header_is_preallocated() {
        let buffer = AssetBuffer::new(AssetType::Mesh, "cube");
        assert_eq!(buffer.len(), std::mem::size_of::<AssetHeader>());

        let header = buffer.header();
        assert_eq!(header.magic, MAGIC);
        assert_eq!(header.asset_type, AssetType::Mesh as u16);
    }

    #[test]
    fn alloc_zeroes_and_returns_pre_growth_offset() {
        let mut buffer = AssetBuffer::new(AssetType::Mesh, "cube");
        let before = buffer.len();
        let ptr = buffer.alloc::<u32>(4);
        assert_eq!(ptr.offset(), before);
        assert_eq!(buffer.len(), before + 16);
        assert_eq!(buffer.read(ptr.element(3)), 0u32);
    }

    #[test]
    fn duplicate_writes_get_distinct_offsets() {
        let mut buffer = AssetBuffer::new(AssetType::Mesh, "cube");
        let a = buffer.write_slice(&[1u32, 2, 3]);
        let b = buffer.write_slice(&[1u32, 2, 3]);
        assert_ne!(a.offset(), b.offset());
    }

    #[test]
    fn relative_pointer_resolves_forward() {
        let mut buffer = AssetBuffer::new(AssetType::Mesh, "cube");
        let record = buffer.alloc::<Record>(1);
        let payload = buffer.write_slice(&[7u32, 8, 9]);
        buffer.link(record, offset_of!(Record, payload), payload);

        let loaded = buffer.read(record);
        let field_offset = record.offset() + offset_of!(Record, payload);
        let target = loaded.payload.target(field_offset).unwrap();
        assert_eq!(target, payload.offset());
        assert!(target > field_offset);
    }

    #[test]
    fn pad_to_multiple_of_eight() {
        let mut buffer = AssetBuffer::new(AssetType::Mesh, "cube");
        buffer.write_slice(&[1u8, 2, 3]);
        buffer.pad_to(8);
        assert_eq!(buffer.len() % 8, 0);
    }
}
