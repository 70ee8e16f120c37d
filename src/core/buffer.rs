//! Purpose: Shared byte view used by concurrent producers and external readers.
//! Exports: `AtomicBuffer`.
//! Role: The only place that touches raw memory; everything above works in offsets.
//! Invariants: Every access is bounds-checked against the view length before any pointer math.
//! Invariants: Frame fields are little-endian on every host; ordered accessors are the publish points.
use std::cell::UnsafeCell;
use std::fmt;
use std::marker::PhantomData;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicI32, AtomicI64, Ordering};

use crate::core::error::{Error, ErrorKind};

const ATOMIC_ALIGNMENT: usize = 8;

/// Borrowed view over a shared byte region.
///
/// Plain accessors perform unsynchronized reads and writes. They are only
/// meaningful on ranges the caller owns through a tail reservation, or on
/// frames whose length has already been observed with
/// [`AtomicBuffer::get_i32_volatile`].
#[derive(Clone, Copy)]
pub struct AtomicBuffer<'a> {
    data: NonNull<u8>,
    len: usize,
    _lifetime: PhantomData<&'a UnsafeCell<[u8]>>,
}

// SAFETY: producers only write byte ranges granted exclusively by the tail
// counter, and readers only read a frame after an acquire load of its length.
unsafe impl Send for AtomicBuffer<'_> {}
unsafe impl Sync for AtomicBuffer<'_> {}

impl<'a> AtomicBuffer<'a> {
    /// Wrap an exclusively borrowed slice.
    ///
    /// The base must be 8-byte aligned so ordered 32/64-bit accesses at
    /// aligned offsets are valid.
    pub fn wrap(bytes: &'a mut [u8]) -> Result<Self, Error> {
        if bytes.as_ptr() as usize % ATOMIC_ALIGNMENT != 0 {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("buffer base must be 8-byte aligned"));
        }
        let len = bytes.len();
        let data = NonNull::from(bytes).cast::<u8>();
        Ok(Self {
            data,
            len,
            _lifetime: PhantomData,
        })
    }

    /// Build a view from a raw region.
    ///
    /// # Safety
    ///
    /// - `data` must point to `len` bytes valid for reads and writes for `'a`
    /// - `data` must be 8-byte aligned
    /// - no other code may hold a `&mut` to the region for `'a`
    pub(crate) unsafe fn from_raw_parts(data: NonNull<u8>, len: usize) -> Self {
        debug_assert_eq!(data.as_ptr() as usize % ATOMIC_ALIGNMENT, 0);
        Self {
            data,
            len,
            _lifetime: PhantomData,
        }
    }

    pub fn capacity(&self) -> usize {
        self.len
    }

    /// Bounds-checked sub-view sharing the same memory.
    pub fn view(&self, offset: usize, len: usize) -> AtomicBuffer<'a> {
        self.bounds_check(offset, len);
        // SAFETY: range checked above; lifetime and aliasing rules are inherited.
        let data = unsafe { self.data.add(offset) };
        AtomicBuffer {
            data,
            len,
            _lifetime: PhantomData,
        }
    }

    pub fn get_u8(&self, offset: usize) -> u8 {
        self.bounds_check(offset, 1);
        unsafe { self.ptr_at(offset).read_volatile() }
    }

    pub fn put_u8(&self, offset: usize, value: u8) {
        self.bounds_check(offset, 1);
        unsafe { self.ptr_at(offset).write_volatile(value) }
    }

    pub fn get_i8(&self, offset: usize) -> i8 {
        self.get_u8(offset) as i8
    }

    pub fn put_i8(&self, offset: usize, value: i8) {
        self.put_u8(offset, value as u8);
    }

    pub fn get_u16(&self, offset: usize) -> u16 {
        u16::from_le_bytes(self.read_array(offset))
    }

    pub fn put_u16(&self, offset: usize, value: u16) {
        self.write_array(offset, value.to_le_bytes());
    }

    pub fn get_i32(&self, offset: usize) -> i32 {
        i32::from_le_bytes(self.read_array(offset))
    }

    pub fn put_i32(&self, offset: usize, value: i32) {
        self.write_array(offset, value.to_le_bytes());
    }

    pub fn get_i64(&self, offset: usize) -> i64 {
        i64::from_le_bytes(self.read_array(offset))
    }

    pub fn put_i64(&self, offset: usize, value: i64) {
        self.write_array(offset, value.to_le_bytes());
    }

    /// Release store; everything written before it is visible to an acquire load.
    pub fn put_i32_ordered(&self, offset: usize, value: i32) {
        self.atomic_i32(offset).store(value.to_le(), Ordering::Release);
    }

    /// Acquire load pairing with [`AtomicBuffer::put_i32_ordered`].
    pub fn get_i32_volatile(&self, offset: usize) -> i32 {
        i32::from_le(self.atomic_i32(offset).load(Ordering::Acquire))
    }

    // Counters live in metadata and keep native byte order so fetch_add stays a single instruction.
    pub fn get_i64_volatile(&self, offset: usize) -> i64 {
        self.atomic_i64(offset).load(Ordering::Acquire)
    }

    pub fn put_i64_ordered(&self, offset: usize, value: i64) {
        self.atomic_i64(offset).store(value, Ordering::Release);
    }

    pub fn get_and_add_i64(&self, offset: usize, delta: i64) -> i64 {
        self.atomic_i64(offset).fetch_add(delta, Ordering::AcqRel)
    }

    /// Atomic view of an aligned 64-bit slot, borrowed for the buffer's lifetime.
    pub fn atomic_i64(&self, offset: usize) -> &'a AtomicI64 {
        self.bounds_check(offset, 8);
        self.alignment_check(offset, 8);
        // SAFETY: in bounds, aligned, and every access to the slot goes through atomics.
        unsafe { AtomicI64::from_ptr(self.ptr_at(offset).cast::<i64>()) }
    }

    pub fn put_bytes(&self, offset: usize, src: &[u8]) {
        self.bounds_check(offset, src.len());
        // SAFETY: destination checked above; `src` is a distinct borrowed slice.
        unsafe {
            std::ptr::copy_nonoverlapping(src.as_ptr(), self.ptr_at(offset), src.len());
        }
    }

    pub fn get_bytes(&self, offset: usize, dst: &mut [u8]) {
        self.bounds_check(offset, dst.len());
        unsafe {
            std::ptr::copy_nonoverlapping(self.ptr_at(offset), dst.as_mut_ptr(), dst.len());
        }
    }

    pub fn set_memory(&self, offset: usize, len: usize, value: u8) {
        self.bounds_check(offset, len);
        unsafe { std::ptr::write_bytes(self.ptr_at(offset), value, len) }
    }

    fn atomic_i32(&self, offset: usize) -> &'a AtomicI32 {
        self.bounds_check(offset, 4);
        self.alignment_check(offset, 4);
        // SAFETY: in bounds and aligned; racing accesses to the slot are atomic.
        unsafe { AtomicI32::from_ptr(self.ptr_at(offset).cast::<i32>()) }
    }

    fn read_array<const N: usize>(&self, offset: usize) -> [u8; N] {
        self.bounds_check(offset, N);
        unsafe { self.ptr_at(offset).cast::<[u8; N]>().read_unaligned() }
    }

    fn write_array<const N: usize>(&self, offset: usize, bytes: [u8; N]) {
        self.bounds_check(offset, N);
        unsafe { self.ptr_at(offset).cast::<[u8; N]>().write_unaligned(bytes) }
    }

    /// Caller must have bounds-checked `offset`.
    unsafe fn ptr_at(&self, offset: usize) -> *mut u8 {
        unsafe { self.data.as_ptr().add(offset) }
    }

    #[inline]
    fn bounds_check(&self, offset: usize, len: usize) {
        let end = offset.checked_add(len);
        assert!(
            end.is_some_and(|end| end <= self.len),
            "buffer access out of range: offset={offset} len={len} capacity={}",
            self.len
        );
    }

    #[inline]
    fn alignment_check(&self, offset: usize, align: usize) {
        let addr = self.data.as_ptr() as usize + offset;
        assert!(addr % align == 0, "unaligned atomic access at offset {offset}");
    }
}

impl fmt::Debug for AtomicBuffer<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AtomicBuffer")
            .field("addr", &self.data.as_ptr())
            .field("capacity", &self.len)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::AtomicBuffer;
    use crate::core::error::ErrorKind;

    fn aligned(len: usize) -> Vec<u64> {
        vec![0u64; len.div_ceil(8)]
    }

    fn as_bytes(words: &mut [u64]) -> &mut [u8] {
        let len = std::mem::size_of_val(words);
        unsafe { std::slice::from_raw_parts_mut(words.as_mut_ptr().cast::<u8>(), len) }
    }

    #[test]
    fn fields_are_little_endian() {
        let mut words = aligned(16);
        let buffer = AtomicBuffer::wrap(as_bytes(&mut words)).expect("wrap");
        buffer.put_i32(0, 0x0102_0304);
        buffer.put_u16(4, 0xA0B0);
        assert_eq!(buffer.get_u8(0), 0x04);
        assert_eq!(buffer.get_u8(3), 0x01);
        assert_eq!(buffer.get_u8(4), 0xB0);
        assert_eq!(buffer.get_i32(0), 0x0102_0304);
        assert_eq!(buffer.get_u16(4), 0xA0B0);
    }

    #[test]
    fn ordered_store_matches_plain_layout() {
        let mut words = aligned(8);
        let buffer = AtomicBuffer::wrap(as_bytes(&mut words)).expect("wrap");
        buffer.put_i32_ordered(4, -42);
        assert_eq!(buffer.get_i32(4), -42);
        assert_eq!(buffer.get_i32_volatile(4), -42);
    }

    #[test]
    fn get_and_add_returns_previous_value() {
        let mut words = aligned(8);
        let buffer = AtomicBuffer::wrap(as_bytes(&mut words)).expect("wrap");
        buffer.put_i64_ordered(0, 7 << 32);
        let previous = buffer.get_and_add_i64(0, 64);
        assert_eq!(previous, 7 << 32);
        assert_eq!(buffer.get_i64_volatile(0), (7 << 32) + 64);
    }

    #[test]
    fn view_shares_memory_at_offset() {
        let mut words = aligned(64);
        let buffer = AtomicBuffer::wrap(as_bytes(&mut words)).expect("wrap");
        let view = buffer.view(32, 32);
        view.put_i64(0, 99);
        assert_eq!(view.capacity(), 32);
        assert_eq!(buffer.get_i64(32), 99);
    }

    #[test]
    fn bytes_copy_in_and_out() {
        let mut words = aligned(32);
        let buffer = AtomicBuffer::wrap(as_bytes(&mut words)).expect("wrap");
        buffer.put_bytes(3, b"hello");
        let mut out = [0u8; 5];
        buffer.get_bytes(3, &mut out);
        assert_eq!(&out, b"hello");
        buffer.set_memory(3, 5, 0);
        buffer.get_bytes(3, &mut out);
        assert_eq!(out, [0u8; 5]);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn out_of_range_access_panics() {
        let mut words = aligned(8);
        let buffer = AtomicBuffer::wrap(as_bytes(&mut words)).expect("wrap");
        buffer.put_i32(6, 1);
    }

    #[test]
    fn misaligned_base_is_rejected() {
        let mut words = aligned(16);
        let bytes = as_bytes(&mut words);
        let err = AtomicBuffer::wrap(&mut bytes[1..]).expect_err("misaligned");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }
}
