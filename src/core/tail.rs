//! Purpose: Packed (term ID, term offset) tail position and its atomic counter.
//! Exports: `TailCounter`, `pack_tail`, `term_id`, `raw_term_offset`, `term_offset`.
//! Role: `TailCounter::set` resets a term for reuse; `get_and_add` is the reservation path.
//! Invariants: Sole synchronization point between producers appending to one term.
//! Invariants: Term ID lives in the high 32 bits, the raw offset in the low 32 bits.
//! Invariants: The raw offset may exceed the term length after a reservation; that is the overrun signal.
use std::sync::atomic::{AtomicI64, Ordering};

const OFFSET_MASK: i64 = 0xFFFF_FFFF;

#[derive(Clone, Copy, Debug)]
pub struct TailCounter<'a> {
    value: &'a AtomicI64,
}

impl<'a> TailCounter<'a> {
    pub fn new(value: &'a AtomicI64) -> Self {
        Self { value }
    }

    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Acquire)
    }

    /// Reserve `aligned_length` bytes; returns the raw tail before the add.
    pub fn get_and_add(&self, aligned_length: i32) -> i64 {
        self.value.fetch_add(i64::from(aligned_length), Ordering::AcqRel)
    }

    /// Only for term reset while no producer is appending.
    pub fn set(&self, raw_tail: i64) {
        self.value.store(raw_tail, Ordering::Release);
    }
}

pub fn pack_tail(term_id: i32, term_offset: i32) -> i64 {
    (i64::from(term_id) << 32) | (i64::from(term_offset) & OFFSET_MASK)
}

pub fn term_id(raw_tail: i64) -> i32 {
    (raw_tail >> 32) as i32
}

/// Raw low bits, unsigned, before clamping.
pub fn raw_term_offset(raw_tail: i64) -> i64 {
    raw_tail & OFFSET_MASK
}

/// Offset clamped to the term length, as readers of the tail expect.
pub fn term_offset(raw_tail: i64, term_length: i32) -> i32 {
    raw_term_offset(raw_tail).min(i64::from(term_length)) as i32
}
