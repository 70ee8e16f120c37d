//! Purpose: Append frames into one term partition from any number of concurrent producers.
//! Exports: `Appender`, `AppendResult`, `AppendOutcome`, `ReservedValueSupplier`,
//! `handle_end_of_log_condition`, `APPENDER_TRIPPED`, `APPENDER_FAILED`.
//! Role: Write side of the log buffer; rotation and reading belong to callers.
//! Invariants: A single fetch-and-add on the tail reserves every byte a call writes.
//! Invariants: Each frame's positive length is stored last, with release ordering.
//! Invariants: At most one caller per term writes padding; later overruns report failure.
use tracing::{debug, trace};

use crate::core::buffer::AtomicBuffer;
use crate::core::claim::BufferClaim;
use crate::core::error::{Error, ErrorKind};
use crate::core::frame::{
    self, BEGIN_FRAG_FLAG, DATA_FRAME_HEADER_LEN, END_FRAG_FLAG, FRAME_ALIGNMENT, HeaderWriter,
    TYPE_PAD,
};
use crate::core::log_buffers::{self, LogBuffers, PARTITION_COUNT};
use crate::core::tail::{self, TailCounter};

/// This call overran the term and wrote its padding; rotate to the next term.
pub const APPENDER_TRIPPED: i64 = -1;

/// This call started past the end of a term another caller already tripped.
pub const APPENDER_FAILED: i64 = -2;

/// Supplies the 64-bit reserved value once a frame's payload is in place.
pub trait ReservedValueSupplier {
    fn supply(&self, term_buffer: &AtomicBuffer<'_>, term_offset: i32, frame_length: i32) -> i64;
}

impl<F> ReservedValueSupplier for F
where
    F: Fn(&AtomicBuffer<'_>, i32, i32) -> i64,
{
    fn supply(&self, term_buffer: &AtomicBuffer<'_>, term_offset: i32, frame_length: i32) -> i64 {
        self(term_buffer, term_offset, frame_length)
    }
}

/// Always supplies zero. Unlike passing `None`, the zero is still written.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultReservedValueSupplier;

impl ReservedValueSupplier for DefaultReservedValueSupplier {
    fn supply(&self, _term_buffer: &AtomicBuffer<'_>, _term_offset: i32, _frame_length: i32) -> i64 {
        0
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AppendOutcome {
    /// Offset just past the frames written by this call.
    Appended { term_offset: i32 },
    Tripped,
    Failed,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AppendResult {
    term_offset: i64,
    term_id: i32,
}

impl AppendResult {
    /// Resulting offset, or `APPENDER_TRIPPED` / `APPENDER_FAILED`.
    pub fn term_offset(&self) -> i64 {
        self.term_offset
    }

    pub fn term_id(&self) -> i32 {
        self.term_id
    }

    pub fn outcome(&self) -> AppendOutcome {
        match self.term_offset {
            APPENDER_TRIPPED => AppendOutcome::Tripped,
            APPENDER_FAILED => AppendOutcome::Failed,
            offset => AppendOutcome::Appended {
                term_offset: offset as i32,
            },
        }
    }

    pub fn is_appended(&self) -> bool {
        self.term_offset >= 0
    }
}

/// Term appender bound to one partition's buffer and tail counter.
///
/// Holds no per-call state; share it by reference across producer threads.
#[derive(Clone, Copy, Debug)]
pub struct Appender<'a> {
    term_buffer: AtomicBuffer<'a>,
    tail_counter: TailCounter<'a>,
    header_writer: HeaderWriter,
}

impl<'a> Appender<'a> {
    /// Panics unless the term capacity is a power of two between one frame alignment and `i32::MAX`.
    pub fn new(
        term_buffer: AtomicBuffer<'a>,
        tail_counter: TailCounter<'a>,
        header_writer: HeaderWriter,
    ) -> Self {
        let capacity = term_buffer.capacity();
        assert!(
            capacity.is_power_of_two()
                && capacity >= FRAME_ALIGNMENT as usize
                && capacity <= i32::MAX as usize,
            "term capacity {capacity} must be a power of two in {FRAME_ALIGNMENT}..=i32::MAX"
        );
        Self {
            term_buffer,
            tail_counter,
            header_writer,
        }
    }

    pub fn from_log_buffers(log_buffers: &'a LogBuffers, partition: usize) -> Result<Self, Error> {
        if partition >= PARTITION_COUNT {
            return Err(Error::new(ErrorKind::Usage)
                .with_message(format!("partition index must be below {PARTITION_COUNT}"))
                .with_partition(partition));
        }
        let meta = log_buffers.meta();
        let header_writer = HeaderWriter::from_template_buffer(&meta.default_frame_header());
        Ok(Self::new(
            log_buffers.buffer(partition),
            meta.tail_counter(partition),
            header_writer,
        ))
    }

    pub fn term_buffer(&self) -> AtomicBuffer<'a> {
        self.term_buffer
    }

    pub fn term_length(&self) -> i32 {
        self.term_buffer.capacity() as i32
    }

    pub fn raw_tail(&self) -> i64 {
        self.tail_counter.get()
    }

    /// Reset the tail to offset zero of `term_id`; never call while producers append.
    pub fn set_tail_term_id(&self, term_id: i32) {
        self.tail_counter.set(tail::pack_tail(term_id, 0));
    }

    /// Reserve one frame for `length` payload bytes and hand it back unpublished.
    pub fn claim(&self, length: i32) -> (AppendResult, Option<BufferClaim<'a>>) {
        assert!(length > 0, "claim length must be positive: {length}");
        let length = payload_length(length as usize);
        let frame_length = length + DATA_FRAME_HEADER_LEN;
        let aligned_length = frame::align(frame_length, FRAME_ALIGNMENT);
        let raw_tail = self.tail_counter.get_and_add(aligned_length);
        let term_id = tail::term_id(raw_tail);
        let term_offset = tail::raw_term_offset(raw_tail);
        let term_length = self.term_length();

        let resulting_offset = term_offset + i64::from(aligned_length);
        if resulting_offset > i64::from(term_length) {
            let result = AppendResult {
                term_offset: self.end_of_log(term_id, term_offset, term_length),
                term_id,
            };
            return (result, None);
        }

        let offset = term_offset as i32;
        self.header_writer
            .write(&self.term_buffer, offset, frame_length, term_id);
        let claim = BufferClaim::wrap(&self.term_buffer, offset, frame_length);
        let result = AppendResult {
            term_offset: resulting_offset,
            term_id,
        };
        (result, Some(claim))
    }

    /// Append `src` as a single unfragmented frame.
    ///
    /// With `None` as supplier the reserved value field is left as written by the header.
    pub fn append_unfragmented_message(
        &self,
        src: &[u8],
        reserved_value_supplier: Option<&dyn ReservedValueSupplier>,
    ) -> AppendResult {
        let length = payload_length(src.len());
        let frame_length = length + DATA_FRAME_HEADER_LEN;
        let aligned_length = frame::align(frame_length, FRAME_ALIGNMENT);
        let raw_tail = self.tail_counter.get_and_add(aligned_length);
        let term_id = tail::term_id(raw_tail);
        let term_offset = tail::raw_term_offset(raw_tail);
        let term_length = self.term_length();

        let resulting_offset = term_offset + i64::from(aligned_length);
        if resulting_offset > i64::from(term_length) {
            return AppendResult {
                term_offset: self.end_of_log(term_id, term_offset, term_length),
                term_id,
            };
        }

        let offset = term_offset as i32;
        self.header_writer
            .write(&self.term_buffer, offset, frame_length, term_id);
        self.term_buffer
            .put_bytes(offset as usize + DATA_FRAME_HEADER_LEN as usize, src);

        if let Some(supplier) = reserved_value_supplier {
            let reserved_value = supplier.supply(&self.term_buffer, offset, frame_length);
            frame::set_reserved_value(&self.term_buffer, offset, reserved_value);
        }

        frame::frame_length_ordered(&self.term_buffer, offset, frame_length);

        AppendResult {
            term_offset: resulting_offset,
            term_id,
        }
    }

    /// Append `src` as a run of fragments of at most `max_payload_length` bytes each.
    ///
    /// The whole run is reserved at once so no other producer interleaves with it.
    /// `max_payload_length + DATA_FRAME_HEADER_LEN` must be a multiple of the frame alignment.
    pub fn append_fragmented_message(
        &self,
        src: &[u8],
        max_payload_length: i32,
        reserved_value_supplier: Option<&dyn ReservedValueSupplier>,
    ) -> AppendResult {
        assert!(
            max_payload_length > 0
                && max_payload_length <= i32::MAX - DATA_FRAME_HEADER_LEN
                && (max_payload_length + DATA_FRAME_HEADER_LEN) % FRAME_ALIGNMENT == 0,
            "max payload length {max_payload_length} does not yield aligned frames"
        );
        let length = payload_length(src.len());
        assert!(length > 0, "fragmented message must not be empty");

        let required_length = log_buffers::fragmented_length(length, max_payload_length);
        assert!(
            required_length <= i64::from(i32::MAX),
            "message of {length} bytes needs {required_length} bytes of frames, more than one reservation can hold"
        );
        let required_length = required_length as i32;
        let raw_tail = self.tail_counter.get_and_add(required_length);
        let term_id = tail::term_id(raw_tail);
        let term_offset = tail::raw_term_offset(raw_tail);
        let term_length = self.term_length();

        let resulting_offset = term_offset + i64::from(required_length);
        if resulting_offset > i64::from(term_length) {
            return AppendResult {
                term_offset: self.end_of_log(term_id, term_offset, term_length),
                term_id,
            };
        }

        let mut flags = BEGIN_FRAG_FLAG;
        let mut remaining = length;
        let mut offset = term_offset as i32;
        while remaining > 0 {
            let bytes_to_write = remaining.min(max_payload_length);
            let frame_length = bytes_to_write + DATA_FRAME_HEADER_LEN;
            let aligned_length = frame::align(frame_length, FRAME_ALIGNMENT);

            self.header_writer
                .write(&self.term_buffer, offset, frame_length, term_id);
            let src_start = (length - remaining) as usize;
            self.term_buffer.put_bytes(
                offset as usize + DATA_FRAME_HEADER_LEN as usize,
                &src[src_start..src_start + bytes_to_write as usize],
            );

            if remaining <= max_payload_length {
                flags |= END_FRAG_FLAG;
            }
            frame::set_frame_flags(&self.term_buffer, offset, flags);

            if let Some(supplier) = reserved_value_supplier {
                let reserved_value = supplier.supply(&self.term_buffer, offset, frame_length);
                frame::set_reserved_value(&self.term_buffer, offset, reserved_value);
            }

            frame::frame_length_ordered(&self.term_buffer, offset, frame_length);

            flags = 0;
            offset += aligned_length;
            remaining -= bytes_to_write;
        }

        AppendResult {
            term_offset: resulting_offset,
            term_id,
        }
    }

    fn end_of_log(&self, term_id: i32, term_offset: i64, term_length: i32) -> i64 {
        handle_end_of_log_condition(
            term_id,
            &self.term_buffer,
            term_offset,
            &self.header_writer,
            term_length,
        )
    }
}

/// Resolve a reservation that pushed the tail past `term_length`.
///
/// `term_offset` is the reservation start taken from the raw tail, kept 64-bit so
/// starts beyond `i32::MAX` still compare as past the end.
pub fn handle_end_of_log_condition(
    term_id: i32,
    term_buffer: &AtomicBuffer<'_>,
    term_offset: i64,
    header_writer: &HeaderWriter,
    term_length: i32,
) -> i64 {
    if term_offset > i64::from(term_length) {
        trace!(term_id, term_offset, "append failed past end of term");
        return APPENDER_FAILED;
    }

    let offset = term_offset as i32;
    if offset < term_length {
        let padding_length = term_length - offset;
        header_writer.write(term_buffer, offset, padding_length, term_id);
        frame::set_frame_type(term_buffer, offset, TYPE_PAD);
        frame::frame_length_ordered(term_buffer, offset, padding_length);
        debug!(term_id, term_offset = offset, padding_length, "term tripped");
    } else {
        debug!(term_id, term_offset = offset, "term tripped at exact end");
    }
    APPENDER_TRIPPED
}

// Bounded so the aligned frame length cannot overflow i32.
fn payload_length(len: usize) -> i32 {
    assert!(
        len <= (i32::MAX - DATA_FRAME_HEADER_LEN - FRAME_ALIGNMENT) as usize,
        "message length {len} exceeds frame limits"
    );
    len as i32
}
