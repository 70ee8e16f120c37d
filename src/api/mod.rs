//! Purpose: Define the stable public Rust API boundary for termlog.
//! Exports: Appender, log buffers, framing constants, and diagnostics needed by callers.
//! Role: Public, additive-only surface over `core`.
//! Invariants: Tripped and Failed appends are outcomes, never `Error`s.

pub use crate::core::appender::{
    APPENDER_FAILED, APPENDER_TRIPPED, AppendOutcome, AppendResult, Appender,
    DefaultReservedValueSupplier, ReservedValueSupplier, handle_end_of_log_condition,
};
pub use crate::core::buffer::AtomicBuffer;
pub use crate::core::claim::BufferClaim;
#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::frame::{
    BEGIN_FRAG_FLAG, DATA_FRAME_HEADER_LEN, END_FRAG_FLAG, FRAME_ALIGNMENT, FrameHeader,
    HeaderWriter, TYPE_DATA, TYPE_PAD, UNFRAGMENTED,
};
pub use crate::core::log_buffers::{
    LogBufferMetadata, LogBuffers, LogBuffersOptions, PARTITION_COUNT, TERM_MAX_LENGTH,
    TERM_MIN_LENGTH, compute_position, index_by_term, max_message_length, max_payload_length,
    next_partition_index, position_bits_to_shift,
};
pub use crate::core::tail::{TailCounter, pack_tail, raw_term_offset, term_id, term_offset};
pub use crate::core::validate::{FrameSummary, TermReport, scan_term};
