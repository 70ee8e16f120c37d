// In-process log buffer: three term partitions plus a metadata region in one anonymous mapping.
use std::ptr::NonNull;

use memmap2::MmapMut;
use tracing::debug;

use crate::core::buffer::AtomicBuffer;
use crate::core::error::{Error, ErrorKind};
use crate::core::frame::{self, DATA_FRAME_HEADER_LEN, FRAME_ALIGNMENT, FrameHeader};
use crate::core::tail::{self, TailCounter};

pub const PARTITION_COUNT: usize = 3;
pub const TERM_MIN_LENGTH: i32 = 64 * 1024;
pub const TERM_MAX_LENGTH: i32 = 1024 * 1024 * 1024;
pub const LOG_META_DATA_LENGTH: usize = 4096;

const TERM_TAIL_COUNTERS_OFFSET: usize = 0;
const ACTIVE_PARTITION_INDEX_OFFSET: usize = 24;
const INITIAL_TERM_ID_OFFSET: usize = 64;
const MTU_LENGTH_OFFSET: usize = 68;
const TERM_LENGTH_OFFSET: usize = 72;
const DEFAULT_FRAME_HEADER_LENGTH_OFFSET: usize = 76;
const DEFAULT_FRAME_HEADER_OFFSET: usize = 128;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LogBuffersOptions {
    pub term_length: i32,
    pub initial_term_id: i32,
    pub session_id: i32,
    pub stream_id: i32,
    pub mtu_length: i32,
}

impl LogBuffersOptions {
    pub fn new(term_length: i32) -> Self {
        Self {
            term_length,
            ..Self::default()
        }
    }
}

impl Default for LogBuffersOptions {
    fn default() -> Self {
        Self {
            term_length: TERM_MIN_LENGTH,
            initial_term_id: 0,
            session_id: 0,
            stream_id: 1,
            mtu_length: 1408,
        }
    }
}

pub struct LogBuffers {
    _mmap: MmapMut,
    data: NonNull<u8>,
    term_length: i32,
}

// SAFETY: the mapping lives as long as `LogBuffers`; shared access goes through
// `AtomicBuffer`, whose producers are serialized by the tail counters.
unsafe impl Send for LogBuffers {}
unsafe impl Sync for LogBuffers {}

impl LogBuffers {
    pub fn new(options: LogBuffersOptions) -> Result<Self, Error> {
        check_term_length(options.term_length)?;
        check_mtu_length(options.mtu_length, options.term_length)?;

        let term_length = options.term_length as usize;
        let total_len = term_length * PARTITION_COUNT + LOG_META_DATA_LENGTH;
        let mut mmap = MmapMut::map_anon(total_len).map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to map log buffer")
                .with_source(err)
        })?;
        let data = NonNull::new(mmap.as_mut_ptr())
            .ok_or_else(|| Error::new(ErrorKind::Internal).with_message("null log buffer mapping"))?;

        let log = Self {
            _mmap: mmap,
            data,
            term_length: options.term_length,
        };
        log.initialize(&options);
        debug!(
            term_length = options.term_length,
            mtu_length = options.mtu_length,
            initial_term_id = options.initial_term_id,
            session_id = options.session_id,
            stream_id = options.stream_id,
            "log buffers mapped"
        );
        Ok(log)
    }

    fn initialize(&self, options: &LogBuffersOptions) {
        let meta = self.meta();
        for partition in 0..PARTITION_COUNT {
            let term_id = if partition == 0 {
                options.initial_term_id
            } else {
                options
                    .initial_term_id
                    .wrapping_sub(PARTITION_COUNT as i32)
                    .wrapping_add(partition as i32)
            };
            meta.tail_counter(partition).set(tail::pack_tail(term_id, 0));
        }
        meta.buffer.put_i32(ACTIVE_PARTITION_INDEX_OFFSET, 0);
        meta.buffer.put_i32(INITIAL_TERM_ID_OFFSET, options.initial_term_id);
        meta.buffer.put_i32(MTU_LENGTH_OFFSET, options.mtu_length);
        meta.buffer.put_i32(TERM_LENGTH_OFFSET, options.term_length);
        meta.buffer
            .put_i32(DEFAULT_FRAME_HEADER_LENGTH_OFFSET, DATA_FRAME_HEADER_LEN);

        let template =
            FrameHeader::template(options.session_id, options.stream_id, options.initial_term_id);
        meta.default_frame_header().put_bytes(0, &template.encode());
    }

    pub fn term_length(&self) -> i32 {
        self.term_length
    }

    /// Term buffer for `partition`; panics when the index is out of range.
    pub fn buffer(&self, partition: usize) -> AtomicBuffer<'_> {
        assert!(partition < PARTITION_COUNT, "partition {partition} out of range");
        let term_length = self.term_length as usize;
        self.region().view(partition * term_length, term_length)
    }

    pub fn meta(&self) -> LogBufferMetadata<'_> {
        let offset = self.term_length as usize * PARTITION_COUNT;
        LogBufferMetadata {
            buffer: self.region().view(offset, LOG_META_DATA_LENGTH),
        }
    }

    fn region(&self) -> AtomicBuffer<'_> {
        let len = self.term_length as usize * PARTITION_COUNT + LOG_META_DATA_LENGTH;
        // SAFETY: `data` is the page-aligned base of the live mapping of `len` bytes,
        // and the mapping is never handed out mutably after construction.
        unsafe { AtomicBuffer::from_raw_parts(self.data, len) }
    }
}

/// Metadata trailer shared by every partition.
#[derive(Clone, Copy, Debug)]
pub struct LogBufferMetadata<'a> {
    buffer: AtomicBuffer<'a>,
}

impl<'a> LogBufferMetadata<'a> {
    pub fn tail_counter(&self, partition: usize) -> TailCounter<'a> {
        assert!(partition < PARTITION_COUNT, "partition {partition} out of range");
        let offset = TERM_TAIL_COUNTERS_OFFSET + partition * std::mem::size_of::<i64>();
        TailCounter::new(self.buffer.atomic_i64(offset))
    }

    pub fn active_partition_index(&self) -> usize {
        self.buffer.get_i32_volatile(ACTIVE_PARTITION_INDEX_OFFSET) as usize
    }

    pub fn set_active_partition_index(&self, partition: usize) {
        assert!(partition < PARTITION_COUNT, "partition {partition} out of range");
        self.buffer
            .put_i32_ordered(ACTIVE_PARTITION_INDEX_OFFSET, partition as i32);
    }

    pub fn initial_term_id(&self) -> i32 {
        self.buffer.get_i32(INITIAL_TERM_ID_OFFSET)
    }

    pub fn mtu_length(&self) -> i32 {
        self.buffer.get_i32(MTU_LENGTH_OFFSET)
    }

    pub fn term_length(&self) -> i32 {
        self.buffer.get_i32(TERM_LENGTH_OFFSET)
    }

    pub fn default_frame_header(&self) -> AtomicBuffer<'a> {
        let len = self.buffer.get_i32(DEFAULT_FRAME_HEADER_LENGTH_OFFSET) as usize;
        self.buffer.view(DEFAULT_FRAME_HEADER_OFFSET, len)
    }
}

pub fn check_term_length(term_length: i32) -> Result<(), Error> {
    if term_length < TERM_MIN_LENGTH {
        return Err(Error::new(ErrorKind::Usage).with_message(format!(
            "term length {term_length} less than min length of {TERM_MIN_LENGTH}"
        )));
    }
    if term_length > TERM_MAX_LENGTH {
        return Err(Error::new(ErrorKind::Usage).with_message(format!(
            "term length {term_length} greater than max length of {TERM_MAX_LENGTH}"
        )));
    }
    if (term_length as u32).count_ones() != 1 {
        return Err(Error::new(ErrorKind::Usage)
            .with_message(format!("term length {term_length} is not a power of 2")));
    }
    Ok(())
}

pub fn check_mtu_length(mtu_length: i32, term_length: i32) -> Result<(), Error> {
    if mtu_length <= DATA_FRAME_HEADER_LEN {
        return Err(Error::new(ErrorKind::Usage)
            .with_message(format!("mtu length {mtu_length} leaves no room for payload")));
    }
    if mtu_length % FRAME_ALIGNMENT != 0 {
        return Err(Error::new(ErrorKind::Usage).with_message(format!(
            "mtu length {mtu_length} is not a multiple of {FRAME_ALIGNMENT}"
        )));
    }
    if mtu_length > term_length {
        return Err(Error::new(ErrorKind::Usage).with_message(format!(
            "mtu length {mtu_length} greater than term length {term_length}"
        )));
    }
    Ok(())
}

pub fn index_by_term(initial_term_id: i32, active_term_id: i32) -> usize {
    active_term_id.wrapping_sub(initial_term_id).rem_euclid(PARTITION_COUNT as i32) as usize
}

pub fn next_partition_index(current: usize) -> usize {
    (current + 1) % PARTITION_COUNT
}

pub fn position_bits_to_shift(term_length: i32) -> u32 {
    term_length.trailing_zeros()
}

/// Absolute stream position of `term_offset` within `active_term_id`.
pub fn compute_position(
    active_term_id: i32,
    term_offset: i32,
    position_bits_to_shift: u32,
    initial_term_id: i32,
) -> i64 {
    let term_count = i64::from(active_term_id.wrapping_sub(initial_term_id));
    (term_count << position_bits_to_shift) + i64::from(term_offset)
}

/// Largest message accepted for fragmentation into one term.
pub fn max_message_length(term_length: i32) -> i32 {
    term_length / 8
}

pub fn max_payload_length(mtu_length: i32) -> i32 {
    mtu_length - DATA_FRAME_HEADER_LEN
}

/// Aligned bytes a message of `length` occupies once fragmented at `max_payload_length`.
///
/// Widened to `i64`: small payloads multiply the header overhead past `i32::MAX`.
pub fn fragmented_length(length: i32, max_payload_length: i32) -> i64 {
    let num_max_payloads = i64::from(length / max_payload_length);
    let remaining_payload = length % max_payload_length;
    let last_frame_length = if remaining_payload > 0 {
        i64::from(frame::aligned_frame_length(remaining_payload))
    } else {
        0
    };
    num_max_payloads * i64::from(max_payload_length + DATA_FRAME_HEADER_LEN) + last_frame_length
}

#[cfg(test)]
mod tests {
    use super::{
        LogBuffers, LogBuffersOptions, PARTITION_COUNT, TERM_MIN_LENGTH, check_mtu_length,
        check_term_length, compute_position, fragmented_length, index_by_term,
        max_message_length, max_payload_length, next_partition_index, position_bits_to_shift,
    };
    use crate::core::error::ErrorKind;
    use crate::core::frame::{DATA_FRAME_HEADER_LEN, FrameHeader, TYPE_DATA, UNFRAGMENTED};
    use crate::core::tail;

    #[test]
    fn term_length_must_be_power_of_two_in_range() {
        check_term_length(TERM_MIN_LENGTH).expect("min");
        check_term_length(1024 * 1024).expect("1m");
        let cases = [TERM_MIN_LENGTH / 2, TERM_MIN_LENGTH + 32, i32::MAX];
        for term_length in cases {
            let err = check_term_length(term_length).expect_err("invalid");
            assert_eq!(err.kind(), ErrorKind::Usage);
        }
    }

    #[test]
    fn mtu_must_be_aligned_and_fit_the_term() {
        check_mtu_length(1408, TERM_MIN_LENGTH).expect("default mtu");
        assert!(check_mtu_length(16, TERM_MIN_LENGTH).is_err());
        assert!(check_mtu_length(DATA_FRAME_HEADER_LEN, TERM_MIN_LENGTH).is_err());
        assert!(check_mtu_length(1400, TERM_MIN_LENGTH).is_err());
        assert!(check_mtu_length(TERM_MIN_LENGTH * 2, TERM_MIN_LENGTH).is_err());
    }

    #[test]
    fn new_initializes_tails_and_template() {
        let options = LogBuffersOptions {
            term_length: TERM_MIN_LENGTH,
            initial_term_id: 10,
            session_id: 77,
            stream_id: 1001,
            mtu_length: 1408,
        };
        let log = LogBuffers::new(options).expect("log buffers");
        let meta = log.meta();

        assert_eq!(tail::term_id(meta.tail_counter(0).get()), 10);
        assert_eq!(tail::term_id(meta.tail_counter(1).get()), 8);
        assert_eq!(tail::term_id(meta.tail_counter(2).get()), 9);
        for partition in 0..PARTITION_COUNT {
            assert_eq!(tail::raw_term_offset(meta.tail_counter(partition).get()), 0);
            assert_eq!(log.buffer(partition).capacity(), TERM_MIN_LENGTH as usize);
        }
        assert_eq!(meta.active_partition_index(), 0);
        assert_eq!(meta.initial_term_id(), 10);
        assert_eq!(meta.mtu_length(), 1408);
        assert_eq!(meta.term_length(), TERM_MIN_LENGTH);

        let template = FrameHeader::read_from(&meta.default_frame_header(), 0).expect("template");
        assert_eq!(template.session_id, 77);
        assert_eq!(template.stream_id, 1001);
        assert_eq!(template.term_id, 10);
        assert_eq!(template.flags, UNFRAGMENTED);
        assert_eq!(template.frame_type, TYPE_DATA);
    }

    #[test]
    fn partitions_do_not_overlap() {
        let log = LogBuffers::new(LogBuffersOptions::default()).expect("log buffers");
        log.buffer(0).put_i64(0, 1);
        log.buffer(1).put_i64(0, 2);
        log.buffer(2).put_i64(0, 3);
        assert_eq!(log.buffer(0).get_i64(0), 1);
        assert_eq!(log.buffer(1).get_i64(0), 2);
        assert_eq!(log.buffer(2).get_i64(0), 3);
    }

    #[test]
    fn invalid_options_are_rejected() {
        let err = LogBuffers::new(LogBuffersOptions::new(1000)).err().expect("bad term");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn active_partition_index_is_settable() {
        let log = LogBuffers::new(LogBuffersOptions::default()).expect("log buffers");
        log.meta().set_active_partition_index(2);
        assert_eq!(log.meta().active_partition_index(), 2);
    }

    #[test]
    fn partition_index_follows_term_count() {
        assert_eq!(index_by_term(5, 5), 0);
        assert_eq!(index_by_term(5, 6), 1);
        assert_eq!(index_by_term(5, 8), 0);
        assert_eq!(index_by_term(5, 4), 2);
        assert_eq!(next_partition_index(2), 0);
    }

    #[test]
    fn positions_are_term_count_shifted() {
        let bits = position_bits_to_shift(TERM_MIN_LENGTH);
        assert_eq!(bits, 16);
        assert_eq!(compute_position(3, 0, bits, 3), 0);
        assert_eq!(compute_position(5, 128, bits, 3), (2 << 16) + 128);
    }

    #[test]
    fn message_limits_follow_term_and_mtu() {
        assert_eq!(max_message_length(TERM_MIN_LENGTH), 8192);
        assert_eq!(max_payload_length(1408), 1376);
        assert_eq!(fragmented_length(100, 64), 96 + 96);
        assert_eq!(fragmented_length(128, 64), 192);
        assert_eq!(fragmented_length(1 << 30, 32), (1i64 << 25) * 64);
    }
}
