// Zero-copy claim over one reserved frame; the holder fills the payload then commits or aborts.
use crate::core::buffer::AtomicBuffer;
use crate::core::frame::{
    self, DATA_FRAME_HEADER_LEN, FLAGS_OFFSET, RESERVED_VALUE_OFFSET, TYPE_PAD,
};

const HEADER_LEN: usize = DATA_FRAME_HEADER_LEN as usize;

#[derive(Debug)]
#[must_use = "an unfinished claim stalls readers at its offset; call commit or abort"]
pub struct BufferClaim<'a> {
    frame: AtomicBuffer<'a>,
    term_offset: i32,
}

impl<'a> BufferClaim<'a> {
    /// Wrap the frame `[term_offset, term_offset + frame_length)` of `term_buffer`.
    pub(crate) fn wrap(term_buffer: &AtomicBuffer<'a>, term_offset: i32, frame_length: i32) -> Self {
        Self {
            frame: term_buffer.view(term_offset as usize, frame_length as usize),
            term_offset,
        }
    }

    /// Start of the frame within its term.
    pub fn term_offset(&self) -> i32 {
        self.term_offset
    }

    /// View over the whole frame, header included.
    pub fn buffer(&self) -> AtomicBuffer<'a> {
        self.frame
    }

    /// Offset of the payload within [`BufferClaim::buffer`].
    pub fn offset(&self) -> usize {
        HEADER_LEN
    }

    /// Payload bytes available to the holder.
    pub fn length(&self) -> usize {
        self.frame.capacity() - HEADER_LEN
    }

    /// Copy `src` into the payload at `payload_offset`; panics past the claimed length.
    pub fn put_bytes(&self, payload_offset: usize, src: &[u8]) {
        assert!(
            payload_offset + src.len() <= self.length(),
            "claim write out of range: offset={payload_offset} len={} claimed={}",
            src.len(),
            self.length()
        );
        self.frame.put_bytes(HEADER_LEN + payload_offset, src);
    }

    pub fn flags(&self) -> u8 {
        self.frame.get_u8(FLAGS_OFFSET)
    }

    pub fn set_flags(&self, flags: u8) {
        self.frame.put_u8(FLAGS_OFFSET, flags);
    }

    pub fn reserved_value(&self) -> i64 {
        self.frame.get_i64(RESERVED_VALUE_OFFSET)
    }

    pub fn set_reserved_value(&self, value: i64) {
        self.frame.put_i64(RESERVED_VALUE_OFFSET, value);
    }

    /// Publish the frame to readers.
    pub fn commit(self) {
        frame::frame_length_ordered(&self.frame, 0, self.frame.capacity() as i32);
    }

    /// Turn the frame into padding so readers skip it.
    pub fn abort(self) {
        frame::set_frame_type(&self.frame, 0, TYPE_PAD);
        frame::frame_length_ordered(&self.frame, 0, self.frame.capacity() as i32);
    }
}

#[cfg(test)]
mod tests {
    use super::BufferClaim;
    use crate::core::buffer::AtomicBuffer;
    use crate::core::frame::{
        self, BEGIN_FRAG_FLAG, FrameHeader, HeaderWriter, TYPE_DATA, TYPE_PAD,
    };

    fn with_term(f: impl FnOnce(AtomicBuffer<'_>)) {
        let mut words = vec![0u64; 32];
        let bytes = unsafe {
            std::slice::from_raw_parts_mut(words.as_mut_ptr().cast::<u8>(), words.len() * 8)
        };
        f(AtomicBuffer::wrap(bytes).expect("wrap"));
    }

    #[test]
    fn commit_publishes_positive_length() {
        with_term(|term| {
            HeaderWriter::new(&FrameHeader::template(1, 2, 3)).write(&term, 64, 42, 3);
            let claim = BufferClaim::wrap(&term, 64, 42);
            assert_eq!(claim.length(), 10);
            assert_eq!(claim.offset(), 32);
            claim.put_bytes(0, b"0123456789");
            claim.set_reserved_value(17);
            assert_eq!(frame::frame_length_volatile(&term, 64), -42);
            claim.commit();

            let header = FrameHeader::read_from(&term, 64).expect("header");
            assert_eq!(header.frame_length, 42);
            assert_eq!(header.frame_type, TYPE_DATA);
            assert_eq!(header.reserved_value, 17);
            let mut payload = [0u8; 10];
            term.get_bytes(96, &mut payload);
            assert_eq!(&payload, b"0123456789");
        });
    }

    #[test]
    fn abort_turns_frame_into_padding() {
        with_term(|term| {
            HeaderWriter::new(&FrameHeader::template(1, 2, 3)).write(&term, 0, 40, 3);
            let claim = BufferClaim::wrap(&term, 0, 40);
            claim.abort();
            let header = FrameHeader::read_from(&term, 0).expect("header");
            assert_eq!(header.frame_type, TYPE_PAD);
            assert_eq!(header.frame_length, 40);
        });
    }

    #[test]
    fn flags_are_editable_before_commit() {
        with_term(|term| {
            HeaderWriter::new(&FrameHeader::template(1, 2, 3)).write(&term, 0, 64, 3);
            let claim = BufferClaim::wrap(&term, 0, 64);
            claim.set_flags(BEGIN_FRAG_FLAG);
            assert_eq!(claim.flags(), BEGIN_FRAG_FLAG);
            claim.commit();
        });
    }

    #[test]
    #[should_panic(expected = "claim write out of range")]
    fn write_past_claim_panics() {
        with_term(|term| {
            let claim = BufferClaim::wrap(&term, 0, 40);
            claim.put_bytes(4, b"12345");
            claim.abort();
        });
    }
}
