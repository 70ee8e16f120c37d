// Data frame header layout, alignment helpers, and the in-place header writer.
use crate::core::buffer::AtomicBuffer;
use crate::core::error::{Error, ErrorKind};

pub const FRAME_LENGTH_OFFSET: usize = 0;
pub const VERSION_OFFSET: usize = 4;
pub const FLAGS_OFFSET: usize = 5;
pub const TYPE_OFFSET: usize = 6;
pub const TERM_OFFSET_OFFSET: usize = 8;
pub const SESSION_ID_OFFSET: usize = 12;
pub const STREAM_ID_OFFSET: usize = 16;
pub const TERM_ID_OFFSET: usize = 20;
pub const RESERVED_VALUE_OFFSET: usize = 24;

pub const DATA_FRAME_HEADER_LEN: i32 = 32;
pub const FRAME_ALIGNMENT: i32 = 32;

pub const CURRENT_VERSION: i8 = 0;

pub const TYPE_PAD: u16 = 0x00;
pub const TYPE_DATA: u16 = 0x01;

pub const BEGIN_FRAG_FLAG: u8 = 0x80;
pub const END_FRAG_FLAG: u8 = 0x40;
pub const UNFRAGMENTED: u8 = BEGIN_FRAG_FLAG | END_FRAG_FLAG;

const HEADER_LEN: usize = DATA_FRAME_HEADER_LEN as usize;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FrameHeader {
    pub frame_length: i32,
    pub version: i8,
    pub flags: u8,
    pub frame_type: u16,
    pub term_offset: i32,
    pub session_id: i32,
    pub stream_id: i32,
    pub term_id: i32,
    pub reserved_value: i64,
}

impl FrameHeader {
    /// Default template for a publication: unfragmented data frames at offset zero.
    pub fn template(session_id: i32, stream_id: i32, term_id: i32) -> Self {
        Self {
            frame_length: 0,
            version: CURRENT_VERSION,
            flags: UNFRAGMENTED,
            frame_type: TYPE_DATA,
            term_offset: 0,
            session_id,
            stream_id,
            term_id,
            reserved_value: 0,
        }
    }

    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[FRAME_LENGTH_OFFSET..FRAME_LENGTH_OFFSET + 4]
            .copy_from_slice(&self.frame_length.to_le_bytes());
        buf[VERSION_OFFSET] = self.version as u8;
        buf[FLAGS_OFFSET] = self.flags;
        buf[TYPE_OFFSET..TYPE_OFFSET + 2].copy_from_slice(&self.frame_type.to_le_bytes());
        buf[TERM_OFFSET_OFFSET..TERM_OFFSET_OFFSET + 4]
            .copy_from_slice(&self.term_offset.to_le_bytes());
        buf[SESSION_ID_OFFSET..SESSION_ID_OFFSET + 4].copy_from_slice(&self.session_id.to_le_bytes());
        buf[STREAM_ID_OFFSET..STREAM_ID_OFFSET + 4].copy_from_slice(&self.stream_id.to_le_bytes());
        buf[TERM_ID_OFFSET..TERM_ID_OFFSET + 4].copy_from_slice(&self.term_id.to_le_bytes());
        buf[RESERVED_VALUE_OFFSET..RESERVED_VALUE_OFFSET + 8]
            .copy_from_slice(&self.reserved_value.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, Error> {
        if buf.len() < HEADER_LEN {
            return Err(Error::new(ErrorKind::Corrupt).with_message("frame header too small"));
        }
        Ok(Self {
            frame_length: i32::from_le_bytes(read_4(buf, FRAME_LENGTH_OFFSET)),
            version: buf[VERSION_OFFSET] as i8,
            flags: buf[FLAGS_OFFSET],
            frame_type: u16::from_le_bytes([buf[TYPE_OFFSET], buf[TYPE_OFFSET + 1]]),
            term_offset: i32::from_le_bytes(read_4(buf, TERM_OFFSET_OFFSET)),
            session_id: i32::from_le_bytes(read_4(buf, SESSION_ID_OFFSET)),
            stream_id: i32::from_le_bytes(read_4(buf, STREAM_ID_OFFSET)),
            term_id: i32::from_le_bytes(read_4(buf, TERM_ID_OFFSET)),
            reserved_value: i64::from_le_bytes(read_8(buf, RESERVED_VALUE_OFFSET)),
        })
    }

    /// Copy the header at `offset` out of a shared buffer, then decode it.
    pub fn read_from(buffer: &AtomicBuffer<'_>, offset: usize) -> Result<Self, Error> {
        if offset + HEADER_LEN > buffer.capacity() {
            return Err(Error::new(ErrorKind::Corrupt)
                .with_message("frame header exceeds buffer")
                .with_offset(offset as u64));
        }
        let mut buf = [0u8; HEADER_LEN];
        buffer.get_bytes(offset, &mut buf);
        Self::decode(&buf)
    }

    pub fn is_padding(&self) -> bool {
        self.frame_type == TYPE_PAD
    }
}

/// Writes the fixed part of a data frame header in place.
///
/// Session and stream IDs are read once from the default header template.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct HeaderWriter {
    session_id: i32,
    stream_id: i32,
}

impl HeaderWriter {
    pub fn new(default_header: &FrameHeader) -> Self {
        Self {
            session_id: default_header.session_id,
            stream_id: default_header.stream_id,
        }
    }

    /// Read the template straight out of a metadata region.
    pub fn from_template_buffer(template: &AtomicBuffer<'_>) -> Self {
        Self {
            session_id: template.get_i32(SESSION_ID_OFFSET),
            stream_id: template.get_i32(STREAM_ID_OFFSET),
        }
    }

    pub fn session_id(&self) -> i32 {
        self.session_id
    }

    pub fn stream_id(&self) -> i32 {
        self.stream_id
    }

    /// Marks the frame in progress with `-length`, then fills the remaining fields.
    ///
    /// The positive length is published separately with [`frame_length_ordered`].
    pub fn write(&self, term_buffer: &AtomicBuffer<'_>, offset: i32, length: i32, term_id: i32) {
        term_buffer.put_i32_ordered(offset as usize + FRAME_LENGTH_OFFSET, -length);

        let header = term_buffer.view(offset as usize, HEADER_LEN);
        header.put_i8(VERSION_OFFSET, CURRENT_VERSION);
        header.put_u8(FLAGS_OFFSET, UNFRAGMENTED);
        header.put_u16(TYPE_OFFSET, TYPE_DATA);
        header.put_i32(TERM_OFFSET_OFFSET, offset);
        header.put_i32(SESSION_ID_OFFSET, self.session_id);
        header.put_i32(STREAM_ID_OFFSET, self.stream_id);
        header.put_i32(TERM_ID_OFFSET, term_id);
    }
}

pub fn align(value: i32, alignment: i32) -> i32 {
    (value + (alignment - 1)) & !(alignment - 1)
}

pub fn aligned_frame_length(payload_length: i32) -> i32 {
    align(payload_length + DATA_FRAME_HEADER_LEN, FRAME_ALIGNMENT)
}

/// Publish point: release store of the final frame length.
pub fn frame_length_ordered(buffer: &AtomicBuffer<'_>, frame_offset: i32, length: i32) {
    buffer.put_i32_ordered(frame_offset as usize + FRAME_LENGTH_OFFSET, length);
}

pub fn frame_length_volatile(buffer: &AtomicBuffer<'_>, frame_offset: i32) -> i32 {
    buffer.get_i32_volatile(frame_offset as usize + FRAME_LENGTH_OFFSET)
}

pub fn set_frame_type(buffer: &AtomicBuffer<'_>, frame_offset: i32, frame_type: u16) {
    buffer.put_u16(frame_offset as usize + TYPE_OFFSET, frame_type);
}

pub fn set_frame_flags(buffer: &AtomicBuffer<'_>, frame_offset: i32, flags: u8) {
    buffer.put_u8(frame_offset as usize + FLAGS_OFFSET, flags);
}

pub fn set_reserved_value(buffer: &AtomicBuffer<'_>, frame_offset: i32, value: i64) {
    buffer.put_i64(frame_offset as usize + RESERVED_VALUE_OFFSET, value);
}

pub fn is_padding_frame(buffer: &AtomicBuffer<'_>, frame_offset: i32) -> bool {
    buffer.get_u16(frame_offset as usize + TYPE_OFFSET) == TYPE_PAD
}

fn read_4(buf: &[u8], offset: usize) -> [u8; 4] {
    let mut out = [0u8; 4];
    out.copy_from_slice(&buf[offset..offset + 4]);
    out
}

fn read_8(buf: &[u8], offset: usize) -> [u8; 8] {
    let mut out = [0u8; 8];
    out.copy_from_slice(&buf[offset..offset + 8]);
    out
}
