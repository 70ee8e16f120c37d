// Diagnostic walk over a quiescent term: every byte up to the tail must be covered by published frames.
// Used by tests and the CLI; subscribers have their own scanners.
use serde::Serialize;

use crate::core::buffer::AtomicBuffer;
use crate::core::error::{Error, ErrorKind};
use crate::core::frame::{
    self, BEGIN_FRAG_FLAG, DATA_FRAME_HEADER_LEN, END_FRAG_FLAG, FRAME_ALIGNMENT, FrameHeader,
};

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct FrameSummary {
    pub term_offset: i32,
    pub frame_length: i32,
    pub aligned_length: i32,
    pub padding: bool,
    pub flags: u8,
    pub term_id: i32,
    pub reserved_value: i64,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct TermReport {
    pub term_length: i32,
    pub scanned_to: i32,
    pub data_frames: usize,
    pub padding_frames: usize,
    pub messages: usize,
    pub payload_bytes: u64,
    pub frames: Vec<FrameSummary>,
}

/// Walk frames from offset zero up to `limit`, which must land on a frame boundary.
pub fn scan_term(term_buffer: &AtomicBuffer<'_>, limit: i32) -> Result<TermReport, Error> {
    let term_length = term_buffer.capacity() as i32;
    if limit < 0 || limit > term_length {
        return Err(Error::new(ErrorKind::Usage)
            .with_message(format!("scan limit {limit} outside term of {term_length} bytes")));
    }

    let mut report = TermReport {
        term_length,
        scanned_to: 0,
        data_frames: 0,
        padding_frames: 0,
        messages: 0,
        payload_bytes: 0,
        frames: Vec::new(),
    };
    let mut in_message = false;
    let mut offset = 0i32;

    while offset < limit {
        let frame_length = frame::frame_length_volatile(term_buffer, offset);
        if frame_length == 0 {
            return Err(corrupt("unwritten gap before tail", offset));
        }
        if frame_length < 0 {
            return Err(corrupt("frame still being written", offset));
        }
        if frame_length < DATA_FRAME_HEADER_LEN {
            return Err(corrupt("frame shorter than its header", offset));
        }
        let aligned_length = frame::align(frame_length, FRAME_ALIGNMENT);
        if i64::from(offset) + i64::from(aligned_length) > i64::from(term_length) {
            return Err(corrupt("frame overruns term", offset));
        }

        let header = FrameHeader::read_from(term_buffer, offset as usize)?;
        if header.term_offset != offset {
            return Err(corrupt("term offset field does not match position", offset));
        }

        if header.is_padding() {
            if in_message {
                return Err(corrupt("padding inside a fragmented message", offset));
            }
            report.padding_frames += 1;
        } else {
            in_message = track_fragments(in_message, header.flags, offset, &mut report)?;
            report.data_frames += 1;
            report.payload_bytes += (frame_length - DATA_FRAME_HEADER_LEN) as u64;
        }

        report.frames.push(FrameSummary {
            term_offset: offset,
            frame_length,
            aligned_length,
            padding: header.is_padding(),
            flags: header.flags,
            term_id: header.term_id,
            reserved_value: header.reserved_value,
        });
        offset += aligned_length;
    }

    if offset != limit {
        return Err(corrupt("last frame runs past the scan limit", offset));
    }
    if in_message {
        return Err(corrupt("fragmented message missing its end fragment", offset));
    }
    report.scanned_to = offset;
    Ok(report)
}

fn track_fragments(
    in_message: bool,
    flags: u8,
    offset: i32,
    report: &mut TermReport,
) -> Result<bool, Error> {
    let begin = flags & BEGIN_FRAG_FLAG != 0;
    let end = flags & END_FRAG_FLAG != 0;
    if begin == in_message {
        let message = if begin {
            "begin fragment inside an open message"
        } else {
            "continuation fragment without a begin"
        };
        return Err(corrupt(message, offset));
    }
    if end {
        report.messages += 1;
    }
    Ok(!end)
}

fn corrupt(message: &str, offset: i32) -> Error {
    Error::new(ErrorKind::Corrupt)
        .with_message(message)
        .with_offset(offset as u64)
}

#[cfg(test)]
mod tests {
    use super::scan_term;
    use crate::core::appender::Appender;
    use crate::core::buffer::AtomicBuffer;
    use crate::core::error::ErrorKind;
    use crate::core::frame::{self, FrameHeader, HeaderWriter};
    use crate::core::tail::{self, TailCounter};
    use std::sync::atomic::AtomicI64;

    fn with_appender(term_length: usize, f: impl FnOnce(&Appender<'_>)) {
        let mut words = vec![0u64; term_length / 8];
        let bytes = unsafe {
            std::slice::from_raw_parts_mut(words.as_mut_ptr().cast::<u8>(), term_length)
        };
        let term = AtomicBuffer::wrap(bytes).expect("wrap");
        let slot = AtomicI64::new(tail::pack_tail(1, 0));
        let writer = HeaderWriter::new(&FrameHeader::template(1, 1, 1));
        f(&Appender::new(term, TailCounter::new(&slot), writer));
    }

    fn tail_offset(appender: &Appender<'_>) -> i32 {
        tail::term_offset(appender.raw_tail(), appender.term_length())
    }

    #[test]
    fn tripped_term_is_fully_covered() {
        with_appender(1024, |appender| {
            while appender.append_unfragmented_message(&[1u8; 100], None).is_appended() {}
            let report = scan_term(&appender.term_buffer(), tail_offset(appender)).expect("scan");
            assert_eq!(report.scanned_to, 1024);
            assert_eq!(report.data_frames, 6);
            assert_eq!(report.padding_frames, 1);
            assert_eq!(report.messages, 6);
            assert_eq!(report.payload_bytes, 600);
            let padding = report.frames.last().expect("padding");
            assert!(padding.padding);
            assert_eq!(padding.term_offset, 6 * 160);
            assert_eq!(padding.frame_length, 64);
        });
    }

    #[test]
    fn fragments_count_as_one_message() {
        with_appender(1024, |appender| {
            appender.append_fragmented_message(&[0u8; 300], 64, None);
            appender.append_unfragmented_message(b"tail", None);
            let report = scan_term(&appender.term_buffer(), tail_offset(appender)).expect("scan");
            assert_eq!(report.data_frames, 6);
            assert_eq!(report.messages, 2);
            assert_eq!(report.payload_bytes, 304);
        });
    }

    #[test]
    fn unpublished_claim_is_reported() {
        with_appender(256, |appender| {
            let (_, claim) = appender.claim(8);
            let claim = claim.expect("claim");
            let err = scan_term(&appender.term_buffer(), tail_offset(appender)).expect_err("open");
            assert_eq!(err.kind(), ErrorKind::Corrupt);
            assert_eq!(err.offset(), Some(0));
            claim.commit();
            scan_term(&appender.term_buffer(), tail_offset(appender)).expect("scan");
        });
    }

    #[test]
    fn gap_before_tail_is_corrupt() {
        with_appender(256, |appender| {
            appender.append_unfragmented_message(b"x", None);
            let err = scan_term(&appender.term_buffer(), 128).expect_err("gap");
            assert_eq!(err.kind(), ErrorKind::Corrupt);
            assert_eq!(err.offset(), Some(64));
        });
    }

    #[test]
    fn missing_end_fragment_is_corrupt() {
        with_appender(512, |appender| {
            appender.append_fragmented_message(&[0u8; 100], 64, None);
            frame::set_frame_flags(&appender.term_buffer(), 96, 0);
            let err = scan_term(&appender.term_buffer(), tail_offset(appender)).expect_err("open");
            assert_eq!(err.kind(), ErrorKind::Corrupt);
        });
    }

    #[test]
    fn limit_outside_term_is_usage_error() {
        with_appender(128, |appender| {
            let err = scan_term(&appender.term_buffer(), 256).expect_err("limit");
            assert_eq!(err.kind(), ErrorKind::Usage);
        });
    }
}
