// Contention benchmark: producer threads race one term to its end, then the term is validated.
//
// Every producer stops at its first non-appended outcome, so a healthy run ends with exactly
// one tripped producer and `producers - 1` failed ones.

use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use serde_json::{Value, json};
use tracing::info;

use termlog::api::{
    AppendOutcome, Appender, AtomicBuffer, Error, ErrorKind, LogBuffers, TermReport,
    max_message_length, max_payload_length, scan_term, term_offset,
};

use crate::{BenchArgs, emit_json};

#[derive(Clone, Copy, Debug, Default)]
struct ProducerStats {
    appended: u64,
    tripped: u64,
    failed: u64,
}

pub(crate) fn run_bench(args: BenchArgs, program_version: &str) -> Result<(), Error> {
    if args.producers == 0 {
        return Err(Error::new(ErrorKind::Usage).with_message("--producers must be at least 1"));
    }
    let options = args.term.options();
    let log = LogBuffers::new(options)?;
    let appender = Appender::from_log_buffers(&log, 0)?;

    let max_message = max_message_length(options.term_length) as usize;
    if args.payload_bytes > max_message {
        return Err(Error::new(ErrorKind::Usage)
            .with_message(format!(
                "payload of {} bytes exceeds max message length {max_message}",
                args.payload_bytes
            ))
            .with_hint("Use a larger --term-length or smaller --payload-bytes."));
    }
    let max_payload = max_payload_length(options.mtu_length);

    let start = Instant::now();
    let stats = race_producers(&appender, args.producers, args.payload_bytes, max_payload)?;
    let duration = start.elapsed();

    let limit = term_offset(appender.raw_tail(), appender.term_length());
    let report = scan_term(&appender.term_buffer(), limit)?;
    check_outcome(&stats, &report, args.producers)?;
    info!(
        producers = args.producers,
        appended = stats.appended,
        duration_ms = duration.as_millis() as u64,
        "bench complete"
    );

    let output = json!({
        "name": "termlog",
        "version": program_version,
        "params": {
            "term_length": options.term_length,
            "mtu_length": options.mtu_length,
            "producers": args.producers,
            "payload_bytes": args.payload_bytes,
            "fragmented": args.payload_bytes > max_payload as usize,
            "debug_build": cfg!(debug_assertions),
        },
        "results": result_entry(&stats, duration),
        "term": term_json(&report),
    });

    if let Some(path) = &args.out {
        write_report(path, &output)?;
    }
    emit_json(&output)
}

fn race_producers(
    appender: &Appender<'_>,
    producers: usize,
    payload_bytes: usize,
    max_payload: i32,
) -> Result<ProducerStats, Error> {
    let fragmented = payload_bytes > max_payload as usize;
    let per_producer = thread::scope(|scope| {
        let handles: Vec<_> = (0..producers)
            .map(|producer| {
                let payload = vec![producer as u8; payload_bytes];
                scope.spawn(move || {
                    let mut stats = ProducerStats::default();
                    loop {
                        let result = if fragmented {
                            appender.append_fragmented_message(
                                &payload,
                                max_payload,
                                Some(&payload_checksum),
                            )
                        } else {
                            appender.append_unfragmented_message(&payload, Some(&payload_checksum))
                        };
                        match result.outcome() {
                            AppendOutcome::Appended { .. } => stats.appended += 1,
                            AppendOutcome::Tripped => {
                                stats.tripped += 1;
                                break;
                            }
                            AppendOutcome::Failed => {
                                stats.failed += 1;
                                break;
                            }
                        }
                    }
                    stats
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join())
            .collect::<Vec<_>>()
    });

    let mut total = ProducerStats::default();
    for stats in per_producer {
        let stats = stats
            .map_err(|_| Error::new(ErrorKind::Internal).with_message("producer thread panicked"))?;
        total.appended += stats.appended;
        total.tripped += stats.tripped;
        total.failed += stats.failed;
    }
    Ok(total)
}

fn payload_checksum(term_buffer: &AtomicBuffer<'_>, term_offset: i32, frame_length: i32) -> i64 {
    let start = term_offset as usize + termlog::api::DATA_FRAME_HEADER_LEN as usize;
    let end = term_offset as usize + frame_length as usize;
    (start..end).fold(0i64, |sum, offset| {
        sum.wrapping_mul(31)
            .wrapping_add(i64::from(term_buffer.get_u8(offset)))
    })
}

fn check_outcome(stats: &ProducerStats, report: &TermReport, producers: usize) -> Result<(), Error> {
    if stats.tripped != 1 {
        return Err(Error::new(ErrorKind::Internal)
            .with_message(format!("expected one tripped producer, saw {}", stats.tripped)));
    }
    if stats.failed != producers as u64 - 1 {
        return Err(Error::new(ErrorKind::Internal)
            .with_message(format!("expected {} failed producers, saw {}", producers - 1, stats.failed)));
    }
    if report.messages as u64 != stats.appended {
        return Err(Error::new(ErrorKind::Corrupt).with_message(format!(
            "term holds {} messages but producers appended {}",
            report.messages, stats.appended
        )));
    }
    if report.scanned_to != report.term_length {
        return Err(Error::new(ErrorKind::Corrupt)
            .with_message("tripped term is not covered to its end"));
    }
    Ok(())
}

fn result_entry(stats: &ProducerStats, duration: Duration) -> Value {
    let ns_per_msg = if stats.appended == 0 {
        0.0
    } else {
        duration.as_nanos() as f64 / stats.appended as f64
    };
    json!({
        "appended": stats.appended,
        "tripped": stats.tripped,
        "failed": stats.failed,
        "duration_us": duration.as_micros() as u64,
        "ns_per_msg": ns_per_msg,
    })
}

fn term_json(report: &TermReport) -> Value {
    json!({
        "term_length": report.term_length,
        "scanned_to": report.scanned_to,
        "data_frames": report.data_frames,
        "padding_frames": report.padding_frames,
        "messages": report.messages,
        "payload_bytes": report.payload_bytes,
    })
}

fn write_report(path: &Path, value: &Value) -> Result<(), Error> {
    let text = serde_json::to_string_pretty(value).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("json encode failed")
            .with_source(err)
    })?;
    std::fs::write(path, text).map_err(|err| {
        Error::new(ErrorKind::Io)
            .with_message("failed to write bench report")
            .with_path(path)
            .with_source(err)
    })
}

#[cfg(test)]
mod tests {
    use super::{ProducerStats, check_outcome, race_producers};
    use termlog::api::{Appender, LogBuffers, LogBuffersOptions, scan_term, term_offset};

    #[test]
    fn race_ends_with_single_trip() {
        let log = LogBuffers::new(LogBuffersOptions::default()).expect("log");
        let appender = Appender::from_log_buffers(&log, 0).expect("appender");
        let stats = race_producers(&appender, 4, 100, 1376).expect("race");
        assert_eq!(stats.tripped, 1);
        assert_eq!(stats.failed, 3);

        let limit = term_offset(appender.raw_tail(), appender.term_length());
        let report = scan_term(&appender.term_buffer(), limit).expect("scan");
        check_outcome(&stats, &report, 4).expect("outcome");
    }

    #[test]
    fn miscounted_messages_are_corrupt() {
        let log = LogBuffers::new(LogBuffersOptions::default()).expect("log");
        let appender = Appender::from_log_buffers(&log, 0).expect("appender");
        let stats = race_producers(&appender, 1, 2000, 1376).expect("race");
        let limit = term_offset(appender.raw_tail(), appender.term_length());
        let report = scan_term(&appender.term_buffer(), limit).expect("scan");
        let wrong = ProducerStats {
            appended: stats.appended + 1,
            ..stats
        };
        assert!(check_outcome(&wrong, &report, 1).is_err());
    }
}
