// Sequential layout walk: append the requested sizes into a fresh term and print what landed where.
use serde_json::{Value, json};

use termlog::api::{
    AppendOutcome, AppendResult, Appender, Error, ErrorKind, LogBuffers, max_message_length,
    max_payload_length, scan_term, term_offset,
};

use crate::{LayoutArgs, emit_json};

pub(crate) fn run_layout(args: LayoutArgs) -> Result<(), Error> {
    let options = args.term.options();
    let log = LogBuffers::new(options)?;
    let appender = Appender::from_log_buffers(&log, 0)?;
    let max_message = max_message_length(options.term_length) as usize;
    let max_payload = max_payload_length(options.mtu_length);

    let mut appends = Vec::with_capacity(args.sizes.len());
    for (index, &size) in args.sizes.iter().enumerate() {
        if size > max_message {
            return Err(Error::new(ErrorKind::Usage).with_message(format!(
                "message {index} of {size} bytes exceeds max message length {max_message}"
            )));
        }
        let payload = vec![index as u8; size];
        let fragmented = size > max_payload as usize;
        let result = if fragmented {
            appender.append_fragmented_message(&payload, max_payload, None)
        } else {
            appender.append_unfragmented_message(&payload, None)
        };
        appends.push(append_json(size, fragmented, &result));
    }

    let limit = term_offset(appender.raw_tail(), appender.term_length());
    let report = scan_term(&appender.term_buffer(), limit)?;
    let term = serde_json::to_value(&report).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("json encode failed")
            .with_source(err)
    })?;

    emit_json(&json!({
        "appends": appends,
        "raw_tail": appender.raw_tail(),
        "term": term,
    }))
}

fn append_json(length: usize, fragmented: bool, result: &AppendResult) -> Value {
    let outcome = match result.outcome() {
        AppendOutcome::Appended { .. } => "appended",
        AppendOutcome::Tripped => "tripped",
        AppendOutcome::Failed => "failed",
    };
    json!({
        "length": length,
        "fragmented": fragmented,
        "outcome": outcome,
        "term_id": result.term_id(),
        "term_offset": result.term_offset(),
    })
}
