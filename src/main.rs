//! Purpose: `termlog` CLI entry point and command dispatch.
//! Role: Binary crate root; parses args, runs commands, emits JSON on stdout.
//! Invariants: Commands emit JSON on stdout; errors are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
//! Invariants: Log verbosity comes from `RUST_LOG` and never changes stdout.
#![allow(clippy::result_large_err)]
use std::error::Error as StdError;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, error::ErrorKind as ClapErrorKind};
use serde_json::{Map, Value, json};
use tracing_subscriber::EnvFilter;

use termlog::api::{Error, ErrorKind, LogBuffersOptions, TERM_MIN_LENGTH, to_exit_code};

mod bench;
mod layout;

#[derive(Copy, Clone, Debug)]
struct RunOutcome {
    exit_code: i32,
}

impl RunOutcome {
    fn ok() -> Self {
        Self { exit_code: 0 }
    }

    fn with_code(exit_code: i32) -> Self {
        Self { exit_code }
    }
}

fn main() {
    let exit_code = match run() {
        Ok(outcome) => outcome.exit_code,
        Err(err) => {
            emit_error(&err);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<RunOutcome, Error> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    Error::new(ErrorKind::Io)
                        .with_message("failed to write help")
                        .with_source(io_err)
                })?;
                let exit_code = if matches!(
                    err.kind(),
                    ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                ) {
                    2
                } else {
                    0
                };
                return Ok(RunOutcome::with_code(exit_code));
            }
            _ => {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message(clap_error_summary(&err))
                    .with_hint("Try `termlog --help`."));
            }
        },
    };

    init_tracing();

    match cli.command {
        Command::Bench(args) => bench::run_bench(args, env!("CARGO_PKG_VERSION"))?,
        Command::Layout(args) => layout::run_layout(args)?,
    }
    Ok(RunOutcome::ok())
}

#[derive(Parser)]
#[command(
    name = "termlog",
    version,
    about = "Lock-free term buffer appender for shared-memory message logs",
    long_about = None,
    after_help = r#"EXAMPLES
  $ termlog layout 10 10 10                         # how three small messages land in a term
  $ termlog layout --mtu 128 500                    # a fragmented message
  $ termlog bench --producers 8 --payload-bytes 200 # race producers to the end of a term

Set RUST_LOG=debug to see term trips on stderr."#,
    arg_required_else_help = true
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    #[command(about = "Race concurrent producers until the term trips, then validate it")]
    Bench(BenchArgs),
    #[command(about = "Append messages of the given sizes and print the frame layout")]
    Layout(LayoutArgs),
}

#[derive(Args, Clone, Debug)]
pub(crate) struct TermArgs {
    #[arg(
        long,
        default_value_t = TERM_MIN_LENGTH,
        help = "Term length in bytes (power of two, 64KiB..1GiB)"
    )]
    pub(crate) term_length: i32,
    #[arg(long, default_value_t = 1408, help = "MTU in bytes; bounds the payload of one frame")]
    pub(crate) mtu: i32,
    #[arg(long, default_value_t = 0, help = "Term ID of the first partition")]
    pub(crate) initial_term_id: i32,
    #[arg(long, default_value_t = 0, help = "Session ID written into every frame")]
    pub(crate) session_id: i32,
    #[arg(long, default_value_t = 1, help = "Stream ID written into every frame")]
    pub(crate) stream_id: i32,
}

impl TermArgs {
    pub(crate) fn options(&self) -> LogBuffersOptions {
        LogBuffersOptions {
            term_length: self.term_length,
            initial_term_id: self.initial_term_id,
            session_id: self.session_id,
            stream_id: self.stream_id,
            mtu_length: self.mtu,
        }
    }
}

#[derive(Args, Clone, Debug)]
pub(crate) struct BenchArgs {
    #[command(flatten)]
    pub(crate) term: TermArgs,
    #[arg(long, default_value_t = 4, help = "Concurrent producer threads")]
    pub(crate) producers: usize,
    #[arg(long, default_value_t = 100, help = "Payload bytes per message")]
    pub(crate) payload_bytes: usize,
    #[arg(long, help = "Also write the JSON report to this file", value_hint = ValueHint::FilePath)]
    pub(crate) out: Option<PathBuf>,
}

#[derive(Args, Clone, Debug)]
pub(crate) struct LayoutArgs {
    #[command(flatten)]
    pub(crate) term: TermArgs,
    #[arg(required = true, help = "Message sizes in bytes, appended in order")]
    pub(crate) sizes: Vec<usize>,
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

pub(crate) fn emit_json(value: &Value) -> Result<(), Error> {
    let text = serde_json::to_string_pretty(value).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("json encode failed")
            .with_source(err)
    })?;
    println!("{text}");
    Ok(())
}

fn emit_error(err: &Error) {
    let value = error_json(err);
    let json = serde_json::to_string(&value).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert(
        "message".to_string(),
        json!(err.message().unwrap_or("error")),
    );
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    if let Some(path) = err.path() {
        inner.insert("path".to_string(), json!(path.display().to_string()));
    }
    if let Some(partition) = err.partition() {
        inner.insert("partition".to_string(), json!(partition));
    }
    if let Some(offset) = err.offset() {
        inner.insert("offset".to_string(), json!(offset));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn error_causes(err: &Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut current = err.source();
    while let Some(source) = current {
        causes.push(source.to_string());
        current = source.source();
    }
    causes
}

fn clap_error_summary(err: &clap::Error) -> String {
    for line in err.to_string().lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("error:") {
            return rest.trim().to_string();
        }
        return trimmed.to_string();
    }
    "invalid arguments".to_string()
}

#[cfg(test)]
mod tests {
    use super::{Cli, Command, error_json};
    use clap::Parser;
    use termlog::api::{Error, ErrorKind};

    #[test]
    fn layout_args_map_to_options() {
        let cli = Cli::try_parse_from([
            "termlog",
            "layout",
            "--term-length",
            "131072",
            "--mtu",
            "4096",
            "--session-id",
            "9",
            "10",
            "20",
        ])
        .expect("parse");
        let Command::Layout(args) = cli.command else {
            panic!("expected layout");
        };
        assert_eq!(args.sizes, vec![10, 20]);
        let options = args.term.options();
        assert_eq!(options.term_length, 131072);
        assert_eq!(options.mtu_length, 4096);
        assert_eq!(options.session_id, 9);
        assert_eq!(options.stream_id, 1);
    }

    #[test]
    fn error_json_carries_context() {
        let err = Error::new(ErrorKind::Corrupt)
            .with_message("gap")
            .with_offset(64)
            .with_source(std::io::Error::other("inner"));
        let value = error_json(&err);
        assert_eq!(value["error"]["kind"], "Corrupt");
        assert_eq!(value["error"]["message"], "gap");
        assert_eq!(value["error"]["offset"], 64);
        assert_eq!(value["error"]["causes"][0], "inner");
    }
}
