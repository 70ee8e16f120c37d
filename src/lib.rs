//! Purpose: Write side of a lock-free, shared-memory term log buffer.
//! Exports: `core` (buffer, framing, tail counter, appender, validation, errors) and `api`.
//! Role: Library backing the `termlog` CLI; `api` is the supported import path.
//! Invariants: Producers coordinate only through the per-term atomic tail counter.
//! Invariants: Core modules prefer explicit inputs/outputs over hidden state.
pub mod api;
pub mod core;
