// Core modules implementing the term buffer, framing, append protocol, and error modeling.
pub mod appender;
pub mod buffer;
pub mod claim;
pub mod error;
pub mod frame;
pub mod log_buffers;
pub mod tail;
pub mod validate;
