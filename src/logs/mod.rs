// Logs module - Output capture, timestamping and sink management

mod format;
mod multiplexer;
mod reader;
mod writer;

pub use format::{TimestampFormat, DEFAULT_DATE_FORMAT};
pub use multiplexer::{pump, LogMultiplexer};
pub use reader::{read_last_lines, StreamSelector, DEFAULT_TAIL_LINES};
pub use writer::{instance_path, LogSink, LogSinkConfig, SinkSet, StreamKind};
