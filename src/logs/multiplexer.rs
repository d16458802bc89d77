use crate::logs::{SinkSet, StreamKind};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::Child;
use tokio::task::JoinHandle;
use tracing::debug;

/// Longest run of bytes buffered before it is written out as its own line
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Routes a worker's stdout and stderr into its sinks, one line at a time
#[derive(Clone)]
pub struct LogMultiplexer {
    sinks: SinkSet,
}

impl LogMultiplexer {
    pub fn new(sinks: SinkSet) -> Self {
        Self { sinks }
    }

    pub fn sinks(&self) -> &SinkSet {
        &self.sinks
    }

    /// Take the child's pipes and spawn one pump task per stream.
    ///
    /// The returned tasks finish when their pipe reaches end-of-stream.
    pub fn attach(&self, child: &mut Child) -> Vec<JoinHandle<()>> {
        let mut pumps = Vec::with_capacity(2);

        if let Some(stdout) = child.stdout.take() {
            pumps.push(tokio::spawn(pump(
                stdout,
                StreamKind::Stdout,
                self.sinks.clone(),
            )));
        }

        if let Some(stderr) = child.stderr.take() {
            pumps.push(tokio::spawn(pump(
                stderr,
                StreamKind::Stderr,
                self.sinks.clone(),
            )));
        }

        pumps
    }
}

/// Copy lines from `reader` into the sinks until the pipe closes.
///
/// Output without a newline is cut into `MAX_LINE_BYTES` chunks so a worker
/// can never make the supervisor buffer an unbounded line.
pub async fn pump<R>(reader: R, stream: StreamKind, sinks: SinkSet)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();

    loop {
        line.clear();
        let read = (&mut reader)
            .take(MAX_LINE_BYTES as u64)
            .read_until(b'\n', &mut line)
            .await;
        match read {
            Ok(0) => break,
            Ok(_) => sinks.write(stream, &line).await,
            Err(e) => {
                // A broken pipe is just the end of the stream.
                debug!(?stream, "Stopped reading worker output: {}", e);
                break;
            }
        }
    }
}
