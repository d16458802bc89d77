use crate::error::{Result, VigilError};
use crate::logs::StreamKind;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Default number of lines returned by a tail request
pub const DEFAULT_TAIL_LINES: usize = 20;

/// Which stream(s) a tail request wants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamSelector {
    Out,
    Err,
    #[default]
    All,
}

impl StreamSelector {
    /// Tag a combined-sink line must carry to match this selector
    pub fn tag(&self) -> Option<&'static str> {
        match self {
            StreamSelector::Out => Some(StreamKind::Stdout.tag()),
            StreamSelector::Err => Some(StreamKind::Stderr.tag()),
            StreamSelector::All => None,
        }
    }
}

impl std::str::FromStr for StreamSelector {
    type Err = VigilError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "out" | "stdout" => Ok(StreamSelector::Out),
            "err" | "stderr" | "error" => Ok(StreamSelector::Err),
            "all" => Ok(StreamSelector::All),
            other => Err(VigilError::Other(format!("Unknown log stream: {}", other))),
        }
    }
}

/// Read the last `lines` lines of a log file, optionally keeping only lines
/// that contain `filter`. A missing file reads as empty.
///
/// Worker output is stored as raw bytes, so invalid UTF-8 is replaced rather
/// than failing the whole tail.
pub async fn read_last_lines(
    file_path: &Path,
    lines: usize,
    filter: Option<&str>,
) -> Result<Vec<String>> {
    if !file_path.exists() {
        return Ok(Vec::new());
    }

    let file = File::open(file_path).await.map_err(|e| {
        VigilError::LogSinkError(format!(
            "Failed to open log file {}: {}",
            file_path.display(),
            e
        ))
    })?;

    let mut reader = BufReader::new(file);
    let mut tail = VecDeque::with_capacity(lines.min(1024));
    let mut buf = Vec::new();

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            break;
        }
        let raw = buf.strip_suffix(b"\n").unwrap_or(&buf);
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        let line = String::from_utf8_lossy(raw).into_owned();

        if let Some(pattern) = filter {
            if !line.contains(pattern) {
                continue;
            }
        }
        if tail.len() == lines {
            tail.pop_front();
        }
        if lines > 0 {
            tail.push_back(line);
        }
    }

    Ok(tail.into_iter().collect())
}
