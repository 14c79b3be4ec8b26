//! Sources of raw event lines.
//!
//! A scanner turns a filter into a stream of byte chunks holding
//! newline-delimited JSON events. Chunk boundaries are arbitrary; the passes
//! do their own line splitting. Dropping the stream ends the scan, which for
//! [`StrfryScanner`] kills the child process.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{self, BoxStream, StreamExt};
use serde::Serialize;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::process::{Child, ChildStdout, Command};
use tokio_util::io::ReaderStream;
use tracing::debug;

use nostr_core::PROFILE_KIND;

pub type ChunkStream = BoxStream<'static, io::Result<Bytes>>;

/// Relay scan filter, serialised as the relay's JSON filter syntax.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanFilter {
    pub kinds: Vec<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl ScanFilter {
    /// All kind 0 profile events.
    pub fn profiles() -> Self {
        Self {
            kinds: vec![PROFILE_KIND],
            limit: None,
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"kinds":[0]}"#.to_string())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to open {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("scanner process has no stdout")]
    NoStdout,
    #[error("scan read failed: {0}")]
    Read(#[from] io::Error),
}

#[async_trait]
pub trait ContentScanner: Send + Sync {
    /// Start a scan. Each call is an independent pass over the store.
    async fn scan(&self, filter: &ScanFilter) -> Result<ChunkStream, ScanError>;
}

// ── strfry subprocess ───────────────────────────────────────────

/// Runs `strfry scan '<filter>'` and streams its stdout.
#[derive(Debug, Clone)]
pub struct StrfryScanner {
    binary: PathBuf,
    config: Option<PathBuf>,
}

impl StrfryScanner {
    pub fn new(binary: impl Into<PathBuf>, config: Option<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            config,
        }
    }

    fn command(&self, filter: &ScanFilter) -> Command {
        let mut cmd = Command::new(&self.binary);
        if let Some(config) = &self.config {
            cmd.arg(format!("--config={}", config.display()));
        }
        cmd.arg("scan")
            .arg(filter.to_json())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl ContentScanner for StrfryScanner {
    async fn scan(&self, filter: &ScanFilter) -> Result<ChunkStream, ScanError> {
        let mut child = self.command(filter).spawn().map_err(|source| ScanError::Spawn {
            program: self.binary.display().to_string(),
            source,
        })?;
        let stdout = child.stdout.take().ok_or(ScanError::NoStdout)?;
        debug!(pid = ?child.id(), filter = %filter.to_json(), "strfry scan started");
        Ok(child_output(
            self.binary.display().to_string(),
            child,
            ReaderStream::new(stdout),
        ))
    }
}

/// Running scan: stdout chunks, then the exit status.
struct ChildScan {
    program: String,
    child: Child,
    output: ReaderStream<ChildStdout>,
}

/// Streams the child's stdout and, once it closes, reaps the child. A
/// non-zero exit becomes a trailing error item. Dropping the stream kills
/// the process.
fn child_output(program: String, child: Child, output: ReaderStream<ChildStdout>) -> ChunkStream {
    let state = ChildScan {
        program,
        child,
        output,
    };
    stream::unfold(Some(state), |state| async move {
        let Some(mut scan) = state else {
            return None;
        };
        match scan.output.next().await {
            Some(chunk) => Some((chunk, Some(scan))),
            None => match scan.child.wait().await {
                Ok(status) if status.success() => None,
                Ok(status) => Some((
                    Err(io::Error::other(format!("{} exited with {}", scan.program, status))),
                    None,
                )),
                Err(e) => Some((Err(e), None)),
            },
        }
    })
    .boxed()
}

// ── JSONL export ────────────────────────────────────────────────

/// Streams an exported JSONL file (e.g. `strfry export` output).
///
/// The filter is not applied here; the passes skip non-profile kinds.
#[derive(Debug, Clone)]
pub struct JsonlFileScanner {
    path: PathBuf,
}

impl JsonlFileScanner {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ContentScanner for JsonlFileScanner {
    async fn scan(&self, _filter: &ScanFilter) -> Result<ChunkStream, ScanError> {
        let file = tokio::fs::File::open(&self.path)
            .await
            .map_err(|source| ScanError::Open {
                path: self.path.display().to_string(),
                source,
            })?;
        Ok(ReaderStream::new(file).boxed())
    }
}

// ── In-process ──────────────────────────────────────────────────

/// Serves fixed lines from memory, split into chunks of `chunk_size` bytes
/// with an optional delay before each chunk. Counts scans.
#[derive(Debug)]
pub struct MemoryScanner {
    body: Bytes,
    chunk_size: usize,
    chunk_delay: Option<Duration>,
    scans: AtomicUsize,
}

impl MemoryScanner {
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut body = String::new();
        for line in lines {
            body.push_str(line.as_ref());
            body.push('\n');
        }
        Self::from_body(body)
    }

    /// Raw body, used as is (no trailing newline is added).
    pub fn from_body(body: impl Into<String>) -> Self {
        Self {
            body: Bytes::from(body.into()),
            chunk_size: 64 * 1024,
            chunk_delay: None,
            scans: AtomicUsize::new(0),
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }

    pub fn scans(&self) -> usize {
        self.scans.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentScanner for MemoryScanner {
    async fn scan(&self, _filter: &ScanFilter) -> Result<ChunkStream, ScanError> {
        self.scans.fetch_add(1, Ordering::SeqCst);
        let body = self.body.clone();
        let chunk_size = self.chunk_size;
        let delay = self.chunk_delay;
        let chunks = stream::unfold(0usize, move |offset| {
            let body = body.clone();
            async move {
                if offset >= body.len() {
                    return None;
                }
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                let end = (offset + chunk_size).min(body.len());
                Some((Ok(body.slice(offset..end)), end))
            }
        });
        Ok(chunks.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    async fn collect(stream: ChunkStream) -> String {
        let chunks: Vec<Bytes> = stream.map(|c| c.unwrap()).collect().await;
        chunks.iter().map(|c| String::from_utf8_lossy(c)).collect()
    }

    #[test]
    fn filter_json() {
        assert_eq!(ScanFilter::profiles().to_json(), r#"{"kinds":[0]}"#);
        let limited = ScanFilter {
            kinds: vec![0, 3],
            limit: Some(10),
        };
        assert_eq!(limited.to_json(), r#"{"kinds":[0,3],"limit":10}"#);
    }

    #[test]
    fn strfry_command_line() {
        let scanner = StrfryScanner::new("/usr/local/bin/strfry", Some("/etc/strfry.conf".into()));
        let cmd = scanner.command(&ScanFilter::profiles());
        let args: Vec<String> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(args, ["--config=/etc/strfry.conf", "scan", r#"{"kinds":[0]}"#]);
    }

    #[tokio::test]
    async fn memory_chunks_reassemble() {
        let scanner = MemoryScanner::new(["one", "two", "three"]).with_chunk_size(4);
        let body = collect(scanner.scan(&ScanFilter::profiles()).await.unwrap()).await;
        assert_eq!(body, "one\ntwo\nthree\n");
        scanner.scan(&ScanFilter::profiles()).await.unwrap();
        assert_eq!(scanner.scans(), 2);
    }

    #[tokio::test]
    async fn jsonl_file_streams_contents() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"{\"kind\":0}\n{\"kind\":1}").unwrap();
        let scanner = JsonlFileScanner::new(f.path());
        let body = collect(scanner.scan(&ScanFilter::profiles()).await.unwrap()).await;
        assert_eq!(body, "{\"kind\":0}\n{\"kind\":1}");
    }

    #[tokio::test]
    async fn missing_binary_is_spawn_error() {
        let scanner = StrfryScanner::new("/nonexistent/strfry", None);
        let err = scanner.scan(&ScanFilter::profiles()).await.err().unwrap();
        assert!(matches!(err, ScanError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn subprocess_output_streams() {
        // `echo` stands in for the relay binary: it prints its arguments.
        let scanner = StrfryScanner::new("echo", None);
        let body = collect(scanner.scan(&ScanFilter::profiles()).await.unwrap()).await;
        assert_eq!(body, "scan {\"kinds\":[0]}\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nonzero_exit_ends_with_error() {
        let scanner = StrfryScanner::new("false", None);
        let items: Vec<io::Result<Bytes>> =
            scanner.scan(&ScanFilter::profiles()).await.unwrap().collect().await;
        let last = items.last().unwrap();
        let err = last.as_ref().unwrap_err();
        assert!(err.to_string().contains("false exited with"));
    }
}
