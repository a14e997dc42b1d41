// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Pushes raw log lines into the worker pool.
//!
//! Files are known to be finite, so they are submitted with blocking backpressure. Standard
//! input may be an endless live stream; it is submitted without blocking, and a line rejected
//! by a full queue is retried after [`SUBMIT_RETRY_DELAY`].

use crate::constants::SUBMIT_RETRY_DELAY;
use crate::errors::SubmitError;
use crate::worker_pool::WorkerPool;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Where log lines come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineSource {
    Stdin,
    /// Read one after the other, in order.
    Files(Vec<PathBuf>),
}

impl LineSource {
    /// No arguments, or `-` as the first one, selects standard input.
    pub fn from_args<S: AsRef<str>>(args: &[S]) -> Self {
        match args.first().map(|arg| arg.as_ref()) {
            None | Some("-") => LineSource::Stdin,
            Some(_) => LineSource::Files(args.iter().map(|a| PathBuf::from(a.as_ref())).collect()),
        }
    }
}

impl fmt::Display for LineSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LineSource::Stdin => write!(f, "-"),
            LineSource::Files(paths) => {
                let names: Vec<String> = paths.iter().map(|p| p.display().to_string()).collect();
                write!(f, "{}", names.join(", "))
            }
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FeedSummary {
    /// Lines accepted by the pool.
    pub lines: usize,
    /// Submissions rejected by a full queue and retried.
    pub retries: usize,
    /// Inputs that could not be opened or read to the end.
    pub failed_inputs: usize,
    pub cancelled: bool,
}

/// Feeds every line of `source` to `pool`, then waits for the pool to process them.
pub async fn feed(
    pool: &WorkerPool,
    source: &LineSource,
    cancel: &CancellationToken,
) -> FeedSummary {
    info!("Starting log parsing for: {source}");
    let summary = match source {
        LineSource::Stdin => feed_stdin(pool, cancel).await,
        LineSource::Files(paths) => feed_files(pool, paths, cancel).await,
    };

    pool.drain().await;
    info!(
        lines = summary.lines,
        retries = summary.retries,
        failed_inputs = summary.failed_inputs,
        "Finished log parsing"
    );
    summary
}

/// Reads standard input until end of stream or cancellation, without blocking on a full queue.
pub async fn feed_stdin(pool: &WorkerPool, cancel: &CancellationToken) -> FeedSummary {
    let mut summary = FeedSummary::default();
    let reader = BufReader::new(tokio::io::stdin());
    if let Err(e) = feed_reader(pool, reader, false, cancel, &mut summary).await {
        error!("Error reading standard input: {e}");
        summary.failed_inputs += 1;
    }
    summary
}

/// Reads each file in turn with blocking submission. Unreadable files are logged and skipped.
pub async fn feed_files(
    pool: &WorkerPool,
    paths: &[PathBuf],
    cancel: &CancellationToken,
) -> FeedSummary {
    let mut summary = FeedSummary::default();
    for path in paths {
        if summary.cancelled {
            break;
        }
        if let Err(e) = feed_file(pool, path, cancel, &mut summary).await {
            error!("Error reading {}: {e}", path.display());
            summary.failed_inputs += 1;
        }
    }
    summary
}

async fn feed_file(
    pool: &WorkerPool,
    path: &Path,
    cancel: &CancellationToken,
    summary: &mut FeedSummary,
) -> std::io::Result<()> {
    let file = tokio::fs::File::open(path).await?;
    debug!("Reading {}", path.display());
    feed_reader(pool, BufReader::new(file), true, cancel, summary).await
}

/// Submits every line of `reader`, stopping early when `cancel` fires or the pool closes.
///
/// Trailing `\n` and `\r\n` are stripped; invalid UTF-8 is replaced rather than rejected.
pub async fn feed_reader<R>(
    pool: &WorkerPool,
    mut reader: R,
    blocking: bool,
    cancel: &CancellationToken,
    summary: &mut FeedSummary,
) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                summary.cancelled = true;
                return Ok(());
            }
            read = reader.read_until(b'\n', &mut buf) => read?,
        };
        if read == 0 {
            return Ok(());
        }

        if !submit_line(pool, decode_line(&buf), blocking, cancel, summary).await {
            return Ok(());
        }
    }
}

/// Returns `false` when feeding must stop.
async fn submit_line(
    pool: &WorkerPool,
    mut line: String,
    blocking: bool,
    cancel: &CancellationToken,
    summary: &mut FeedSummary,
) -> bool {
    loop {
        let submitted = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                summary.cancelled = true;
                return false;
            }
            submitted = pool.submit(line, blocking) => submitted,
        };

        match submitted {
            Ok(()) => {
                summary.lines += 1;
                return true;
            }
            Err(SubmitError::Rejected(rejected)) => {
                warn!("Line parser queue full");
                summary.retries += 1;
                line = rejected;
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        summary.cancelled = true;
                        return false;
                    }
                    _ = sleep(SUBMIT_RETRY_DELAY) => {}
                }
            }
            Err(e @ SubmitError::Closed(_)) => {
                error!("Stopped feeding lines: {e}");
                return false;
            }
        }
    }
}

fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::Classifier;
    use crate::local_address::LocalAddressClassifier;
    use crate::metric::RecordingSink;
    use std::io::Write;
    use std::sync::Arc;

    const BOUNCE_LINE: &str = "Jan  5 10:00:01 mail01 postfix/bounce[2211]: 3F2A81C0B: sender non-delivery notification: 5C1D71C0D";
    const CLEANUP_LINE: &str = "Jan  5 10:00:01 mail01 postfix/cleanup[2210]: 3F2A81C0B: message-id=<abc@example.com>";

    fn pool(workers: usize, sink: Arc<RecordingSink>) -> WorkerPool {
        let classifier =
            Classifier::with_default_handlers(LocalAddressClassifier::empty()).unwrap();
        WorkerPool::new(workers, Arc::new(classifier), sink)
    }

    #[test]
    fn test_line_source_from_args() {
        assert_eq!(LineSource::from_args::<&str>(&[]), LineSource::Stdin);
        assert_eq!(LineSource::from_args(&["-"]), LineSource::Stdin);
        assert_eq!(
            LineSource::from_args(&["/var/log/mail.log", "/var/log/mail.log.1"]),
            LineSource::Files(vec![
                PathBuf::from("/var/log/mail.log"),
                PathBuf::from("/var/log/mail.log.1"),
            ])
        );
        assert_eq!(
            LineSource::from_args(&["a.log", "b.log"]).to_string(),
            "a.log, b.log"
        );
    }

    #[test]
    fn test_decode_line() {
        assert_eq!(decode_line(b"line\n"), "line");
        assert_eq!(decode_line(b"line\r\n"), "line");
        assert_eq!(decode_line(b"no newline"), "no newline");
        assert_eq!(decode_line(b"bad \xff byte\n"), "bad \u{fffd} byte");
    }

    #[tokio::test]
    async fn test_feed_files_in_order_and_skip_missing() {
        let mut first = tempfile::NamedTempFile::new().unwrap();
        writeln!(first, "{BOUNCE_LINE}").unwrap();
        writeln!(first, "not a postfix line").unwrap();
        let mut second = tempfile::NamedTempFile::new().unwrap();
        write!(second, "{CLEANUP_LINE}\r\n{BOUNCE_LINE}").unwrap();

        let sink = Arc::new(RecordingSink::new());
        let pool = pool(2, sink.clone());
        let source = LineSource::Files(vec![
            first.path().to_path_buf(),
            PathBuf::from("/nonexistent/mail.log"),
            second.path().to_path_buf(),
        ]);

        let summary = feed(&pool, &source, &CancellationToken::new()).await;

        assert_eq!(summary.lines, 4);
        assert_eq!(summary.failed_inputs, 1);
        assert!(!summary.cancelled);
        assert_eq!(sink.counter("messages.bounce"), Some(2));
        assert_eq!(sink.counter("messages.cleanup"), Some(1));
        pool.shutdown().await;
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_non_blocking_feed_retries_until_accepted() {
        let sink = Arc::new(RecordingSink::new());
        let pool = pool(1, sink.clone());
        let total = pool.capacity() + 500;
        let input = format!("{BOUNCE_LINE}\n").repeat(total);

        let mut summary = FeedSummary::default();
        feed_reader(
            &pool,
            input.as_bytes(),
            false,
            &CancellationToken::new(),
            &mut summary,
        )
        .await
        .unwrap();
        pool.drain().await;

        assert_eq!(summary.lines, total);
        assert!(summary.retries >= 1);
        assert_eq!(sink.counter("messages.bounce"), Some(total as i64));
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_cancelled_feed_stops_reading() {
        let sink = Arc::new(RecordingSink::new());
        let pool = pool(1, sink.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let input = format!("{BOUNCE_LINE}\n").repeat(10);
        let mut summary = FeedSummary::default();
        feed_reader(&pool, input.as_bytes(), true, &cancel, &mut summary)
            .await
            .unwrap();

        assert!(summary.cancelled);
        assert_eq!(summary.lines, 0);
        pool.shutdown().await;
        assert_eq!(sink.counter("messages.bounce"), None);
    }
}
