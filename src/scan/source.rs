//! Scanner feed reader
//!
//! Reads newline-terminated tokens from the RFID reader (a character device
//! or stdin) on its own task, strips everything that is not an ASCII letter
//! or digit and emits what remains as [`ScanEvent`]s.

use std::fmt;
use std::io;
use std::path::Path;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Default number of scans buffered between the reader task and its consumer
pub const DEFAULT_SCAN_BUFFER: usize = 16;

/// Longest line accepted from the reader; longer lines are discarded whole
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// A normalized scan identifier
///
/// Always non-empty and made of ASCII letters and digits only. Case is
/// preserved; matching against member records is case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScanEvent(String);

impl ScanEvent {
    /// Normalize a raw token, returning `None` when nothing alphanumeric remains
    pub fn from_raw(raw: &str) -> Option<Self> {
        normalize(raw).map(Self)
    }

    /// The identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume the event, returning the identifier
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for ScanEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Strip every character that is not an ASCII letter or digit
///
/// Returns `None` if the result would be empty.
pub fn normalize(raw: &str) -> Option<String> {
    let id: String = raw.chars().filter(char::is_ascii_alphanumeric).collect();
    (!id.is_empty()).then_some(id)
}

/// Why a feed stopped emitting scans
#[derive(Debug)]
pub enum FeedEnd {
    /// The input reached end-of-stream
    Exhausted,
    /// The shutdown token fired
    Shutdown,
    /// The consumer dropped its end of the feed
    Dropped,
    /// Reading the input failed
    Failed(io::Error),
}

impl FeedEnd {
    /// Whether the feed ended because of an I/O failure
    pub fn is_failure(&self) -> bool {
        matches!(self, FeedEnd::Failed(_))
    }
}

/// Restartable producer of scan events
///
/// Each call to [`ScanSource::spawn`] consumes the source and starts a fresh
/// reader task; to restart after the feed ends, build a new source over a
/// reopened input.
pub struct ScanSource<R> {
    reader: R,
    capacity: usize,
}

impl<R> ScanSource<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    /// Create a source reading from the given input
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            capacity: DEFAULT_SCAN_BUFFER,
        }
    }

    /// Set the number of scans buffered ahead of the consumer
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Start reading on a dedicated task
    pub fn spawn(self, shutdown: CancellationToken) -> ScanFeed {
        let (tx, rx) = mpsc::channel(self.capacity);
        let reader = BufReader::new(self.reader);

        let task = tokio::spawn(async move {
            let end = read_feed(reader, tx, shutdown).await;
            match &end {
                FeedEnd::Failed(e) => tracing::warn!(error = %e, "Scanner feed failed"),
                other => tracing::info!(reason = ?other, "Scanner feed closed"),
            }
            end
        });

        ScanFeed { events: rx, task }
    }
}

impl ScanSource<tokio::io::Stdin> {
    /// Read scans from standard input
    pub fn stdin() -> Self {
        Self::new(tokio::io::stdin())
    }
}

impl ScanSource<tokio::fs::File> {
    /// Read scans from a device node or file
    pub async fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = tokio::fs::File::open(path).await?;
        Ok(Self::new(file))
    }
}

enum Line {
    Read,
    Overlong,
    Eof,
}

/// Read one line into `line`, at most [`MAX_LINE_LEN`] bytes of content
async fn read_line<R>(reader: &mut R, line: &mut Vec<u8>) -> io::Result<Line>
where
    R: AsyncBufRead + Unpin,
{
    // One extra byte leaves room for the terminator of a maximal line
    let limit = MAX_LINE_LEN as u64 + 1;
    let n = (&mut *reader).take(limit).read_until(b'\n', line).await?;

    if n == 0 {
        return Ok(Line::Eof);
    }
    if line.len() <= MAX_LINE_LEN || line.last() == Some(&b'\n') {
        return Ok(Line::Read);
    }

    skip_line(reader).await?;
    Ok(Line::Overlong)
}

/// Discard input up to and including the next newline
async fn skip_line<R>(reader: &mut R) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let (consumed, done) = {
            let buf = reader.fill_buf().await?;
            match buf.iter().position(|&b| b == b'\n') {
                Some(i) => (i + 1, true),
                None => (buf.len(), buf.is_empty()),
            }
        };
        reader.consume(consumed);

        if done {
            return Ok(());
        }
    }
}

async fn read_feed<R>(
    mut reader: R,
    tx: mpsc::Sender<ScanEvent>,
    shutdown: CancellationToken,
) -> FeedEnd
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::with_capacity(64);

    loop {
        line.clear();

        let read = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return FeedEnd::Shutdown,
            read = read_line(&mut reader, &mut line) => read,
        };

        match read {
            Ok(Line::Eof) => return FeedEnd::Exhausted,
            Ok(Line::Read) => {}
            Ok(Line::Overlong) => {
                tracing::warn!(limit = MAX_LINE_LEN, "Scanner line too long, discarded");
                continue;
            }
            Err(e) => return FeedEnd::Failed(e),
        }

        // Bytes that are not valid UTF-8 become U+FFFD and are stripped
        let Some(event) = ScanEvent::from_raw(&String::from_utf8_lossy(&line)) else {
            continue;
        };

        tracing::debug!(scan = %event, "Scan read");

        tokio::select! {
            biased;
            _ = shutdown.cancelled() => return FeedEnd::Shutdown,
            sent = tx.send(event) => {
                if sent.is_err() {
                    return FeedEnd::Dropped;
                }
            }
        }
    }
}

/// Consumer end of a running scan source
///
/// Yields scans until the input ends, fails, or shutdown fires. The reason
/// is available from [`ScanFeed::finish`] once the sequence has ended.
pub struct ScanFeed {
    events: mpsc::Receiver<ScanEvent>,
    task: JoinHandle<FeedEnd>,
}

impl ScanFeed {
    /// Wait for the next scan; `None` once the feed has closed
    pub async fn next(&mut self) -> Option<ScanEvent> {
        self.events.recv().await
    }

    /// Stop consuming and report why the reader task ended
    ///
    /// Intended to be called after [`ScanFeed::next`] returned `None`.
    /// Calling it earlier drops the consumer end, which ends the reader with
    /// [`FeedEnd::Dropped`] once it next has a scan to deliver.
    pub async fn finish(self) -> FeedEnd {
        drop(self.events);
        match self.task.await {
            Ok(end) => end,
            Err(e) => FeedEnd::Failed(io::Error::new(io::ErrorKind::Other, e)),
        }
    }
}

impl Stream for ScanFeed {
    type Item = ScanEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;
    use tokio::io::AsyncWriteExt;

    use super::*;

    #[test]
    fn test_normalize_strips_non_alphanumeric() {
        assert_eq!(normalize("  ab-12!"), Some("ab12".to_string()));
        assert_eq!(normalize("AbC\r\n"), Some("AbC".to_string()));
        assert_eq!(normalize("ü7ß"), Some("7".to_string()));
    }

    #[test]
    fn test_normalize_rejects_empty() {
        assert_eq!(normalize("----"), None);
        assert_eq!(normalize(""), None);
        assert!(ScanEvent::from_raw(" \t\n").is_none());
    }

    #[tokio::test]
    async fn test_feed_emits_normalized_tokens() {
        let input = tokio_test::io::Builder::new()
            .read(b"  ab-12!\n----\nCD 34\n")
            .build();
        let mut feed = ScanSource::new(input).spawn(CancellationToken::new());

        assert_eq!(feed.next().await.unwrap().as_str(), "ab12");
        assert_eq!(feed.next().await.unwrap().as_str(), "CD34");
        assert!(feed.next().await.is_none());
        assert!(matches!(feed.finish().await, FeedEnd::Exhausted));
    }

    #[tokio::test]
    async fn test_feed_skips_malformed_bytes() {
        let input = tokio_test::io::Builder::new()
            .read(b"\xff\xfe\n12\xffab\n")
            .build();
        let feed = ScanSource::new(input).spawn(CancellationToken::new());

        let scans: Vec<String> = feed.map(ScanEvent::into_string).collect().await;
        assert_eq!(scans, vec!["12ab".to_string()]);
    }

    #[tokio::test]
    async fn test_feed_discards_overlong_lines() {
        let mut flood = vec![b'A'; MAX_LINE_LEN + 10];
        flood.extend_from_slice(b"\nOK1\n");
        let mut exact = vec![b'7'; MAX_LINE_LEN];
        exact.push(b'\n');

        let input = tokio_test::io::Builder::new()
            .read(&flood)
            .read(&exact)
            .read(&vec![b'Z'; MAX_LINE_LEN * 2])
            .build();
        let feed = ScanSource::new(input).spawn(CancellationToken::new());

        let scans: Vec<String> = feed.map(ScanEvent::into_string).collect().await;
        assert_eq!(scans.len(), 2);
        assert_eq!(scans[0], "OK1");
        assert_eq!(scans[1].len(), MAX_LINE_LEN);
    }

    #[tokio::test]
    async fn test_feed_reports_io_failure() {
        let input = tokio_test::io::Builder::new()
            .read(b"AB\n")
            .read_error(io::Error::new(io::ErrorKind::Other, "reader unplugged"))
            .build();
        let mut feed = ScanSource::new(input).spawn(CancellationToken::new());

        assert_eq!(feed.next().await.unwrap().as_str(), "AB");
        assert!(feed.next().await.is_none());

        let end = feed.finish().await;
        assert!(end.is_failure());
    }

    #[tokio::test]
    async fn test_feed_stops_on_shutdown() {
        let (mut writer, reader) = tokio::io::duplex(64);
        let shutdown = CancellationToken::new();
        let mut feed = ScanSource::new(reader).spawn(shutdown.clone());

        writer.write_all(b"0042\n").await.unwrap();
        assert_eq!(feed.next().await.unwrap().as_str(), "0042");

        // Writer stays open; only the token can end the feed
        shutdown.cancel();
        assert!(feed.next().await.is_none());
        assert!(matches!(feed.finish().await, FeedEnd::Shutdown));
        drop(writer);
    }
}
