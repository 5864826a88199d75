//! §4.4 — the buffered byte-sink contract the engine writes through.
//!
//! This is an external collaborator (§1's scope note: "the underlying
//! buffered byte sink is consumed as an interface"); the engine never
//! assumes anything about what's on the other side beyond this trait.

use async_trait::async_trait;

/// Result of a flush: how many bytes actually made it out, and whether the
/// sink is now in a terminal (aborted/closed) state. §5: "Flushes carry a
/// cancellation signal... the coordinator... returns a terminal flush
/// result and does not touch the sink again" — this is that result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlushOutcome {
    pub bytes_flushed: usize,
    pub aborted: bool,
}

impl FlushOutcome {
    /// The fixed result every write operation returns once the engine is
    /// `completed` or the sink has been aborted (§7, §8 invariant 6).
    pub const TERMINAL: FlushOutcome = FlushOutcome {
        bytes_flushed: 0,
        aborted: true,
    };
}

/// §4.4(a)-(f). `reserve`/`advance`/`write` are synchronous — they only
/// touch an in-memory buffer; only `flush` may suspend, and only it
/// performs actual I/O.
#[async_trait]
pub trait ByteSink: Send {
    /// Returns a mutable span of at least `n` bytes the caller may write
    /// into before calling `advance`.
    fn reserve(&mut self, n: usize) -> &mut [u8];

    /// Commits `k <= ` the last `reserve`d length as buffered output.
    fn advance(&mut self, k: usize);

    /// Appends `bytes` directly, bypassing `reserve`/`advance`.
    fn write(&mut self, bytes: &[u8]);

    /// Flushes buffered bytes to the transport. May suspend; never touches
    /// the write lock (§5: "operations never block the write lock on
    /// actual I/O... only `flush` may suspend").
    async fn flush(&mut self) -> FlushOutcome;

    /// Transitions the sink to terminal. Subsequent `write`s are no-ops and
    /// `flush` immediately returns [`FlushOutcome::TERMINAL`].
    fn abort(&mut self);
}

/// **(supplement)** A `ByteSink` backed by a plain `Vec<u8>`, used by every
/// test in this crate instead of real transport I/O. `flush` resolves
/// immediately unless the test wires up [`InMemorySink::stall_on`], which is
/// how the watchdog-timeout and credit-wait property tests are driven
/// without a real socket.
///
/// `Clone`able: the engine takes ownership of one clone while a test keeps
/// another, both backed by the same `Arc`s, so the test can inspect what
/// was written after handing the sink to an `Engine`. `reserve`'s staging
/// area is the only part that isn't shared, since it must hand back a
/// genuine `&mut [u8]` rather than something borrowed out of a mutex guard;
/// the coordinator never calls `reserve`/`advance` itself (only `write`), so
/// this only matters for tests that exercise the trait directly.
#[derive(Debug, Clone, Default)]
pub struct InMemorySink {
    written: std::sync::Arc<std::sync::Mutex<Vec<u8>>>,
    aborted: std::sync::Arc<std::sync::atomic::AtomicBool>,
    stall: std::sync::Arc<std::sync::Mutex<Option<std::sync::Arc<tokio::sync::Notify>>>>,
    scratch: Vec<u8>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every subsequent `flush` waits on `notify` before resolving, letting
    /// a test hold a flush open long enough to exercise the rate watchdog or
    /// a cancellation. Affects every clone of this sink.
    pub fn stall_on(&self, notify: std::sync::Arc<tokio::sync::Notify>) {
        *self.stall.lock().expect("stall mutex poisoned") = Some(notify);
    }

    /// Everything written so far, flushed or not — tests assert against this
    /// directly rather than modeling a separate "on the wire" view.
    pub fn written(&self) -> Vec<u8> {
        self.written.lock().expect("written mutex poisoned").clone()
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(std::sync::atomic::Ordering::Acquire)
    }
}

#[async_trait]
impl ByteSink for InMemorySink {
    fn reserve(&mut self, n: usize) -> &mut [u8] {
        self.scratch.clear();
        self.scratch.resize(n, 0);
        &mut self.scratch
    }

    fn advance(&mut self, k: usize) {
        debug_assert!(k <= self.scratch.len());
        if !self.is_aborted() {
            self.written
                .lock()
                .expect("written mutex poisoned")
                .extend_from_slice(&self.scratch[..k]);
        }
    }

    fn write(&mut self, bytes: &[u8]) {
        if !self.is_aborted() {
            self.written
                .lock()
                .expect("written mutex poisoned")
                .extend_from_slice(bytes);
        }
    }

    async fn flush(&mut self) -> FlushOutcome {
        if self.is_aborted() {
            return FlushOutcome::TERMINAL;
        }
        let notify = self.stall.lock().expect("stall mutex poisoned").clone();
        if let Some(notify) = notify {
            notify.notified().await;
        }
        FlushOutcome {
            bytes_flushed: self.written.lock().expect("written mutex poisoned").len(),
            aborted: false,
        }
    }

    fn abort(&mut self) {
        self.aborted.store(true, std::sync::atomic::Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_flush_reports_all_written_bytes() {
        let mut sink = InMemorySink::new();
        sink.write(b"hello");
        let outcome = sink.flush().await;
        assert_eq!(outcome.bytes_flushed, 5);
        assert_eq!(sink.written(), b"hello");
    }

    #[tokio::test]
    async fn abort_makes_writes_silent_and_flush_terminal() {
        let mut sink = InMemorySink::new();
        sink.abort();
        sink.write(b"dropped");
        assert!(sink.written().is_empty());
        assert_eq!(sink.flush().await, FlushOutcome::TERMINAL);
    }

    #[tokio::test]
    async fn clones_share_the_same_underlying_buffer() {
        let sink = InMemorySink::new();
        let mut handle = sink.clone();
        handle.write(b"shared");
        assert_eq!(sink.written(), b"shared");
    }
}
