//! §3/§4.3/§5/§9 — the two independent credit-based flow-control windows.
//!
//! A [`ConnWindow`] lives inside the coordinator (§2: "exposed by the
//! ingress side; consumed here" — here meaning the connection-scoped
//! instance is this engine's own state). A [`StreamWindow`] is an
//! independent, cheaply-cloneable handle the ingress side owns per stream
//! and passes into `write_data`/`try_update_stream_window`/
//! `abort_pending_stream_data_writes`.
//!
//! Both share the same FIFO-wait-queue mechanics, implemented on a plain
//! `std::sync::Mutex` (mutated only for brief, non-suspending critical
//! sections, never held across an `.await` — §5's lock discipline applies
//! here too even though this isn't *the* write lock).

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

use crate::types::MAX_WINDOW_SIZE;

/// Wakes a waiter with the reason it resumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowSignal {
    CreditAdded,
    Aborted,
}

#[derive(Debug)]
struct WindowState {
    available: i64,
    aborted: bool,
    waiters: VecDeque<oneshot::Sender<WindowSignal>>,
}

impl WindowState {
    fn new(initial: i64) -> Self {
        Self {
            available: initial,
            aborted: false,
            waiters: VecDeque::new(),
        }
    }

    /// Wakes every waiter currently queued, in FIFO order, with `signal`.
    /// Only used for abort, where every waiter needs to learn about it at
    /// once — see `wake_front` for the credit path.
    fn wake_all(&mut self, signal: WindowSignal) {
        while let Some(waiter) = self.waiters.pop_front() {
            let _ = waiter.send(signal);
        }
    }

    /// Wakes exactly the head of the FIFO queue, if any, with
    /// `CreditAdded`. §9: "resumed as soon as any credit is added" +
    /// "one waiter at a time" — waking more than one here would let a
    /// later waiter race an earlier one for the same credit.
    fn wake_front(&mut self) {
        if let Some(waiter) = self.waiters.pop_front() {
            let _ = waiter.send(WindowSignal::CreditAdded);
        }
    }
}

/// Shared window mechanics used by both connection- and stream-scoped
/// windows.
#[derive(Debug, Clone)]
struct Window(Arc<Mutex<WindowState>>);

impl Window {
    fn new(initial: i64) -> Self {
        Self(Arc::new(Mutex::new(WindowState::new(initial))))
    }

    /// Claims up to `want` bytes of credit, returning how much was actually
    /// reserved (may be 0 if the window is exhausted, never negative).
    /// A zero-length claim always succeeds without touching the window.
    /// If credit remains after this claim, cascades the wake to the next
    /// queued waiter — this is what lets a waiter that couldn't consume
    /// everything hand the rest on to the next one in FIFO order instead of
    /// everyone racing for it at once.
    fn reserve_up_to(&self, want: i64) -> i64 {
        if want == 0 {
            return 0;
        }
        let mut state = self.0.lock().expect("window mutex poisoned");
        let allowed = want.min(state.available.max(0));
        state.available -= allowed;
        if state.available > 0 {
            state.wake_front();
        }
        allowed
    }

    /// Adds `bytes` of credit. Returns `false` if doing so would overflow
    /// the 2^31-1 ceiling (§3's protocol-violation case); the caller
    /// escalates that to a connection-level error.
    fn try_add_credit(&self, bytes: i64) -> bool {
        let mut state = self.0.lock().expect("window mutex poisoned");
        let new_value = state.available.saturating_add(bytes);
        if new_value > MAX_WINDOW_SIZE {
            return false;
        }
        state.available = new_value;
        if new_value > 0 {
            state.wake_front();
        }
        true
    }

    fn abort(&self) {
        let mut state = self.0.lock().expect("window mutex poisoned");
        state.aborted = true;
        state.wake_all(WindowSignal::Aborted);
    }

    fn is_aborted(&self) -> bool {
        self.0.lock().expect("window mutex poisoned").aborted
    }

    fn available(&self) -> i64 {
        self.0.lock().expect("window mutex poisoned").available
    }

    /// Registers a FIFO waiter and returns the receiver half. The write
    /// lock must be released before awaiting it (§5).
    fn register_waiter(&self) -> oneshot::Receiver<WindowSignal> {
        let (tx, rx) = oneshot::channel();
        let mut state = self.0.lock().expect("window mutex poisoned");
        if state.aborted {
            let _ = tx.send(WindowSignal::Aborted);
        } else {
            state.waiters.push_back(tx);
        }
        rx
    }
}

/// The connection-scoped window, owned by the coordinator.
#[derive(Debug, Clone)]
pub struct ConnWindow(Window);

impl ConnWindow {
    pub fn new(initial: i64) -> Self {
        Self(Window::new(initial))
    }

    pub fn reserve_up_to(&self, want: i64) -> i64 {
        self.0.reserve_up_to(want)
    }

    pub fn try_add_credit(&self, bytes: i64) -> bool {
        self.0.try_add_credit(bytes)
    }

    pub fn available(&self) -> i64 {
        self.0.available()
    }

    pub fn is_aborted(&self) -> bool {
        self.0.is_aborted()
    }

    pub fn register_waiter(&self) -> oneshot::Receiver<WindowSignal> {
        self.0.register_waiter()
    }
}

/// A per-stream window. Cloning shares the same underlying state — the
/// ingress side keeps one clone in its stream table, the egress coordinator
/// receives another as a `write_data` parameter.
#[derive(Debug, Clone)]
pub struct StreamWindow(Window);

impl StreamWindow {
    pub fn new(initial: i64) -> Self {
        Self(Window::new(initial))
    }

    pub fn reserve_up_to(&self, want: i64) -> i64 {
        self.0.reserve_up_to(want)
    }

    pub fn try_add_credit(&self, bytes: i64) -> bool {
        self.0.try_add_credit(bytes)
    }

    pub fn available(&self) -> i64 {
        self.0.available()
    }

    pub fn is_aborted(&self) -> bool {
        self.0.is_aborted()
    }

    /// §4.3's `abortPendingStreamDataWrites`: marks the window aborted and
    /// wakes every waiter.
    pub fn abort(&self) {
        self.0.abort();
    }

    pub fn register_waiter(&self) -> oneshot::Receiver<WindowSignal> {
        self.0.register_waiter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_never_exceeds_available_credit() {
        let window = ConnWindow::new(10);
        assert_eq!(window.reserve_up_to(100), 10);
        assert_eq!(window.available(), 0);
        assert_eq!(window.reserve_up_to(5), 0);
    }

    #[test]
    fn zero_length_reserve_never_touches_window() {
        let window = ConnWindow::new(0);
        assert_eq!(window.reserve_up_to(0), 0);
        assert_eq!(window.available(), 0);
    }

    #[test]
    fn try_add_credit_rejects_overflow() {
        let window = ConnWindow::new(MAX_WINDOW_SIZE);
        assert!(!window.try_add_credit(1));
        assert_eq!(window.available(), MAX_WINDOW_SIZE);
    }

    #[tokio::test]
    async fn credit_addition_wakes_only_the_front_waiter() {
        let window = StreamWindow::new(0);
        let first = window.register_waiter();
        let second = window.register_waiter();
        assert!(window.try_add_credit(10));
        assert_eq!(first.await.unwrap(), WindowSignal::CreditAdded);
        // second hasn't been woken yet: first must actually reserve before
        // any leftover cascades to the next waiter.
        assert!(second.try_recv().is_err());

        assert_eq!(window.reserve_up_to(4), 4);
        assert_eq!(second.await.unwrap(), WindowSignal::CreditAdded);
    }

    #[tokio::test]
    async fn abort_wakes_waiters_with_aborted_signal() {
        let window = StreamWindow::new(0);
        let waiter = window.register_waiter();
        window.abort();
        assert_eq!(waiter.await.unwrap(), WindowSignal::Aborted);
        assert!(window.is_aborted());
    }

    #[tokio::test]
    async fn registering_after_abort_resolves_immediately() {
        let window = StreamWindow::new(0);
        window.abort();
        let waiter = window.register_waiter();
        assert_eq!(waiter.await.unwrap(), WindowSignal::Aborted);
    }
}
