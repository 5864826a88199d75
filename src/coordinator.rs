//! §2/§4.3/§5 — the egress coordinator: the single object that guards one
//! output byte sink and every frame serializer that writes through it.
//!
//! State is split across two `tokio::sync::Mutex`es rather than one:
//! `state` (hpack table, header-encoding buffer, negotiated max frame size,
//! unflushed byte count) and `sink` (the byte sink itself). §5 requires that
//! "the lock is not held across awaits" for both credit waits *and*
//! flushes; a single combined lock can't satisfy that for flushes, because
//! `ByteSink::flush` takes `&mut self` and must be awaited, so whoever calls
//! it needs exclusive access to the sink for the duration regardless. Two
//! locks let a flush hold only the narrower `sink` mutex across its await,
//! leaving `state` (hpack encoding, frame assembly, credit bookkeeping) free
//! for other streams to make progress. Both locks are always acquired in
//! the same order (`state` before `sink`) so there's no deadlock risk, and
//! they are never both held across an `.await`.

use std::sync::atomic::{AtomicBool, Ordering};

use bytes::BytesMut;
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::flags::{ContinuationFlags, DataFlags, HeadersFlags, PingFlags, SettingsFlags};
use crate::flow_control::{ConnWindow, StreamWindow, WindowSignal};
use crate::frame_header::FrameHeader;
use crate::hpack::{self, Encoder as HpackEncoder, HeaderBlockCursor};
use crate::sink::{ByteSink, FlushOutcome};
use crate::types::{ErrorCode, FrameType, Headers, StreamId};
use crate::watchdog::RateWatchdog;

/// Hpack table, reused header-encoding buffer, negotiated frame size, and
/// the unflushed byte counter (§3) — everything *except* the sink itself.
struct EngineState {
    hpack: HpackEncoder,
    header_buf: BytesMut,
    max_frame_size: u32,
    unflushed: usize,
}

/// Writes one frame's 9-byte prefix plus payload into `sink`, recording the
/// bytes against `state`'s unflushed counter. Free function (not a method)
/// because its two arguments are independently-locked mutex guards.
fn emit_frame<S: ByteSink>(
    state: &mut EngineState,
    sink: &mut S,
    frame_type: FrameType,
    flags: u8,
    stream_id: StreamId,
    payload: &[u8],
) {
    debug_assert!(payload.len() <= state.max_frame_size as usize);
    let header = FrameHeader::new(frame_type, flags, stream_id, payload.len() as u32);
    let mut prefix = [0u8; 9];
    header.encode(&mut prefix);
    sink.write(&prefix);
    sink.write(payload);
    state.unflushed += prefix.len() + payload.len();
    log::trace!(
        "emitted {frame_type:?} stream={stream_id} len={} flags={flags:#x}",
        payload.len()
    );
}

/// §4.1/§4.2 — runs the begin/continue loop for a HEADERS + zero or more
/// CONTINUATION frames, applying `extra_flags` (e.g. END_STREAM) only to the
/// first (HEADERS) frame, and END_HEADERS only to the last. Both `state` and
/// `sink` are held by the caller for the whole call so no other frame for
/// any stream can land between HEADERS and its CONTINUATION frames (§5).
fn write_header_block<S: ByteSink>(
    state: &mut EngineState,
    sink: &mut S,
    stream_id: StreamId,
    status: Option<u16>,
    headers: &Headers,
    extra_flags: u8,
) -> Result<(), EngineError> {
    let max_frame_size = state.max_frame_size as usize;
    let mut buf = std::mem::take(&mut state.header_buf);
    if buf.len() < max_frame_size {
        buf.resize(max_frame_size, 0);
    }
    let mut cursor = HeaderBlockCursor::new(headers);

    let first = state.hpack.begin(status, &mut cursor, &mut buf[..max_frame_size]);
    let (len, mut done) = match first {
        Ok(v) => v,
        Err(e) => {
            state.header_buf = buf;
            return Err(EngineError::HpackCorrupted(e));
        }
    };
    let mut flags = extra_flags;
    if done {
        flags |= HeadersFlags::END_HEADERS.bits();
    }
    let first_fragment = buf[..len].to_vec();
    emit_frame(state, sink, FrameType::Headers, flags, stream_id, &first_fragment);

    while !done {
        let next = state.hpack.continue_block(&mut cursor, &mut buf[..max_frame_size]);
        let (len, is_done) = match next {
            Ok(v) => v,
            Err(e) => {
                state.header_buf = buf;
                return Err(EngineError::HpackCorrupted(e));
            }
        };
        done = is_done;
        let flags = if done {
            ContinuationFlags::END_HEADERS.bits()
        } else {
            0
        };
        let fragment = buf[..len].to_vec();
        emit_frame(state, sink, FrameType::Continuation, flags, stream_id, &fragment);
    }
    state.header_buf = buf;
    Ok(())
}

/// Splits `chunk` into MAX_FRAME_SIZE-sized DATA frames, honoring
/// `end_stream` only on the very last one (§4.3 steps 3-4).
fn emit_data_chunk<S: ByteSink>(
    state: &mut EngineState,
    sink: &mut S,
    stream_id: StreamId,
    chunk: &[u8],
    end_stream: bool,
) {
    let max_frame_size = state.max_frame_size as usize;
    if chunk.len() <= max_frame_size {
        let flags = if end_stream {
            DataFlags::END_STREAM.bits()
        } else {
            0
        };
        emit_frame(state, sink, FrameType::Data, flags, stream_id, chunk);
        return;
    }
    let mut rest = chunk;
    while !rest.is_empty() {
        let take = rest.len().min(max_frame_size);
        let (piece, remainder) = rest.split_at(take);
        let is_last = remainder.is_empty();
        let flags = if end_stream && is_last {
            DataFlags::END_STREAM.bits()
        } else {
            0
        };
        emit_frame(state, sink, FrameType::Data, flags, stream_id, piece);
        rest = remainder;
    }
}

/// The public engine type. One instance guards one connection's output
/// sink. `S` is the buffered byte sink (§4.4), supplied by the caller.
pub struct Engine<S: ByteSink> {
    state: tokio::sync::Mutex<EngineState>,
    sink: tokio::sync::Mutex<S>,
    conn_window: ConnWindow,
    config: EngineConfig,
    watchdog: RateWatchdog,
    completed: AtomicBool,
    aborted: AtomicBool,
}

impl<S: ByteSink> Engine<S> {
    pub fn new(sink: S, config: EngineConfig) -> Self {
        let watchdog = RateWatchdog::new(config.min_data_rate);
        let conn_window = ConnWindow::new(config.initial_connection_window);
        let mut hpack = HpackEncoder::new(config.initial_header_table_size);
        hpack.set_compression_enabled(config.compression_enabled);
        Self {
            state: tokio::sync::Mutex::new(EngineState {
                hpack,
                header_buf: BytesMut::with_capacity(config.initial_max_frame_size as usize),
                max_frame_size: config.initial_max_frame_size,
                unflushed: 0,
            }),
            sink: tokio::sync::Mutex::new(sink),
            conn_window,
            watchdog,
            completed: AtomicBool::new(false),
            aborted: AtomicBool::new(false),
            config,
        }
    }

    /// A handle to the connection-scoped window, for constructing
    /// per-stream windows against the same engine or for tests.
    pub fn connection_window(&self) -> &ConnWindow {
        &self.conn_window
    }

    fn is_completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    // ---- §4.3 header-bearing operations -----------------------------

    /// `writeResponseHeaders`. Surfaces HPACK corruption to the caller —
    /// this is "the first response write" per §7.
    pub async fn write_response_headers(
        &self,
        stream_id: StreamId,
        status_code: u16,
        end_stream: bool,
        headers: Headers,
    ) -> Result<(), EngineError> {
        if self.is_completed() {
            return Ok(());
        }
        let extra_flags = if end_stream {
            HeadersFlags::END_STREAM.bits()
        } else {
            0
        };
        let result = {
            let mut state = self.state.lock().await;
            let mut sink = self.sink.lock().await;
            write_header_block(&mut state, &mut sink, stream_id, Some(status_code), &headers, extra_flags)
        };
        if result.is_err() {
            self.fail_connection("HPACK corruption while writing response headers");
        }
        result
    }

    /// `write100Continue`. Uses the fixed, pre-encoded `:status 100` block
    /// (§6) — never runs the general encoder, so it can't corrupt the table.
    pub async fn write_100_continue(&self, stream_id: StreamId) -> FlushOutcome {
        if self.is_completed() {
            return FlushOutcome::TERMINAL;
        }
        {
            let mut state = self.state.lock().await;
            let mut sink = self.sink.lock().await;
            emit_frame(
                &mut state,
                &mut sink,
                FrameType::Headers,
                HeadersFlags::END_HEADERS.bits(),
                stream_id,
                &hpack::STATUS_100_CONTINUE_BLOCK,
            );
        }
        self.flush_internal(&CancellationToken::new(), None).await
    }

    /// `writeResponseTrailers`. Per §7, a failure here is logged and
    /// swallowed — the response body already began.
    pub async fn write_response_trailers(
        &self,
        stream_id: StreamId,
        trailers: Headers,
    ) -> FlushOutcome {
        if self.is_completed() {
            return FlushOutcome::TERMINAL;
        }
        let failed = {
            let mut state = self.state.lock().await;
            let mut sink = self.sink.lock().await;
            write_header_block(
                &mut state,
                &mut sink,
                stream_id,
                None,
                &trailers,
                HeadersFlags::END_STREAM.bits(),
            )
            .is_err()
        };
        if failed {
            log::error!("HPACK corruption while writing trailers on stream {stream_id}; connection will be aborted, not this write");
            self.fail_connection("HPACK corruption while writing trailers");
        }
        self.flush_internal(&CancellationToken::new(), None).await
    }

    fn fail_connection(&self, reason: &str) {
        log::error!("{reason}; aborting connection");
        self.aborted.store(true, Ordering::Release);
        self.completed.store(true, Ordering::Release);
    }

    // ---- §4.3 DATA -----------------------------------------------------

    /// `writeData`. Fragments by MAX_FRAME_SIZE and by flow-control credit
    /// (§4.3 steps 1-5), flushing buffered headers on a credit-starved
    /// first write, and yielding to the scheduler after any credit wait
    /// (§9), unless `force_flush` requests an explicit flush on the final
    /// chunk too.
    #[allow(clippy::too_many_arguments)]
    pub async fn write_data(
        &self,
        stream_id: StreamId,
        stream_window: &StreamWindow,
        data: &[u8],
        end_stream: bool,
        first_write: bool,
        force_flush: bool,
        cancel: &CancellationToken,
    ) -> FlushOutcome {
        if self.is_completed() {
            return FlushOutcome::TERMINAL;
        }

        if data.is_empty() {
            {
                let mut state = self.state.lock().await;
                let mut sink = self.sink.lock().await;
                let flags = if end_stream {
                    DataFlags::END_STREAM.bits()
                } else {
                    0
                };
                emit_frame(&mut state, &mut sink, FrameType::Data, flags, stream_id, &[]);
            }
            return if force_flush || end_stream {
                self.flush_internal(cancel, None).await
            } else {
                FlushOutcome::default()
            };
        }

        let mut offset = 0usize;
        let mut suspended = false;
        let mut outcome = FlushOutcome::default();

        loop {
            let remaining = &data[offset..];
            let want = remaining.len() as i64;
            let allowed = self.reserve_credit(stream_window, want);

            if allowed == 0 {
                if offset == 0 && first_write {
                    outcome = self.flush_internal(cancel, None).await;
                }
                if self.aborted.load(Ordering::Acquire) || stream_window.is_aborted() {
                    return FlushOutcome::TERMINAL;
                }
                self.await_credit(stream_window, cancel).await;
                suspended = true;
                if self.aborted.load(Ordering::Acquire) || stream_window.is_aborted() {
                    return FlushOutcome::TERMINAL;
                }
                continue;
            }

            let chunk = &remaining[..allowed as usize];
            let is_last_chunk = offset + allowed as usize == data.len();
            {
                let mut state = self.state.lock().await;
                let mut sink = self.sink.lock().await;
                emit_data_chunk(&mut state, &mut sink, stream_id, chunk, end_stream && is_last_chunk);
            }
            offset += allowed as usize;

            if offset < data.len() {
                // About to suspend for more credit: flush first so the
                // peer can observe what's already been sent (§4.3).
                outcome = self.flush_internal(cancel, None).await;
                if outcome.aborted {
                    self.fail_connection("flush watchdog tripped during DATA write");
                    return outcome;
                }
                if self.aborted.load(Ordering::Acquire) || stream_window.is_aborted() {
                    return FlushOutcome::TERMINAL;
                }
                self.await_credit(stream_window, cancel).await;
                suspended = true;
                if self.aborted.load(Ordering::Acquire) || stream_window.is_aborted() {
                    return FlushOutcome::TERMINAL;
                }
            } else {
                if force_flush {
                    outcome = self.flush_internal(cancel, None).await;
                }
                break;
            }
        }

        if suspended && self.config.yield_after_wait {
            tokio::task::yield_now().await;
        }
        outcome
    }

    /// As `writeData` with `end_stream = false`, then `writeResponseTrailers`.
    pub async fn write_data_and_trailers(
        &self,
        stream_id: StreamId,
        stream_window: &StreamWindow,
        data: &[u8],
        first_write: bool,
        trailers: Headers,
        cancel: &CancellationToken,
    ) -> FlushOutcome {
        if self.is_completed() {
            return FlushOutcome::TERMINAL;
        }
        self.write_data(
            stream_id,
            stream_window,
            data,
            false,
            first_write,
            false,
            cancel,
        )
        .await;
        self.write_response_trailers(stream_id, trailers).await
    }

    /// §4.3 step 2: reserves `min(want, connWindow, streamWindow)` from
    /// both windows. Reserves optimistically from the connection window
    /// first, then bounds the stream reservation by it, returning any
    /// excess connection credit that the stream couldn't match — this
    /// keeps the two independent locks from ever being held at once while
    /// still never inventing credit (see DESIGN.md).
    fn reserve_credit(&self, stream_window: &StreamWindow, want: i64) -> i64 {
        let from_conn = self.conn_window.reserve_up_to(want);
        let from_stream = stream_window.reserve_up_to(from_conn);
        if from_stream < from_conn {
            self.conn_window.try_add_credit(from_conn - from_stream);
        }
        from_stream
    }

    async fn await_credit(&self, stream_window: &StreamWindow, cancel: &CancellationToken) {
        let conn_wait = self.conn_window.register_waiter();
        let stream_wait = stream_window.register_waiter();
        log::trace!("suspending DATA write for flow-control credit");
        tokio::select! {
            _ = cancel.cancelled() => {}
            signal = conn_wait => {
                if signal == Ok(WindowSignal::Aborted) {
                    self.aborted.store(true, Ordering::Release);
                }
            }
            signal = stream_wait => {
                if signal == Ok(WindowSignal::Aborted) {
                    log::warn!("credit wait woken by stream abort");
                }
            }
        }
    }

    // ---- §4.3 control frames --------------------------------------------

    pub async fn write_window_update(&self, stream_id: StreamId, increment: u32) -> FlushOutcome {
        if self.is_completed() {
            return FlushOutcome::TERMINAL;
        }
        {
            let mut state = self.state.lock().await;
            let mut sink = self.sink.lock().await;
            emit_frame(
                &mut state,
                &mut sink,
                FrameType::WindowUpdate,
                0,
                stream_id,
                &increment.to_be_bytes(),
            );
        }
        self.flush_internal(&CancellationToken::new(), None).await
    }

    pub async fn write_rst_stream(&self, stream_id: StreamId, error_code: ErrorCode) -> FlushOutcome {
        if self.is_completed() {
            return FlushOutcome::TERMINAL;
        }
        {
            let mut state = self.state.lock().await;
            let mut sink = self.sink.lock().await;
            let code = num_traits::ToPrimitive::to_u32(&error_code).expect("ErrorCode is repr(u32)");
            emit_frame(&mut state, &mut sink, FrameType::ResetStream, 0, stream_id, &code.to_be_bytes());
        }
        self.flush_internal(&CancellationToken::new(), None).await
    }

    pub async fn write_settings(&self, entries: &[(u16, u32)]) -> FlushOutcome {
        if self.is_completed() {
            return FlushOutcome::TERMINAL;
        }
        {
            let mut state = self.state.lock().await;
            let mut sink = self.sink.lock().await;
            let mut payload = Vec::with_capacity(entries.len() * 6);
            for (id, value) in entries {
                payload.extend_from_slice(&id.to_be_bytes());
                payload.extend_from_slice(&value.to_be_bytes());
            }
            emit_frame(&mut state, &mut sink, FrameType::Settings, 0, 0, &payload);
        }
        self.flush_internal(&CancellationToken::new(), None).await
    }

    pub async fn write_settings_ack(&self) -> FlushOutcome {
        if self.is_completed() {
            return FlushOutcome::TERMINAL;
        }
        {
            let mut state = self.state.lock().await;
            let mut sink = self.sink.lock().await;
            emit_frame(&mut state, &mut sink, FrameType::Settings, SettingsFlags::ACK.bits(), 0, &[]);
        }
        self.flush_internal(&CancellationToken::new(), None).await
    }

    pub async fn write_ping(&self, ack: bool, payload: [u8; 8]) -> FlushOutcome {
        if self.is_completed() {
            return FlushOutcome::TERMINAL;
        }
        {
            let mut state = self.state.lock().await;
            let mut sink = self.sink.lock().await;
            let flags = if ack { PingFlags::ACK.bits() } else { 0 };
            emit_frame(&mut state, &mut sink, FrameType::Ping, flags, 0, &payload);
        }
        self.flush_internal(&CancellationToken::new(), None).await
    }

    pub async fn write_go_away(&self, last_stream_id: StreamId, error_code: ErrorCode) -> FlushOutcome {
        if self.is_completed() {
            return FlushOutcome::TERMINAL;
        }
        {
            let mut state = self.state.lock().await;
            let mut sink = self.sink.lock().await;
            let mut payload = [0u8; 8];
            payload[..4].copy_from_slice(&(last_stream_id & 0x7fff_ffff).to_be_bytes());
            let code = num_traits::ToPrimitive::to_u32(&error_code).expect("ErrorCode is repr(u32)");
            payload[4..].copy_from_slice(&code.to_be_bytes());
            emit_frame(&mut state, &mut sink, FrameType::GoAway, 0, 0, &payload);
        }
        self.flush_internal(&CancellationToken::new(), None).await
    }

    // ---- negotiated-limit updates ---------------------------------------

    pub async fn update_max_header_table_size(&self, size: usize) {
        if self.is_completed() {
            return;
        }
        self.state.lock().await.hpack.update_max_table_size(size);
    }

    /// Reallocates the header-encoding buffer only when the size actually
    /// changes (§3's "reallocated exactly when MAX_FRAME_SIZE changes").
    pub async fn update_max_frame_size(&self, size: u32) {
        if self.is_completed() {
            return;
        }
        let mut state = self.state.lock().await;
        if state.max_frame_size != size {
            state.max_frame_size = size;
            state.header_buf = BytesMut::with_capacity(size as usize);
        }
    }

    // ---- flow control passthroughs --------------------------------------

    pub fn try_update_connection_window(&self, bytes: i64) -> bool {
        if self.is_completed() {
            return true;
        }
        self.conn_window.try_add_credit(bytes)
    }

    pub fn try_update_stream_window(&self, stream_window: &StreamWindow, bytes: i64) -> bool {
        if self.is_completed() {
            return true;
        }
        stream_window.try_add_credit(bytes)
    }

    pub fn abort_pending_stream_data_writes(&self, stream_window: &StreamWindow) {
        stream_window.abort();
    }

    // ---- flush / lifecycle ------------------------------------------------

    pub async fn flush(
        &self,
        cancel: &CancellationToken,
        output_aborter: Option<Box<dyn FnOnce() + Send>>,
    ) -> FlushOutcome {
        if self.is_completed() {
            return FlushOutcome::TERMINAL;
        }
        self.flush_internal(cancel, output_aborter).await
    }

    /// §9 "Flush timing": resets the unflushed counter under `state` (brief,
    /// synchronous), then releases `state` entirely before acquiring `sink`
    /// and awaiting the actual flush — so hpack encoding and frame assembly
    /// for other streams can proceed while this flush's I/O is in flight.
    async fn flush_internal(
        &self,
        cancel: &CancellationToken,
        output_aborter: Option<Box<dyn FnOnce() + Send>>,
    ) -> FlushOutcome {
        let bytes_since_last_flush = {
            let mut state = self.state.lock().await;
            std::mem::take(&mut state.unflushed)
        };
        let mut sink = self.sink.lock().await;
        let outcome = self
            .watchdog
            .timed_flush(bytes_since_last_flush, &mut *sink, cancel, output_aborter)
            .await;
        drop(sink);
        if outcome.aborted {
            self.aborted.store(true, Ordering::Release);
        }
        outcome
    }

    pub async fn complete(&self) {
        self.completed.store(true, Ordering::Release);
        self.sink.lock().await.abort();
    }

    pub async fn abort(&self, error: impl std::fmt::Display) {
        log::error!("aborting connection: {error}");
        self.aborted.store(true, Ordering::Release);
        self.completed.store(true, Ordering::Release);
        self.sink.lock().await.abort();
    }
}
