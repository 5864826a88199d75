//! HTTP/2 egress framing engine.
//!
//! This crate is the outbound half of an HTTP/2 server connection: it
//! serializes response headers, trailers, body data, flow-control updates,
//! control frames (SETTINGS, PING, GOAWAY, RST_STREAM, WINDOW_UPDATE), and a
//! 100-Continue interim response onto a single multiplexed byte sink, while
//! obeying HTTP/2 flow control, fragmenting by the negotiated maximum frame
//! size, and enforcing a minimum-data-rate timing contract.
//!
//! The ingress parser, the connection state machine, request-level HTTP
//! semantics, TLS/transport, and the byte sink itself are all external
//! collaborators — this crate only consumes their interfaces
//! ([`ByteSink`]) and is driven by the events they hand it (the
//! `update_*`/`try_update_*`/`abort_pending_stream_data_writes` methods on
//! [`Engine`]).

#![warn(future_incompatible, nonstandard_style, rust_2018_idioms, unused)]
#![warn(clippy::pedantic)]
#![allow(
    clippy::doc_markdown,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::wildcard_imports,
    clippy::similar_names,
    clippy::cast_possible_truncation,
    clippy::too_many_lines
)]

mod config;
mod coordinator;
mod error;
mod flags;
mod flow_control;
mod frame_header;
mod hpack;
mod sink;
mod types;
mod watchdog;

pub use config::{EngineConfig, MinDataRate};
pub use coordinator::Engine;
pub use error::EngineError;
pub use flow_control::{ConnWindow, StreamWindow, WindowSignal};
pub use frame_header::{FrameHeader, FrameHeaderParseError};
pub use hpack::HpackError;
pub use sink::{ByteSink, FlushOutcome, InMemorySink};
pub use types::{
    ErrorCode, FrameType, Headers, SettingsParameter, StreamId, DEFAULT_HEADER_TABLE_SIZE,
    DEFAULT_INITIAL_WINDOW_SIZE, DEFAULT_MAX_FRAME_SIZE, MAX_MAX_FRAME_SIZE, MAX_WINDOW_SIZE,
    MIN_MAX_FRAME_SIZE,
};
