//! Wire-level constants and small value types shared by every module.

use num_derive::{FromPrimitive, ToPrimitive};

/// A 31-bit HTTP/2 stream identifier. `0` denotes a connection-scoped frame.
pub type StreamId = u32;

/// Header fields in caller-supplied order. The compressor never reorders
/// these; putting pseudo-headers first (§4.2(i) of the wire spec) is the
/// caller's job.
pub type Headers = Vec<(String, String)>;

/// <https://httpwg.org/specs/rfc7540.html#FrameTypes>
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive)]
#[repr(u8)]
pub enum FrameType {
    Data = 0x0,
    Headers = 0x1,
    ResetStream = 0x3,
    Settings = 0x4,
    Ping = 0x6,
    GoAway = 0x7,
    WindowUpdate = 0x8,
    Continuation = 0x9,
}

/// <https://httpwg.org/specs/rfc7540.html#ErrorCodes>
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive)]
#[repr(u32)]
#[non_exhaustive]
pub enum ErrorCode {
    NoError = 0x0,
    ProtocolError = 0x1,
    InternalError = 0x2,
    FlowControlError = 0x3,
    SettingsTimeout = 0x4,
    StreamClosed = 0x5,
    FrameSizeError = 0x6,
    RefusedStream = 0x7,
    Cancel = 0x8,
    CompressionError = 0x9,
    ConnectError = 0xa,
    EnhanceYourCalm = 0xb,
    InadequateSecurity = 0xc,
    Http11Required = 0xd,
}

/// <https://httpwg.org/specs/rfc7540.html#SettingValues>
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive)]
#[repr(u16)]
#[non_exhaustive]
pub enum SettingsParameter {
    HeaderTableSize = 0x1,
    EnablePush = 0x2,
    MaxConcurrentStreams = 0x3,
    InitialWindowSize = 0x4,
    MaxFrameSize = 0x5,
    MaxHeaderListSize = 0x6,
}

/// Smallest legal MAX_FRAME_SIZE a peer may advertise (RFC 7540 §4.2).
pub const MIN_MAX_FRAME_SIZE: u32 = 16_384;
/// Largest legal MAX_FRAME_SIZE a peer may advertise.
pub const MAX_MAX_FRAME_SIZE: u32 = 16_777_215;
/// Default MAX_FRAME_SIZE before any SETTINGS exchange.
pub const DEFAULT_MAX_FRAME_SIZE: u32 = MIN_MAX_FRAME_SIZE;
/// Default HPACK dynamic table size before any SETTINGS exchange.
pub const DEFAULT_HEADER_TABLE_SIZE: usize = 4096;
/// Default per-stream / connection initial flow-control window.
pub const DEFAULT_INITIAL_WINDOW_SIZE: i64 = 65_535;
/// Largest value a flow-control window may ever hold (2^31 - 1).
pub const MAX_WINDOW_SIZE: i64 = (1 << 31) - 1;

pub const FLAG_END_STREAM: u8 = 0x1;
pub const FLAG_END_HEADERS: u8 = 0x4;
pub const FLAG_ACK: u8 = 0x1;
