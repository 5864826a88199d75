//! Per-frame-type flag bits. Only the flags this engine actually emits are
//! modeled; PADDED/PRIORITY/PUSH_PROMISE bits from RFC 7540 are
//! intentionally absent (padding, stream dependencies and push are out of
//! scope).

use bitflags::bitflags;

bitflags! {
    /// <https://httpwg.org/specs/rfc7540.html#DATA>
    #[repr(transparent)]
    pub struct DataFlags: u8 {
        /// This frame is the last the engine will send for the stream.
        const END_STREAM = 0x1;
    }
}

bitflags! {
    /// <https://httpwg.org/specs/rfc7540.html#HEADERS>
    #[repr(transparent)]
    pub struct HeadersFlags: u8 {
        const END_STREAM = 0x1;
        /// This frame contains an entire header block; no CONTINUATION follows.
        const END_HEADERS = 0x4;
    }
}

bitflags! {
    /// <https://httpwg.org/specs/rfc7540.html#SETTINGS>
    #[repr(transparent)]
    pub struct SettingsFlags: u8 {
        const ACK = 0x1;
    }
}

bitflags! {
    /// <https://httpwg.org/specs/rfc7540.html#PING>
    #[repr(transparent)]
    pub struct PingFlags: u8 {
        const ACK = 0x1;
    }
}

bitflags! {
    /// <https://httpwg.org/specs/rfc7540.html#CONTINUATION>
    #[repr(transparent)]
    pub struct ContinuationFlags: u8 {
        const END_HEADERS = 0x4;
    }
}
