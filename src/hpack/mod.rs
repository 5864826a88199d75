//! §4.2 — the stateful HPACK header-block compressor.
//!
//! Two entry points mirror the distilled contract exactly: [`Encoder::begin`]
//! starts a new block (optionally emitting the `:status` pseudo-header
//! first) and [`Encoder::continue_block`] resumes one that didn't fit in a
//! single fragment. Both take a [`HeaderBlockCursor`] that tracks how far
//! through the field list the caller has gotten; the encoder itself only
//! owns the dynamic table.

mod table;

pub use table::{DynamicTable, Match};

use bytes::Bytes;
use table::static_status_index;

/// <https://httpwg.org/specs/rfc7541.html#rfc.section.6.1.1>, fixed bytes
/// for the interim 100-Continue block (§6): indexed-name literal without
/// indexing, `:status` (static index 8), value `"100"`. Never touches the
/// dynamic table.
pub const STATUS_100_CONTINUE_BLOCK: [u8; 5] = [0x08, 0x03, b'1', b'0', b'0'];

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HpackError {
    #[error("header field {name:?} does not fit in an empty fragment")]
    FieldTooLarge { name: String },
}

/// Tracks progress through a header field list across `begin`/`continue`
/// calls. Fields are consumed in caller-supplied order; nothing is
/// reordered (pseudo-headers-first is the caller's responsibility).
pub struct HeaderBlockCursor<'a> {
    fields: std::slice::Iter<'a, (String, String)>,
    peeked: Option<&'a (String, String)>,
}

impl<'a> HeaderBlockCursor<'a> {
    pub fn new(fields: &'a [(String, String)]) -> Self {
        Self {
            fields: fields.iter(),
            peeked: None,
        }
    }

    fn peek(&mut self) -> Option<&'a (String, String)> {
        if self.peeked.is_none() {
            self.peeked = self.fields.next();
        }
        self.peeked
    }

    fn advance(&mut self) {
        self.peeked = None;
    }

    /// True once every field has been emitted.
    pub fn is_done(&mut self) -> bool {
        self.peek().is_none()
    }
}

/// The stateful HPACK encoder (§3's "HPACK encoder state"): a dynamic
/// table, the peer-advertised max table size, and the compression toggle.
#[derive(Debug)]
pub struct Encoder {
    table: DynamicTable,
    compression_enabled: bool,
}

impl Encoder {
    pub fn new(header_table_size: usize) -> Self {
        Self {
            table: DynamicTable::new(header_table_size),
            compression_enabled: true,
        }
    }

    pub fn set_compression_enabled(&mut self, enabled: bool) {
        self.compression_enabled = enabled;
    }

    pub fn update_max_table_size(&mut self, size: usize) {
        self.table.set_max_size(size);
    }

    /// Starts a new header block. If `status` is one of the seven
    /// statically-indexed `:status` values, it's emitted as a single
    /// indexed byte; otherwise as a literal with an indexed `:status` name
    /// (never touching the dynamic table — status varies every response).
    pub fn begin(
        &mut self,
        status: Option<u16>,
        fields: &mut HeaderBlockCursor<'_>,
        out: &mut [u8],
    ) -> Result<(usize, bool), HpackError> {
        let mut written = 0;
        if let Some(status) = status {
            written += self.encode_status(status, &mut out[..])?;
        }
        written += self.fill(fields, &mut out[written..])?;
        Ok((written, fields.is_done()))
    }

    /// Emits the next slice of an in-progress block.
    pub fn continue_block(
        &mut self,
        fields: &mut HeaderBlockCursor<'_>,
        out: &mut [u8],
    ) -> Result<(usize, bool), HpackError> {
        let written = self.fill(fields, out)?;
        Ok((written, fields.is_done()))
    }

    fn encode_status(&self, status: u16, out: &mut [u8]) -> Result<usize, HpackError> {
        let mut scratch = Vec::with_capacity(8);
        if let Some(index) = static_status_index(status) {
            encode_integer(&mut scratch, 7, 0x80, index);
        } else {
            let value = status.to_string();
            // Literal without indexing, indexed name (`:status` is static index 8).
            encode_integer(&mut scratch, 4, 0x00, 8);
            encode_string(&mut scratch, value.as_bytes());
        }
        if scratch.len() > out.len() {
            return Err(HpackError::FieldTooLarge {
                name: ":status".to_owned(),
            });
        }
        out[..scratch.len()].copy_from_slice(&scratch);
        Ok(scratch.len())
    }

    /// Drains as many fields as fit from `fields` into `out`, applying the
    /// deterministic field-encoding policy (SPEC_FULL §4.2):
    /// 1. exact static/dynamic match -> indexed
    /// 2. name-only match -> literal with incremental indexing, indexed name
    /// 3. no match -> literal with incremental indexing, new name (and insert)
    fn fill(
        &mut self,
        fields: &mut HeaderBlockCursor<'_>,
        mut out: &mut [u8],
    ) -> Result<usize, HpackError> {
        let mut written = 0;
        while let Some((name, value)) = fields.peek() {
            let name_lower = name.to_ascii_lowercase();
            let (bytes, insert) = self.build_field(name_lower.as_bytes(), value.as_bytes());
            if bytes.len() > out.len() {
                if written == 0 {
                    return Err(HpackError::FieldTooLarge { name: name.clone() });
                }
                break;
            }
            out[..bytes.len()].copy_from_slice(&bytes);
            out = &mut out[bytes.len()..];
            written += bytes.len();
            if let Some((name, value)) = insert {
                self.table.insert(name, value);
            }
            fields.advance();
        }
        Ok(written)
    }

    /// Builds the wire bytes for one field and, if the field should be
    /// inserted into the dynamic table, the entry to insert.
    fn build_field(&self, name: &[u8], value: &[u8]) -> (Vec<u8>, Option<(Bytes, Bytes)>) {
        let mut out = Vec::with_capacity(name.len() + value.len() + 4);

        if !self.compression_enabled {
            // Literal without indexing, new name — global toggle off.
            out.push(0x00);
            encode_string(&mut out, name);
            encode_string(&mut out, value);
            return (out, None);
        }

        match self.table.find(name, value) {
            Match::NameAndValue(index) => {
                encode_integer(&mut out, 7, 0x80, index);
                (out, None)
            }
            Match::NameOnly(index) => {
                encode_integer(&mut out, 6, 0x40, index);
                encode_string(&mut out, value);
                (
                    out,
                    Some((Bytes::copy_from_slice(name), Bytes::copy_from_slice(value))),
                )
            }
            Match::None => {
                out.push(0x40);
                encode_string(&mut out, name);
                encode_string(&mut out, value);
                (
                    out,
                    Some((Bytes::copy_from_slice(name), Bytes::copy_from_slice(value))),
                )
            }
        }
    }
}

/// RFC 7541 §5.1 integer representation with an N-bit prefix.
fn encode_integer(out: &mut Vec<u8>, prefix_bits: u8, pattern: u8, value: usize) {
    let max_prefix = (1usize << prefix_bits) - 1;
    if value < max_prefix {
        out.push(pattern | value as u8);
        return;
    }
    out.push(pattern | max_prefix as u8);
    let mut remaining = value - max_prefix;
    while remaining >= 128 {
        out.push(((remaining % 128) + 128) as u8);
        remaining /= 128;
    }
    out.push(remaining as u8);
}

/// RFC 7541 §5.2 string representation. Huffman coding is never used (see
/// DESIGN.md); the H bit is always 0.
fn encode_string(out: &mut Vec<u8>, bytes: &[u8]) {
    encode_integer(out, 7, 0x00, bytes.len());
    out.extend_from_slice(bytes);
}

#[cfg(test)]
mod tests {
    use super::*;
    use ::hpack as their_hpack;

    #[test]
    fn encode_integer_matches_rfc_example() {
        // https://httpwg.org/specs/rfc7541.html#integer.representation.example1
        let mut out = Vec::new();
        encode_integer(&mut out, 5, 0x00, 10);
        assert_eq!(out, vec![0b0000_1010]);
    }

    #[test]
    fn encode_integer_multi_byte_matches_rfc_example() {
        // https://httpwg.org/specs/rfc7541.html#integer.representation.example3
        let mut out = Vec::new();
        encode_integer(&mut out, 5, 0x00, 1337);
        assert_eq!(out, vec![0b0001_1111, 0b1001_1010, 0b0000_1010]);
    }

    #[test]
    fn begin_emits_indexed_status_for_200() {
        let mut encoder = Encoder::new(4096);
        let fields = vec![("content-length".to_owned(), "0".to_owned())];
        let mut cursor = HeaderBlockCursor::new(&fields);
        let mut out = [0u8; 256];
        let (len, done) = encoder.begin(Some(200), &mut cursor, &mut out).unwrap();
        assert!(done);
        assert_eq!(out[0], 0x80 | 8);
        let mut decoder = their_hpack::Decoder::new();
        let decoded = decoder.decode(&out[..len]).unwrap();
        assert_eq!(
            decoded,
            vec![
                (b":status".to_vec(), b"200".to_vec()),
                (b"content-length".to_vec(), b"0".to_vec()),
            ]
        );
    }

    #[test]
    fn begin_emits_literal_status_for_non_indexed_code() {
        let mut encoder = Encoder::new(4096);
        let fields: Vec<(String, String)> = vec![];
        let mut cursor = HeaderBlockCursor::new(&fields);
        let mut out = [0u8; 16];
        let (len, done) = encoder.begin(Some(100), &mut cursor, &mut out).unwrap();
        assert!(done);
        assert_eq!(&out[..len], &STATUS_100_CONTINUE_BLOCK);
    }

    #[test]
    fn repeated_field_uses_dynamic_table_after_first_use() {
        let mut encoder = Encoder::new(4096);
        let fields = vec![("x-request-id".to_owned(), "abc".to_owned())];
        let mut cursor = HeaderBlockCursor::new(&fields);
        let mut first = [0u8; 64];
        encoder.begin(None, &mut cursor, &mut first).unwrap();

        let mut cursor2 = HeaderBlockCursor::new(&fields);
        let mut second = [0u8; 64];
        let (len, _) = encoder.begin(None, &mut cursor2, &mut second).unwrap();
        assert_eq!(second[0], 0x80 | (table::STATIC_TABLE.len() + 1) as u8);
        assert_eq!(len, 1);
    }

    #[test]
    fn disabling_compression_forces_literal_without_indexing() {
        let mut encoder = Encoder::new(4096);
        encoder.set_compression_enabled(false);
        let fields = vec![(":method".to_owned(), "GET".to_owned())];
        let mut cursor = HeaderBlockCursor::new(&fields);
        let mut out = [0u8; 64];
        let (len, _) = encoder.begin(None, &mut cursor, &mut out).unwrap();
        assert_eq!(out[0], 0x00);
        let mut decoder = their_hpack::Decoder::new();
        assert_eq!(
            decoder.decode(&out[..len]).unwrap(),
            vec![(b":method".to_vec(), b"GET".to_vec())]
        );
    }

    #[test]
    fn oversized_field_in_empty_fragment_is_fatal() {
        let mut encoder = Encoder::new(4096);
        let fields = vec![("x".repeat(100), "y".to_owned())];
        let mut cursor = HeaderBlockCursor::new(&fields);
        let mut out = [0u8; 4];
        let err = encoder.begin(None, &mut cursor, &mut out).unwrap_err();
        assert_eq!(
            err,
            HpackError::FieldTooLarge {
                name: "x".repeat(100)
            }
        );
    }

    #[test]
    fn splits_across_begin_and_continue_when_fragment_is_small() {
        let mut encoder = Encoder::new(4096);
        let fields = vec![
            ("a".repeat(20), "1".to_owned()),
            ("b".repeat(20), "2".to_owned()),
        ];
        let mut cursor = HeaderBlockCursor::new(&fields);
        let mut first = [0u8; 30];
        let (len1, done1) = encoder.begin(None, &mut cursor, &mut first).unwrap();
        assert!(!done1);
        let mut second = [0u8; 30];
        let (len2, done2) = encoder.continue_block(&mut cursor, &mut second).unwrap();
        assert!(done2);

        let mut decoder = their_hpack::Decoder::new();
        let mut combined = Vec::new();
        combined.extend_from_slice(&first[..len1]);
        combined.extend_from_slice(&second[..len2]);
        let decoded = decoder.decode(&combined).unwrap();
        assert_eq!(
            decoded,
            vec![
                ("a".repeat(20).into_bytes(), b"1".to_vec()),
                ("b".repeat(20).into_bytes(), b"2".to_vec()),
            ]
        );
    }
}
