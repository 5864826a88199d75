//! The HPACK static table (RFC 7541 Appendix B) and the dynamic table with
//! FIFO eviction (RFC 7541 §2.3.2).

use bytes::Bytes;
use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub struct TableEntry {
    pub name: Bytes,
    pub value: Bytes,
}

impl TableEntry {
    fn new(name: &'static [u8], value: &'static [u8]) -> Self {
        Self {
            name: Bytes::from_static(name),
            value: Bytes::from_static(value),
        }
    }

    /// RFC 7541 §4.1: an entry's size is name+value octets plus 32 bytes
    /// of accounting overhead.
    pub fn size(&self) -> usize {
        self.name.len() + self.value.len() + 32
    }
}

macro_rules! static_table {
    ( $( $name:expr => $value:expr ),+ $(,)? ) => {
        [ $( TableEntry::new($name, $value) ),+ ]
    };
}

/// <https://httpwg.org/specs/rfc7541.html#static.table.definition>
pub static STATIC_TABLE: [TableEntry; 61] = static_table![
    b":authority" => b"",
    b":method" => b"GET",
    b":method" => b"POST",
    b":path" => b"/",
    b":path" => b"/index.html",
    b":scheme" => b"http",
    b":scheme" => b"https",
    b":status" => b"200",
    b":status" => b"204",
    b":status" => b"206",
    b":status" => b"304",
    b":status" => b"400",
    b":status" => b"404",
    b":status" => b"500",
    b"accept-charset" => b"",
    b"accept-encoding" => b"gzip, deflate",
    b"accept-language" => b"",
    b"accept-ranges" => b"",
    b"accept" => b"",
    b"access-control-allow-origin" => b"",
    b"age" => b"",
    b"allow" => b"",
    b"authorization" => b"",
    b"cache-control" => b"",
    b"content-disposition" => b"",
    b"content-encoding" => b"",
    b"content-language" => b"",
    b"content-length" => b"",
    b"content-location" => b"",
    b"content-range" => b"",
    b"content-type" => b"",
    b"cookie" => b"",
    b"date" => b"",
    b"etag" => b"",
    b"expect" => b"",
    b"expires" => b"",
    b"from" => b"",
    b"host" => b"",
    b"if-match" => b"",
    b"if-modified-since" => b"",
    b"if-none-match" => b"",
    b"if-range" => b"",
    b"if-unmodified-since" => b"",
    b"last-modified" => b"",
    b"link" => b"",
    b"location" => b"",
    b"max-forwards" => b"",
    b"proxy-authenticate" => b"",
    b"proxy-authorization" => b"",
    b"range" => b"",
    b"referer" => b"",
    b"refresh" => b"",
    b"retry-after" => b"",
    b"server" => b"",
    b"set-cookie" => b"",
    b"strict-transport-security" => b"",
    b"transfer-encoding" => b"",
    b"user-agent" => b"",
    b"vary" => b"",
    b"via" => b"",
    b"www-authenticate" => b"",
];

/// Static-table index of a given `:status` value, when that status is one
/// of the seven the static table indexes exactly (§4.2 of the wire spec).
pub fn static_status_index(status: u16) -> Option<usize> {
    match status {
        200 => Some(8),
        204 => Some(9),
        206 => Some(10),
        304 => Some(11),
        400 => Some(12),
        404 => Some(13),
        500 => Some(14),
        _ => None,
    }
}

/// Outcome of a table lookup, used to choose the cheapest representation
/// for a header field (§4.2's deterministic field-encoding policy).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Match {
    /// Index refers to a name+value pair already in a table.
    NameAndValue(usize),
    /// Index refers only to the name; the value still needs to be literal.
    NameOnly(usize),
    None,
}

/// The mutable per-connection dynamic table (§3's "HPACK encoder state").
#[derive(Debug, Clone)]
pub struct DynamicTable {
    max_size: usize,
    current_size: usize,
    entries: VecDeque<TableEntry>,
}

impl DynamicTable {
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            current_size: 0,
            entries: VecDeque::new(),
        }
    }

    /// Index (1-based, static table first) of the most recently inserted
    /// dynamic entry, i.e. `STATIC_TABLE.len() + 1`.
    fn first_dynamic_index(&self) -> usize {
        STATIC_TABLE.len() + 1
    }

    pub fn entry(&self, index: usize) -> Option<&TableEntry> {
        if index == 0 {
            return None;
        }
        if index <= STATIC_TABLE.len() {
            return STATIC_TABLE.get(index - 1);
        }
        self.entries.get(index - self.first_dynamic_index())
    }

    /// Looks for an exact name+value match first, falling back to a
    /// name-only match, searching the static table before the dynamic one
    /// on a tie (§4.2's deterministic policy, steps 1-3).
    pub fn find(&self, name: &[u8], value: &[u8]) -> Match {
        if let Some(idx) = Self::find_in(STATIC_TABLE.iter(), 1, name, value) {
            return idx;
        }
        if let Some(idx) =
            Self::find_in(self.entries.iter(), self.first_dynamic_index(), name, value)
        {
            return idx;
        }
        Match::None
    }

    fn find_in<'a>(
        iter: impl Iterator<Item = &'a TableEntry>,
        base_index: usize,
        name: &[u8],
        value: &[u8],
    ) -> Option<Match> {
        let mut name_only: Option<usize> = None;
        for (offset, entry) in iter.enumerate() {
            if entry.name.as_ref() == name {
                if entry.value.as_ref() == value {
                    return Some(Match::NameAndValue(base_index + offset));
                }
                name_only.get_or_insert(base_index + offset);
            }
        }
        name_only.map(Match::NameOnly)
    }

    /// Inserts a new entry, evicting from the back until the table fits
    /// (RFC 7541 §4.4). An entry larger than the table's capacity is not
    /// stored at all; that empties the table, per the RFC.
    pub fn insert(&mut self, name: Bytes, value: Bytes) {
        let entry = TableEntry { name, value };
        self.current_size += entry.size();
        self.entries.push_front(entry);
        self.evict_to_fit();
    }

    pub fn set_max_size(&mut self, max_size: usize) {
        self.max_size = max_size;
        self.evict_to_fit();
    }

    fn evict_to_fit(&mut self) {
        while self.current_size > self.max_size {
            match self.entries.pop_back() {
                Some(popped) => self.current_size -= popped.size(),
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_table_has_61_entries() {
        assert_eq!(STATIC_TABLE.len(), 61);
        assert_eq!(STATIC_TABLE[0].name.as_ref(), b":authority");
        assert_eq!(STATIC_TABLE[60].name.as_ref(), b"www-authenticate");
    }

    #[test]
    fn finds_exact_status_match() {
        let table = DynamicTable::new(4096);
        assert_eq!(table.find(b":status", b"200"), Match::NameAndValue(8));
    }

    #[test]
    fn dynamic_insertion_evicts_oldest_first() {
        let mut table = DynamicTable::new(64);
        table.insert(Bytes::from_static(b"a"), Bytes::from_static(b"1")); // size 34
        table.insert(Bytes::from_static(b"b"), Bytes::from_static(b"2")); // size 34, evicts "a"
        assert_eq!(table.find(b"a", b"1"), Match::None);
        assert_eq!(
            table.find(b"b", b"2"),
            Match::NameAndValue(STATIC_TABLE.len() + 1)
        );
    }

    #[test]
    fn oversized_entry_empties_table() {
        let mut table = DynamicTable::new(32);
        table.insert(Bytes::from_static(b"name"), Bytes::from_static(b"value"));
        assert_eq!(table.current_size, 0);
        assert!(table.entries.is_empty());
    }
}
