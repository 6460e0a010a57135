//! HPACK static and dynamic tables (RFC 7541 §2.3, Appendix A)
//!
//! The static table is the fixed 61-entry list. The dynamic table is a
//! FIFO sized in octets (name + value + 32 per entry): insertion at the
//! head, eviction from the tail, and evictions always run before a new
//! entry is counted in.

use std::collections::VecDeque;

/// The 61 static entries, index 1 through 61.
pub const STATIC_TABLE: [(&str, &str); 61] = [
    (":authority", ""),
    (":method", "GET"),
    (":method", "POST"),
    (":path", "/"),
    (":path", "/index.html"),
    (":scheme", "http"),
    (":scheme", "https"),
    (":status", "200"),
    (":status", "204"),
    (":status", "206"),
    (":status", "304"),
    (":status", "400"),
    (":status", "404"),
    (":status", "500"),
    ("accept-charset", ""),
    ("accept-encoding", "gzip, deflate"),
    ("accept-language", ""),
    ("accept-ranges", ""),
    ("accept", ""),
    ("access-control-allow-origin", ""),
    ("age", ""),
    ("allow", ""),
    ("authorization", ""),
    ("cache-control", ""),
    ("content-disposition", ""),
    ("content-encoding", ""),
    ("content-language", ""),
    ("content-length", ""),
    ("content-location", ""),
    ("content-range", ""),
    ("content-type", ""),
    ("cookie", ""),
    ("date", ""),
    ("etag", ""),
    ("expect", ""),
    ("expires", ""),
    ("from", ""),
    ("host", ""),
    ("if-match", ""),
    ("if-modified-since", ""),
    ("if-none-match", ""),
    ("if-range", ""),
    ("if-unmodified-since", ""),
    ("last-modified", ""),
    ("link", ""),
    ("location", ""),
    ("max-forwards", ""),
    ("proxy-authenticate", ""),
    ("proxy-authorization", ""),
    ("range", ""),
    ("referer", ""),
    ("refresh", ""),
    ("retry-after", ""),
    ("server", ""),
    ("set-cookie", ""),
    ("strict-transport-security", ""),
    ("transfer-encoding", ""),
    ("user-agent", ""),
    ("vary", ""),
    ("via", ""),
    ("www-authenticate", ""),
];

/// Octet cost of one entry.
#[must_use]
pub fn entry_size(name: &str, value: &str) -> usize {
    name.len() + value.len() + 32
}

/// Exact (name, value) match in the static table, 1-based index.
#[must_use]
pub fn static_find_exact(name: &str, value: &str) -> Option<usize> {
    STATIC_TABLE
        .iter()
        .position(|(n, v)| *n == name && *v == value)
        .map(|i| i + 1)
}

/// First name match in the static table, 1-based index.
#[must_use]
pub fn static_find_name(name: &str) -> Option<usize> {
    STATIC_TABLE.iter().position(|(n, _)| *n == name).map(|i| i + 1)
}

/// FIFO of recently seen header fields, newest first.
#[derive(Debug)]
pub struct DynamicTable {
    entries: VecDeque<(String, String)>,
    size: usize,
    capacity: usize,
}

impl DynamicTable {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self { entries: VecDeque::new(), size: 0, capacity }
    }

    /// Inserts at the head, evicting from the tail first so the new entry
    /// is never counted against entries it displaced. An entry larger
    /// than the whole capacity empties the table and is not stored.
    pub fn insert(&mut self, name: String, value: String) {
        let needed = entry_size(&name, &value);
        while self.size + needed > self.capacity {
            match self.entries.pop_back() {
                Some((n, v)) => self.size -= entry_size(&n, &v),
                None => break,
            }
        }
        if needed > self.capacity {
            return;
        }
        self.size += needed;
        self.entries.push_front((name, value));
    }

    /// Entry by 0-based dynamic index (0 is the newest).
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&(String, String)> {
        self.entries.get(index)
    }

    #[must_use]
    pub fn find_exact(&self, name: &str, value: &str) -> Option<usize> {
        self.entries.iter().position(|(n, v)| n == name && v == value)
    }

    #[must_use]
    pub fn find_name(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|(n, _)| n == name)
    }

    /// Applies a table-size update, evicting down to the new bound.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
        while self.size > self.capacity {
            match self.entries.pop_back() {
                Some((n, v)) => self.size -= entry_size(&n, &v),
                None => break,
            }
        }
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_table_shape() {
        assert_eq!(STATIC_TABLE.len(), 61);
        assert_eq!(static_find_exact(":method", "GET"), Some(2));
        assert_eq!(static_find_exact(":status", "404"), Some(13));
        assert_eq!(static_find_name(":authority"), Some(1));
        assert_eq!(static_find_name("www-authenticate"), Some(61));
        assert_eq!(static_find_exact("x-custom", "y"), None);
    }

    #[test]
    fn size_accounting_matches_definition() {
        let mut table = DynamicTable::new(4096);
        table.insert("custom-key".into(), "custom-header".into());
        assert_eq!(table.size(), 10 + 13 + 32);
        assert_eq!(table.get(0).unwrap().0, "custom-key");
    }

    #[test]
    fn eviction_runs_before_insertion_counts() {
        // Capacity fits exactly one 42-octet entry.
        let mut table = DynamicTable::new(84);
        table.insert("aaaaa".into(), "11111".into()); // 42
        table.insert("bbbbb".into(), "22222".into()); // 42
        assert_eq!(table.len(), 2);
        table.insert("ccccc".into(), "33333".into());
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(0).unwrap().0, "ccccc");
        assert_eq!(table.get(1).unwrap().0, "bbbbb");
        assert!(table.size() <= table.capacity());
    }

    #[test]
    fn oversized_entry_clears_table() {
        let mut table = DynamicTable::new(64);
        table.insert("a".into(), "b".into());
        assert_eq!(table.len(), 1);
        table.insert("x".repeat(64), "y".repeat(64));
        assert!(table.is_empty());
        assert_eq!(table.size(), 0);
    }

    #[test]
    fn capacity_update_evicts() {
        let mut table = DynamicTable::new(4096);
        for i in 0..10 {
            table.insert(format!("name-{i}"), format!("value-{i}"));
        }
        let before = table.len();
        table.set_capacity(100);
        assert!(table.len() < before);
        assert!(table.size() <= 100);
    }
}
