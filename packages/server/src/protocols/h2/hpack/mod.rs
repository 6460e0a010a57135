//! HPACK header compression (RFC 7541)
//!
//! One encoder and one decoder per HTTP/2 connection, never shared across
//! connections. Strings go on the wire as length-prefixed literals; the
//! decoder tolerates a peer's huffman flag by reading the octets as-is.
//! The decoder tracks cumulative declared string length per header block
//! and aborts past 8 KiB, which bounds decompression work no matter what
//! the peer declares.

pub mod coding;
pub mod table;

use crate::error::{Result, ServerError};

use coding::{decode_int, decode_string, encode_int, encode_string};
use table::{DynamicTable, STATIC_TABLE, static_find_exact, static_find_name};

/// Cumulative declared string length allowed per decode call.
pub const MAX_DECODE_BYTES: usize = 8 * 1024;

/// Connection-scoped encoder.
#[derive(Debug)]
pub struct Encoder {
    table: DynamicTable,
    /// A capacity change the peer has not heard about yet; signalled as a
    /// table-size update at the start of the next header block.
    pending_size_update: Option<usize>,
}

impl Encoder {
    #[must_use]
    pub fn new(table_capacity: usize) -> Self {
        Self { table: DynamicTable::new(table_capacity), pending_size_update: None }
    }

    /// Applies the peer's SETTINGS_HEADER_TABLE_SIZE. Shrinks take effect
    /// immediately and are signalled in the next block.
    pub fn set_capacity(&mut self, capacity: usize) {
        if capacity == self.table.capacity() {
            return;
        }
        self.table.set_capacity(capacity);
        self.pending_size_update = Some(capacity);
    }

    /// Encodes a header list. Names must already be lowercase; pseudo
    /// headers sort before regular ones at the call site.
    #[must_use]
    pub fn encode(&mut self, headers: &[(String, String)]) -> Vec<u8> {
        let mut out = Vec::with_capacity(headers.len() * 32);
        if let Some(capacity) = self.pending_size_update.take() {
            encode_int(&mut out, capacity as u64, 5, 0x20);
        }
        for (name, value) in headers {
            self.encode_field(&mut out, name, value);
        }
        out
    }

    fn encode_field(&mut self, out: &mut Vec<u8>, name: &str, value: &str) {
        if let Some(index) = static_find_exact(name, value) {
            encode_int(out, index as u64, 7, 0x80);
            return;
        }
        if let Some(pos) = self.table.find_exact(name, value) {
            encode_int(out, (STATIC_TABLE.len() + 1 + pos) as u64, 7, 0x80);
            return;
        }

        let name_index = static_find_name(name)
            .or_else(|| self.table.find_name(name).map(|pos| STATIC_TABLE.len() + 1 + pos));
        match name_index {
            Some(index) => {
                // Literal with incremental indexing, indexed name.
                encode_int(out, index as u64, 6, 0x40);
                encode_string(out, value);
            }
            None => {
                // Literal with incremental indexing, new name.
                out.push(0x40);
                encode_string(out, name);
                encode_string(out, value);
            }
        }
        self.table.insert(name.to_string(), value.to_string());
    }

    #[must_use]
    pub fn table_size(&self) -> usize {
        self.table.size()
    }
}

/// Connection-scoped decoder.
#[derive(Debug)]
pub struct Decoder {
    table: DynamicTable,
    /// Upper bound a peer table-size update may choose.
    max_capacity: usize,
}

impl Decoder {
    #[must_use]
    pub fn new(table_capacity: usize) -> Self {
        Self { table: DynamicTable::new(table_capacity), max_capacity: table_capacity }
    }

    /// Decodes one complete header block.
    pub fn decode(&mut self, block: &[u8]) -> Result<Vec<(String, String)>> {
        let mut headers = Vec::new();
        let mut declared_bytes = 0usize;
        let mut pos = 0;

        while pos < block.len() {
            let first = block[pos];
            if first & 0x80 != 0 {
                // Indexed header field.
                let (index, next) = decode_int(block, pos, 7)?;
                pos = next;
                let (name, value) = self.lookup(index)?;
                headers.push((name, value));
            } else if first & 0x40 != 0 {
                // Literal with incremental indexing.
                let (name_index, next) = decode_int(block, pos, 6)?;
                pos = next;
                let name = if name_index == 0 {
                    let (name, next, declared) = decode_string(block, pos)?;
                    pos = next;
                    declared_bytes =
                        self.account(declared_bytes, declared)?;
                    name
                } else {
                    self.lookup(name_index)?.0
                };
                let (value, next, declared) = decode_string(block, pos)?;
                pos = next;
                declared_bytes = self.account(declared_bytes, declared)?;
                self.table.insert(name.clone(), value.clone());
                headers.push((name, value));
            } else if first & 0x20 != 0 {
                // Dynamic table size update.
                let (size, next) = decode_int(block, pos, 5)?;
                pos = next;
                if size as usize > self.max_capacity {
                    return Err(ServerError::Hpack(format!(
                        "table size update {size} above the negotiated maximum"
                    )));
                }
                self.table.set_capacity(size as usize);
            } else {
                // Literal without indexing or never indexed; no insert.
                let (name_index, next) = decode_int(block, pos, 4)?;
                pos = next;
                let name = if name_index == 0 {
                    let (name, next, declared) = decode_string(block, pos)?;
                    pos = next;
                    declared_bytes = self.account(declared_bytes, declared)?;
                    name
                } else {
                    self.lookup(name_index)?.0
                };
                let (value, next, declared) = decode_string(block, pos)?;
                pos = next;
                declared_bytes = self.account(declared_bytes, declared)?;
                headers.push((name, value));
            }
        }
        Ok(headers)
    }

    fn lookup(&self, index: u64) -> Result<(String, String)> {
        if index == 0 {
            return Err(ServerError::Hpack("index zero".into()));
        }
        let index = index as usize;
        if index <= STATIC_TABLE.len() {
            let (name, value) = STATIC_TABLE[index - 1];
            return Ok((name.to_string(), value.to_string()));
        }
        self.table
            .get(index - STATIC_TABLE.len() - 1)
            .cloned()
            .ok_or_else(|| ServerError::Hpack(format!("index {index} out of range")))
    }

    fn account(&self, so_far: usize, declared: usize) -> Result<usize> {
        let total = so_far + declared;
        if total > MAX_DECODE_BYTES {
            return Err(ServerError::Hpack(format!(
                "header block declares {total} string bytes"
            )));
        }
        Ok(total)
    }

    #[must_use]
    pub fn table_size(&self) -> usize {
        self.table.size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(headers: &[(&str, &str)]) -> Vec<(String, String)> {
        let owned: Vec<(String, String)> =
            headers.iter().map(|(n, v)| (n.to_string(), v.to_string())).collect();
        let mut encoder = Encoder::new(4096);
        let mut decoder = Decoder::new(4096);
        decoder.decode(&encoder.encode(&owned)).unwrap()
    }

    #[test]
    fn static_indexed_field_is_one_byte() {
        let mut encoder = Encoder::new(4096);
        let wire = encoder.encode(&[(":method".to_string(), "GET".to_string())]);
        assert_eq!(wire, vec![0x82]);
    }

    #[test]
    fn rfc_literal_with_indexing_example() {
        // RFC 7541 C.2.1: custom-key: custom-header.
        let mut decoder = Decoder::new(4096);
        let mut wire = vec![0x40, 0x0a];
        wire.extend_from_slice(b"custom-key");
        wire.push(0x0d);
        wire.extend_from_slice(b"custom-header");

        let headers = decoder.decode(&wire).unwrap();
        assert_eq!(headers, vec![("custom-key".to_string(), "custom-header".to_string())]);
        assert_eq!(decoder.table_size(), 55);
    }

    #[test]
    fn request_headers_round_trip() {
        let headers = [
            (":method", "GET"),
            (":path", "/resource/42"),
            (":scheme", "https"),
            (":authority", "example.com"),
            ("user-agent", "hpack-test/1.0"),
            ("x-custom-header", "some opaque value"),
        ];
        let decoded = round_trip(&headers);
        assert_eq!(decoded.len(), headers.len());
        for ((n, v), (dn, dv)) in headers.iter().zip(&decoded) {
            assert_eq!(n, dn);
            assert_eq!(v, dv);
        }
    }

    #[test]
    fn repeated_fields_use_the_dynamic_table() {
        let mut encoder = Encoder::new(4096);
        let mut decoder = Decoder::new(4096);
        let headers = vec![("x-request-id".to_string(), "abc123".to_string())];

        let first = encoder.encode(&headers);
        let second = encoder.encode(&headers);
        assert!(second.len() < first.len(), "second encoding should be indexed");

        assert_eq!(decoder.decode(&first).unwrap(), headers);
        assert_eq!(decoder.decode(&second).unwrap(), headers);
        assert_eq!(encoder.table_size(), decoder.table_size());
    }

    #[test]
    fn encoder_and_decoder_tables_stay_in_sync() {
        let mut encoder = Encoder::new(256);
        let mut decoder = Decoder::new(256);
        for i in 0..50 {
            let headers = vec![(format!("x-header-{i}"), format!("value-{i}"))];
            let wire = encoder.encode(&headers);
            assert_eq!(decoder.decode(&wire).unwrap(), headers);
            assert_eq!(encoder.table_size(), decoder.table_size());
            assert!(encoder.table_size() <= 256);
        }
    }

    #[test]
    fn table_size_update_is_applied() {
        let mut decoder = Decoder::new(4096);
        // Insert one entry, then shrink to zero.
        let mut wire = vec![0x40, 0x03];
        wire.extend_from_slice(b"abc");
        wire.push(0x03);
        wire.extend_from_slice(b"def");
        decoder.decode(&wire).unwrap();
        assert!(decoder.table_size() > 0);

        decoder.decode(&[0x20]).unwrap();
        assert_eq!(decoder.table_size(), 0);
    }

    #[test]
    fn table_size_update_above_maximum_fails() {
        let mut decoder = Decoder::new(4096);
        let mut wire = Vec::new();
        coding::encode_int(&mut wire, 65_536, 5, 0x20);
        assert!(decoder.decode(&wire).is_err());
    }

    #[test]
    fn string_bomb_is_rejected() {
        // A complete block whose strings sum past the 8 KiB budget.
        let mut wire = vec![0x40];
        coding::encode_string(&mut wire, &"n".repeat(5000));
        coding::encode_string(&mut wire, &"v".repeat(5000));
        let err = Decoder::new(65_536).decode(&wire).unwrap_err();
        assert!(matches!(err, ServerError::Hpack(_)));
    }

    #[test]
    fn never_indexed_literal_skips_table() {
        let mut decoder = Decoder::new(4096);
        let mut wire = vec![0x10, 0x06];
        wire.extend_from_slice(b"secret");
        wire.push(0x05);
        wire.extend_from_slice(b"value");
        let headers = decoder.decode(&wire).unwrap();
        assert_eq!(headers, vec![("secret".to_string(), "value".to_string())]);
        assert_eq!(decoder.table_size(), 0);
    }
}
