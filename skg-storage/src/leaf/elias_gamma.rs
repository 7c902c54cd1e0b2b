//! Elias-gamma bit-packed encoding for a sorted `(value, position)` index,
//! kept as a disabled-by-default forward-compatible variant of the plain
//! fixed-width `src.idx`/`dst.idx` layout. Values are delta-encoded against
//! the previous entry's value before gamma-coding, which pays off when an
//! index's values cluster densely (the common case for `dst.idx` on a
//! heavily-split shard).

use super::index::IndexEntry;

struct BitWriter {
    bytes: Vec<u8>,
    cur: u8,
    filled: u8,
}

impl BitWriter {
    fn new() -> Self {
        Self { bytes: Vec::new(), cur: 0, filled: 0 }
    }

    fn push_bit(&mut self, bit: bool) {
        if bit {
            self.cur |= 1 << (7 - self.filled);
        }
        self.filled += 1;
        if self.filled == 8 {
            self.bytes.push(self.cur);
            self.cur = 0;
            self.filled = 0;
        }
    }

    fn push_gamma(&mut self, value: u32) {
        // Elias-gamma codes positive integers only; shift the domain by one
        // so a delta of zero is representable.
        let n = value as u64 + 1;
        let bits = 64 - n.leading_zeros() - 1;
        for _ in 0..bits {
            self.push_bit(false);
        }
        for i in (0..=bits).rev() {
            self.push_bit((n >> i) & 1 != 0);
        }
    }

    fn finish(mut self) -> Vec<u8> {
        if self.filled > 0 {
            self.bytes.push(self.cur);
        }
        self.bytes
    }
}

struct BitReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> BitReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn next_bit(&mut self) -> bool {
        let byte = self.bytes[self.pos / 8];
        let bit = (byte >> (7 - (self.pos % 8))) & 1 != 0;
        self.pos += 1;
        bit
    }

    fn read_gamma(&mut self) -> u32 {
        let mut zeros = 0u32;
        while !self.next_bit() {
            zeros += 1;
        }
        let mut n: u64 = 1;
        for _ in 0..zeros {
            n = (n << 1) | self.next_bit() as u64;
        }
        (n - 1) as u32
    }
}

/// Encode a sorted-by-`value` slice of index entries as delta-gamma-coded
/// values followed by plain little-endian positions.
pub fn encode_entries(entries: &[IndexEntry]) -> Vec<u8> {
    let mut w = BitWriter::new();
    w.push_gamma(entries.len() as u32);
    let mut prev = 0u32;
    for e in entries {
        w.push_gamma(e.value - prev);
        prev = e.value;
    }
    let mut out = w.finish();
    for e in entries {
        out.extend_from_slice(&e.position.to_le_bytes());
    }
    out
}

/// Inverse of [`encode_entries`].
pub fn decode_entries(bytes: &[u8]) -> Vec<IndexEntry> {
    if bytes.is_empty() {
        return Vec::new();
    }
    let mut r = BitReader::new(bytes);
    let count = r.read_gamma() as usize;
    let mut values = Vec::with_capacity(count);
    let mut prev = 0u32;
    for _ in 0..count {
        prev += r.read_gamma();
        values.push(prev);
    }
    // The gamma stream is byte-aligned by `BitWriter::finish`; positions
    // follow immediately after in plain 4-byte little-endian form.
    let gamma_bytes = bytes.len() - count * 4;
    let positions = &bytes[gamma_bytes..];
    values
        .into_iter()
        .enumerate()
        .map(|(i, value)| IndexEntry {
            value,
            position: u32::from_le_bytes(positions[i * 4..i * 4 + 4].try_into().unwrap()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_sorted_entries() {
        let entries = vec![
            IndexEntry { value: 3, position: 0 },
            IndexEntry { value: 3, position: 1 },
            IndexEntry { value: 10, position: 2 },
            IndexEntry { value: 1000, position: 3 },
        ];
        let encoded = encode_entries(&entries);
        let decoded = decode_entries(&encoded);
        assert_eq!(decoded, entries);
    }

    #[test]
    fn round_trips_empty() {
        assert_eq!(decode_entries(&encode_entries(&[])), Vec::new());
    }
}
