//! Sparse, binary-searchable `(value, position)` index files (`src.idx`,
//! `dst.idx`), each a sorted array of 8-byte entries.

use crate::env::Env;
use skg_types::Result;
use std::path::Path;
use std::sync::Arc;

pub const INDEX_ENTRY_SIZE: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub value: u32,
    pub position: u32,
}

impl IndexEntry {
    fn encode(self) -> [u8; INDEX_ENTRY_SIZE] {
        let mut out = [0u8; INDEX_ENTRY_SIZE];
        out[0..4].copy_from_slice(&self.value.to_le_bytes());
        out[4..8].copy_from_slice(&self.position.to_le_bytes());
        out
    }

    fn decode(bytes: &[u8]) -> Self {
        Self {
            value: u32::from_le_bytes(bytes[0..4].try_into().unwrap()),
            position: u32::from_le_bytes(bytes[4..8].try_into().unwrap()),
        }
    }
}

/// Write a sorted `(value, position)` index file. Callers are required to
/// pass entries already sorted by `value`; a zero-entry index produces a
/// legitimately empty (zero-byte) file, not an error.
pub fn write_index(env: &Arc<dyn Env>, path: &Path, entries: &[IndexEntry]) -> Result<()> {
    let mut w = env.new_writable_file(path)?;
    let mut buf = Vec::with_capacity(entries.len() * INDEX_ENTRY_SIZE);
    for e in entries {
        buf.extend_from_slice(&e.encode());
    }
    w.append(&buf)?;
    w.sync()
}

/// Read access to a binary-searchable index file.
pub trait IndexReader: Send + Sync {
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    fn entry(&self, i: usize) -> IndexEntry;

    /// First position recorded for `value`, if present.
    fn lower_bound(&self, value: u32) -> Option<u32> {
        let mut lo = 0usize;
        let mut hi = self.len();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.entry(mid).value < value {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        if lo < self.len() && self.entry(lo).value == value {
            Some(self.entry(lo).position)
        } else {
            None
        }
    }

    /// All positions recorded for `value`, assuming (as `src.idx` does) more
    /// than one entry may share a value and are stored contiguously.
    fn all_positions(&self, value: u32) -> Vec<u32> {
        let mut lo = 0usize;
        let mut hi = self.len();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.entry(mid).value < value {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        let mut out = Vec::new();
        let mut i = lo;
        while i < self.len() && self.entry(i).value == value {
            out.push(self.entry(i).position);
            i += 1;
        }
        out
    }
}

/// `pread`-backed reader: does not map the whole index into memory, suited
/// to very large indices.
pub struct FileIndexReader {
    file: Box<dyn crate::env::RandomAccessFile>,
    len: usize,
}

impl FileIndexReader {
    pub fn open(env: &Arc<dyn Env>, path: &Path) -> Result<Self> {
        let file = env.new_random_access_file(path)?;
        let size = file.size()?;
        Ok(Self {
            file,
            len: size as usize / INDEX_ENTRY_SIZE,
        })
    }
}

impl IndexReader for FileIndexReader {
    fn len(&self) -> usize {
        self.len
    }

    fn entry(&self, i: usize) -> IndexEntry {
        let mut buf = [0u8; INDEX_ENTRY_SIZE];
        self.file
            .read_at((i * INDEX_ENTRY_SIZE) as u64, &mut buf)
            .expect("index read out of bounds");
        IndexEntry::decode(&buf)
    }
}

/// `mmap`-backed reader: loads the whole index file into the process address
/// space once, then does binary search directly over the mapping.
pub struct MmapIndexReader {
    mmap: Option<memmap2::Mmap>,
    len: usize,
}

impl MmapIndexReader {
    pub fn open(env: &Arc<dyn Env>, path: &Path) -> Result<Self> {
        if !env.file_exists(path) || env.file_size(path)? == 0 {
            // An absent or empty index is legal.
            return Ok(Self { mmap: None, len: 0 });
        }
        let mmap = env.mmap_readonly(path)?;
        let len = mmap.len() / INDEX_ENTRY_SIZE;
        Ok(Self {
            mmap: Some(mmap),
            len,
        })
    }
}

impl IndexReader for MmapIndexReader {
    fn len(&self) -> usize {
        self.len
    }

    fn entry(&self, i: usize) -> IndexEntry {
        let start = i * INDEX_ENTRY_SIZE;
        let mmap = self.mmap.as_ref().expect("entry() called on empty index");
        IndexEntry::decode(&mmap[start..start + INDEX_ENTRY_SIZE])
    }
}

/// Elias-gamma-compressed index variant. Off by default; kept for forward
/// compatibility and never constructed by the default reader factory.
#[cfg(feature = "compressed-index")]
pub struct CompressedIndexReader {
    decoded: Vec<IndexEntry>,
}

#[cfg(feature = "compressed-index")]
impl CompressedIndexReader {
    pub fn open(env: &Arc<dyn Env>, path: &Path) -> Result<Self> {
        let raw = env.mmap_readonly(path)?;
        Ok(Self {
            decoded: crate::leaf::elias_gamma::decode_entries(&raw),
        })
    }
}

#[cfg(feature = "compressed-index")]
impl IndexReader for CompressedIndexReader {
    fn len(&self) -> usize {
        self.decoded.len()
    }

    fn entry(&self, i: usize) -> IndexEntry {
        self.decoded[i]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::PosixEnv;

    fn entries(values: &[u32]) -> Vec<IndexEntry> {
        values
            .iter()
            .enumerate()
            .map(|(i, &value)| IndexEntry {
                value,
                position: i as u32,
            })
            .collect()
    }

    #[test]
    fn lower_bound_finds_existing_and_misses_absent() {
        let dir = tempfile::tempdir().unwrap();
        let env: Arc<dyn Env> = Arc::new(PosixEnv::new());
        let path = dir.path().join("dst.idx");
        write_index(&env, &path, &entries(&[1, 3, 5, 7])).unwrap();

        let reader = FileIndexReader::open(&env, &path).unwrap();
        assert_eq!(reader.lower_bound(5), Some(2));
        assert_eq!(reader.lower_bound(4), None);
    }

    #[test]
    fn all_positions_groups_duplicate_values() {
        let dir = tempfile::tempdir().unwrap();
        let env: Arc<dyn Env> = Arc::new(PosixEnv::new());
        let path = dir.path().join("src.idx");
        let mut e = entries(&[1, 2, 2, 2, 9]);
        e[1].position = 10;
        e[2].position = 11;
        e[3].position = 12;
        write_index(&env, &path, &e).unwrap();

        let reader = MmapIndexReader::open(&env, &path).unwrap();
        assert_eq!(reader.all_positions(2), vec![10, 11, 12]);
        assert_eq!(reader.all_positions(42), Vec::<u32>::new());
    }

    #[test]
    fn empty_index_file_is_legal() {
        let dir = tempfile::tempdir().unwrap();
        let env: Arc<dyn Env> = Arc::new(PosixEnv::new());
        let path = dir.path().join("empty.idx");
        write_index(&env, &path, &[]).unwrap();
        let reader = FileIndexReader::open(&env, &path).unwrap();
        assert!(reader.is_empty());
        assert_eq!(reader.lower_bound(0), None);
    }
}
