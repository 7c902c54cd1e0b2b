//! Immutable on-disk edge partition ("leaf"): `adj` fixed records sorted by
//! `(dst, src)`, sparse `src.idx`/`dst.idx` binary-search indices, per-column
//! property blocks, and a `meta` descriptor.

pub mod column;
#[cfg(feature = "compressed-index")]
pub mod elias_gamma;
pub mod index;
pub mod record;

use crate::env::Env;
use crate::memtable::MemoryEdge;
use index::{write_index, FileIndexReader, IndexEntry, IndexReader, MmapIndexReader};
use record::{EdgeRecord, RECORD_SIZE};
use serde::{Deserialize, Serialize};
use skg_types::{ColumnDescriptor, ColumnType, EdgeRecord as ApiEdgeRecord, Error, PropertyValue, Result, Tag, Vid, VID_NONE};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeafMeta {
    pub record_count: u32,
    pub columns: Vec<ColumnDescriptor>,
    pub min_dst: Vid,
    pub max_dst: Vid,
}

/// Whether a leaf's indices are opened via `mmap` or `pread`; chosen by the
/// shard tree at open time, e.g. based on leaf size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexAccessMode {
    Mmap,
    File,
}

/// Build an immutable leaf from a pre-sorted run of edges.
///
/// `edges` must already be sorted by `(dst, src)` ascending (the memory
/// buffer and the bulk sharder's merge phase both guarantee this).
pub fn write_leaf(
    env: &Arc<dyn Env>,
    dir: &Path,
    edges: &[MemoryEdge],
    columns: &[ColumnDescriptor],
) -> Result<()> {
    env.create_dir_all(dir)?;
    env.create_dir_all(&dir.join("col"))?;

    let mut adj_buf = Vec::with_capacity(edges.len() * RECORD_SIZE);
    let mut dst_entries: Vec<IndexEntry> = Vec::new();
    let mut src_entries: Vec<IndexEntry> = Vec::with_capacity(edges.len());
    let mut last_dst: Option<Vid> = None;
    let mut next_of_same_dst: Vec<usize> = vec![usize::MAX; edges.len()];

    // First pass: compute next-link chains (later record with the same dst
    // patches the previous one's `next`) and collect the sparse dst index.
    let mut last_index_for_dst: std::collections::HashMap<Vid, usize> = std::collections::HashMap::new();
    for (i, e) in edges.iter().enumerate() {
        if last_dst != Some(e.dst) {
            dst_entries.push(IndexEntry {
                value: e.dst,
                position: i as u32,
            });
            last_dst = Some(e.dst);
        }
        if let Some(&prev) = last_index_for_dst.get(&e.dst) {
            next_of_same_dst[prev] = i;
        }
        last_index_for_dst.insert(e.dst, i);
        src_entries.push(IndexEntry {
            value: e.src,
            position: i as u32,
        });
    }
    src_entries.sort_by_key(|e| (e.value, e.position));

    for (i, e) in edges.iter().enumerate() {
        let next = match next_of_same_dst[i] {
            usize::MAX => VID_NONE,
            n => n as u32,
        };
        let mut bitset = 0u64;
        for (bit, col) in columns.iter().enumerate() {
            if e.properties.iter().any(|(name, _)| name == &col.name) {
                bitset |= 1 << bit;
            }
        }
        let mut rec = EdgeRecord {
            src: e.src,
            dst: e.dst,
            weight_bits: e.weight.to_bits(),
            tag: e.tag,
            next,
            bitset,
        };
        rec.set_tombstoned(e.tombstoned);
        adj_buf.extend_from_slice(&rec.encode());
    }

    {
        let mut w = env.new_writable_file(&dir.join("adj"))?;
        w.append(&adj_buf)?;
        w.sync()?;
    }
    write_index(env, &dir.join("dst.idx"), &dst_entries)?;
    write_index(env, &dir.join("src.idx"), &src_entries)?;

    for col in columns {
        match col.col_type {
            ColumnType::Varchar => {
                let values: Vec<Option<String>> = edges
                    .iter()
                    .map(|e| {
                        e.properties.iter().find(|(n, _)| n == &col.name).map(|(_, v)| {
                            if let PropertyValue::Varchar(s) = v {
                                s.clone()
                            } else {
                                String::new()
                            }
                        })
                    })
                    .collect();
                column::write_varchar_column(
                    env,
                    &dir.join("col").join(format!("{}.idx", col.name)),
                    &dir.join("col").join(format!("{}.blob", col.name)),
                    &values,
                )?;
            }
            ColumnType::Group => {}
            _ => {
                let values: Vec<Option<PropertyValue>> = edges
                    .iter()
                    .map(|e| e.properties.iter().find(|(n, _)| n == &col.name).map(|(_, v)| v.clone()))
                    .collect();
                column::write_fixed_column(env, &dir.join("col").join(&col.name), col.col_type, &values)?;
            }
        }
    }

    let meta = LeafMeta {
        record_count: edges.len() as u32,
        columns: columns.to_vec(),
        min_dst: edges.first().map(|e| e.dst).unwrap_or(0),
        max_dst: edges.last().map(|e| e.dst).unwrap_or(0),
    };
    let bytes = serde_json::to_vec_pretty(&meta)
        .map_err(|e| Error::InvalidArgument(format!("failed to serialize leaf meta: {e}")))?;
    let mut w = env.new_writable_file(&dir.join("meta"))?;
    w.append(&bytes)?;
    w.sync()
}

/// Read-only handle onto a leaf directory.
pub struct LeafReader {
    env: Arc<dyn Env>,
    dir: PathBuf,
    meta: LeafMeta,
    adj: Box<dyn crate::env::RandomAccessFile>,
    dst_idx: Box<dyn IndexReader>,
    src_idx: Box<dyn IndexReader>,
}

impl LeafReader {
    pub fn open(env: Arc<dyn Env>, dir: &Path, mode: IndexAccessMode) -> Result<Self> {
        let meta_bytes_path = dir.join("meta");
        let size = env.file_size(&meta_bytes_path)?;
        let meta_file = env.new_random_access_file(&meta_bytes_path)?;
        let mut buf = vec![0u8; size as usize];
        meta_file.read_at(0, &mut buf)?;
        let meta: LeafMeta = serde_json::from_slice(&buf)
            .map_err(|e| Error::InvalidArgument(format!("corrupt leaf meta: {e}")))?;

        let adj = env.new_random_access_file(&dir.join("adj"))?;
        let (dst_idx, src_idx): (Box<dyn IndexReader>, Box<dyn IndexReader>) = match mode {
            IndexAccessMode::Mmap => (
                Box::new(MmapIndexReader::open(&env, &dir.join("dst.idx"))?),
                Box::new(MmapIndexReader::open(&env, &dir.join("src.idx"))?),
            ),
            IndexAccessMode::File => (
                Box::new(FileIndexReader::open(&env, &dir.join("dst.idx"))?),
                Box::new(FileIndexReader::open(&env, &dir.join("src.idx"))?),
            ),
        };

        Ok(Self {
            env,
            dir: dir.to_path_buf(),
            meta,
            adj,
            dst_idx,
            src_idx,
        })
    }

    pub fn record_count(&self) -> u32 {
        self.meta.record_count
    }

    /// The leaf's backing directory, used by shard compaction to remove the
    /// old leaf set once its records have been re-merged into new leaves.
    pub fn dir_path(&self) -> &Path {
        &self.dir
    }

    fn read_record(&self, index: u32) -> Result<EdgeRecord> {
        let mut buf = [0u8; RECORD_SIZE];
        self.adj.read_at(index as u64 * RECORD_SIZE as u64, &mut buf)?;
        Ok(EdgeRecord::decode(&buf))
    }

    fn properties_for(&self, record_index: u32, bitset: u64) -> Result<Vec<(String, PropertyValue)>> {
        let mut out = Vec::new();
        for (bit, col) in self.meta.columns.iter().enumerate() {
            if bitset & (1 << bit) == 0 {
                continue;
            }
            let value = match col.col_type {
                ColumnType::Varchar => column::read_varchar_column(
                    &self.env,
                    &self.dir.join("col").join(format!("{}.idx", col.name)),
                    &self.dir.join("col").join(format!("{}.blob", col.name)),
                    record_index,
                )?,
                ColumnType::Group => None,
                other => column::read_fixed_column(&self.env, &self.dir.join("col").join(&col.name), other, record_index)?,
            };
            if let Some(v) = value {
                out.push((col.name.clone(), v));
            }
        }
        Ok(out)
    }

    /// Walk the same-dst `next` chain starting at `start`, yielding every
    /// live (non-tombstoned) record.
    pub fn in_edges(&self, dst: Vid) -> Result<Vec<ApiEdgeRecord>> {
        let Some(start) = self.dst_idx.lower_bound(dst) else {
            return Ok(Vec::new());
        };
        let mut out = Vec::new();
        let mut cursor = Some(start);
        while let Some(idx) = cursor {
            let rec = self.read_record(idx)?;
            if rec.dst != dst {
                break;
            }
            if !rec.is_tombstoned() {
                let properties = self.properties_for(idx, rec.bitset)?;
                out.push(ApiEdgeRecord {
                    src: rec.src,
                    dst: rec.dst,
                    tag: rec.tag,
                    weight: rec.weight(),
                    properties,
                });
            }
            cursor = rec.next_link();
        }
        Ok(out)
    }

    /// Out-edges for `src`: since `adj` is sorted by `(dst, src)`, matching
    /// records are scattered, so this follows `src.idx`'s sorted run of
    /// positions for the value and reads each directly.
    pub fn out_edges(&self, src: Vid) -> Result<Vec<ApiEdgeRecord>> {
        let mut out = Vec::new();
        for idx in self.src_idx.all_positions(src) {
            let rec = self.read_record(idx)?;
            if rec.is_tombstoned() {
                continue;
            }
            let properties = self.properties_for(idx, rec.bitset)?;
            out.push(ApiEdgeRecord {
                src: rec.src,
                dst: rec.dst,
                tag: rec.tag,
                weight: rec.weight(),
                properties,
            });
        }
        Ok(out)
    }

    /// Every live record in the leaf, in on-disk `(dst, src)` order. Used by
    /// shard compaction/split to re-merge a leaf set before rewriting it.
    pub fn all_records(&self) -> Result<Vec<ApiEdgeRecord>> {
        let mut out = Vec::with_capacity(self.meta.record_count as usize);
        for idx in 0..self.meta.record_count {
            let rec = self.read_record(idx)?;
            if rec.is_tombstoned() {
                continue;
            }
            let properties = self.properties_for(idx, rec.bitset)?;
            out.push(ApiEdgeRecord {
                src: rec.src,
                dst: rec.dst,
                tag: rec.tag,
                weight: rec.weight(),
                properties,
            });
        }
        Ok(out)
    }

    pub fn find(&self, src: Vid, dst: Vid, tag: Tag) -> Result<Option<ApiEdgeRecord>> {
        let Some(start) = self.dst_idx.lower_bound(dst) else {
            return Ok(None);
        };
        let mut cursor = Some(start);
        while let Some(idx) = cursor {
            let rec = self.read_record(idx)?;
            if rec.dst != dst {
                break;
            }
            if rec.src == src && rec.tag == tag && !rec.is_tombstoned() {
                let properties = self.properties_for(idx, rec.bitset)?;
                return Ok(Some(ApiEdgeRecord {
                    src: rec.src,
                    dst: rec.dst,
                    tag: rec.tag,
                    weight: rec.weight(),
                    properties,
                }));
            }
            cursor = rec.next_link();
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::PosixEnv;

    fn edge(src: Vid, dst: Vid) -> MemoryEdge {
        MemoryEdge {
            src,
            dst,
            tag: 0,
            weight: 1.0,
            properties: vec![("w".into(), PropertyValue::Float32(2.0))],
            tombstoned: false,
        }
    }

    fn sorted(mut edges: Vec<MemoryEdge>) -> Vec<MemoryEdge> {
        edges.sort_by_key(|e| (e.dst, e.src));
        edges
    }

    #[test]
    fn in_edges_follows_next_chain_for_shared_dst() {
        let dir = tempfile::tempdir().unwrap();
        let env: Arc<dyn Env> = Arc::new(PosixEnv::new());
        let columns = vec![ColumnDescriptor::new("w", ColumnType::Float32)];
        let edges = sorted(vec![edge(1, 5), edge(2, 5), edge(3, 6)]);
        write_leaf(&env, dir.path(), &edges, &columns).unwrap();

        let reader = LeafReader::open(env, dir.path(), IndexAccessMode::File).unwrap();
        let got = reader.in_edges(5).unwrap();
        assert_eq!(got.len(), 2);
        let srcs: Vec<_> = got.iter().map(|e| e.src).collect();
        assert!(srcs.contains(&1) && srcs.contains(&2));
    }

    #[test]
    fn out_edges_reads_via_src_index() {
        let dir = tempfile::tempdir().unwrap();
        let env: Arc<dyn Env> = Arc::new(PosixEnv::new());
        let columns = vec![ColumnDescriptor::new("w", ColumnType::Float32)];
        let edges = sorted(vec![edge(1, 5), edge(1, 6), edge(2, 5)]);
        write_leaf(&env, dir.path(), &edges, &columns).unwrap();

        let reader = LeafReader::open(env, dir.path(), IndexAccessMode::Mmap).unwrap();
        let got = reader.out_edges(1).unwrap();
        assert_eq!(got.len(), 2);
        for e in &got {
            assert_eq!(e.src, 1);
            assert_eq!(
                e.properties.iter().find(|(n, _)| n == "w").unwrap().1,
                PropertyValue::Float32(2.0)
            );
        }
    }

    #[test]
    fn find_locates_single_edge() {
        let dir = tempfile::tempdir().unwrap();
        let env: Arc<dyn Env> = Arc::new(PosixEnv::new());
        let edges = sorted(vec![edge(1, 5), edge(2, 5)]);
        write_leaf(&env, dir.path(), &edges, &[]).unwrap();

        let reader = LeafReader::open(env, dir.path(), IndexAccessMode::File).unwrap();
        assert!(reader.find(1, 5, 0).unwrap().is_some());
        assert!(reader.find(9, 5, 0).unwrap().is_none());
    }
}
