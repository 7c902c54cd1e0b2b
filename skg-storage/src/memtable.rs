//! In-memory write buffer for a single shard: a sorted `(dst, src)` map of
//! pending edge mutations, flushed to an immutable leaf once it grows past
//! `memory_shard_size_mb` or a forced split is triggered.

use skg_types::{PropertyValue, Tag, Vid};
use std::collections::BTreeMap;

/// An edge as held in the memory buffer: unlike a persisted leaf record, it
/// owns its properties directly rather than pointing into column files.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryEdge {
    pub src: Vid,
    pub dst: Vid,
    pub tag: Tag,
    pub weight: f32,
    pub properties: Vec<(String, PropertyValue)>,
    pub tombstoned: bool,
}

impl MemoryEdge {
    fn approx_size(&self) -> usize {
        let props: usize = self
            .properties
            .iter()
            .map(|(name, v)| name.len() + v.encode().len())
            .sum();
        24 + props
    }
}

/// Ordering key matching the on-disk leaf's `(dst, src)` sort order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct EdgeKey {
    pub dst: Vid,
    pub src: Vid,
    pub tag: Tag,
}

#[derive(Default)]
pub struct ShardMemoryBuffer {
    edges: BTreeMap<EdgeKey, MemoryEdge>,
    approx_bytes: usize,
}

impl ShardMemoryBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or update an edge. Parallel edges sharing the same
    /// `(src, dst, tag)` merge-update in place rather than accumulating.
    pub fn upsert(&mut self, edge: MemoryEdge) {
        let key = EdgeKey {
            dst: edge.dst,
            src: edge.src,
            tag: edge.tag,
        };
        let size = edge.approx_size();
        if let Some(old) = self.edges.insert(key, edge) {
            self.approx_bytes -= old.approx_size();
        }
        self.approx_bytes += size;
    }

    /// Mark `(src, dst, tag)` deleted. If the buffer holds no entry for the
    /// key (the edge was already flushed to a leaf), a bare tombstone marker
    /// is inserted rather than silently doing nothing, so that a read
    /// overlaying this buffer onto the leaf still sees the deletion.
    pub fn tombstone(&mut self, src: Vid, dst: Vid, tag: Tag) {
        let key = EdgeKey { dst, src, tag };
        match self.edges.get_mut(&key) {
            Some(edge) => edge.tombstoned = true,
            None => {
                let marker = MemoryEdge {
                    src,
                    dst,
                    tag,
                    weight: 0.0,
                    properties: Vec::new(),
                    tombstoned: true,
                };
                self.approx_bytes += marker.approx_size();
                self.edges.insert(key, marker);
            }
        }
    }

    pub fn get(&self, src: Vid, dst: Vid, tag: Tag) -> Option<&MemoryEdge> {
        self.edges
            .get(&EdgeKey { dst, src, tag })
            .filter(|e| !e.tombstoned)
    }

    /// Like [`Self::get`], but returns a tombstone marker too. Callers that
    /// need to know whether the buffer shadows a key at all (live or
    /// deleted), rather than just whether a live edge exists, use this.
    pub fn entry(&self, src: Vid, dst: Vid, tag: Tag) -> Option<&MemoryEdge> {
        self.edges.get(&EdgeKey { dst, src, tag })
    }

    pub fn out_edges(&self, src: Vid) -> impl Iterator<Item = &MemoryEdge> {
        self.edges
            .values()
            .filter(move |e| e.src == src && !e.tombstoned)
    }

    /// All buffer entries with the given `src`, live or tombstoned. Used to
    /// compute the set of keys the buffer shadows when overlaying onto leaf
    /// reads.
    pub fn out_entries(&self, src: Vid) -> impl Iterator<Item = &MemoryEdge> {
        self.edges.values().filter(move |e| e.src == src)
    }

    pub fn in_edges(&self, dst: Vid) -> impl Iterator<Item = &MemoryEdge> {
        self.in_entries(dst).filter(|e| !e.tombstoned)
    }

    /// All buffer entries with the given `dst`, live or tombstoned (see
    /// [`Self::out_entries`]).
    pub fn in_entries(&self, dst: Vid) -> impl Iterator<Item = &MemoryEdge> {
        // Edges are keyed by (dst, src, tag) so this is a contiguous range scan.
        self.edges
            .range(
                EdgeKey { dst, src: 0, tag: 0 }
                    ..=EdgeKey {
                        dst,
                        src: Vid::MAX,
                        tag: Tag::MAX,
                    },
            )
            .map(|(_, e)| e)
    }

    pub fn approx_bytes(&self) -> usize {
        self.approx_bytes
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Drain the buffer in `(dst, src)` order, the same ordering a leaf
    /// writer needs. Tombstoned entries are kept rather than dropped: the
    /// leaf writer persists them as tombstoned adjacency records, so a
    /// delete survives a flush instead of evaporating with the buffer that
    /// recorded it (the record is only physically removed at the leaf's next
    /// full merge, per the edge lifecycle).
    pub fn drain_sorted(&mut self) -> Vec<MemoryEdge> {
        std::mem::take(&mut self.edges).into_values().collect()
    }

    pub fn clear(&mut self) {
        self.edges.clear();
        self.approx_bytes = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge(src: Vid, dst: Vid, tag: Tag) -> MemoryEdge {
        MemoryEdge {
            src,
            dst,
            tag,
            weight: 1.0,
            properties: Vec::new(),
            tombstoned: false,
        }
    }

    #[test]
    fn upsert_merges_parallel_edge_in_place() {
        let mut buf = ShardMemoryBuffer::new();
        buf.upsert(edge(1, 2, 0));
        let mut updated = edge(1, 2, 0);
        updated.weight = 2.5;
        buf.upsert(updated);
        assert_eq!(buf.len(), 1);
        assert_eq!(buf.get(1, 2, 0).unwrap().weight, 2.5);
    }

    #[test]
    fn in_edges_scans_contiguous_dst_range() {
        let mut buf = ShardMemoryBuffer::new();
        buf.upsert(edge(1, 5, 0));
        buf.upsert(edge(2, 5, 0));
        buf.upsert(edge(3, 6, 0));
        let dst5: Vec<_> = buf.in_edges(5).collect();
        assert_eq!(dst5.len(), 2);
    }

    #[test]
    fn tombstone_hides_edge_from_reads() {
        let mut buf = ShardMemoryBuffer::new();
        buf.upsert(edge(1, 2, 0));
        buf.tombstone(1, 2, 0);
        assert!(buf.get(1, 2, 0).is_none());
        assert_eq!(buf.out_edges(1).count(), 0);
    }

    #[test]
    fn tombstone_on_absent_key_leaves_a_masking_marker() {
        let mut buf = ShardMemoryBuffer::new();
        buf.tombstone(1, 2, 0);
        assert!(buf.get(1, 2, 0).is_none());
        let marked = buf.entry(1, 2, 0).expect("tombstone marker should be present");
        assert!(marked.tombstoned);
    }

    #[test]
    fn drain_sorted_keeps_tombstones_and_empties_buffer() {
        let mut buf = ShardMemoryBuffer::new();
        buf.upsert(edge(1, 2, 0));
        buf.upsert(edge(3, 4, 0));
        buf.tombstone(1, 2, 0);
        let drained = buf.drain_sorted();
        assert_eq!(drained.len(), 2);
        assert!(drained.iter().find(|e| e.src == 1).unwrap().tombstoned);
        assert!(buf.is_empty());
    }
}
