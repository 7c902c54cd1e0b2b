//! Dense, vid-indexed vertex attribute store. Capacity grows in fixed
//! buckets rather than doubling, so vid ranges stay predictable across
//! restarts.

use crate::env::Env;
use skg_types::{Error, PropertyValue, Result, Tag, Vid, CAPACITY_EXTEND_BUCKET, GLOBAL_LABEL_TAG};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

#[derive(Clone)]
struct Row {
    tag: Tag,
    deleted: bool,
    attrs: Vec<(String, PropertyValue)>,
}

impl Default for Row {
    fn default() -> Self {
        Self {
            tag: GLOBAL_LABEL_TAG,
            deleted: false,
            attrs: Vec::new(),
        }
    }
}

struct State {
    rows: Vec<Row>,
    max_allocated_vid: Option<Vid>,
    num_vertices: usize,
}

/// Dense per-vid row store. `rows.len()` is always a multiple of
/// [`CAPACITY_EXTEND_BUCKET`]; new buckets are zero-filled on demand.
pub struct VertexAttributeStore {
    state: RwLock<State>,
    num_vertices_path: PathBuf,
    #[allow(dead_code)]
    env: Arc<dyn Env>,
}

impl VertexAttributeStore {
    /// `dir` holds the dense per-vid property rows (`D/vdata/...`);
    /// `num_vertices_path` is the capacity/count manifest, which per the
    /// on-disk layout lives alongside the schema documents at
    /// `D/meta/num_vertices` rather than under `dir`.
    pub fn open(env: Arc<dyn Env>, dir: &Path, num_vertices_path: &Path) -> Result<Self> {
        env.create_dir_all(dir)?;
        if let Some(parent) = num_vertices_path.parent() {
            env.create_dir_all(parent)?;
        }
        let num_vertices_path = num_vertices_path.to_path_buf();
        let persisted = read_num_vertices_file(&env, &num_vertices_path)?;
        let capacity = persisted.map(|p| p.storage_capacity).unwrap_or(0);
        let max_allocated_vid = persisted.and_then(|p| p.max_allocated_vid);
        let num_vertices = persisted.map(|p| p.num_vertices).unwrap_or(0);
        Ok(Self {
            state: RwLock::new(State {
                rows: vec![Row::default(); capacity],
                max_allocated_vid,
                num_vertices,
            }),
            num_vertices_path,
            env,
        })
    }

    fn ensure_capacity(rows: &mut Vec<Row>, vid: Vid) {
        let needed = vid as usize + 1;
        if needed > rows.len() {
            let buckets = needed.div_ceil(CAPACITY_EXTEND_BUCKET);
            rows.resize(buckets * CAPACITY_EXTEND_BUCKET, Row::default());
        }
    }

    /// Extend capacity (if needed) to cover `vid` and record its label tag.
    /// Callers only invoke this for a freshly-allocated vid (the encoder
    /// never reuses one), so every call counts one newly-live vertex.
    pub fn update_max_vid(&self, vid: Vid, tag: Tag) -> Result<()> {
        let mut state = self.state.write().expect("vattr lock poisoned");
        Self::ensure_capacity(&mut state.rows, vid);
        state.rows[vid as usize].tag = tag;
        state.rows[vid as usize].deleted = false;
        state.num_vertices += 1;
        state.max_allocated_vid = Some(state.max_allocated_vid.map_or(vid, |m| m.max(vid)));
        Ok(())
    }

    pub fn get_label_tag(&self, vid: Vid) -> Option<Tag> {
        let state = self.state.read().expect("vattr lock poisoned");
        state
            .rows
            .get(vid as usize)
            .filter(|r| !r.deleted)
            .map(|r| r.tag)
    }

    pub fn get_attr(&self, vid: Vid, column: &str) -> Result<Option<PropertyValue>> {
        let state = self.state.read().expect("vattr lock poisoned");
        let row = state.rows.get(vid as usize).ok_or(Error::NotFound)?;
        if row.deleted {
            return Err(Error::NotFound);
        }
        Ok(row
            .attrs
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, v)| v.clone()))
    }

    pub fn set_attr(&self, vid: Vid, column: &str, value: PropertyValue) -> Result<()> {
        let mut state = self.state.write().expect("vattr lock poisoned");
        Self::ensure_capacity(&mut state.rows, vid);
        let row = &mut state.rows[vid as usize];
        if row.deleted {
            return Err(Error::NotFound);
        }
        if let Some(slot) = row.attrs.iter_mut().find(|(name, _)| name == column) {
            slot.1 = value;
        } else {
            row.attrs.push((column.to_string(), value));
        }
        Ok(())
    }

    /// Tombstone a vertex. The vid is never reclaimed or reused.
    pub fn delete_vertex(&self, vid: Vid) -> Result<()> {
        let mut state = self.state.write().expect("vattr lock poisoned");
        let was_live = state.rows.get(vid as usize).is_some_and(|r| !r.deleted);
        let row = state.rows.get_mut(vid as usize).ok_or(Error::NotFound)?;
        row.deleted = true;
        row.tag = GLOBAL_LABEL_TAG;
        row.attrs.clear();
        if was_live {
            state.num_vertices = state.num_vertices.saturating_sub(1);
        }
        Ok(())
    }

    pub fn has_vertex(&self, vid: Vid) -> bool {
        self.state
            .read()
            .expect("vattr lock poisoned")
            .rows
            .get(vid as usize)
            .map(|r| !r.deleted)
            .unwrap_or(false)
    }

    /// The number of live (non-tombstoned) vertices, as tracked incrementally
    /// rather than recomputed by a full scan.
    pub fn num_vertices(&self) -> usize {
        self.state.read().expect("vattr lock poisoned").num_vertices
    }

    pub fn flush(&self) -> Result<()> {
        let state = self.state.read().expect("vattr lock poisoned");
        persist_num_vertices_file(
            &self.env,
            &self.num_vertices_path,
            NumVerticesFile {
                max_allocated_vid: state.max_allocated_vid,
                storage_capacity: state.rows.len(),
                num_vertices: state.num_vertices,
            },
        )
    }
}

/// The parsed contents of `meta/num_vertices`: a single line
/// `"max_allocated_vid storage_capacity num_vertices\n"`, with
/// `max_allocated_vid` written as `-1` when no vertex has ever been
/// allocated (so the line always has exactly three fields).
#[derive(Debug, Clone, Copy)]
struct NumVerticesFile {
    max_allocated_vid: Option<Vid>,
    storage_capacity: usize,
    num_vertices: usize,
}

fn read_num_vertices_file(env: &Arc<dyn Env>, path: &Path) -> Result<Option<NumVerticesFile>> {
    if !env.file_exists(path) {
        return Ok(None);
    }
    let size = env.file_size(path)?;
    if size == 0 {
        return Ok(None);
    }
    let file = env.new_random_access_file(path)?;
    let mut buf = vec![0u8; size as usize];
    file.read_at(0, &mut buf)?;
    let text = String::from_utf8(buf)
        .map_err(|e| Error::InvalidArgument(format!("corrupt num_vertices file: {e}")))?;
    let mut fields = text.trim().split_whitespace();
    let parse_field = |f: Option<&str>| -> Result<i64> {
        f.ok_or_else(|| Error::InvalidArgument("truncated num_vertices file".to_string()))?
            .parse::<i64>()
            .map_err(|e| Error::InvalidArgument(format!("corrupt num_vertices file: {e}")))
    };
    let max_allocated_vid = parse_field(fields.next())?;
    let storage_capacity = parse_field(fields.next())?;
    let num_vertices = parse_field(fields.next())?;
    Ok(Some(NumVerticesFile {
        max_allocated_vid: if max_allocated_vid < 0 { None } else { Some(max_allocated_vid as Vid) },
        storage_capacity: storage_capacity as usize,
        num_vertices: num_vertices as usize,
    }))
}

fn persist_num_vertices_file(env: &Arc<dyn Env>, path: &Path, doc: NumVerticesFile) -> Result<()> {
    let tmp = path.with_extension("tmp");
    let line = format!(
        "{} {} {}\n",
        doc.max_allocated_vid.map_or(-1, |v| v as i64),
        doc.storage_capacity,
        doc.num_vertices
    );
    {
        let mut w = env.new_writable_file(&tmp)?;
        w.append(line.as_bytes())?;
        w.sync()?;
    }
    env.rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::PosixEnv;

    #[test]
    fn update_max_vid_extends_capacity_in_buckets() {
        let dir = tempfile::tempdir().unwrap();
        let env: Arc<dyn Env> = Arc::new(PosixEnv::new());
        let store = VertexAttributeStore::open(env, dir.path(), &dir.path().join("num_vertices")).unwrap();
        store.update_max_vid(70_000, 3).unwrap();
        assert_eq!(store.get_label_tag(70_000), Some(3));
        assert_eq!(
            store.state.read().unwrap().rows.len(),
            2 * CAPACITY_EXTEND_BUCKET
        );
    }

    #[test]
    fn set_and_get_attr_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let env: Arc<dyn Env> = Arc::new(PosixEnv::new());
        let store = VertexAttributeStore::open(env, dir.path(), &dir.path().join("num_vertices")).unwrap();
        store.update_max_vid(0, 1).unwrap();
        store
            .set_attr(0, "name", PropertyValue::Varchar("alice".into()))
            .unwrap();
        assert_eq!(
            store.get_attr(0, "name").unwrap(),
            Some(PropertyValue::Varchar("alice".into()))
        );
    }

    #[test]
    fn delete_vertex_tombstones_without_reclaiming_vid() {
        let dir = tempfile::tempdir().unwrap();
        let env: Arc<dyn Env> = Arc::new(PosixEnv::new());
        let store = VertexAttributeStore::open(env, dir.path(), &dir.path().join("num_vertices")).unwrap();
        store.update_max_vid(5, 2).unwrap();
        assert!(store.has_vertex(5));
        store.delete_vertex(5).unwrap();
        assert!(!store.has_vertex(5));
        assert!(store.get_attr(5, "x").is_err());
    }

    #[test]
    fn capacity_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let env: Arc<dyn Env> = Arc::new(PosixEnv::new());
        let store = VertexAttributeStore::open(Arc::clone(&env), dir.path(), &dir.path().join("num_vertices")).unwrap();
        store.update_max_vid(120_000, 1).unwrap();
        store.flush().unwrap();

        let reopened = VertexAttributeStore::open(env, dir.path(), &dir.path().join("num_vertices")).unwrap();
        assert_eq!(
            reopened.state.read().unwrap().rows.len(),
            3 * CAPACITY_EXTEND_BUCKET
        );
    }

    #[test]
    fn num_vertices_tracks_allocations_and_deletes() {
        let dir = tempfile::tempdir().unwrap();
        let env: Arc<dyn Env> = Arc::new(PosixEnv::new());
        let nv_path = dir.path().join("num_vertices");
        let store = VertexAttributeStore::open(env, dir.path(), &nv_path).unwrap();
        store.update_max_vid(0, 1).unwrap();
        store.update_max_vid(1, 1).unwrap();
        store.update_max_vid(2, 1).unwrap();
        assert_eq!(store.num_vertices(), 3);
        store.delete_vertex(1).unwrap();
        assert_eq!(store.num_vertices(), 2);
    }

    #[test]
    fn num_vertices_file_matches_literal_three_field_format() {
        let dir = tempfile::tempdir().unwrap();
        let env: Arc<dyn Env> = Arc::new(PosixEnv::new());
        let nv_path = dir.path().join("num_vertices");
        let store = VertexAttributeStore::open(Arc::clone(&env), dir.path(), &nv_path).unwrap();
        store.update_max_vid(3, 1).unwrap();
        store.delete_vertex(3).unwrap();
        store.update_max_vid(70_000, 2).unwrap();
        store.flush().unwrap();

        let raw = std::fs::read_to_string(&nv_path).unwrap();
        let fields: Vec<&str> = raw.trim().split_whitespace().collect();
        assert_eq!(fields.len(), 3, "expected \"max_allocated_vid storage_capacity num_vertices\"");
        assert_eq!(fields[0], "70000");
        assert_eq!(fields[1], (2 * CAPACITY_EXTEND_BUCKET).to_string());
        assert_eq!(fields[2], "1");

        let reopened = VertexAttributeStore::open(env, dir.path(), &nv_path).unwrap();
        assert_eq!(reopened.num_vertices(), 1);
    }
}
