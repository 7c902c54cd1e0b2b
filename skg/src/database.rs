//! The `Database` facade: one open handle onto a property graph rooted at a
//! directory, serializing `add_edge`/`delete_edge`/schema mutations through a
//! single lock while letting reads fan out freely across the query engine's
//! thread pool.

use skg_storage::env::{Env, FileLock, PosixEnv};
use skg_storage::idencoder::{IdEncoder, StringIdEncoder};
use skg_storage::memtable::MemoryEdge;
use skg_storage::query::QueryEngine;
use skg_storage::schema::SchemaRegistry;
use skg_storage::shard::ShardTree;
use skg_storage::vattr::VertexAttributeStore;
use skg_storage::SkgOptions;
use skg_traverse::{Adjacency, Budget};
use skg_types::{ColumnDescriptor, EdgeRecord, Error, PropertyValue, Result, Tag, Vid};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Shortest-path / all-paths envelope, with each path rendered as
/// `"v:<id> -e-> v:<id> -e-> ..."` once translated back to user ids.
pub type PathEnvelope = skg_traverse::Envelope<String>;

/// k-out / k-out-size / k-neighbor envelope of reached user ids.
pub type VertexEnvelope = skg_traverse::Envelope<String>;

/// One edge as surfaced to a caller: endpoints and label resolved back to
/// their original strings.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeView {
    pub src: String,
    pub dst: String,
    pub label: Option<String>,
    pub weight: f32,
    pub properties: Vec<(String, PropertyValue)>,
}

/// One edge to ingest via [`Database::bulk_import`].
#[derive(Debug, Clone)]
pub struct BulkEdgeInput {
    pub src_label: String,
    pub src_user: String,
    pub dst_label: String,
    pub dst_user: String,
    pub elabel: String,
    pub weight: f32,
    pub attrs: Vec<(String, PropertyValue)>,
}

const NUM_EDGES_FILE: &str = "num_edges";

/// An open property graph database.
///
/// Writes (`add_edge`, `set_*_attr`, `delete_*`, schema mutations, bulk
/// import) are serialized through `write_lock`: one writer at a time per
/// database. Reads go straight to the shard tree and query engine, which use
/// their own internal synchronization and never block on a writer holding
/// `write_lock`.
pub struct Database {
    env: Arc<dyn Env>,
    root: PathBuf,
    _lock: Mutex<Box<dyn FileLock>>,
    id_encoder: Arc<dyn IdEncoder>,
    schema: Arc<SchemaRegistry>,
    vattr: Arc<VertexAttributeStore>,
    tree: Arc<ShardTree>,
    query: QueryEngine,
    write_lock: Mutex<()>,
    num_edges: AtomicU64,
}

fn edge_label_key(elabel: &str, src_label: &str, dst_label: &str) -> String {
    format!("{elabel}\u{1}{src_label}\u{1}{dst_label}")
}

fn tag_set(tags: Option<&[Tag]>) -> Option<HashSet<Tag>> {
    tags.map(|t| t.iter().copied().collect())
}

impl Database {
    /// Open (creating if absent) the database rooted at `root`, with
    /// options read from `SKG_*` environment variables.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_options(root, SkgOptions::from_env())
    }

    /// Open (creating if absent) the database rooted at `root` with
    /// explicit options.
    pub fn open_with_options(root: impl AsRef<Path>, options: SkgOptions) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let env: Arc<dyn Env> = Arc::new(PosixEnv::new());
        env.create_dir_all(&root)?;
        let lock = env.lock_file(&root.join("LOCK"))?;

        let id_encoder: Arc<dyn IdEncoder> =
            Arc::new(StringIdEncoder::open(Arc::clone(&env), &root.join("id_mapping"))?);
        let schema = Arc::new(SchemaRegistry::open(Arc::clone(&env), &root.join("meta"))?);
        let vattr = Arc::new(VertexAttributeStore::open(
            Arc::clone(&env),
            &root.join("vdata"),
            &root.join("meta").join("num_vertices"),
        )?);
        let tree = Arc::new(ShardTree::open(
            Arc::clone(&env),
            root.join("shard_0"),
            options.clone(),
        )?);
        let query = QueryEngine::new(options.query_threads);
        let num_edges = AtomicU64::new(read_num_edges(&env, &root)?);

        tracing::info!(root = %root.display(), "opened database");
        Ok(Self {
            env,
            root,
            _lock: Mutex::new(lock),
            id_encoder,
            schema,
            vattr,
            tree,
            query,
            write_lock: Mutex::new(()),
            num_edges,
        })
    }

    // ---- schema ---------------------------------------------------------

    pub fn create_vertex_label(&self, label: &str) -> Result<Tag> {
        let _guard = self.write_lock.lock().expect("write lock poisoned");
        self.schema.add_vertex_label(label)
    }

    pub fn create_edge_label(&self, elabel: &str, src_label: &str, dst_label: &str) -> Result<Tag> {
        let _guard = self.write_lock.lock().expect("write lock poisoned");
        self.schema
            .add_edge_label(&edge_label_key(elabel, src_label, dst_label))
    }

    pub fn add_vertex_column(&self, label: &str, column: ColumnDescriptor) -> Result<()> {
        let _guard = self.write_lock.lock().expect("write lock poisoned");
        self.schema.add_vertex_column(label, column)
    }

    pub fn add_edge_column(&self, elabel: &str, src_label: &str, dst_label: &str, column: ColumnDescriptor) -> Result<()> {
        let _guard = self.write_lock.lock().expect("write lock poisoned");
        self.schema
            .add_edge_column(&edge_label_key(elabel, src_label, dst_label), column)
    }

    pub fn delete_edge_column(&self, elabel: &str, src_label: &str, dst_label: &str, name: &str) -> Result<()> {
        let _guard = self.write_lock.lock().expect("write lock poisoned");
        self.schema
            .delete_edge_column(&edge_label_key(elabel, src_label, dst_label), name)
    }

    // ---- vertex lifecycle -------------------------------------------------

    fn resolve_vertex_locked(&self, label: &str, user_id: &str, create: bool) -> Result<Vid> {
        match self.id_encoder.string_id(user_id, false) {
            Ok(vid) => Ok(vid),
            Err(Error::NotFound) if create => {
                let tag = self.schema.vertex_label_tag(label).ok_or(Error::NotFound)?;
                let vid = self.id_encoder.string_id(user_id, true)?;
                self.vattr.update_max_vid(vid, tag)?;
                Ok(vid)
            }
            Err(e) => Err(e),
        }
    }

    /// Explicitly create a vertex under `label`, auto-assigning a vid.
    pub fn add_vertex(&self, label: &str, user_id: &str) -> Result<()> {
        let _guard = self.write_lock.lock().expect("write lock poisoned");
        self.resolve_vertex_locked(label, user_id, true)?;
        Ok(())
    }

    /// Tombstone a vertex and every edge incident to it, in either direction.
    pub fn delete_vertex(&self, user_id: &str) -> Result<()> {
        let _guard = self.write_lock.lock().expect("write lock poisoned");
        let vid = self.id_encoder.string_id(user_id, false)?;
        let out = self.tree.out_edges(vid, None);
        for e in &out {
            self.tree.tombstone(e.src, e.dst, e.tag)?;
        }
        let inn = self.tree.in_edges(vid, None)?;
        for e in &inn {
            self.tree.tombstone(e.src, e.dst, e.tag)?;
        }
        let removed = (out.len() + inn.len()) as u64;
        if removed > 0 {
            self.num_edges.fetch_sub(removed, Ordering::SeqCst);
        }
        self.vattr.delete_vertex(vid)?;
        self.id_encoder.delete(user_id)?;
        Ok(())
    }

    pub fn has_vertex(&self, user_id: &str) -> bool {
        match self.id_encoder.string_id(user_id, false) {
            Ok(vid) => self.vattr.has_vertex(vid),
            Err(_) => false,
        }
    }

    pub fn set_vertex_attr(&self, user_id: &str, column: &str, value: PropertyValue) -> Result<()> {
        let _guard = self.write_lock.lock().expect("write lock poisoned");
        let vid = self.id_encoder.string_id(user_id, false)?;
        self.vattr.set_attr(vid, column, value)
    }

    pub fn get_vertex_attr(&self, user_id: &str, column: &str) -> Result<Option<PropertyValue>> {
        let vid = self.id_encoder.string_id(user_id, false)?;
        self.vattr.get_attr(vid, column)
    }

    // ---- edge lifecycle ----------------------------------------------------

    /// Add (or, if the `(src, dst, elabel)` triple already exists, update)
    /// an edge. Rejects self-loops before acquiring the write lock or
    /// resolving either endpoint, matching the "before touching storage"
    /// rule: same-string endpoints always resolve to the same vid, so the
    /// string comparison alone is sufficient.
    #[allow(clippy::too_many_arguments)]
    pub fn add_edge(
        &self,
        src_user: &str,
        src_label: &str,
        dst_user: &str,
        dst_label: &str,
        elabel: &str,
        weight: f32,
        attrs: Vec<(String, PropertyValue)>,
        create_if_not_exist: bool,
    ) -> Result<()> {
        if src_user == dst_user {
            return Err(Error::UnsupportedSelfLoop);
        }
        let _guard = self.write_lock.lock().expect("write lock poisoned");
        let src_vid = self.resolve_vertex_locked(src_label, src_user, create_if_not_exist)?;
        let dst_vid = self.resolve_vertex_locked(dst_label, dst_user, create_if_not_exist)?;
        let tag = self
            .schema
            .edge_label_tag(&edge_label_key(elabel, src_label, dst_label))
            .ok_or(Error::NotFound)?;
        let is_new = self.tree.find(src_vid, dst_vid, tag)?.is_none();
        self.tree.insert(MemoryEdge {
            src: src_vid,
            dst: dst_vid,
            tag,
            weight,
            properties: attrs,
            tombstoned: false,
        })?;
        if is_new {
            self.num_edges.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn set_edge_attr(
        &self,
        src_user: &str,
        src_label: &str,
        dst_user: &str,
        dst_label: &str,
        elabel: &str,
        updates: Vec<(String, PropertyValue)>,
    ) -> Result<()> {
        if src_user == dst_user {
            return Err(Error::UnsupportedSelfLoop);
        }
        let _guard = self.write_lock.lock().expect("write lock poisoned");
        let src_vid = self.id_encoder.string_id(src_user, false)?;
        let dst_vid = self.id_encoder.string_id(dst_user, false)?;
        let tag = self
            .schema
            .edge_label_tag(&edge_label_key(elabel, src_label, dst_label))
            .ok_or(Error::NotFound)?;
        let existing = self.tree.find(src_vid, dst_vid, tag)?.ok_or(Error::NotFound)?;
        let mut properties = existing.properties;
        for (name, value) in updates {
            if let Some(slot) = properties.iter_mut().find(|(n, _)| n == &name) {
                slot.1 = value;
            } else {
                properties.push((name, value));
            }
        }
        self.tree.insert(MemoryEdge {
            src: src_vid,
            dst: dst_vid,
            tag,
            weight: existing.weight,
            properties,
            tombstoned: false,
        })
    }

    pub fn get_edge_attr(
        &self,
        src_user: &str,
        dst_user: &str,
        elabel: &str,
        src_label: &str,
        dst_label: &str,
    ) -> Result<Option<EdgeView>> {
        let src_vid = self.id_encoder.string_id(src_user, false)?;
        let dst_vid = self.id_encoder.string_id(dst_user, false)?;
        let tag = self
            .schema
            .edge_label_tag(&edge_label_key(elabel, src_label, dst_label))
            .ok_or(Error::NotFound)?;
        let rec = self.tree.find(src_vid, dst_vid, tag)?;
        Ok(rec.map(|r| EdgeView {
            src: src_user.to_string(),
            dst: dst_user.to_string(),
            label: Some(elabel.to_string()),
            weight: r.weight,
            properties: r.properties,
        }))
    }

    pub fn delete_edge(
        &self,
        src_user: &str,
        dst_user: &str,
        elabel: &str,
        src_label: &str,
        dst_label: &str,
    ) -> Result<()> {
        let _guard = self.write_lock.lock().expect("write lock poisoned");
        let src_vid = self.id_encoder.string_id(src_user, false)?;
        let dst_vid = self.id_encoder.string_id(dst_user, false)?;
        let tag = self
            .schema
            .edge_label_tag(&edge_label_key(elabel, src_label, dst_label))
            .ok_or(Error::NotFound)?;
        let existed = self.tree.find(src_vid, dst_vid, tag)?.is_some();
        self.tree.tombstone(src_vid, dst_vid, tag)?;
        if existed {
            self.num_edges.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }

    pub fn has_edge_between(&self, src_user: &str, dst_user: &str) -> Result<bool> {
        let src_vid = self.id_encoder.string_id(src_user, false)?;
        let dst_vid = self.id_encoder.string_id(dst_user, false)?;
        Ok(self.tree.out_edges(src_vid, None).iter().any(|e| e.dst == dst_vid))
    }

    // ---- bulk import --------------------------------------------------------

    /// Ingest a batch of edges under one write-lock acquisition, resolving
    /// (and auto-creating) endpoints and returning the number of previously
    /// unseen `(src, dst, elabel)` triples inserted.
    ///
    /// This is the incremental path for an always-open `Database`; the
    /// three-phase external sorter in `skg_storage::bulk` remains available
    /// separately for building a fresh on-disk shard layout from a large
    /// unsorted edge stream ahead of ever opening a `Database` against it
    /// (see `DESIGN.md`'s Open Question decisions).
    pub fn bulk_import(&self, edges: Vec<BulkEdgeInput>) -> Result<usize> {
        let _guard = self.write_lock.lock().expect("write lock poisoned");
        let mut inserted = 0usize;
        for edge in edges {
            if edge.src_user == edge.dst_user {
                return Err(Error::UnsupportedSelfLoop);
            }
            let src_vid = self.resolve_vertex_locked(&edge.src_label, &edge.src_user, true)?;
            let dst_vid = self.resolve_vertex_locked(&edge.dst_label, &edge.dst_user, true)?;
            let tag = self
                .schema
                .edge_label_tag(&edge_label_key(&edge.elabel, &edge.src_label, &edge.dst_label))
                .ok_or(Error::NotFound)?;
            let is_new = self.tree.find(src_vid, dst_vid, tag)?.is_none();
            self.tree.insert(MemoryEdge {
                src: src_vid,
                dst: dst_vid,
                tag,
                weight: edge.weight,
                properties: edge.attrs,
                tombstoned: false,
            })?;
            if is_new {
                inserted += 1;
            }
        }
        self.num_edges.fetch_add(inserted as u64, Ordering::SeqCst);
        tracing::debug!(inserted, "bulk import complete");
        Ok(inserted)
    }

    // ---- neighborhood queries ------------------------------------------------

    fn to_edge_view(&self, e: EdgeRecord) -> Result<EdgeView> {
        Ok(EdgeView {
            src: self.id_encoder.vid_to_string(e.src)?,
            dst: self.id_encoder.vid_to_string(e.dst)?,
            label: self.schema.edge_tag_label(e.tag),
            weight: e.weight,
            properties: e.properties,
        })
    }

    pub fn get_out_vertices(&self, user_id: &str, nlimit: Option<usize>) -> Result<Vec<String>> {
        let vid = self.id_encoder.string_id(user_id, false)?;
        let edges = self
            .query
            .get_out_edges(std::slice::from_ref(&self.tree), vid, None, nlimit)?;
        edges.into_iter().map(|e| self.id_encoder.vid_to_string(e.dst)).collect()
    }

    pub fn get_in_vertices(&self, user_id: &str, nlimit: Option<usize>) -> Result<Vec<String>> {
        let vid = self.id_encoder.string_id(user_id, false)?;
        let edges = self.query.get_in_edges(&self.tree, vid, None, nlimit)?;
        edges.into_iter().map(|e| self.id_encoder.vid_to_string(e.src)).collect()
    }

    pub fn get_out_edges(&self, user_id: &str, nlimit: Option<usize>) -> Result<Vec<EdgeView>> {
        let vid = self.id_encoder.string_id(user_id, false)?;
        let edges = self
            .query
            .get_out_edges(std::slice::from_ref(&self.tree), vid, None, nlimit)?;
        edges.into_iter().map(|e| self.to_edge_view(e)).collect()
    }

    pub fn get_in_edges(&self, user_id: &str, nlimit: Option<usize>) -> Result<Vec<EdgeView>> {
        let vid = self.id_encoder.string_id(user_id, false)?;
        let edges = self.query.get_in_edges(&self.tree, vid, None, nlimit)?;
        edges.into_iter().map(|e| self.to_edge_view(e)).collect()
    }

    pub fn num_edges(&self) -> u64 {
        self.num_edges.load(Ordering::SeqCst)
    }

    pub fn num_vertices(&self) -> usize {
        self.vattr.num_vertices()
    }

    // ---- path queries --------------------------------------------------------

    fn translate_path_envelope(&self, envelope: skg_traverse::Envelope<Vec<Vid>>) -> Result<PathEnvelope> {
        let mut data = Vec::with_capacity(envelope.data.len());
        for path in envelope.data {
            let mut parts = Vec::with_capacity(path.len());
            for vid in path {
                parts.push(format!("v:{}", self.id_encoder.vid_to_string(vid)?));
            }
            data.push(parts.join(" -e-> "));
        }
        Ok(PathEnvelope {
            code: envelope.code,
            msg: envelope.msg,
            data,
        })
    }

    fn translate_vid_envelope(&self, envelope: skg_traverse::Envelope<Vid>) -> Result<VertexEnvelope> {
        let mut data = Vec::with_capacity(envelope.data.len());
        for vid in envelope.data {
            data.push(self.id_encoder.vid_to_string(vid)?);
        }
        Ok(VertexEnvelope {
            code: envelope.code,
            msg: envelope.msg,
            data,
        })
    }

    pub fn shortest_path(
        &self,
        src_user: &str,
        dst_user: &str,
        max_depth: u32,
        labels: Option<&[Tag]>,
        budget: Budget,
    ) -> Result<PathEnvelope> {
        let src_vid = self.id_encoder.string_id(src_user, false)?;
        let dst_vid = self.id_encoder.string_id(dst_user, false)?;
        let label_set = tag_set(labels);
        let envelope = skg_traverse::shortest_path(self, src_vid, dst_vid, max_depth, label_set.as_ref(), budget);
        self.translate_path_envelope(envelope)
    }

    pub fn all_paths(
        &self,
        src_user: &str,
        dst_user: &str,
        max_depth: u32,
        labels: Option<&[Tag]>,
        budget: Budget,
    ) -> Result<PathEnvelope> {
        let src_vid = self.id_encoder.string_id(src_user, false)?;
        let dst_vid = self.id_encoder.string_id(dst_user, false)?;
        let label_set = tag_set(labels);
        let envelope = skg_traverse::all_paths(self, src_vid, dst_vid, max_depth, label_set.as_ref(), budget);
        self.translate_path_envelope(envelope)
    }

    pub fn k_out(&self, src_user: &str, k: u32, labels: Option<&[Tag]>, budget: Budget) -> Result<VertexEnvelope> {
        let src_vid = self.id_encoder.string_id(src_user, false)?;
        let label_set = tag_set(labels);
        let envelope = skg_traverse::k_out(self, src_vid, k, label_set.as_ref(), budget);
        self.translate_vid_envelope(envelope)
    }

    /// Same traversal as [`Database::k_out`], but only the reached-vertex
    /// count is wanted; the caller reads `VertexEnvelope::data.len()`.
    pub fn k_out_size(&self, src_user: &str, k: u32, labels: Option<&[Tag]>, budget: Budget) -> Result<VertexEnvelope> {
        self.k_out(src_user, k, labels, budget)
    }

    pub fn k_neighbor(&self, src_user: &str, k: u32, labels: Option<&[Tag]>, budget: Budget) -> Result<VertexEnvelope> {
        let src_vid = self.id_encoder.string_id(src_user, false)?;
        let label_set = tag_set(labels);
        let envelope = skg_traverse::k_neighbor(self, src_vid, k, label_set.as_ref(), budget);
        self.translate_vid_envelope(envelope)
    }

    // ---- lifecycle -------------------------------------------------------

    pub fn flush(&self) -> Result<()> {
        let _guard = self.write_lock.lock().expect("write lock poisoned");
        let columns = self.schema.all_edge_columns();
        self.tree.flush(&columns, true)?;
        self.schema.flush()?;
        self.vattr.flush()?;
        self.id_encoder.flush()?;
        persist_num_edges(&self.env, &self.root, self.num_edges.load(Ordering::SeqCst))?;
        tracing::debug!("database flushed");
        Ok(())
    }

    pub fn close(self) -> Result<()> {
        self.flush()?;
        self.id_encoder.close()?;
        tracing::info!(root = %self.root.display(), "closed database");
        Ok(())
    }

    /// Flush, then delete the entire database directory. Irreversible.
    pub fn drop_database(self) -> Result<()> {
        self.flush()?;
        let root = self.root.clone();
        let env = Arc::clone(&self.env);
        drop(self);
        env.remove_dir_all(&root)
    }

    /// Flush, then copy every file under the database root into `dir`.
    pub fn export_data(&self, dir: &Path) -> Result<()> {
        self.flush()?;
        copy_tree(&self.env, &self.root, dir)
    }
}

impl Adjacency for Database {
    fn out_neighbors(&self, vid: Vid, label_tag: Option<Tag>) -> Result<Vec<EdgeRecord>> {
        self.query
            .get_out_edges(std::slice::from_ref(&self.tree), vid, label_tag, None)
    }

    fn in_neighbors(&self, vid: Vid, label_tag: Option<Tag>) -> Result<Vec<EdgeRecord>> {
        self.query.get_in_edges(&self.tree, vid, label_tag, None)
    }
}

fn copy_tree(env: &Arc<dyn Env>, src: &Path, dst: &Path) -> Result<()> {
    env.create_dir_all(dst)?;
    for entry in env.list_dir(src)? {
        let Some(name) = entry.file_name() else { continue };
        let target = dst.join(name);
        if entry.is_dir() {
            copy_tree(env, &entry, &target)?;
        } else {
            let size = env.file_size(&entry)?;
            let reader = env.new_random_access_file(&entry)?;
            let mut buf = vec![0u8; size as usize];
            reader.read_at(0, &mut buf)?;
            let mut writer = env.new_writable_file(&target)?;
            writer.append(&buf)?;
            writer.sync()?;
        }
    }
    Ok(())
}

fn read_num_edges(env: &Arc<dyn Env>, root: &Path) -> Result<u64> {
    let path = root.join(NUM_EDGES_FILE);
    if !env.file_exists(&path) {
        return Ok(0);
    }
    let size = env.file_size(&path)?;
    if size < 8 {
        return Ok(0);
    }
    let file = env.new_random_access_file(&path)?;
    let mut buf = [0u8; 8];
    file.read_at(0, &mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn persist_num_edges(env: &Arc<dyn Env>, root: &Path, count: u64) -> Result<()> {
    let path = root.join(NUM_EDGES_FILE);
    let tmp = path.with_extension("tmp");
    {
        let mut w = env.new_writable_file(&tmp)?;
        w.append(&count.to_le_bytes())?;
        w.sync()?;
    }
    env.rename(&tmp, &path)
}
