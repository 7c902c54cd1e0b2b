//! Label and column schema registry, persisted as the `vertex_attr_conf` and
//! `edge_attr_conf` JSON documents under a database's `meta/` directory.

use crate::env::Env;
use serde::{Deserialize, Serialize};
use skg_types::{ColumnDescriptor, ColumnType, Error, Result, Tag, MAX_PROPERTIES_BYTES, MAX_PROPERTIES_SIZE};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct LabelSchema {
    tag: Tag,
    columns: Vec<ColumnDescriptor>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct RegistryDoc {
    labels: HashMap<String, LabelSchema>,
    next_tag: Tag,
}

struct State {
    vertex: RegistryDoc,
    edge: RegistryDoc,
}

/// Holds the vertex and edge label→column schemas for one database, read
/// once at open and kept in memory behind a lock the same way the vertex-id
/// encoders are, with atomic write-to-temp-then-rename persistence on every
/// schema mutation.
pub struct SchemaRegistry {
    state: RwLock<State>,
    vertex_path: PathBuf,
    edge_path: PathBuf,
    env: Arc<dyn Env>,
}

impl SchemaRegistry {
    pub fn open(env: Arc<dyn Env>, meta_dir: &Path) -> Result<Self> {
        env.create_dir_all(meta_dir)?;
        let vertex_path = meta_dir.join("vertex_attr_conf");
        let edge_path = meta_dir.join("edge_attr_conf");
        let vertex = load_doc(&env, &vertex_path)?;
        let edge = load_doc(&env, &edge_path)?;
        Ok(Self {
            state: RwLock::new(State { vertex, edge }),
            vertex_path,
            edge_path,
            env,
        })
    }

    pub fn add_vertex_label(&self, label: &str) -> Result<Tag> {
        let mut state = self.state.write().expect("schema lock poisoned");
        add_label(&mut state.vertex, label)
    }

    pub fn add_edge_label(&self, label: &str) -> Result<Tag> {
        let mut state = self.state.write().expect("schema lock poisoned");
        add_label(&mut state.edge, label)
    }

    pub fn vertex_label_tag(&self, label: &str) -> Option<Tag> {
        self.state
            .read()
            .expect("schema lock poisoned")
            .vertex
            .labels
            .get(label)
            .map(|s| s.tag)
    }

    pub fn edge_label_tag(&self, label: &str) -> Option<Tag> {
        self.state
            .read()
            .expect("schema lock poisoned")
            .edge
            .labels
            .get(label)
            .map(|s| s.tag)
    }

    pub fn vertex_tag_label(&self, tag: Tag) -> Option<String> {
        label_for_tag(&self.state.read().expect("schema lock poisoned").vertex, tag)
    }

    pub fn edge_tag_label(&self, tag: Tag) -> Option<String> {
        label_for_tag(&self.state.read().expect("schema lock poisoned").edge, tag)
    }

    pub fn add_vertex_column(&self, label: &str, column: ColumnDescriptor) -> Result<()> {
        let mut state = self.state.write().expect("schema lock poisoned");
        add_column(&mut state.vertex, label, column)
    }

    pub fn add_edge_column(&self, label: &str, column: ColumnDescriptor) -> Result<()> {
        if matches!(column.col_type, ColumnType::Varchar) {
            return Err(Error::NotSupported("edge labels cannot declare VARCHAR columns"));
        }
        let mut state = self.state.write().expect("schema lock poisoned");
        add_column(&mut state.edge, label, column)
    }

    pub fn delete_edge_column(&self, label: &str, name: &str) -> Result<()> {
        let mut state = self.state.write().expect("schema lock poisoned");
        let schema = state
            .edge
            .labels
            .get_mut(label)
            .ok_or(Error::NotFound)?;
        let before = schema.columns.len();
        schema.columns.retain(|c| c.name != name);
        if schema.columns.len() == before {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    /// Columns on `label` whose names appear in `requested`, preserving
    /// declaration order; used to resolve a query's requested column list
    /// against what is actually present on a label.
    pub fn match_query_columns(&self, label: &str, requested: &[String]) -> Vec<ColumnDescriptor> {
        let state = self.state.read().expect("schema lock poisoned");
        let Some(schema) = state.edge.labels.get(label) else {
            return Vec::new();
        };
        schema
            .columns
            .iter()
            .filter(|c| requested.iter().any(|r| r == &c.name))
            .cloned()
            .collect()
    }

    /// The union of every column declared on any edge label, deduped by
    /// name, in first-declared order. Used to build the flat column list
    /// `ShardTree::flush` and `bulk_load` expect, since those storage-layer
    /// entry points operate on one global property layout rather than a
    /// per-label one.
    pub fn all_edge_columns(&self) -> Vec<ColumnDescriptor> {
        let state = self.state.read().expect("schema lock poisoned");
        let mut out: Vec<ColumnDescriptor> = Vec::new();
        for schema in state.edge.labels.values() {
            for column in &schema.columns {
                if !out.iter().any(|c: &ColumnDescriptor| c.name == column.name) {
                    out.push(column.clone());
                }
            }
        }
        out
    }

    pub fn flush(&self) -> Result<()> {
        let state = self.state.read().expect("schema lock poisoned");
        persist_doc(&self.env, &self.vertex_path, &state.vertex)?;
        persist_doc(&self.env, &self.edge_path, &state.edge)
    }
}

fn label_for_tag(doc: &RegistryDoc, tag: Tag) -> Option<String> {
    doc.labels
        .iter()
        .find(|(_, schema)| schema.tag == tag)
        .map(|(name, _)| name.clone())
}

fn add_label(doc: &mut RegistryDoc, label: &str) -> Result<Tag> {
    if let Some(schema) = doc.labels.get(label) {
        return Ok(schema.tag);
    }
    let tag = doc.next_tag;
    doc.next_tag = doc.next_tag.checked_add(1).ok_or(Error::NoSpace)?;
    doc.labels.insert(
        label.to_string(),
        LabelSchema {
            tag,
            columns: Vec::new(),
        },
    );
    Ok(tag)
}

fn add_column(doc: &mut RegistryDoc, label: &str, column: ColumnDescriptor) -> Result<()> {
    let schema = doc
        .labels
        .get_mut(label)
        .ok_or(Error::NotFound)?;
    if schema.columns.iter().any(|c| c.name == column.name) {
        return Err(Error::AlreadyExists);
    }
    if schema.columns.len() >= MAX_PROPERTIES_SIZE {
        return Err(Error::NotSupported("label already has the maximum number of columns"));
    }
    let projected_bytes: usize = schema
        .columns
        .iter()
        .chain(std::iter::once(&column))
        .map(|c| c.col_type.fixed_width().unwrap_or(0))
        .sum();
    if projected_bytes > MAX_PROPERTIES_BYTES {
        return Err(Error::NotSupported("column would push the label past its row byte budget"));
    }
    schema.columns.push(column);
    Ok(())
}

fn load_doc(env: &Arc<dyn Env>, path: &Path) -> Result<RegistryDoc> {
    if !env.file_exists(path) {
        return Ok(RegistryDoc::default());
    }
    let size = env.file_size(path)?;
    if size == 0 {
        return Ok(RegistryDoc::default());
    }
    let file = env.new_random_access_file(path)?;
    let mut buf = vec![0u8; size as usize];
    file.read_at(0, &mut buf)?;
    serde_json::from_slice(&buf)
        .map_err(|e| Error::InvalidArgument(format!("corrupt schema document: {e}")))
}

fn persist_doc(env: &Arc<dyn Env>, path: &Path, doc: &RegistryDoc) -> Result<()> {
    let tmp = path.with_extension("tmp");
    let bytes = serde_json::to_vec_pretty(doc)
        .map_err(|e| Error::InvalidArgument(format!("failed to serialize schema: {e}")))?;
    {
        let mut w = env.new_writable_file(&tmp)?;
        w.append(&bytes)?;
        w.sync()?;
    }
    env.rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::PosixEnv;

    #[test]
    fn add_label_is_idempotent_and_returns_same_tag() {
        let dir = tempfile::tempdir().unwrap();
        let env: Arc<dyn Env> = Arc::new(PosixEnv::new());
        let reg = SchemaRegistry::open(env, dir.path()).unwrap();
        let a = reg.add_vertex_label("person").unwrap();
        let b = reg.add_vertex_label("person").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn schema_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let env: Arc<dyn Env> = Arc::new(PosixEnv::new());
        let reg = SchemaRegistry::open(Arc::clone(&env), dir.path()).unwrap();
        reg.add_edge_label("follows").unwrap();
        reg.add_edge_column("follows", ColumnDescriptor::new("since", ColumnType::Time))
            .unwrap();
        reg.flush().unwrap();

        let reopened = SchemaRegistry::open(env, dir.path()).unwrap();
        assert!(reopened.edge_label_tag("follows").is_some());
        let cols = reopened.match_query_columns("follows", &["since".to_string()]);
        assert_eq!(cols.len(), 1);
    }

    #[test]
    fn column_count_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let env: Arc<dyn Env> = Arc::new(PosixEnv::new());
        let reg = SchemaRegistry::open(env, dir.path()).unwrap();
        reg.add_edge_label("e").unwrap();
        for i in 0..MAX_PROPERTIES_SIZE {
            reg.add_edge_column("e", ColumnDescriptor::new(format!("c{i}"), ColumnType::Tag))
                .unwrap();
        }
        assert!(reg
            .add_edge_column("e", ColumnDescriptor::new("overflow", ColumnType::Tag))
            .is_err());
    }

    #[test]
    fn all_edge_columns_dedups_by_name_across_labels() {
        let dir = tempfile::tempdir().unwrap();
        let env: Arc<dyn Env> = Arc::new(PosixEnv::new());
        let reg = SchemaRegistry::open(env, dir.path()).unwrap();
        reg.add_edge_label("follows").unwrap();
        reg.add_edge_label("likes").unwrap();
        reg.add_edge_column("follows", ColumnDescriptor::new("since", ColumnType::Time))
            .unwrap();
        reg.add_edge_column("likes", ColumnDescriptor::new("since", ColumnType::Time))
            .unwrap();
        reg.add_edge_column("likes", ColumnDescriptor::new("weight", ColumnType::Weight))
            .unwrap();
        let columns = reg.all_edge_columns();
        assert_eq!(columns.iter().filter(|c| c.name == "since").count(), 1);
        assert_eq!(columns.len(), 2);
    }

    #[test]
    fn delete_column_requires_existing_column() {
        let dir = tempfile::tempdir().unwrap();
        let env: Arc<dyn Env> = Arc::new(PosixEnv::new());
        let reg = SchemaRegistry::open(env, dir.path()).unwrap();
        reg.add_edge_label("e").unwrap();
        assert!(reg.delete_edge_column("e", "missing").is_err());
        reg.add_edge_column("e", ColumnDescriptor::new("w", ColumnType::Weight))
            .unwrap();
        reg.delete_edge_column("e", "w").unwrap();
        assert!(reg.delete_edge_column("e", "w").is_err());
    }
}
