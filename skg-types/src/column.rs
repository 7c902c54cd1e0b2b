use serde::{Deserialize, Serialize};

/// Storage type of a property column. `Group` is a composite locality group
/// rather than a scalar column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    Tag,
    Weight,
    Int32,
    Int64,
    Float32,
    Float64,
    FixedBytes(u16),
    Time,
    Varchar,
    Group,
}

impl ColumnType {
    /// Fixed encoded width in bytes, or `None` for variable-length types.
    pub fn fixed_width(&self) -> Option<usize> {
        match self {
            ColumnType::Tag => Some(1),
            ColumnType::Weight => Some(4),
            ColumnType::Int32 => Some(4),
            ColumnType::Int64 => Some(8),
            ColumnType::Float32 => Some(4),
            ColumnType::Float64 => Some(8),
            ColumnType::FixedBytes(n) => Some(*n as usize),
            ColumnType::Time => Some(8),
            ColumnType::Varchar | ColumnType::Group => None,
        }
    }
}

/// Identifies an edge relation type by its endpoint labels: the edge label
/// plus the `(src_label, dst_label)` pair it connects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EdgeLabel {
    pub edge_label: String,
    pub src_label: String,
    pub dst_label: String,
}

impl EdgeLabel {
    pub fn new(edge_label: impl Into<String>, src_label: impl Into<String>, dst_label: impl Into<String>) -> Self {
        Self {
            edge_label: edge_label.into(),
            src_label: src_label.into(),
            dst_label: dst_label.into(),
        }
    }
}

/// One declared property column on a vertex or edge label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    pub col_type: ColumnType,
    /// Index of the locality group this column belongs to, if any.
    pub group: Option<u16>,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, col_type: ColumnType) -> Self {
        Self { name: name.into(), col_type, group: None }
    }
}
