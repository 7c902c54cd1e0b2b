//! Per-column property block files. Fixed-width columns are a dense array,
//! one slot per record ordinal; `Varchar` columns are length-prefixed blobs
//! addressed by a parallel dense `(offset, len)` directory.

use crate::env::Env;
use skg_types::{ColumnType, Error, PropertyValue, Result};
use std::path::Path;
use std::sync::Arc;

pub fn write_fixed_column(
    env: &Arc<dyn Env>,
    path: &Path,
    col_type: ColumnType,
    values: &[Option<PropertyValue>],
) -> Result<()> {
    let width = col_type
        .fixed_width()
        .ok_or_else(|| Error::InvalidArgument("column has no fixed width".into()))?;
    let mut buf = vec![0u8; values.len() * width];
    for (i, value) in values.iter().enumerate() {
        if let Some(v) = value {
            let encoded = v.encode();
            // Skip the value's own 1-byte type tag; column blocks are
            // homogeneously typed so the tag is redundant and dropped.
            let payload = &encoded[1..];
            let len = payload.len().min(width);
            buf[i * width..i * width + len].copy_from_slice(&payload[..len]);
        }
    }
    let mut w = env.new_writable_file(path)?;
    w.append(&buf)?;
    w.sync()
}

pub fn read_fixed_column(
    env: &Arc<dyn Env>,
    path: &Path,
    col_type: ColumnType,
    record_index: u32,
) -> Result<Option<PropertyValue>> {
    let width = col_type
        .fixed_width()
        .ok_or_else(|| Error::InvalidArgument("column has no fixed width".into()))?;
    let file = env.new_random_access_file(path)?;
    let offset = record_index as u64 * width as u64;
    let mut buf = vec![0u8; width];
    file.read_at(offset, &mut buf)?;
    Ok(decode_typed(col_type, &buf))
}

fn decode_typed(col_type: ColumnType, payload: &[u8]) -> Option<PropertyValue> {
    match col_type {
        ColumnType::Int32 => Some(PropertyValue::Int32(i32::from_le_bytes(
            payload[0..4].try_into().ok()?,
        ))),
        ColumnType::Int64 => Some(PropertyValue::Int64(i64::from_le_bytes(
            payload[0..8].try_into().ok()?,
        ))),
        ColumnType::Float32 | ColumnType::Weight => Some(PropertyValue::Float32(f32::from_le_bytes(
            payload[0..4].try_into().ok()?,
        ))),
        ColumnType::Float64 => Some(PropertyValue::Float64(f64::from_le_bytes(
            payload[0..8].try_into().ok()?,
        ))),
        ColumnType::Time => Some(PropertyValue::Time(i64::from_le_bytes(
            payload[0..8].try_into().ok()?,
        ))),
        ColumnType::FixedBytes(n) => Some(PropertyValue::FixedBytes(payload[..n as usize].to_vec())),
        ColumnType::Tag => Some(PropertyValue::Int32(payload[0] as i32)),
        ColumnType::Varchar | ColumnType::Group => None,
    }
}

/// Writes a dense directory of `(offset, len)` pairs plus the concatenated
/// string bytes, for `Varchar` columns.
pub fn write_varchar_column(
    env: &Arc<dyn Env>,
    dir_path: &Path,
    blob_path: &Path,
    values: &[Option<String>],
) -> Result<()> {
    let mut dir_buf = Vec::with_capacity(values.len() * 8);
    let mut blob = Vec::new();
    for value in values {
        let (offset, len) = match value {
            Some(s) => {
                let offset = blob.len() as u32;
                blob.extend_from_slice(s.as_bytes());
                (offset, s.len() as u32)
            }
            None => (0, u32::MAX),
        };
        dir_buf.extend_from_slice(&offset.to_le_bytes());
        dir_buf.extend_from_slice(&len.to_le_bytes());
    }
    let mut w = env.new_writable_file(dir_path)?;
    w.append(&dir_buf)?;
    w.sync()?;
    let mut w = env.new_writable_file(blob_path)?;
    w.append(&blob)?;
    w.sync()
}

pub fn read_varchar_column(
    env: &Arc<dyn Env>,
    dir_path: &Path,
    blob_path: &Path,
    record_index: u32,
) -> Result<Option<PropertyValue>> {
    let dir_file = env.new_random_access_file(dir_path)?;
    let mut entry = [0u8; 8];
    dir_file.read_at(record_index as u64 * 8, &mut entry)?;
    let offset = u32::from_le_bytes(entry[0..4].try_into().unwrap());
    let len = u32::from_le_bytes(entry[4..8].try_into().unwrap());
    if len == u32::MAX {
        return Ok(None);
    }
    let blob_file = env.new_random_access_file(blob_path)?;
    let mut buf = vec![0u8; len as usize];
    blob_file.read_at(offset as u64, &mut buf)?;
    let s = String::from_utf8(buf)
        .map_err(|_| Error::InvalidArgument("corrupt varchar column block".into()))?;
    Ok(Some(PropertyValue::Varchar(s)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::PosixEnv;

    #[test]
    fn fixed_column_round_trip_with_nulls() {
        let dir = tempfile::tempdir().unwrap();
        let env: Arc<dyn Env> = Arc::new(PosixEnv::new());
        let path = dir.path().join("col").join("age");
        env.create_dir_all(path.parent().unwrap()).unwrap();
        let values = vec![
            Some(PropertyValue::Int32(10)),
            None,
            Some(PropertyValue::Int32(-5)),
        ];
        write_fixed_column(&env, &path, ColumnType::Int32, &values).unwrap();
        assert_eq!(
            read_fixed_column(&env, &path, ColumnType::Int32, 0).unwrap(),
            Some(PropertyValue::Int32(10))
        );
        assert_eq!(
            read_fixed_column(&env, &path, ColumnType::Int32, 1).unwrap(),
            Some(PropertyValue::Int32(0))
        );
        assert_eq!(
            read_fixed_column(&env, &path, ColumnType::Int32, 2).unwrap(),
            Some(PropertyValue::Int32(-5))
        );
    }

    #[test]
    fn varchar_column_round_trip_with_nulls() {
        let dir = tempfile::tempdir().unwrap();
        let env: Arc<dyn Env> = Arc::new(PosixEnv::new());
        let dir_path = dir.path().join("name.idx");
        let blob_path = dir.path().join("name.blob");
        let values = vec![Some("alice".to_string()), None, Some("".to_string())];
        write_varchar_column(&env, &dir_path, &blob_path, &values).unwrap();
        assert_eq!(
            read_varchar_column(&env, &dir_path, &blob_path, 0).unwrap(),
            Some(PropertyValue::Varchar("alice".into()))
        );
        assert_eq!(read_varchar_column(&env, &dir_path, &blob_path, 1).unwrap(), None);
        assert_eq!(
            read_varchar_column(&env, &dir_path, &blob_path, 2).unwrap(),
            Some(PropertyValue::Varchar("".into()))
        );
    }
}
