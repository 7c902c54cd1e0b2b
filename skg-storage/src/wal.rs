//! Write-ahead log record format. Disabled by default: no `Database` code
//! path enables it, and redo semantics are not wired up. Durability is
//! flush-based instead: `Database::flush` fsyncs leaf and meta files and
//! there is no crash-replay log.
//!
//! This module exists so a future replay mode has a concrete record shape to
//! build on; nothing in this crate constructs a [`WalWriter`] today.

use crate::env::Env;
use skg_types::{Result, Tag, Vid};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One write-ahead log entry, covering the subset of mutations that would
/// need replay after an unclean shutdown.
#[derive(Debug, Clone, PartialEq)]
pub enum WalRecord {
    AddEdge { src: Vid, dst: Vid, tag: Tag, weight: f32 },
    DeleteEdge { src: Vid, dst: Vid, tag: Tag },
    DeleteVertex { vid: Vid },
}

impl WalRecord {
    fn encode(&self) -> Vec<u8> {
        match self {
            WalRecord::AddEdge { src, dst, tag, weight } => {
                let mut out = vec![0u8];
                out.extend_from_slice(&src.to_le_bytes());
                out.extend_from_slice(&dst.to_le_bytes());
                out.push(*tag);
                out.extend_from_slice(&weight.to_le_bytes());
                out
            }
            WalRecord::DeleteEdge { src, dst, tag } => {
                let mut out = vec![1u8];
                out.extend_from_slice(&src.to_le_bytes());
                out.extend_from_slice(&dst.to_le_bytes());
                out.push(*tag);
                out
            }
            WalRecord::DeleteVertex { vid } => {
                let mut out = vec![2u8];
                out.extend_from_slice(&vid.to_le_bytes());
                out
            }
        }
    }

    fn decode(bytes: &[u8]) -> Option<Self> {
        match bytes.first()? {
            0 => {
                if bytes.len() < 1 + 4 + 4 + 1 + 4 {
                    return None;
                }
                let src = u32::from_le_bytes(bytes[1..5].try_into().ok()?);
                let dst = u32::from_le_bytes(bytes[5..9].try_into().ok()?);
                let tag = bytes[9];
                let weight = f32::from_le_bytes(bytes[10..14].try_into().ok()?);
                Some(WalRecord::AddEdge { src, dst, tag, weight })
            }
            1 => {
                if bytes.len() < 1 + 4 + 4 + 1 {
                    return None;
                }
                let src = u32::from_le_bytes(bytes[1..5].try_into().ok()?);
                let dst = u32::from_le_bytes(bytes[5..9].try_into().ok()?);
                let tag = bytes[9];
                Some(WalRecord::DeleteEdge { src, dst, tag })
            }
            2 => {
                if bytes.len() < 1 + 4 {
                    return None;
                }
                let vid = u32::from_le_bytes(bytes[1..5].try_into().ok()?);
                Some(WalRecord::DeleteVertex { vid })
            }
            _ => None,
        }
    }
}

/// Append-only WAL file writer. Never constructed by [`crate::SkgOptions`]
/// or the database facade today; kept as a forward-compatible format.
#[allow(dead_code)]
pub struct WalWriter {
    env: Arc<dyn Env>,
    path: PathBuf,
}

#[allow(dead_code)]
impl WalWriter {
    pub fn open(env: Arc<dyn Env>, dir: &Path) -> Result<Self> {
        env.create_dir_all(dir)?;
        Ok(Self {
            env,
            path: dir.join("wal.log"),
        })
    }

    pub fn append(&self, record: &WalRecord) -> Result<()> {
        let mut w = self.env.new_writable_file(&self.path)?;
        let body = record.encode();
        let len = body.len() as u32;
        w.append(&len.to_le_bytes())?;
        w.append(&body)?;
        w.sync()
    }
}

/// Replay every well-formed record in a WAL file, in append order. A
/// truncated trailing record (a torn write from a crash mid-append) is
/// silently dropped rather than treated as corruption.
#[allow(dead_code)]
pub fn replay(env: &Arc<dyn Env>, dir: &Path) -> Result<Vec<WalRecord>> {
    let path = dir.join("wal.log");
    if !env.file_exists(&path) {
        return Ok(Vec::new());
    }
    let size = env.file_size(&path)?;
    let file = env.new_random_access_file(&path)?;
    let mut buf = vec![0u8; size as usize];
    file.read_at(0, &mut buf)?;

    let mut out = Vec::new();
    let mut pos = 0usize;
    while pos + 4 <= buf.len() {
        let len = u32::from_le_bytes(buf[pos..pos + 4].try_into().unwrap()) as usize;
        pos += 4;
        if pos + len > buf.len() {
            break;
        }
        match WalRecord::decode(&buf[pos..pos + len]) {
            Some(record) => out.push(record),
            None => break,
        }
        pos += len;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::PosixEnv;

    #[test]
    fn append_then_replay_round_trips_records() {
        let dir = tempfile::tempdir().unwrap();
        let env: Arc<dyn Env> = Arc::new(PosixEnv::new());
        let wal = WalWriter::open(Arc::clone(&env), dir.path()).unwrap();
        wal.append(&WalRecord::AddEdge { src: 1, dst: 2, tag: 0, weight: 1.5 }).unwrap();
        wal.append(&WalRecord::DeleteEdge { src: 1, dst: 2, tag: 0 }).unwrap();
        wal.append(&WalRecord::DeleteVertex { vid: 9 }).unwrap();

        let records = replay(&env, dir.path()).unwrap();
        assert_eq!(
            records,
            vec![
                WalRecord::AddEdge { src: 1, dst: 2, tag: 0, weight: 1.5 },
                WalRecord::DeleteEdge { src: 1, dst: 2, tag: 0 },
                WalRecord::DeleteVertex { vid: 9 },
            ]
        );
    }

    #[test]
    fn replay_of_missing_wal_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let env: Arc<dyn Env> = Arc::new(PosixEnv::new());
        assert!(replay(&env, dir.path()).unwrap().is_empty());
    }
}
