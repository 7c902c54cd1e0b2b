//! Bidirectional mapping between user-supplied string vertex ids and the
//! dense, monotonically increasing `u32` internal ids the rest of the engine
//! operates on.

use crate::env::Env;
use skg_types::{Error, Result, Vid};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

/// Assigns and resolves vids for user ids, and persists the mapping.
pub trait IdEncoder: Send + Sync {
    /// Resolve a user id to its vid, assigning a new one if `create` is set.
    fn string_id(&self, user_id: &str, create: bool) -> Result<Vid>;
    /// Reverse lookup: the user id a vid was assigned for.
    fn vid_to_string(&self, vid: Vid) -> Result<String>;
    /// Record an externally chosen `(user_id, vid)` pair, e.g. during bulk load.
    fn put(&self, user_id: &str, vid: Vid) -> Result<()>;
    /// Idempotently remove a mapping; removing an absent id is not an error.
    fn delete(&self, user_id: &str) -> Result<()>;
    fn flush(&self) -> Result<()>;
    fn close(&self) -> Result<()>;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct Inner {
    fwd: BTreeMap<String, Vid>,
    rev: BTreeMap<Vid, String>,
    next_vid: Vid,
}

/// Encoder for namespaces whose user ids already parse as dense `u64`s: the
/// vid is derived directly from the numeric value modulo the vid space,
/// giving O(1) lookups with no reverse table beyond what's needed to print
/// the original string back out.
pub struct LongIdEncoder {
    state: RwLock<Inner>,
    path: PathBuf,
    env: Arc<dyn Env>,
}

impl LongIdEncoder {
    pub fn open(env: Arc<dyn Env>, dir: &Path) -> Result<Self> {
        env.create_dir_all(dir)?;
        let path = dir.join("long_ids");
        let state = load_records(&env, &path)?;
        Ok(Self {
            state: RwLock::new(state),
            path,
            env,
        })
    }
}

impl IdEncoder for LongIdEncoder {
    fn string_id(&self, user_id: &str, create: bool) -> Result<Vid> {
        user_id
            .parse::<u64>()
            .map_err(|_| Error::InvalidArgument(format!("{user_id} is not a valid long id")))?;
        let state = self.state.read().expect("id encoder lock poisoned");
        if let Some(vid) = state.fwd.get(user_id) {
            return Ok(*vid);
        }
        drop(state);
        if !create {
            return Err(Error::NotFound);
        }
        let mut state = self.state.write().expect("id encoder lock poisoned");
        if let Some(vid) = state.fwd.get(user_id) {
            return Ok(*vid);
        }
        let vid = state.next_vid;
        state.next_vid = state
            .next_vid
            .checked_add(1)
            .ok_or(Error::NoSpace)?;
        state.fwd.insert(user_id.to_string(), vid);
        state.rev.insert(vid, user_id.to_string());
        Ok(vid)
    }

    fn vid_to_string(&self, vid: Vid) -> Result<String> {
        self.state
            .read()
            .expect("id encoder lock poisoned")
            .rev
            .get(&vid)
            .cloned()
            .ok_or(Error::NotFound)
    }

    fn put(&self, user_id: &str, vid: Vid) -> Result<()> {
        let mut state = self.state.write().expect("id encoder lock poisoned");
        if state.fwd.contains_key(user_id) {
            return Err(Error::AlreadyExists);
        }
        state.fwd.insert(user_id.to_string(), vid);
        state.rev.insert(vid, user_id.to_string());
        if vid >= state.next_vid {
            state.next_vid = vid + 1;
        }
        Ok(())
    }

    fn delete(&self, user_id: &str) -> Result<()> {
        let mut state = self.state.write().expect("id encoder lock poisoned");
        if let Some(vid) = state.fwd.remove(user_id) {
            state.rev.remove(&vid);
        }
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        let state = self.state.read().expect("id encoder lock poisoned");
        persist_records(&self.env, &self.path, &state.fwd)
    }

    fn close(&self) -> Result<()> {
        self.flush()
    }

    fn len(&self) -> usize {
        self.state.read().expect("id encoder lock poisoned").fwd.len()
    }
}

/// General-purpose encoder for arbitrary string ids, backed by an ordered
/// in-memory map persisted as a sorted record file.
pub struct StringIdEncoder {
    state: RwLock<Inner>,
    path: PathBuf,
    env: Arc<dyn Env>,
}

impl StringIdEncoder {
    pub fn open(env: Arc<dyn Env>, dir: &Path) -> Result<Self> {
        env.create_dir_all(dir)?;
        let path = dir.join("string_ids");
        let state = load_records(&env, &path)?;
        Ok(Self {
            state: RwLock::new(state),
            path,
            env,
        })
    }
}

impl IdEncoder for StringIdEncoder {
    fn string_id(&self, user_id: &str, create: bool) -> Result<Vid> {
        {
            let state = self.state.read().expect("id encoder lock poisoned");
            if let Some(vid) = state.fwd.get(user_id) {
                return Ok(*vid);
            }
        }
        if !create {
            return Err(Error::NotFound);
        }
        let mut state = self.state.write().expect("id encoder lock poisoned");
        if let Some(vid) = state.fwd.get(user_id) {
            return Ok(*vid);
        }
        let vid = state.next_vid;
        state.next_vid = state
            .next_vid
            .checked_add(1)
            .ok_or(Error::NoSpace)?;
        state.fwd.insert(user_id.to_string(), vid);
        state.rev.insert(vid, user_id.to_string());
        Ok(vid)
    }

    fn vid_to_string(&self, vid: Vid) -> Result<String> {
        self.state
            .read()
            .expect("id encoder lock poisoned")
            .rev
            .get(&vid)
            .cloned()
            .ok_or(Error::NotFound)
    }

    fn put(&self, user_id: &str, vid: Vid) -> Result<()> {
        let mut state = self.state.write().expect("id encoder lock poisoned");
        if state.fwd.contains_key(user_id) {
            return Err(Error::AlreadyExists);
        }
        state.fwd.insert(user_id.to_string(), vid);
        state.rev.insert(vid, user_id.to_string());
        if vid >= state.next_vid {
            state.next_vid = vid + 1;
        }
        Ok(())
    }

    fn delete(&self, user_id: &str) -> Result<()> {
        let mut state = self.state.write().expect("id encoder lock poisoned");
        if let Some(vid) = state.fwd.remove(user_id) {
            state.rev.remove(&vid);
        }
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        let state = self.state.read().expect("id encoder lock poisoned");
        persist_records(&self.env, &self.path, &state.fwd)
    }

    fn close(&self) -> Result<()> {
        self.flush()
    }

    fn len(&self) -> usize {
        self.state.read().expect("id encoder lock poisoned").fwd.len()
    }
}

fn load_records(env: &Arc<dyn Env>, path: &Path) -> Result<Inner> {
    let mut fwd = BTreeMap::new();
    let mut rev = BTreeMap::new();
    let mut next_vid: Vid = 0;
    if env.file_exists(path) {
        let size = env.file_size(path)?;
        if size > 0 {
            let file = env.new_random_access_file(path)?;
            let mut buf = vec![0u8; size as usize];
            file.read_at(0, &mut buf)?;
            let text = String::from_utf8(buf)
                .map_err(|_| Error::InvalidArgument("corrupt id encoder record file".into()))?;
            for line in text.lines() {
                let Some((id, vid)) = line.split_once('\t') else {
                    continue;
                };
                let vid: Vid = vid
                    .parse()
                    .map_err(|_| Error::InvalidArgument("corrupt id encoder record".into()))?;
                fwd.insert(id.to_string(), vid);
                rev.insert(vid, id.to_string());
                next_vid = next_vid.max(vid + 1);
            }
        }
    }
    Ok(Inner { fwd, rev, next_vid })
}

fn persist_records(env: &Arc<dyn Env>, path: &Path, fwd: &BTreeMap<String, Vid>) -> Result<()> {
    let tmp = path.with_extension("tmp");
    {
        let mut w = env.new_writable_file(&tmp)?;
        let mut buf = Vec::new();
        for (id, vid) in fwd {
            writeln!(buf, "{id}\t{vid}").expect("writing to an in-memory buffer cannot fail");
        }
        w.append(&buf)?;
        w.sync()?;
    }
    env.rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::PosixEnv;

    #[test]
    fn long_id_encoder_round_trips_through_flush() {
        let dir = tempfile::tempdir().unwrap();
        let env: Arc<dyn Env> = Arc::new(PosixEnv::new());
        let enc = LongIdEncoder::open(Arc::clone(&env), dir.path()).unwrap();
        let vid = enc.string_id("1001", true).unwrap();
        assert_eq!(enc.string_id("1001", false).unwrap(), vid);
        assert_eq!(enc.vid_to_string(vid).unwrap(), "1001");
        enc.flush().unwrap();

        let reopened = LongIdEncoder::open(env, dir.path()).unwrap();
        assert_eq!(reopened.string_id("1001", false).unwrap(), vid);
    }

    #[test]
    fn long_id_encoder_rejects_non_numeric() {
        let dir = tempfile::tempdir().unwrap();
        let env: Arc<dyn Env> = Arc::new(PosixEnv::new());
        let enc = LongIdEncoder::open(env, dir.path()).unwrap();
        assert!(enc.string_id("not-a-number", true).is_err());
    }

    #[test]
    fn string_id_encoder_assigns_dense_increasing_vids() {
        let dir = tempfile::tempdir().unwrap();
        let env: Arc<dyn Env> = Arc::new(PosixEnv::new());
        let enc = StringIdEncoder::open(env, dir.path()).unwrap();
        let a = enc.string_id("alice", true).unwrap();
        let b = enc.string_id("bob", true).unwrap();
        assert_ne!(a, b);
        assert_eq!(enc.string_id("alice", false).unwrap(), a);
    }

    #[test]
    fn lookup_without_create_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let env: Arc<dyn Env> = Arc::new(PosixEnv::new());
        let enc = StringIdEncoder::open(env, dir.path()).unwrap();
        assert!(matches!(enc.string_id("ghost", false), Err(Error::NotFound)));
    }

    #[test]
    fn delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let env: Arc<dyn Env> = Arc::new(PosixEnv::new());
        let enc = StringIdEncoder::open(env, dir.path()).unwrap();
        enc.string_id("carol", true).unwrap();
        enc.delete("carol").unwrap();
        enc.delete("carol").unwrap();
        assert!(matches!(enc.string_id("carol", false), Err(Error::NotFound)));
    }
}
