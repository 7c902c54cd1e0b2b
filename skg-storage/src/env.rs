//! Environment/file-system abstraction, in the style of a LevelDB/RocksDB
//! `Env`: every on-disk access goes through this trait so tests can run
//! against a real filesystem without the rest of the engine caring about
//! `std::fs` directly.

use memmap2::{Mmap, MmapMut, MmapOptions};
use skg_types::{Error, Result};
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
#[cfg(not(unix))]
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;

#[cfg(unix)]
use std::os::unix::fs::FileExt as _;

/// A sequential writer handle, append-only.
pub trait WritableFile: Send {
    fn append(&mut self, data: &[u8]) -> Result<()>;
    fn flush(&mut self) -> Result<()>;
    fn sync(&mut self) -> Result<()>;
}

/// A handle supporting positional reads without disturbing a shared cursor.
pub trait RandomAccessFile: Send + Sync {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize>;
    fn size(&self) -> Result<u64>;
}

/// A handle supporting positional reads and writes, used by leaf builders
/// that patch earlier records (e.g. `next`-link back-patching).
pub trait RandomAccessWriteFile: RandomAccessFile {
    fn write_at(&self, offset: u64, buf: &[u8]) -> Result<()>;
    fn truncate(&self, len: u64) -> Result<()>;
    fn sync(&self) -> Result<()>;
}

/// The environment: file handles, directory operations, locking, the clock
/// and a unique-id generator, plus a background thread pool.
pub trait Env: Send + Sync {
    fn new_writable_file(&self, path: &Path) -> Result<Box<dyn WritableFile>>;
    fn new_random_access_file(&self, path: &Path) -> Result<Box<dyn RandomAccessFile>>;
    fn new_random_access_write_file(&self, path: &Path) -> Result<Box<dyn RandomAccessWriteFile>>;
    fn mmap_readonly(&self, path: &Path) -> Result<Mmap>;
    fn mmap_writable(&self, path: &Path, len: u64) -> Result<MmapMut>;

    fn create_dir_all(&self, path: &Path) -> Result<()>;
    fn remove_dir_all(&self, path: &Path) -> Result<()>;
    fn list_dir(&self, path: &Path) -> Result<Vec<PathBuf>>;
    fn remove_file(&self, path: &Path) -> Result<()>;
    fn rename(&self, from: &Path, to: &Path) -> Result<()>;
    fn file_exists(&self, path: &Path) -> bool;
    fn file_size(&self, path: &Path) -> Result<u64>;

    /// Acquire an advisory whole-database lock, held until the returned
    /// guard is dropped.
    fn lock_file(&self, path: &Path) -> Result<Box<dyn FileLock>>;

    /// Monotonic nanosecond clock, independent of wall-clock adjustments.
    fn now_nanos(&self) -> u64;

    /// A process-wide-unique identifier, suitable for temp-file naming.
    fn new_unique_id(&self) -> String;
}

/// RAII guard releasing an `Env::lock_file` lock on drop.
pub trait FileLock: Send {}

/// Default `Env` backed by `std::fs`, `memmap2` and a process-local lock
/// registry. An OS advisory `fcntl` lock would not reject same-process
/// re-locking on its own, so this registry tracks held paths in memory as
/// well.
#[derive(Default)]
pub struct PosixEnv {
    locks: Mutex<HashSet<PathBuf>>,
    clock_origin: OnceClock,
}

struct OnceClock(Mutex<Option<Instant>>);

impl Default for OnceClock {
    fn default() -> Self {
        Self(Mutex::new(None))
    }
}

impl OnceClock {
    fn elapsed_nanos(&self) -> u64 {
        let mut guard = self.0.lock().expect("clock mutex poisoned");
        let origin = *guard.get_or_insert_with(Instant::now);
        origin.elapsed().as_nanos() as u64
    }
}

impl PosixEnv {
    pub fn new() -> Self {
        Self::default()
    }
}

struct PosixWritable(File);

impl WritableFile for PosixWritable {
    fn append(&mut self, data: &[u8]) -> Result<()> {
        self.0.write_all(data).map_err(Error::Io)
    }

    fn flush(&mut self) -> Result<()> {
        self.0.flush().map_err(Error::Io)
    }

    fn sync(&mut self) -> Result<()> {
        self.0.sync_all().map_err(Error::Io)
    }
}

struct PosixRandomAccess(File);

impl RandomAccessFile for PosixRandomAccess {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        read_at_impl(&self.0, offset, buf)
    }

    fn size(&self) -> Result<u64> {
        Ok(self.0.metadata().map_err(Error::Io)?.len())
    }
}

struct PosixRandomAccessWrite(File);

impl RandomAccessFile for PosixRandomAccessWrite {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        read_at_impl(&self.0, offset, buf)
    }

    fn size(&self) -> Result<u64> {
        Ok(self.0.metadata().map_err(Error::Io)?.len())
    }
}

impl RandomAccessWriteFile for PosixRandomAccessWrite {
    fn write_at(&self, offset: u64, buf: &[u8]) -> Result<()> {
        write_at_impl(&self.0, offset, buf)
    }

    fn truncate(&self, len: u64) -> Result<()> {
        self.0.set_len(len).map_err(Error::Io)
    }

    fn sync(&self) -> Result<()> {
        self.0.sync_all().map_err(Error::Io)
    }
}

#[cfg(unix)]
fn read_at_impl(file: &File, offset: u64, buf: &mut [u8]) -> Result<usize> {
    file.read_at(buf, offset).map_err(Error::Io)
}

#[cfg(unix)]
fn write_at_impl(file: &File, offset: u64, buf: &[u8]) -> Result<()> {
    file.write_at(buf, offset).map_err(Error::Io)
}

#[cfg(not(unix))]
fn read_at_impl(file: &File, offset: u64, buf: &mut [u8]) -> Result<usize> {
    let mut f = file.try_clone().map_err(Error::Io)?;
    f.seek(SeekFrom::Start(offset)).map_err(Error::Io)?;
    f.read(buf).map_err(Error::Io)
}

#[cfg(not(unix))]
fn write_at_impl(file: &File, offset: u64, buf: &[u8]) -> Result<()> {
    let mut f = file.try_clone().map_err(Error::Io)?;
    f.seek(SeekFrom::Start(offset)).map_err(Error::Io)?;
    f.write_all(buf).map_err(Error::Io)
}

struct PosixFileLock<'a> {
    env: &'a PosixEnv,
    path: PathBuf,
}

impl FileLock for PosixFileLock<'_> {}

impl Drop for PosixFileLock<'_> {
    fn drop(&mut self) {
        self.env
            .locks
            .lock()
            .expect("lock registry mutex poisoned")
            .remove(&self.path);
    }
}

impl Env for PosixEnv {
    fn new_writable_file(&self, path: &Path) -> Result<Box<dyn WritableFile>> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(Error::Io)?;
        Ok(Box::new(PosixWritable(file)))
    }

    fn new_random_access_file(&self, path: &Path) -> Result<Box<dyn RandomAccessFile>> {
        let file = File::open(path).map_err(|e| map_open_err(e, path))?;
        Ok(Box::new(PosixRandomAccess(file)))
    }

    fn new_random_access_write_file(&self, path: &Path) -> Result<Box<dyn RandomAccessWriteFile>> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)
            .map_err(Error::Io)?;
        Ok(Box::new(PosixRandomAccessWrite(file)))
    }

    fn mmap_readonly(&self, path: &Path) -> Result<Mmap> {
        let file = File::open(path).map_err(|e| map_open_err(e, path))?;
        unsafe { MmapOptions::new().map(&file) }.map_err(Error::Io)
    }

    fn mmap_writable(&self, path: &Path, len: u64) -> Result<MmapMut> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)
            .map_err(Error::Io)?;
        file.set_len(len).map_err(Error::Io)?;
        unsafe { MmapOptions::new().map_mut(&file) }.map_err(Error::Io)
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path).map_err(Error::Io)
    }

    fn remove_dir_all(&self, path: &Path) -> Result<()> {
        if path.exists() {
            fs::remove_dir_all(path).map_err(Error::Io)?;
        }
        Ok(())
    }

    fn list_dir(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let mut out = Vec::new();
        for entry in fs::read_dir(path).map_err(Error::Io)? {
            out.push(entry.map_err(Error::Io)?.path());
        }
        out.sort();
        Ok(out)
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        fs::remove_file(path).map_err(Error::Io)
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        fs::rename(from, to).map_err(Error::Io)
    }

    fn file_exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn file_size(&self, path: &Path) -> Result<u64> {
        Ok(fs::metadata(path).map_err(Error::Io)?.len())
    }

    fn lock_file(&self, path: &Path) -> Result<Box<dyn FileLock>> {
        let mut locks = self.locks.lock().expect("lock registry mutex poisoned");
        if !locks.insert(path.to_path_buf()) {
            return Err(Error::InvalidArgument(format!(
                "database at {} is already locked by this process",
                path.display()
            )));
        }
        drop(locks);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(Error::Io)?;
        }
        File::create(path).map_err(Error::Io)?;
        Ok(Box::new(PosixFileLock {
            env: unsafe { extend_lifetime(self) },
            path: path.to_path_buf(),
        }))
    }

    fn now_nanos(&self) -> u64 {
        self.clock_origin.elapsed_nanos()
    }

    fn new_unique_id(&self) -> String {
        uuid::Uuid::new_v4().simple().to_string()
    }
}

/// Safety: `PosixEnv` is always held for at least as long as any database
/// opened against it (callers keep an `Arc<dyn Env>` alive for the database's
/// whole lifetime), so the lock guard never actually outlives its env.
unsafe fn extend_lifetime<'a>(env: &PosixEnv) -> &'a PosixEnv {
    std::mem::transmute::<&PosixEnv, &'a PosixEnv>(env)
}

fn map_open_err(e: std::io::Error, path: &Path) -> Error {
    if e.kind() == std::io::ErrorKind::NotFound {
        Error::FileNotFound(path.display().to_string())
    } else {
        Error::Io(e)
    }
}
