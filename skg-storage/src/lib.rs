//! Storage layer for the skg property-graph engine: environment/file
//! abstraction, vertex-id encoding, schema registry, vertex attributes,
//! on-disk edge partitions, the in-memory shard buffer, the shard tree,
//! the bulk sharder and the concurrent query fan-out.

pub mod bulk;
pub mod env;
pub mod idencoder;
pub mod leaf;
pub mod memtable;
pub mod pool;
pub mod query;
pub mod schema;
pub mod shard;
pub mod vattr;
pub mod wal;

pub use skg_types::{Error, Result};

/// Tunable limits and thread-pool sizes, read once at `Database::open`.
///
/// Every field is overridable via the matching `SKG_*` environment variable.
#[derive(Debug, Clone)]
pub struct SkgOptions {
    pub memory_shard_size_mb: u64,
    pub max_interval_length: u32,
    pub shard_split_factor: u32,
    pub leaf_target: u32,
    pub open_threads: usize,
    pub query_threads: usize,
    pub check_freq: u64,
    pub max_mem_k: u64,
}

impl Default for SkgOptions {
    fn default() -> Self {
        Self {
            memory_shard_size_mb: 64,
            max_interval_length: 4_000_000,
            shard_split_factor: 4,
            leaf_target: 8,
            open_threads: 4,
            query_threads: num_cpus_fallback(),
            check_freq: 20_000,
            max_mem_k: 256 * 1024,
        }
    }
}

impl SkgOptions {
    /// Build options from defaults, overridden by any `SKG_*` variables
    /// present in the process environment.
    pub fn from_env() -> Self {
        let mut opts = Self::default();
        if let Some(v) = env_u64("SKG_MEMORY_SHARD_SIZE_MB") {
            opts.memory_shard_size_mb = v;
        }
        if let Some(v) = env_u64("SKG_MAX_INTERVAL_LENGTH") {
            opts.max_interval_length = v as u32;
        }
        if let Some(v) = env_u64("SKG_SHARD_SPLIT_FACTOR") {
            opts.shard_split_factor = v as u32;
        }
        if let Some(v) = env_u64("SKG_LEAF_TARGET") {
            opts.leaf_target = v as u32;
        }
        if let Some(v) = env_u64("SKG_OPEN_THREADS") {
            opts.open_threads = v as usize;
        }
        if let Some(v) = env_u64("SKG_QUERY_THREADS") {
            opts.query_threads = v as usize;
        }
        if let Some(v) = env_u64("SKG_CHECK_FREQ") {
            opts.check_freq = v;
        }
        if let Some(v) = env_u64("SKG_MAX_MEM_K") {
            opts.max_mem_k = v;
        }
        opts
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

fn num_cpus_fallback() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}
