//! BFS traversal layer: shortest path, all paths, k-out/k-out-size and
//! k-neighbor queries over the storage layer's adjacency API.
//!
//! This crate never plans a query the way a Cypher executor would; it only
//! walks the out/in-edge relation a shard tree already exposes, level by
//! level, honoring a node budget, a memory budget and a wall-clock budget.

use serde::Serialize;
use skg_types::{EdgeRecord, Result, Tag, Vid};
use std::collections::HashSet;
use std::time::{Duration, Instant};

/// Read-only adjacency access the traversal layer needs from the storage
/// layer. Implemented by the database facade, which adapts its shard trees
/// and query engine to vid-level out/in-edge lookups.
pub trait Adjacency: Send + Sync {
    fn out_neighbors(&self, vid: Vid, label_tag: Option<Tag>) -> Result<Vec<EdgeRecord>>;
    fn in_neighbors(&self, vid: Vid, label_tag: Option<Tag>) -> Result<Vec<EdgeRecord>>;
}

/// Result status of a traversal request's envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u8)]
pub enum EnvelopeCode {
    Ok = 0,
    Error = 1,
    Timeout = 2,
}

/// `{code, msg, data}` response envelope every traversal operation returns,
/// JSON-encoded at the facade boundary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope<T> {
    pub code: EnvelopeCode,
    pub msg: String,
    pub data: Vec<T>,
}

impl<T> Envelope<T> {
    fn ok(data: Vec<T>) -> Self {
        Self { code: EnvelopeCode::Ok, msg: String::new(), data }
    }

    fn timeout(data: Vec<T>) -> Self {
        Self {
            code: EnvelopeCode::Timeout,
            msg: "traversal budget exceeded".to_string(),
            data,
        }
    }
}

/// Per-request budget: node/time/memory caps polled every `check_freq`
/// expansions, plus the result-count cap `nlimit`.
#[derive(Debug, Clone, Copy)]
pub struct Budget {
    pub mseclimit: Option<u64>,
    pub nlimit: Option<usize>,
    pub check_freq: u64,
    pub max_mem_k: u64,
}

impl Default for Budget {
    fn default() -> Self {
        Self {
            mseclimit: None,
            nlimit: None,
            check_freq: 20_000,
            max_mem_k: 256 * 1024,
        }
    }
}

struct Clock {
    start: Instant,
    deadline: Option<Duration>,
    expansions: u64,
    check_freq: u64,
}

impl Clock {
    fn new(budget: &Budget) -> Self {
        Self {
            start: Instant::now(),
            deadline: budget.mseclimit.map(Duration::from_millis),
            expansions: 0,
            check_freq: budget.check_freq.max(1),
        }
    }

    /// Call on every expansion; returns `true` once the deadline has tripped,
    /// checked only every `check_freq` calls to keep the hot loop cheap.
    fn tick(&mut self) -> bool {
        self.expansions += 1;
        if self.expansions % self.check_freq != 0 {
            return false;
        }
        self.expired()
    }

    fn expired(&self) -> bool {
        match self.deadline {
            Some(limit) => self.start.elapsed() >= limit,
            None => false,
        }
    }
}

/// Approximate per-queued-edge byte cost used against `max_mem_k * 1000`.
const QUEUE_ENTRY_BYTES: u64 = 32;

fn label_allowed(tag: Tag, labels: Option<&HashSet<Tag>>) -> bool {
    labels.is_none_or(|set| set.contains(&tag))
}

/// Monotone BFS shortest path: expands level by level from `src`, stopping
/// once any node in the current level equals `dst`; returns every shortest
/// path found at that level, up to `budget.nlimit`. `max_depth` bounds how
/// many levels are explored even if `dst` is never reached.
pub fn shortest_path(
    adj: &dyn Adjacency,
    src: Vid,
    dst: Vid,
    max_depth: u32,
    labels: Option<&HashSet<Tag>>,
    budget: Budget,
) -> Envelope<Vec<Vid>> {
    if src == dst {
        return Envelope::ok(vec![vec![src]]);
    }

    let mut clock = Clock::new(&budget);
    // parents[v] = set of predecessors discovered at the level preceding v's.
    let mut parents: std::collections::HashMap<Vid, Vec<Vid>> = std::collections::HashMap::new();
    let mut visited: HashSet<Vid> = HashSet::from([src]);
    let mut frontier: Vec<Vid> = vec![src];
    let mut queued_bytes: u64 = 0;

    for _ in 0..max_depth {
        if frontier.is_empty() {
            break;
        }
        let mut next_frontier = Vec::new();
        let mut found = false;
        for &vid in &frontier {
            if clock.tick() {
                return Envelope::timeout(Vec::new());
            }
            let edges = match adj.out_neighbors(vid, None) {
                Ok(edges) => edges,
                Err(e) => {
                    return Envelope {
                        code: EnvelopeCode::Error,
                        msg: e.to_string(),
                        data: Vec::new(),
                    }
                }
            };
            for e in edges {
                if !label_allowed(e.tag, labels) {
                    continue;
                }
                if visited.contains(&e.dst) {
                    continue;
                }
                parents.entry(e.dst).or_default().push(vid);
                if e.dst == dst {
                    found = true;
                }
                if !next_frontier.contains(&e.dst) {
                    next_frontier.push(e.dst);
                    queued_bytes += QUEUE_ENTRY_BYTES;
                    if queued_bytes >= budget.max_mem_k * 1000 {
                        return Envelope::ok(reconstruct_paths(&parents, src, dst, budget.nlimit));
                    }
                }
            }
        }
        for v in &next_frontier {
            visited.insert(*v);
        }
        if found {
            return Envelope::ok(reconstruct_paths(&parents, src, dst, budget.nlimit));
        }
        frontier = next_frontier;
    }
    Envelope::ok(Vec::new())
}

fn reconstruct_paths(
    parents: &std::collections::HashMap<Vid, Vec<Vid>>,
    src: Vid,
    dst: Vid,
    nlimit: Option<usize>,
) -> Vec<Vec<Vid>> {
    let mut paths = Vec::new();
    let mut stack: Vec<Vec<Vid>> = vec![vec![dst]];
    while let Some(path) = stack.pop() {
        if let Some(limit) = nlimit {
            if paths.len() >= limit {
                break;
            }
        }
        let head = *path.last().unwrap();
        if head == src {
            let mut full = path;
            full.reverse();
            paths.push(full);
            continue;
        }
        let Some(preds) = parents.get(&head) else { continue };
        for &p in preds {
            let mut extended = path.clone();
            extended.push(p);
            stack.push(extended);
        }
    }
    paths
}

/// BFS without a global `visited` set: every walk may revisit a node, so
/// cycles are pruned per path by checking whether the candidate vertex is
/// already on the path being extended (walking the parent chain), rather
/// than by a single shared visited set.
pub fn all_paths(
    adj: &dyn Adjacency,
    src: Vid,
    dst: Vid,
    max_depth: u32,
    labels: Option<&HashSet<Tag>>,
    budget: Budget,
) -> Envelope<Vec<Vid>> {
    let mut clock = Clock::new(&budget);
    let mut results: Vec<Vec<Vid>> = Vec::new();
    let mut stack: Vec<Vec<Vid>> = vec![vec![src]];
    let mut queued_bytes: u64 = 0;

    while let Some(path) = stack.pop() {
        if let Some(limit) = budget.nlimit {
            if results.len() >= limit {
                break;
            }
        }
        if clock.tick() {
            return Envelope::timeout(results);
        }
        let head = *path.last().unwrap();
        if head == dst && path.len() > 1 {
            results.push(path);
            continue;
        }
        if path.len() as u32 > max_depth {
            continue;
        }
        let edges = match adj.out_neighbors(head, None) {
            Ok(edges) => edges,
            Err(e) => {
                return Envelope {
                    code: EnvelopeCode::Error,
                    msg: e.to_string(),
                    data: results,
                }
            }
        };
        for e in edges {
            if !label_allowed(e.tag, labels) {
                continue;
            }
            // Cycle pruning: never step onto a vertex already on this path.
            if path.contains(&e.dst) {
                continue;
            }
            let mut extended = path.clone();
            extended.push(e.dst);
            queued_bytes += QUEUE_ENTRY_BYTES;
            if queued_bytes >= budget.max_mem_k * 1000 {
                return Envelope::ok(results);
            }
            stack.push(extended);
        }
    }
    Envelope::ok(results)
}

/// Direction the k-hop walk expands along.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Out,
    In,
    Both,
}

fn neighbors_in_direction(
    adj: &dyn Adjacency,
    vid: Vid,
    direction: Direction,
    labels: Option<&HashSet<Tag>>,
) -> Result<Vec<Vid>> {
    let mut out = Vec::new();
    if matches!(direction, Direction::Out | Direction::Both) {
        for e in adj.out_neighbors(vid, None)? {
            if label_allowed(e.tag, labels) {
                out.push(e.dst);
            }
        }
    }
    if matches!(direction, Direction::In | Direction::Both) {
        for e in adj.in_neighbors(vid, None)? {
            if label_allowed(e.tag, labels) {
                out.push(e.src);
            }
        }
    }
    Ok(out)
}

/// Level-synchronous expansion up to `k` hops with a global visited set,
/// returning every distinct vertex reached (not including `src`), up to
/// `budget.nlimit`.
pub fn k_hop(
    adj: &dyn Adjacency,
    src: Vid,
    k: u32,
    direction: Direction,
    labels: Option<&HashSet<Tag>>,
    budget: Budget,
) -> Envelope<Vid> {
    let mut clock = Clock::new(&budget);
    let mut visited: HashSet<Vid> = HashSet::from([src]);
    let mut frontier = vec![src];
    let mut reached: Vec<Vid> = Vec::new();

    for _ in 0..k {
        if frontier.is_empty() {
            break;
        }
        let mut next_frontier = Vec::new();
        for vid in frontier {
            if clock.tick() {
                return Envelope::timeout(reached);
            }
            let neighbors = match neighbors_in_direction(adj, vid, direction, labels) {
                Ok(ns) => ns,
                Err(e) => {
                    return Envelope {
                        code: EnvelopeCode::Error,
                        msg: e.to_string(),
                        data: reached,
                    }
                }
            };
            for n in neighbors {
                if visited.insert(n) {
                    next_frontier.push(n);
                    reached.push(n);
                    if let Some(limit) = budget.nlimit {
                        if reached.len() >= limit {
                            return Envelope::ok(reached);
                        }
                    }
                }
            }
        }
        frontier = next_frontier;
    }
    Envelope::ok(reached)
}

/// `k-out`: vertices reachable from `src` within `k` hops via out-edges only.
pub fn k_out(
    adj: &dyn Adjacency,
    src: Vid,
    k: u32,
    labels: Option<&HashSet<Tag>>,
    budget: Budget,
) -> Envelope<Vid> {
    k_hop(adj, src, k, Direction::Out, labels, budget)
}

/// `k-out-size`: same traversal as `k_out`, but only the reached-vertex count
/// is needed, so the caller can discard `Envelope::data` and read its length.
pub fn k_out_size(
    adj: &dyn Adjacency,
    src: Vid,
    k: u32,
    labels: Option<&HashSet<Tag>>,
    budget: Budget,
) -> Envelope<Vid> {
    k_hop(adj, src, k, Direction::Out, labels, budget)
}

/// `k-neighbor`: vertices reachable from `src` within `k` hops via either
/// direction.
pub fn k_neighbor(
    adj: &dyn Adjacency,
    src: Vid,
    k: u32,
    labels: Option<&HashSet<Tag>>,
    budget: Budget,
) -> Envelope<Vid> {
    k_hop(adj, src, k, Direction::Both, labels, budget)
}
