//! BFS-within-priority crawl frontier: a min-heap keyed by (page-type
//! priority, depth, insertion order), with URL canonicalization and
//! content-hash dedupe.

use sha2::{Digest, Sha256};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};
use url::Url;

use crate::crawler::classifier::PageType;

const TRACKING_PARAM_EXACT: &[&str] = &["fbclid", "gclid", "ref", "source", "mc_cid", "mc_eid"];

#[derive(Debug, Clone, Eq, PartialEq)]
struct QueueEntry {
    url: String,
    priority: u32,
    depth: u32,
    insertion_order: u64,
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // BinaryHeap is a max-heap; reverse every key so `pop()` returns the
        // lowest (priority, depth, insertion_order) tuple first.
        Reverse((self.priority, self.depth, self.insertion_order))
            .cmp(&Reverse((other.priority, other.depth, other.insertion_order)))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct QueueState {
    pub pending: Vec<(String, u32, u32)>,
    pub visited: Vec<String>,
    pub seen: Vec<String>,
    pub content_hashes: Vec<String>,
    pub next_insertion_order: u64,
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct QueueStats {
    pub by_page_type: std::collections::HashMap<String, u32>,
    pub total_queued: usize,
    pub total_visited: usize,
}

pub struct PriorityQueue {
    heap: BinaryHeap<QueueEntry>,
    seen: HashSet<String>,
    visited: HashSet<String>,
    content_hashes: HashSet<String>,
    seed_host: String,
    max_depth: u32,
    exclude: Option<regex::Regex>,
    next_insertion_order: u64,
    type_counts: std::collections::HashMap<String, u32>,
}

impl PriorityQueue {
    pub fn new(seed_url: &str, max_depth: u32, exclude: Option<regex::Regex>) -> Self {
        let seed_host = Url::parse(seed_url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
            .unwrap_or_default();

        PriorityQueue {
            heap: BinaryHeap::new(),
            seen: HashSet::new(),
            visited: HashSet::new(),
            content_hashes: HashSet::new(),
            seed_host,
            max_depth,
            exclude,
            next_insertion_order: 0,
            type_counts: std::collections::HashMap::new(),
        }
    }

    /// Canonicalize: lowercase scheme/host/path, drop fragment, strip
    /// tracking params (`utm_*` prefix plus an exact list), sort remaining
    /// params, remove trailing slash except on root.
    pub fn canonicalize(raw: &str) -> Option<String> {
        let mut parsed = Url::parse(raw).ok()?;
        parsed.set_fragment(None);

        let kept: Vec<(String, String)> = {
            let mut pairs: Vec<(String, String)> = parsed
                .query_pairs()
                .filter(|(k, _)| !k.starts_with("utm_") && !TRACKING_PARAM_EXACT.contains(&k.as_ref()))
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect();
            pairs.sort();
            pairs
        };

        if kept.is_empty() {
            parsed.set_query(None);
        } else {
            let qs = kept
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("&");
            parsed.set_query(Some(&qs));
        }

        let mut path = parsed.path().to_lowercase();
        if path.len() > 1 && path.ends_with('/') {
            path.truncate(path.len() - 1);
        }
        parsed.set_path(&path);

        Some(parsed.to_string())
    }

    fn same_domain(&self, url: &str) -> bool {
        Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
            .map(|h| h == self.seed_host)
            .unwrap_or(false)
    }

    /// Attempt to enqueue a discovered URL at `depth` with the given page
    /// type tag. Returns `false` (no side effects) if rejected: cross-domain,
    /// over max depth, excluded, already seen, or already visited.
    pub fn enqueue(&mut self, raw_url: &str, depth: u32, page_type: PageType) -> bool {
        if depth > self.max_depth {
            return false;
        }
        let Some(canonical) = Self::canonicalize(raw_url) else {
            return false;
        };
        if !self.same_domain(&canonical) {
            return false;
        }
        if let Some(re) = &self.exclude {
            if re.is_match(&canonical) {
                return false;
            }
        }
        if self.visited.contains(&canonical) || !self.seen.insert(canonical.clone()) {
            return false;
        }

        let order = self.next_insertion_order;
        self.next_insertion_order += 1;
        *self.type_counts.entry(page_type.as_str().to_string()).or_insert(0) += 1;

        self.heap.push(QueueEntry {
            url: canonical,
            priority: page_type.priority(),
            depth,
            insertion_order: order,
        });
        true
    }

    /// Pop the next URL (lowest priority tier, then shallowest, then FIFO).
    pub fn pop(&mut self) -> Option<(String, u32)> {
        self.heap.pop().map(|e| (e.url, e.depth))
    }

    pub fn peek(&self) -> Option<(&str, u32)> {
        self.heap.peek().map(|e| (e.url.as_str(), e.depth))
    }

    pub fn mark_visited(&mut self, canonical_url: &str) {
        self.visited.insert(canonical_url.to_string());
    }

    /// Returns `true` (and registers the hash) the first time `hash` is seen.
    pub fn register_content_hash(&mut self, hash: &str) -> bool {
        self.content_hashes.insert(hash.to_string())
    }

    pub fn pending_count(&self) -> usize {
        self.heap.len()
    }

    pub fn visited_count(&self) -> usize {
        self.visited.len()
    }

    /// Every canonical URL visited (fetched or skipped post-fetch) so far,
    /// for checkpoint persistence.
    pub fn visited_urls(&self) -> Vec<String> {
        self.visited.iter().cloned().collect()
    }

    /// Every canonical URL still pending in the heap, for checkpoint
    /// persistence.
    pub fn pending_urls(&self) -> Vec<String> {
        self.heap.iter().map(|e| e.url.clone()).collect()
    }

    pub fn get_stats(&self) -> QueueStats {
        QueueStats {
            by_page_type: self.type_counts.clone(),
            total_queued: self.heap.len(),
            total_visited: self.visited.len(),
        }
    }

    pub fn get_state(&self) -> QueueState {
        QueueState {
            pending: self
                .heap
                .iter()
                .map(|e| (e.url.clone(), e.priority, e.depth))
                .collect(),
            visited: self.visited.iter().cloned().collect(),
            seen: self.seen.iter().cloned().collect(),
            content_hashes: self.content_hashes.iter().cloned().collect(),
            next_insertion_order: self.next_insertion_order,
        }
    }

    pub fn restore_state(&mut self, state: QueueState) {
        self.heap.clear();
        self.next_insertion_order = state.next_insertion_order;
        for (i, (url, priority, depth)) in state.pending.into_iter().enumerate() {
            self.heap.push(QueueEntry {
                url,
                priority,
                depth,
                insertion_order: i as u64,
            });
        }
        self.visited = state.visited.into_iter().collect();
        self.seen = state.seen.into_iter().collect();
        self.content_hashes = state.content_hashes.into_iter().collect();
    }
}

/// SHA-256 over whitespace-collapsed, case-folded text (glossary definition).
pub fn content_hash(text: &str) -> String {
    let normalized: String = text
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hex::encode(hasher.finalize())
}
