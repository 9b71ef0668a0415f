//! On-disk chunked block cache with an in-memory index
//!
//! Logical files (`cache_key`) are stored as independent chunks keyed by
//! `sha1(cache_key | "|" | chunk_start)` under a two-level hex fan-out. The
//! index lock is never held across disk I/O: reads are planned under the
//! lock, executed outside it, and bookkeeping is applied afterwards. A read
//! returns exactly the requested bytes or nothing at all.

use std::collections::{BTreeMap, HashMap};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;
use sha1::{Digest, Sha1};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionPolicy {
    Lru,
    Ttl,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub cache_dir: PathBuf,
    pub max_size_bytes: u64,
    pub ttl_seconds: u64,
    pub eviction: EvictionPolicy,
    pub metrics_enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("./cache"),
            max_size_bytes: 10 * 1024 * 1024 * 1024,
            ttl_seconds: 2 * 60 * 60,
            eviction: EvictionPolicy::Lru,
            metrics_enabled: true,
        }
    }
}

/// Counters exposed through `stats()`.
#[derive(Debug, Default)]
struct Metrics {
    hits: AtomicU64,
    misses: AtomicU64,
    bytes_from_cache: AtomicU64,
    bytes_written: AtomicU64,
    evictions: AtomicU64,
}

#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub bytes_from_cache: u64,
    pub bytes_written: u64,
    pub evictions: u64,
    pub total_bytes: u64,
    pub entries: usize,
}

#[derive(Debug, Clone)]
struct ChunkEntry {
    size: u64,
    /// Epoch seconds of the last recorded access. Refreshed at most every
    /// 10 s to keep index churn down.
    last_access: u64,
    cache_key: String,
    start: u64,
    /// Position in the LRU order; higher is more recent.
    seq: u64,
}

#[derive(Debug, Default)]
struct CacheIndex {
    entries: HashMap<String, ChunkEntry>,
    /// LRU order: seq → key. The lowest seq is the eviction victim.
    order: BTreeMap<u64, String>,
    /// cache_key → sorted chunk starts.
    by_key: HashMap<String, Vec<u64>>,
    total_bytes: u64,
    next_seq: u64,
}

impl CacheIndex {
    fn bump_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    /// Greatest chunk start ≤ `pos` for a cache key. The search runs until
    /// the window is exhausted rather than bailing on the first probe.
    fn find_covering_start(&self, cache_key: &str, pos: u64) -> Option<u64> {
        let starts = self.by_key.get(cache_key)?;
        let idx = starts.partition_point(|s| *s <= pos);
        if idx == 0 {
            return None;
        }
        Some(starts[idx - 1])
    }

    fn insert(&mut self, key: String, entry: ChunkEntry) {
        let starts = self.by_key.entry(entry.cache_key.clone()).or_default();
        if let Err(pos) = starts.binary_search(&entry.start) {
            starts.insert(pos, entry.start);
        }
        self.total_bytes += entry.size;
        self.order.insert(entry.seq, key.clone());
        self.entries.insert(key, entry);
    }

    fn remove(&mut self, key: &str) -> Option<ChunkEntry> {
        let entry = self.entries.remove(key)?;
        self.order.remove(&entry.seq);
        if let Some(starts) = self.by_key.get_mut(&entry.cache_key) {
            if let Ok(pos) = starts.binary_search(&entry.start) {
                starts.remove(pos);
            }
            if starts.is_empty() {
                self.by_key.remove(&entry.cache_key);
            }
        }
        self.total_bytes = self.total_bytes.saturating_sub(entry.size);
        Some(entry)
    }

    /// Move a key to the MRU end; refresh its timestamp only when the last
    /// recorded access is at least 10 s old.
    fn touch(&mut self, key: &str, now_secs: u64) {
        let seq = self.bump_seq();
        if let Some(entry) = self.entries.get_mut(key) {
            self.order.remove(&entry.seq);
            entry.seq = seq;
            self.order.insert(seq, key.to_string());
            if now_secs.saturating_sub(entry.last_access) > 10 {
                entry.last_access = now_secs;
            }
        }
    }
}

/// A planned slice read, produced under the lock and executed outside it.
struct PlannedRead {
    key: String,
    file: PathBuf,
    offset: u64,
    len: u64,
}

pub struct ChunkCache {
    cfg: CacheConfig,
    index: Mutex<CacheIndex>,
    metrics: Metrics,
    last_stats_log: AtomicU64,
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl ChunkCache {
    /// Open a cache rooted at `cfg.cache_dir`, rebuilding the index from any
    /// pre-existing files so size limits apply across restarts.
    pub async fn new(cfg: CacheConfig) -> Result<Self> {
        tokio::fs::create_dir_all(&cfg.cache_dir).await?;

        let cache = Self {
            cfg,
            index: Mutex::new(CacheIndex::default()),
            metrics: Metrics::default(),
            last_stats_log: AtomicU64::new(0),
        };

        if cache.cfg.eviction == EvictionPolicy::Lru {
            if let Err(e) = cache.rescan().await {
                debug!(error = %e, "Cache initial scan skipped");
            }
        }

        Ok(cache)
    }

    fn chunk_key(cache_key: &str, start: u64) -> String {
        let mut hasher = Sha1::new();
        hasher.update(format!("{cache_key}|{start}").as_bytes());
        hex::encode(hasher.finalize())
    }

    fn file_for(&self, key: &str) -> PathBuf {
        // Two-level fanout to avoid too many files in one dir
        self.cfg.cache_dir.join(&key[..2]).join(key)
    }

    /// Return exactly `end - start + 1` bytes when the range is fully
    /// cached, or an empty buffer (recorded as a miss) otherwise.
    pub async fn get(&self, cache_key: &str, start: u64, end: u64) -> Vec<u8> {
        if end < start {
            return Vec::new();
        }
        let needed_len = end - start + 1;

        // Fast path: a single chunk covering the whole request, planned
        // under the lock and read outside it.
        let plan = {
            let index = self.index.lock().await;
            index.find_covering_start(cache_key, start).and_then(|cs| {
                let key = Self::chunk_key(cache_key, cs);
                let entry = index.entries.get(&key)?;
                let chunk_end = cs + entry.size - 1;
                (start >= cs && end <= chunk_end).then(|| PlannedRead {
                    file: self.file_for(&key),
                    key,
                    offset: start - cs,
                    len: needed_len,
                })
            })
        };

        if let Some(plan) = plan {
            match self.read_slice(&plan.file, plan.offset, plan.len).await {
                Ok(data) => {
                    let now = now_secs();
                    self.index.lock().await.touch(&plan.key, now);
                    self.metrics.hits.fetch_add(1, Ordering::Relaxed);
                    self.metrics
                        .bytes_from_cache
                        .fetch_add(needed_len, Ordering::Relaxed);
                    return data;
                }
                Err(e) => {
                    // Stale entry pointing at a missing or short file.
                    debug!(key = %plan.key, error = %e, "Fast-path read failed, dropping entry");
                    self.index.lock().await.remove(&plan.key);
                }
            }
        }

        // Slow path: stitch contiguous chunks. Plan while holding the lock,
        // abort on the first coverage gap.
        let plans = {
            let index = self.index.lock().await;
            let mut plans: Vec<PlannedRead> = Vec::new();
            let mut pos = start;
            while pos <= end {
                let Some(cs) = index.find_covering_start(cache_key, pos) else {
                    plans.clear();
                    break;
                };
                let key = Self::chunk_key(cache_key, cs);
                let Some(entry) = index.entries.get(&key) else {
                    plans.clear();
                    break;
                };
                let chunk_end = cs + entry.size - 1;
                if pos < cs || pos > chunk_end {
                    plans.clear();
                    break;
                }
                let copy_start = pos - cs;
                let copy_end = end.min(chunk_end) - cs;
                plans.push(PlannedRead {
                    file: self.file_for(&key),
                    key,
                    offset: copy_start,
                    len: copy_end - copy_start + 1,
                });
                pos = chunk_end + 1;
            }
            plans
        };

        if !plans.is_empty() {
            let mut assembled = Vec::with_capacity(needed_len as usize);
            let mut used: Vec<String> = Vec::with_capacity(plans.len());
            let mut complete = true;

            for plan in &plans {
                match self.read_slice(&plan.file, plan.offset, plan.len).await {
                    Ok(slice) => {
                        assembled.extend_from_slice(&slice);
                        used.push(plan.key.clone());
                    }
                    Err(_) => {
                        complete = false;
                        break;
                    }
                }
            }

            if complete && assembled.len() as u64 == needed_len {
                let now = now_secs();
                let mut index = self.index.lock().await;
                for key in &used {
                    index.touch(key, now);
                }
                drop(index);
                self.metrics.hits.fetch_add(1, Ordering::Relaxed);
                self.metrics
                    .bytes_from_cache
                    .fetch_add(needed_len, Ordering::Relaxed);
                return assembled;
            }
        }

        // Fallback: probe the exact key on disk and rebuild its index entry.
        let key = Self::chunk_key(cache_key, start);
        let file = self.file_for(&key);
        let data = match tokio::fs::read(&file).await {
            Ok(data) => data,
            Err(_) => {
                self.index.lock().await.remove(&key);
                self.metrics.misses.fetch_add(1, Ordering::Relaxed);
                return Vec::new();
            }
        };

        {
            let mut index = self.index.lock().await;
            let needs_rebuild = index
                .entries
                .get(&key)
                .map(|e| e.cache_key.is_empty())
                .unwrap_or(true);
            if needs_rebuild {
                if let Some(stale) = index.remove(&key) {
                    debug!(key = %key, size = stale.size, "Rebuilding scanned index entry");
                }
                let seq = index.bump_seq();
                index.insert(
                    key.clone(),
                    ChunkEntry {
                        size: data.len() as u64,
                        last_access: now_secs(),
                        cache_key: cache_key.to_string(),
                        start,
                        seq,
                    },
                );
            }
        }

        if data.len() as u64 >= needed_len {
            self.metrics.hits.fetch_add(1, Ordering::Relaxed);
            self.metrics
                .bytes_from_cache
                .fetch_add(needed_len, Ordering::Relaxed);
            data[..needed_len as usize].to_vec()
        } else {
            self.metrics.misses.fetch_add(1, Ordering::Relaxed);
            Vec::new()
        }
    }

    async fn read_slice(&self, path: &Path, offset: u64, len: u64) -> std::io::Result<Vec<u8>> {
        let mut file = tokio::fs::File::open(path).await?;
        file.seek(SeekFrom::Start(offset)).await?;
        let mut buf = vec![0u8; len as usize];
        file.read_exact(&mut buf).await?;
        Ok(buf)
    }

    /// Store one chunk. Evicts first to make room, writes to a temp file and
    /// publishes with a rename, then updates the index.
    pub async fn put(&self, cache_key: &str, start: u64, data: &[u8]) {
        if data.is_empty() {
            return;
        }

        let need = data.len() as u64;
        match self.cfg.eviction {
            EvictionPolicy::Ttl => self.evict_ttl().await,
            EvictionPolicy::Lru => self.evict_lru(need).await,
        }

        let key = Self::chunk_key(cache_key, start);
        let file = self.file_for(&key);
        if let Err(e) = self.write_atomic(&file, data).await {
            warn!(key = %key, error = %e, "Cache write failed");
            return;
        }

        let mut index = self.index.lock().await;
        index.remove(&key);
        let seq = index.bump_seq();
        index.insert(
            key,
            ChunkEntry {
                size: need,
                last_access: now_secs(),
                cache_key: cache_key.to_string(),
                start,
                seq,
            },
        );
        drop(index);
        self.metrics.bytes_written.fetch_add(need, Ordering::Relaxed);
    }

    async fn write_atomic(&self, path: &Path, data: &[u8]) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, data).await?;
        tokio::fs::rename(&tmp, path).await
    }

    /// Whether the exact chunk at `start` fully covers `[start, end]` and
    /// its file is still on disk.
    pub async fn has(&self, cache_key: &str, start: u64, end: u64) -> bool {
        let key = Self::chunk_key(cache_key, start);
        let covered = {
            let index = self.index.lock().await;
            index
                .entries
                .get(&key)
                .map(|e| end < e.start + e.size)
                .unwrap_or(false)
        };
        covered && tokio::fs::try_exists(self.file_for(&key)).await.unwrap_or(false)
    }

    async fn evict_lru(&self, need_bytes: u64) {
        let mut victims: Vec<PathBuf> = Vec::new();
        {
            let mut index = self.index.lock().await;
            let mut target = (index.total_bytes + need_bytes).saturating_sub(self.cfg.max_size_bytes);

            while target > 0 {
                let Some((_, key)) = index.order.iter().next().map(|(s, k)| (*s, k.clone())) else {
                    break;
                };
                if let Some(entry) = index.remove(&key) {
                    target = target.saturating_sub(entry.size);
                    victims.push(self.file_for(&key));
                }
            }
        }

        for path in victims {
            let _ = tokio::fs::remove_file(&path).await;
            self.metrics.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    async fn evict_ttl(&self) {
        let now = now_secs();
        let mut victims: Vec<PathBuf> = Vec::new();
        {
            let mut index = self.index.lock().await;
            let expired: Vec<String> = index
                .entries
                .iter()
                .filter(|(_, e)| now.saturating_sub(e.last_access) > self.cfg.ttl_seconds)
                .map(|(k, _)| k.clone())
                .collect();
            for key in expired {
                index.remove(&key);
                victims.push(self.file_for(&key));
            }
        }

        for path in victims {
            let _ = tokio::fs::remove_file(&path).await;
            self.metrics.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Rebuild the index from disk, oldest mtime first, then evict back
    /// under budget. Scanned entries carry no cache_key/start mapping; the
    /// fallback probe restores it on first access.
    async fn rescan(&self) -> Result<()> {
        let dir = self.cfg.cache_dir.clone();
        let mut found: Vec<(String, u64, SystemTime)> = tokio::task::spawn_blocking(move || {
            WalkDir::new(&dir)
                .min_depth(2)
                .max_depth(2)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
                .filter_map(|e| {
                    let name = e.file_name().to_str()?.to_string();
                    if name.len() != 40 {
                        return None;
                    }
                    let meta = e.metadata().ok()?;
                    let mtime = meta.modified().ok()?;
                    Some((name, meta.len(), mtime))
                })
                .collect()
        })
        .await?;
        found.sort_by_key(|(_, _, mtime)| *mtime);

        {
            let mut index = self.index.lock().await;
            *index = CacheIndex::default();
            for (key, size, mtime) in found {
                let ts = mtime
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_secs())
                    .unwrap_or(0);
                let seq = index.bump_seq();
                index.insert(
                    key,
                    ChunkEntry {
                        size,
                        last_access: ts,
                        cache_key: String::new(),
                        start: 0,
                        seq,
                    },
                );
            }
        }

        self.evict_lru(0).await;
        Ok(())
    }

    /// Policy eviction, plus a full rescan when the running total drifted
    /// past the budget (external files, missed deletes).
    pub async fn trim(&self) {
        match self.cfg.eviction {
            EvictionPolicy::Ttl => self.evict_ttl().await,
            EvictionPolicy::Lru => self.evict_lru(0).await,
        }

        let over = { self.index.lock().await.total_bytes > self.cfg.max_size_bytes };
        if over {
            if let Err(e) = self.rescan().await {
                debug!(error = %e, "Cache rescan after drift failed");
            }
        }
    }

    pub async fn stats(&self) -> CacheStats {
        let index = self.index.lock().await;
        CacheStats {
            hits: self.metrics.hits.load(Ordering::Relaxed),
            misses: self.metrics.misses.load(Ordering::Relaxed),
            bytes_from_cache: self.metrics.bytes_from_cache.load(Ordering::Relaxed),
            bytes_written: self.metrics.bytes_written.load(Ordering::Relaxed),
            evictions: self.metrics.evictions.load(Ordering::Relaxed),
            total_bytes: index.total_bytes,
            entries: index.entries.len(),
        }
    }

    /// Trim and log stats, at most every 30 s.
    pub async fn maybe_log_stats(&self) {
        if !self.cfg.metrics_enabled {
            return;
        }
        let now = now_secs();
        let last = self.last_stats_log.load(Ordering::Relaxed);
        if now.saturating_sub(last) < 30 {
            return;
        }
        self.last_stats_log.store(now, Ordering::Relaxed);

        self.trim().await;
        let stats = self.stats().await;
        debug!(
            hits = stats.hits,
            misses = stats.misses,
            entries = stats.entries,
            total_bytes = stats.total_bytes,
            evictions = stats.evictions,
            "Cache stats"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn cache_with(max_size_bytes: u64, eviction: EvictionPolicy) -> (tempfile::TempDir, ChunkCache) {
        let dir = tempfile::tempdir().unwrap();
        let cache = ChunkCache::new(CacheConfig {
            cache_dir: dir.path().to_path_buf(),
            max_size_bytes,
            ttl_seconds: 3600,
            eviction,
            metrics_enabled: false,
        })
        .await
        .unwrap();
        (dir, cache)
    }

    #[tokio::test]
    async fn put_then_get_roundtrips() {
        let (_dir, cache) = cache_with(1 << 20, EvictionPolicy::Lru).await;
        cache.put("file", 0, &[7u8; 100]).await;

        assert!(cache.has("file", 0, 99).await);
        let data = cache.get("file", 10, 59).await;
        assert_eq!(data.len(), 50);
        assert!(data.iter().all(|b| *b == 7));
    }

    #[tokio::test]
    async fn zero_length_request_is_empty_without_io() {
        let (_dir, cache) = cache_with(1 << 20, EvictionPolicy::Lru).await;
        assert!(cache.get("file", 5, 4).await.is_empty());
        let stats = cache.stats().await;
        assert_eq!(stats.hits + stats.misses, 0);
    }

    #[tokio::test]
    async fn cross_chunk_reads_stitch() {
        let (_dir, cache) = cache_with(1 << 20, EvictionPolicy::Lru).await;
        cache.put("k", 0, &[0x01u8; 1024]).await;
        cache.put("k", 1024, &[0x02u8; 1024]).await;

        let data = cache.get("k", 1000, 1047).await;
        assert_eq!(data.len(), 48);
        assert!(data[..24].iter().all(|b| *b == 0x01));
        assert!(data[24..].iter().all(|b| *b == 0x02));
    }

    #[tokio::test]
    async fn gaps_abort_the_stitch() {
        let (_dir, cache) = cache_with(1 << 20, EvictionPolicy::Lru).await;
        cache.put("k", 0, &[1u8; 1024]).await;
        cache.put("k", 2048, &[2u8; 1024]).await;

        assert!(cache.get("k", 1000, 2100).await.is_empty());
        assert_eq!(cache.stats().await.misses, 1);
    }

    #[tokio::test]
    async fn partial_coverage_is_a_miss() {
        let (_dir, cache) = cache_with(1 << 20, EvictionPolicy::Lru).await;
        cache.put("k", 0, &[1u8; 100]).await;
        assert!(cache.get("k", 50, 150).await.is_empty());
        assert!(!cache.has("k", 0, 150).await);
    }

    #[tokio::test]
    async fn lru_evicts_oldest_first() {
        let chunk = 1024u64;
        let (_dir, cache) = cache_with(3 * chunk, EvictionPolicy::Lru).await;

        cache.put("a", 0, &[1u8; 1024]).await;
        cache.put("b", 0, &[2u8; 1024]).await;
        cache.put("c", 0, &[3u8; 1024]).await;
        cache.put("d", 0, &[4u8; 1024]).await;

        assert!(!cache.has("a", 0, 1023).await);
        assert!(cache.has("b", 0, 1023).await);
        assert!(cache.has("c", 0, 1023).await);
        assert!(cache.has("d", 0, 1023).await);
        assert!(cache.stats().await.total_bytes <= 3 * chunk);
    }

    #[tokio::test]
    async fn reads_refresh_lru_position() {
        let chunk = 1024u64;
        let (_dir, cache) = cache_with(3 * chunk, EvictionPolicy::Lru).await;

        cache.put("a", 0, &[1u8; 1024]).await;
        cache.put("b", 0, &[2u8; 1024]).await;
        cache.put("c", 0, &[3u8; 1024]).await;
        // Touch a so b becomes the eviction victim.
        assert_eq!(cache.get("a", 0, 1023).await.len(), 1024);
        cache.put("d", 0, &[4u8; 1024]).await;

        assert!(cache.has("a", 0, 1023).await);
        assert!(!cache.has("b", 0, 1023).await);
    }

    #[tokio::test]
    async fn ttl_eviction_drops_stale_entries() {
        let (_dir, cache) = cache_with(1 << 20, EvictionPolicy::Ttl).await;
        cache.put("a", 0, &[1u8; 64]).await;

        // Age the entry past the TTL by hand.
        {
            let mut index = cache.index.lock().await;
            for entry in index.entries.values_mut() {
                entry.last_access = 0;
            }
        }
        cache.put("b", 0, &[2u8; 64]).await;

        assert!(!cache.has("a", 0, 63).await);
        assert!(cache.has("b", 0, 63).await);
    }

    #[tokio::test]
    async fn overwriting_a_chunk_keeps_accounting_straight() {
        let (_dir, cache) = cache_with(1 << 20, EvictionPolicy::Lru).await;
        cache.put("k", 0, &[1u8; 512]).await;
        cache.put("k", 0, &[2u8; 1024]).await;

        let stats = cache.stats().await;
        assert_eq!(stats.total_bytes, 1024);
        assert_eq!(stats.entries, 1);
        assert_eq!(cache.get("k", 0, 1023).await.len(), 1024);
    }

    #[tokio::test]
    async fn restart_rescan_applies_the_budget() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = CacheConfig {
            cache_dir: dir.path().to_path_buf(),
            max_size_bytes: 1 << 20,
            ttl_seconds: 3600,
            eviction: EvictionPolicy::Lru,
            metrics_enabled: false,
        };

        {
            let cache = ChunkCache::new(cfg.clone()).await.unwrap();
            for i in 0..4u64 {
                cache.put("k", i * 1024, &[i as u8; 1024]).await;
            }
        }

        let reopened = ChunkCache::new(CacheConfig {
            max_size_bytes: 2048,
            ..cfg
        })
        .await
        .unwrap();

        let stats = reopened.stats().await;
        assert!(stats.total_bytes <= 2048);
        assert!(stats.entries <= 2);
    }

    #[tokio::test]
    async fn fallback_probe_rebuilds_after_restart() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = CacheConfig {
            cache_dir: dir.path().to_path_buf(),
            max_size_bytes: 1 << 20,
            ttl_seconds: 3600,
            eviction: EvictionPolicy::Lru,
            metrics_enabled: false,
        };

        {
            let cache = ChunkCache::new(cfg.clone()).await.unwrap();
            cache.put("k", 4096, &[9u8; 256]).await;
        }

        let reopened = ChunkCache::new(cfg).await.unwrap();
        // The scan knows the file but not its (cache_key, start) mapping;
        // the probe restores it and serves the read.
        let data = reopened.get("k", 4096, 4159).await;
        assert_eq!(data.len(), 64);
        assert!(data.iter().all(|b| *b == 9));
        // Subsequent reads hit the fast path through the rebuilt entry.
        assert_eq!(reopened.get("k", 4100, 4110).await.len(), 11);
    }
}
