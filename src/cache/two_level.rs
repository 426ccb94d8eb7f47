//! Memory + disk result cache
use crate::cache::disk::{DiskCache, DiskEntry};
use crate::config::CacheSettings;
use crate::error::Result;
use log::{debug, warn};
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn expiry_after(ttl: Duration) -> u64 {
    now_ms().saturating_add(ttl.as_millis() as u64)
}

#[derive(Debug, Clone)]
struct MemoryEntry {
    data: Vec<u8>,
    expires_at_ms: u64,
}

impl MemoryEntry {
    fn is_live(&self, now: u64) -> bool {
        self.expires_at_ms > now
    }
}

/// Two-level cache: a bounded LRU memory tier in front of a directory of
/// cache files.
pub struct TwoLevelCache {
    memory: Mutex<LruCache<String, MemoryEntry>>,
    disk: DiskCache,
}

impl TwoLevelCache {
    pub fn open(settings: &CacheSettings) -> Result<Self> {
        let capacity = NonZeroUsize::new(settings.max_memory_entries).unwrap_or(NonZeroUsize::MIN);
        let disk = DiskCache::open(&settings.path)?;
        debug!(
            "Opened two-level cache at {} (memory capacity {})",
            disk.dir().display(),
            capacity
        );
        Ok(Self {
            memory: Mutex::new(LruCache::new(capacity)),
            disk,
        })
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let now = now_ms();
        {
            let mut memory = self.memory.lock();
            match memory.get(key) {
                Some(entry) if entry.is_live(now) => return Some(entry.data.clone()),
                Some(_) => {
                    memory.pop(key);
                }
                None => {}
            }
        }

        let entry = match self.disk.read(key) {
            Ok(entry) => entry?,
            Err(e) => {
                warn!("Cache disk read failed for '{key}': {e}");
                return None;
            }
        };

        if entry.expires_at_ms <= now {
            if let Err(e) = self.disk.remove(key) {
                debug!("Failed to remove expired cache file for '{key}': {e}");
            }
            return None;
        }

        self.memory.lock().put(
            key.to_string(),
            MemoryEntry {
                data: entry.data.clone(),
                expires_at_ms: entry.expires_at_ms,
            },
        );
        Some(entry.data)
    }

    /// Fast-tier write; durability comes later from the batch writer or a flush.
    pub fn set_memory_only(&self, key: &str, data: &[u8], ttl: Duration) {
        self.memory.lock().put(
            key.to_string(),
            MemoryEntry {
                data: data.to_vec(),
                expires_at_ms: expiry_after(ttl),
            },
        );
    }

    pub fn set_both_levels(&self, key: &str, data: &[u8], ttl: Duration) -> Result<()> {
        let expires_at_ms = expiry_after(ttl);
        self.memory.lock().put(
            key.to_string(),
            MemoryEntry {
                data: data.to_vec(),
                expires_at_ms,
            },
        );
        self.disk.write(&DiskEntry {
            key: key.to_string(),
            expires_at_ms,
            data: data.to_vec(),
        })
    }

    /// Persist every live memory entry. Returns how many were written.
    pub fn flush_memory_to_disk(&self) -> Result<usize> {
        let now = now_ms();
        let snapshot: Vec<DiskEntry> = self
            .memory
            .lock()
            .iter()
            .filter(|(_, entry)| entry.is_live(now))
            .map(|(key, entry)| DiskEntry {
                key: key.clone(),
                expires_at_ms: entry.expires_at_ms,
                data: entry.data.clone(),
            })
            .collect();

        let mut written = 0;
        let mut first_error = None;
        for entry in &snapshot {
            match self.disk.write(entry) {
                Ok(()) => written += 1,
                Err(e) => {
                    warn!("Failed to persist cache entry '{}': {e}", entry.key);
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                debug!("Flushed {written} memory cache entries to disk");
                Ok(written)
            }
        }
    }

    pub fn memory_len(&self) -> usize {
        self.memory.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn settings(dir: &Path, capacity: usize) -> CacheSettings {
        CacheSettings {
            enabled: true,
            path: dir.to_path_buf(),
            max_memory_entries: capacity,
            ttl_minutes: 60,
        }
    }

    #[test]
    fn test_memory_only_is_not_durable() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TwoLevelCache::open(&settings(dir.path(), 10)).unwrap();
        cache.set_memory_only("k", b"v", Duration::from_secs(60));
        assert_eq!(cache.get("k"), Some(b"v".to_vec()));

        let reopened = TwoLevelCache::open(&settings(dir.path(), 10)).unwrap();
        assert_eq!(reopened.get("k"), None);
    }

    #[test]
    fn test_both_levels_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TwoLevelCache::open(&settings(dir.path(), 10)).unwrap();
        cache.set_both_levels("k", b"v", Duration::from_secs(60)).unwrap();

        let reopened = TwoLevelCache::open(&settings(dir.path(), 10)).unwrap();
        assert_eq!(reopened.get("k"), Some(b"v".to_vec()));
        assert_eq!(reopened.memory_len(), 1);
    }

    #[test]
    fn test_flush_memory_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TwoLevelCache::open(&settings(dir.path(), 10)).unwrap();
        cache.set_memory_only("a", b"1", Duration::from_secs(60));
        cache.set_memory_only("b", b"2", Duration::from_secs(60));
        assert_eq!(cache.flush_memory_to_disk().unwrap(), 2);

        let reopened = TwoLevelCache::open(&settings(dir.path(), 10)).unwrap();
        assert_eq!(reopened.get("a"), Some(b"1".to_vec()));
        assert_eq!(reopened.get("b"), Some(b"2".to_vec()));
    }

    #[test]
    fn test_expired_entries_are_misses() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TwoLevelCache::open(&settings(dir.path(), 10)).unwrap();
        cache.set_both_levels("k", b"v", Duration::ZERO).unwrap();
        assert_eq!(cache.get("k"), None);
        assert_eq!(cache.flush_memory_to_disk().unwrap(), 0);
    }

    #[test]
    fn test_memory_tier_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TwoLevelCache::open(&settings(dir.path(), 2)).unwrap();
        for key in ["a", "b", "c"] {
            cache.set_memory_only(key, b"v", Duration::from_secs(60));
        }
        assert_eq!(cache.memory_len(), 2);
        assert_eq!(cache.get("a"), None);
    }
}
