//! Durable tier of the two-level cache.
//!
//! One file per key. Frame layout:
//! `[expires_at_ms: u64 LE][key_len: u32 LE][key bytes][data bytes]`.
use crate::cache::key::file_stem;
use crate::error::Result;
use log::warn;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

const HEADER_LEN: usize = 8 + 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskEntry {
    pub key: String,
    pub expires_at_ms: u64,
    pub data: Vec<u8>,
}

impl DiskEntry {
    fn encode(&self) -> Vec<u8> {
        let key = self.key.as_bytes();
        let mut buf = Vec::with_capacity(HEADER_LEN + key.len() + self.data.len());
        buf.extend_from_slice(&self.expires_at_ms.to_le_bytes());
        buf.extend_from_slice(&(key.len() as u32).to_le_bytes());
        buf.extend_from_slice(key);
        buf.extend_from_slice(&self.data);
        buf
    }

    fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < HEADER_LEN {
            return None;
        }
        let expires_at_ms = u64::from_le_bytes(bytes[0..8].try_into().ok()?);
        let key_len = u32::from_le_bytes(bytes[8..12].try_into().ok()?) as usize;
        let key_end = HEADER_LEN.checked_add(key_len)?;
        if bytes.len() < key_end {
            return None;
        }
        let key = String::from_utf8(bytes[HEADER_LEN..key_end].to_vec()).ok()?;
        Some(Self {
            key,
            expires_at_ms,
            data: bytes[key_end..].to_vec(),
        })
    }
}

pub struct DiskCache {
    dir: PathBuf,
    tmp_counter: AtomicU64,
}

impl DiskCache {
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            tmp_counter: AtomicU64::new(0),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.cache", file_stem(key)))
    }

    /// Read the entry stored for `key`. Corrupt frames and frames stored for a
    /// different key read as a miss.
    pub fn read(&self, key: &str) -> Result<Option<DiskEntry>> {
        let path = self.path_for(key);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match DiskEntry::decode(&bytes) {
            Some(entry) if entry.key == key => Ok(Some(entry)),
            Some(_) => Ok(None),
            None => {
                warn!("Discarding corrupt cache file {}", path.display());
                let _ = fs::remove_file(&path);
                Ok(None)
            }
        }
    }

    /// Write via a temp file and rename so readers never see a torn frame.
    pub fn write(&self, entry: &DiskEntry) -> Result<()> {
        let path = self.path_for(&entry.key);
        let n = self.tmp_counter.fetch_add(1, Ordering::Relaxed);
        let tmp = path.with_extension(format!("tmp{n}"));
        fs::write(&tmp, entry.encode())?;
        if let Err(e) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let disk = DiskCache::open(dir.path()).unwrap();
        let entry = DiskEntry {
            key: "tg:movie:a".to_string(),
            expires_at_ms: 123,
            data: b"payload".to_vec(),
        };

        disk.write(&entry).unwrap();
        assert_eq!(disk.read("tg:movie:a").unwrap(), Some(entry));
        assert_eq!(disk.read("tg:other:a").unwrap(), None);
    }

    #[test]
    fn test_corrupt_file_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let disk = DiskCache::open(dir.path()).unwrap();
        let path = disk.path_for("k");
        fs::write(&path, b"short").unwrap();

        assert_eq!(disk.read("k").unwrap(), None);
        assert!(!path.exists());
    }

    #[test]
    fn test_remove_missing_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let disk = DiskCache::open(dir.path()).unwrap();
        disk.remove("absent").unwrap();
    }
}
