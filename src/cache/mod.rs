pub mod disk;
pub mod flight;

pub use disk::DiskCache;
pub use flight::{Flight, FlightGuard, FlightWait, SingleFlight};

use crate::config::OUTPUT_EXTENSION;
use crate::transform::Geometry;
use crate::url_codec;
use crate::ProxyError;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;
use std::time::SystemTime;

/// Longest file name most filesystems accept.
const MAX_FILE_NAME: usize = 255;

/// File name of one transform result: `{op}_{geometry}_{url-token}.webp`.
///
/// The url segment is the canonical unpadded token of the decoded source
/// URL, so every spelling of the same token maps to one key. Names that would
/// not fit on disk carry `h` + SHA-256 hex instead; that segment is 65
/// characters and unpadded base64 is never 1 mod 4 long, so the two forms
/// cannot collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(geometry: &Geometry, source_url: &str) -> Self {
        let op = geometry.operation();
        let token = url_codec::encode(source_url);
        let key = format!("{}_{}_{}.{}", op, geometry, token, OUTPUT_EXTENSION);
        if key.len() <= MAX_FILE_NAME {
            return Self(key);
        }

        let digest = hex::encode(Sha256::digest(source_url.as_bytes()));
        Self(format!("{}_{}_h{}.{}", op, geometry, digest, OUTPUT_EXTENSION))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A stored transform result and its filesystem timestamp.
#[derive(Debug, Clone)]
pub struct CachedEntry {
    pub bytes: Bytes,
    pub modified: SystemTime,
}

/// Trait for cache backends
///
/// Existence and metadata come from the backing store on every call; nothing
/// is indexed in memory.
#[async_trait::async_trait]
pub trait CacheStore: Send + Sync {
    async fn exists(&self, key: &CacheKey) -> Result<bool, ProxyError>;

    /// Fails with `StorageError` when the entry is missing.
    async fn read(&self, key: &CacheKey) -> Result<Bytes, ProxyError>;

    /// Readers see either the previous state or the complete new entry.
    async fn write_atomic(&self, key: &CacheKey, bytes: &[u8]) -> Result<(), ProxyError>;

    async fn modified(&self, key: &CacheKey) -> Result<SystemTime, ProxyError>;

    /// Directory to expose under `/cache`, if the backend has one.
    fn root(&self) -> Option<&Path> {
        None
    }

    /// Exists check followed by read and stat.
    async fn load(&self, key: &CacheKey) -> Result<Option<CachedEntry>, ProxyError> {
        if !self.exists(key).await? {
            return Ok(None);
        }
        let bytes = self.read(key).await?;
        let modified = self.modified(key).await?;
        Ok(Some(CachedEntry { bytes, modified }))
    }
}
