//! Release storage
//!
//! Release versions are persisted through the [`StorageDriver`] trait. The
//! engine only needs keyed access by name and version plus a "last version"
//! lookup; concrete backends live outside this crate, except for the
//! in-memory [`MemoryDriver`].
//!
//! Records are encoded as camelCase JSON, compressed, then base64 encoded.
//! Zstd is the default compression; gzip is kept for interoperability.

mod memory;

pub use memory::{MemoryDriver, OperationCounts};

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rudder_core::ReleaseStatus;
use serde::{Deserialize, Serialize};

use crate::error::{KubeError, Result};
use crate::release::Release;

/// Label keys derived from the record by the storage layer
///
/// Callers may not supply any of these.
pub const SYSTEM_LABELS: &[&str] = &["name", "owner", "status", "version", "createdAt", "modifiedAt"];

/// Owner label value
pub const OWNER: &str = "rudder";

/// Storage driver for release records
///
/// `get` and `last` on a missing name fail with
/// [`KubeError::ReleaseNotFound`]; callers match on that variant.
/// `create` must reject an existing name and version, which is the only
/// guard against two concurrent installs of the same name.
#[async_trait]
pub trait StorageDriver: Send + Sync {
    /// Get a specific version
    async fn get(&self, namespace: &str, name: &str, version: u32) -> Result<Release>;

    /// Get the highest version of a name
    async fn last(&self, namespace: &str, name: &str) -> Result<Release>;

    /// All versions of a name, newest first
    async fn history(&self, namespace: &str, name: &str) -> Result<Vec<Release>>;

    /// Every stored version, optionally limited to one namespace
    async fn list(&self, namespace: Option<&str>) -> Result<Vec<Release>>;

    /// Store a new version
    async fn create(&self, release: &Release) -> Result<()>;

    /// Replace a stored version
    async fn update(&self, release: &Release) -> Result<()>;

    /// Remove a stored version
    async fn delete(&self, namespace: &str, name: &str, version: u32) -> Result<Release>;

    /// Latest `deployed` version
    async fn deployed(&self, namespace: &str, name: &str) -> Result<Release> {
        self.history(namespace, name)
            .await?
            .into_iter()
            .find(|r| r.status() == ReleaseStatus::Deployed)
            .ok_or_else(|| KubeError::NoDeployedRelease {
                name: name.to_string(),
            })
    }

    /// Check if any version exists
    async fn exists(&self, namespace: &str, name: &str) -> Result<bool> {
        match self.last(namespace, name).await {
            Ok(_) => Ok(true),
            Err(KubeError::ReleaseNotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Compression method for release data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum CompressionMethod {
    /// No compression
    None,

    /// Gzip compression (Helm-compatible)
    Gzip { level: u32 },

    /// Zstd compression (better ratio, faster)
    Zstd { level: i32 },
}

impl Default for CompressionMethod {
    fn default() -> Self {
        Self::Zstd { level: 3 }
    }
}

/// Compress data using the configured method
#[must_use = "compression result should be used"]
pub fn compress(data: &[u8], method: CompressionMethod) -> Result<Vec<u8>> {
    match method {
        CompressionMethod::None => Ok(data.to_vec()),
        CompressionMethod::Gzip { level } => {
            use std::io::Write;
            let mut encoder =
                flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::new(level));
            encoder
                .write_all(data)
                .map_err(|e| KubeError::Compression(e.to_string()))?;
            encoder
                .finish()
                .map_err(|e| KubeError::Compression(e.to_string()))
        }
        CompressionMethod::Zstd { level } => zstd::encode_all(std::io::Cursor::new(data), level)
            .map_err(|e| KubeError::Compression(e.to_string())),
    }
}

/// Decompress data
#[must_use = "decompression result should be used"]
pub fn decompress(data: &[u8], method: CompressionMethod) -> Result<Vec<u8>> {
    match method {
        CompressionMethod::None => Ok(data.to_vec()),
        CompressionMethod::Gzip { .. } => {
            use std::io::Read;
            let mut decoder = flate2::read::GzDecoder::new(data);
            let mut decompressed = Vec::new();
            decoder
                .read_to_end(&mut decompressed)
                .map_err(|e| KubeError::Compression(e.to_string()))?;
            Ok(decompressed)
        }
        CompressionMethod::Zstd { .. } => zstd::decode_all(std::io::Cursor::new(data))
            .map_err(|e| KubeError::Compression(e.to_string())),
    }
}

/// Encode a release for storage (serialize + compress + base64)
#[must_use = "encoded data should be used for storage"]
pub fn encode_release(release: &Release, method: CompressionMethod) -> Result<String> {
    let json = serde_json::to_vec(release)?;
    let compressed = compress(&json, method)?;
    Ok(base64::Engine::encode(
        &base64::engine::general_purpose::STANDARD,
        &compressed,
    ))
}

/// Decode a stored release (base64 + decompress + deserialize)
#[must_use = "decoded release should be used"]
pub fn decode_release(data: &str, method: CompressionMethod) -> Result<Release> {
    let decoded = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, data)
        .map_err(|e| KubeError::Serialization(format!("base64 decode error: {}", e)))?;
    let decompressed = decompress(&decoded, method)?;
    Ok(serde_json::from_slice(&decompressed)?)
}

/// Labels the storage layer attaches to a record
pub fn system_labels(
    release: &Release,
    created_at: DateTime<Utc>,
    modified_at: Option<DateTime<Utc>>,
) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert("name".to_string(), release.name.clone());
    labels.insert("owner".to_string(), OWNER.to_string());
    labels.insert("status".to_string(), release.status().to_string());
    labels.insert("version".to_string(), release.version.to_string());
    labels.insert("createdAt".to_string(), created_at.timestamp().to_string());
    if let Some(modified) = modified_at {
        labels.insert("modifiedAt".to_string(), modified.timestamp().to_string());
    }
    labels
}

/// Reserved keys present in `labels`, in [`SYSTEM_LABELS`] order
pub fn reserved_labels_in<'a, V>(labels: impl IntoIterator<Item = (&'a String, V)>) -> Vec<String> {
    let keys: Vec<&String> = labels.into_iter().map(|(k, _)| k).collect();
    SYSTEM_LABELS
        .iter()
        .filter(|reserved| keys.iter().any(|k| k.as_str() == **reserved))
        .map(|s| s.to_string())
        .collect()
}
