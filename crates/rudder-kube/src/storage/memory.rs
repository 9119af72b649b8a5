//! In-memory storage driver
//!
//! Records are kept encoded, exactly as a cluster-backed driver would store
//! them, so a caller can never mutate a stored snapshot through a shared
//! reference. Used by tests and by client-only tooling.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{CompressionMethod, StorageDriver, decode_release, encode_release, system_labels};
use crate::error::{KubeError, Result};
use crate::release::Release;

type Store = HashMap<String, HashMap<String, BTreeMap<u32, StoredRecord>>>;

#[derive(Debug, Clone)]
struct StoredRecord {
    data: String,
    labels: BTreeMap<String, String>,
    created_at: DateTime<Utc>,
}

/// In-memory storage driver
#[derive(Clone, Default)]
pub struct MemoryDriver {
    compression: CompressionMethod,
    /// namespace -> name -> version -> record
    store: Arc<RwLock<Store>>,
    /// Track operation counts for assertions
    operations: Arc<RwLock<OperationCounts>>,
}

/// Counts of operations performed
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OperationCounts {
    pub gets: usize,
    pub lists: usize,
    pub creates: usize,
    pub updates: usize,
    pub deletes: usize,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_compression(mut self, compression: CompressionMethod) -> Self {
        self.compression = compression;
        self
    }

    pub fn operation_counts(&self) -> OperationCounts {
        self.operations
            .read()
            .map(|ops| ops.clone())
            .unwrap_or_default()
    }

    /// Count stored versions across all names
    pub fn release_count(&self) -> usize {
        self.store
            .read()
            .map(|store| {
                store
                    .values()
                    .flat_map(|ns| ns.values())
                    .map(|versions| versions.len())
                    .sum()
            })
            .unwrap_or(0)
    }

    /// System labels of a stored version
    pub fn labels(&self, namespace: &str, name: &str, version: u32) -> Option<BTreeMap<String, String>> {
        let store = self.store.read().ok()?;
        store
            .get(namespace)?
            .get(name)?
            .get(&version)
            .map(|record| record.labels.clone())
    }

    fn count(&self, f: impl FnOnce(&mut OperationCounts)) {
        if let Ok(mut ops) = self.operations.write() {
            f(&mut ops);
        }
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Store>> {
        self.store
            .read()
            .map_err(|_| KubeError::Storage("release store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Store>> {
        self.store
            .write()
            .map_err(|_| KubeError::Storage("release store lock poisoned".to_string()))
    }

    fn decode(&self, record: &StoredRecord) -> Result<Release> {
        decode_release(&record.data, self.compression)
    }

    fn not_found(namespace: &str, name: &str) -> KubeError {
        KubeError::ReleaseNotFound {
            name: name.to_string(),
            namespace: namespace.to_string(),
        }
    }
}

#[async_trait]
impl StorageDriver for MemoryDriver {
    async fn get(&self, namespace: &str, name: &str, version: u32) -> Result<Release> {
        self.count(|ops| ops.gets += 1);
        let store = self.read()?;
        let record = store
            .get(namespace)
            .and_then(|ns| ns.get(name))
            .and_then(|versions| versions.get(&version))
            .ok_or_else(|| Self::not_found(namespace, name))?;
        self.decode(record)
    }

    async fn last(&self, namespace: &str, name: &str) -> Result<Release> {
        self.count(|ops| ops.gets += 1);
        let store = self.read()?;
        let record = store
            .get(namespace)
            .and_then(|ns| ns.get(name))
            .and_then(|versions| versions.values().next_back())
            .ok_or_else(|| Self::not_found(namespace, name))?;
        self.decode(record)
    }

    async fn history(&self, namespace: &str, name: &str) -> Result<Vec<Release>> {
        self.count(|ops| ops.lists += 1);
        let store = self.read()?;
        let versions = store
            .get(namespace)
            .and_then(|ns| ns.get(name))
            .filter(|versions| !versions.is_empty())
            .ok_or_else(|| Self::not_found(namespace, name))?;

        versions
            .values()
            .rev()
            .map(|record| self.decode(record))
            .collect()
    }

    async fn list(&self, namespace: Option<&str>) -> Result<Vec<Release>> {
        self.count(|ops| ops.lists += 1);
        let store = self.read()?;
        let mut releases = store
            .iter()
            .filter(|(ns, _)| namespace.map(|n| n == ns.as_str()).unwrap_or(true))
            .flat_map(|(_, names)| names.values())
            .flat_map(|versions| versions.values())
            .map(|record| self.decode(record))
            .collect::<Result<Vec<_>>>()?;

        releases.sort_by(|a, b| {
            (&a.namespace, &a.name, b.version).cmp(&(&b.namespace, &b.name, a.version))
        });
        Ok(releases)
    }

    async fn create(&self, release: &Release) -> Result<()> {
        self.count(|ops| ops.creates += 1);
        let data = encode_release(release, self.compression)?;
        let created_at = Utc::now();

        let mut store = self.write()?;
        let versions = store
            .entry(release.namespace.clone())
            .or_default()
            .entry(release.name.clone())
            .or_default();

        if versions.contains_key(&release.version) {
            return Err(KubeError::ReleaseAlreadyExists {
                name: release.name.clone(),
                namespace: release.namespace.clone(),
                version: release.version,
            });
        }

        versions.insert(
            release.version,
            StoredRecord {
                data,
                labels: system_labels(release, created_at, None),
                created_at,
            },
        );
        Ok(())
    }

    async fn update(&self, release: &Release) -> Result<()> {
        self.count(|ops| ops.updates += 1);
        let data = encode_release(release, self.compression)?;

        let mut store = self.write()?;
        let record = store
            .get_mut(&release.namespace)
            .and_then(|ns| ns.get_mut(&release.name))
            .and_then(|versions| versions.get_mut(&release.version))
            .ok_or_else(|| Self::not_found(&release.namespace, &release.name))?;

        record.data = data;
        record.labels = system_labels(release, record.created_at, Some(Utc::now()));
        Ok(())
    }

    async fn delete(&self, namespace: &str, name: &str, version: u32) -> Result<Release> {
        self.count(|ops| ops.deletes += 1);
        let mut store = self.write()?;
        let names = store
            .get_mut(namespace)
            .ok_or_else(|| Self::not_found(namespace, name))?;
        let versions = names
            .get_mut(name)
            .ok_or_else(|| Self::not_found(namespace, name))?;
        let record = versions
            .remove(&version)
            .ok_or_else(|| Self::not_found(namespace, name))?;

        if versions.is_empty() {
            names.remove(name);
        }
        self.decode(&record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rudder_core::{Bundle, ReleaseStatus};
    use semver::Version;

    fn release(name: &str, version: u32) -> Release {
        Release::new(name, "default", version, Bundle::new("demo", Version::new(1, 0, 0)).metadata)
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let driver = MemoryDriver::new();
        driver.create(&release("web", 1)).await.unwrap();

        let got = driver.get("default", "web", 1).await.unwrap();
        assert_eq!(got.name, "web");
        assert_eq!(driver.release_count(), 1);
        assert_eq!(driver.operation_counts().creates, 1);
    }

    #[tokio::test]
    async fn test_create_conflict() {
        let driver = MemoryDriver::new();
        driver.create(&release("web", 1)).await.unwrap();
        let err = driver.create(&release("web", 1)).await.unwrap_err();
        assert!(matches!(err, KubeError::ReleaseAlreadyExists { version: 1, .. }));
    }

    #[tokio::test]
    async fn test_missing_is_release_not_found() {
        let driver = MemoryDriver::new();
        assert!(driver.last("default", "web").await.unwrap_err().is_release_not_found());
        assert!(driver.get("default", "web", 1).await.unwrap_err().is_release_not_found());
        assert!(driver.history("default", "web").await.unwrap_err().is_release_not_found());
        assert!(!driver.exists("default", "web").await.unwrap());
    }

    #[tokio::test]
    async fn test_last_and_history_order() {
        let driver = MemoryDriver::new();
        for v in [1, 2, 10] {
            driver.create(&release("web", v)).await.unwrap();
        }

        assert_eq!(driver.last("default", "web").await.unwrap().version, 10);
        let versions: Vec<u32> = driver
            .history("default", "web")
            .await
            .unwrap()
            .iter()
            .map(|r| r.version)
            .collect();
        assert_eq!(versions, vec![10, 2, 1]);
    }

    #[tokio::test]
    async fn test_stored_snapshot_is_immutable() {
        let driver = MemoryDriver::new();
        let mut r = release("web", 1);
        driver.create(&r).await.unwrap();

        r.set_status(ReleaseStatus::Deployed, "Install complete");
        assert_eq!(driver.get("default", "web", 1).await.unwrap().status(), ReleaseStatus::Unknown);

        driver.update(&r).await.unwrap();
        assert_eq!(driver.get("default", "web", 1).await.unwrap().status(), ReleaseStatus::Deployed);

        let labels = driver.labels("default", "web", 1).unwrap();
        assert_eq!(labels["status"], "deployed");
        assert!(labels.contains_key("modifiedAt"));
    }

    #[tokio::test]
    async fn test_update_missing() {
        let driver = MemoryDriver::new();
        assert!(driver.update(&release("web", 1)).await.unwrap_err().is_release_not_found());
    }

    #[tokio::test]
    async fn test_deployed_lookup() {
        let driver = MemoryDriver::new();
        let mut first = release("web", 1);
        first.set_status(ReleaseStatus::Deployed, "Install complete");
        driver.create(&first).await.unwrap();
        let mut second = release("web", 2);
        second.set_status(ReleaseStatus::Failed, "Upgrade \"web\" failed");
        driver.create(&second).await.unwrap();

        assert_eq!(driver.deployed("default", "web").await.unwrap().version, 1);

        driver.delete("default", "web", 1).await.unwrap();
        let err = driver.deployed("default", "web").await.unwrap_err();
        assert!(matches!(err, KubeError::NoDeployedRelease { .. }));
    }

    #[tokio::test]
    async fn test_delete_last_version_forgets_name() {
        let driver = MemoryDriver::new().with_compression(CompressionMethod::Gzip { level: 6 });
        driver.create(&release("web", 1)).await.unwrap();
        driver.create(&release("api", 1)).await.unwrap();

        let removed = driver.delete("default", "web", 1).await.unwrap();
        assert_eq!(removed.name, "web");
        assert!(!driver.exists("default", "web").await.unwrap());
        assert_eq!(driver.list(Some("default")).await.unwrap().len(), 1);
        assert!(driver.list(Some("other")).await.unwrap().is_empty());
    }
}
