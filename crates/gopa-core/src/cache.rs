//! Date-stamped, read-through cache of the release catalog
//!
//! The manifest lives at `<root>/versions.txt`: the first line is the
//! calendar date of the last fetch (`YYYY-MM-DD`), every following line one
//! release tag, newest first. A manifest stamped before today is expired and
//! refreshed on the next read.

use crate::catalog::VersionSource;
use crate::config::DataDir;
use crate::errors::{GopaError, GopaResult};
use crate::version::{sort_descending, VersionTag};
use chrono::NaiveDate;
use std::io::Write;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Source of "today" for expiry decisions
pub trait Clock: Send + Sync {
    fn today(&self) -> NaiveDate;
}

/// Local calendar date of the host
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        chrono::Local::now().date_naive()
    }
}

/// Persisted catalog snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheManifest {
    pub fetched_on: NaiveDate,
    pub versions: Vec<VersionTag>,
}

impl CacheManifest {
    pub fn new(fetched_on: NaiveDate, versions: Vec<VersionTag>) -> Self {
        Self {
            fetched_on,
            versions: sort_descending(versions),
        }
    }

    pub fn is_expired(&self, today: NaiveDate) -> bool {
        self.fetched_on < today
    }

    /// Parse manifest text. Returns `None` when the date line is unusable.
    pub fn parse(content: &str, toolchain_name: &str) -> Option<Self> {
        let mut lines = content.lines();
        let stamp = lines.next()?.trim();
        let fetched_on = match NaiveDate::parse_from_str(stamp, DATE_FORMAT) {
            Ok(date) => date,
            Err(e) => {
                log::warn!("Ignoring manifest with bad date line '{}': {}", stamp, e);
                return None;
            }
        };

        let mut versions = Vec::new();
        for line in lines.map(str::trim).filter(|l| !l.is_empty()) {
            match VersionTag::parse(toolchain_name, line) {
                Ok(tag) => versions.push(tag),
                Err(_) => log::warn!("Skipping unreadable manifest line '{}'", line),
            }
        }

        Some(Self::new(fetched_on, versions))
    }

    pub fn render(&self) -> String {
        let mut out = format!("{}\n", self.fetched_on.format(DATE_FORMAT));
        for version in &self.versions {
            out.push_str(version.as_str());
            out.push('\n');
        }
        out
    }
}

/// Read-through cache in front of a [`VersionSource`]
pub struct VersionCache {
    data: DataDir,
    toolchain_name: String,
    source: Arc<dyn VersionSource>,
    clock: Arc<dyn Clock>,
}

impl VersionCache {
    pub fn new(
        data: DataDir,
        toolchain_name: impl Into<String>,
        source: Arc<dyn VersionSource>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            data,
            toolchain_name: toolchain_name.into(),
            source,
            clock,
        }
    }

    /// Current catalog, fetched at most once per calendar day.
    ///
    /// When a refresh fails the error is returned and the manifest on disk is
    /// left exactly as it was.
    pub async fn get_versions(&self, cancel: &CancellationToken) -> GopaResult<Vec<VersionTag>> {
        let today = self.clock.today();

        match self.read_manifest().await? {
            Some(manifest) if !manifest.is_expired(today) => {
                log::debug!(
                    "Using cached catalog from {} ({} releases)",
                    manifest.fetched_on,
                    manifest.versions.len()
                );
                return Ok(manifest.versions);
            }
            Some(manifest) => {
                log::info!("Cached catalog from {} expired, refreshing", manifest.fetched_on)
            }
            None => log::info!("No usable catalog cache, fetching"),
        }

        let versions = self.source.fetch_catalog(cancel).await?;
        let manifest = CacheManifest::new(today, versions);

        let data = self.data.clone();
        let to_write = manifest.clone();
        tokio::task::spawn_blocking(move || write_manifest(&data, &to_write))
            .await
            .map_err(|e| GopaError::Filesystem {
                context: "writing catalog manifest".to_string(),
                message: e.to_string(),
            })??;

        Ok(manifest.versions)
    }

    /// The manifest on disk, if present and readable
    pub async fn read_manifest(&self) -> GopaResult<Option<CacheManifest>> {
        let path = self.data.manifest_file();
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(CacheManifest::parse(&content, &self.toolchain_name)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(GopaError::filesystem("reading", &path, e)),
        }
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }
}

/// Replace the manifest atomically under the data directory lock
fn write_manifest(data: &DataDir, manifest: &CacheManifest) -> GopaResult<()> {
    data.ensure()?;
    let _lock = data.lock()?;

    let path = data.manifest_file();
    let mut staged = tempfile::NamedTempFile::new_in(data.root())
        .map_err(|e| GopaError::filesystem("creating temporary manifest in", data.root(), e))?;

    staged
        .write_all(manifest.render().as_bytes())
        .and_then(|_| staged.as_file().sync_all())
        .map_err(|e| GopaError::filesystem("writing", staged.path(), e))?;

    staged
        .persist(&path)
        .map_err(|e| GopaError::filesystem("replacing", &path, e.error))?;

    log::debug!("Wrote {} releases to {}", manifest.versions.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::tempdir;

    struct FixedClock(Mutex<NaiveDate>);

    impl FixedClock {
        fn new(date: &str) -> Arc<Self> {
            Arc::new(Self(Mutex::new(date.parse().unwrap())))
        }

        fn set(&self, date: &str) {
            *self.0.lock().unwrap() = date.parse().unwrap();
        }
    }

    impl Clock for FixedClock {
        fn today(&self) -> NaiveDate {
            *self.0.lock().unwrap()
        }
    }

    struct FakeSource {
        calls: AtomicUsize,
        fail: AtomicBool,
        versions: Mutex<Vec<&'static str>>,
    }

    impl FakeSource {
        fn new(versions: Vec<&'static str>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
                versions: Mutex::new(versions),
            })
        }
    }

    #[async_trait]
    impl VersionSource for FakeSource {
        async fn fetch_catalog(&self, _cancel: &CancellationToken) -> GopaResult<Vec<VersionTag>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(GopaError::UnexpectedStatus {
                    url: "http://fake/dl/".to_string(),
                    status: 500,
                });
            }
            Ok(self
                .versions
                .lock()
                .unwrap()
                .iter()
                .map(|v| VersionTag::parse("go", v).unwrap())
                .collect())
        }
    }

    fn raw(tags: &[VersionTag]) -> Vec<&str> {
        tags.iter().map(|t| t.as_str()).collect()
    }

    #[tokio::test]
    async fn test_one_fetch_per_day() {
        let dir = tempdir().unwrap();
        let source = FakeSource::new(vec!["go1.21.0", "go1.22.3"]);
        let clock = FixedClock::new("2024-05-01");
        let cache = VersionCache::new(DataDir::new(dir.path().into()), "go", source.clone(), clock.clone());
        let cancel = CancellationToken::new();

        let first = cache.get_versions(&cancel).await.unwrap();
        let second = cache.get_versions(&cancel).await.unwrap();

        assert_eq!(raw(&first), vec!["go1.22.3", "go1.21.0"]);
        assert_eq!(first, second);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        let content = std::fs::read_to_string(dir.path().join("versions.txt")).unwrap();
        assert_eq!(content, "2024-05-01\ngo1.22.3\ngo1.21.0\n");
    }

    #[tokio::test]
    async fn test_date_rollover_refetches() {
        let dir = tempdir().unwrap();
        let source = FakeSource::new(vec!["go1.22.3"]);
        let clock = FixedClock::new("2024-05-01");
        let cache = VersionCache::new(DataDir::new(dir.path().into()), "go", source.clone(), clock.clone());
        let cancel = CancellationToken::new();

        cache.get_versions(&cancel).await.unwrap();

        clock.set("2024-05-02");
        source.versions.lock().unwrap().push("go1.22.4");
        let refreshed = cache.get_versions(&cancel).await.unwrap();
        cache.get_versions(&cancel).await.unwrap();

        assert_eq!(raw(&refreshed), vec!["go1.22.4", "go1.22.3"]);
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);

        let manifest = cache.read_manifest().await.unwrap().unwrap();
        assert_eq!(manifest.fetched_on, "2024-05-02".parse::<NaiveDate>().unwrap());
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_manifest() {
        let dir = tempdir().unwrap();
        let manifest_path = dir.path().join("versions.txt");
        std::fs::write(&manifest_path, "2024-04-30\ngo1.22.2\n").unwrap();

        let source = FakeSource::new(vec![]);
        source.fail.store(true, Ordering::SeqCst);
        let cache = VersionCache::new(
            DataDir::new(dir.path().into()),
            "go",
            source.clone(),
            FixedClock::new("2024-05-01"),
        );

        let result = cache.get_versions(&CancellationToken::new()).await;
        assert!(result.unwrap_err().is_network());
        assert_eq!(
            std::fs::read_to_string(&manifest_path).unwrap(),
            "2024-04-30\ngo1.22.2\n"
        );
    }

    #[tokio::test]
    async fn test_corrupt_manifest_is_refreshed() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("versions.txt"), "not-a-date\ngo1.22.2\n").unwrap();

        let source = FakeSource::new(vec!["go1.22.3"]);
        let cache = VersionCache::new(
            DataDir::new(dir.path().into()),
            "go",
            source.clone(),
            FixedClock::new("2024-05-01"),
        );

        let versions = cache.get_versions(&CancellationToken::new()).await.unwrap();
        assert_eq!(raw(&versions), vec!["go1.22.3"]);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_manifest_parse_skips_bad_lines() {
        let manifest = CacheManifest::parse("2024-05-01\ngo1.21.0\n\ngarbage\ngo1.22.3\n", "go").unwrap();
        assert_eq!(raw(&manifest.versions), vec!["go1.22.3", "go1.21.0"]);
        assert!(!manifest.is_expired("2024-05-01".parse().unwrap()));
        assert!(manifest.is_expired("2024-05-02".parse().unwrap()));
        assert!(CacheManifest::parse("", "go").is_none());
    }
}
