//! The engine context: one value owning every component
//!
//! Callers construct an [`Engine`] once and share it (usually behind an
//! `Arc`). Nothing is kept in globals or environment variables.

use crate::cache::{CacheManifest, Clock, SystemClock, VersionCache};
use crate::catalog::CatalogClient;
use crate::config::{DataDir, GopaConfig};
use crate::errors::GopaResult;
use crate::installation::{InstallStats, InstallationManager, InstalledToolchain};
use crate::platform::{InstallKey, PlatformKey};
use crate::sandbox::{ExecutionResult, Sandbox};
use crate::version::VersionTag;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct Engine {
    config: GopaConfig,
    catalog: Arc<CatalogClient>,
    cache: VersionCache,
    installations: InstallationManager,
    sandbox: Sandbox,
}

impl Engine {
    /// Build an engine and create the data directory layout
    pub fn new(config: GopaConfig) -> GopaResult<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: GopaConfig, clock: Arc<dyn Clock>) -> GopaResult<Self> {
        config.validate()?;
        let data = config.data_dir();
        data.ensure()?;

        let catalog = Arc::new(CatalogClient::new(&config)?);
        let cache = VersionCache::new(data, config.toolchain_name.clone(), catalog.clone(), clock);
        let installations = InstallationManager::new(&config, catalog.http().clone());
        let sandbox = Sandbox::new(&config);

        log::debug!("Engine ready in {}", config.home.display());
        Ok(Self {
            config,
            catalog,
            cache,
            installations,
            sandbox,
        })
    }

    /// Target a platform other than the host
    pub fn with_platform(mut self, platform: PlatformKey) -> Self {
        self.installations = self.installations.with_platform(platform);
        self
    }

    pub fn config(&self) -> &GopaConfig {
        &self.config
    }

    pub fn data_dir(&self) -> DataDir {
        self.config.data_dir()
    }

    pub fn platform(&self) -> &PlatformKey {
        self.installations.platform()
    }

    /// Parse a user-supplied tag such as `go1.22.3`
    pub fn parse_version(&self, raw: &str) -> GopaResult<VersionTag> {
        VersionTag::parse(&self.config.toolchain_name, raw.trim())
    }

    pub fn install_key(&self, tag: &VersionTag) -> InstallKey {
        self.installations.install_key(tag)
    }

    /// Newest published release, always fetched
    pub async fn latest(&self, cancel: &CancellationToken) -> GopaResult<VersionTag> {
        self.catalog.fetch_latest(cancel).await
    }

    /// Catalog of releases through the daily cache
    pub async fn get_versions(&self, cancel: &CancellationToken) -> GopaResult<Vec<VersionTag>> {
        self.cache.get_versions(cancel).await
    }

    pub async fn read_manifest(&self) -> GopaResult<Option<CacheManifest>> {
        self.cache.read_manifest().await
    }

    /// Whether the cached manifest is missing or older than today
    pub async fn manifest_expired(&self) -> GopaResult<bool> {
        let today = self.cache.today();
        Ok(self
            .read_manifest()
            .await?
            .map(|m| m.is_expired(today))
            .unwrap_or(true))
    }

    pub async fn ensure_installed(
        &self,
        tag: &VersionTag,
        cancel: &CancellationToken,
    ) -> GopaResult<InstallKey> {
        self.installations.ensure_installed(tag, cancel).await
    }

    pub fn select(&self, key: InstallKey) {
        self.installations.select(key)
    }

    pub fn active(&self) -> Option<InstallKey> {
        self.installations.active()
    }

    /// Install and select the newest release
    pub async fn bootstrap(&self, cancel: &CancellationToken) -> GopaResult<InstallKey> {
        let latest = self.latest(cancel).await?;
        self.install_and_select(&latest, cancel).await
    }

    pub async fn install_and_select(
        &self,
        tag: &VersionTag,
        cancel: &CancellationToken,
    ) -> GopaResult<InstallKey> {
        let key = self.ensure_installed(tag, cancel).await?;
        self.select(key.clone());
        Ok(key)
    }

    /// Run source with the active toolchain
    pub async fn run(&self, source: &str, cancel: &CancellationToken) -> GopaResult<ExecutionResult> {
        let runner = self.installations.active_runner()?;
        self.sandbox.run(source, &runner, cancel).await
    }

    pub async fn installed(&self) -> GopaResult<Vec<InstallKey>> {
        self.installations.installed().await
    }

    pub async fn installations(&self) -> GopaResult<Vec<InstalledToolchain>> {
        self.installations.installations().await
    }

    pub async fn uninstall(&self, key: &InstallKey) -> GopaResult<()> {
        self.installations.uninstall(key).await
    }

    pub async fn stats(&self) -> GopaResult<InstallStats> {
        self.installations.stats().await
    }
}
