//! Container CVE scanning.
//!
//! Runs the same pipeline as the host scan against a running container: the
//! OS is read from the container's `/etc/os-release`, packages are enumerated
//! through the container runtime, and the distro backend matches them. SUSE
//! containers take a dedicated path that discovers patches inside the
//! container (or, failing that, from the OSV API) and fuzzy-matches their
//! package names.
//!
//! Results are written under `cache/<distro>/containers/<short-id>/` so a
//! container scan never overwrites the host's results.

use std::time::Instant;

use serde::Serialize;
use tracing::{info, warn};

use ophiron_core::metrics as m;

use crate::backend::{self, BackendContext, OsvPatchApi, SuseContainerBackend, get_handler};
use crate::batch::BatchMatcher;
use crate::cache::{CacheLocation, ScanLock};
use crate::config::CveScannerConfig;
use crate::container::{BollardRuntime, ContainerRuntime, probe_shell, read_container_file, validate_container_ref};
use crate::detect::OsRelease;
use crate::enumerate::{PackageEnumerator, PackageFormat};
use crate::error::CveScannerError;
use crate::scanner::os_label;
use crate::types::{Distro, ScanSummary};

const TARGET_CONTAINER: &str = "container";
const OS_RELEASE_PATHS: [&str; 2] = ["/etc/os-release", "/usr/lib/os-release"];

/// Result of a container scan.
#[derive(Debug, Clone, Serialize)]
pub struct ContainerScanReport {
    pub success: bool,
    pub container_id: String,
    pub container_name: String,
    pub os_type: Distro,
    /// Whether a usable shell was found in the container.
    pub shell_available: Option<bool>,
    /// Set when results are likely incomplete.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    #[serde(flatten)]
    pub summary: ScanSummary,
}

/// Scans running containers for vulnerable packages.
pub struct ContainerScanAdapter<C> {
    runtime: C,
    ctx: BackendContext,
}

impl ContainerScanAdapter<BollardRuntime> {
    /// Connects to Docker using the configured socket (or the local default).
    pub fn connect(config: CveScannerConfig) -> Result<Self, CveScannerError> {
        let runtime = BollardRuntime::connect(config.docker_socket.as_deref())?;
        Self::new(runtime, config)
    }
}

impl<C: ContainerRuntime> ContainerScanAdapter<C> {
    pub fn new(runtime: C, config: CveScannerConfig) -> Result<Self, CveScannerError> {
        config.validate()?;
        Ok(Self {
            runtime,
            ctx: BackendContext::new(config)?,
        })
    }

    pub fn runtime(&self) -> &C {
        &self.runtime
    }

    /// Scans one container by id or name.
    ///
    /// # Errors
    ///
    /// - [`CveScannerError::ContainerNotFound`] for unknown containers
    /// - [`CveScannerError::ContainerNotRunning`] when the container is stopped
    /// - [`CveScannerError::UnsupportedOs`] when the container OS is not recognized
    /// - Docker API and connection errors
    pub async fn scan_container_cves(&self, container: &str) -> Result<ContainerScanReport, CveScannerError> {
        validate_container_ref(container)?;
        let started = Instant::now();
        let config = &self.ctx.config;
        let timeout = config.exec_timeout;

        let info = self.runtime.inspect_container(container).await?;
        if !info.is_running() {
            return Err(CveScannerError::ContainerNotRunning {
                id: container.to_owned(),
                status: info.status.clone(),
            });
        }
        let id = info.id.as_str();

        let release = self.read_release(id).await;
        let distro = release.distro();
        if distro == Distro::Unknown {
            return Err(CveScannerError::UnsupportedOs(os_label(&release)));
        }
        info!(
            container = %info.short_id(),
            name = %info.name,
            distro = %distro,
            release = %release.pretty_name,
            "starting container scan"
        );

        let cache = CacheLocation::resolve(&config.cache_dir, &config.fallback_cache_dir, distro)
            .for_container(info.short_id());
        let _lock = ScanLock::acquire(&cache).await;
        cache.clear_batches().await;

        let shell = probe_shell(&self.runtime, id, timeout).await;
        let matcher = BatchMatcher::new(config.batch_size, config.batch_delay);

        let (installed, batches) = if distro == Distro::Suse {
            let packages = PackageEnumerator::new(PackageFormat::Rpm)
                .list_container(&self.runtime, id, shell, timeout)
                .await;
            let api = OsvPatchApi::for_release(
                self.ctx.client.clone(),
                config.feeds.suse_api_url.clone(),
                config.feeds.suse_timeout,
                &release,
            );
            let suse =
                SuseContainerBackend::discover(&self.runtime, id, shell, timeout, api.as_ref(), &packages)
                    .await;
            let batches = backend::fetch_and_match(&suse, &packages, &matcher, &cache).await;
            (packages.len(), batches)
        } else {
            let backend = get_handler(distro, &release, &self.ctx)
                .ok_or_else(|| CveScannerError::UnsupportedOs(os_label(&release)))?;
            let packages = PackageEnumerator::new(backend.package_format())
                .list_container(&self.runtime, id, shell, timeout)
                .await;
            let batches = backend.fetch_and_match(&packages, &matcher, &cache).await;
            (packages.len(), batches)
        };

        let summary = ScanSummary::from_batches(installed, &batches);
        cache.write_matched(&summary.matched).await;

        let warning = if installed == 0 {
            Some("no installed packages could be enumerated in the container".to_owned())
        } else if shell.is_none() {
            Some("container has no shell; packages were read from filesystem metadata".to_owned())
        } else {
            None
        };
        if let Some(w) = &warning {
            warn!(container = %info.short_id(), warning = %w, "container scan incomplete");
        }

        let elapsed = started.elapsed();
        info!(
            container = %info.short_id(),
            distro = %distro,
            installed = summary.total_installed,
            matched = summary.total_matched,
            elapsed_ms = elapsed.as_millis() as u64,
            "container scan completed"
        );
        metrics::counter!(
            m::CVE_SCANNER_SCANS_COMPLETED_TOTAL,
            m::LABEL_DISTRO => distro.as_str(),
            m::LABEL_TARGET => TARGET_CONTAINER
        )
        .increment(1);
        metrics::histogram!(m::CVE_SCANNER_SCAN_DURATION_SECONDS).record(elapsed.as_secs_f64());

        Ok(ContainerScanReport {
            success: true,
            container_id: info.id.clone(),
            container_name: info.name.clone(),
            os_type: distro,
            shell_available: Some(shell.is_some()),
            warning,
            summary,
        })
    }

    async fn read_release(&self, id: &str) -> OsRelease {
        for path in OS_RELEASE_PATHS {
            if let Some(content) =
                read_container_file(&self.runtime, id, path, self.ctx.config.exec_timeout).await
                && !content.trim().is_empty()
            {
                return OsRelease::parse(&content);
            }
        }
        warn!(container = id, "could not read os-release from container");
        OsRelease::default()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::{CveScannerConfigBuilder, FeedEndpoints};
    use crate::container::testing::MockRuntime;

    const ID: &str = "3f2a9c1b7e4d";

    fn config(root: &std::path::Path) -> CveScannerConfig {
        let unreachable = "http://127.0.0.1:9/feed".to_owned();
        CveScannerConfigBuilder::new()
            .cache_dir(root.join("cache"))
            .fallback_cache_dir(root.join("fallback"))
            .batch_delay(Duration::ZERO)
            .exec_timeout(Duration::from_secs(5))
            .feeds(FeedEndpoints {
                arch_url: unreachable.clone(),
                debian_url: unreachable.clone(),
                ubuntu_cves_url: unreachable.clone(),
                ubuntu_notices_url: unreachable.clone(),
                redhat_api_url: unreachable.clone(),
                suse_api_url: unreachable,
                ..FeedEndpoints::default()
            })
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn stopped_container_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut runtime = MockRuntime::running(ID);
        if let Some(info) = runtime.info.as_mut() {
            info.status = "exited".to_owned();
        }
        let adapter = ContainerScanAdapter::new(runtime, config(dir.path())).unwrap();
        let err = adapter.scan_container_cves(ID).await.unwrap_err();
        assert!(matches!(err, CveScannerError::ContainerNotRunning { ref status, .. } if status == "exited"));
    }

    #[tokio::test]
    async fn missing_container_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = ContainerScanAdapter::new(MockRuntime::default(), config(dir.path())).unwrap();
        let err = adapter.scan_container_cves(ID).await.unwrap_err();
        assert!(matches!(err, CveScannerError::ContainerNotFound(_)));
    }

    #[tokio::test]
    async fn invalid_reference_is_rejected_before_docker() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = ContainerScanAdapter::new(MockRuntime::running(ID), config(dir.path())).unwrap();
        assert!(adapter.scan_container_cves("bad;rm -rf").await.is_err());
        assert!(adapter.runtime().calls().is_empty());
    }

    #[tokio::test]
    async fn unknown_os_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = MockRuntime::running(ID).with_exec("cat /etc/os-release", 0, "ID=alpine\n");
        let adapter = ContainerScanAdapter::new(runtime, config(dir.path())).unwrap();
        let err = adapter.scan_container_cves(ID).await.unwrap_err();
        assert_eq!(err.to_string(), "Unsupported OS type: alpine");
    }

    #[tokio::test]
    async fn debian_container_with_shell_writes_isolated_cache() {
        let dir = tempfile::tempdir().unwrap();
        let dpkg = "ii  bash  5.2.15-2+b2  amd64  GNU Bourne Again SHell\n";
        let runtime = MockRuntime::running(ID)
            .with_exec("cat /etc/os-release", 0, "ID=debian\nVERSION_CODENAME=bookworm\n")
            .with_exec("/bin/sh -c echo ok", 0, "ok\n")
            .with_exec("dpkg -l", 0, dpkg);
        let adapter = ContainerScanAdapter::new(runtime, config(dir.path())).unwrap();

        let report = adapter.scan_container_cves(ID).await.unwrap();
        assert!(report.success);
        assert_eq!(report.os_type, Distro::Debian);
        assert_eq!(report.shell_available, Some(true));
        assert_eq!(report.warning, None);
        assert_eq!(report.summary.total_installed, 1);
        assert_eq!(report.summary.total_matched, 0);

        let container_dir = dir.path().join("cache/debian/containers").join(ID);
        assert!(container_dir.join("matched.json").exists());
        assert!(container_dir.join("batch_results/batch_1.json").exists());
        assert!(!container_dir.join("installed.json").exists());
        assert!(!dir.path().join("cache/debian/matched.json").exists());
    }

    #[tokio::test]
    async fn shell_less_suse_container_uses_filesystem_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = MockRuntime::running(ID)
            .with_exec("cat /etc/os-release", 0, "ID=\"opensuse-leap\"\nID_LIKE=\"suse opensuse\"\n");
        let adapter = ContainerScanAdapter::new(runtime, config(dir.path())).unwrap();

        let report = adapter.scan_container_cves(ID).await.unwrap();
        assert_eq!(report.os_type, Distro::Suse);
        assert_eq!(report.shell_available, Some(false));
        assert!(report.warning.is_some());
        assert_eq!(report.summary.total_installed, 0);

        let calls = adapter.runtime().calls();
        assert!(calls.iter().any(|c| c == "copy /var/lib/rpm/rpmdb.sqlite"));
        assert!(calls.iter().any(|c| c == "copy /var/cache/zypp/raw"));
    }
}
