//! 호스트 스캔 오케스트레이터
//!
//! [`ScanOrchestrator::run_scan`]이 한 번의 스캔 흐름을 구동합니다.
//!
//! ```text
//! os-release -> Distro -> Backend ─┐
//!                                  ├─> 캐시 잠금 -> 배치 파일 정리
//!                                  ├─> 패키지 열거 (installed.json)
//!                                  ├─> 피드 1회 조회 (패키지가 있을 때만)
//!                                  ├─> 배치 매칭 (batch_<n>.json)
//!                                  └─> 요약 (matched.json)
//! ```

use std::time::Instant;

use tracing::{debug, info};

use ophiron_core::metrics as m;

use crate::backend::{BackendContext, get_handler};
use crate::batch::BatchMatcher;
use crate::cache::{CacheLocation, ScanLock};
use crate::config::CveScannerConfig;
use crate::detect::{Detector, OsRelease};
use crate::enumerate::PackageEnumerator;
use crate::error::CveScannerError;
use crate::exec::HostRunner;
use crate::types::ScanSummary;

const TARGET_HOST: &str = "host";

/// 지원하지 않는 대상의 에러 메시지에 쓸 OS 이름
pub(crate) fn os_label(release: &OsRelease) -> String {
    if release.id.is_empty() {
        "unknown".to_owned()
    } else {
        release.id.clone()
    }
}

/// 호스트 CVE 스캔 오케스트레이터
pub struct ScanOrchestrator {
    ctx: BackendContext,
    detector: Detector,
}

impl ScanOrchestrator {
    /// 설정을 검증하고 오케스트레이터를 생성합니다.
    pub fn new(config: CveScannerConfig) -> Result<Self, CveScannerError> {
        config.validate()?;
        let detector = Detector::new(&config.os_release_path);
        Ok(Self {
            ctx: BackendContext::new(config)?,
            detector,
        })
    }

    pub fn config(&self) -> &CveScannerConfig {
        &self.ctx.config
    }

    /// 호스트를 스캔합니다.
    ///
    /// `use_system`이 false면 `installed.json`이 있을 때 패키지 목록 명령을 생략합니다.
    /// `force_refresh`는 기록만 됩니다. 피드는 항상 새로 가져옵니다.
    ///
    /// # Errors
    ///
    /// 배포판을 판별할 수 없으면 [`CveScannerError::UnsupportedOs`].
    /// 그 외 실패(피드, 명령, 캐시)는 결과 없음으로 격하됩니다.
    pub async fn run_scan(
        &self,
        force_refresh: bool,
        use_system: bool,
    ) -> Result<ScanSummary, CveScannerError> {
        let started = Instant::now();
        let config = &self.ctx.config;

        let release = self.detector.read_release().await;
        let distro = release.distro();
        let backend = get_handler(distro, &release, &self.ctx)
            .ok_or_else(|| CveScannerError::UnsupportedOs(os_label(&release)))?;

        info!(
            distro = %distro,
            release = %release.pretty_name,
            codename = release.codename.as_deref().unwrap_or("-"),
            "starting host scan"
        );
        debug!(force_refresh, use_system, "scan options");

        let cache = CacheLocation::resolve(&config.cache_dir, &config.fallback_cache_dir, distro);
        let _lock = ScanLock::acquire(&cache).await;
        cache.clear_batches().await;

        let runner = HostRunner::new(config.command_timeout);
        let packages = PackageEnumerator::new(backend.package_format())
            .list_host(&runner, &cache, use_system)
            .await;

        let matcher = BatchMatcher::new(config.batch_size, config.batch_delay);
        let batches = backend.fetch_and_match(&packages, &matcher, &cache).await;

        let summary = ScanSummary::from_batches(packages.len(), &batches);
        cache.write_matched(&summary.matched).await;

        let elapsed = started.elapsed();
        info!(
            distro = %distro,
            cache = %cache.dir().display(),
            installed = summary.total_installed,
            advisories = summary.total_advisories,
            matched = summary.total_matched,
            elapsed_ms = elapsed.as_millis() as u64,
            "host scan completed"
        );
        metrics::counter!(
            m::CVE_SCANNER_SCANS_COMPLETED_TOTAL,
            m::LABEL_DISTRO => distro.as_str(),
            m::LABEL_TARGET => TARGET_HOST
        )
        .increment(1);
        metrics::histogram!(m::CVE_SCANNER_SCAN_DURATION_SECONDS).record(elapsed.as_secs_f64());

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CveScannerConfigBuilder;

    #[test]
    fn invalid_config_is_rejected() {
        let config = CveScannerConfig {
            batch_size: 0,
            ..CveScannerConfig::default()
        };
        assert!(matches!(
            ScanOrchestrator::new(config),
            Err(CveScannerError::Config { .. })
        ));
    }

    #[test]
    fn os_label_falls_back_to_unknown() {
        assert_eq!(os_label(&OsRelease::default()), "unknown");
        assert_eq!(os_label(&OsRelease::parse("ID=gentoo\n")), "gentoo");
    }

    #[tokio::test]
    async fn unsupported_os_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let os_release = dir.path().join("os-release");
        std::fs::write(&os_release, "ID=gentoo\nPRETTY_NAME=\"Gentoo Linux\"\n").unwrap();
        let config = CveScannerConfigBuilder::new()
            .cache_dir(dir.path().join("cache"))
            .fallback_cache_dir(dir.path().join("fallback"))
            .os_release_path(&os_release)
            .build()
            .unwrap();

        let err = ScanOrchestrator::new(config)
            .unwrap()
            .run_scan(false, false)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Unsupported OS type: gentoo");
        assert!(!dir.path().join("cache").exists(), "no cache for unsupported targets");
    }
}
