//! 배포판별 매칭 백엔드
//!
//! [`DistroBackend`] 하나의 인터페이스에 다섯 구현이 있습니다. 배포판은
//! [`get_handler`]에서 한 번 선택되고, 이후 파이프라인은 백엔드 종류를 모릅니다.
//!
//! | 백엔드 | 피드 | 판정 규칙 |
//! |---|---|---|
//! | [`ArchBackend`] | `all.json` 1회 | `vercmp` 순서 비교 |
//! | [`DebianBackend`] | 보안 트래커 JSON 1회 | 릴리스 상태 + 저장소 버전 일치 |
//! | [`UbuntuBackend`] | CVE 목록 + USN 공지 1회 | 릴리스 상태 또는 공지 포함 여부 |
//! | [`FedoraBackend`] | 배치마다 Red Hat API | 존재 여부 |
//! | [`SuseBackend`] | `zypper` 명령 출력 | 존재 여부 |

mod arch;
mod debian;
mod fedora;
mod suse;
mod ubuntu;

use std::future::Future;
use std::time::Instant;

use tracing::info;

use crate::batch::BatchMatcher;
use crate::cache::CacheLocation;
use crate::config::CveScannerConfig;
use crate::detect::OsRelease;
use crate::enumerate::PackageFormat;
use crate::exec::HostRunner;
use crate::fetch::FeedClient;
use crate::types::{BatchResult, Distro, InstalledPackage, PackageResult};
use crate::version::Vercmp;

pub use arch::{ArchAdvisory, ArchBackend, arch_is_vulnerable};
pub use debian::{DebianBackend, DebianCve, DebianRelease, DebianTracker, debian_is_vulnerable};
pub use fedora::{FedoraBackend, RedHatCve, package_name_from_nvr};
pub use suse::{
    OsvPatchApi, SuseBackend, SuseContainerBackend, SusePatch, collect_patches, fuzzy_name_match,
    implied_packages, osv_ecosystem, parse_pipe_table, parse_updateinfo,
};
pub use ubuntu::{UbuntuBackend, UbuntuCve, UbuntuFeed, UbuntuNotice};

/// 배포판 매칭 백엔드
pub trait DistroBackend: Send + Sync {
    /// 스캔당 한 번 가져오는 어드바이저리 데이터
    type Feed: Send + Sync;

    fn distro(&self) -> Distro;

    /// 설치 패키지 열거 형식
    fn package_format(&self) -> PackageFormat;

    /// 어드바이저리를 가져옵니다. 실패하면 빈 피드를 반환합니다.
    fn fetch_advisories(&self) -> impl Future<Output = Self::Feed> + Send;

    /// 로그용 어드바이저리 수
    fn advisory_count(&self, feed: &Self::Feed) -> usize;

    /// 한 배치의 패키지를 피드와 매칭합니다.
    ///
    /// 배치의 패키지 이름으로 어드바이저리를 색인한 뒤 배포판 규칙을 적용합니다.
    fn match_batch(
        &self,
        batch: &[InstalledPackage],
        feed: &Self::Feed,
    ) -> impl Future<Output = Vec<PackageResult>> + Send;
}

/// 피드를 한 번 가져와 모든 배치를 매칭합니다.
///
/// 패키지가 없으면 피드를 가져오지 않습니다.
pub async fn fetch_and_match<B: DistroBackend>(
    backend: &B,
    packages: &[InstalledPackage],
    matcher: &BatchMatcher,
    cache: &CacheLocation,
) -> Vec<BatchResult> {
    if packages.is_empty() {
        info!(distro = %backend.distro(), "no installed packages, skipping advisory fetch");
        return Vec::new();
    }

    let started = Instant::now();
    let feed = backend.fetch_advisories().await;
    info!(
        distro = %backend.distro(),
        advisories = backend.advisory_count(&feed),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "fetched advisories"
    );

    matcher.process(backend, packages, &feed, cache).await
}

/// 백엔드 생성에 필요한 공유 자원
pub struct BackendContext {
    pub config: CveScannerConfig,
    pub client: FeedClient,
}

impl BackendContext {
    pub fn new(config: CveScannerConfig) -> Result<Self, crate::error::CveScannerError> {
        let client = FeedClient::new(&config.user_agent)?;
        Ok(Self { config, client })
    }
}

/// 선택된 백엔드
pub enum Backend {
    Arch(ArchBackend<Vercmp<HostRunner>>),
    Debian(DebianBackend),
    Ubuntu(UbuntuBackend),
    Fedora(FedoraBackend),
    Suse(SuseBackend<HostRunner>),
}

impl Backend {
    pub fn distro(&self) -> Distro {
        match self {
            Self::Arch(b) => b.distro(),
            Self::Debian(b) => b.distro(),
            Self::Ubuntu(b) => b.distro(),
            Self::Fedora(b) => b.distro(),
            Self::Suse(b) => b.distro(),
        }
    }

    pub fn package_format(&self) -> PackageFormat {
        match self {
            Self::Arch(b) => b.package_format(),
            Self::Debian(b) => b.package_format(),
            Self::Ubuntu(b) => b.package_format(),
            Self::Fedora(b) => b.package_format(),
            Self::Suse(b) => b.package_format(),
        }
    }

    /// 선택된 백엔드로 [`fetch_and_match`]를 실행합니다.
    pub async fn fetch_and_match(
        &self,
        packages: &[InstalledPackage],
        matcher: &BatchMatcher,
        cache: &CacheLocation,
    ) -> Vec<BatchResult> {
        match self {
            Self::Arch(b) => fetch_and_match(b, packages, matcher, cache).await,
            Self::Debian(b) => fetch_and_match(b, packages, matcher, cache).await,
            Self::Ubuntu(b) => fetch_and_match(b, packages, matcher, cache).await,
            Self::Fedora(b) => fetch_and_match(b, packages, matcher, cache).await,
            Self::Suse(b) => fetch_and_match(b, packages, matcher, cache).await,
        }
    }
}

/// 배포판에 맞는 백엔드를 선택합니다. 지원하지 않으면 `None`.
///
/// `release`는 Debian/Ubuntu의 릴리스 코드네임 필터에 사용됩니다.
pub fn get_handler(distro: Distro, release: &OsRelease, ctx: &BackendContext) -> Option<Backend> {
    let config = &ctx.config;
    let feeds = &config.feeds;
    let client = ctx.client.clone();
    let codename = release.codename.clone();

    let backend = match distro {
        Distro::Arch => Backend::Arch(ArchBackend::new(
            client,
            feeds.arch_url.clone(),
            feeds.arch_timeout,
            Vercmp::new(HostRunner::new(config.command_timeout)),
        )),
        Distro::Debian => Backend::Debian(DebianBackend::new(
            client,
            feeds.debian_url.clone(),
            feeds.debian_timeout,
            codename,
        )),
        Distro::Ubuntu => Backend::Ubuntu(UbuntuBackend::new(
            client,
            feeds.ubuntu_cves_url.clone(),
            feeds.ubuntu_notices_url.clone(),
            feeds.ubuntu_timeout,
            codename,
        )),
        Distro::Fedora => Backend::Fedora(FedoraBackend::new(
            client,
            feeds.redhat_api_url.clone(),
            feeds.redhat_timeout,
        )),
        Distro::Suse => Backend::Suse(SuseBackend::new(HostRunner::new(config.command_timeout))),
        Distro::Unknown => return None,
    };
    Some(backend)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> BackendContext {
        BackendContext::new(CveScannerConfig::default()).unwrap()
    }

    #[test]
    fn handler_for_every_supported_distro() {
        let ctx = ctx();
        for distro in Distro::SUPPORTED {
            let backend = get_handler(distro, &OsRelease::default(), &ctx).unwrap();
            assert_eq!(backend.distro(), distro);
            assert_eq!(
                Some(backend.package_format()),
                PackageFormat::for_distro(distro)
            );
        }
    }

    #[test]
    fn no_handler_for_unknown() {
        assert!(get_handler(Distro::Unknown, &OsRelease::default(), &ctx()).is_none());
    }
}
