//! 설치 패키지 열거
//!
//! [`PackageEnumerator`]는 배포판의 [`PackageFormat`]에 맞는 명령을 실행해
//! `{name, version}` 목록을 만듭니다.
//!
//! # 호스트
//!
//! 1. 패키지 명령 실행 → 성공 시 `installed.json` 갱신
//! 2. 실패 시 `installed.json` 읽기
//! 3. 그래도 없으면 빈 목록
//!
//! `use_system = false`이면 `installed.json`이 있을 때 명령을 실행하지 않습니다.
//!
//! # 컨테이너
//!
//! 직접 exec → 셸 래핑 exec → 패키지 DB 파일 복사 → 빈 목록

mod parse;
mod rpmdb;

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::cache::CacheLocation;
use crate::container::{
    ContainerRunner, ContainerRuntime, ExecMode, copy_with_timeout, extract_archive,
};
use crate::error::CveScannerError;
use crate::exec::{CommandRunner, run_checked};
use crate::types::{Distro, InstalledPackage};

pub use parse::{
    parse_dpkg_list, parse_dpkg_status, parse_pacman_desc, parse_pacman_query, parse_rpm_query,
};
pub use rpmdb::{parse_header as parse_rpm_header, read_rpmdb};

#[cfg(test)]
pub(crate) use rpmdb::build_rpmdb;

/// 패키지 관리자 형식
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageFormat {
    /// pacman (Arch)
    Pacman,
    /// dpkg (Debian, Ubuntu)
    Dpkg,
    /// rpm (Fedora, SUSE)
    Rpm,
}

const RPM_QUERY_FORMAT: &str = "%{NAME}\t%{VERSION}-%{RELEASE}\n";
const RPMDB_PATHS: [&str; 2] = [
    "/var/lib/rpm/rpmdb.sqlite",
    "/usr/lib/sysimage/rpm/rpmdb.sqlite",
];

impl PackageFormat {
    /// 배포판에 대응하는 형식
    pub fn for_distro(distro: Distro) -> Option<Self> {
        match distro {
            Distro::Arch => Some(Self::Pacman),
            Distro::Debian | Distro::Ubuntu => Some(Self::Dpkg),
            Distro::Fedora | Distro::Suse => Some(Self::Rpm),
            Distro::Unknown => None,
        }
    }

    /// 목록 명령
    pub fn command(&self) -> &'static [&'static str] {
        match self {
            Self::Pacman => &["pacman", "-Q"],
            Self::Dpkg => &["dpkg", "-l"],
            Self::Rpm => &["rpm", "-qa", "--queryformat", RPM_QUERY_FORMAT],
        }
    }

    /// 목록 명령 출력을 파싱합니다.
    pub fn parse(&self, output: &str) -> Vec<InstalledPackage> {
        match self {
            Self::Pacman => parse_pacman_query(output),
            Self::Dpkg => parse_dpkg_list(output),
            Self::Rpm => parse_rpm_query(output),
        }
    }
}

/// 설치 패키지 열거기
#[derive(Debug, Clone, Copy)]
pub struct PackageEnumerator {
    format: PackageFormat,
}

impl PackageEnumerator {
    pub fn new(format: PackageFormat) -> Self {
        Self { format }
    }

    pub fn format(&self) -> PackageFormat {
        self.format
    }

    /// 실행기로 목록 명령을 한 번 실행합니다.
    ///
    /// 종료 코드가 0이 아니거나 파싱 결과가 비어 있으면 에러입니다.
    pub async fn list_with<R: CommandRunner>(
        &self,
        runner: &R,
    ) -> Result<Vec<InstalledPackage>, CveScannerError> {
        let argv = self.format.command();
        let stdout = run_checked(runner, argv).await?;
        let packages = self.format.parse(&stdout);
        if packages.is_empty() {
            return Err(CveScannerError::Command {
                program: argv[0].to_owned(),
                reason: "no packages in output".to_owned(),
            });
        }
        Ok(packages)
    }

    /// 호스트 패키지를 열거합니다.
    pub async fn list_host<R: CommandRunner>(
        &self,
        runner: &R,
        cache: &CacheLocation,
        use_system: bool,
    ) -> Vec<InstalledPackage> {
        if !use_system
            && let Some(cached) = cache.read_installed().await
            && !cached.is_empty()
        {
            info!(count = cached.len(), "using cached installed package list");
            return cached;
        }

        match self.list_with(runner).await {
            Ok(packages) => {
                info!(count = packages.len(), "enumerated installed packages");
                cache.write_installed(&packages).await;
                packages
            }
            Err(e) => {
                warn!(error = %e, "package enumeration failed, trying cached list");
                match cache.read_installed().await {
                    Some(cached) => {
                        info!(count = cached.len(), "using cached installed package list");
                        cached
                    }
                    None => {
                        warn!("no cached package list, continuing with none");
                        Vec::new()
                    }
                }
            }
        }
    }

    /// 컨테이너 안의 패키지를 열거합니다.
    ///
    /// `shell`은 미리 확인된 사용 가능한 셸입니다. 없으면 셸 단계를 건너뜁니다.
    pub async fn list_container<C: ContainerRuntime>(
        &self,
        runtime: &C,
        id: &str,
        shell: Option<&'static str>,
        timeout: Duration,
    ) -> Vec<InstalledPackage> {
        let mut modes = vec![ExecMode::Direct];
        modes.extend(shell.map(ExecMode::Shell));

        for mode in modes {
            let runner = ContainerRunner::new(runtime, id, mode, timeout);
            match self.list_with(&runner).await {
                Ok(packages) => {
                    info!(container = id, ?mode, count = packages.len(), "enumerated container packages");
                    return packages;
                }
                Err(e) => debug!(container = id, ?mode, error = %e, "container enumeration rung failed"),
            }
        }

        match self.read_package_db(runtime, id, timeout).await {
            Ok(packages) if !packages.is_empty() => {
                info!(container = id, count = packages.len(), "read packages from container filesystem");
                packages
            }
            Ok(_) => {
                warn!(container = id, "container package database is empty");
                Vec::new()
            }
            Err(e) => {
                warn!(container = id, error = %e, "could not enumerate container packages");
                Vec::new()
            }
        }
    }

    /// 컨테이너 파일시스템에서 패키지 DB를 복사해 읽습니다.
    async fn read_package_db<C: ContainerRuntime>(
        &self,
        runtime: &C,
        id: &str,
        timeout: Duration,
    ) -> Result<Vec<InstalledPackage>, CveScannerError> {
        match self.format {
            PackageFormat::Pacman => {
                let archive = copy_with_timeout(runtime, id, "/var/lib/pacman/local", timeout).await?;
                Ok(extract_archive(&archive)?
                    .iter()
                    .filter(|e| e.path.ends_with("/desc"))
                    .filter_map(|e| parse_pacman_desc(&String::from_utf8_lossy(&e.data)))
                    .collect())
            }
            PackageFormat::Dpkg => {
                let mut packages = Vec::new();
                let mut last_err = None;
                for path in ["/var/lib/dpkg/status", "/var/lib/dpkg/status.d"] {
                    match copy_with_timeout(runtime, id, path, timeout).await {
                        Ok(archive) => {
                            for entry in extract_archive(&archive)? {
                                packages.extend(parse_dpkg_status(&String::from_utf8_lossy(
                                    &entry.data,
                                )));
                            }
                        }
                        Err(e) => last_err = Some(e),
                    }
                }
                match (packages.is_empty(), last_err) {
                    (true, Some(e)) => Err(e),
                    _ => Ok(packages),
                }
            }
            PackageFormat::Rpm => {
                let mut last_err = None;
                for path in RPMDB_PATHS {
                    match copy_rpmdb(runtime, id, path, timeout).await {
                        Ok(packages) => return Ok(packages),
                        Err(e) => {
                            debug!(container = id, path, error = %e, "rpmdb copy failed");
                            last_err = Some(e);
                        }
                    }
                }
                Err(last_err.unwrap_or_else(|| {
                    CveScannerError::Parse("no rpm database found".to_owned())
                }))
            }
        }
    }
}

/// rpmdb를 임시 파일로 복사해 SQLite로 엽니다.
async fn copy_rpmdb<C: ContainerRuntime>(
    runtime: &C,
    id: &str,
    path: &str,
    timeout: Duration,
) -> Result<Vec<InstalledPackage>, CveScannerError> {
    let archive = copy_with_timeout(runtime, id, path, timeout).await?;
    let entry = extract_archive(&archive)?
        .into_iter()
        .find(|e| e.path.ends_with("rpmdb.sqlite"))
        .ok_or_else(|| CveScannerError::Parse(format!("{path}: not in archive")))?;

    tokio::task::spawn_blocking(move || {
        let tmp = tempfile::NamedTempFile::new().map_err(|e| CveScannerError::io("rpmdb", e))?;
        std::fs::write(tmp.path(), &entry.data).map_err(|e| CveScannerError::io(tmp.path(), e))?;
        read_rpmdb(tmp.path())
    })
    .await
    .map_err(|e| CveScannerError::Parse(format!("rpmdb reader task failed: {e}")))?
}
