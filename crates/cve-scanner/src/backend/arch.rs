//! Arch Linux 백엔드
//!
//! security.archlinux.org의 AVG 목록(`all.json`)을 스캔당 한 번 가져오고,
//! 설치 버전을 `vercmp`로 영향/수정 버전과 비교합니다.

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::enumerate::PackageFormat;
use crate::fetch::FeedClient;
use crate::types::{Distro, InstalledPackage, Match, PackageResult};
use crate::version::VersionComparator;

use super::DistroBackend;

const STATUS_NOT_AFFECTED: &str = "Not affected";

/// AVG(Arch Vulnerability Group) 항목
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ArchAdvisory {
    /// `AVG-2843` 형식의 그룹 이름
    pub name: String,
    #[serde(default)]
    pub packages: Vec<String>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub severity: String,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub affected: String,
    #[serde(default)]
    pub fixed: Option<String>,
    #[serde(default)]
    pub issues: Vec<String>,
}

/// 설치 버전이 AVG에 해당하는지 판정합니다.
///
/// - 수정 버전이 있으면 `installed < fixed`일 때만 취약
/// - 없으면 `installed == affected` 또는 `installed <= affected`일 때 취약
pub async fn arch_is_vulnerable<V: VersionComparator>(
    comparator: &V,
    installed: &str,
    affected: &str,
    fixed: Option<&str>,
) -> bool {
    match fixed.filter(|f| !f.is_empty()) {
        Some(fixed) => comparator.compare(installed, fixed).await.is_lt(),
        None => {
            installed == affected || comparator.compare(installed, affected).await.is_le()
        }
    }
}

/// Arch Linux 매칭 백엔드
pub struct ArchBackend<V> {
    client: FeedClient,
    url: String,
    timeout: Duration,
    comparator: V,
}

impl<V: VersionComparator> ArchBackend<V> {
    pub fn new(client: FeedClient, url: String, timeout: Duration, comparator: V) -> Self {
        Self {
            client,
            url,
            timeout,
            comparator,
        }
    }
}

impl<V: VersionComparator> DistroBackend for ArchBackend<V> {
    type Feed = Vec<ArchAdvisory>;

    fn distro(&self) -> Distro {
        Distro::Arch
    }

    fn package_format(&self) -> PackageFormat {
        PackageFormat::Pacman
    }

    async fn fetch_advisories(&self) -> Vec<ArchAdvisory> {
        self.client
            .fetch_or_degrade(Distro::Arch, &self.url, &[], self.timeout)
            .await
            .unwrap_or_default()
    }

    fn advisory_count(&self, feed: &Vec<ArchAdvisory>) -> usize {
        feed.len()
    }

    async fn match_batch(
        &self,
        batch: &[InstalledPackage],
        feed: &Vec<ArchAdvisory>,
    ) -> Vec<PackageResult> {
        let mut index: HashMap<&str, Vec<&ArchAdvisory>> =
            batch.iter().map(|p| (p.name.as_str(), Vec::new())).collect();
        for advisory in feed {
            if advisory.status == STATUS_NOT_AFFECTED {
                continue;
            }
            for name in &advisory.packages {
                if let Some(slot) = index.get_mut(name.as_str()) {
                    slot.push(advisory);
                }
            }
        }

        let mut results = Vec::with_capacity(batch.len());
        for pkg in batch {
            let mut matches = Vec::new();
            for advisory in index.get(pkg.name.as_str()).into_iter().flatten() {
                let vulnerable = arch_is_vulnerable(
                    &self.comparator,
                    &pkg.version,
                    &advisory.affected,
                    advisory.fixed.as_deref(),
                )
                .await;
                if !vulnerable {
                    continue;
                }
                debug!(package = %pkg.name, advisory = %advisory.name, "arch advisory matched");
                matches.push(Match {
                    advisory: advisory.name.clone(),
                    package: pkg.name.clone(),
                    installed_version: pkg.version.clone(),
                    affected: advisory.affected.clone(),
                    fixed: advisory.fixed.clone(),
                    issues: advisory.issues.clone(),
                    severity: advisory.severity.clone(),
                    status: advisory.status.clone(),
                });
            }
            results.push(PackageResult::new(pkg, matches));
        }
        results
    }
}
