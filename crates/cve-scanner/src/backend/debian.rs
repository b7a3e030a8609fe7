//! Debian 백엔드
//!
//! 보안 트래커 JSON(`패키지 -> CVE -> 릴리스별 상태`)을 스캔당 한 번 가져옵니다.
//! 버전 순서 비교 없이 트래커의 상태 값과 저장소 버전 일치로 판정합니다.

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;

use crate::enumerate::PackageFormat;
use crate::fetch::FeedClient;
use crate::types::{Distro, InstalledPackage, Match, PackageResult};

use super::DistroBackend;

/// `패키지 이름 -> CVE id -> 항목`
pub type DebianTracker = HashMap<String, HashMap<String, DebianCve>>;

/// 트래커의 CVE 항목
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DebianCve {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    /// 릴리스 코드네임별 상태
    #[serde(default)]
    pub releases: HashMap<String, DebianRelease>,
}

/// 릴리스별 상태
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DebianRelease {
    /// `open`, `resolved`, `undetermined`
    #[serde(default)]
    pub status: String,
    /// 저장소 이름별 현재 버전 (`bookworm-security` 등)
    #[serde(default)]
    pub repositories: HashMap<String, String>,
    #[serde(default)]
    pub fixed_version: Option<String>,
    #[serde(default)]
    pub urgency: Option<String>,
}

/// 릴리스 상태로 취약 여부를 판정합니다.
///
/// `open`은 항상 취약입니다. `undetermined`는 설치 버전이 해당 릴리스
/// 저장소 버전과 정확히 같을 때만 취약으로 봅니다.
pub fn debian_is_vulnerable(release: &DebianRelease, installed: &str) -> bool {
    match release.status.as_str() {
        "open" => true,
        "undetermined" => release.repositories.values().any(|v| v == installed),
        _ => false,
    }
}

/// Debian 매칭 백엔드
pub struct DebianBackend {
    client: FeedClient,
    url: String,
    timeout: Duration,
    codename: Option<String>,
}

impl DebianBackend {
    /// `codename`이 있으면 해당 릴리스 상태만 봅니다.
    pub fn new(client: FeedClient, url: String, timeout: Duration, codename: Option<String>) -> Self {
        Self {
            client,
            url,
            timeout,
            codename,
        }
    }

    fn match_package(&self, pkg: &InstalledPackage, cves: &HashMap<String, DebianCve>) -> Vec<Match> {
        let mut matches = Vec::new();
        for (cve_id, cve) in cves {
            let hit = match &self.codename {
                Some(codename) => cve
                    .releases
                    .get(codename)
                    .filter(|r| debian_is_vulnerable(r, &pkg.version)),
                None => cve
                    .releases
                    .values()
                    .find(|r| debian_is_vulnerable(r, &pkg.version)),
            };
            let Some(release) = hit else {
                continue;
            };
            matches.push(Match {
                advisory: cve_id.clone(),
                package: pkg.name.clone(),
                installed_version: pkg.version.clone(),
                affected: pkg.version.clone(),
                fixed: release.fixed_version.clone().filter(|v| !v.is_empty() && v != "0"),
                issues: vec![cve_id.clone()],
                severity: release.urgency.clone().unwrap_or_default(),
                status: release.status.clone(),
            });
        }
        // HashMap 순서는 불안정하므로 결과를 정렬해 배치 파일을 재현 가능하게 한다
        matches.sort_by(|a, b| a.advisory.cmp(&b.advisory));
        matches
    }
}

impl DistroBackend for DebianBackend {
    type Feed = DebianTracker;

    fn distro(&self) -> Distro {
        Distro::Debian
    }

    fn package_format(&self) -> PackageFormat {
        PackageFormat::Dpkg
    }

    async fn fetch_advisories(&self) -> DebianTracker {
        self.client
            .fetch_or_degrade(Distro::Debian, &self.url, &[], self.timeout)
            .await
            .unwrap_or_default()
    }

    fn advisory_count(&self, feed: &DebianTracker) -> usize {
        feed.values().map(HashMap::len).sum()
    }

    async fn match_batch(&self, batch: &[InstalledPackage], feed: &DebianTracker) -> Vec<PackageResult> {
        batch
            .iter()
            .map(|pkg| {
                let matches = feed
                    .get(&pkg.name)
                    .map(|cves| self.match_package(pkg, cves))
                    .unwrap_or_default();
                PackageResult::new(pkg, matches)
            })
            .collect()
    }
}
