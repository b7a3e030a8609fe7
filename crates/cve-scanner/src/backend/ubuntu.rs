//! Ubuntu 백엔드
//!
//! CVE 목록(`cves.json`)과 보안 공지(`notices.json`, USN)를 스캔당 한 번 가져옵니다.
//! 패키지에 대해 CVE가 유효한 경우:
//!
//! - CVE의 패키지 상태가 `not-affected`/`DNE`가 아니거나
//! - 패키지가 그 CVE를 나열한 공지의 `release_packages`에 포함될 때
//!
//! 같은 패키지의 매치는 CVE id로 중복 제거합니다.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

use serde::Deserialize;

use crate::enumerate::PackageFormat;
use crate::fetch::FeedClient;
use crate::types::{Distro, InstalledPackage, Match, PackageResult};

use super::DistroBackend;

const IGNORED_STATUSES: [&str; 2] = ["not-affected", "DNE"];
const STATUS_RELEASED: &str = "released";
const STATUS_NOTICE: &str = "notice";

#[derive(Debug, Default, Deserialize)]
struct CvesDocument {
    #[serde(default)]
    cves: Vec<UbuntuCve>,
}

#[derive(Debug, Default, Deserialize)]
struct NoticesDocument {
    #[serde(default)]
    notices: Vec<UbuntuNotice>,
}

/// CVE 항목
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UbuntuCve {
    pub id: String,
    #[serde(default)]
    pub packages: Vec<UbuntuCvePackage>,
    #[serde(default)]
    pub priority: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UbuntuCvePackage {
    pub name: String,
    #[serde(default)]
    pub statuses: Vec<UbuntuStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UbuntuStatus {
    #[serde(default)]
    pub release_codename: String,
    #[serde(default)]
    pub status: String,
    /// `released` 상태에서는 수정 버전
    #[serde(default)]
    pub description: Option<String>,
}

/// 보안 공지 (USN)
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UbuntuNotice {
    pub id: String,
    #[serde(default)]
    pub cves_ids: Vec<String>,
    /// 릴리스 코드네임별 수정 패키지
    #[serde(default)]
    pub release_packages: HashMap<String, Vec<UbuntuNoticePackage>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UbuntuNoticePackage {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

/// 스캔당 한 번 가져오는 Ubuntu 피드
#[derive(Debug, Clone, Default)]
pub struct UbuntuFeed {
    pub cves: Vec<UbuntuCve>,
    pub notices: Vec<UbuntuNotice>,
}

/// Ubuntu 매칭 백엔드
pub struct UbuntuBackend {
    client: FeedClient,
    cves_url: String,
    notices_url: String,
    timeout: Duration,
    codename: Option<String>,
}

impl UbuntuBackend {
    pub fn new(
        client: FeedClient,
        cves_url: String,
        notices_url: String,
        timeout: Duration,
        codename: Option<String>,
    ) -> Self {
        Self {
            client,
            cves_url,
            notices_url,
            timeout,
            codename,
        }
    }

    fn release_matches(&self, codename: &str) -> bool {
        self.codename.as_deref().is_none_or(|c| c == codename)
    }
}

impl DistroBackend for UbuntuBackend {
    type Feed = UbuntuFeed;

    fn distro(&self) -> Distro {
        Distro::Ubuntu
    }

    fn package_format(&self) -> PackageFormat {
        PackageFormat::Dpkg
    }

    async fn fetch_advisories(&self) -> UbuntuFeed {
        let cves: Option<CvesDocument> = self
            .client
            .fetch_or_degrade(Distro::Ubuntu, &self.cves_url, &[], self.timeout)
            .await;
        let notices: Option<NoticesDocument> = self
            .client
            .fetch_or_degrade(Distro::Ubuntu, &self.notices_url, &[], self.timeout)
            .await;
        UbuntuFeed {
            cves: cves.unwrap_or_default().cves,
            notices: notices.unwrap_or_default().notices,
        }
    }

    fn advisory_count(&self, feed: &UbuntuFeed) -> usize {
        feed.cves.len() + feed.notices.len()
    }

    async fn match_batch(&self, batch: &[InstalledPackage], feed: &UbuntuFeed) -> Vec<PackageResult> {
        let names: HashSet<&str> = batch.iter().map(|p| p.name.as_str()).collect();
        let priorities: HashMap<&str, &str> = feed
            .cves
            .iter()
            .filter_map(|c| Some((c.id.as_str(), c.priority.as_deref()?)))
            .collect();

        // 패키지 이름 -> (CVE, 해당 릴리스 상태)
        let mut cve_index: HashMap<&str, Vec<(&UbuntuCve, &UbuntuStatus)>> = HashMap::new();
        for cve in &feed.cves {
            for pkg in cve.packages.iter().filter(|p| names.contains(p.name.as_str())) {
                let relevant = pkg.statuses.iter().find(|s| {
                    self.release_matches(&s.release_codename)
                        && !IGNORED_STATUSES.contains(&s.status.as_str())
                });
                if let Some(status) = relevant {
                    cve_index.entry(pkg.name.as_str()).or_default().push((cve, status));
                }
            }
        }

        // 패키지 이름 -> (공지, 공지의 수정 버전)
        let mut notice_index: HashMap<&str, Vec<(&UbuntuNotice, Option<&str>)>> = HashMap::new();
        for notice in &feed.notices {
            for (codename, pkgs) in &notice.release_packages {
                if !self.release_matches(codename) {
                    continue;
                }
                for pkg in pkgs.iter().filter(|p| names.contains(p.name.as_str())) {
                    notice_index
                        .entry(pkg.name.as_str())
                        .or_default()
                        .push((notice, pkg.version.as_deref()));
                }
            }
        }

        batch
            .iter()
            .map(|pkg| {
                let mut by_cve: BTreeMap<&str, Match> = BTreeMap::new();
                for (cve, status) in cve_index.get(pkg.name.as_str()).into_iter().flatten() {
                    if status.status == STATUS_RELEASED
                        && status.description.as_deref() == Some(pkg.version.as_str())
                    {
                        continue;
                    }
                    by_cve.entry(cve.id.as_str()).or_insert_with(|| Match {
                        advisory: cve.id.clone(),
                        package: pkg.name.clone(),
                        installed_version: pkg.version.clone(),
                        affected: pkg.version.clone(),
                        fixed: (status.status == STATUS_RELEASED)
                            .then(|| status.description.clone())
                            .flatten(),
                        issues: vec![cve.id.clone()],
                        severity: cve.priority.clone().unwrap_or_default(),
                        status: status.status.clone(),
                    });
                }
                for (notice, version) in notice_index.get(pkg.name.as_str()).into_iter().flatten() {
                    // 이미 공지의 수정 버전이 설치됨
                    if *version == Some(pkg.version.as_str()) {
                        continue;
                    }
                    for cve_id in &notice.cves_ids {
                        let entry = by_cve.entry(cve_id.as_str()).or_insert_with(|| Match {
                            advisory: cve_id.clone(),
                            package: pkg.name.clone(),
                            installed_version: pkg.version.clone(),
                            affected: pkg.version.clone(),
                            fixed: version.map(str::to_owned),
                            issues: vec![cve_id.clone()],
                            severity: priorities.get(cve_id.as_str()).map(|p| (*p).to_owned()).unwrap_or_default(),
                            status: STATUS_NOTICE.to_owned(),
                        });
                        if !entry.issues.contains(&notice.id) {
                            entry.issues.push(notice.id.clone());
                        }
                    }
                }
                PackageResult::new(pkg, by_cve.into_values().collect())
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::testing::serve_once;

    const CVES: &str = r#"{"cves": [
        {"id": "CVE-2024-1000", "priority": "medium", "packages": [
            {"name": "openssl", "statuses": [
                {"release_codename": "jammy", "status": "released", "description": "3.0.2-0ubuntu1.15"},
                {"release_codename": "noble", "status": "not-affected", "description": ""}
            ]}
        ]},
        {"id": "CVE-2024-2000", "priority": "low", "packages": [
            {"name": "openssl", "statuses": [{"release_codename": "jammy", "status": "DNE"}]},
            {"name": "curl", "statuses": [{"release_codename": "jammy", "status": "needed"}]}
        ]},
        {"id": "CVE-2024-3000", "priority": "high", "packages": []}
    ], "offset": 0, "limit": 20, "total_results": 3}"#;

    const NOTICES: &str = r#"{"notices": [
        {"id": "USN-6000-1", "cves_ids": ["CVE-2024-1000", "CVE-2024-3000"], "release_packages": {
            "jammy": [{"name": "openssl", "version": "3.0.2-0ubuntu1.15", "is_source": true}],
            "noble": [{"name": "curl", "version": "8.5.0-2ubuntu10.1"}]
        }}
    ]}"#;

    fn feed() -> UbuntuFeed {
        let cves: CvesDocument = serde_json::from_str(CVES).unwrap();
        let notices: NoticesDocument = serde_json::from_str(NOTICES).unwrap();
        UbuntuFeed {
            cves: cves.cves,
            notices: notices.notices,
        }
    }

    fn backend(codename: Option<&str>) -> UbuntuBackend {
        UbuntuBackend::new(
            FeedClient::new("ophiron-test").unwrap(),
            "http://127.0.0.1:9/cves.json".to_owned(),
            "http://127.0.0.1:9/notices.json".to_owned(),
            Duration::from_secs(1),
            codename.map(str::to_owned),
        )
    }

    #[tokio::test]
    async fn matches_status_and_notice_with_dedup() {
        let batch = vec![
            InstalledPackage::new("openssl", "3.0.2-0ubuntu1.14"),
            InstalledPackage::new("curl", "7.81.0-1ubuntu1.15"),
        ];
        let results = backend(Some("jammy")).match_batch(&batch, &feed()).await;

        let openssl = &results[0];
        let ids: Vec<_> = openssl.matches.iter().map(|m| m.advisory.as_str()).collect();
        // CVE-2024-1000은 상태와 공지 양쪽에서 나오지만 한 번만
        assert_eq!(ids, vec!["CVE-2024-1000", "CVE-2024-3000"]);
        let first = &openssl.matches[0];
        assert_eq!(first.fixed.as_deref(), Some("3.0.2-0ubuntu1.15"));
        assert_eq!(first.issues, vec!["CVE-2024-1000", "USN-6000-1"]);
        assert_eq!(first.status, "released");
        let second = &openssl.matches[1];
        assert_eq!(second.status, "notice");
        assert_eq!(second.severity, "high");

        let curl = &results[1];
        assert_eq!(curl.match_count, 1);
        assert_eq!(curl.matches[0].advisory, "CVE-2024-2000");
        assert_eq!(curl.matches[0].fixed, None);
    }

    #[tokio::test]
    async fn installed_fix_version_is_not_reported() {
        let batch = vec![InstalledPackage::new("openssl", "3.0.2-0ubuntu1.15")];
        let results = backend(Some("jammy")).match_batch(&batch, &feed()).await;
        assert_eq!(results[0].match_count, 0);
        assert!(results[0].matches.is_empty());
    }

    #[tokio::test]
    async fn not_affected_release_is_ignored() {
        let batch = vec![InstalledPackage::new("openssl", "3.0.13-0ubuntu3")];
        let results = backend(Some("noble")).match_batch(&batch, &feed()).await;
        assert_eq!(results[0].match_count, 0);
    }

    #[tokio::test]
    async fn unknown_codename_uses_any_release() {
        let batch = vec![InstalledPackage::new("curl", "8.5.0-2ubuntu10")];
        let results = backend(None).match_batch(&batch, &feed()).await;
        let ids: Vec<_> = results[0].matches.iter().map(|m| m.advisory.as_str()).collect();
        assert_eq!(ids, vec!["CVE-2024-1000", "CVE-2024-2000", "CVE-2024-3000"]);
    }

    #[tokio::test]
    async fn fetch_combines_both_documents() {
        let (cves_url, _a) = serve_once("200 OK", CVES).await;
        let (notices_url, _b) = serve_once("200 OK", NOTICES).await;
        let mut b = backend(Some("jammy"));
        b.cves_url = cves_url;
        b.notices_url = notices_url;
        let feed = b.fetch_advisories().await;
        assert_eq!(feed.cves.len(), 3);
        assert_eq!(feed.notices.len(), 1);
        assert_eq!(b.advisory_count(&feed), 4);
    }

    #[tokio::test]
    async fn notices_failure_keeps_cves() {
        let (cves_url, _a) = serve_once("200 OK", CVES).await;
        let mut b = backend(None);
        b.cves_url = cves_url;
        let feed = b.fetch_advisories().await;
        assert_eq!(feed.cves.len(), 3);
        assert!(feed.notices.is_empty());
    }
}
