//! Fedora 백엔드
//!
//! Red Hat Security Data API에 배치마다 한 번 질의합니다
//! (`?package=a&package=b...`). 응답 항목은 `affected_packages`의 NVR에서
//! 추출한 이름으로 배치 패키지에 귀속시키고, 없으면 `bugzilla_description`의
//! 토큰으로 귀속시킵니다. 버전 비교 없이 존재 여부만으로 판정합니다.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::enumerate::PackageFormat;
use crate::fetch::FeedClient;
use crate::types::{Distro, InstalledPackage, Match, PackageResult};

use super::DistroBackend;

const STATUS_AFFECTED: &str = "affected";

/// Red Hat API CVE 항목
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RedHatCve {
    #[serde(rename = "CVE")]
    pub cve: String,
    #[serde(default)]
    pub severity: Option<String>,
    /// `name-[epoch:]version-release` 목록
    #[serde(default)]
    pub affected_packages: Vec<String>,
    #[serde(default)]
    pub bugzilla_description: Option<String>,
    /// RHSA 등 관련 어드바이저리
    #[serde(default)]
    pub advisories: Vec<String>,
}

/// NVR 문자열에서 패키지 이름을 추출합니다.
///
/// 오른쪽에서 `-`로 세 조각을 나눠 나머지를 이름으로 봅니다 (`openssl-libs-1:3.0.7-27.el9`
/// -> `openssl-libs`). 조각이 부족하면 `None`.
pub fn package_name_from_nvr(nvr: &str) -> Option<&str> {
    let mut parts = nvr.rsplitn(3, '-');
    let _release = parts.next()?;
    let _version = parts.next()?;
    parts.next().filter(|name| !name.is_empty())
}

fn description_tokens(description: &str) -> impl Iterator<Item = &str> {
    description
        .split(|c: char| !(c.is_ascii_alphanumeric() || "-_.+".contains(c)))
        .map(|t| t.trim_end_matches(['.', ':']))
        .filter(|t| !t.is_empty())
}

/// Fedora 매칭 백엔드
pub struct FedoraBackend {
    client: FeedClient,
    url: String,
    timeout: Duration,
}

impl FedoraBackend {
    pub fn new(client: FeedClient, url: String, timeout: Duration) -> Self {
        Self {
            client,
            url,
            timeout,
        }
    }

    /// 응답 항목을 배치 패키지에 귀속시킵니다.
    fn attribute(batch: &[InstalledPackage], entries: &[RedHatCve]) -> Vec<PackageResult> {
        let names: HashSet<&str> = batch.iter().map(|p| p.name.as_str()).collect();
        // 패키지 이름 -> CVE -> 귀속 근거 (NVR 또는 빈 문자열)
        let mut attributed: BTreeMap<&str, BTreeMap<&str, (&RedHatCve, &str)>> = BTreeMap::new();

        for entry in entries {
            let mut hit = false;
            for nvr in &entry.affected_packages {
                if let Some(name) = package_name_from_nvr(nvr)
                    && let Some(&name) = names.get(name)
                {
                    attributed
                        .entry(name)
                        .or_default()
                        .entry(entry.cve.as_str())
                        .or_insert((entry, nvr.as_str()));
                    hit = true;
                }
            }
            if hit {
                continue;
            }
            for token in entry.bugzilla_description.as_deref().map(description_tokens).into_iter().flatten() {
                if let Some(&name) = names.get(token) {
                    attributed
                        .entry(name)
                        .or_default()
                        .entry(entry.cve.as_str())
                        .or_insert((entry, ""));
                }
            }
        }

        batch
            .iter()
            .map(|pkg| {
                let matches = attributed
                    .get(pkg.name.as_str())
                    .into_iter()
                    .flat_map(|by_cve| by_cve.values())
                    .map(|(entry, nvr)| {
                        let mut issues = vec![entry.cve.clone()];
                        issues.extend(entry.advisories.iter().cloned());
                        Match {
                            advisory: entry.cve.clone(),
                            package: pkg.name.clone(),
                            installed_version: pkg.version.clone(),
                            affected: (*nvr).to_owned(),
                            fixed: None,
                            issues,
                            severity: entry.severity.clone().unwrap_or_default(),
                            status: STATUS_AFFECTED.to_owned(),
                        }
                    })
                    .collect();
                PackageResult::new(pkg, matches)
            })
            .collect()
    }
}

impl DistroBackend for FedoraBackend {
    /// 배치마다 질의하므로 사전 피드가 없습니다.
    type Feed = ();

    fn distro(&self) -> Distro {
        Distro::Fedora
    }

    fn package_format(&self) -> PackageFormat {
        PackageFormat::Rpm
    }

    async fn fetch_advisories(&self) {}

    fn advisory_count(&self, _feed: &()) -> usize {
        0
    }

    async fn match_batch(&self, batch: &[InstalledPackage], _feed: &()) -> Vec<PackageResult> {
        let query: Vec<(&str, &str)> = batch.iter().map(|p| ("package", p.name.as_str())).collect();
        let entries: Vec<RedHatCve> = self
            .client
            .fetch_or_degrade(Distro::Fedora, &self.url, &query, self.timeout)
            .await
            .unwrap_or_default();
        debug!(packages = batch.len(), entries = entries.len(), "red hat api batch response");
        Self::attribute(batch, &entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::testing::serve_once;

    fn entry(cve: &str, affected: &[&str], description: &str) -> RedHatCve {
        RedHatCve {
            cve: cve.to_owned(),
            severity: Some("moderate".to_owned()),
            affected_packages: affected.iter().map(|s| (*s).to_owned()).collect(),
            bugzilla_description: Some(description.to_owned()),
            advisories: vec!["RHSA-2024:1234".to_owned()],
        }
    }

    #[test]
    fn nvr_name_extraction() {
        assert_eq!(package_name_from_nvr("openssl-libs-1:3.0.7-27.el9"), Some("openssl-libs"));
        assert_eq!(package_name_from_nvr("kernel-0:4.18.0-513.el8"), Some("kernel"));
        assert_eq!(package_name_from_nvr("bash-5.2"), None);
        assert_eq!(package_name_from_nvr("-1.0-1"), None);
    }

    #[test]
    fn attributes_by_nvr_then_description() {
        let batch = vec![
            InstalledPackage::new("openssl-libs", "3.2.1-2.fc40"),
            InstalledPackage::new("curl", "8.6.0-7.fc40"),
            InstalledPackage::new("bash", "5.2.26-3.fc40"),
        ];
        let entries = vec![
            entry("CVE-2024-0727", &["openssl-libs-1:3.0.7-27.el9", "openssl-1:3.0.7-27.el9"], "openssl: denial of service"),
            entry("CVE-2024-2398", &[], "curl: HTTP/2 push headers memory-leak"),
            // NVR로 귀속되면 설명 토큰은 보지 않는다
            entry("CVE-2024-9999", &["openssl-libs-1:3.0.7-28.el9"], "curl: unrelated"),
        ];
        let results = FedoraBackend::attribute(&batch, &entries);

        let openssl: Vec<_> = results[0].matches.iter().map(|m| m.advisory.as_str()).collect();
        assert_eq!(openssl, vec!["CVE-2024-0727", "CVE-2024-9999"]);
        assert_eq!(results[0].matches[0].affected, "openssl-libs-1:3.0.7-27.el9");
        assert_eq!(results[0].matches[0].issues, vec!["CVE-2024-0727", "RHSA-2024:1234"]);

        assert_eq!(results[1].match_count, 1);
        assert_eq!(results[1].matches[0].advisory, "CVE-2024-2398");
        assert_eq!(results[1].matches[0].affected, "");

        assert_eq!(results[2].match_count, 0);
    }

    #[test]
    fn duplicate_entries_collapse_per_package() {
        let batch = vec![InstalledPackage::new("kernel", "6.8.5-301.fc40")];
        let entries = vec![
            entry("CVE-2024-1", &["kernel-0:4.18.0-513.el8", "kernel-0:5.14.0-362.el9"], "kernel: bug"),
            entry("CVE-2024-1", &["kernel-0:5.14.0-362.el9"], "kernel: bug"),
        ];
        let results = FedoraBackend::attribute(&batch, &entries);
        assert_eq!(results[0].match_count, 1);
    }

    #[tokio::test]
    async fn batch_query_sends_all_package_names() {
        let body = r#"[{"CVE": "CVE-2024-2398", "severity": "moderate", "public_date": "2024-03-27T00:00:00Z", "advisories": [], "bugzilla": "2270498", "bugzilla_description": "curl: HTTP/2 push headers memory-leak", "affected_packages": ["curl-0:7.76.1-29.el9_4"], "resource_url": "https://access.redhat.com/hydra/rest/securitydata/cve/CVE-2024-2398.json"}]"#;
        let (url, server) = serve_once("200 OK", body).await;
        let backend = FedoraBackend::new(FeedClient::new("ophiron-test").unwrap(), url, Duration::from_secs(5));
        let batch = vec![
            InstalledPackage::new("curl", "8.6.0-7.fc40"),
            InstalledPackage::new("bash", "5.2.26-3.fc40"),
        ];
        let results = backend.match_batch(&batch, &()).await;
        assert_eq!(results[0].match_count, 1);

        let request_line = server.await.unwrap();
        assert!(request_line.contains("package=curl&package=bash"), "{request_line}");
    }

    #[tokio::test]
    async fn api_failure_yields_no_matches() {
        let backend = FedoraBackend::new(
            FeedClient::new("ophiron-test").unwrap(),
            "http://127.0.0.1:9/cve.json".to_owned(),
            Duration::from_secs(1),
        );
        let batch = vec![InstalledPackage::new("curl", "8.6.0-7.fc40")];
        let results = backend.match_batch(&batch, &()).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].match_count, 0);
    }
}
