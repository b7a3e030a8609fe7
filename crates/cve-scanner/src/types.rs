//! 스캐너 도메인 타입
//!
//! - [`Distro`]: 지원 배포판 태그
//! - [`InstalledPackage`]: 설치된 패키지 (`{name, version}`)
//! - [`Match`]: 배포판 규칙으로 확인된 단일 취약점 매치
//! - [`PackageResult`] / [`BatchResult`]: 배치 단위 결과 (`batch_<n>.json`)
//! - [`ScanSummary`]: 스캔 전체 요약
//!
//! 모든 타입은 캐시 파일 형식과 동일한 JSON 필드명으로 직렬화됩니다.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use ophiron_core::types::Severity;

/// 지원 배포판
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Distro {
    /// Arch Linux
    Arch,
    /// Debian
    Debian,
    /// Ubuntu
    Ubuntu,
    /// Fedora
    Fedora,
    /// openSUSE / SLES
    Suse,
    /// 판별 불가
    Unknown,
}

impl Distro {
    /// 캐시 디렉토리명 및 로그/메트릭 레이블로 쓰이는 소문자 이름
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Arch => "arch",
            Self::Debian => "debian",
            Self::Ubuntu => "ubuntu",
            Self::Fedora => "fedora",
            Self::Suse => "suse",
            Self::Unknown => "unknown",
        }
    }

    /// 지원되는 배포판 목록 (Unknown 제외)
    pub const SUPPORTED: [Distro; 5] = [
        Self::Arch,
        Self::Debian,
        Self::Ubuntu,
        Self::Fedora,
        Self::Suse,
    ];
}

impl fmt::Display for Distro {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 설치된 패키지
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstalledPackage {
    /// 패키지명
    pub name: String,
    /// 설치 버전 (배포판 고유 형식, epoch/release 포함 가능)
    pub version: String,
}

impl InstalledPackage {
    /// 새 패키지를 생성합니다.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

/// 취약점 매치
///
/// 배포판 규칙이 "설치 버전이 아직 수정되지 않았다"고 확인한 경우에만 생성됩니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Match {
    /// 어드바이저리 ID (AVG-…, CVE-…, 패치명 등)
    pub advisory: String,
    /// 패키지명
    pub package: String,
    /// 설치 버전
    pub installed_version: String,
    /// 영향받는 버전 (피드가 제공하지 않으면 설치 버전 또는 빈 문자열)
    pub affected: String,
    /// 수정 버전
    pub fixed: Option<String>,
    /// 관련 이슈 (CVE ID 목록)
    pub issues: Vec<String>,
    /// 피드가 보고한 심각도 문자열
    pub severity: String,
    /// 피드가 보고한 상태 문자열
    pub status: String,
}

/// 패키지 단위 매치 결과
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageResult {
    /// 패키지명
    pub package: String,
    /// 설치 버전
    pub version: String,
    /// 매치 목록
    pub matches: Vec<Match>,
    /// 매치 수
    pub match_count: usize,
}

impl PackageResult {
    /// 패키지와 매치 목록으로 결과를 생성합니다.
    pub fn new(package: &InstalledPackage, matches: Vec<Match>) -> Self {
        Self {
            package: package.name.clone(),
            version: package.version.clone(),
            match_count: matches.len(),
            matches,
        }
    }
}

/// 배치 결과 (`batch_<n>.json`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResult {
    /// 1부터 시작하는 배치 번호
    pub batch_number: usize,
    /// 배치에 포함된 패키지 수
    pub total_packages: usize,
    /// 매치가 있는 패키지 수
    pub packages_with_cves: usize,
    /// 배치 내 전체 매치 수
    pub total_cves: usize,
    /// 처리 시각 (RFC 3339)
    pub timestamp: String,
    /// 매치가 있는 패키지의 결과만 포함
    pub results: Vec<PackageResult>,
}

impl BatchResult {
    /// 패키지별 결과에서 배치 결과를 조립합니다.
    ///
    /// 매치가 없는 패키지는 `results`에서 제외됩니다.
    pub fn new(batch_number: usize, total_packages: usize, results: Vec<PackageResult>) -> Self {
        let results: Vec<PackageResult> =
            results.into_iter().filter(|r| !r.matches.is_empty()).collect();
        let total_cves = results.iter().map(|r| r.match_count).sum();
        Self {
            batch_number,
            total_packages,
            packages_with_cves: results.len(),
            total_cves,
            timestamp: now_rfc3339(),
            results,
        }
    }
}

/// 스캔 요약
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanSummary {
    /// 열거된 설치 패키지 수
    pub total_installed: usize,
    /// 매치들에 등장한 고유 어드바이저리 ID 수
    pub total_advisories: usize,
    /// 전체 매치 수 (중복 제거 없음)
    pub total_matched: usize,
    /// 모든 배치의 매치를 이어붙인 목록
    pub matched: Vec<Match>,
}

impl ScanSummary {
    /// 배치 결과로부터 요약을 계산합니다.
    pub fn from_batches(total_installed: usize, batches: &[BatchResult]) -> Self {
        let matched: Vec<Match> = batches
            .iter()
            .flat_map(|b| b.results.iter())
            .flat_map(|r| r.matches.iter().cloned())
            .collect();
        let total_advisories = matched
            .iter()
            .map(|m| m.advisory.as_str())
            .collect::<HashSet<_>>()
            .len();

        Self {
            total_installed,
            total_advisories,
            total_matched: matched.len(),
            matched,
        }
    }

    /// 매치가 하나라도 있는지 확인합니다.
    pub fn has_findings(&self) -> bool {
        self.total_matched > 0
    }

    /// 매치의 심각도 문자열을 core [`Severity`] 척도로 집계합니다.
    pub fn severity_counts(&self) -> SeverityCounts {
        let mut counts = SeverityCounts::default();
        for m in &self.matched {
            match Severity::from_str_loose(&m.severity) {
                Some(Severity::Critical) => counts.critical += 1,
                Some(Severity::High) => counts.high += 1,
                Some(Severity::Medium) => counts.medium += 1,
                Some(Severity::Low) => counts.low += 1,
                Some(Severity::Info) => counts.info += 1,
                None => counts.unknown += 1,
            }
        }
        counts
    }
}

/// 심각도별 매치 수
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityCounts {
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub info: usize,
    /// 인식할 수 없는 심각도 (예: Arch의 "Unknown")
    pub unknown: usize,
}

/// `installed.json` 파일 형식
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstalledSnapshot {
    pub packages: Vec<InstalledPackage>,
    pub timestamp: String,
}

/// `matched.json` 파일 형식
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchedSnapshot {
    pub matched: Vec<Match>,
    pub timestamp: String,
}

/// 현재 UTC 시각 (RFC 3339)
pub(crate) fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}
