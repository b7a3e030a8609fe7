//! 메트릭 상수 및 설명 등록
//!
//! 모든 메트릭의 이름과 설명을 중앙에서 정의합니다.
//! 각 모듈은 이 상수를 사용하여 `metrics::counter!()`,
//! `metrics::histogram!()` 매크로를 호출합니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `ophiron_`
//! - 모듈명: `cve_scanner_`
//! - 접미어: `_total` (counter), `_seconds` (histogram)
//!
//! # 사용 예시
//!
//! ```ignore
//! use metrics::counter;
//!
//! counter!(ophiron_core::metrics::CVE_SCANNER_BATCHES_PROCESSED_TOTAL).increment(1);
//! ```

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 배포판 레이블 키 (arch, debian, ubuntu, fedora, suse)
pub const LABEL_DISTRO: &str = "distro";

/// 스캔 대상 레이블 키 (host, container)
pub const LABEL_TARGET: &str = "target";

// ─── CVE Scanner 메트릭 ────────────────────────────────────────────

/// 완료된 스캔 수 (counter, label: distro, target)
pub const CVE_SCANNER_SCANS_COMPLETED_TOTAL: &str = "ophiron_cve_scanner_scans_completed_total";

/// 처리된 배치 수 (counter, label: distro)
pub const CVE_SCANNER_BATCHES_PROCESSED_TOTAL: &str =
    "ophiron_cve_scanner_batches_processed_total";

/// 스캔된 패키지 수 (counter, label: distro)
pub const CVE_SCANNER_PACKAGES_SCANNED_TOTAL: &str = "ophiron_cve_scanner_packages_scanned_total";

/// 발견된 매치 수 (counter, label: distro)
pub const CVE_SCANNER_MATCHES_FOUND_TOTAL: &str = "ophiron_cve_scanner_matches_found_total";

/// 피드 조회 실패 수 (counter, label: distro)
pub const CVE_SCANNER_FEED_FAILURES_TOTAL: &str = "ophiron_cve_scanner_feed_failures_total";

/// 스캔 소요 시간 (histogram, 초)
pub const CVE_SCANNER_SCAN_DURATION_SECONDS: &str = "ophiron_cve_scanner_scan_duration_seconds";

/// 모든 메트릭의 설명을 등록합니다.
///
/// recorder 설치 직후 한 번 호출합니다. recorder가 없으면 아무 일도 하지 않습니다.
pub fn describe_all() {
    use metrics::{describe_counter, describe_histogram};

    describe_counter!(
        CVE_SCANNER_SCANS_COMPLETED_TOTAL,
        "Total number of completed CVE scans"
    );
    describe_counter!(
        CVE_SCANNER_BATCHES_PROCESSED_TOTAL,
        "Total number of package batches matched"
    );
    describe_counter!(
        CVE_SCANNER_PACKAGES_SCANNED_TOTAL,
        "Total number of installed packages matched against advisories"
    );
    describe_counter!(
        CVE_SCANNER_MATCHES_FOUND_TOTAL,
        "Total number of vulnerability matches found"
    );
    describe_counter!(
        CVE_SCANNER_FEED_FAILURES_TOTAL,
        "Total number of advisory feed retrieval failures"
    );
    describe_histogram!(
        CVE_SCANNER_SCAN_DURATION_SECONDS,
        "Duration of a full CVE scan in seconds"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_names_share_prefix() {
        for name in [
            CVE_SCANNER_SCANS_COMPLETED_TOTAL,
            CVE_SCANNER_BATCHES_PROCESSED_TOTAL,
            CVE_SCANNER_PACKAGES_SCANNED_TOTAL,
            CVE_SCANNER_MATCHES_FOUND_TOTAL,
            CVE_SCANNER_FEED_FAILURES_TOTAL,
            CVE_SCANNER_SCAN_DURATION_SECONDS,
        ] {
            assert!(name.starts_with("ophiron_cve_scanner_"), "{name}");
        }
    }

    #[test]
    fn describe_all_without_recorder_is_noop() {
        describe_all();
    }
}
