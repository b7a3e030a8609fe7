//! ophiron.toml 파싱 및 런타임 설정
//!
//! [`OphironConfig`]는 모든 모듈의 설정을 담는 최상위 구조체입니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선)
//! 2. 환경변수 (`OPHIRON_CVE_SCANNER_BATCH_SIZE=200` 형식)
//! 3. 설정 파일 (`ophiron.toml`)
//! 4. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), ophiron_core::error::OphironError> {
//! use ophiron_core::config::OphironConfig;
//!
//! // 파일에서 로드 + 환경변수 오버라이드
//! let config = OphironConfig::load("ophiron.toml").await?;
//!
//! // TOML 문자열에서 직접 파싱
//! let config = OphironConfig::parse("[general]\nlog_level = \"debug\"")?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, OphironError};

/// 배치 크기 상한 (Red Hat API 쿼리 파라미터 제한과 동일)
pub const MAX_BATCH_SIZE: usize = 400;

/// 배치 간 지연 상한 (밀리초)
pub const MAX_BATCH_DELAY_MS: u64 = 10_000;

/// Ophiron 통합 설정
///
/// `ophiron.toml` 파일의 최상위 구조를 나타냅니다.
/// 각 모듈은 자기 섹션만 읽어 사용합니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OphironConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// CVE 스캐너 설정
    #[serde(default)]
    pub cve_scanner: CveScannerSection,
}

impl OphironConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, OphironError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, OphironError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                OphironError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                OphironError::Io(e)
            }
        })?;
        let config = Self::parse(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, OphironError> {
        toml::from_str(toml_str).map_err(|e| {
            OphironError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `OPHIRON_{SECTION}_{FIELD}`
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "OPHIRON_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "OPHIRON_GENERAL_LOG_FORMAT");

        // CVE Scanner
        let scanner = &mut self.cve_scanner;
        override_string(&mut scanner.cache_dir, "OPHIRON_CVE_SCANNER_CACHE_DIR");
        override_string(
            &mut scanner.fallback_cache_dir,
            "OPHIRON_CVE_SCANNER_FALLBACK_CACHE_DIR",
        );
        override_string(
            &mut scanner.os_release_path,
            "OPHIRON_CVE_SCANNER_OS_RELEASE_PATH",
        );
        override_usize(&mut scanner.batch_size, "OPHIRON_CVE_SCANNER_BATCH_SIZE");
        override_u64(
            &mut scanner.batch_delay_ms,
            "OPHIRON_CVE_SCANNER_BATCH_DELAY_MS",
        );
        override_u64(
            &mut scanner.command_timeout_secs,
            "OPHIRON_CVE_SCANNER_COMMAND_TIMEOUT_SECS",
        );
        override_u64(
            &mut scanner.exec_timeout_secs,
            "OPHIRON_CVE_SCANNER_EXEC_TIMEOUT_SECS",
        );
        override_string(
            &mut scanner.docker_socket,
            "OPHIRON_CVE_SCANNER_DOCKER_SOCKET",
        );
        override_string(&mut scanner.user_agent, "OPHIRON_CVE_SCANNER_USER_AGENT");

        // Feeds
        let feeds = &mut scanner.feeds;
        override_string(&mut feeds.arch_url, "OPHIRON_FEEDS_ARCH_URL");
        override_u64(&mut feeds.arch_timeout_secs, "OPHIRON_FEEDS_ARCH_TIMEOUT_SECS");
        override_string(&mut feeds.debian_url, "OPHIRON_FEEDS_DEBIAN_URL");
        override_u64(
            &mut feeds.debian_timeout_secs,
            "OPHIRON_FEEDS_DEBIAN_TIMEOUT_SECS",
        );
        override_string(&mut feeds.ubuntu_cves_url, "OPHIRON_FEEDS_UBUNTU_CVES_URL");
        override_string(
            &mut feeds.ubuntu_notices_url,
            "OPHIRON_FEEDS_UBUNTU_NOTICES_URL",
        );
        override_u64(
            &mut feeds.ubuntu_timeout_secs,
            "OPHIRON_FEEDS_UBUNTU_TIMEOUT_SECS",
        );
        override_string(&mut feeds.redhat_api_url, "OPHIRON_FEEDS_REDHAT_API_URL");
        override_u64(
            &mut feeds.redhat_timeout_secs,
            "OPHIRON_FEEDS_REDHAT_TIMEOUT_SECS",
        );
        override_string(&mut feeds.suse_api_url, "OPHIRON_FEEDS_SUSE_API_URL");
        override_u64(&mut feeds.suse_timeout_secs, "OPHIRON_FEEDS_SUSE_TIMEOUT_SECS");
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), OphironError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(invalid(
                "general.log_level",
                format!("must be one of: {}", valid_levels.join(", ")),
            ));
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(invalid(
                "general.log_format",
                format!("must be one of: {}", valid_formats.join(", ")),
            ));
        }

        let scanner = &self.cve_scanner;
        if scanner.cache_dir.is_empty() {
            return Err(invalid("cve_scanner.cache_dir", "must not be empty".to_owned()));
        }

        if scanner.batch_size == 0 || scanner.batch_size > MAX_BATCH_SIZE {
            return Err(invalid(
                "cve_scanner.batch_size",
                format!("must be between 1 and {MAX_BATCH_SIZE}"),
            ));
        }

        if scanner.batch_delay_ms > MAX_BATCH_DELAY_MS {
            return Err(invalid(
                "cve_scanner.batch_delay_ms",
                format!("must be at most {MAX_BATCH_DELAY_MS}"),
            ));
        }

        // 모든 외부 호출은 명시적 타임아웃을 가져야 한다
        let timeouts = [
            ("cve_scanner.command_timeout_secs", scanner.command_timeout_secs),
            ("cve_scanner.exec_timeout_secs", scanner.exec_timeout_secs),
            ("cve_scanner.feeds.arch_timeout_secs", scanner.feeds.arch_timeout_secs),
            (
                "cve_scanner.feeds.debian_timeout_secs",
                scanner.feeds.debian_timeout_secs,
            ),
            (
                "cve_scanner.feeds.ubuntu_timeout_secs",
                scanner.feeds.ubuntu_timeout_secs,
            ),
            (
                "cve_scanner.feeds.redhat_timeout_secs",
                scanner.feeds.redhat_timeout_secs,
            ),
            ("cve_scanner.feeds.suse_timeout_secs", scanner.feeds.suse_timeout_secs),
        ];
        for (field, secs) in timeouts {
            if secs == 0 || secs > 600 {
                return Err(invalid(field, "must be between 1 and 600 seconds".to_owned()));
            }
        }

        let urls = [
            ("cve_scanner.feeds.arch_url", &scanner.feeds.arch_url),
            ("cve_scanner.feeds.debian_url", &scanner.feeds.debian_url),
            ("cve_scanner.feeds.ubuntu_cves_url", &scanner.feeds.ubuntu_cves_url),
            (
                "cve_scanner.feeds.ubuntu_notices_url",
                &scanner.feeds.ubuntu_notices_url,
            ),
            ("cve_scanner.feeds.redhat_api_url", &scanner.feeds.redhat_api_url),
            ("cve_scanner.feeds.suse_api_url", &scanner.feeds.suse_api_url),
        ];
        for (field, url) in urls {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(invalid(field, "must be an http(s) URL".to_owned()));
            }
        }

        Ok(())
    }
}

fn invalid(field: &str, reason: String) -> OphironError {
    ConfigError::InvalidValue {
        field: field.to_owned(),
        reason,
    }
    .into()
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
        }
    }
}

/// CVE 스캐너 설정 섹션
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CveScannerSection {
    /// 배포판별 캐시 루트 (`<cache_dir>/<distro>/`)
    pub cache_dir: String,
    /// 기본 캐시 경로에 쓸 수 없을 때 사용할 경로 (비어 있으면 `~/.ophiron/cache`)
    pub fallback_cache_dir: String,
    /// os-release 파일 경로
    pub os_release_path: String,
    /// 배치당 패키지 수
    pub batch_size: usize,
    /// 배치 사이 지연 (밀리초)
    pub batch_delay_ms: u64,
    /// 호스트 명령 타임아웃 (초)
    pub command_timeout_secs: u64,
    /// 컨테이너 exec 타임아웃 (초)
    pub exec_timeout_secs: u64,
    /// Docker 소켓 경로 (비어 있으면 로컬 기본값)
    pub docker_socket: String,
    /// 피드 요청 시 사용할 User-Agent
    pub user_agent: String,
    /// 취약점 피드 설정
    #[serde(default)]
    pub feeds: FeedsConfig,
}

impl Default for CveScannerSection {
    fn default() -> Self {
        Self {
            cache_dir: "cache".to_owned(),
            fallback_cache_dir: String::new(),
            os_release_path: "/etc/os-release".to_owned(),
            batch_size: MAX_BATCH_SIZE,
            batch_delay_ms: 500,
            command_timeout_secs: 120,
            exec_timeout_secs: 60,
            docker_socket: String::new(),
            user_agent: concat!("ophiron-cve-scanner/", env!("CARGO_PKG_VERSION")).to_owned(),
            feeds: FeedsConfig::default(),
        }
    }
}

/// 업스트림 취약점 피드 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedsConfig {
    /// Arch Linux 보안 트래커 (all.json)
    pub arch_url: String,
    pub arch_timeout_secs: u64,
    /// Debian 보안 트래커 JSON
    pub debian_url: String,
    pub debian_timeout_secs: u64,
    /// Ubuntu CVE 목록
    pub ubuntu_cves_url: String,
    /// Ubuntu 보안 공지 (USN)
    pub ubuntu_notices_url: String,
    pub ubuntu_timeout_secs: u64,
    /// Red Hat 보안 데이터 API (Fedora)
    pub redhat_api_url: String,
    pub redhat_timeout_secs: u64,
    /// OSV 일괄 조회 API (셸 없는 SUSE 컨테이너)
    pub suse_api_url: String,
    pub suse_timeout_secs: u64,
}

impl Default for FeedsConfig {
    fn default() -> Self {
        Self {
            arch_url: "https://security.archlinux.org/all.json".to_owned(),
            arch_timeout_secs: 60,
            debian_url: "https://security-tracker.debian.org/tracker/data/json".to_owned(),
            debian_timeout_secs: 120,
            ubuntu_cves_url: "https://ubuntu.com/security/cves.json".to_owned(),
            ubuntu_notices_url: "https://ubuntu.com/security/notices.json".to_owned(),
            ubuntu_timeout_secs: 60,
            redhat_api_url: "https://access.redhat.com/hydra/rest/securitydata/cve.json"
                .to_owned(),
            redhat_timeout_secs: 60,
            suse_api_url: "https://api.osv.dev/v1/querybatch".to_owned(),
            suse_timeout_secs: 60,
        }
    }
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_usize(target: &mut usize, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<usize>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse usize from env var, ignoring"
            ),
        }
    }
}

fn override_u64(target: &mut u64, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u64>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u64 from env var, ignoring"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_values() {
        let config = OphironConfig::default();
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.general.log_format, "json");
        assert_eq!(config.cve_scanner.cache_dir, "cache");
        assert_eq!(config.cve_scanner.batch_size, 400);
        assert_eq!(config.cve_scanner.feeds.arch_timeout_secs, 60);
        assert_eq!(config.cve_scanner.feeds.debian_timeout_secs, 120);
    }

    #[test]
    fn default_config_passes_validation() {
        OphironConfig::default().validate().unwrap();
    }

    #[test]
    fn from_str_empty_toml_uses_defaults() {
        let config = OphironConfig::parse("").unwrap();
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.cve_scanner.os_release_path, "/etc/os-release");
    }

    #[test]
    fn from_str_partial_toml_merges_with_defaults() {
        let toml = r#"
[general]
log_level = "debug"

[cve_scanner]
batch_size = 100

[cve_scanner.feeds]
arch_url = "http://127.0.0.1:8080/all.json"
"#;
        let config = OphironConfig::parse(toml).unwrap();
        assert_eq!(config.general.log_level, "debug");
        // log_format은 기본값 유지
        assert_eq!(config.general.log_format, "json");
        assert_eq!(config.cve_scanner.batch_size, 100);
        assert_eq!(config.cve_scanner.batch_delay_ms, 500);
        assert_eq!(
            config.cve_scanner.feeds.arch_url,
            "http://127.0.0.1:8080/all.json"
        );
        assert_eq!(config.cve_scanner.feeds.debian_timeout_secs, 120);
    }

    #[test]
    fn from_str_invalid_toml_returns_error() {
        let err = OphironConfig::parse("invalid = [[[toml").unwrap_err();
        assert!(matches!(
            err,
            OphironError::Config(ConfigError::ParseFailed { .. })
        ));
    }

    #[test]
    fn validate_rejects_invalid_log_level() {
        let mut config = OphironConfig::default();
        config.general.log_level = "verbose".to_owned();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("log_level"));
    }

    #[test]
    fn validate_rejects_invalid_log_format() {
        let mut config = OphironConfig::default();
        config.general.log_format = "xml".to_owned();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("log_format"));
    }

    #[test]
    fn validate_rejects_zero_batch_size() {
        let mut config = OphironConfig::default();
        config.cve_scanner.batch_size = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("batch_size"));
    }

    #[test]
    fn validate_rejects_oversized_batch() {
        let mut config = OphironConfig::default();
        config.cve_scanner.batch_size = MAX_BATCH_SIZE + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_timeout() {
        let mut config = OphironConfig::default();
        config.cve_scanner.feeds.redhat_timeout_secs = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("redhat_timeout_secs"));

        let mut config = OphironConfig::default();
        config.cve_scanner.feeds.suse_timeout_secs = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("suse_timeout_secs"));
    }

    #[test]
    fn validate_rejects_non_http_suse_api_url() {
        let mut config = OphironConfig::default();
        config.cve_scanner.feeds.suse_api_url = "ftp://api.osv.dev/v1/querybatch".to_owned();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("suse_api_url"));
    }

    #[test]
    fn validate_rejects_non_http_feed() {
        let mut config = OphironConfig::default();
        config.cve_scanner.feeds.debian_url = "ftp://example.org/json".to_owned();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("debian_url"));
    }

    #[test]
    fn validate_rejects_empty_cache_dir() {
        let mut config = OphironConfig::default();
        config.cve_scanner.cache_dir = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn env_override_string() {
        let mut val = "original".to_owned();
        // SAFETY: 테스트 전용 키이며 다른 테스트와 공유하지 않습니다.
        unsafe { std::env::set_var("TEST_OPHIRON_STR", "overridden") };
        override_string(&mut val, "TEST_OPHIRON_STR");
        assert_eq!(val, "overridden");
        unsafe { std::env::remove_var("TEST_OPHIRON_STR") };
    }

    #[test]
    fn env_override_usize_invalid_keeps_original() {
        let mut val = 400usize;
        // SAFETY: 테스트 전용 키이며 다른 테스트와 공유하지 않습니다.
        unsafe { std::env::set_var("TEST_OPHIRON_USIZE_BAD", "lots") };
        override_usize(&mut val, "TEST_OPHIRON_USIZE_BAD");
        assert_eq!(val, 400); // 원래 값 유지
        unsafe { std::env::remove_var("TEST_OPHIRON_USIZE_BAD") };
    }

    #[test]
    fn env_override_u64_valid() {
        let mut val = 500u64;
        // SAFETY: 테스트 전용 키이며 다른 테스트와 공유하지 않습니다.
        unsafe { std::env::set_var("TEST_OPHIRON_U64", "0") };
        override_u64(&mut val, "TEST_OPHIRON_U64");
        assert_eq!(val, 0);
        unsafe { std::env::remove_var("TEST_OPHIRON_U64") };
    }

    #[test]
    fn env_override_missing_var_keeps_original() {
        let mut val = "original".to_owned();
        override_string(&mut val, "TEST_OPHIRON_NONEXISTENT_12345");
        assert_eq!(val, "original");
    }

    #[test]
    fn config_serialize_roundtrip() {
        let config = OphironConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed = OphironConfig::parse(&toml_str).unwrap();
        assert_eq!(config.general.log_level, parsed.general.log_level);
        assert_eq!(config.cve_scanner.batch_size, parsed.cve_scanner.batch_size);
        assert_eq!(
            config.cve_scanner.feeds.redhat_api_url,
            parsed.cve_scanner.feeds.redhat_api_url
        );
    }

    #[tokio::test]
    async fn from_file_not_found() {
        let err = OphironConfig::from_file("/nonexistent/path/ophiron.toml")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OphironError::Config(ConfigError::FileNotFound { .. })
        ));
    }
}
