//! CVE 스캐너 설정
//!
//! [`CveScannerConfig`]는 core의
//! [`CveScannerSection`](ophiron_core::config::CveScannerSection)을 타입이 있는
//! 런타임 값(`PathBuf`, `Duration`)으로 변환합니다.
//!
//! # 사용 예시
//!
//! ```
//! use std::time::Duration;
//! use ophiron_cve_scanner::CveScannerConfigBuilder;
//!
//! let config = CveScannerConfigBuilder::new()
//!     .cache_dir("/tmp/ophiron-cache")
//!     .batch_size(200)
//!     .batch_delay(Duration::ZERO)
//!     .build()
//!     .unwrap();
//! assert_eq!(config.batch_size, 200);
//! ```

use std::path::PathBuf;
use std::time::Duration;

use ophiron_core::config::{CveScannerSection, MAX_BATCH_DELAY_MS, MAX_BATCH_SIZE};

use crate::error::CveScannerError;

/// 외부 호출 타임아웃 상한
const MAX_TIMEOUT: Duration = Duration::from_secs(600);

/// 업스트림 피드 엔드포인트
#[derive(Debug, Clone)]
pub struct FeedEndpoints {
    pub arch_url: String,
    pub arch_timeout: Duration,
    pub debian_url: String,
    pub debian_timeout: Duration,
    pub ubuntu_cves_url: String,
    pub ubuntu_notices_url: String,
    pub ubuntu_timeout: Duration,
    pub redhat_api_url: String,
    pub redhat_timeout: Duration,
    pub suse_api_url: String,
    pub suse_timeout: Duration,
}

impl Default for FeedEndpoints {
    fn default() -> Self {
        Self::from_core(&ophiron_core::config::FeedsConfig::default())
    }
}

impl FeedEndpoints {
    fn from_core(feeds: &ophiron_core::config::FeedsConfig) -> Self {
        Self {
            arch_url: feeds.arch_url.clone(),
            arch_timeout: Duration::from_secs(feeds.arch_timeout_secs),
            debian_url: feeds.debian_url.clone(),
            debian_timeout: Duration::from_secs(feeds.debian_timeout_secs),
            ubuntu_cves_url: feeds.ubuntu_cves_url.clone(),
            ubuntu_notices_url: feeds.ubuntu_notices_url.clone(),
            ubuntu_timeout: Duration::from_secs(feeds.ubuntu_timeout_secs),
            redhat_api_url: feeds.redhat_api_url.clone(),
            redhat_timeout: Duration::from_secs(feeds.redhat_timeout_secs),
            suse_api_url: feeds.suse_api_url.clone(),
            suse_timeout: Duration::from_secs(feeds.suse_timeout_secs),
        }
    }
}

/// CVE 스캐너 런타임 설정
#[derive(Debug, Clone)]
pub struct CveScannerConfig {
    /// 배포판별 캐시 루트
    pub cache_dir: PathBuf,
    /// 캐시 루트에 쓸 수 없을 때의 대체 경로
    pub fallback_cache_dir: PathBuf,
    /// os-release 파일 경로
    pub os_release_path: PathBuf,
    /// 배치당 패키지 수 (1..=400)
    pub batch_size: usize,
    /// 배치 사이 지연
    pub batch_delay: Duration,
    /// 호스트 명령 타임아웃
    pub command_timeout: Duration,
    /// 컨테이너 exec 타임아웃
    pub exec_timeout: Duration,
    /// Docker 소켓 (None이면 로컬 기본값)
    pub docker_socket: Option<String>,
    /// HTTP User-Agent
    pub user_agent: String,
    /// 피드 엔드포인트
    pub feeds: FeedEndpoints,
}

impl Default for CveScannerConfig {
    fn default() -> Self {
        Self::from_core(&CveScannerSection::default())
    }
}

impl CveScannerConfig {
    /// core 설정 섹션에서 스캐너 설정을 생성합니다.
    ///
    /// `fallback_cache_dir`가 비어 있으면 `~/.ophiron/cache`를 사용하고,
    /// 홈 디렉토리를 알 수 없으면 시스템 임시 디렉토리 아래를 사용합니다.
    pub fn from_core(core: &CveScannerSection) -> Self {
        let fallback_cache_dir = if core.fallback_cache_dir.is_empty() {
            default_fallback_dir()
        } else {
            PathBuf::from(&core.fallback_cache_dir)
        };
        let docker_socket = if core.docker_socket.is_empty() {
            None
        } else {
            Some(core.docker_socket.clone())
        };

        Self {
            cache_dir: PathBuf::from(&core.cache_dir),
            fallback_cache_dir,
            os_release_path: PathBuf::from(&core.os_release_path),
            batch_size: core.batch_size,
            batch_delay: Duration::from_millis(core.batch_delay_ms),
            command_timeout: Duration::from_secs(core.command_timeout_secs),
            exec_timeout: Duration::from_secs(core.exec_timeout_secs),
            docker_socket,
            user_agent: core.user_agent.clone(),
            feeds: FeedEndpoints::from_core(&core.feeds),
        }
    }

    /// 설정 값의 유효성을 검증합니다.
    ///
    /// # 검증 규칙
    ///
    /// - `batch_size`: 1-400
    /// - `batch_delay`: 최대 10초
    /// - 모든 타임아웃: 0 초과, 600초 이하
    /// - `cache_dir`: 비어 있으면 안 됨
    pub fn validate(&self) -> Result<(), CveScannerError> {
        if self.batch_size == 0 || self.batch_size > MAX_BATCH_SIZE {
            return Err(CveScannerError::Config {
                field: "batch_size".to_owned(),
                reason: format!("must be 1-{MAX_BATCH_SIZE}"),
            });
        }

        if self.batch_delay > Duration::from_millis(MAX_BATCH_DELAY_MS) {
            return Err(CveScannerError::Config {
                field: "batch_delay".to_owned(),
                reason: format!("must be at most {MAX_BATCH_DELAY_MS}ms"),
            });
        }

        if self.cache_dir.as_os_str().is_empty() {
            return Err(CveScannerError::Config {
                field: "cache_dir".to_owned(),
                reason: "must not be empty".to_owned(),
            });
        }

        let timeouts = [
            ("command_timeout", self.command_timeout),
            ("exec_timeout", self.exec_timeout),
            ("feeds.arch_timeout", self.feeds.arch_timeout),
            ("feeds.debian_timeout", self.feeds.debian_timeout),
            ("feeds.ubuntu_timeout", self.feeds.ubuntu_timeout),
            ("feeds.redhat_timeout", self.feeds.redhat_timeout),
            ("feeds.suse_timeout", self.feeds.suse_timeout),
        ];
        for (field, timeout) in timeouts {
            if timeout.is_zero() || timeout > MAX_TIMEOUT {
                return Err(CveScannerError::Config {
                    field: field.to_owned(),
                    reason: format!("must be 1-{}s", MAX_TIMEOUT.as_secs()),
                });
            }
        }

        Ok(())
    }
}

fn default_fallback_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".ophiron")
        .join("cache")
}

/// [`CveScannerConfig`] 빌더
#[derive(Default)]
pub struct CveScannerConfigBuilder {
    config: CveScannerConfig,
}

impl CveScannerConfigBuilder {
    /// 기본값을 가진 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cache_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.cache_dir = path.into();
        self
    }

    pub fn fallback_cache_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.fallback_cache_dir = path.into();
        self
    }

    pub fn os_release_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.os_release_path = path.into();
        self
    }

    pub fn batch_size(mut self, size: usize) -> Self {
        self.config.batch_size = size;
        self
    }

    pub fn batch_delay(mut self, delay: Duration) -> Self {
        self.config.batch_delay = delay;
        self
    }

    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.config.command_timeout = timeout;
        self
    }

    pub fn exec_timeout(mut self, timeout: Duration) -> Self {
        self.config.exec_timeout = timeout;
        self
    }

    pub fn docker_socket(mut self, socket: impl Into<String>) -> Self {
        self.config.docker_socket = Some(socket.into());
        self
    }

    /// 피드 엔드포인트 전체를 교체합니다.
    pub fn feeds(mut self, feeds: FeedEndpoints) -> Self {
        self.config.feeds = feeds;
        self
    }

    /// 설정을 검증하고 빌드합니다.
    ///
    /// # Errors
    ///
    /// 유효성 검증 실패 시 `CveScannerError::Config` 반환
    pub fn build(self) -> Result<CveScannerConfig, CveScannerError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        CveScannerConfig::default().validate().unwrap();
    }

    #[test]
    fn from_core_converts_units() {
        let core = CveScannerSection {
            cache_dir: "/var/cache/ophiron".to_owned(),
            batch_delay_ms: 750,
            command_timeout_secs: 30,
            docker_socket: "/run/docker.sock".to_owned(),
            ..CveScannerSection::default()
        };
        let config = CveScannerConfig::from_core(&core);
        assert_eq!(config.cache_dir, PathBuf::from("/var/cache/ophiron"));
        assert_eq!(config.batch_delay, Duration::from_millis(750));
        assert_eq!(config.command_timeout, Duration::from_secs(30));
        assert_eq!(config.docker_socket.as_deref(), Some("/run/docker.sock"));
        assert_eq!(config.feeds.debian_timeout, Duration::from_secs(120));
    }

    #[test]
    fn from_core_resolves_fallback_dir() {
        let config = CveScannerConfig::from_core(&CveScannerSection::default());
        assert!(config.fallback_cache_dir.ends_with(".ophiron/cache"));
        assert!(config.docker_socket.is_none());

        let core = CveScannerSection {
            fallback_cache_dir: "/srv/ophiron".to_owned(),
            ..CveScannerSection::default()
        };
        let config = CveScannerConfig::from_core(&core);
        assert_eq!(config.fallback_cache_dir, PathBuf::from("/srv/ophiron"));
    }

    #[test]
    fn validate_rejects_batch_size_out_of_range() {
        let err = CveScannerConfigBuilder::new().batch_size(0).build().unwrap_err();
        assert!(err.to_string().contains("batch_size"));
        assert!(CveScannerConfigBuilder::new().batch_size(401).build().is_err());
        assert!(CveScannerConfigBuilder::new().batch_size(400).build().is_ok());
    }

    #[test]
    fn validate_rejects_zero_timeout() {
        let err = CveScannerConfigBuilder::new()
            .exec_timeout(Duration::ZERO)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("exec_timeout"));
    }

    #[test]
    fn validate_rejects_long_delay() {
        let result = CveScannerConfigBuilder::new()
            .batch_delay(Duration::from_secs(60))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn builder_sets_fields() {
        let config = CveScannerConfigBuilder::new()
            .cache_dir("/tmp/a")
            .fallback_cache_dir("/tmp/b")
            .os_release_path("/tmp/os-release")
            .batch_delay(Duration::ZERO)
            .build()
            .unwrap();
        assert_eq!(config.cache_dir, PathBuf::from("/tmp/a"));
        assert_eq!(config.fallback_cache_dir, PathBuf::from("/tmp/b"));
        assert_eq!(config.os_release_path, PathBuf::from("/tmp/os-release"));
        assert!(config.batch_delay.is_zero());
    }
}
