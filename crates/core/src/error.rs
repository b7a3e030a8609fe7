//! 도메인별 에러 타입

/// Ophiron 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum OphironError {
    /// 설정 관련 에러
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 스캔 에러
    #[error("scan error: {0}")]
    Scan(#[from] ScanError),

    /// 컨테이너 에러
    #[error("container error: {0}")]
    Container(#[from] ContainerError),

    /// 파싱 에러
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 설정 관련 에러
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 설정 파일을 찾을 수 없음
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// 설정 파싱 실패
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// 유효하지 않은 설정 값
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// CVE 스캔 에러
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    /// 지원하지 않는 운영체제
    #[error("Unsupported OS type: {0}")]
    UnsupportedOs(String),

    /// 스캔 실행 실패
    #[error("scan failed: {0}")]
    Failed(String),
}

/// 컨테이너 에러
#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    /// 컨테이너를 찾을 수 없음
    #[error("container not found: {0}")]
    NotFound(String),

    /// 컨테이너가 실행 중이 아님
    #[error("container {id} is not running (status: {status})")]
    NotRunning { id: String, status: String },

    /// Docker API 에러
    #[error("docker api error: {0}")]
    DockerApi(String),
}

/// 파싱 에러
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// 피드, 캐시, 아카이브 내용이 올바르지 않음
    #[error("malformed data: {0}")]
    Malformed(String),

    /// 파싱 실패
    #[error("parse failed at offset {offset}: {reason}")]
    Failed { offset: usize, reason: String },
}
