//! CVE 스캐너 에러 타입
//!
//! [`CveScannerError`]는 스캐너 모듈 내에서 발생할 수 있는 모든 에러를 나타냅니다.
//! `From<CveScannerError> for OphironError` 구현을 통해 `?` 연산자로
//! 상위 에러 타입으로 전파됩니다.
//!
//! # 에러 카테고리
//!
//! - **대상 판별**: `UnsupportedOs`
//! - **컨테이너**: `ContainerNotFound`, `ContainerNotRunning`, `DockerApi`, `DockerConnection`
//! - **외부 호출**: `Command`, `Fetch`
//! - **데이터**: `Parse`, `Io`
//! - **설정**: `Config`
//!
//! 대부분의 에러는 스캔 내부에서 "결과 없음"으로 격하됩니다.
//! 호출자에게 그대로 전달되는 것은 대상 판별과 컨테이너 에러뿐입니다.

use ophiron_core::error::{ConfigError, ContainerError, OphironError, ParseError, ScanError};

/// CVE 스캐너 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum CveScannerError {
    /// 지원하지 않는 운영체제
    #[error("Unsupported OS type: {0}")]
    UnsupportedOs(String),

    /// 컨테이너를 찾을 수 없음
    #[error("container not found: {0}")]
    ContainerNotFound(String),

    /// 컨테이너가 실행 중이 아님
    #[error("container {id} is not running (status: {status})")]
    ContainerNotRunning {
        /// 컨테이너 ID
        id: String,
        /// 현재 상태
        status: String,
    },

    /// Docker API 호출 실패
    #[error("docker api error: {0}")]
    DockerApi(String),

    /// Docker 데몬 연결 실패
    #[error("docker connection error: {0}")]
    DockerConnection(String),

    /// 외부 명령 실행 실패 (없음, 타임아웃, 비정상 종료)
    #[error("command '{program}' failed: {reason}")]
    Command {
        /// 실행한 프로그램
        program: String,
        /// 실패 사유
        reason: String,
    },

    /// 피드 조회 실패
    #[error("fetch {url} failed: {reason}")]
    Fetch {
        /// 요청 URL
        url: String,
        /// 실패 사유
        reason: String,
    },

    /// 데이터 파싱 실패
    #[error("parse error: {0}")]
    Parse(String),

    /// 파일 I/O 에러
    #[error("io error: {path}: {source}")]
    Io {
        /// 관련 파일 경로
        path: String,
        /// 원본 I/O 에러
        source: std::io::Error,
    },

    /// 설정 에러
    #[error("config error: {field}: {reason}")]
    Config {
        /// 설정 필드명
        field: String,
        /// 에러 사유
        reason: String,
    },
}

impl CveScannerError {
    /// 경로 정보를 붙여 I/O 에러를 생성합니다.
    pub(crate) fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }
}

impl From<CveScannerError> for OphironError {
    fn from(err: CveScannerError) -> Self {
        match err {
            CveScannerError::UnsupportedOs(os) => OphironError::Scan(ScanError::UnsupportedOs(os)),
            CveScannerError::ContainerNotFound(id) => {
                OphironError::Container(ContainerError::NotFound(id))
            }
            CveScannerError::ContainerNotRunning { id, status } => {
                OphironError::Container(ContainerError::NotRunning { id, status })
            }
            CveScannerError::DockerApi(msg) | CveScannerError::DockerConnection(msg) => {
                OphironError::Container(ContainerError::DockerApi(msg))
            }
            CveScannerError::Parse(msg) => OphironError::Parse(ParseError::Malformed(msg)),
            CveScannerError::Io { path, source } => OphironError::Scan(ScanError::Failed(
                format!("io error: {path}: {source}"),
            )),
            CveScannerError::Config { field, reason } => {
                OphironError::Config(ConfigError::InvalidValue { field, reason })
            }
            other @ (CveScannerError::Command { .. } | CveScannerError::Fetch { .. }) => {
                OphironError::Scan(ScanError::Failed(other.to_string()))
            }
        }
    }
}
