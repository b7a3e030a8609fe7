//! 대상 운영체제 판별
//!
//! os-release 파일 내용을 소문자로 바꾼 뒤 고정된 우선순위로 마커를 찾습니다.
//! Ubuntu의 os-release에는 `ID_LIKE=debian`이 들어 있으므로 Ubuntu를 먼저 확인합니다.
//!
//! 우선순위: ubuntu → debian → arch → fedora → suse

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::types::Distro;

/// 파싱된 os-release 필드
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OsRelease {
    /// `ID`
    pub id: String,
    /// `ID_LIKE` (공백 구분)
    pub id_like: Vec<String>,
    /// `PRETTY_NAME` 또는 `NAME`
    pub pretty_name: String,
    /// `VERSION_ID`
    pub version_id: Option<String>,
    /// `VERSION_CODENAME`, 없으면 `UBUNTU_CODENAME`
    pub codename: Option<String>,
    raw: String,
}

impl OsRelease {
    /// `KEY=VALUE` 형식의 os-release 내용을 파싱합니다.
    ///
    /// 주석과 빈 줄은 무시하고, 값의 따옴표는 제거합니다.
    pub fn parse(content: &str) -> Self {
        let mut fields: HashMap<&str, String> = HashMap::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                let value = value.trim().trim_matches('"').trim_matches('\'');
                fields.insert(key.trim(), value.to_owned());
            }
        }

        let codename = fields
            .get("VERSION_CODENAME")
            .or_else(|| fields.get("UBUNTU_CODENAME"))
            .filter(|v| !v.is_empty())
            .map(|v| v.to_lowercase());

        Self {
            id: fields.get("ID").map(|v| v.to_lowercase()).unwrap_or_default(),
            id_like: fields
                .get("ID_LIKE")
                .map(|v| v.split_whitespace().map(str::to_lowercase).collect())
                .unwrap_or_default(),
            pretty_name: fields
                .get("PRETTY_NAME")
                .or_else(|| fields.get("NAME"))
                .cloned()
                .unwrap_or_default(),
            version_id: fields.get("VERSION_ID").cloned(),
            codename,
            raw: content.to_lowercase(),
        }
    }

    /// 마커 우선순위에 따라 배포판을 판별합니다.
    pub fn distro(&self) -> Distro {
        let content = self.raw.as_str();
        let is_token = |token: &str| self.id == token || self.id_like.iter().any(|t| t == token);

        if content.contains("ubuntu") {
            Distro::Ubuntu
        } else if content.contains("debian") {
            Distro::Debian
        } else if is_token("arch") || content.contains("arch linux") || content.contains("archlinux")
        {
            Distro::Arch
        } else if content.contains("fedora") {
            Distro::Fedora
        } else if content.contains("suse") {
            Distro::Suse
        } else {
            Distro::Unknown
        }
    }
}

/// os-release 내용으로 배포판을 판별합니다.
pub fn detect_from_content(content: &str) -> Distro {
    OsRelease::parse(content).distro()
}

/// 호스트 운영체제 판별기
#[derive(Debug, Clone)]
pub struct Detector {
    os_release_path: PathBuf,
}

impl Default for Detector {
    fn default() -> Self {
        Self::new("/etc/os-release")
    }
}

impl Detector {
    /// 지정한 os-release 경로로 판별기를 생성합니다.
    pub fn new(os_release_path: impl AsRef<Path>) -> Self {
        Self {
            os_release_path: os_release_path.as_ref().to_path_buf(),
        }
    }

    /// os-release 파일을 읽어 파싱합니다. 읽기 실패 시 빈 값을 반환합니다.
    pub async fn read_release(&self) -> OsRelease {
        match tokio::fs::read_to_string(&self.os_release_path).await {
            Ok(content) => OsRelease::parse(&content),
            Err(e) => {
                warn!(
                    path = %self.os_release_path.display(),
                    error = %e,
                    "failed to read os-release, target is unknown"
                );
                OsRelease::default()
            }
        }
    }

    /// 호스트 배포판을 판별합니다.
    pub async fn detect(&self) -> Distro {
        let distro = self.read_release().await.distro();
        debug!(distro = %distro, "detected host distribution");
        distro
    }
}
