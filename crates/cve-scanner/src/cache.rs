//! 배포판별 결과 캐시
//!
//! 하나의 스캔은 `<cache_dir>/<distro>/` 디렉토리를 독점합니다.
//!
//! ```text
//! cache/<distro>/
//! ├── installed.json              {packages, timestamp}
//! ├── matched.json                {matched, timestamp}
//! ├── batch_results/batch_<n>.json
//! └── containers/<short-id>/      컨테이너 스캔 결과 (installed.json 없음)
//! ```
//!
//! 경로는 [`CacheLocation::resolve`]에서 한 번 결정되고 이후 바뀌지 않습니다.
//! 기본 경로에 쓸 수 없으면 대체 경로(`~/.ophiron/cache/<distro>/`)를 사용합니다.
//!
//! 모든 쓰기는 best-effort입니다. 실패는 `warn!`으로 기록되고 스캔 결과에는
//! 영향을 주지 않습니다.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, Mutex};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, warn};

use crate::error::CveScannerError;
use crate::types::{
    BatchResult, Distro, InstalledPackage, InstalledSnapshot, Match, MatchedSnapshot,
    now_rfc3339,
};

const INSTALLED_FILE: &str = "installed.json";
const MATCHED_FILE: &str = "matched.json";
const BATCH_DIR: &str = "batch_results";
const CONTAINERS_DIR: &str = "containers";

/// 확정된 캐시 디렉토리
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheLocation {
    dir: PathBuf,
}

impl CacheLocation {
    /// 배포판 캐시 디렉토리를 결정합니다.
    ///
    /// `primary_root/<distro>`를 만들고 쓰기 가능한지 확인합니다. 실패하면
    /// `fallback_root/<distro>`를 사용합니다. 대체 경로 생성 실패는 기록만 하고,
    /// 이후 쓰기는 조용히 실패합니다.
    pub fn resolve(primary_root: &Path, fallback_root: &Path, distro: Distro) -> Self {
        let primary = primary_root.join(distro.as_str());
        match probe_writable(&primary) {
            Ok(()) => return Self { dir: primary },
            Err(e) => warn!(
                path = %primary.display(),
                error = %e,
                "cache directory not writable, using fallback"
            ),
        }

        let fallback = fallback_root.join(distro.as_str());
        if let Err(e) = std::fs::create_dir_all(&fallback) {
            warn!(path = %fallback.display(), error = %e, "failed to create fallback cache directory");
        }
        Self { dir: fallback }
    }

    /// 이미 결정된 디렉토리로 위치를 생성합니다.
    pub fn at(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// 컨테이너 전용 하위 위치 (`containers/<short-id>/`)
    pub fn for_container(&self, short_id: &str) -> Self {
        Self {
            dir: self.dir.join(CONTAINERS_DIR).join(short_id),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn installed_path(&self) -> PathBuf {
        self.dir.join(INSTALLED_FILE)
    }

    pub fn matched_path(&self) -> PathBuf {
        self.dir.join(MATCHED_FILE)
    }

    pub fn batch_dir(&self) -> PathBuf {
        self.dir.join(BATCH_DIR)
    }

    /// `batch_results/batch_<n>.json`
    pub fn batch_path(&self, batch_number: usize) -> PathBuf {
        self.batch_dir().join(format!("batch_{batch_number}.json"))
    }

    /// 이전 스캔의 배치 파일을 모두 삭제합니다.
    pub async fn clear_batches(&self) {
        let dir = self.batch_dir();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
            Err(e) => {
                warn!(path = %dir.display(), error = %e, "failed to list old batch results");
                return;
            }
        };

        let mut removed = 0usize;
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!(path = %dir.display(), error = %e, "failed to read batch directory entry");
                    break;
                }
            };
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with("batch_") && name.ends_with(".json") {
                match tokio::fs::remove_file(entry.path()).await {
                    Ok(()) => removed += 1,
                    Err(e) => warn!(path = %entry.path().display(), error = %e, "failed to remove old batch result"),
                }
            }
        }
        debug!(path = %dir.display(), removed, "cleared old batch results");
    }

    /// 설치 패키지 목록을 `installed.json`으로 저장합니다.
    pub async fn write_installed(&self, packages: &[InstalledPackage]) {
        let snapshot = InstalledSnapshot {
            packages: packages.to_vec(),
            timestamp: now_rfc3339(),
        };
        self.write_best_effort(&self.installed_path(), &snapshot).await;
    }

    /// `installed.json`을 읽습니다. 없거나 손상되었으면 `None`.
    pub async fn read_installed(&self) -> Option<Vec<InstalledPackage>> {
        let path = self.installed_path();
        match read_json::<InstalledSnapshot>(&path).await {
            Ok(snapshot) => Some(snapshot.packages),
            Err(CveScannerError::Io { source, .. })
                if source.kind() == std::io::ErrorKind::NotFound =>
            {
                None
            }
            Err(e) => {
                warn!(error = %e, "ignoring unreadable installed package cache");
                None
            }
        }
    }

    /// 전체 매치 목록을 `matched.json`으로 저장합니다.
    pub async fn write_matched(&self, matched: &[Match]) {
        let snapshot = MatchedSnapshot {
            matched: matched.to_vec(),
            timestamp: now_rfc3339(),
        };
        self.write_best_effort(&self.matched_path(), &snapshot).await;
    }

    /// 배치 결과를 즉시 저장합니다.
    pub async fn write_batch(&self, batch: &BatchResult) {
        self.write_best_effort(&self.batch_path(batch.batch_number), batch)
            .await;
    }

    async fn write_best_effort<T: Serialize>(&self, path: &Path, value: &T) {
        if let Err(e) = write_json(path, value).await {
            warn!(error = %e, "cache write failed, continuing without it");
        }
    }
}

fn probe_writable(dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    tempfile::NamedTempFile::new_in(dir).map(drop)
}

/// 값을 들여쓰기된 JSON으로 기록합니다. 상위 디렉토리는 필요 시 생성합니다.
pub async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), CveScannerError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| CveScannerError::io(parent, e))?;
    }
    let json = serde_json::to_vec_pretty(value)
        .map_err(|e| CveScannerError::Parse(format!("serialize {}: {e}", path.display())))?;
    tokio::fs::write(path, json)
        .await
        .map_err(|e| CveScannerError::io(path, e))
}

/// JSON 파일을 읽어 역직렬화합니다.
pub async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, CveScannerError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| CveScannerError::io(path, e))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| CveScannerError::Parse(format!("{}: {e}", path.display())))
}

static SCAN_LOCKS: LazyLock<Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// 캐시 디렉토리 단위의 프로세스 내 스캔 잠금
///
/// 같은 디렉토리를 쓰는 두 스캔은 순서대로 실행됩니다.
pub struct ScanLock {
    key: PathBuf,
    guard: OwnedMutexGuard<()>,
}

impl ScanLock {
    /// 잠금을 획득할 때까지 대기합니다.
    pub async fn acquire(location: &CacheLocation) -> Self {
        let key = location.dir().to_path_buf();
        let mutex = {
            let mut locks = SCAN_LOCKS.lock().unwrap_or_else(|p| p.into_inner());
            Arc::clone(locks.entry(key.clone()).or_default())
        };
        if mutex.try_lock().is_err() {
            debug!(path = %key.display(), "waiting for running scan on the same cache");
        }
        Self {
            key,
            guard: mutex.lock_owned().await,
        }
    }
}

impl Drop for ScanLock {
    fn drop(&mut self) {
        let mut locks = SCAN_LOCKS.lock().unwrap_or_else(|p| p.into_inner());
        // 맵과 이 가드만 참조 중이면 대기자가 없다
        if Arc::strong_count(OwnedMutexGuard::mutex(&self.guard)) == 2 {
            locks.remove(&self.key);
        }
    }
}
