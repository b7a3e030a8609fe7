//! 통합 테스트 공용 헬퍼

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use ophiron_cve_scanner::cache::CacheLocation;
use ophiron_cve_scanner::{CveScannerConfig, CveScannerConfigBuilder, FeedEndpoints, InstalledPackage};

/// 도달할 수 없는 피드 URL (discard 포트)
pub const UNREACHABLE: &str = "http://127.0.0.1:9/feed.json";

/// 같은 JSON 본문을 계속 응답하는 로컬 HTTP 서버
pub struct FeedServer {
    pub url: String,
    requests: Arc<Mutex<Vec<String>>>,
}

impl FeedServer {
    pub async fn start(body: impl Into<String>) -> Self {
        let body = body.into();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&requests);

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                let mut buf = vec![0u8; 16 * 1024];
                let n = socket.read(&mut buf).await.unwrap_or(0);
                let request = String::from_utf8_lossy(&buf[..n]).into_owned();
                seen.lock()
                    .unwrap()
                    .push(request.lines().next().unwrap_or_default().to_owned());
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        Self {
            url: format!("http://{addr}/feed.json"),
            requests,
        }
    }

    /// 지금까지 받은 요청 줄
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

/// 모든 피드가 도달 불가능한 엔드포인트
pub fn unreachable_feeds() -> FeedEndpoints {
    FeedEndpoints {
        arch_url: UNREACHABLE.to_owned(),
        arch_timeout: Duration::from_secs(2),
        debian_url: UNREACHABLE.to_owned(),
        debian_timeout: Duration::from_secs(2),
        ubuntu_cves_url: UNREACHABLE.to_owned(),
        ubuntu_notices_url: UNREACHABLE.to_owned(),
        ubuntu_timeout: Duration::from_secs(2),
        redhat_api_url: UNREACHABLE.to_owned(),
        redhat_timeout: Duration::from_secs(2),
        suse_api_url: UNREACHABLE.to_owned(),
        suse_timeout: Duration::from_secs(2),
    }
}

/// 임시 루트 아래에 os-release와 캐시를 둔 설정
pub fn test_config(root: &Path, os_release: &str, batch_size: usize, feeds: FeedEndpoints) -> CveScannerConfig {
    let os_release_path = root.join("os-release");
    std::fs::write(&os_release_path, os_release).unwrap();
    CveScannerConfigBuilder::new()
        .cache_dir(root.join("cache"))
        .fallback_cache_dir(root.join("fallback"))
        .os_release_path(os_release_path)
        .batch_size(batch_size)
        .batch_delay(Duration::ZERO)
        .command_timeout(Duration::from_secs(5))
        .feeds(feeds)
        .build()
        .unwrap()
}

/// 배포판 캐시 디렉토리
pub fn distro_cache(root: &Path, distro: &str) -> PathBuf {
    root.join("cache").join(distro)
}

/// `installed.json`을 미리 기록해 패키지 목록 명령을 생략하게 합니다.
pub async fn seed_installed(root: &Path, distro: &str, packages: &[InstalledPackage]) {
    CacheLocation::at(distro_cache(root, distro))
        .write_installed(packages)
        .await;
}

/// `filler-<i>` 패키지 `n`개
pub fn filler_packages(n: usize) -> Vec<InstalledPackage> {
    (0..n)
        .map(|i| InstalledPackage::new(format!("filler-{i}"), "1.0-1"))
        .collect()
}
