//! 취약점 피드 HTTP 클라이언트
//!
//! 모든 요청은 호출마다 명시적 타임아웃을 가지며 재시도하지 않습니다.
//! 네트워크/상태 코드/파싱 실패는 [`FeedClient::fetch_or_degrade`]에서
//! `None`("어드바이저리 없음")으로 격하됩니다.

use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use ophiron_core::metrics as m;

use crate::error::CveScannerError;
use crate::types::Distro;

/// 피드 조회 클라이언트
#[derive(Debug, Clone)]
pub struct FeedClient {
    client: reqwest::Client,
}

impl FeedClient {
    /// User-Agent를 지정해 클라이언트를 생성합니다.
    pub fn new(user_agent: &str) -> Result<Self, CveScannerError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .build()
            .map_err(|e| CveScannerError::Fetch {
                url: String::new(),
                reason: format!("failed to create HTTP client: {e}"),
            })?;
        Ok(Self { client })
    }

    /// JSON 문서를 GET으로 가져옵니다.
    ///
    /// `query`의 같은 키는 반복 파라미터로 전송됩니다 (`package=a&package=b`).
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
        timeout: Duration,
    ) -> Result<T, CveScannerError> {
        let fetch_err = |reason: String| CveScannerError::Fetch {
            url: url.to_owned(),
            reason,
        };
        let resp = self
            .client
            .get(url)
            .query(query)
            .header("Accept", "application/json")
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| fetch_err(e.to_string()))?;
        decode_json(url, resp).await
    }

    /// JSON 본문을 POST로 보내고 JSON 응답을 받습니다.
    pub async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        url: &str,
        body: &B,
        timeout: Duration,
    ) -> Result<T, CveScannerError> {
        let resp = self
            .client
            .post(url)
            .json(body)
            .header("Accept", "application/json")
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| CveScannerError::Fetch {
                url: url.to_owned(),
                reason: e.to_string(),
            })?;
        decode_json(url, resp).await
    }

    /// [`get_json`](Self::get_json)을 호출하고 실패 시 경고를 남긴 뒤 `None`을 반환합니다.
    pub async fn fetch_or_degrade<T: DeserializeOwned>(
        &self,
        distro: Distro,
        url: &str,
        query: &[(&str, &str)],
        timeout: Duration,
    ) -> Option<T> {
        degrade(distro, self.get_json(url, query, timeout).await)
    }

    /// [`post_json`](Self::post_json)의 격하 버전입니다.
    pub async fn post_or_degrade<B: Serialize, T: DeserializeOwned>(
        &self,
        distro: Distro,
        url: &str,
        body: &B,
        timeout: Duration,
    ) -> Option<T> {
        degrade(distro, self.post_json(url, body, timeout).await)
    }
}

fn degrade<T>(distro: Distro, result: Result<T, CveScannerError>) -> Option<T> {
    match result {
        Ok(doc) => Some(doc),
        Err(e) => {
            warn!(distro = %distro, error = %e, "advisory feed unavailable, continuing without it");
            metrics::counter!(m::CVE_SCANNER_FEED_FAILURES_TOTAL, m::LABEL_DISTRO => distro.as_str())
                .increment(1);
            None
        }
    }
}

async fn decode_json<T: DeserializeOwned>(
    url: &str,
    resp: reqwest::Response,
) -> Result<T, CveScannerError> {
    let fetch_err = |reason: String| CveScannerError::Fetch {
        url: url.to_owned(),
        reason,
    };
    let status = resp.status();
    if !status.is_success() {
        return Err(fetch_err(format!("status {status}")));
    }

    let body = resp.bytes().await.map_err(|e| fetch_err(e.to_string()))?;
    debug!(url, bytes = body.len(), "fetched feed");
    serde_json::from_slice(&body)
        .map_err(|e| CveScannerError::Parse(format!("feed {url}: {e}")))
}
