//! 배치 매칭
//!
//! 설치 패키지를 고정 크기 배치로 나눠 백엔드에 넘기고, 배치마다 결과 파일을
//! 즉시 기록합니다. 배치 사이에는 업스트림 부하를 줄이기 위해 대기합니다
//! (마지막 배치 뒤에는 대기하지 않음).

use std::time::Duration;

use tracing::{debug, info};

use ophiron_core::metrics as m;

use crate::backend::DistroBackend;
use crate::cache::CacheLocation;
use crate::types::{BatchResult, InstalledPackage};

/// 배치 매칭 실행기
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchMatcher {
    batch_size: usize,
    delay: Duration,
}

impl BatchMatcher {
    /// `batch_size`가 0이면 1로 올립니다.
    pub fn new(batch_size: usize, delay: Duration) -> Self {
        Self {
            batch_size: batch_size.max(1),
            delay,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// `packages`를 배치 단위로 매칭합니다.
    ///
    /// 배치 번호는 1부터 시작하며, 결과는 `batch_<n>.json`으로 바로 기록됩니다.
    /// 빈 목록이면 배치를 만들지 않습니다.
    pub async fn process<B: DistroBackend>(
        &self,
        backend: &B,
        packages: &[InstalledPackage],
        feed: &B::Feed,
        cache: &CacheLocation,
    ) -> Vec<BatchResult> {
        let distro = backend.distro();
        let total_batches = packages.len().div_ceil(self.batch_size);
        let mut batches = Vec::with_capacity(total_batches);

        for (index, chunk) in packages.chunks(self.batch_size).enumerate() {
            let batch_number = index + 1;
            let results = backend.match_batch(chunk, feed).await;
            let batch = BatchResult::new(batch_number, chunk.len(), results);

            info!(
                distro = %distro,
                batch = batch_number,
                total_batches,
                packages = chunk.len(),
                packages_with_cves = batch.packages_with_cves,
                cves = batch.total_cves,
                "processed batch"
            );
            metrics::counter!(m::CVE_SCANNER_BATCHES_PROCESSED_TOTAL, m::LABEL_DISTRO => distro.as_str())
                .increment(1);
            metrics::counter!(m::CVE_SCANNER_PACKAGES_SCANNED_TOTAL, m::LABEL_DISTRO => distro.as_str())
                .increment(chunk.len() as u64);
            metrics::counter!(m::CVE_SCANNER_MATCHES_FOUND_TOTAL, m::LABEL_DISTRO => distro.as_str())
                .increment(batch.total_cves as u64);

            cache.write_batch(&batch).await;
            batches.push(batch);

            if batch_number < total_batches && !self.delay.is_zero() {
                debug!(delay_ms = self.delay.as_millis() as u64, "waiting before next batch");
                tokio::time::sleep(self.delay).await;
            }
        }

        batches
    }
}
