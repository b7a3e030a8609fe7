//! 버전 비교
//!
//! Arch 규칙만 순서 비교가 필요합니다. 네이티브 `vercmp`를 호출하고,
//! 도구가 없거나 출력을 해석할 수 없으면 문자열 사전순 비교로 대체합니다.
//! 사전순 비교는 `1.10 < 1.9`처럼 부정확하지만 대체 경로로만 쓰입니다.
//!
//! Debian/Ubuntu는 피드의 상태 값으로, Fedora/SUSE는 존재 여부로 판정하므로
//! 이 모듈을 사용하지 않습니다.

use std::cmp::Ordering;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};

use tracing::{debug, warn};

use crate::exec::CommandRunner;

/// 버전 순서 비교기
pub trait VersionComparator: Send + Sync {
    /// `a`와 `b`의 순서를 반환합니다.
    fn compare(&self, a: &str, b: &str) -> impl Future<Output = Ordering> + Send;
}

/// 문자열 사전순 비교
pub fn lexicographic(a: &str, b: &str) -> Ordering {
    a.cmp(b)
}

/// `vercmp` 출력(-1, 0, 1 또는 음수/양수)을 순서로 해석합니다.
pub fn parse_vercmp_output(stdout: &str) -> Option<Ordering> {
    stdout.trim().parse::<i64>().ok().map(|n| n.cmp(&0))
}

/// pacman `vercmp` 기반 비교기
pub struct Vercmp<R> {
    runner: R,
    available: AtomicBool,
}

impl<R: CommandRunner> Vercmp<R> {
    pub fn new(runner: R) -> Self {
        Self {
            runner,
            available: AtomicBool::new(true),
        }
    }

    async fn native(&self, a: &str, b: &str) -> Option<Ordering> {
        if !self.available.load(AtomicOrdering::Relaxed) {
            return None;
        }
        match self.runner.run(&["vercmp", a, b]).await {
            Ok(out) if out.success() => {
                let parsed = parse_vercmp_output(&out.stdout);
                if parsed.is_none() {
                    debug!(a, b, stdout = %out.stdout.trim(), "unexpected vercmp output");
                }
                parsed
            }
            Ok(out) => {
                debug!(a, b, exit_code = out.exit_code, "vercmp exited abnormally");
                None
            }
            Err(e) => {
                // 도구가 없으면 이후 호출은 바로 대체 비교로 간다
                if self.available.swap(false, AtomicOrdering::Relaxed) {
                    warn!(error = %e, "vercmp unavailable, falling back to string comparison");
                }
                None
            }
        }
    }
}

impl<R: CommandRunner> VersionComparator for Vercmp<R> {
    async fn compare(&self, a: &str, b: &str) -> Ordering {
        match self.native(a, b).await {
            Some(ordering) => ordering,
            None => lexicographic(a, b),
        }
    }
}
