//! Rate limit 재시도 - 쿨다운 후 같은 작업을 다시 실행
//!
//! rate limit 외의 에러는 즉시 돌려주고, 시도 횟수는 `max_attempts`로 제한합니다.

use std::future::Future;
use std::time::Duration;

use anyhow::Result;

use crate::error::is_rate_limited;

/// 기본 쿨다운 (rate limit 후 대기)
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(60);

/// 기본 최대 시도 횟수 (첫 시도 포함)
pub const DEFAULT_MAX_ATTEMPTS: usize = 5;

/// 재시도 정책
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// rate limit 후 대기 시간
    pub cooldown: Duration,
    /// 첫 시도를 포함한 최대 시도 횟수
    pub max_attempts: usize,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            cooldown: DEFAULT_COOLDOWN,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl RetryPolicy {
    pub fn new(cooldown: Duration, max_attempts: usize) -> Self {
        Self {
            cooldown,
            max_attempts,
        }
    }
}

/// rate limit 에러면 쿨다운 후 같은 작업을 재시도
///
/// `op`은 시도마다 새 future를 만듭니다. 시도 횟수를 다 쓰면
/// 마지막 에러를 그대로 반환합니다.
pub async fn retry_on_rate_limit<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < max_attempts && is_rate_limited(&e) => {
                tracing::warn!(
                    "Rate limited, waiting {:?} before retrying (attempt {}/{})",
                    policy.cooldown,
                    attempt,
                    max_attempts
                );
                tokio::time::sleep(policy.cooldown).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
