//! 청크 조회 재시도.
//!
//! 기본값은 재시도 없음입니다. `max_retries > 0`이면 재시도 가능한 에러
//! (네트워크, 타임아웃, 429, 5xx)에 한해 지수 백오프로 다시 시도하며,
//! 매 시도는 rate limiter 토큰을 새로 획득합니다.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use ohlcv_core::{Candle, Chunk, FetchSettings, Interval};

use crate::error::{ExchangeError, ExchangeResult};
use crate::traits::{fetch_chunk, FetchContext, HistoricalDataSource};

/// 지수 백오프 재시도 정책.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// 첫 재시도 전 대기 시간
    pub initial_backoff: Duration,
    /// 최대 대기 시간
    pub max_backoff: Duration,
    /// 시도마다 곱하는 배수
    pub multiplier: u32,
    /// 최대 재시도 횟수 (0이면 한 번만 시도)
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

impl RetryPolicy {
    /// 재시도 없음.
    pub fn none() -> Self {
        Self {
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            multiplier: 2,
            max_retries: 0,
        }
    }

    pub fn from_settings(settings: &FetchSettings) -> Self {
        Self {
            initial_backoff: Duration::from_millis(settings.retry_base_delay_ms),
            max_retries: settings.max_retries,
            ..Self::none()
        }
    }

    /// `attempt`번째 재시도(0부터) 전 대기 시간.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.saturating_pow(attempt);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// 재시도 가능한 에러에 대해 지수 백오프로 `operation`을 반복합니다.
///
/// 백오프 대기 중 취소되면 [`ExchangeError::Cancelled`]를 반환합니다.
/// 재시도를 모두 소진하면 마지막 에러를 반환합니다.
pub async fn retry_with_backoff<F, Fut, T>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    should_retry: impl Fn(&ExchangeError) -> bool,
    mut operation: F,
) -> ExchangeResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ExchangeResult<T>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < policy.max_retries && should_retry(&err) => {
                let wait = policy.backoff(attempt);
                attempt += 1;
                tracing::warn!(
                    error = %err,
                    attempt,
                    max_retries = policy.max_retries,
                    wait_ms = wait.as_millis() as u64,
                    "재시도 대기"
                );
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(ExchangeError::Cancelled),
                    _ = tokio::time::sleep(wait) => {}
                }
            }
            Err(err) => return Err(err),
        }
    }
}

/// rate limit과 재시도 정책을 적용하여 청크 하나를 조회합니다.
pub async fn fetch_chunk_with_retry(
    ctx: &FetchContext,
    source: &dyn HistoricalDataSource,
    policy: &RetryPolicy,
    instrument_token: u32,
    interval: Interval,
    chunk: &Chunk,
) -> ExchangeResult<Vec<Candle>> {
    retry_with_backoff(policy, &ctx.cancel, ExchangeError::is_retryable, move || {
        fetch_chunk(ctx, source, instrument_token, interval, chunk)
    })
    .await
}
