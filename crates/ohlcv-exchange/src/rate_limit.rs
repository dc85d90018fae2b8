//! 전역 API rate limiter.
//!
//! Token Bucket 알고리즘으로 초당 요청 수를 제한합니다. 업스트림 한도가
//! 종목별이 아니라 계정 전체에 걸리므로, 실행 중에는 하나의 인스턴스를
//! `Arc`로 공유하여 모든 API 호출 지점에 명시적으로 전달합니다.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use ohlcv_core::RateLimitSettings;

use crate::error::{ExchangeError, ExchangeResult};

/// Rate Limiter 설정.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitConfig {
    /// 초당 리필되는 요청 수
    pub requests_per_second: f64,
    /// 버킷 용량 (연속으로 허용되는 요청 수)
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 3.0,
            burst: 1,
        }
    }
}

impl RateLimitConfig {
    pub fn new(requests_per_second: f64, burst: u32) -> Self {
        Self {
            requests_per_second,
            burst,
        }
    }
}

impl From<&RateLimitSettings> for RateLimitConfig {
    fn from(settings: &RateLimitSettings) -> Self {
        Self::new(settings.requests_per_second, settings.burst)
    }
}

/// Token Bucket 구조체.
#[derive(Debug)]
struct TokenBucket {
    /// 현재 토큰 수
    tokens: f64,
    /// 마지막 리필 시간
    last_refill: Instant,
    /// 최대 토큰 수 (버킷 용량)
    max_tokens: f64,
    /// 초당 리필되는 토큰 수
    refill_rate: f64,
}

impl TokenBucket {
    fn new(config: &RateLimitConfig) -> Self {
        let max_tokens = f64::from(config.burst.max(1));
        let refill_rate = if config.requests_per_second.is_finite()
            && config.requests_per_second > 0.0
        {
            config.requests_per_second
        } else {
            RateLimitConfig::default().requests_per_second
        };

        Self {
            tokens: max_tokens,
            last_refill: Instant::now(),
            max_tokens,
            refill_rate,
        }
    }

    /// 토큰 소비 시도.
    fn try_acquire(&mut self) -> bool {
        self.refill();

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// 경과 시간만큼 토큰 리필.
    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();

        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.max_tokens);
        self.last_refill = now;
    }

    /// 다음 토큰까지 대기 시간.
    fn time_until_next_token(&self) -> Duration {
        if self.tokens >= 1.0 {
            Duration::ZERO
        } else {
            let secs = (1.0 - self.tokens) / self.refill_rate;
            Duration::try_from_secs_f64(secs).unwrap_or(Duration::from_secs(1))
        }
    }
}

/// 프로세스 전역 Rate Limiter.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    bucket: Mutex<TokenBucket>,
    acquired: AtomicU64,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        let bucket = TokenBucket::new(&config);
        Self {
            config,
            bucket: Mutex::new(bucket),
            acquired: AtomicU64::new(0),
        }
    }

    /// Kite 기본 한도(초당 3회, 버스트 1)로 생성.
    pub fn with_defaults() -> Self {
        Self::new(RateLimitConfig::default())
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// 토큰을 하나 획득할 때까지 대기합니다.
    ///
    /// 대기 중 `cancel`이 취소되면 토큰을 소비하지 않고
    /// [`ExchangeError::Cancelled`]를 반환합니다.
    pub async fn acquire(&self, cancel: &CancellationToken) -> ExchangeResult<()> {
        loop {
            if cancel.is_cancelled() {
                return Err(ExchangeError::Cancelled);
            }

            let wait = {
                let mut bucket = self.bucket.lock().await;
                if bucket.try_acquire() {
                    self.acquired.fetch_add(1, Ordering::Relaxed);
                    return Ok(());
                }
                bucket.time_until_next_token()
            };

            tracing::trace!(wait_ms = wait.as_millis() as u64, "rate limit 대기");

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ExchangeError::Cancelled),
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// 지금까지 획득된 토큰 수 (= 실제로 나간 API 호출 수).
    pub fn acquired(&self) -> u64 {
        self.acquired.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_burst_is_immediate() {
        let limiter = RateLimiter::new(RateLimitConfig::new(3.0, 2));
        let cancel = CancellationToken::new();
        let start = Instant::now();

        limiter.acquire(&cancel).await.unwrap();
        limiter.acquire(&cancel).await.unwrap();

        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(limiter.acquired(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_n_acquires_respect_rate() {
        // 초당 3회, 버스트 1: 7번 획득에는 최소 (7 - 1) / 3 = 2초
        let limiter = RateLimiter::with_defaults();
        let cancel = CancellationToken::new();
        let start = Instant::now();

        for _ in 0..7 {
            limiter.acquire(&cancel).await.unwrap();
        }

        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(2), "elapsed {:?}", elapsed);
        assert!(elapsed < Duration::from_millis(2100), "elapsed {:?}", elapsed);
        assert_eq!(limiter.acquired(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shared_limiter_is_global() {
        let limiter = Arc::new(RateLimiter::new(RateLimitConfig::new(2.0, 1)));
        let cancel = CancellationToken::new();
        let start = Instant::now();

        let mut handles = Vec::new();
        for _ in 0..3 {
            let limiter = Arc::clone(&limiter);
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..2 {
                    limiter.acquire(&cancel).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        // 6회, 버스트 1, 초당 2회 → 최소 2.5초
        assert!(start.elapsed() >= Duration::from_millis(2500));
        assert_eq!(limiter.acquired(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_waiting() {
        let limiter = Arc::new(RateLimiter::new(RateLimitConfig::new(0.1, 1)));
        let cancel = CancellationToken::new();

        limiter.acquire(&cancel).await.unwrap();

        let waiter = {
            let limiter = Arc::clone(&limiter);
            let cancel = cancel.clone();
            tokio::spawn(async move { limiter.acquire(&cancel).await })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();

        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(ExchangeError::Cancelled)));
        assert_eq!(limiter.acquired(), 1);
    }

    #[tokio::test]
    async fn test_already_cancelled_fails_fast() {
        let limiter = RateLimiter::with_defaults();
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert!(limiter.acquire(&cancel).await.unwrap_err().is_cancelled());
        assert_eq!(limiter.acquired(), 0);
    }

    #[test]
    fn test_invalid_rate_falls_back() {
        let bucket = TokenBucket::new(&RateLimitConfig::new(0.0, 0));
        assert_eq!(bucket.refill_rate, 3.0);
        assert_eq!(bucket.max_tokens, 1.0);
    }
}
