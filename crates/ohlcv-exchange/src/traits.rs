//! 데이터 소스 추상화.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use ohlcv_core::{Candle, Chunk, Interval};

use crate::error::{ExchangeError, ExchangeResult};
use crate::rate_limit::RateLimiter;

/// 과거 캔들 데이터 소스 trait.
///
/// 구현체는 rate limit을 직접 다루지 않습니다. 모든 호출은
/// [`fetch_chunk`]를 통해 공유 [`RateLimiter`]를 먼저 거칩니다.
#[async_trait]
pub trait HistoricalDataSource: Send + Sync {
    /// 데이터 소스 이름 (로그용).
    fn name(&self) -> &str;

    /// 한 청크 구간의 캔들을 조회합니다.
    ///
    /// 거래일이 없는 구간은 빈 `Vec`을 반환하며 에러가 아닙니다.
    async fn fetch_candles(
        &self,
        instrument_token: u32,
        interval: Interval,
        chunk: &Chunk,
    ) -> ExchangeResult<Vec<Candle>>;
}

/// API 호출에 필요한 공유 컨텍스트.
///
/// 실행 단위로 하나만 만들고 모든 호출 지점에 복제해서 전달합니다.
#[derive(Debug, Clone)]
pub struct FetchContext {
    pub limiter: Arc<RateLimiter>,
    pub cancel: CancellationToken,
}

impl FetchContext {
    pub fn new(limiter: Arc<RateLimiter>, cancel: CancellationToken) -> Self {
        Self { limiter, cancel }
    }

    /// 토큰을 하나 획득한 뒤 `request`를 실행합니다.
    ///
    /// 대기 중이거나 요청이 진행 중일 때 취소되면 [`ExchangeError::Cancelled`].
    pub async fn call<F, T>(&self, request: F) -> ExchangeResult<T>
    where
        F: Future<Output = ExchangeResult<T>>,
    {
        self.limiter.acquire(&self.cancel).await?;

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ExchangeError::Cancelled),
            result = request => result,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// rate limit을 적용하여 청크 하나를 조회합니다. 호출당 정확히 한 번 토큰을 획득합니다.
pub async fn fetch_chunk(
    ctx: &FetchContext,
    source: &dyn HistoricalDataSource,
    instrument_token: u32,
    interval: Interval,
    chunk: &Chunk,
) -> ExchangeResult<Vec<Candle>> {
    ctx.call(source.fetch_candles(instrument_token, interval, chunk))
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::RateLimitConfig;
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingSource {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl HistoricalDataSource for CountingSource {
        fn name(&self) -> &str {
            "counting"
        }

        async fn fetch_candles(
            &self,
            _instrument_token: u32,
            _interval: Interval,
            _chunk: &Chunk,
        ) -> ExchangeResult<Vec<Candle>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }
    }

    struct HangingSource;

    #[async_trait]
    impl HistoricalDataSource for HangingSource {
        fn name(&self) -> &str {
            "hanging"
        }

        async fn fetch_candles(
            &self,
            _instrument_token: u32,
            _interval: Interval,
            _chunk: &Chunk,
        ) -> ExchangeResult<Vec<Candle>> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Vec::new())
        }
    }

    fn chunk() -> Chunk {
        let d = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        Chunk::new(
            d.and_hms_opt(0, 0, 0).unwrap(),
            d.and_hms_opt(23, 0, 0).unwrap(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_fetch_acquires_once() {
        let ctx = FetchContext::new(
            Arc::new(RateLimiter::new(RateLimitConfig::new(3.0, 1))),
            CancellationToken::new(),
        );
        let source = CountingSource {
            calls: AtomicUsize::new(0),
        };

        for _ in 0..4 {
            let candles = fetch_chunk(&ctx, &source, 1, Interval::Day, &chunk())
                .await
                .unwrap();
            assert!(candles.is_empty());
        }

        assert_eq!(source.calls.load(Ordering::SeqCst), 4);
        assert_eq!(ctx.limiter.acquired(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_aborts_in_flight_request() {
        let ctx = FetchContext::new(Arc::new(RateLimiter::with_defaults()), CancellationToken::new());

        let task = {
            let ctx = ctx.clone();
            tokio::spawn(async move {
                fetch_chunk(&ctx, &HangingSource, 1, Interval::Minute, &chunk()).await
            })
        };
        tokio::time::sleep(Duration::from_secs(5)).await;
        ctx.cancel.cancel();

        assert!(matches!(task.await.unwrap(), Err(ExchangeError::Cancelled)));
    }
}
