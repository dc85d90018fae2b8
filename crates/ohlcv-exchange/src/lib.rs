//! Kite Connect 과거 시세 조회.
//!
//! 이 크레이트는 다음을 제공합니다:
//! - RateLimiter: 프로세스 전역 토큰 버킷 (요청마다 정확히 한 번 획득)
//! - HistoricalDataSource trait과 rate limit이 적용된 청크 조회 진입점
//! - 제한된 지수 백오프 재시도
//! - Kite Connect REST 커넥터 (과거 시세, 종목 목록, 프로필, 세션)
//! - 종목 심볼 → 토큰 디렉토리 (캐시 + API)

pub mod connector;
pub mod error;
pub mod instruments;
pub mod rate_limit;
pub mod retry;
pub mod traits;

pub use connector::kite::{InstrumentRecord, KiteClient, KiteConfig, SessionData, UserProfile};
pub use error::*;
pub use instruments::InstrumentDirectory;
pub use rate_limit::{RateLimitConfig, RateLimiter};
pub use retry::{fetch_chunk_with_retry, retry_with_backoff, RetryPolicy};
pub use traits::*;
