//! 에러 타입 정의.

use thiserror::Error;

use ohlcv_core::CoreError;
use ohlcv_data::DataError;
use ohlcv_exchange::ExchangeError;

/// 실행 전체를 중단시키는 에러.
///
/// 청크/레코드 단위 실패는 여기까지 올라오지 않고 보고서에 집계됩니다.
#[derive(Debug, Error)]
pub enum CollectorError {
    /// 설정 에러 (날짜, 인터벌, 저장소 종류 등)
    #[error("Configuration error: {0}")]
    Config(#[from] CoreError),

    /// 인증 에러 (액세스 토큰 누락/만료)
    #[error("Authentication error: {0}")]
    Auth(String),

    /// 저장소 초기화/종료 에러
    #[error("Storage error: {0}")]
    Storage(#[from] DataError),

    /// 거래소 API 에러 (종목 목록 조회 등 실행 전 단계)
    #[error("Exchange error: {0}")]
    Exchange(ExchangeError),

    /// 해석 가능한 종목이 하나도 없음
    #[error("No valid instruments to fetch (unresolved: {})", .0.join(", "))]
    NoValidInstruments(Vec<String>),
}

impl From<ExchangeError> for CollectorError {
    fn from(err: ExchangeError) -> Self {
        if err.is_auth_error() {
            Self::Auth(err.to_string())
        } else {
            Self::Exchange(err)
        }
    }
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, CollectorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_errors_are_classified() {
        let err: CollectorError = ExchangeError::Unauthorized("token expired".into()).into();
        assert!(matches!(err, CollectorError::Auth(_)));

        let err: CollectorError = ExchangeError::RateLimited.into();
        assert!(matches!(err, CollectorError::Exchange(_)));
    }

    #[test]
    fn test_no_valid_instruments_message() {
        let err = CollectorError::NoValidInstruments(vec!["FOO".into(), "BAR".into()]);
        assert_eq!(
            err.to_string(),
            "No valid instruments to fetch (unresolved: FOO, BAR)"
        );
    }
}
