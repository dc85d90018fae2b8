//! 핵심 에러 타입.

use thiserror::Error;

use crate::config::ValidationReport;

/// 도메인 타입과 설정에서 발생하는 에러.
#[derive(Debug, Error)]
pub enum CoreError {
    /// 지원하지 않는 인터벌 토큰
    #[error("Invalid interval: {0}")]
    InvalidInterval(String),

    /// YYYY-MM-DD 형식이 아닌 날짜
    #[error("Invalid date '{0}': must be in YYYY-MM-DD format")]
    InvalidDate(String),

    /// 지원하지 않는 저장소 종류
    #[error("Invalid storage type: {0}")]
    InvalidStorageType(String),

    /// 저장할 수 없는 캔들 (NaN 가격, 음수 거래량 등)
    #[error("Malformed candle: {0}")]
    MalformedCandle(String),

    /// 설정 로드 에러
    #[error("Configuration error: {0}")]
    Config(String),

    /// 설정 검증 실패 (모든 항목 포함)
    #[error("Configuration validation failed: {0}")]
    Validation(ValidationReport),

    /// 로깅 초기화 에러
    #[error("Logging error: {0}")]
    Logging(String),

    /// I/O 에러
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for CoreError {
    fn from(err: config::ConfigError) -> Self {
        CoreError::Config(err.to_string())
    }
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, CoreError>;
