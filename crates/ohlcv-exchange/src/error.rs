//! 데이터 소스 에러 타입.

use thiserror::Error;

/// Kite API 호출과 rate limiter에서 발생하는 에러.
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// 네트워크/연결 에러
    #[error("Network error: {0}")]
    NetworkError(String),

    /// 요청 타임아웃
    #[error("Request timeout: {0}")]
    Timeout(String),

    /// 액세스 토큰 없음/만료 (TokenException)
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// 잘못된 토큰, 인터벌, 파라미터 (InputException)
    #[error("Input rejected: {0}")]
    InputRejected(String),

    /// 요청 한도 초과 (HTTP 429)
    #[error("Rate limit exceeded")]
    RateLimited,

    /// 기타 API 에러
    #[error("API error {status}: {message}")]
    ApiError { status: u16, message: String },

    /// 파싱/역직렬화 에러
    #[error("Parse error: {0}")]
    ParseError(String),

    /// 취소 신호로 대기가 중단됨
    #[error("Operation cancelled")]
    Cancelled,

    /// 캐시 파일 I/O 에러
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExchangeError {
    /// 재시도 가능한 에러인지 확인.
    pub fn is_retryable(&self) -> bool {
        match self {
            ExchangeError::NetworkError(_)
            | ExchangeError::Timeout(_)
            | ExchangeError::RateLimited => true,
            ExchangeError::ApiError { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// 인증 에러인지 확인.
    pub fn is_auth_error(&self) -> bool {
        matches!(self, ExchangeError::Unauthorized(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ExchangeError::Cancelled)
    }
}

impl From<reqwest::Error> for ExchangeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ExchangeError::Timeout(err.to_string())
        } else if err.is_decode() {
            ExchangeError::ParseError(err.to_string())
        } else {
            ExchangeError::NetworkError(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ExchangeError {
    fn from(err: serde_json::Error) -> Self {
        ExchangeError::ParseError(err.to_string())
    }
}

impl From<csv::Error> for ExchangeError {
    fn from(err: csv::Error) -> Self {
        ExchangeError::ParseError(err.to_string())
    }
}

/// Result 타입 별칭
pub type ExchangeResult<T> = Result<T, ExchangeError>;
