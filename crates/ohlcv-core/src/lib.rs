//! Kite 과거 시세 수집기의 핵심 도메인 모델.
//!
//! 이 크레이트는 다른 모든 크레이트가 공유하는 기본 타입을 제공합니다:
//! - 캔들, 저장 레코드, 청크 타입
//! - 인터벌 달력 (캔들 길이, 요청 윈도우 한도)
//! - 날짜 범위 청크 분할기
//! - 애플리케이션 설정과 검증
//! - 로깅 초기화

pub mod config;
pub mod error;
pub mod logging;
pub mod types;

pub use config::{
    AppConfig, FetchSettings, RateLimitSettings, RunParameters, StorageType, ValidationIssue,
    ValidationReport,
};
pub use error::{CoreError, Result};
pub use types::*;
