//! Kite 과거 시세 수집 파이프라인.
//!
//! 이 crate는 수집 실행을 담당합니다:
//! - 실행 계획 (종목 해석, 청크 분할, 호출 수/소요 시간 추정)
//! - 오케스트레이터 (rate limit이 적용된 청크 조회 → 저장)
//! - 실행 보고서
//! - 콘솔 출력 (계획 요약, 확인 프롬프트, 진행률)

pub mod console;
pub mod error;
pub mod orchestrator;
pub mod plan;
pub mod stats;

pub use error::{CollectorError, Result};
pub use orchestrator::{open_storage, FetchOrchestrator, FetchPhase};
pub use plan::{FetchPlan, PlannedInstrument};
pub use stats::{FetchReport, InstrumentReport};
