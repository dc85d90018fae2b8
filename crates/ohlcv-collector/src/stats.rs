//! 실행 보고서.

use serde::Serialize;
use std::time::Duration;

/// 종목 하나의 수집 결과.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InstrumentReport {
    pub symbol: String,
    pub token: u32,
    /// 계획된 청크 수
    pub chunks: usize,
    /// 캔들을 받아 저장한 청크
    pub ok_chunks: usize,
    /// 빈 결과 (거래일 없음)
    pub empty_chunks: usize,
    /// 조회 또는 저장에 실패한 청크
    pub failed_chunks: usize,
    /// 실제로 기록된 레코드 수
    pub inserted: usize,
}

impl InstrumentReport {
    pub fn new(symbol: impl Into<String>, token: u32, chunks: usize) -> Self {
        Self {
            symbol: symbol.into(),
            token,
            chunks,
            ..Default::default()
        }
    }
}

/// 실행 전체 보고서
#[derive(Debug, Clone, Default, Serialize)]
pub struct FetchReport {
    /// 처리한 종목 (순서 유지)
    pub instruments: Vec<InstrumentReport>,
    /// 토큰을 찾지 못해 건너뛴 심볼
    pub skipped: Vec<String>,
    /// 실제 API 호출 수 (재시도 포함)
    pub api_calls: u64,
    /// 취소 신호로 중단되었는지
    pub cancelled: bool,
    /// 소요 시간
    #[serde(skip)]
    pub elapsed: Duration,
}

impl FetchReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn processed(&self) -> usize {
        self.instruments.len()
    }

    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }

    pub fn total_inserted(&self) -> usize {
        self.instruments.iter().map(|i| i.inserted).sum()
    }

    pub fn failed_chunks(&self) -> usize {
        self.instruments.iter().map(|i| i.failed_chunks).sum()
    }

    pub fn empty_chunks(&self) -> usize {
        self.instruments.iter().map(|i| i.empty_chunks).sum()
    }

    /// 종목 심볼로 결과 조회.
    pub fn instrument(&self, symbol: &str) -> Option<&InstrumentReport> {
        self.instruments.iter().find(|i| i.symbol == symbol)
    }

    /// 통계 요약 로그 출력
    pub fn log_summary(&self, operation: &str) {
        for instrument in &self.instruments {
            tracing::info!(
                symbol = %instrument.symbol,
                chunks = instrument.chunks,
                ok = instrument.ok_chunks,
                empty = instrument.empty_chunks,
                failed = instrument.failed_chunks,
                inserted = instrument.inserted,
                "종목 결과"
            );
        }

        tracing::info!(
            operation = operation,
            processed = self.processed(),
            skipped = self.skipped_count(),
            skipped_symbols = ?self.skipped,
            failed_chunks = self.failed_chunks(),
            total_inserted = self.total_inserted(),
            api_calls = self.api_calls,
            cancelled = self.cancelled,
            elapsed = format!("{:.1}s", self.elapsed.as_secs_f64()),
            "수집 완료"
        );
    }
}
