//! 수집 오케스트레이터.
//!
//! 종목마다 청크를 순서대로 조회하고 저장합니다. 한 번에 하나의 흐름만
//! 실행되며 대기는 rate limiter에서만 발생합니다.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use indicatif::ProgressBar;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use ohlcv_core::{Interval, StorageType};
use ohlcv_data::{SinkOptions, Storage, StorageSink};
use ohlcv_exchange::{
    fetch_chunk_with_retry, ExchangeError, FetchContext, HistoricalDataSource, RetryPolicy,
};

use crate::error::{CollectorError, Result};
use crate::plan::{FetchPlan, PlannedInstrument};
use crate::stats::{FetchReport, InstrumentReport};

/// 실행 단계 (로그 필드).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPhase {
    Idle,
    InstrumentResolved,
    Chunked,
    PerChunkFetch,
    PerChunkStore,
    InstrumentDone,
    RunComplete,
}

impl FetchPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchPhase::Idle => "idle",
            FetchPhase::InstrumentResolved => "instrument_resolved",
            FetchPhase::Chunked => "chunked",
            FetchPhase::PerChunkFetch => "chunk_fetch",
            FetchPhase::PerChunkStore => "chunk_store",
            FetchPhase::InstrumentDone => "instrument_done",
            FetchPhase::RunComplete => "run_complete",
        }
    }
}

impl fmt::Display for FetchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

enum Flow {
    Continue,
    Cancelled,
}

/// 저장소를 열고 초기화합니다.
///
/// 네트워크 작업 전에 호출해 잘못된 저장 경로를 먼저 보고합니다.
/// 초기화에 실패하면 저장소를 닫은 뒤 에러를 반환합니다.
pub async fn open_storage(
    kind: StorageType,
    path: &Path,
    options: SinkOptions,
) -> Result<Storage> {
    let storage = Storage::open(kind, path, options).await?;
    if let Err(e) = storage.init().await {
        error!(error = %e, location = %path.display(), "저장소 초기화 실패");
        if let Err(close_err) = storage.close().await {
            warn!(error = %close_err, "초기화 실패 후 저장소 종료 실패");
        }
        return Err(e.into());
    }
    Ok(storage)
}

/// 데이터 소스 하나와 저장소 하나로 실행 계획을 수행합니다.
pub struct FetchOrchestrator {
    ctx: FetchContext,
    source: Arc<dyn HistoricalDataSource>,
    sink: Arc<dyn StorageSink>,
    retry: RetryPolicy,
    progress: Option<ProgressBar>,
}

impl FetchOrchestrator {
    pub fn new(
        ctx: FetchContext,
        source: Arc<dyn HistoricalDataSource>,
        sink: Arc<dyn StorageSink>,
    ) -> Self {
        Self {
            ctx,
            source,
            sink,
            retry: RetryPolicy::none(),
            progress: None,
        }
    }

    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// 청크마다 한 칸씩 진행하는 진행률 표시줄.
    pub fn with_progress(mut self, bar: ProgressBar) -> Self {
        self.progress = Some(bar);
        self
    }

    /// 계획을 실행하고 보고서를 반환합니다.
    ///
    /// 해석된 종목이 없거나 저장소 초기화에 실패하면 청크 작업 전에 실패합니다.
    /// 청크 단위 에러는 인증 에러를 포함해 보고서에만 집계됩니다.
    /// 저장소는 결과와 관계없이 닫힙니다.
    #[instrument(
        skip_all,
        fields(source = %self.source.name(), storage = %self.sink.kind(), interval = %plan.interval)
    )]
    pub async fn run(&self, plan: &FetchPlan) -> Result<FetchReport> {
        let started = Instant::now();
        debug!(phase = %FetchPhase::Idle, instruments = plan.instruments.len(), "실행 시작");

        for symbol in &plan.unresolved {
            warn!(symbol = %symbol, "종목 토큰을 찾을 수 없어 건너뜀");
        }
        if plan.is_empty() {
            return Err(CollectorError::NoValidInstruments(plan.unresolved.clone()));
        }

        if let Err(e) = self.sink.init().await {
            error!(error = %e, location = %self.sink.location().display(), "저장소 초기화 실패");
            if let Err(close_err) = self.sink.close().await {
                warn!(error = %close_err, "초기화 실패 후 저장소 종료 실패");
            }
            return Err(e.into());
        }

        let calls_before = self.ctx.limiter.acquired();
        let mut report = FetchReport::new();
        report.skipped = plan.unresolved.clone();

        self.fetch_all(plan, &mut report).await;

        report.api_calls = self.ctx.limiter.acquired().saturating_sub(calls_before);
        report.elapsed = started.elapsed();
        if let Some(bar) = &self.progress {
            bar.finish_and_clear();
        }

        if let Err(e) = self.sink.close().await {
            error!(error = %e, location = %self.sink.location().display(), "저장소 종료 실패");
            return Err(e.into());
        }

        debug!(phase = %FetchPhase::RunComplete, "실행 완료");
        Ok(report)
    }

    async fn fetch_all(&self, plan: &FetchPlan, report: &mut FetchReport) {
        for planned in &plan.instruments {
            if self.ctx.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let mut instrument =
                InstrumentReport::new(&planned.symbol, planned.token, planned.chunks.len());
            let flow = self
                .fetch_instrument(planned, plan.interval, &mut instrument)
                .await;
            report.instruments.push(instrument);

            match flow {
                Flow::Continue => {}
                Flow::Cancelled => {
                    warn!(symbol = %planned.symbol, "취소 신호 수신, 수집 중단");
                    report.cancelled = true;
                    break;
                }
            }
        }
    }

    async fn fetch_instrument(
        &self,
        planned: &PlannedInstrument,
        interval: Interval,
        instrument: &mut InstrumentReport,
    ) -> Flow {
        let symbol = planned.symbol.as_str();
        debug!(
            phase = %FetchPhase::InstrumentResolved,
            symbol,
            token = planned.token,
            "종목 해석"
        );
        debug!(phase = %FetchPhase::Chunked, symbol, chunks = planned.chunks.len(), "청크 분할");

        for chunk in &planned.chunks {
            if self.ctx.is_cancelled() {
                return Flow::Cancelled;
            }

            debug!(phase = %FetchPhase::PerChunkFetch, symbol, chunk = %chunk, "청크 조회");
            let fetched = fetch_chunk_with_retry(
                &self.ctx,
                self.source.as_ref(),
                &self.retry,
                planned.token,
                interval,
                chunk,
            )
            .await;

            match fetched {
                Ok(candles) if candles.is_empty() => {
                    instrument.empty_chunks += 1;
                    debug!(symbol, chunk = %chunk, "데이터 없음");
                }
                Ok(candles) => {
                    debug!(
                        phase = %FetchPhase::PerChunkStore,
                        symbol,
                        candles = candles.len(),
                        "청크 저장 시작"
                    );
                    match self.sink.store_candles(symbol, &candles).await {
                        Ok(inserted) => {
                            instrument.ok_chunks += 1;
                            instrument.inserted += inserted;
                            info!(
                                symbol,
                                chunk = %chunk,
                                fetched = candles.len(),
                                inserted,
                                "청크 저장"
                            );
                        }
                        Err(e) => {
                            instrument.failed_chunks += 1;
                            error!(symbol, chunk = %chunk, error = %e, "청크 저장 실패, 건너뜀");
                        }
                    }
                }
                Err(ExchangeError::Cancelled) => return Flow::Cancelled,
                Err(e) => {
                    instrument.failed_chunks += 1;
                    warn!(symbol, chunk = %chunk, error = %e, "청크 조회 실패, 건너뜀");
                }
            }

            if let Some(bar) = &self.progress {
                bar.inc(1);
            }
        }

        debug!(phase = %FetchPhase::InstrumentDone, symbol, "종목 처리 종료");
        info!(
            symbol,
            inserted = instrument.inserted,
            failed_chunks = instrument.failed_chunks,
            "종목 완료"
        );
        Flow::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_display() {
        assert_eq!(FetchPhase::PerChunkFetch.to_string(), "chunk_fetch");
        assert_eq!(FetchPhase::RunComplete.to_string(), "run_complete");
    }
}
