//! 실행 계획.

use std::time::Duration;

use chrono::NaiveDate;
use serde::Serialize;

use ohlcv_core::types::split_dates;
use ohlcv_core::{Chunk, Interval};
use ohlcv_exchange::InstrumentDirectory;

/// 토큰이 해석된 종목과 그 청크 목록.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannedInstrument {
    pub symbol: String,
    pub token: u32,
    pub chunks: Vec<Chunk>,
}

/// 종목 × 청크 요약. 만든 뒤에는 바뀌지 않으며, 입력이 바뀌면 다시 만듭니다.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FetchPlan {
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub interval: Interval,
    /// 요청 하나의 최대 윈도우 (일)
    pub window_days: i64,
    pub instruments: Vec<PlannedInstrument>,
    /// 디렉토리에 없는 심볼
    pub unresolved: Vec<String>,
}

impl FetchPlan {
    pub fn build(
        symbols: &[String],
        directory: &InstrumentDirectory,
        from: NaiveDate,
        to: NaiveDate,
        interval: Interval,
    ) -> Self {
        let chunks = split_dates(from, to, interval);
        let mut instruments = Vec::new();
        let mut unresolved = Vec::new();

        for symbol in symbols {
            match directory.resolve(symbol) {
                Some(token) => instruments.push(PlannedInstrument {
                    symbol: symbol.clone(),
                    token,
                    chunks: chunks.clone(),
                }),
                None => unresolved.push(symbol.clone()),
            }
        }

        Self {
            from,
            to,
            interval,
            window_days: interval.max_window_days(),
            instruments,
            unresolved,
        }
    }

    /// 해석된 종목이 없는지.
    pub fn is_empty(&self) -> bool {
        self.instruments.is_empty()
    }

    pub fn chunks_per_instrument(&self) -> usize {
        self.instruments.first().map_or(0, |i| i.chunks.len())
    }

    /// 총 API 호출 수 (청크당 한 번, 재시도 제외).
    pub fn total_calls(&self) -> usize {
        self.instruments.iter().map(|i| i.chunks.len()).sum()
    }

    /// 초당 `requests_per_second` 호출 기준 예상 소요 시간.
    pub fn estimated_duration(&self, requests_per_second: f64) -> Duration {
        if !(requests_per_second.is_finite() && requests_per_second > 0.0) {
            return Duration::ZERO;
        }
        Duration::try_from_secs_f64(self.total_calls() as f64 / requests_per_second)
            .unwrap_or(Duration::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn directory() -> InstrumentDirectory {
        InstrumentDirectory::from_pairs([("SBIN", 779521), ("INFY", 408065)])
    }

    #[test]
    fn test_plan_splits_resolved_and_unresolved() {
        let symbols = vec!["SBIN".to_string(), "NOPE".to_string(), "INFY".to_string()];
        let plan = FetchPlan::build(
            &symbols,
            &directory(),
            date("2024-01-01"),
            date("2024-04-01"),
            Interval::Minute,
        );

        let resolved: Vec<&str> = plan.instruments.iter().map(|i| i.symbol.as_str()).collect();
        assert_eq!(resolved, vec!["SBIN", "INFY"]);
        assert_eq!(plan.unresolved, vec!["NOPE".to_string()]);
        assert_eq!(plan.window_days, 60);
        assert_eq!(plan.chunks_per_instrument(), 2);
        assert_eq!(plan.total_calls(), 4);
    }

    #[test]
    fn test_daily_plan_is_one_call_per_instrument() {
        let symbols = vec!["SBIN".to_string()];
        let plan = FetchPlan::build(
            &symbols,
            &directory(),
            date("2024-01-01"),
            date("2024-01-05"),
            Interval::Day,
        );
        assert_eq!(plan.total_calls(), 1);
        assert_eq!(plan.instruments[0].token, 779521);
    }

    #[test]
    fn test_estimated_duration() {
        let symbols = vec!["SBIN".to_string(), "INFY".to_string()];
        let plan = FetchPlan::build(
            &symbols,
            &directory(),
            date("2023-01-01"),
            date("2024-01-01"),
            Interval::Minute,
        );
        // 365일 / 60일 윈도우 → 7 청크, 종목 2개
        assert_eq!(plan.total_calls(), 14);
        assert_eq!(plan.estimated_duration(3.0), Duration::from_secs_f64(14.0 / 3.0));
        assert_eq!(plan.estimated_duration(0.0), Duration::ZERO);
    }

    #[test]
    fn test_empty_plan() {
        let plan = FetchPlan::build(
            &["NOPE".to_string()],
            &directory(),
            date("2024-01-01"),
            date("2024-01-05"),
            Interval::Day,
        );
        assert!(plan.is_empty());
        assert_eq!(plan.chunks_per_instrument(), 0);
        assert_eq!(plan.total_calls(), 0);
    }
}
