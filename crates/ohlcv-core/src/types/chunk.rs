//! 날짜 범위 청크 분할.
//!
//! 임의의 날짜 범위를 인터벌별 최대 윈도우 이하의 연속 구간으로 나눕니다.
//! 청크 `i`의 끝에 1초를 더한 값이 청크 `i+1`의 시작이며, 마지막 청크는
//! 정확히 `to`에서 끝납니다.

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::Interval;

/// 청크 경계 표기 형식 (Kite API `from`/`to` 파라미터와 동일).
pub const CHUNK_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// 요청 윈도우 하나. 양 끝을 포함합니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Chunk {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl Chunk {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self { start, end }
    }

    /// 청크 길이.
    pub fn span(&self) -> Duration {
        self.end - self.start
    }
}

impl fmt::Display for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ~ {}",
            self.start.format(CHUNK_TIME_FORMAT),
            self.end.format(CHUNK_TIME_FORMAT)
        )
    }
}

/// 다음 청크로 넘어갈 때 더하는 시간 단위.
pub fn chunk_step() -> Duration {
    Duration::seconds(1)
}

/// `[from, to]` 범위를 인터벌의 최대 윈도우 이하 청크로 분할합니다.
///
/// 순수 함수입니다. `from >= to`이면 빈 목록을 반환하므로
/// 호출 측에서 범위를 먼저 검증해야 합니다.
pub fn split(from: NaiveDateTime, to: NaiveDateTime, interval: Interval) -> Vec<Chunk> {
    let window = Duration::days(interval.max_window_days());
    let mut chunks = Vec::new();
    let mut current = from;

    while current < to {
        let end = (current + window).min(to);
        chunks.push(Chunk::new(current, end));
        current = end + chunk_step();
    }

    chunks
}

/// 달력 날짜 범위를 자정 기준으로 분할합니다.
pub fn split_dates(from: NaiveDate, to: NaiveDate, interval: Interval) -> Vec<Chunk> {
    split(
        from.and_time(NaiveTime::MIN),
        to.and_time(NaiveTime::MIN),
        interval,
    )
}
