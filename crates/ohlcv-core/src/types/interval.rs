//! 인터벌 달력.
//!
//! 인터벌 토큰을 캔들 길이(분)와 요청 한 번에 허용되는 최대 윈도우(일)로 변환합니다.
//! Kite API는 요청당 반환 캔들 수에 상한이 있으므로, 분봉처럼 촘촘한 인터벌일수록
//! 짧은 윈도우로 나눠 요청해야 합니다.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// 분봉 계열 인터벌의 요청당 최대 일수.
pub const INTRADAY_MAX_WINDOW_DAYS: i64 = 60;

/// 일봉 이상 인터벌의 요청당 최대 일수 (약 5년).
pub const DAILY_MAX_WINDOW_DAYS: i64 = 2000;

/// 요청 한 번에 받을 수 있는 최대 캔들 수 (참고값).
pub const MAX_CANDLES_PER_REQUEST: usize = 22_500;

/// 하루의 분 수. 이 값 이상이면 일봉 이상으로 취급합니다.
pub const MINUTES_PER_DAY: u32 = 1440;

/// 알 수 없는 인터벌 토큰에 대한 보수적 기본값 (1분).
pub const FALLBACK_MINUTES: u32 = 1;

/// 캔들 샘플링 인터벌.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    /// 1분봉
    #[serde(rename = "minute")]
    Minute,
    /// 3분봉
    #[serde(rename = "3minute")]
    Minute3,
    /// 5분봉
    #[serde(rename = "5minute")]
    Minute5,
    /// 10분봉
    #[serde(rename = "10minute")]
    Minute10,
    /// 15분봉
    #[serde(rename = "15minute")]
    Minute15,
    /// 30분봉
    #[serde(rename = "30minute")]
    Minute30,
    /// 60분봉
    #[serde(rename = "60minute")]
    Minute60,
    /// 일봉
    #[serde(rename = "day")]
    Day,
}

impl Interval {
    /// 설정에서 허용되는 전체 인터벌 목록.
    pub const ALL: [Interval; 8] = [
        Interval::Minute,
        Interval::Minute3,
        Interval::Minute5,
        Interval::Minute10,
        Interval::Minute15,
        Interval::Minute30,
        Interval::Minute60,
        Interval::Day,
    ];

    /// Kite API 경로에 들어가는 토큰.
    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::Minute => "minute",
            Interval::Minute3 => "3minute",
            Interval::Minute5 => "5minute",
            Interval::Minute10 => "10minute",
            Interval::Minute15 => "15minute",
            Interval::Minute30 => "30minute",
            Interval::Minute60 => "60minute",
            Interval::Day => "day",
        }
    }

    /// 캔들 하나가 차지하는 분 수.
    pub fn minutes(&self) -> u32 {
        match self {
            Interval::Minute => 1,
            Interval::Minute3 => 3,
            Interval::Minute5 => 5,
            Interval::Minute10 => 10,
            Interval::Minute15 => 15,
            Interval::Minute30 => 30,
            Interval::Minute60 => 60,
            Interval::Day => MINUTES_PER_DAY,
        }
    }

    /// 캔들 하나의 기간.
    pub fn candle_duration(&self) -> Duration {
        Duration::minutes(i64::from(self.minutes()))
    }

    /// 일봉 이상인지 확인.
    pub fn is_daily_or_larger(&self) -> bool {
        self.minutes() >= MINUTES_PER_DAY
    }

    /// 요청 한 번에 허용되는 최대 윈도우 (일).
    pub fn max_window_days(&self) -> i64 {
        window_days_for_minutes(self.minutes())
    }

    /// 쉼표로 구분된 허용 토큰 목록 (검증 메시지용).
    pub fn valid_tokens() -> String {
        Self::ALL
            .iter()
            .map(|i| i.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Interval {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|i| i.as_str() == s)
            .ok_or_else(|| CoreError::InvalidInterval(s.to_string()))
    }
}

fn window_days_for_minutes(minutes: u32) -> i64 {
    if minutes >= MINUTES_PER_DAY {
        DAILY_MAX_WINDOW_DAYS
    } else {
        INTRADAY_MAX_WINDOW_DAYS
    }
}

/// 원시 인터벌 토큰의 캔들 길이(분).
///
/// 알 수 없는 토큰은 에러 대신 1분으로 처리하고 경고만 남깁니다.
/// 설정 단계에서 [`Interval::from_str`]로 이미 걸러지므로 실행 경로에서는
/// 이 기본값에 도달하지 않습니다. `hour`는 `60minute`의 별칭입니다.
pub fn minutes_per_sample(token: &str) -> u32 {
    if token == "hour" {
        return 60;
    }
    match token.parse::<Interval>() {
        Ok(interval) => interval.minutes(),
        Err(_) => {
            tracing::warn!(
                interval = token,
                fallback_minutes = FALLBACK_MINUTES,
                "알 수 없는 인터벌, 1분으로 간주합니다"
            );
            FALLBACK_MINUTES
        }
    }
}

/// 원시 인터벌 토큰의 요청당 최대 윈도우 (일).
pub fn max_window_days(token: &str) -> i64 {
    window_days_for_minutes(minutes_per_sample(token))
}
