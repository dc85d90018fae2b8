//! 캔들과 저장 레코드.

use chrono::{DateTime, FixedOffset, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// 저장 레코드의 타임스탬프 표기 형식.
pub const RECORD_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// OHLCV 캔들 하나.
///
/// 타임스탬프는 거래소가 보낸 오프셋(IST `+05:30`)을 그대로 보존합니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// 캔들 시작 시각
    #[serde(rename = "date")]
    pub timestamp: DateTime<FixedOffset>,
    /// 시가
    pub open: f64,
    /// 고가
    pub high: f64,
    /// 저가
    pub low: f64,
    /// 종가
    pub close: f64,
    /// 거래량
    pub volume: i64,
}

impl Candle {
    pub fn new(
        timestamp: DateTime<FixedOffset>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: i64,
    ) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// 거래소 현지 시각 (오프셋 제거).
    pub fn local_time(&self) -> NaiveDateTime {
        self.timestamp.naive_local()
    }

    /// 저장 가능한 캔들인지 검사합니다.
    ///
    /// 유한하지 않은 가격, 음수 거래량, 고가 < 저가를 거부합니다.
    pub fn validate(&self) -> Result<()> {
        let prices = [
            ("open", self.open),
            ("high", self.high),
            ("low", self.low),
            ("close", self.close),
        ];
        if let Some((field, value)) = prices.iter().find(|(_, v)| !v.is_finite()) {
            return Err(CoreError::MalformedCandle(format!(
                "{} at {} is not finite ({})",
                field, self.timestamp, value
            )));
        }
        if self.volume < 0 {
            return Err(CoreError::MalformedCandle(format!(
                "negative volume {} at {}",
                self.volume, self.timestamp
            )));
        }
        if self.high < self.low {
            return Err(CoreError::MalformedCandle(format!(
                "high {} below low {} at {}",
                self.high, self.low, self.timestamp
            )));
        }
        Ok(())
    }
}

/// 종목 심볼이 붙은 캔들. 저장소에 기록되는 단위이며 추가만 됩니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageRecord {
    pub instrument: String,
    pub timestamp: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
}

impl StorageRecord {
    pub fn from_candle(instrument: &str, candle: &Candle) -> Self {
        Self {
            instrument: instrument.to_string(),
            timestamp: candle.local_time(),
            open: candle.open,
            high: candle.high,
            low: candle.low,
            close: candle.close,
            volume: candle.volume,
        }
    }

    /// `YYYY-MM-DD HH:MM:SS` 형식의 타임스탬프.
    pub fn timestamp_str(&self) -> String {
        self.timestamp.format(RECORD_TIME_FORMAT).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(open: f64, high: f64, low: f64, close: f64, volume: i64) -> Candle {
        let ts = DateTime::parse_from_rfc3339("2024-01-02T09:15:00+05:30").unwrap();
        Candle::new(ts, open, high, low, close, volume)
    }

    #[test]
    fn test_validate_accepts_normal_candle() {
        assert!(candle(100.0, 101.5, 99.0, 100.5, 1200).validate().is_ok());
        // 거래 없는 캔들
        assert!(candle(100.0, 100.0, 100.0, 100.0, 0).validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_malformed() {
        assert!(candle(f64::NAN, 101.0, 99.0, 100.0, 10).validate().is_err());
        assert!(candle(100.0, f64::INFINITY, 99.0, 100.0, 10).validate().is_err());
        assert!(candle(100.0, 101.0, 99.0, 100.0, -1).validate().is_err());
        assert!(candle(100.0, 98.0, 99.0, 100.0, 10).validate().is_err());
    }

    #[test]
    fn test_storage_record_keeps_exchange_local_time() {
        let record = StorageRecord::from_candle("SBIN", &candle(1.0, 2.0, 0.5, 1.5, 7));

        assert_eq!(record.instrument, "SBIN");
        assert_eq!(record.timestamp_str(), "2024-01-02 09:15:00");
        assert_eq!(record.volume, 7);
    }

    #[test]
    fn test_candle_json_uses_date_field() {
        let json = serde_json::to_value(candle(1.0, 2.0, 0.5, 1.5, 7)).unwrap();
        assert_eq!(json["date"], "2024-01-02T09:15:00+05:30");
        assert_eq!(json["volume"], 7);
    }
}
