//! CSV 저장소. 종목마다 `<SYMBOL>.csv` 파일 하나.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use csv::WriterBuilder;
use tracing::{info, instrument, warn};

use ohlcv_core::{Candle, StorageRecord, StorageType};

use super::{instrument_file, run_blocking, valid_candles, StorageSink};
use crate::error::Result;

/// 새 파일에만 기록하는 헤더.
pub const CSV_HEADER: [&str; 7] = [
    "instrument",
    "timestamp",
    "open",
    "high",
    "low",
    "close",
    "volume",
];

/// 기존 파일에 행을 덧붙이는 CSV 저장소.
#[derive(Debug)]
pub struct CsvSink {
    base_dir: PathBuf,
}

impl CsvSink {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
        }
    }

    /// 종목의 CSV 파일 경로.
    pub fn file_for(&self, symbol: &str) -> PathBuf {
        instrument_file(&self.base_dir, symbol, "csv")
    }
}

fn record_fields(record: &StorageRecord) -> [String; 7] {
    [
        record.instrument.clone(),
        record.timestamp_str(),
        record.open.to_string(),
        record.high.to_string(),
        record.low.to_string(),
        record.close.to_string(),
        record.volume.to_string(),
    ]
}

/// 한 행을 CSV 줄 하나로 인코딩합니다.
fn encode_row<I, T>(fields: I) -> Result<Vec<u8>>
where
    I: IntoIterator<Item = T>,
    T: AsRef<[u8]>,
{
    let mut line = WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    line.write_record(fields)?;
    Ok(line.into_inner().map_err(|e| e.into_error())?)
}

/// 행 단위로 `out`에 기록하고, 쓰기가 끝난 행만 셉니다.
///
/// 인코딩 실패 행은 건너뜁니다. 쓰기 실패 시 이미 기록된 행이 있으면
/// 그 수를 반환하고, 없으면 에러를 반환합니다.
fn write_rows<W: Write>(out: &mut W, is_new: bool, records: &[StorageRecord]) -> Result<usize> {
    if is_new {
        out.write_all(&encode_row(CSV_HEADER)?)?;
    }

    let mut written = 0;
    for record in records {
        let line = match encode_row(record_fields(record)) {
            Ok(line) => line,
            Err(e) => {
                warn!(
                    symbol = %record.instrument,
                    timestamp = %record.timestamp_str(),
                    error = %e,
                    "CSV 행 인코딩 실패, 건너뜀"
                );
                continue;
            }
        };
        if let Err(e) = out.write_all(&line) {
            if written == 0 {
                return Err(e.into());
            }
            warn!(
                symbol = %record.instrument,
                written,
                error = %e,
                "CSV 쓰기 실패, 남은 행 중단"
            );
            break;
        }
        written += 1;
    }
    out.flush()?;
    Ok(written)
}

fn append_records(path: &Path, records: &[StorageRecord]) -> Result<usize> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    let is_new = file.metadata()?.len() == 0;
    write_rows(&mut file, is_new, records)
}

#[async_trait]
impl StorageSink for CsvSink {
    fn kind(&self) -> StorageType {
        StorageType::Csv
    }

    fn location(&self) -> &Path {
        &self.base_dir
    }

    async fn init(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.base_dir).await?;
        info!(dir = %self.base_dir.display(), "CSV 디렉토리 준비 완료");
        Ok(())
    }

    #[instrument(skip(self, candles), fields(count = candles.len()))]
    async fn store_candles(&self, symbol: &str, candles: &[Candle]) -> Result<usize> {
        let records: Vec<StorageRecord> = valid_candles(symbol, candles)
            .into_iter()
            .map(|c| StorageRecord::from_candle(symbol, c))
            .collect();
        if records.is_empty() {
            return Ok(0);
        }

        let path = self.file_for(symbol);
        let target = path.clone();
        let written = run_blocking(move || append_records(&target, &records)).await?;

        info!(symbol, written, file = %path.display(), "CSV 저장");
        Ok(written)
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::io;

    /// 정해진 횟수의 쓰기만 받아들이는 출력.
    struct FailingAfter {
        accepted: Vec<u8>,
        writes_left: usize,
    }

    impl Write for FailingAfter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.writes_left == 0 {
                return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
            }
            self.writes_left -= 1;
            self.accepted.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn record(minute: u32) -> StorageRecord {
        StorageRecord {
            instrument: "SBIN".to_string(),
            timestamp: NaiveDate::from_ymd_opt(2024, 1, 2)
                .unwrap()
                .and_hms_opt(9, minute, 0)
                .unwrap(),
            open: 100.0,
            high: 101.0,
            low: 99.0,
            close: 100.5,
            volume: 10,
        }
    }

    #[test]
    fn test_count_matches_rows_written_before_failure() {
        let records = vec![record(15), record(16), record(17)];
        // 헤더 + 2행만 기록됨
        let mut out = FailingAfter {
            accepted: Vec::new(),
            writes_left: 3,
        };

        let written = write_rows(&mut out, true, &records).unwrap();

        assert_eq!(written, 2);
        let text = String::from_utf8(out.accepted).unwrap();
        assert_eq!(text.lines().count(), 3);
        assert!(text.starts_with("instrument,timestamp,"));
        assert!(text.ends_with("SBIN,2024-01-02 09:16:00,100,101,99,100.5,10\n"));
    }

    #[test]
    fn test_failure_before_any_row_is_error() {
        let mut out = FailingAfter {
            accepted: Vec::new(),
            writes_left: 0,
        };

        let err = write_rows(&mut out, false, &[record(15)]).unwrap_err();
        assert!(matches!(err, crate::error::DataError::Io(_)));
    }
}
