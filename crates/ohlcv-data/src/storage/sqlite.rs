//! SQLite 저장소.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::{debug, info, instrument, warn};

use ohlcv_core::{Candle, StorageRecord, StorageType};

use super::{valid_candles, SinkOptions, StorageSink};
use crate::error::{DataError, Result};

const CREATE_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS ohlcv (
        instrument TEXT,
        open REAL,
        high REAL,
        low REAL,
        close REAL,
        timestamp TEXT,
        volume INTEGER
    )
"#;

const CREATE_UNIQUE_INDEX: &str =
    "CREATE UNIQUE INDEX IF NOT EXISTS ohlcv_instrument_timestamp ON ohlcv (instrument, timestamp)";

const INSERT: &str = "INSERT INTO ohlcv (instrument, open, high, low, close, timestamp, volume) VALUES (?, ?, ?, ?, ?, ?, ?)";

const INSERT_OR_IGNORE: &str = "INSERT OR IGNORE INTO ohlcv (instrument, open, high, low, close, timestamp, volume) VALUES (?, ?, ?, ?, ?, ?, ?)";

/// SQLite 파일 하나에 모든 종목을 `ohlcv` 테이블로 저장합니다.
///
/// 타임스탬프는 `YYYY-MM-DD HH:MM:SS` 텍스트로 기록합니다.
#[derive(Debug)]
pub struct SqliteSink {
    path: PathBuf,
    options: SinkOptions,
    pool: SqlitePool,
}

impl SqliteSink {
    /// DB 파일에 연결합니다 (없으면 생성).
    pub async fn connect(path: impl AsRef<Path>, options: SinkOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let connect_options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(connect_options)
            .await
            .map_err(|e| DataError::ConnectionError(format!("sqlite 연결 실패: {}", e)))?;

        debug!(path = %path.display(), "SQLite 연결");
        Ok(Self {
            path,
            options,
            pool,
        })
    }

    /// 커넥션 풀 참조.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn insert_sql(&self) -> &'static str {
        if self.options.dedupe {
            INSERT_OR_IGNORE
        } else {
            INSERT
        }
    }
}

#[async_trait]
impl StorageSink for SqliteSink {
    fn kind(&self) -> StorageType {
        StorageType::Sqlite
    }

    fn location(&self) -> &Path {
        &self.path
    }

    async fn init(&self) -> Result<()> {
        sqlx::query(CREATE_TABLE).execute(&self.pool).await?;
        if self.options.dedupe {
            sqlx::query(CREATE_UNIQUE_INDEX).execute(&self.pool).await?;
        }
        info!(path = %self.path.display(), "SQLite 'ohlcv' 테이블 준비 완료");
        Ok(())
    }

    #[instrument(skip(self, candles), fields(count = candles.len()))]
    async fn store_candles(&self, symbol: &str, candles: &[Candle]) -> Result<usize> {
        let candles = valid_candles(symbol, candles);
        if candles.is_empty() {
            return Ok(0);
        }

        let sql = self.insert_sql();
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0usize;

        for candle in candles {
            let record = StorageRecord::from_candle(symbol, candle);
            let result = sqlx::query(sql)
                .bind(&record.instrument)
                .bind(record.open)
                .bind(record.high)
                .bind(record.low)
                .bind(record.close)
                .bind(record.timestamp_str())
                .bind(record.volume)
                .execute(&mut *tx)
                .await;

            match result {
                Ok(done) => inserted += done.rows_affected() as usize,
                Err(e) => warn!(
                    symbol,
                    timestamp = %record.timestamp_str(),
                    error = %e,
                    "insert 실패, 건너뜀"
                ),
            }
        }

        tx.commit().await?;
        info!(symbol, inserted, "SQLite 저장");
        Ok(inserted)
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;

    fn candle(minute: u32, close: f64) -> Candle {
        let ts = DateTime::parse_from_rfc3339(&format!("2024-01-02T09:{:02}:00+05:30", minute))
            .unwrap();
        Candle::new(ts, close, close + 1.0, close - 1.0, close, 100)
    }

    async fn count_rows(sink: &SqliteSink) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM ohlcv")
            .fetch_one(sink.pool())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_init_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let sink = SqliteSink::connect(dir.path().join("market.sqlite"), SinkOptions::default())
            .await
            .unwrap();

        sink.init().await.unwrap();
        sink.init().await.unwrap();

        assert_eq!(count_rows(&sink).await, 0);
    }

    #[tokio::test]
    async fn test_store_writes_local_timestamp_text() {
        let dir = tempfile::tempdir().unwrap();
        let sink = SqliteSink::connect(dir.path().join("market.sqlite"), SinkOptions::default())
            .await
            .unwrap();
        sink.init().await.unwrap();

        let inserted = sink
            .store_candles("SBIN", &[candle(15, 100.5), candle(16, 101.0)])
            .await
            .unwrap();
        assert_eq!(inserted, 2);

        let (instrument, timestamp, close): (String, String, f64) = sqlx::query_as(
            "SELECT instrument, timestamp, close FROM ohlcv ORDER BY timestamp LIMIT 1",
        )
        .fetch_one(sink.pool())
        .await
        .unwrap();
        assert_eq!(instrument, "SBIN");
        assert_eq!(timestamp, "2024-01-02 09:15:00");
        assert_eq!(close, 100.5);
    }

    #[tokio::test]
    async fn test_store_skips_malformed_record() {
        let dir = tempfile::tempdir().unwrap();
        let sink = SqliteSink::connect(dir.path().join("market.sqlite"), SinkOptions::default())
            .await
            .unwrap();
        sink.init().await.unwrap();

        let mut candles = vec![candle(15, 100.0), candle(16, 101.0), candle(17, 102.0)];
        candles[2].high = f64::NAN;

        assert_eq!(sink.store_candles("SBIN", &candles).await.unwrap(), 2);
        assert_eq!(count_rows(&sink).await, 2);
    }

    #[tokio::test]
    async fn test_dedupe_ignores_existing_rows() {
        let dir = tempfile::tempdir().unwrap();
        let sink = SqliteSink::connect(
            dir.path().join("market.sqlite"),
            SinkOptions { dedupe: true },
        )
        .await
        .unwrap();
        sink.init().await.unwrap();

        let candles = vec![candle(15, 100.0), candle(16, 101.0)];
        assert_eq!(sink.store_candles("SBIN", &candles).await.unwrap(), 2);
        assert_eq!(sink.store_candles("SBIN", &candles).await.unwrap(), 0);
        assert_eq!(count_rows(&sink).await, 2);
    }

    #[tokio::test]
    async fn test_duplicates_kept_without_dedupe() {
        let dir = tempfile::tempdir().unwrap();
        let sink = SqliteSink::connect(dir.path().join("market.sqlite"), SinkOptions::default())
            .await
            .unwrap();
        sink.init().await.unwrap();

        let candles = vec![candle(15, 100.0)];
        sink.store_candles("SBIN", &candles).await.unwrap();
        sink.store_candles("SBIN", &candles).await.unwrap();

        assert_eq!(count_rows(&sink).await, 2);
    }
}
