//! DuckDB 저장소.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use duckdb::{params, Connection};
use tracing::{info, instrument, warn};

use ohlcv_core::{Candle, StorageRecord, StorageType};

use super::{run_blocking, valid_candles, SinkOptions, StorageSink};
use crate::error::{DataError, Result};

const CREATE_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS ohlcv (
        instrument VARCHAR,
        open DOUBLE,
        high DOUBLE,
        low DOUBLE,
        close DOUBLE,
        timestamp TIMESTAMP,
        volume BIGINT
    );";

const CREATE_UNIQUE_INDEX: &str =
    "CREATE UNIQUE INDEX IF NOT EXISTS ohlcv_instrument_timestamp ON ohlcv (instrument, timestamp);";

const INSERT: &str = "INSERT INTO ohlcv (instrument, open, high, low, close, timestamp, volume) VALUES (?, ?, ?, ?, ?, ?, ?)";

const EXISTS: &str = "SELECT COUNT(*) FROM ohlcv WHERE instrument = ? AND timestamp = ?";

type SharedConnection = Arc<Mutex<Option<Connection>>>;

/// DuckDB 파일 하나에 모든 종목을 `ohlcv` 테이블로 저장합니다.
#[derive(Debug)]
pub struct DuckDbSink {
    path: PathBuf,
    options: SinkOptions,
    conn: SharedConnection,
}

impl DuckDbSink {
    /// DB 파일을 엽니다 (없으면 생성).
    pub fn open(path: impl AsRef<Path>, options: SinkOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(&path)
            .map_err(|e| DataError::ConnectionError(format!("duckdb 연결 실패: {}", e)))?;

        Ok(Self {
            path,
            options,
            conn: Arc::new(Mutex::new(Some(conn))),
        })
    }
}

fn with_connection<T>(
    shared: &SharedConnection,
    task: impl FnOnce(&mut Connection) -> Result<T>,
) -> Result<T> {
    let mut guard = shared
        .lock()
        .map_err(|_| DataError::ConnectionError("duckdb connection lock poisoned".into()))?;
    let conn = guard
        .as_mut()
        .ok_or_else(|| DataError::ConnectionError("duckdb connection is closed".into()))?;
    task(conn)
}

/// 행 하나를 삽입합니다. dedupe 모드에서는 같은 (instrument, timestamp)가 있으면 0을 반환합니다.
fn insert_row(conn: &Connection, record: &StorageRecord, dedupe: bool) -> duckdb::Result<usize> {
    if dedupe {
        let mut exists = conn.prepare_cached(EXISTS)?;
        let count: i64 =
            exists.query_row(params![record.instrument, record.timestamp], |row| row.get(0))?;
        if count > 0 {
            return Ok(0);
        }
    }

    let mut stmt = conn.prepare_cached(INSERT)?;
    stmt.execute(params![
        record.instrument,
        record.open,
        record.high,
        record.low,
        record.close,
        record.timestamp,
        record.volume
    ])
}

/// 한 트랜잭션으로 일괄 삽입합니다.
///
/// DuckDB는 문 하나가 실패하면 트랜잭션 전체를 중단 상태로 만듭니다.
/// 이 경우 롤백한 뒤 행 단위 autocommit으로 다시 넣어 실패한 행만 건너뜁니다.
fn insert_records(conn: &mut Connection, records: &[StorageRecord], dedupe: bool) -> Result<usize> {
    let failure = {
        let tx = conn.transaction()?;
        let mut inserted = 0;
        let mut failure = None;
        for record in records {
            match insert_row(&tx, record, dedupe) {
                Ok(n) => inserted += n,
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
        match failure {
            None => {
                tx.commit()?;
                return Ok(inserted);
            }
            Some(e) => {
                tx.rollback()?;
                e
            }
        }
    };

    warn!(error = %failure, "일괄 삽입 실패, 행 단위로 재시도합니다");

    let mut inserted = 0;
    for record in records {
        match insert_row(conn, record, dedupe) {
            Ok(n) => inserted += n,
            Err(e) => warn!(
                symbol = %record.instrument,
                timestamp = %record.timestamp_str(),
                error = %e,
                "insert 실패, 건너뜀"
            ),
        }
    }
    Ok(inserted)
}

#[async_trait]
impl StorageSink for DuckDbSink {
    fn kind(&self) -> StorageType {
        StorageType::DuckDb
    }

    fn location(&self) -> &Path {
        &self.path
    }

    async fn init(&self) -> Result<()> {
        let conn = Arc::clone(&self.conn);
        let dedupe = self.options.dedupe;
        run_blocking(move || {
            with_connection(&conn, |conn| {
                conn.execute_batch(CREATE_TABLE)?;
                if dedupe {
                    conn.execute_batch(CREATE_UNIQUE_INDEX)?;
                }
                Ok(())
            })
        })
        .await?;

        info!(path = %self.path.display(), "DuckDB 'ohlcv' 테이블 준비 완료");
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

        let conn = Arc::clone(&self.conn);
        let dedupe = self.options.dedupe;
        let inserted = run_blocking(move || {
            with_connection(&conn, |conn| insert_records(conn, &records, dedupe))
        })
        .await?;

        info!(symbol, inserted, "DuckDB 저장");
        Ok(inserted)
    }

    async fn close(&self) -> Result<()> {
        let conn = Arc::clone(&self.conn);
        run_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| DataError::ConnectionError("duckdb connection lock poisoned".into()))?;
            if let Some(conn) = guard.take() {
                conn.close().map_err(|(_, e)| DataError::from(e))?;
            }
            Ok(())
        })
        .await
    }
}
