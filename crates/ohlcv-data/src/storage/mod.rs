//! 저장소 계약과 백엔드 선택.

mod csv;
mod duckdb;
mod json;
mod sqlite;

pub use self::csv::CsvSink;
pub use self::duckdb::DuckDbSink;
pub use self::json::JsonSink;
pub use self::sqlite::SqliteSink;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{info, warn};

use ohlcv_core::{Candle, StorageType};

use crate::error::Result;

/// DB 저장소의 테이블 이름.
pub const OHLCV_TABLE: &str = "ohlcv";

/// 캔들 저장소 계약.
///
/// 하나의 실행에서 하나의 인스턴스를 순차적으로 공유합니다.
#[async_trait]
pub trait StorageSink: Send + Sync {
    fn kind(&self) -> StorageType;

    /// 저장 위치 (로그/요약용).
    fn location(&self) -> &Path;

    /// 테이블 또는 디렉토리를 준비합니다. 여러 번 호출해도 안전합니다.
    async fn init(&self) -> Result<()>;

    /// 캔들을 추가하고 실제로 기록된 행 수를 반환합니다.
    ///
    /// 잘못된 레코드 하나 때문에 배치 전체가 실패하지 않습니다.
    /// 행 단위 에러는 로그를 남기고 건너뜁니다.
    async fn store_candles(&self, symbol: &str, candles: &[Candle]) -> Result<usize>;

    /// 리소스를 해제합니다.
    async fn close(&self) -> Result<()>;
}

/// 백엔드 공통 옵션.
#[derive(Debug, Clone, Copy, Default)]
pub struct SinkOptions {
    /// DB 저장소에서 (instrument, timestamp) 중복 행 무시
    pub dedupe: bool,
}

/// 설정 시점에 선택되는 저장소 백엔드.
#[derive(Debug)]
pub enum Storage {
    DuckDb(DuckDbSink),
    Sqlite(SqliteSink),
    Json(JsonSink),
    Csv(CsvSink),
}

impl Storage {
    /// 저장소 종류에 맞는 백엔드를 엽니다. 스키마 준비는 [`StorageSink::init`]에서 합니다.
    pub async fn open(
        kind: StorageType,
        path: impl AsRef<Path>,
        options: SinkOptions,
    ) -> Result<Self> {
        let path = path.as_ref();
        let storage = match kind {
            StorageType::DuckDb => Storage::DuckDb(DuckDbSink::open(path, options)?),
            StorageType::Sqlite => Storage::Sqlite(SqliteSink::connect(path, options).await?),
            StorageType::Json => Storage::Json(JsonSink::new(path)),
            StorageType::Csv => Storage::Csv(CsvSink::new(path)),
        };
        if options.dedupe && kind.is_file_based() {
            warn!(storage = %kind, "dedupe는 DB 저장소에서만 적용됩니다");
        }
        info!(storage = %kind, path = %path.display(), "저장소 열기");
        Ok(storage)
    }

    fn inner(&self) -> &dyn StorageSink {
        match self {
            Storage::DuckDb(sink) => sink,
            Storage::Sqlite(sink) => sink,
            Storage::Json(sink) => sink,
            Storage::Csv(sink) => sink,
        }
    }
}

#[async_trait]
impl StorageSink for Storage {
    fn kind(&self) -> StorageType {
        self.inner().kind()
    }

    fn location(&self) -> &Path {
        self.inner().location()
    }

    async fn init(&self) -> Result<()> {
        self.inner().init().await
    }

    async fn store_candles(&self, symbol: &str, candles: &[Candle]) -> Result<usize> {
        self.inner().store_candles(symbol, candles).await
    }

    async fn close(&self) -> Result<()> {
        self.inner().close().await
    }
}

/// 종목 심볼로 파일 경로를 만듭니다. 경로 구분자는 `_`로 바꿉니다.
pub(crate) fn instrument_file(base: &Path, symbol: &str, extension: &str) -> PathBuf {
    let stem: String = symbol
        .chars()
        .map(|c| if matches!(c, '/' | '\\') { '_' } else { c })
        .collect();
    base.join(format!("{}.{}", stem, extension))
}

/// 저장 전 검증을 통과한 캔들만 남깁니다. 걸러진 캔들은 경고로 남깁니다.
pub(crate) fn valid_candles<'a>(symbol: &str, candles: &'a [Candle]) -> Vec<&'a Candle> {
    candles
        .iter()
        .filter(|candle| match candle.validate() {
            Ok(()) => true,
            Err(e) => {
                warn!(symbol, error = %e, "잘못된 캔들, 건너뜀");
                false
            }
        })
        .collect()
}

/// 동기 I/O를 블로킹 스레드에서 실행합니다.
pub(crate) async fn run_blocking<T, F>(task: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task).await?
}
