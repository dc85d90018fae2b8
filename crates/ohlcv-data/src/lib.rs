//! 캔들 저장소.
//!
//! 하나의 [`StorageSink`] 계약(Init / StoreCandles / Close)을 공유하는
//! 네 가지 백엔드를 제공합니다:
//! - DuckDB: 분석용 임베디드 DB (`ohlcv` 테이블)
//! - SQLite: 관계형 임베디드 DB (`ohlcv` 테이블)
//! - CSV: 종목별 `<symbol>.csv`, 헤더는 파일 생성 시 한 번
//! - JSON: 종목별 `<symbol>.json`, 기존 배열과 병합 후 재작성

pub mod error;
pub mod storage;

pub use error::{DataError, Result};
pub use storage::{
    CsvSink, DuckDbSink, JsonSink, SinkOptions, SqliteSink, Storage, StorageSink,
};
