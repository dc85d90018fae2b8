//! 저장소 백엔드 통합 테스트.

use chrono::{DateTime, FixedOffset};
use ohlcv_core::{Candle, StorageType};
use ohlcv_data::{DataError, SinkOptions, Storage, StorageSink};

fn ts(s: &str) -> DateTime<FixedOffset> {
    DateTime::parse_from_rfc3339(s).unwrap()
}

fn sample_candles() -> Vec<Candle> {
    vec![
        Candle::new(ts("2024-01-02T09:15:00+05:30"), 100.0, 101.5, 99.5, 101.0, 1200),
        Candle::new(ts("2024-01-02T09:16:00+05:30"), 101.0, 102.0, 100.25, 101.75, 800),
    ]
}

#[tokio::test]
async fn csv_header_written_once_across_appends() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("csv");
    let storage = Storage::open(StorageType::Csv, &base, SinkOptions::default())
        .await
        .unwrap();
    storage.init().await.unwrap();

    let candles = sample_candles();
    assert_eq!(storage.store_candles("SBIN", &candles[..1]).await.unwrap(), 1);
    assert_eq!(storage.store_candles("SBIN", &candles[1..]).await.unwrap(), 1);
    storage.close().await.unwrap();

    let content = std::fs::read_to_string(base.join("SBIN.csv")).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(
        lines,
        vec![
            "instrument,timestamp,open,high,low,close,volume",
            "SBIN,2024-01-02 09:15:00,100,101.5,99.5,101,1200",
            "SBIN,2024-01-02 09:16:00,101,102,100.25,101.75,800",
        ]
    );
}

#[tokio::test]
async fn csv_existing_file_keeps_rows() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("csv");
    std::fs::create_dir_all(&base).unwrap();
    std::fs::write(
        base.join("INFY.csv"),
        "instrument,timestamp,open,high,low,close,volume\nINFY,2024-01-01 09:15:00,1,1,1,1,1\n",
    )
    .unwrap();

    let storage = Storage::open(StorageType::Csv, &base, SinkOptions::default())
        .await
        .unwrap();
    storage.init().await.unwrap();
    storage.store_candles("INFY", &sample_candles()).await.unwrap();

    let content = std::fs::read_to_string(base.join("INFY.csv")).unwrap();
    assert_eq!(content.lines().count(), 4);
    assert_eq!(content.matches("instrument,timestamp").count(), 1);
}

#[tokio::test]
async fn csv_skips_malformed_record() {
    let dir = tempfile::tempdir().unwrap();
    let storage = Storage::open(StorageType::Csv, dir.path(), SinkOptions::default())
        .await
        .unwrap();
    storage.init().await.unwrap();

    let mut candles = sample_candles();
    candles[0].high = 10.0; // high < low

    assert_eq!(storage.store_candles("SBIN", &candles).await.unwrap(), 1);
}

#[tokio::test]
async fn json_merges_with_existing_array() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("json");
    let storage = Storage::open(StorageType::Json, &base, SinkOptions::default())
        .await
        .unwrap();
    storage.init().await.unwrap();

    let candles = sample_candles();
    storage.store_candles("SBIN", &candles[..1]).await.unwrap();
    storage.store_candles("SBIN", &candles[1..]).await.unwrap();

    let raw = std::fs::read_to_string(base.join("SBIN.json")).unwrap();
    let stored: Vec<Candle> = serde_json::from_str(&raw).unwrap();
    assert_eq!(stored, candles);
    assert!(raw.contains("\"date\""));
}

#[tokio::test]
async fn json_refuses_to_overwrite_corrupt_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("SBIN.json");
    std::fs::write(&path, "{not json").unwrap();

    let storage = Storage::open(StorageType::Json, dir.path(), SinkOptions::default())
        .await
        .unwrap();
    storage.init().await.unwrap();

    let err = storage
        .store_candles("SBIN", &sample_candles())
        .await
        .unwrap_err();
    assert!(matches!(err, DataError::SerializationError(_)));
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "{not json");
}

#[tokio::test]
async fn file_sinks_init_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    for kind in [StorageType::Csv, StorageType::Json] {
        let base = dir.path().join(kind.as_str());
        let storage = Storage::open(kind, &base, SinkOptions::default())
            .await
            .unwrap();
        storage.init().await.unwrap();
        storage.init().await.unwrap();
        assert!(base.is_dir());
        assert_eq!(storage.kind(), kind);
        assert_eq!(storage.location(), base.as_path());
    }
}

#[tokio::test]
async fn database_sinks_store_all_instruments_in_one_file() {
    let dir = tempfile::tempdir().unwrap();
    for (kind, file) in [
        (StorageType::DuckDb, "market.duckdb"),
        (StorageType::Sqlite, "market.sqlite"),
    ] {
        let path = dir.path().join(file);
        let storage = Storage::open(kind, &path, SinkOptions::default())
            .await
            .unwrap();
        storage.init().await.unwrap();

        assert_eq!(storage.store_candles("SBIN", &sample_candles()).await.unwrap(), 2);
        assert_eq!(storage.store_candles("INFY", &sample_candles()).await.unwrap(), 2);
        storage.close().await.unwrap();

        assert!(path.exists(), "{} file missing", kind);
    }
}

#[tokio::test]
async fn empty_batch_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let storage = Storage::open(StorageType::Csv, dir.path(), SinkOptions::default())
        .await
        .unwrap();
    storage.init().await.unwrap();

    assert_eq!(storage.store_candles("SBIN", &[]).await.unwrap(), 0);
    assert!(!dir.path().join("SBIN.csv").exists());
}
