//! 종목 심볼 → 토큰 디렉토리.
//!
//! 캐시 파일이 있으면 캐시를, 없으면 API에서 전체 종목 목록을 받아
//! 캐시에 기록한 뒤 사용합니다. 실행 중에는 읽기 전용입니다.

use std::collections::HashMap;
use std::path::Path;

use tracing::{info, warn};

use crate::connector::kite::{InstrumentRecord, KiteClient};
use crate::error::ExchangeResult;
use crate::traits::FetchContext;

/// 읽기 전용 심볼 조회 테이블.
#[derive(Debug, Clone, Default)]
pub struct InstrumentDirectory {
    tokens: HashMap<String, u32>,
}

impl InstrumentDirectory {
    /// 종목 행에서 디렉토리를 만듭니다. 거래소가 달라 심볼이 겹치면 먼저 나온 행이 우선합니다.
    pub fn from_records(records: &[InstrumentRecord]) -> Self {
        let mut tokens = HashMap::with_capacity(records.len());
        for record in records {
            tokens
                .entry(record.tradingsymbol.clone())
                .or_insert(record.instrument_token);
        }
        Self { tokens }
    }

    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, u32)>,
        S: Into<String>,
    {
        Self {
            tokens: pairs.into_iter().map(|(s, t)| (s.into(), t)).collect(),
        }
    }

    pub fn resolve(&self, symbol: &str) -> Option<u32> {
        self.tokens.get(symbol).copied()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// 캐시 파일을 읽습니다. 파일이 없거나 비어 있으면 `None`.
    pub async fn read_cache(path: &Path) -> ExchangeResult<Option<Vec<InstrumentRecord>>> {
        let data = match tokio::fs::read(path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let records: Vec<InstrumentRecord> = serde_json::from_slice(&data)?;
        Ok(if records.is_empty() { None } else { Some(records) })
    }

    pub async fn write_cache(path: &Path, records: &[InstrumentRecord]) -> ExchangeResult<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let data = serde_json::to_vec(records)?;
        tokio::fs::write(path, data).await?;
        Ok(())
    }

    /// API에서 종목 목록을 새로 받아 캐시를 갱신합니다.
    pub async fn refresh(
        cache_path: &Path,
        client: &KiteClient,
        ctx: &FetchContext,
    ) -> ExchangeResult<Vec<InstrumentRecord>> {
        let records = ctx.call(client.instruments()).await?;
        info!(count = records.len(), "종목 목록 다운로드 완료");

        if let Err(e) = Self::write_cache(cache_path, &records).await {
            warn!(path = %cache_path.display(), error = %e, "종목 캐시 저장 실패");
        }
        Ok(records)
    }

    /// 캐시를 우선 사용하고, 없으면 API에서 받아옵니다.
    pub async fn load_or_fetch(
        cache_path: &Path,
        client: &KiteClient,
        ctx: &FetchContext,
    ) -> ExchangeResult<Self> {
        match Self::read_cache(cache_path).await {
            Ok(Some(records)) => {
                info!(
                    path = %cache_path.display(),
                    count = records.len(),
                    "종목 캐시 로드"
                );
                return Ok(Self::from_records(&records));
            }
            Ok(None) => {}
            Err(e) => {
                warn!(path = %cache_path.display(), error = %e, "종목 캐시를 읽을 수 없어 API에서 다시 받습니다");
            }
        }

        let records = Self::refresh(cache_path, client, ctx).await?;
        Ok(Self::from_records(&records))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(symbol: &str, token: u32, exchange: &str) -> InstrumentRecord {
        InstrumentRecord {
            instrument_token: token,
            exchange_token: None,
            tradingsymbol: symbol.to_string(),
            name: String::new(),
            last_price: None,
            expiry: String::new(),
            strike: None,
            tick_size: Some(0.05),
            lot_size: Some(1),
            instrument_type: "EQ".to_string(),
            segment: exchange.to_string(),
            exchange: exchange.to_string(),
        }
    }

    #[test]
    fn test_first_symbol_wins() {
        let directory = InstrumentDirectory::from_records(&[
            record("SBIN", 779521, "NSE"),
            record("SBIN", 128028676, "BSE"),
            record("INFY", 408065, "NSE"),
        ]);

        assert_eq!(directory.len(), 2);
        assert_eq!(directory.resolve("SBIN"), Some(779521));
        assert_eq!(directory.resolve("INFY"), Some(408065));
        assert_eq!(directory.resolve("UNKNOWN"), None);
    }

    #[tokio::test]
    async fn test_cache_roundtrip_and_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache/instrument_cache.json");

        assert!(InstrumentDirectory::read_cache(&path).await.unwrap().is_none());

        let records = vec![record("SBIN", 779521, "NSE")];
        InstrumentDirectory::write_cache(&path, &records).await.unwrap();

        let loaded = InstrumentDirectory::read_cache(&path).await.unwrap().unwrap();
        assert_eq!(loaded, records);
    }

    #[tokio::test]
    async fn test_empty_cache_is_treated_as_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("instrument_cache.json");
        std::fs::write(&path, "[]").unwrap();

        assert!(InstrumentDirectory::read_cache(&path).await.unwrap().is_none());
    }
}
