//! JSON 저장소. 종목마다 캔들 배열 파일 하나.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info, instrument};

use ohlcv_core::{Candle, StorageType};

use super::{instrument_file, run_blocking, valid_candles, StorageSink};
use crate::error::{DataError, Result};

/// `<SYMBOL>.json`에 캔들 배열을 누적하는 저장소.
///
/// 기존 배열을 읽어 새 캔들을 뒤에 붙인 뒤 임시 파일에 쓰고 이름을 바꿉니다.
/// 기존 파일을 해석할 수 없으면 덮어쓰지 않고 에러를 반환합니다.
#[derive(Debug)]
pub struct JsonSink {
    base_dir: PathBuf,
}

impl JsonSink {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
        }
    }

    /// 종목의 JSON 파일 경로.
    pub fn file_for(&self, symbol: &str) -> PathBuf {
        instrument_file(&self.base_dir, symbol, "json")
    }
}

fn load_existing(path: &Path) -> Result<Vec<Candle>> {
    let raw = match std::fs::read(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    if raw.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }

    serde_json::from_slice(&raw).map_err(|e| {
        DataError::SerializationError(format!(
            "기존 JSON 파일을 해석할 수 없습니다 ({}): {}",
            path.display(),
            e
        ))
    })
}

fn merge_and_write(path: &Path, candles: Vec<Candle>) -> Result<usize> {
    let mut all = load_existing(path)?;
    let existing = all.len();
    let added = candles.len();
    all.extend(candles);

    let body = serde_json::to_vec_pretty(&all)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, body)?;
    std::fs::rename(&tmp, path)?;

    debug!(file = %path.display(), existing, added, "JSON 병합");
    Ok(added)
}

#[async_trait]
impl StorageSink for JsonSink {
    fn kind(&self) -> StorageType {
        StorageType::Json
    }

    fn location(&self) -> &Path {
        &self.base_dir
    }

    async fn init(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.base_dir).await?;
        info!(dir = %self.base_dir.display(), "JSON 디렉토리 준비 완료");
        Ok(())
    }

    #[instrument(skip(self, candles), fields(count = candles.len()))]
    async fn store_candles(&self, symbol: &str, candles: &[Candle]) -> Result<usize> {
        let valid: Vec<Candle> = valid_candles(symbol, candles)
            .into_iter()
            .cloned()
            .collect();
        if valid.is_empty() {
            return Ok(0);
        }

        let path = self.file_for(symbol);
        let target = path.clone();
        let written = run_blocking(move || merge_and_write(&target, valid)).await?;

        info!(symbol, written, file = %path.display(), "JSON 저장");
        Ok(written)
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
