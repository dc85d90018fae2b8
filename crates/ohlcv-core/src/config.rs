//! 설정 관리.
//!
//! YAML(또는 TOML) 파일과 `OHLCV__` 접두사 환경 변수에서 설정을 읽고,
//! 실행 전에 모든 항목을 한 번에 검증합니다.

use chrono::NaiveDate;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{CoreError, Result};
use crate::types::Interval;

/// 설정 파일의 날짜 형식.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// 종목 심볼 최대 길이.
pub const MAX_SYMBOL_LEN: usize = 20;

/// 기본 설정 파일 경로.
pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

/// 기본 종목 캐시 파일 경로.
pub const DEFAULT_INSTRUMENT_CACHE: &str = "instrument_cache.json";

/// 환경 변수 접두사.
pub const ENV_PREFIX: &str = "OHLCV";

/// 저장소 종류.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    /// DuckDB 분석용 임베디드 DB
    #[default]
    DuckDb,
    /// SQLite 임베디드 DB
    Sqlite,
    /// 종목별 JSON 파일
    Json,
    /// 종목별 CSV 파일
    Csv,
}

impl StorageType {
    pub const ALL: [StorageType; 4] = [
        StorageType::DuckDb,
        StorageType::Sqlite,
        StorageType::Json,
        StorageType::Csv,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StorageType::DuckDb => "duckdb",
            StorageType::Sqlite => "sqlite",
            StorageType::Json => "json",
            StorageType::Csv => "csv",
        }
    }

    /// 경로를 지정하지 않았을 때의 기본 저장 위치.
    pub fn default_path(&self) -> &'static str {
        match self {
            StorageType::DuckDb => "market_data.duckdb",
            StorageType::Sqlite => "market_data.sqlite",
            StorageType::Json => "data/json",
            StorageType::Csv => "data/csv",
        }
    }

    /// 종목별 파일을 쓰는 저장소인지 (경로가 디렉토리).
    pub fn is_file_based(&self) -> bool {
        matches!(self, StorageType::Json | StorageType::Csv)
    }

    /// 사용자에게 보여줄 한 줄 설명.
    pub fn description(&self) -> &'static str {
        match self {
            StorageType::DuckDb => "Analytical embedded database, single file, table 'ohlcv'",
            StorageType::Sqlite => "Relational embedded database, single file, table 'ohlcv'",
            StorageType::Json => "One JSON array file per instrument (<symbol>.json)",
            StorageType::Csv => "One CSV file per instrument (<symbol>.csv) with a header row",
        }
    }

    fn valid_tokens() -> String {
        Self::ALL
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for StorageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageType {
    type Err = CoreError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| CoreError::InvalidStorageType(s.to_string()))
    }
}

/// API 요청 속도 제한 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitSettings {
    /// 초당 요청 수
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: f64,
    /// 버스트 허용량
    #[serde(default = "default_burst")]
    pub burst: u32,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            requests_per_second: default_requests_per_second(),
            burst: default_burst(),
        }
    }
}

/// 청크 수집 동작 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FetchSettings {
    /// 재시도 가능한 에러에 대한 최대 재시도 횟수 (0이면 재시도 없음)
    #[serde(default)]
    pub max_retries: u32,
    /// 재시도 기본 대기 시간 (밀리초, 시도마다 2배)
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// DB 저장소에서 (instrument, timestamp) 중복 무시
    #[serde(default)]
    pub dedupe: bool,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            max_retries: 0,
            retry_base_delay_ms: default_retry_base_delay_ms(),
            dedupe: false,
        }
    }
}

fn default_requests_per_second() -> f64 {
    3.0
}
fn default_burst() -> u32 {
    1
}
fn default_retry_base_delay_ms() -> u64 {
    500
}
fn default_instrument_cache() -> String {
    DEFAULT_INSTRUMENT_CACHE.to_string()
}

/// 애플리케이션 설정.
#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Kite API 키
    #[serde(default)]
    pub api_key: String,
    /// Kite API 시크릿
    #[serde(default)]
    pub api_secret: Option<SecretString>,
    /// 세션 액세스 토큰 (구 설정 키 `request_token` 허용)
    #[serde(default, alias = "request_token")]
    pub access_token: Option<SecretString>,
    /// 수집 대상 종목 심볼
    #[serde(default)]
    pub instruments: Vec<String>,
    /// 시작일 (YYYY-MM-DD)
    #[serde(default)]
    pub from_date: String,
    /// 종료일 (YYYY-MM-DD)
    #[serde(default)]
    pub to_date: String,
    /// 인터벌 토큰
    #[serde(default)]
    pub interval: String,
    /// 저장소 종류 (미지정 시 duckdb)
    #[serde(default)]
    pub storage_type: Option<String>,
    /// DB 파일 경로 또는 파일 저장소 디렉토리
    #[serde(default)]
    pub storage_path: Option<String>,
    /// 더 이상 사용하지 않음. `storage_path`로 대체
    #[serde(default)]
    pub duckdb_path: Option<String>,
    /// 로그 파일 경로
    #[serde(default)]
    pub log_file: Option<String>,
    /// 종목 목록 캐시 파일
    #[serde(default = "default_instrument_cache")]
    pub instrument_cache: String,
    /// Kite REST 기본 URL 재정의
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub rate_limit: RateLimitSettings,
    #[serde(default)]
    pub fetch: FetchSettings,
}

/// 검증을 통과한 실행 파라미터.
#[derive(Debug, Clone)]
pub struct RunParameters {
    pub instruments: Vec<String>,
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub interval: Interval,
    pub storage_type: StorageType,
    pub storage_path: PathBuf,
}

impl AppConfig {
    /// 파일과 환경 변수에서 설정을 로드합니다.
    ///
    /// 파일이 없으면 환경 변수만 사용합니다. 누락된 필수 값은
    /// [`AppConfig::validate`]에서 보고됩니다.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::warn!(path = %path.display(), "설정 파일이 없어 환경 변수만 사용합니다");
        }

        let builder = config::Config::builder()
            .set_default("instrument_cache", DEFAULT_INSTRUMENT_CACHE)?
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("instruments"),
            );

        let settings = builder.build()?;
        Ok(settings.try_deserialize()?)
    }

    /// 구 설정 키(`duckdb_path`)를 고려한 저장소 종류 토큰.
    fn storage_type_token(&self) -> String {
        match self.storage_type.as_deref().map(str::trim) {
            Some(token) if !token.is_empty() => token.to_string(),
            _ => StorageType::default().as_str().to_string(),
        }
    }

    fn explicit_storage_path(&self) -> Option<&str> {
        non_empty(&self.storage_path).or_else(|| non_empty(&self.duckdb_path))
    }

    /// 실제 사용할 저장 경로. 지정되지 않으면 저장소별 기본값.
    pub fn resolved_storage_path(&self, storage_type: StorageType) -> PathBuf {
        self.explicit_storage_path()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(storage_type.default_path()))
    }

    /// 필수 항목과 형식 검증. 파일 시스템을 건드리지 않습니다.
    pub fn validate_basic(&self) -> ValidationReport {
        let mut report = ValidationReport::default();

        if self.api_key.trim().is_empty() {
            report.add("api_key", "", "is required");
        }
        if self.api_secret.is_none() {
            report.add("api_secret", "", "is required");
        }
        if self.instruments.is_empty() {
            report.add("instruments", "", "at least one instrument must be specified");
        }
        if self.from_date.is_empty() {
            report.add("from_date", "", "is required");
        }
        if self.to_date.is_empty() {
            report.add("to_date", "", "is required");
        }
        if self.interval.is_empty() {
            report.add("interval", "", "is required");
        }

        let from = self.check_date(&mut report, "from_date", &self.from_date);
        let to = self.check_date(&mut report, "to_date", &self.to_date);
        if let (Some(from), Some(to)) = (from, to) {
            if from >= to {
                report.add(
                    "date_range",
                    format!("{} to {}", self.from_date, self.to_date),
                    "from_date must be before to_date",
                );
            }
        }

        if !self.interval.is_empty() && self.interval.parse::<Interval>().is_err() {
            report.add(
                "interval",
                &self.interval,
                format!("must be one of: {}", Interval::valid_tokens()),
            );
        }

        let storage_type = self.storage_type_token();
        if storage_type.parse::<StorageType>().is_err() {
            report.add(
                "storage_type",
                &storage_type,
                format!("must be one of: {}", StorageType::valid_tokens()),
            );
        }

        let rate = self.rate_limit.requests_per_second;
        if !(rate.is_finite() && rate > 0.0) {
            report.add(
                "rate_limit.requests_per_second",
                rate.to_string(),
                "must be a positive number",
            );
        }

        for symbol in &self.instruments {
            if symbol.trim().is_empty() {
                report.add("instruments", symbol, "empty instrument symbol found");
            }
            if symbol.len() > MAX_SYMBOL_LEN {
                report.add(
                    "instruments",
                    symbol,
                    format!("instrument symbol too long (max {} characters)", MAX_SYMBOL_LEN),
                );
            }
        }

        report
    }

    fn check_date(
        &self,
        report: &mut ValidationReport,
        field: &str,
        value: &str,
    ) -> Option<NaiveDate> {
        if value.is_empty() {
            return None;
        }
        match parse_date(value) {
            Ok(date) => Some(date),
            Err(_) => {
                report.add(field, value, "must be in YYYY-MM-DD format");
                None
            }
        }
    }

    /// 저장 경로와 로그 경로를 준비합니다 (디렉토리 생성, 쓰기 권한 확인).
    pub fn validate_storage(&self) -> ValidationReport {
        let mut report = ValidationReport::default();

        if let Ok(storage_type) = self.storage_type_token().parse::<StorageType>() {
            let path = self.resolved_storage_path(storage_type);
            let shown = path.display().to_string();

            if storage_type.is_file_based() {
                if let Err(e) = fs::create_dir_all(&path) {
                    report.add("storage_path", &shown, format!("cannot create directory: {}", e));
                }
            } else {
                if let Some(parent) = non_trivial_parent(&path) {
                    if let Err(e) = fs::create_dir_all(parent) {
                        report.add(
                            "storage_path",
                            &shown,
                            format!("cannot create directory: {}", e),
                        );
                    }
                }
                if path.exists() && OpenOptions::new().write(true).open(&path).is_err() {
                    report.add("storage_path", &shown, "file exists but is not writable");
                }
            }
        }

        if let Some(log_file) = self.log_file.as_deref().filter(|s| !s.is_empty()) {
            if let Some(parent) = non_trivial_parent(Path::new(log_file)) {
                if let Err(e) = fs::create_dir_all(parent) {
                    report.add("log_file", log_file, format!("cannot create log directory: {}", e));
                }
            }
        }

        report
    }

    /// 전체 검증. 기본 검증을 통과한 경우에만 저장소 검증을 수행합니다.
    pub fn validate(&self) -> ValidationReport {
        let mut report = self.validate_basic();
        if report.is_ok() {
            report.extend(self.validate_storage());
        }
        report
    }

    /// 검증 후 실행 파라미터로 변환합니다.
    pub fn run_parameters(&self) -> Result<RunParameters> {
        let report = self.validate();
        if !report.is_ok() {
            return Err(CoreError::Validation(report));
        }

        if non_empty(&self.storage_path).is_none() && non_empty(&self.duckdb_path).is_some() {
            tracing::warn!("'duckdb_path'는 더 이상 사용되지 않습니다. 'storage_path'를 사용하세요");
        }

        let storage_type: StorageType = self.storage_type_token().parse()?;
        Ok(RunParameters {
            instruments: self
                .instruments
                .iter()
                .map(|s| s.trim().to_string())
                .collect(),
            from: parse_date(&self.from_date)?,
            to: parse_date(&self.to_date)?,
            interval: self.interval.parse()?,
            storage_type,
            storage_path: self.resolved_storage_path(storage_type),
        })
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.trim().is_empty())
}

fn non_trivial_parent(path: &Path) -> Option<&Path> {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty() && *p != Path::new("."))
}

/// `YYYY-MM-DD` 날짜를 파싱합니다.
pub fn parse_date(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, DATE_FORMAT)
        .map_err(|_| CoreError::InvalidDate(value.to_string()))
}

/// 검증 실패 항목 하나.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub field: String,
    pub value: String,
    pub message: String,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.value.is_empty() {
            write!(f, "{}: {}", self.field, self.message)
        } else {
            write!(f, "{} ({}): {}", self.field, self.value, self.message)
        }
    }
}

/// 검증 결과. 첫 에러에서 멈추지 않고 모든 문제를 모읍니다.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn add(
        &mut self,
        field: impl Into<String>,
        value: impl Into<String>,
        message: impl Into<String>,
    ) {
        self.issues.push(ValidationIssue {
            field: field.into(),
            value: value.into(),
            message: message.into(),
        });
    }

    pub fn extend(&mut self, other: ValidationReport) {
        self.issues.extend(other.issues);
    }

    pub fn is_ok(&self) -> bool {
        self.issues.is_empty()
    }

    /// 특정 필드에 대한 문제가 있는지 확인.
    pub fn has_field(&self, field: &str) -> bool {
        self.issues.iter().any(|i| i.field == field)
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<String> = self.issues.iter().map(|i| i.to_string()).collect();
        f.write_str(&messages.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> AppConfig {
        AppConfig {
            api_key: "key".to_string(),
            api_secret: Some(SecretString::new("secret".into())),
            access_token: None,
            instruments: vec!["SBIN".to_string(), "INFY".to_string()],
            from_date: "2024-01-01".to_string(),
            to_date: "2024-04-01".to_string(),
            interval: "minute".to_string(),
            storage_type: None,
            storage_path: None,
            duckdb_path: None,
            log_file: None,
            instrument_cache: DEFAULT_INSTRUMENT_CACHE.to_string(),
            base_url: None,
            rate_limit: RateLimitSettings::default(),
            fetch: FetchSettings::default(),
        }
    }

    #[test]
    fn test_valid_basic_config() {
        let report = base_config().validate_basic();
        assert!(report.is_ok(), "{report}");
    }

    #[test]
    fn test_missing_fields_are_all_reported() {
        let config = AppConfig {
            api_key: String::new(),
            api_secret: None,
            instruments: vec![],
            from_date: String::new(),
            to_date: String::new(),
            interval: String::new(),
            ..base_config()
        };
        let report = config.validate_basic();

        for field in ["api_key", "api_secret", "instruments", "from_date", "to_date", "interval"] {
            assert!(report.has_field(field), "missing {field}: {report}");
        }
    }

    #[test]
    fn test_date_format_and_range() {
        let config = AppConfig {
            from_date: "01-01-2024".to_string(),
            ..base_config()
        };
        let report = config.validate_basic();
        assert!(report.has_field("from_date"));
        assert!(!report.has_field("date_range"));

        let config = AppConfig {
            from_date: "2024-04-01".to_string(),
            to_date: "2024-04-01".to_string(),
            ..base_config()
        };
        assert!(config.validate_basic().has_field("date_range"));
    }

    #[test]
    fn test_unknown_interval_and_storage_rejected() {
        let config = AppConfig {
            interval: "hour".to_string(),
            storage_type: Some("parquet".to_string()),
            ..base_config()
        };
        let report = config.validate_basic();

        assert!(report.has_field("interval"));
        assert!(report.has_field("storage_type"));
        assert!(report.to_string().contains("must be one of: duckdb, sqlite, json, csv"));
    }

    #[test]
    fn test_symbol_checks() {
        let config = AppConfig {
            instruments: vec![" ".to_string(), "A".repeat(21)],
            ..base_config()
        };
        let report = config.validate_basic();
        assert_eq!(report.issues.len(), 2);
    }

    #[test]
    fn test_storage_path_defaults_and_legacy_key() {
        let config = base_config();
        assert_eq!(
            config.resolved_storage_path(StorageType::Csv),
            PathBuf::from("data/csv")
        );
        assert_eq!(
            config.resolved_storage_path(StorageType::DuckDb),
            PathBuf::from("market_data.duckdb")
        );

        let config = AppConfig {
            duckdb_path: Some("legacy/old.duckdb".to_string()),
            ..base_config()
        };
        assert_eq!(
            config.resolved_storage_path(StorageType::DuckDb),
            PathBuf::from("legacy/old.duckdb")
        );

        let config = AppConfig {
            storage_path: Some("new.duckdb".to_string()),
            duckdb_path: Some("legacy/old.duckdb".to_string()),
            ..base_config()
        };
        assert_eq!(
            config.resolved_storage_path(StorageType::DuckDb),
            PathBuf::from("new.duckdb")
        );
    }

    #[test]
    fn test_run_parameters_prepares_storage() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("nested/csv");
        let config = AppConfig {
            storage_type: Some("csv".to_string()),
            storage_path: Some(target.display().to_string()),
            instruments: vec![" SBIN ".to_string()],
            ..base_config()
        };

        let params = config.run_parameters().unwrap();

        assert_eq!(params.storage_type, StorageType::Csv);
        assert_eq!(params.interval, Interval::Minute);
        assert_eq!(params.instruments, vec!["SBIN".to_string()]);
        assert_eq!(params.from, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        assert!(target.is_dir());
    }

    #[test]
    fn test_run_parameters_rejects_invalid_config() {
        let config = AppConfig {
            interval: "fortnight".to_string(),
            ..base_config()
        };
        let err = config.run_parameters().unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn test_load_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            r#"
api_key: "abc"
api_secret: "shh"
request_token: "tok"
instruments: ["SBIN", "RELIANCE"]
from_date: "2024-01-01"
to_date: "2024-01-31"
interval: "day"
storage_type: "sqlite"
fetch:
  max_retries: 2
"#,
        )
        .unwrap();

        let config = AppConfig::load(&path).unwrap();

        assert_eq!(config.api_key, "abc");
        assert!(config.access_token.is_some());
        assert_eq!(config.instruments.len(), 2);
        assert_eq!(config.storage_type.as_deref(), Some("sqlite"));
        assert_eq!(config.instrument_cache, DEFAULT_INSTRUMENT_CACHE);
        assert_eq!(config.fetch.max_retries, 2);
        assert_eq!(config.fetch.retry_base_delay_ms, 500);
        assert_eq!(config.rate_limit.requests_per_second, 3.0);
        assert_eq!(config.rate_limit.burst, 1);
    }

    #[test]
    fn test_storage_type_tokens() {
        for storage in StorageType::ALL {
            assert_eq!(storage.as_str().parse::<StorageType>().unwrap(), storage);
        }
        assert_eq!(StorageType::default(), StorageType::DuckDb);
        assert!(StorageType::Json.is_file_based());
        assert!(!StorageType::Sqlite.is_file_based());
    }
}
