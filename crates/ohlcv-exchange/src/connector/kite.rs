//! Kite Connect REST 커넥터.
//!
//! 과거 시세, 종목 목록(CSV 덤프), 사용자 프로필, 세션 발급을 지원합니다.
//! 이 클라이언트는 rate limit을 직접 적용하지 않으므로 호출 측에서
//! [`FetchContext::call`](crate::traits::FetchContext::call)을 거쳐야 합니다.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone};
use chrono_tz::Asia::Kolkata;
use reqwest::{Client, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, error, warn};

use ohlcv_core::{Candle, Chunk, Interval, CHUNK_TIME_FORMAT};

use crate::error::{ExchangeError, ExchangeResult};
use crate::traits::HistoricalDataSource;

/// Kite Connect REST 기본 URL.
pub const KITE_API_ROOT: &str = "https://api.kite.trade";

/// 브라우저 로그인 URL.
pub const KITE_LOGIN_URL: &str = "https://kite.zerodha.com/connect/login";

const KITE_VERSION: &str = "3";
const KITE_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%z";

/// Kite 클라이언트 설정.
#[derive(Debug)]
pub struct KiteConfig {
    pub api_key: String,
    pub access_token: Option<SecretString>,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl KiteConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            access_token: None,
            base_url: KITE_API_ROOT.to_string(),
            timeout_secs: 30,
        }
    }

    pub fn with_access_token(mut self, token: Option<SecretString>) -> Self {
        self.access_token = token;
        self
    }

    /// 기본 URL을 바꿉니다 (프록시, 테스트 서버).
    pub fn with_base_url(mut self, base_url: Option<&str>) -> Self {
        if let Some(url) = base_url.filter(|u| !u.is_empty()) {
            self.base_url = url.trim_end_matches('/').to_string();
        }
        self
    }
}

/// 사용자 프로필 (`GET /user/profile`).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct UserProfile {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub broker: String,
    #[serde(default)]
    pub exchanges: Vec<String>,
    #[serde(default)]
    pub products: Vec<String>,
}

/// 세션 발급 결과 (`POST /session/token`).
#[derive(Debug, Deserialize)]
pub struct SessionData {
    #[serde(default)]
    pub user_id: String,
    pub access_token: SecretString,
    #[serde(default)]
    pub login_time: Option<String>,
}

/// 종목 목록 CSV의 한 행. 캐시 파일에도 같은 형태로 저장합니다.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct InstrumentRecord {
    pub instrument_token: u32,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    pub exchange_token: Option<u32>,
    pub tradingsymbol: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    pub last_price: Option<f64>,
    #[serde(default)]
    pub expiry: String,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    pub strike: Option<f64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    pub tick_size: Option<f64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    pub lot_size: Option<u32>,
    #[serde(default)]
    pub instrument_type: String,
    #[serde(default)]
    pub segment: String,
    #[serde(default)]
    pub exchange: String,
}

#[derive(Debug, Deserialize)]
struct KiteEnvelope<T> {
    #[serde(default)]
    status: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct KiteErrorBody {
    message: Option<String>,
    error_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HistoricalPayload {
    #[serde(default)]
    candles: Vec<Vec<serde_json::Value>>,
}

/// Kite Connect 클라이언트.
pub struct KiteClient {
    config: KiteConfig,
    client: Client,
}

impl KiteClient {
    /// 새 Kite 클라이언트 생성.
    ///
    /// # Errors
    /// HTTP 클라이언트 생성에 실패하면 `ExchangeError::NetworkError`를 반환합니다.
    pub fn new(config: KiteConfig) -> ExchangeResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ExchangeError::NetworkError(format!("HTTP 클라이언트 생성 실패: {}", e)))?;

        Ok(Self { config, client })
    }

    pub fn api_key(&self) -> &str {
        &self.config.api_key
    }

    pub fn has_access_token(&self) -> bool {
        self.config.access_token.is_some()
    }

    /// 브라우저 로그인 URL. 로그인 후 리다이렉트로 request token을 받습니다.
    pub fn login_url(&self) -> String {
        format!(
            "{}?api_key={}&v={}",
            KITE_LOGIN_URL, self.config.api_key, KITE_VERSION
        )
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    fn authorization(&self) -> ExchangeResult<String> {
        let token = self.config.access_token.as_ref().ok_or_else(|| {
            ExchangeError::Unauthorized("access token is not set; run the session command".into())
        })?;
        Ok(format!(
            "token {}:{}",
            self.config.api_key,
            token.expose_secret()
        ))
    }

    /// 인증 헤더를 붙인 GET 요청.
    async fn get(&self, path: &str, query: &[(&str, String)]) -> ExchangeResult<Response> {
        let authorization = self.authorization()?;
        let response = self
            .client
            .get(self.url(path))
            .header("X-Kite-Version", KITE_VERSION)
            .header("Authorization", authorization)
            .query(query)
            .send()
            .await?;
        Ok(response)
    }

    /// JSON 응답 봉투를 풀어 `data`를 반환합니다.
    async fn handle_response<T: DeserializeOwned>(response: Response) -> ExchangeResult<T> {
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(map_error(status, &body));
        }

        let envelope: KiteEnvelope<T> = serde_json::from_str(&body).map_err(|e| {
            error!("Failed to parse response: {} - Body: {}", e, body);
            ExchangeError::ParseError(e.to_string())
        })?;

        if envelope.status == "error" {
            return Err(map_error(status, &body));
        }
        envelope
            .data
            .ok_or_else(|| ExchangeError::ParseError("response has no data field".into()))
    }

    /// 한 구간의 과거 캔들 조회.
    pub async fn historical_candles(
        &self,
        instrument_token: u32,
        interval: Interval,
        chunk: &Chunk,
    ) -> ExchangeResult<Vec<Candle>> {
        let path = format!(
            "/instruments/historical/{}/{}",
            instrument_token,
            interval.as_str()
        );
        let query = [
            ("from", chunk.start.format(CHUNK_TIME_FORMAT).to_string()),
            ("to", chunk.end.format(CHUNK_TIME_FORMAT).to_string()),
            ("continuous", "0".to_string()),
            ("oi", "0".to_string()),
        ];
        debug!(instrument_token, interval = %interval, chunk = %chunk, "과거 시세 요청");

        let response = self.get(&path, &query).await?;
        let payload: HistoricalPayload = Self::handle_response(response).await?;

        let mut candles = Vec::with_capacity(payload.candles.len());
        for row in &payload.candles {
            match parse_candle_row(row) {
                Ok(candle) => candles.push(candle),
                Err(e) => warn!(instrument_token, error = %e, "캔들 행 파싱 실패, 건너뜀"),
            }
        }
        Ok(candles)
    }

    /// 사용자 프로필 조회. 액세스 토큰 유효성 확인에 사용합니다.
    pub async fn profile(&self) -> ExchangeResult<UserProfile> {
        let response = self.get("/user/profile", &[]).await?;
        Self::handle_response(response).await
    }

    /// 전체 종목 목록 (CSV 덤프) 다운로드.
    pub async fn instruments(&self) -> ExchangeResult<Vec<InstrumentRecord>> {
        let response = self.get("/instruments", &[]).await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(map_error(status, &body));
        }
        parse_instruments_csv(&body)
    }

    /// request token을 액세스 토큰으로 교환합니다.
    pub async fn generate_session(
        &self,
        request_token: &str,
        api_secret: &SecretString,
    ) -> ExchangeResult<SessionData> {
        let checksum = session_checksum(
            &self.config.api_key,
            request_token,
            api_secret.expose_secret(),
        );
        let form = [
            ("api_key", self.config.api_key.as_str()),
            ("request_token", request_token),
            ("checksum", checksum.as_str()),
        ];

        let response = self
            .client
            .post(self.url("/session/token"))
            .header("X-Kite-Version", KITE_VERSION)
            .form(&form)
            .send()
            .await?;
        Self::handle_response(response).await
    }
}

#[async_trait]
impl HistoricalDataSource for KiteClient {
    fn name(&self) -> &str {
        "kite"
    }

    async fn fetch_candles(
        &self,
        instrument_token: u32,
        interval: Interval,
        chunk: &Chunk,
    ) -> ExchangeResult<Vec<Candle>> {
        self.historical_candles(instrument_token, interval, chunk)
            .await
    }
}

/// Kite 에러 응답을 ExchangeError로 매핑.
fn map_error(status: StatusCode, body: &str) -> ExchangeError {
    let parsed = serde_json::from_str::<KiteErrorBody>(body).ok();
    let message = parsed
        .as_ref()
        .and_then(|e| e.message.clone())
        .unwrap_or_else(|| body.to_string());
    let error_type = parsed.and_then(|e| e.error_type).unwrap_or_default();

    if status == StatusCode::TOO_MANY_REQUESTS {
        return ExchangeError::RateLimited;
    }

    match error_type.as_str() {
        "TokenException" | "PermissionException" => ExchangeError::Unauthorized(message),
        "InputException" => ExchangeError::InputRejected(message),
        "NetworkException" => ExchangeError::NetworkError(message),
        _ if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN => {
            ExchangeError::Unauthorized(message)
        }
        _ => ExchangeError::ApiError {
            status: status.as_u16(),
            message,
        },
    }
}

/// 세션 체크섬: `sha256(api_key + request_token + api_secret)`의 hex.
pub fn session_checksum(api_key: &str, request_token: &str, api_secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(api_key.as_bytes());
    hasher.update(request_token.as_bytes());
    hasher.update(api_secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// Kite 타임스탬프 파싱 (`2024-01-02T09:15:00+0530`).
///
/// 오프셋이 없으면 거래소 현지 시각(IST)으로 간주합니다.
pub fn parse_kite_timestamp(value: &str) -> ExchangeResult<DateTime<FixedOffset>> {
    if let Ok(ts) = DateTime::parse_from_str(value, KITE_TIMESTAMP_FORMAT) {
        return Ok(ts);
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(ts);
    }

    let naive = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S"))
        .map_err(|e| ExchangeError::ParseError(format!("invalid timestamp '{}': {}", value, e)))?;

    Kolkata
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.fixed_offset())
        .ok_or_else(|| ExchangeError::ParseError(format!("ambiguous timestamp '{}'", value)))
}

/// `[timestamp, open, high, low, close, volume(, oi)]` 행을 캔들로 변환.
fn parse_candle_row(row: &[serde_json::Value]) -> ExchangeResult<Candle> {
    if row.len() < 6 {
        return Err(ExchangeError::ParseError(format!(
            "candle row has {} fields, expected at least 6",
            row.len()
        )));
    }

    let timestamp = row[0]
        .as_str()
        .ok_or_else(|| ExchangeError::ParseError(format!("timestamp is not a string: {}", row[0])))
        .and_then(parse_kite_timestamp)?;

    let number = |index: usize, field: &str| -> ExchangeResult<f64> {
        row[index].as_f64().ok_or_else(|| {
            ExchangeError::ParseError(format!("{} is not a number: {}", field, row[index]))
        })
    };
    let volume = row[5]
        .as_i64()
        .or_else(|| row[5].as_f64().map(|v| v as i64))
        .ok_or_else(|| ExchangeError::ParseError(format!("volume is not a number: {}", row[5])))?;

    Ok(Candle::new(
        timestamp,
        number(1, "open")?,
        number(2, "high")?,
        number(3, "low")?,
        number(4, "close")?,
        volume,
    ))
}

/// 종목 목록 CSV 파싱. 읽을 수 없는 행은 건너뜁니다.
pub fn parse_instruments_csv(body: &str) -> ExchangeResult<Vec<InstrumentRecord>> {
    let mut reader = csv::Reader::from_reader(body.as_bytes());
    let mut records = Vec::new();

    for (index, row) in reader.deserialize::<InstrumentRecord>().enumerate() {
        match row {
            Ok(record) => records.push(record),
            // 헤더가 1행이므로 데이터는 2행부터
            Err(e) => warn!(line = index + 2, error = %e, "종목 행 파싱 실패, 건너뜀"),
        }
    }
    Ok(records)
}
