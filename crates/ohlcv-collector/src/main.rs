//! Kite 과거 시세 수집 CLI.
//!
//! # 사용 예시
//!
//! ```bash
//! # config.yaml 기준으로 수집 (계획 확인 후 실행)
//! ohlcv-collector fetch
//!
//! # 설정 일부를 덮어쓰고 확인 없이 실행
//! ohlcv-collector fetch --instruments SBIN,INFY --from 2024-01-01 --to 2024-04-01 \
//!     --interval minute --storage-type csv --yes
//!
//! # 설정 검증과 예상 소요 시간
//! ohlcv-collector validate
//!
//! # request token으로 액세스 토큰 발급
//! ohlcv-collector session --request-token <TOKEN>
//! ```

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use secrecy::ExposeSecret;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use ohlcv_collector::{console, open_storage, CollectorError, FetchOrchestrator, FetchPlan};
use ohlcv_core::config::DEFAULT_CONFIG_PATH;
use ohlcv_core::logging::{init_logging, LogConfig, LogFormat};
use ohlcv_core::{AppConfig, RunParameters};
use ohlcv_data::{SinkOptions, Storage, StorageSink};
use ohlcv_exchange::{
    FetchContext, InstrumentDirectory, KiteClient, KiteConfig, RateLimitConfig, RateLimiter,
    RetryPolicy,
};

#[derive(Parser)]
#[command(name = "ohlcv-collector")]
#[command(about = "Kite Connect 과거 시세 수집기 (청크 분할, rate limit 적용)", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// 설정 파일 경로 (YAML/TOML)
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// 로그 레벨 (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// 로그 형식 (pretty, json, compact)
    #[arg(long, global = true, env = "LOG_FORMAT", default_value = "compact")]
    log_format: LogFormat,
}

#[derive(Subcommand)]
enum Commands {
    /// 과거 시세를 조회하여 저장
    Fetch(FetchArgs),

    /// 종목 목록을 새로 받아 캐시 갱신
    Instruments,

    /// 설정, 저장소, 인증 정보를 검증하고 예상 소요 시간 출력
    Validate,

    /// 사용 가능한 저장소 종류
    Storages,

    /// 사용자 프로필 조회 (인증 확인)
    Profile,

    /// request token을 액세스 토큰으로 교환
    Session {
        /// 로그인 리다이렉트로 받은 request token
        #[arg(long)]
        request_token: String,
    },
}

#[derive(Args)]
struct FetchArgs {
    /// 종목 심볼 (쉼표로 구분, 예: "SBIN,INFY")
    #[arg(long, value_delimiter = ',')]
    instruments: Option<Vec<String>>,

    /// 시작 날짜 (YYYY-MM-DD)
    #[arg(long)]
    from: Option<String>,

    /// 종료 날짜 (YYYY-MM-DD)
    #[arg(long)]
    to: Option<String>,

    /// 인터벌 (minute, 3minute, ..., 60minute, day)
    #[arg(long)]
    interval: Option<String>,

    /// 저장소 종류 (duckdb, sqlite, json, csv)
    #[arg(long)]
    storage_type: Option<String>,

    /// 저장 경로 (DB 파일 또는 디렉토리)
    #[arg(long)]
    storage_path: Option<String>,

    /// 확인 없이 바로 실행
    #[arg(short, long)]
    yes: bool,
}

impl FetchArgs {
    fn apply(&self, config: &mut AppConfig) {
        if let Some(instruments) = &self.instruments {
            config.instruments = instruments
                .iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(from) = &self.from {
            config.from_date = from.clone();
        }
        if let Some(to) = &self.to {
            config.to_date = to.clone();
        }
        if let Some(interval) = &self.interval {
            config.interval = interval.clone();
        }
        if let Some(storage_type) = &self.storage_type {
            config.storage_type = Some(storage_type.clone());
        }
        if let Some(storage_path) = &self.storage_path {
            config.storage_path = Some(storage_path.clone());
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut config = AppConfig::load(&cli.config)
        .with_context(|| format!("설정을 불러올 수 없습니다: {}", cli.config))?;

    init_logging(
        LogConfig::new(&cli.log_level)
            .with_format(cli.log_format)
            .with_log_file(config.log_file.as_deref()),
    )?;
    if !Path::new(&cli.config).exists() {
        warn!(path = %cli.config, "설정 파일이 없어 환경 변수만 사용합니다");
    }

    match cli.command {
        Commands::Fetch(args) => {
            args.apply(&mut config);
            run_fetch(config, args.yes).await?;
        }
        Commands::Instruments => refresh_instruments(config).await?,
        Commands::Validate => validate(config).await?,
        Commands::Storages => print!("{}", console::render_storages()),
        Commands::Profile => show_profile(config).await?,
        Commands::Session { request_token } => create_session(config, &request_token).await?,
    }

    Ok(())
}

/// Ctrl-C를 받으면 토큰을 취소합니다.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("종료 신호 수신, 현재 청크 이후 중단합니다");
            token.cancel();
        }
    });
    cancel
}

fn kite_client(config: &mut AppConfig) -> anyhow::Result<KiteClient> {
    let kite_config = KiteConfig::new(config.api_key.trim())
        .with_access_token(
            config
                .access_token
                .take()
                .filter(|token| !token.expose_secret().trim().is_empty()),
        )
        .with_base_url(config.base_url.as_deref());
    Ok(KiteClient::new(kite_config)?)
}

fn fetch_context(config: &AppConfig, cancel: CancellationToken) -> FetchContext {
    let limiter = RateLimiter::new(RateLimitConfig::from(&config.rate_limit));
    FetchContext::new(Arc::new(limiter), cancel)
}

fn require_access_token(client: &KiteClient) -> Result<(), CollectorError> {
    if client.has_access_token() {
        return Ok(());
    }
    Err(CollectorError::Auth(format!(
        "access_token is not set. Log in at {} and run `ohlcv-collector session --request-token <TOKEN>`",
        client.login_url()
    )))
}

/// 인증 정보 확인. 실패하면 어떤 청크도 조회하지 않습니다.
async fn check_credentials(client: &KiteClient, ctx: &FetchContext) -> Result<(), CollectorError> {
    require_access_token(client)?;
    let profile = ctx.call(client.profile()).await?;
    info!(user_id = %profile.user_id, user_name = %profile.user_name, "인증 확인");
    Ok(())
}

async fn run_fetch(mut config: AppConfig, assume_yes: bool) -> anyhow::Result<()> {
    let params = config.run_parameters().map_err(CollectorError::from)?;

    let storage = Arc::new(
        open_storage(
            params.storage_type,
            &params.storage_path,
            SinkOptions {
                dedupe: config.fetch.dedupe,
            },
        )
        .await?,
    );

    let outcome = fetch_into(&mut config, &params, Arc::clone(&storage), assume_yes).await;

    if let Err(e) = storage.close().await {
        warn!(error = %e, location = %storage.location().display(), "저장소 종료 실패");
    }
    outcome
}

async fn fetch_into(
    config: &mut AppConfig,
    params: &RunParameters,
    storage: Arc<Storage>,
    assume_yes: bool,
) -> anyhow::Result<()> {
    let client = Arc::new(kite_client(config)?);
    let ctx = fetch_context(config, cancel_on_ctrl_c());

    check_credentials(&client, &ctx).await?;

    let directory =
        InstrumentDirectory::load_or_fetch(Path::new(&config.instrument_cache), &client, &ctx)
            .await
            .map_err(CollectorError::from)?;

    let plan = FetchPlan::build(
        &params.instruments,
        &directory,
        params.from,
        params.to,
        params.interval,
    );
    if plan.is_empty() {
        return Err(CollectorError::NoValidInstruments(plan.unresolved).into());
    }

    console::print_plan(&plan, config.rate_limit.requests_per_second);
    if !assume_yes && !console::confirm_stdin("Proceed with fetch?")? {
        info!("사용자가 수집을 취소했습니다");
        return Ok(());
    }

    let progress = console::chunk_progress(plan.total_calls() as u64)?;
    let orchestrator = FetchOrchestrator::new(ctx, client, storage)
        .with_retry(RetryPolicy::from_settings(&config.fetch))
        .with_progress(progress);

    let report = orchestrator.run(&plan).await?;
    report.log_summary("OHLCV 수집");

    if report.cancelled {
        warn!("수집이 중간에 취소되었습니다. 이미 저장된 데이터는 유지됩니다");
    }
    Ok(())
}

async fn refresh_instruments(mut config: AppConfig) -> anyhow::Result<()> {
    let client = kite_client(&mut config)?;
    require_access_token(&client)?;
    let ctx = fetch_context(&config, cancel_on_ctrl_c());

    let records = InstrumentDirectory::refresh(Path::new(&config.instrument_cache), &client, &ctx)
        .await
        .map_err(CollectorError::from)?;
    let directory = InstrumentDirectory::from_records(&records);

    info!(
        rows = records.len(),
        symbols = directory.len(),
        cache = %config.instrument_cache,
        "종목 캐시 갱신 완료"
    );
    Ok(())
}

async fn validate(mut config: AppConfig) -> anyhow::Result<()> {
    let report = config.validate();
    if !report.is_ok() {
        for issue in &report.issues {
            error!(field = %issue.field, value = %issue.value, "{}", issue.message);
        }
        return Err(CollectorError::from(ohlcv_core::CoreError::Validation(report)).into());
    }
    info!("설정 검증 통과");

    let params = config.run_parameters().map_err(CollectorError::from)?;

    let storage = open_storage(
        params.storage_type,
        &params.storage_path,
        SinkOptions {
            dedupe: config.fetch.dedupe,
        },
    )
    .await?;
    storage.close().await.map_err(CollectorError::from)?;
    info!(
        storage = %params.storage_type,
        path = %params.storage_path.display(),
        "저장소 초기화 확인"
    );

    let client = kite_client(&mut config)?;
    let ctx = fetch_context(&config, cancel_on_ctrl_c());
    check_credentials(&client, &ctx).await?;

    let directory =
        InstrumentDirectory::load_or_fetch(Path::new(&config.instrument_cache), &client, &ctx)
            .await
            .map_err(CollectorError::from)?;
    let plan = FetchPlan::build(
        &params.instruments,
        &directory,
        params.from,
        params.to,
        params.interval,
    );
    info!(
        resolved = plan.instruments.len(),
        unresolved = ?plan.unresolved,
        "종목 해석"
    );

    console::print_plan(&plan, config.rate_limit.requests_per_second);
    if plan.is_empty() {
        bail!(CollectorError::NoValidInstruments(plan.unresolved));
    }
    Ok(())
}

async fn show_profile(mut config: AppConfig) -> anyhow::Result<()> {
    let client = kite_client(&mut config)?;
    require_access_token(&client)?;
    let ctx = fetch_context(&config, cancel_on_ctrl_c());

    let profile = ctx
        .call(client.profile())
        .await
        .map_err(CollectorError::from)?;
    print!("{}", console::render_profile(&profile));
    Ok(())
}

async fn create_session(mut config: AppConfig, request_token: &str) -> anyhow::Result<()> {
    let api_secret = config
        .api_secret
        .take()
        .context("api_secret is required to create a session")?;
    let client = kite_client(&mut config)?;
    let ctx = fetch_context(&config, cancel_on_ctrl_c());

    let session = ctx
        .call(client.generate_session(request_token, &api_secret))
        .await
        .map_err(CollectorError::from)?;

    info!(user_id = %session.user_id, "세션 발급 완료");
    println!("access_token: {}", session.access_token.expose_secret());
    println!("Set it as `access_token` in the config file or OHLCV__ACCESS_TOKEN.");
    Ok(())
}
