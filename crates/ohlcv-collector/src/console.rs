//! 콘솔 출력: 실행 계획 요약, 확인 프롬프트, 진행률 표시.

use std::io::{self, BufRead, Write};
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

use ohlcv_core::{StorageType, CHUNK_TIME_FORMAT};
use ohlcv_exchange::UserProfile;

use crate::plan::FetchPlan;

/// 실행 계획을 사람이 읽을 수 있는 형태로 만듭니다.
pub fn render_plan(plan: &FetchPlan, requests_per_second: f64) -> String {
    let mut out = String::new();
    let symbols: Vec<&str> = plan.instruments.iter().map(|i| i.symbol.as_str()).collect();

    out.push_str("\n📋 Fetch plan\n");
    out.push_str("═══════════════════════════════════════════════════════════════\n");
    out.push_str(&format!(
        "  Instruments        : {} ({})\n",
        symbols.len(),
        symbols.join(", ")
    ));
    if !plan.unresolved.is_empty() {
        out.push_str(&format!(
            "  Unresolved (skip)  : {}\n",
            plan.unresolved.join(", ")
        ));
    }
    out.push_str(&format!("  Date range         : {} to {}\n", plan.from, plan.to));
    out.push_str(&format!("  Interval           : {}\n", plan.interval));
    out.push_str(&format!(
        "  Max window         : {} days per request ({})\n",
        plan.window_days,
        if plan.interval.is_daily_or_larger() {
            "daily candles"
        } else {
            "intraday candles"
        }
    ));
    out.push_str(&format!(
        "  Chunks/instrument  : {}\n",
        plan.chunks_per_instrument()
    ));
    out.push_str(&format!("  Total API calls    : {}\n", plan.total_calls()));
    out.push_str(&format!("  Rate limit         : {} req/s\n", requests_per_second));
    out.push_str(&format!(
        "  Estimated time     : {}\n",
        format_duration(plan.estimated_duration(requests_per_second))
    ));

    if let Some(first) = plan.instruments.first() {
        if first.chunks.len() > 1 {
            out.push_str("  Chunks:\n");
            for (i, chunk) in first.chunks.iter().enumerate() {
                out.push_str(&format!(
                    "    {:>3}. {} ~ {}\n",
                    i + 1,
                    chunk.start.format(CHUNK_TIME_FORMAT),
                    chunk.end.format(CHUNK_TIME_FORMAT)
                ));
            }
        }
    }
    out.push_str("═══════════════════════════════════════════════════════════════\n");
    out
}

pub fn print_plan(plan: &FetchPlan, requests_per_second: f64) {
    print!("{}", render_plan(plan, requests_per_second));
}

/// `1h 02m 05s` 형식.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs_f64().ceil() as u64;
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{}h {:02}m {:02}s", h, m, s)
    } else if m > 0 {
        format!("{}m {:02}s", m, s)
    } else {
        format!("{}s", s)
    }
}

/// y/N 확인. `y` 또는 `yes`만 승인으로 봅니다.
pub fn confirm<R: BufRead, W: Write>(
    prompt: &str,
    input: &mut R,
    output: &mut W,
) -> io::Result<bool> {
    write!(output, "{} [y/N]: ", prompt)?;
    output.flush()?;

    let mut answer = String::new();
    input.read_line(&mut answer)?;
    Ok(matches!(
        answer.trim().to_ascii_lowercase().as_str(),
        "y" | "yes"
    ))
}

/// 표준 입출력으로 확인을 받습니다.
pub fn confirm_stdin(prompt: &str) -> io::Result<bool> {
    let stdin = io::stdin();
    let mut input = stdin.lock();
    confirm(prompt, &mut input, &mut io::stdout())
}

/// 청크 단위 진행률 표시줄.
pub fn chunk_progress(total_chunks: u64) -> anyhow::Result<ProgressBar> {
    let pb = ProgressBar::new(total_chunks);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} chunks ({eta})",
            )?
            .progress_chars("#>-"),
    );
    Ok(pb)
}

/// 저장소 종류 설명 표.
pub fn render_storages() -> String {
    let mut out = String::new();
    out.push_str("\n💾 Storage backends\n");
    out.push_str("═══════════════════════════════════════════════════════════════\n");
    out.push_str("  type     | default path         | description\n");
    out.push_str("  ─────────────────────────────────────────────────────────────\n");
    for kind in StorageType::ALL {
        out.push_str(&format!(
            "  {:<8} | {:<20} | {}\n",
            kind.as_str(),
            kind.default_path(),
            kind.description()
        ));
    }
    out.push_str("═══════════════════════════════════════════════════════════════\n");
    out
}

pub fn render_profile(profile: &UserProfile) -> String {
    let mut out = String::new();
    out.push_str("\n👤 User profile\n");
    out.push_str("═══════════════════════════════════════════════════════════════\n");
    out.push_str(&format!("  User ID    : {}\n", profile.user_id));
    out.push_str(&format!("  User name  : {}\n", profile.user_name));
    out.push_str(&format!("  Email      : {}\n", profile.email));
    out.push_str(&format!("  Broker     : {}\n", profile.broker));
    out.push_str(&format!("  Exchanges  : {}\n", profile.exchanges.join(", ")));
    out.push_str(&format!("  Products   : {}\n", profile.products.join(", ")));
    out.push_str("═══════════════════════════════════════════════════════════════\n");
    out
}
