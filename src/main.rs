pub mod account;
pub mod config;
pub mod downloader;
pub mod error;
pub mod hosting;
pub mod logging;
pub mod pipeline;
pub mod proxy;
pub mod util;

use anyhow::Context;
use downloader::{Aria2Runner, ProgressReporter, ProgressSample, render_bar};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 先初始化日志，配置解析中的告警才能输出。
    init_tracing();

    let cfg = Arc::new(config::Config::load());

    let links = links_from_args(std::env::args().skip(1));
    if links.is_empty() {
        anyhow::bail!("用法: quotafetch [-debug <level>] <分享链接[|文件名]>...");
    }

    let accounts = Arc::new(
        account::AccountPool::load(&cfg)
            .await
            .context("加载账号名单失败")?,
    );
    tracing::info!("已加载 {} 个账号", accounts.len().await);

    let hosting = hosting::HostingClient::new(&cfg).context("初始化 HostingClient 失败")?;

    // 后台定期与远端限额对账；首次刷新在任务启动时立即执行。
    let _refresh = account::spawn_refresh_task(
        accounts.clone(),
        Arc::new(hosting.clone()),
        Duration::from_secs(cfg.quota_refresh_minutes * 60),
    );

    let pipeline = pipeline::FetchPipeline::new(
        cfg.clone(),
        accounts.clone(),
        hosting,
        Aria2Runner::new(cfg.log_level()),
    );

    let mut failures = 0usize;
    for link in &links {
        match pipeline.fetch(link, &LogReporter).await {
            Ok(out) => {
                tracing::info!(
                    "完成: {} -> {} ({}，{} 次尝试)",
                    out.file_name,
                    out.path.display(),
                    logging::human_bytes(out.size),
                    out.attempts
                );
            }
            Err(e @ error::AppError::NoQuota { .. }) => {
                failures += 1;
                tracing::error!("{e}");
                tracing::info!("{}", accounts.status_summary().await);
            }
            Err(e) => {
                failures += 1;
                tracing::error!("下载失败 {link}: {e}");
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{failures}/{} 个链接下载失败", links.len());
    }
    Ok(())
}

/// 位置参数即链接；`-debug <level>` 已由 Config::load 处理，这里跳过。
fn links_from_args(args: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut out = Vec::new();
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        if arg == "-debug" {
            args.next();
            continue;
        }
        if !arg.trim().is_empty() {
            out.push(arg);
        }
    }
    out
}

/// 把节流后的进度样本写进日志。
struct LogReporter;

impl ProgressReporter for LogReporter {
    async fn report(&self, s: &ProgressSample) -> anyhow::Result<()> {
        let percent = s.percent_value();
        tracing::info!(
            "{} {percent}% | {}/{} | {}/s | ETA {} | CN {}",
            render_bar(percent, 24),
            s.downloaded,
            s.total,
            s.speed,
            s.eta,
            s.connections
        );
        Ok(())
    }
}

fn init_tracing() {
    // DEBUG 只控制 aria2c 命令行/原始输出与 API 请求日志块，不影响流程日志。
    // 依赖库默认 warn，本项目自身至少 info，以免预设的 RUST_LOG=warn 把进度吞掉。
    let env = std::env::var("RUST_LOG").unwrap_or_default();
    let env = env.trim();
    let filter = if env.is_empty() {
        EnvFilter::new("warn,quotafetch=info")
    } else if env.contains("quotafetch") {
        EnvFilter::new(env)
    } else {
        EnvFilter::new(format!("{env},quotafetch=info"))
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_flag_and_its_value_are_not_links() {
        let args = ["-debug", "high", "https://pixeldrain.com/u/a", "", "b|name.mp4"]
            .map(String::from);
        assert_eq!(
            links_from_args(args),
            vec!["https://pixeldrain.com/u/a", "b|name.mp4"]
        );
    }
}
