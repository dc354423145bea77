//! aria2c 进度行解析与进度回调节流。

use regex::Regex;
use std::future::Future;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

/// 进度回调的最小间隔。
pub const PROGRESS_INTERVAL: Duration = Duration::from_secs(2);

static RE_PROGRESS: OnceLock<Regex> = OnceLock::new();

fn re_progress() -> &'static Regex {
    // aria2c 的 GID 是十六进制，这里同时兼容纯数字。
    RE_PROGRESS.get_or_init(|| {
        Regex::new(
            r"\[#[0-9A-Fa-f]+ SIZE:([\d.]+\w+)/([\d.]+\w+)\((\d+)%\) CN:(\d+) DL:([\d.]+\w+) ETA:([\dhms]+)\]",
        )
        .expect("compile RE_PROGRESS")
    })
}

/// 一次进度快照。除 percent 外都是 aria2c 原样输出的字符串。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressSample {
    pub downloaded: String,
    pub total: String,
    pub percent: String,
    pub connections: String,
    pub speed: String,
    pub eta: String,
}

impl ProgressSample {
    pub fn percent_value(&self) -> u8 {
        self.percent.parse::<u8>().map(|p| p.min(100)).unwrap_or(0)
    }
}

/// 解析一行 `[#N SIZE:2.1GiB/8.5GiB(24%) CN:16 DL:15.3MiB ETA:7m23s]`；不匹配返回 None。
pub fn parse_progress(line: &str) -> Option<ProgressSample> {
    let caps = re_progress().captures(line)?;
    let field = |i: usize| caps.get(i).map(|m| m.as_str().to_string()).unwrap_or_default();
    Some(ProgressSample {
        downloaded: field(1),
        total: field(2),
        percent: field(3),
        connections: field(4),
        speed: field(5),
        eta: field(6),
    })
}

/// 进度条：`━` 表示已完成，`░` 表示剩余。
pub fn render_bar(percent: u8, width: usize) -> String {
    let filled = width * usize::from(percent.min(100)) / 100;
    let mut out = String::with_capacity(width * 3);
    out.extend(std::iter::repeat_n('━', filled));
    out.extend(std::iter::repeat_n('░', width - filled));
    out
}

/// 时间节流器：间隔内只放行第一次，其余丢弃。
#[derive(Debug, Clone)]
pub struct ProgressThrottler {
    interval: Duration,
    last_emit: Option<Instant>,
}

impl ProgressThrottler {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_emit: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn should_emit(&mut self) -> bool {
        self.should_emit_at(Instant::now())
    }

    pub fn should_emit_at(&mut self, now: Instant) -> bool {
        let due = match self.last_emit {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        };
        if due {
            self.last_emit = Some(now);
        }
        due
    }

    pub fn reset(&mut self) {
        self.last_emit = None;
    }
}

impl Default for ProgressThrottler {
    fn default() -> Self {
        Self::new(PROGRESS_INTERVAL)
    }
}

/// 调用方注入的进度回调（例如更新状态消息）。
pub trait ProgressReporter: Send + Sync {
    fn report(&self, sample: &ProgressSample) -> impl Future<Output = anyhow::Result<()>> + Send;
}

/// 不关心进度时使用。
impl ProgressReporter for () {
    async fn report(&self, _sample: &ProgressSample) -> anyhow::Result<()> {
        Ok(())
    }
}

/// 把样本经节流后交给回调；回调失败或超时只记日志，不影响下载。
pub struct ProgressDispatcher<'a, R: ProgressReporter> {
    reporter: &'a R,
    throttler: ProgressThrottler,
}

impl<'a, R: ProgressReporter> ProgressDispatcher<'a, R> {
    pub fn new(reporter: &'a R, throttler: ProgressThrottler) -> Self {
        Self {
            reporter,
            throttler,
        }
    }

    /// 返回样本是否真的交给了回调。
    pub async fn offer(&mut self, sample: ProgressSample) -> bool {
        if !self.throttler.should_emit() {
            return false;
        }
        // 回调最多占用一个节流间隔，避免拖住 stderr 读取。
        match tokio::time::timeout(self.throttler.interval(), self.reporter.report(&sample)).await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!("进度更新失败: {e:#}"),
            Err(_) => tracing::debug!("进度更新超时，已跳过"),
        }
        true
    }
}
