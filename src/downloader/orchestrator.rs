use crate::config::Config;
use crate::downloader::command::{DownloadCommand, Identity, build_command};
use crate::downloader::progress::{
    PROGRESS_INTERVAL, ProgressDispatcher, ProgressReporter, ProgressThrottler,
};
use crate::downloader::runner::ProcessRunner;
use crate::proxy::ProxyPool;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// 重试策略：限速失败与普通失败使用不同的等待时间。
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub rate_limit_backoff: Duration,
    pub retry_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            rate_limit_backoff: Duration::from_secs(2),
            retry_backoff: Duration::from_secs(3),
        }
    }
}

impl RetryPolicy {
    /// 第 `attempt` 次（从 1 开始）失败后应等待多久；None 表示不再等待。
    pub fn backoff_after(&self, attempt: u32, error: &str) -> Option<Duration> {
        if is_rate_limited(error) {
            return Some(self.rate_limit_backoff);
        }
        (attempt < self.max_retries).then_some(self.retry_backoff)
    }
}

/// 限速判定：包含 "429" 或（不区分大小写）"limit"。
///
/// 这是启发式判断，"connection limit exceeded" 之类无关错误也会命中。
pub fn is_rate_limited(error: &str) -> bool {
    error.contains("429") || error.to_lowercase().contains("limit")
}

#[derive(Debug, Clone)]
pub struct DownloadOptions {
    pub program: String,
    pub connections: u32,
    pub use_proxy: bool,
    pub referer: Option<String>,
    pub retry: RetryPolicy,
    pub progress_interval: Duration,
}

impl DownloadOptions {
    pub fn from_config(cfg: &Config, referer: Option<String>) -> Self {
        Self {
            program: cfg.aria2c_path.clone(),
            connections: cfg.aria2c_connections,
            use_proxy: cfg.use_proxy,
            referer,
            retry: RetryPolicy {
                max_retries: cfg.max_retries,
                ..RetryPolicy::default()
            },
            progress_interval: PROGRESS_INTERVAL,
        }
    }
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            program: "aria2c".to_string(),
            connections: 16,
            use_proxy: false,
            referer: None,
            retry: RetryPolicy::default(),
            progress_interval: PROGRESS_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    Failed(String),
}

/// 一次重试迭代的记录。
#[derive(Debug, Clone)]
pub struct DownloadAttempt {
    pub number: u32,
    pub identity: Identity,
    pub started_at: DateTime<Utc>,
    pub outcome: AttemptOutcome,
}

#[derive(Debug, Clone)]
pub struct DownloadReport {
    pub output_path: PathBuf,
    pub attempts: Vec<DownloadAttempt>,
}

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("已达到最大重试次数（共 {} 次尝试）: {last_error}", .attempts.len())]
    RetriesExhausted {
        attempts: Vec<DownloadAttempt>,
        last_error: String,
    },
}

impl DownloadError {
    pub fn attempts(&self) -> &[DownloadAttempt] {
        match self {
            Self::RetriesExhausted { attempts, .. } => attempts,
        }
    }
}

/// 下载编排器：每次尝试换代理与 UA，驱动外部下载器，失败时轮换并重试。
///
/// 自身不持有长期状态；代理池由调用方共享传入。
pub struct Downloader<P: ProcessRunner> {
    runner: P,
    proxy_pool: Option<Arc<ProxyPool>>,
    options: DownloadOptions,
}

impl<P: ProcessRunner> Downloader<P> {
    pub fn new(runner: P, proxy_pool: Option<Arc<ProxyPool>>, options: DownloadOptions) -> Self {
        Self {
            runner,
            proxy_pool,
            options,
        }
    }

    pub fn options(&self) -> &DownloadOptions {
        &self.options
    }

    async fn next_identity(&self, attempt: u32) -> Identity {
        let max = self.options.retry.max_retries;
        let Some(pool) = self.proxy_pool.as_deref() else {
            return Identity::default();
        };

        let proxy = if self.options.use_proxy {
            let p = pool.get_next_proxy().await;
            match &p {
                Some(proxy) => tracing::info!("尝试 {attempt}/{max}: 使用代理 {proxy}"),
                None => tracing::warn!("尝试 {attempt}/{max}: 没有可用代理，直接连接"),
            }
            p
        } else {
            None
        };

        Identity {
            proxy,
            user_agent: Some(pool.random_user_agent()),
        }
    }

    fn command_for(&self, url: &str, output_path: &Path, identity: &Identity) -> DownloadCommand {
        build_command(
            &self.options.program,
            url,
            output_path,
            self.options.connections,
            identity,
            self.options.referer.as_deref(),
        )
    }

    /// 下载到 `output_path`。成功时返回每次尝试的记录；重试耗尽时返回错误。
    pub async fn download_file<R: ProgressReporter>(
        &self,
        url: &str,
        output_path: &Path,
        reporter: &R,
    ) -> Result<DownloadReport, DownloadError> {
        let policy = &self.options.retry;
        let max = policy.max_retries.max(1);
        let mut dispatcher =
            ProgressDispatcher::new(reporter, ProgressThrottler::new(self.options.progress_interval));
        let mut attempts: Vec<DownloadAttempt> = Vec::with_capacity(max as usize);
        let mut last_error = String::new();

        for attempt in 1..=max {
            let identity = self.next_identity(attempt).await;
            let cmd = self.command_for(url, output_path, &identity);
            let started_at = Utc::now();

            let result = self.runner.run(&cmd, &mut dispatcher).await;

            let error = match result {
                Ok(()) => {
                    tracing::info!("下载成功（第 {attempt} 次尝试）");
                    attempts.push(DownloadAttempt {
                        number: attempt,
                        identity,
                        started_at,
                        outcome: AttemptOutcome::Success,
                    });
                    return Ok(DownloadReport {
                        output_path: output_path.to_path_buf(),
                        attempts,
                    });
                }
                Err(e) => e.to_string(),
            };

            tracing::warn!("aria2c 失败（第 {attempt}/{max} 次）: {error}");
            if let (Some(pool), Some(proxy)) = (self.proxy_pool.as_deref(), &identity.proxy) {
                pool.mark_failed(proxy).await;
            }

            attempts.push(DownloadAttempt {
                number: attempt,
                identity,
                started_at,
                outcome: AttemptOutcome::Failed(error.clone()),
            });

            let backoff = policy.backoff_after(attempt, &error);
            if is_rate_limited(&error) {
                tracing::warn!("检测到限速，换代理重试");
            }
            last_error = error;
            if let Some(d) = backoff
                && !d.is_zero()
            {
                tokio::time::sleep(d).await;
            }
        }

        Err(DownloadError::RetriesExhausted {
            attempts,
            last_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::progress::{ProgressSample, parse_progress};
    use crate::downloader::runner::RunError;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// 按脚本返回结果的假执行器，并记录每次收到的命令。
    struct Scripted {
        results: Mutex<VecDeque<Result<(), RunError>>>,
        commands: Mutex<Vec<DownloadCommand>>,
        progress_lines: Vec<&'static str>,
    }

    impl Scripted {
        fn new(results: Vec<Result<(), RunError>>) -> Self {
            Self {
                results: Mutex::new(results.into()),
                commands: Mutex::new(Vec::new()),
                progress_lines: Vec::new(),
            }
        }

        fn commands(&self) -> Vec<DownloadCommand> {
            self.commands.lock().unwrap().clone()
        }
    }

    fn exit(code: i32, detail: Option<&str>) -> Result<(), RunError> {
        Err(RunError::Exit {
            code: Some(code),
            detail: detail.map(str::to_string),
        })
    }

    impl ProcessRunner for Scripted {
        async fn run<R: ProgressReporter>(
            &self,
            cmd: &DownloadCommand,
            progress: &mut ProgressDispatcher<'_, R>,
        ) -> Result<(), RunError> {
            self.commands.lock().unwrap().push(cmd.clone());
            for line in &self.progress_lines {
                if let Some(sample) = parse_progress(line) {
                    progress.offer(sample).await;
                }
            }
            self.results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| exit(1, None))
        }
    }

    fn fast_options(use_proxy: bool) -> DownloadOptions {
        DownloadOptions {
            use_proxy,
            referer: Some("https://pixeldrain.com/".to_string()),
            retry: RetryPolicy {
                max_retries: 3,
                rate_limit_backoff: Duration::ZERO,
                retry_backoff: Duration::ZERO,
            },
            ..DownloadOptions::default()
        }
    }

    fn pool() -> Arc<ProxyPool> {
        Arc::new(ProxyPool::new(["http://a:1", "http://b:2", "http://c:3"]))
    }

    #[tokio::test]
    async fn always_failing_process_exhausts_retries() {
        let runner = Scripted::new(vec![exit(1, None), exit(1, None), exit(1, None)]);
        let pool = pool();
        let d = Downloader::new(runner, Some(pool.clone()), fast_options(true));

        let err = d
            .download_file("https://h/f", Path::new("/tmp/x/f.bin"), &())
            .await
            .unwrap_err();

        assert!(matches!(err, DownloadError::RetriesExhausted { .. }));
        assert!(err.to_string().contains("最大重试次数"));
        assert_eq!(err.attempts().len(), 3);

        let proxies: Vec<_> = d
            .runner
            .commands()
            .iter()
            .map(|c| c.flag_value("--all-proxy").map(str::to_string))
            .collect();
        assert_eq!(
            proxies,
            vec![
                Some("http://a:1".to_string()),
                Some("http://b:2".to_string()),
                Some("http://c:3".to_string())
            ]
        );
        // 每次失败都拉黑了所用代理。
        assert_eq!(pool.failed_count().await, 3);
    }

    #[tokio::test]
    async fn success_stops_retrying() {
        let runner = Scripted::new(vec![exit(1, None), Ok(())]);
        let d = Downloader::new(runner, Some(pool()), fast_options(true));

        let report = d
            .download_file("https://h/f", Path::new("/tmp/x/f.bin"), &())
            .await
            .unwrap();

        assert_eq!(report.attempts.len(), 2);
        assert_eq!(report.attempts[1].outcome, AttemptOutcome::Success);
        assert_eq!(d.runner.commands().len(), 2);
        assert_eq!(report.output_path, PathBuf::from("/tmp/x/f.bin"));
    }

    #[tokio::test]
    async fn rate_limit_retries_with_a_different_proxy() {
        let runner = Scripted::new(vec![
            exit(22, Some("HTTP 429 Too Many Requests")),
            Ok(()),
        ]);
        let pool = pool();
        let d = Downloader::new(runner, Some(pool.clone()), fast_options(true));

        d.download_file("https://h/f", Path::new("f.bin"), &())
            .await
            .unwrap();

        let cmds = d.runner.commands();
        let first = cmds[0].flag_value("--all-proxy").unwrap();
        let second = cmds[1].flag_value("--all-proxy").unwrap();
        assert_ne!(first, second);
        assert_eq!(pool.failed_count().await, 1);
    }

    #[test]
    fn rate_limit_uses_distinct_shorter_backoff() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.backoff_after(1, "aria2c 错误码: 22 (status=429)"),
            Some(Duration::from_secs(2))
        );
        assert_eq!(
            policy.backoff_after(1, "Bandwidth LIMIT reached"),
            Some(Duration::from_secs(2))
        );
        assert_eq!(
            policy.backoff_after(1, "aria2c 错误码: 1"),
            Some(Duration::from_secs(3))
        );
        assert_eq!(policy.backoff_after(3, "aria2c 错误码: 1"), None);
        // 最后一次尝试仍按限速分支等待。
        assert_eq!(
            policy.backoff_after(policy.max_retries, "HTTP 429"),
            Some(Duration::from_secs(2))
        );
        assert!(policy.rate_limit_backoff < policy.retry_backoff);
    }

    #[test]
    fn rate_limit_heuristic_is_permissive() {
        assert!(is_rate_limited("HTTP 429"));
        assert!(is_rate_limited("connection limit exceeded"));
        assert!(!is_rate_limited("aria2c 错误码: 3"));
    }

    #[tokio::test]
    async fn proxy_disabled_goes_direct_but_still_rotates_user_agent() {
        let runner = Scripted::new(vec![Ok(())]);
        let d = Downloader::new(runner, Some(pool()), fast_options(false));
        d.download_file("https://h/f", Path::new("f.bin"), &())
            .await
            .unwrap();

        let cmd = &d.runner.commands()[0];
        assert_eq!(cmd.flag_value("--all-proxy"), None);
        assert!(cmd.flag_value("--user-agent").is_some());
        assert_eq!(cmd.flag_value("--referer"), Some("https://pixeldrain.com/"));
    }

    #[tokio::test]
    async fn no_pool_means_no_identity_flags() {
        let runner = Scripted::new(vec![Ok(())]);
        let d = Downloader::new(runner, None, fast_options(true));
        d.download_file("https://h/f", Path::new("f.bin"), &())
            .await
            .unwrap();

        let cmd = &d.runner.commands()[0];
        assert_eq!(cmd.flag_value("--all-proxy"), None);
        assert_eq!(cmd.flag_value("--user-agent"), None);
    }

    #[tokio::test]
    async fn empty_proxy_pool_proceeds_direct() {
        let runner = Scripted::new(vec![Ok(())]);
        let d = Downloader::new(runner, Some(Arc::new(ProxyPool::default())), fast_options(true));
        let report = d
            .download_file("https://h/f", Path::new("f.bin"), &())
            .await
            .unwrap();
        assert_eq!(report.attempts[0].identity.proxy, None);
    }

    struct Counting(AtomicUsize);

    impl ProgressReporter for Counting {
        async fn report(&self, _sample: &ProgressSample) -> anyhow::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn progress_is_throttled_across_the_whole_call() {
        let mut runner = Scripted::new(vec![exit(1, None), Ok(())]);
        runner.progress_lines = vec![
            "[#1 SIZE:1MiB/4MiB(25%) CN:2 DL:1MiB ETA:3s]",
            "[#1 SIZE:2MiB/4MiB(50%) CN:2 DL:1MiB ETA:2s]",
        ];
        let d = Downloader::new(runner, None, fast_options(false));
        let reporter = Counting(AtomicUsize::new(0));

        d.download_file("https://h/f", Path::new("f.bin"), &reporter)
            .await
            .unwrap();

        // 4 个样本都在 2 秒内到达，只有第一个被回调。
        assert_eq!(reporter.0.load(Ordering::SeqCst), 1);
    }
}
