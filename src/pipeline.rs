//! 拉取流程：分享链接 → 文件信息 → 选账号 → 直链 → 下载 → 校验落盘 → 扣配额。

use crate::account::{Account, AccountPool};
use crate::config::Config;
use crate::downloader::{
    DownloadOptions, Downloader, ProcessRunner, ProgressReporter, is_rate_limited,
};
use crate::error::AppError;
use crate::hosting::{HostingClient, extract_file_id, split_custom_name};
use crate::logging::human_bytes;
use crate::proxy::ProxyPool;
use crate::util::id;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::OnceCell;

/// 一次成功拉取的结果。`path` 是落盘的临时文件，`file_name` 是展示用的最终文件名。
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub file_id: String,
    pub file_name: String,
    pub path: PathBuf,
    pub size: u64,
    pub account: Option<String>,
    pub attempts: usize,
}

pub struct FetchPipeline<P: ProcessRunner + Clone> {
    cfg: Arc<Config>,
    accounts: Arc<AccountPool>,
    hosting: HostingClient,
    runner: P,
    // 首次需要时初始化，之后各次拉取共享黑名单与游标。
    proxies: OnceCell<Arc<ProxyPool>>,
}

impl<P: ProcessRunner + Clone> FetchPipeline<P> {
    pub fn new(
        cfg: Arc<Config>,
        accounts: Arc<AccountPool>,
        hosting: HostingClient,
        runner: P,
    ) -> Self {
        Self {
            cfg,
            accounts,
            hosting,
            runner,
            proxies: OnceCell::new(),
        }
    }

    pub fn accounts(&self) -> &Arc<AccountPool> {
        &self.accounts
    }

    async fn proxy_pool(&self) -> Option<Arc<ProxyPool>> {
        if !self.cfg.use_proxy {
            return None;
        }
        let pool = self
            .proxies
            .get_or_init(|| async { Arc::new(ProxyPool::initialize(&self.cfg).await) })
            .await;
        Some(pool.clone())
    }

    /// 处理一条 `url` 或 `url|自定义文件名` 输入。
    pub async fn fetch<R: ProgressReporter>(
        &self,
        input: &str,
        reporter: &R,
    ) -> Result<FetchOutcome, AppError> {
        let (url, custom_name) = split_custom_name(input);
        let file_id = extract_file_id(url).ok_or_else(|| AppError::invalid_link(url))?;
        tracing::info!("文件 ID: {file_id}");

        // 先匿名查询文件信息，拿到大小后再决定用哪个账号。
        let info = self.hosting.file_info(&file_id, None).await;
        let size = info.as_ref().map(|i| i.size).unwrap_or(0);
        if size == 0 {
            tracing::warn!("未获取到文件大小，继续下载");
        } else {
            tracing::info!("文件大小: {}", human_bytes(size));
        }

        let account = self.pick_account(size).await?;
        let file_name = resolve_file_name(
            custom_name,
            info.as_ref().map(|i| i.name.as_str()),
            &file_id,
        );
        tracing::info!("最终文件名: {file_name}");

        let api_key = account.as_ref().map(|a| a.api_key.as_str());
        let url = self.hosting.direct_url(&file_id, api_key);
        tracing::info!("已生成下载直链（带账号: {}）", api_key.is_some());

        let output_path = temp_output_path(&self.cfg.download_dir, &file_id, &file_name);
        if let Some(dir) = output_path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }

        let options =
            DownloadOptions::from_config(&self.cfg, Some(referer_for(self.hosting.api_base())));
        let downloader = Downloader::new(self.runner.clone(), self.proxy_pool().await, options);
        let report = match downloader.download_file(&url, &output_path, reporter).await {
            Ok(report) => report,
            Err(e) => {
                if is_rate_limited(&e.to_string()) {
                    tracing::warn!("下载因限速失败，可稍后重试或开启代理");
                }
                discard_partial(&output_path).await;
                return Err(e.into());
            }
        };

        let on_disk = match tokio::fs::metadata(&output_path).await {
            Ok(meta) if meta.is_file() => meta.len(),
            _ => {
                return Err(AppError::MissingArtifact(
                    output_path.to_string_lossy().into_owned(),
                ));
            }
        };
        tracing::info!(
            "文件已下载: {} ({})",
            output_path.display(),
            human_bytes(on_disk)
        );

        // 按实际落盘大小扣减，而不是 API 报告的大小。
        if let Some(acc) = &account {
            self.accounts.mark_quota_used(&acc.api_key, on_disk).await;
        }

        Ok(FetchOutcome {
            file_id,
            file_name,
            path: output_path,
            size: on_disk,
            account: account.map(|a| a.label),
            attempts: report.attempts.len(),
        })
    }

    /// 大小未知时匿名下载；大小已知但没有账号够用时直接失败，不重试。
    async fn pick_account(&self, size: u64) -> Result<Option<Account>, AppError> {
        if size == 0 {
            return Ok(None);
        }
        match self.accounts.select_best_account(size).await {
            Some(acc) => {
                tracing::info!(
                    "选中账号 {}，剩余配额 {}",
                    acc.label,
                    human_bytes(acc.remaining_quota)
                );
                Ok(Some(acc))
            }
            None => Err(AppError::NoQuota { required: size }),
        }
    }
}

/// 自定义名 > 服务端原名 > `file_<id>`。
pub fn resolve_file_name(custom: Option<&str>, remote: Option<&str>, file_id: &str) -> String {
    custom
        .or(remote)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("file_{file_id}"))
}

/// 临时文件名：`file_<id>_<时间戳>_<随机>`，沿用最终文件名的扩展名。
pub fn temp_output_path(download_dir: &str, file_id: &str, file_name: &str) -> PathBuf {
    let ext = Path::new(file_name)
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    Path::new(download_dir).join(format!("file_{file_id}_{}{ext}", id::temp_suffix()))
}

/// aria2c 断点控制文件：`<输出路径>.aria2`。
fn control_file_path(output_path: &Path) -> PathBuf {
    let mut p = output_path.as_os_str().to_owned();
    p.push(".aria2");
    PathBuf::from(p)
}

/// 删除失败下载留下的半成品与控制文件；文件不存在不算错误。
async fn discard_partial(output_path: &Path) {
    for path in [output_path.to_path_buf(), control_file_path(output_path)] {
        match tokio::fs::remove_file(&path).await {
            Ok(()) => tracing::debug!("已清理残留文件: {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("清理残留文件失败 {}: {e}", path.display()),
        }
    }
}

/// API 根去掉 `/api` 后缀即站点首页，作为 Referer。
pub fn referer_for(api_base: &str) -> String {
    let base = api_base.trim_end_matches('/');
    let site = base.strip_suffix("/api").unwrap_or(base);
    format!("{site}/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::{DownloadCommand, ProgressDispatcher, RunError};

    #[test]
    fn file_name_priority() {
        assert_eq!(resolve_file_name(Some("a.mkv"), Some("b.mp4"), "x"), "a.mkv");
        assert_eq!(resolve_file_name(None, Some("b.mp4"), "x"), "b.mp4");
        assert_eq!(resolve_file_name(None, Some("  "), "x"), "file_x");
        assert_eq!(resolve_file_name(None, None, "x"), "file_x");
    }

    #[test]
    fn temp_path_keeps_extension() {
        let p = temp_output_path("/tmp/dl", "abc", "movie.mp4");
        let name = p.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("file_abc_"));
        assert!(name.ends_with(".mp4"));
        assert_eq!(p.parent(), Some(Path::new("/tmp/dl")));

        let bare = temp_output_path("d", "abc", "file_abc");
        assert!(bare.extension().is_none());
    }

    #[test]
    fn referer_is_site_root() {
        assert_eq!(referer_for("https://pixeldrain.com/api"), "https://pixeldrain.com/");
        assert_eq!(referer_for("https://pixeldrain.com/api/"), "https://pixeldrain.com/");
        assert_eq!(referer_for("http://mirror.local"), "http://mirror.local/");
    }

    /// 按 `-d`/`-o` 写出固定内容的假下载器。
    #[derive(Clone)]
    struct WriteFile(Option<&'static [u8]>);

    impl ProcessRunner for WriteFile {
        async fn run<R: ProgressReporter>(
            &self,
            cmd: &DownloadCommand,
            _progress: &mut ProgressDispatcher<'_, R>,
        ) -> Result<(), RunError> {
            if let Some(body) = self.0 {
                let dir = cmd.flag_value("-d").unwrap_or(".");
                let file = cmd.flag_value("-o").unwrap_or_default();
                tokio::fs::write(Path::new(dir).join(file), body).await?;
            }
            Ok(())
        }
    }

    /// 写出半成品与 `.aria2` 控制文件后以非零码退出。
    #[derive(Clone)]
    struct PartialThenFail;

    impl ProcessRunner for PartialThenFail {
        async fn run<R: ProgressReporter>(
            &self,
            cmd: &DownloadCommand,
            _progress: &mut ProgressDispatcher<'_, R>,
        ) -> Result<(), RunError> {
            let dir = cmd.flag_value("-d").unwrap_or(".");
            let file = cmd.flag_value("-o").unwrap_or_default();
            let output = Path::new(dir).join(file);
            tokio::fs::write(&output, b"half").await?;
            tokio::fs::write(control_file_path(&output), b"ctl").await?;
            Err(RunError::Exit {
                code: Some(3),
                detail: None,
            })
        }
    }

    fn pipeline<P: ProcessRunner + Clone>(runner: P, dir: &Path) -> FetchPipeline<P> {
        let cfg = Config {
            max_retries: 1,
            // 不可达的地址：文件信息查询立即失败，按大小未知处理。
            api_base: "http://127.0.0.1:9/api".to_string(),
            download_dir: dir.to_string_lossy().into_owned(),
            timeout_ms: 500,
            ..Config::default()
        };
        let hosting = HostingClient::new(&cfg).unwrap();
        let accounts = Arc::new(AccountPool::new(vec![Account::new("a", "k1", 100)]));
        FetchPipeline::new(Arc::new(cfg), accounts, hosting, runner)
    }

    fn scratch_dir(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("quotafetch_{tag}_{}", id::temp_suffix()))
    }

    #[tokio::test]
    async fn invalid_link_is_rejected_before_any_io() {
        let dir = scratch_dir("invalid");
        let p = pipeline(WriteFile(None), &dir);
        let err = p.fetch("https://example.com/nothing", &()).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidLink(_)));
    }

    #[tokio::test]
    async fn unknown_size_downloads_anonymously_and_charges_nothing() {
        let dir = scratch_dir("ok");
        let p = pipeline(WriteFile(Some(b"hello")), &dir);

        let out = p
            .fetch("https://pixeldrain.com/u/abc123|clip.mp4", &())
            .await
            .unwrap();

        assert_eq!(out.file_id, "abc123");
        assert_eq!(out.file_name, "clip.mp4");
        assert_eq!(out.size, 5);
        assert_eq!(out.account, None);
        assert_eq!(out.attempts, 1);
        assert!(out.path.starts_with(&dir));
        assert_eq!(p.accounts().get_all().await[0].remaining_quota, 100);

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn success_without_file_is_missing_artifact() {
        let dir = scratch_dir("missing");
        let p = pipeline(WriteFile(None), &dir);
        let err = p
            .fetch("https://pixeldrain.com/api/file/zz9", &())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::MissingArtifact(_)));
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn failed_download_leaves_no_partial_files() {
        let dir = scratch_dir("partial");
        let p = pipeline(PartialThenFail, &dir);
        let err = p
            .fetch("https://pixeldrain.com/u/part1", &())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Download(_)));

        let mut entries = tokio::fs::read_dir(&dir).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[test]
    fn control_file_sits_next_to_output() {
        assert_eq!(
            control_file_path(Path::new("/d/file_a_1.mp4")),
            PathBuf::from("/d/file_a_1.mp4.aria2")
        );
    }

    #[tokio::test]
    async fn known_size_without_quota_is_no_quota() {
        let dir = scratch_dir("noquota");
        let p = pipeline(WriteFile(None), &dir);
        let err = p.pick_account(1_000).await.unwrap_err();
        assert!(matches!(err, AppError::NoQuota { required: 1_000 }));

        let acc = p.pick_account(50).await.unwrap().unwrap();
        assert_eq!(acc.api_key, "k1");
        assert_eq!(p.pick_account(0).await.unwrap().map(|a| a.label), None);
    }
}
