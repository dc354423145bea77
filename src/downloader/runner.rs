use crate::downloader::command::DownloadCommand;
use crate::downloader::progress::{ProgressDispatcher, ProgressReporter, parse_progress};
use crate::logging::{self, LogLevel};
use std::future::Future;
use std::process::Stdio;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

/// 错误详情里保留的 stderr 最大字符数。
const MAX_DETAIL_CHARS: usize = 300;

#[derive(Debug, Error)]
pub enum RunError {
    #[error("启动 {program} 失败: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("读取 aria2c 输出失败: {0}")]
    Io(#[from] std::io::Error),

    #[error("aria2c 错误码: {}{}", code_text(.code), detail_text(.detail))]
    Exit {
        code: Option<i32>,
        detail: Option<String>,
    },
}

fn code_text(code: &Option<i32>) -> String {
    code.map(|c| c.to_string())
        .unwrap_or_else(|| "被信号终止".to_string())
}

fn detail_text(detail: &Option<String>) -> String {
    detail
        .as_deref()
        .map(|d| format!(" ({d})"))
        .unwrap_or_default()
}

/// 运行一次外部下载命令，并把进度交给 dispatcher。
pub trait ProcessRunner: Send + Sync {
    fn run<R: ProgressReporter>(
        &self,
        cmd: &DownloadCommand,
        progress: &mut ProgressDispatcher<'_, R>,
    ) -> impl Future<Output = Result<(), RunError>> + Send;
}

/// 真实的 aria2c 子进程执行器。
#[derive(Debug, Clone, Copy)]
pub struct Aria2Runner {
    log_level: LogLevel,
}

impl Aria2Runner {
    pub fn new(log_level: LogLevel) -> Self {
        Self { log_level }
    }
}

impl Default for Aria2Runner {
    fn default() -> Self {
        Self::new(LogLevel::Off)
    }
}

impl ProcessRunner for Aria2Runner {
    async fn run<R: ProgressReporter>(
        &self,
        cmd: &DownloadCommand,
        progress: &mut ProgressDispatcher<'_, R>,
    ) -> Result<(), RunError> {
        if self.log_level.command_enabled() {
            logging::downloader_command(&cmd.program, &cmd.args);
        }

        let mut child = Command::new(&cmd.program)
            .args(&cmd.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| RunError::Spawn {
                program: cmd.program.clone(),
                source,
            })?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| std::io::Error::other("stderr 未被捕获"))?;

        // 读 stderr 与等待退出并发进行；两者都结束才算本次尝试完成。
        let (status, drained) = tokio::join!(
            child.wait(),
            drain_stderr(stderr, progress, self.log_level.raw_enabled())
        );
        let status = status?;
        let last_error = drained?;

        if status.success() {
            tracing::info!("aria2c 下载成功完成");
            return Ok(());
        }
        tracing::error!("aria2c 异常退出 (code: {:?})", status.code());
        Err(RunError::Exit {
            code: status.code(),
            detail: last_error,
        })
    }
}

/// 逐行读取直到 EOF。aria2c 会用 `\r` 原地刷新进度，所以 `\r` 与 `\n` 都视为换行。
/// 返回最后一条非进度的输出，供错误信息使用。
async fn drain_stderr<S, R>(
    mut stream: S,
    progress: &mut ProgressDispatcher<'_, R>,
    echo_raw: bool,
) -> std::io::Result<Option<String>>
where
    S: AsyncRead + Unpin,
    R: ProgressReporter,
{
    let mut last_error: Option<String> = None;
    let mut pending: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        pending.extend_from_slice(&chunk[..n]);

        while let Some(pos) = pending.iter().position(|b| *b == b'\n' || *b == b'\r') {
            let line: Vec<u8> = pending.drain(..=pos).collect();
            handle_line(&line, progress, echo_raw, &mut last_error).await;
        }
    }
    if !pending.is_empty() {
        handle_line(&pending, progress, echo_raw, &mut last_error).await;
    }

    Ok(last_error)
}

async fn handle_line<R: ProgressReporter>(
    raw: &[u8],
    progress: &mut ProgressDispatcher<'_, R>,
    echo_raw: bool,
    last_error: &mut Option<String>,
) {
    let text = String::from_utf8_lossy(raw);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return;
    }
    // aria2c 的错误行会带上完整 URI（含 `?key=`）。
    let redacted = logging::redact_url_key(trimmed);
    let line = redacted.as_ref();
    if echo_raw {
        logging::downloader_stderr_raw(line);
    } else {
        tracing::debug!("aria2c stderr: {line}");
    }

    match parse_progress(line) {
        Some(sample) => {
            progress.offer(sample).await;
        }
        None => *last_error = Some(line.chars().take(MAX_DETAIL_CHARS).collect()),
    }
}
