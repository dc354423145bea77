use std::path::Path;

/// 单个分段的最小大小（aria2c `-k`）。
pub const MIN_SPLIT_SIZE: &str = "1M";

/// 一次尝试对远端呈现的"身份"：出口代理 + User-Agent。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    pub proxy: Option<String>,
    pub user_agent: Option<String>,
}

/// 待执行的外部下载命令。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl DownloadCommand {
    pub fn flag_value(&self, flag: &str) -> Option<&str> {
        let pos = self.args.iter().position(|a| a == flag)?;
        self.args.get(pos + 1).map(String::as_str)
    }
}

/// 构造 aria2c 命令行。输出路径拆为目录（`-d`）与文件名（`-o`）。
pub fn build_command(
    program: &str,
    url: &str,
    output_path: &Path,
    connections: u32,
    identity: &Identity,
    referer: Option<&str>,
) -> DownloadCommand {
    let output_dir = output_path
        .parent()
        .map(|p| p.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| ".".to_string());
    let output_file = output_path
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_default();
    let connections = connections.max(1).to_string();

    let mut args: Vec<String> = vec![
        "-x".into(),
        connections.clone(),
        "-s".into(),
        connections,
        "-k".into(),
        MIN_SPLIT_SIZE.into(),
        "--file-allocation=none".into(),
        "--console-log-level=error".into(),
        "--summary-interval=0".into(),
        "-d".into(),
        output_dir,
        "-o".into(),
        output_file,
        url.to_string(),
    ];

    if let Some(proxy) = identity.proxy.as_deref() {
        args.extend(["--all-proxy".to_string(), proxy.to_string()]);
    }
    if let Some(ua) = identity.user_agent.as_deref() {
        args.extend(["--user-agent".to_string(), ua.to_string()]);
    }
    if let Some(referer) = referer {
        args.extend(["--referer".to_string(), referer.to_string()]);
    }

    DownloadCommand {
        program: program.to_string(),
        args,
    }
}
