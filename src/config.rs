use figment::Figment;
use figment::providers::Env;
use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_DATA_DIR: &str = "./data";
const DEFAULT_DOWNLOAD_DIR: &str = "./downloads";
const DEFAULT_API_BASE: &str = "https://pixeldrain.com/api";
const DEFAULT_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_QUOTA_GB: u64 = 6;
const DEFAULT_ARIA2C_PATH: &str = "aria2c";
const DEFAULT_CONNECTIONS: u32 = 16;
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_QUOTA_REFRESH_MINUTES: u64 = 10;
const DEFAULT_PROXY_TEST_URL: &str = "http://www.google.com";

pub const DEFAULT_PROXY_SOURCES: [&str; 2] = [
    "https://api.proxyscrape.com/v2/?request=get&protocol=http&timeout=10000&country=all&ssl=all&anonymity=all",
    "https://www.proxy-list.download/api/v1/get?type=http",
];

pub const GIB: u64 = 1024 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: String,
    pub download_dir: String,
    pub api_base: String,
    pub timeout_ms: u64,

    /// 账号名单：`label:api_key` 逗号分隔。
    pub accounts: String,
    pub default_quota_bytes: u64,

    pub use_proxy: bool,
    pub proxy_list: Vec<String>,
    pub auto_proxy: bool,
    pub proxy_sources: Vec<String>,
    pub proxy_test_url: String,
    /// 初始化后先探测一遍代理池，拉黑不可用的条目。
    pub proxy_precheck: bool,

    pub aria2c_path: String,
    pub aria2c_connections: u32,
    pub max_retries: u32,

    /// 0 表示关闭后台配额刷新。
    pub quota_refresh_minutes: u64,

    pub debug: String,
}

#[derive(Debug, Default, Deserialize)]
struct RawEnv {
    #[serde(alias = "DATA_DIR", default, deserialize_with = "lenient_text")]
    data_dir: Option<String>,
    #[serde(alias = "DOWNLOAD_DIR", default, deserialize_with = "lenient_text")]
    download_dir: Option<String>,
    #[serde(alias = "API_BASE", default, deserialize_with = "lenient_text")]
    api_base: Option<String>,
    #[serde(alias = "TIMEOUT")]
    timeout: Option<u64>,

    #[serde(alias = "ACCOUNTS", default, deserialize_with = "lenient_text")]
    accounts: Option<String>,
    #[serde(alias = "DEFAULT_QUOTA_GB")]
    default_quota_gb: Option<u64>,

    #[serde(alias = "USE_PROXY", default, deserialize_with = "lenient_text")]
    use_proxy: Option<String>,
    #[serde(alias = "PROXY_LIST", default, deserialize_with = "lenient_text")]
    proxy_list: Option<String>,
    #[serde(alias = "AUTO_PROXY", default, deserialize_with = "lenient_text")]
    auto_proxy: Option<String>,
    #[serde(alias = "PROXY_SOURCES", default, deserialize_with = "lenient_text")]
    proxy_sources: Option<String>,
    #[serde(alias = "PROXY_TEST_URL", default, deserialize_with = "lenient_text")]
    proxy_test_url: Option<String>,
    #[serde(alias = "PROXY_PRECHECK", default, deserialize_with = "lenient_text")]
    proxy_precheck: Option<String>,

    #[serde(alias = "ARIA2C_PATH", default, deserialize_with = "lenient_text")]
    aria2c_path: Option<String>,
    #[serde(alias = "ARIA2C_CONNECTIONS")]
    aria2c_connections: Option<u32>,
    #[serde(alias = "MAX_RETRIES")]
    max_retries: Option<u32>,

    #[serde(alias = "QUOTA_REFRESH_MINUTES")]
    quota_refresh_minutes: Option<u64>,

    #[serde(alias = "DEBUG", default, deserialize_with = "lenient_text")]
    debug: Option<String>,
}

impl Config {
    pub fn load() -> Self {
        load_dotenv();

        let mut cfg = Self::from_env();

        // 命令行覆盖：-debug <level>
        let mut args = std::env::args().skip(1);
        while let Some(arg) = args.next() {
            if arg == "-debug"
                && let Some(v) = args.next()
            {
                cfg.debug = v;
            }
        }

        cfg
    }

    /// 只读进程环境变量；提取失败时告警并退回默认值。
    fn from_env() -> Self {
        let raw = match Figment::from(Env::raw()).extract::<RawEnv>() {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!("解析环境变量配置失败，使用默认配置: {e}");
                RawEnv::default()
            }
        };
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawEnv) -> Self {
        let proxy_sources = parse_list(raw.proxy_sources.as_deref());
        Self {
            data_dir: raw.data_dir.unwrap_or_else(|| DEFAULT_DATA_DIR.to_string()),
            download_dir: raw
                .download_dir
                .unwrap_or_else(|| DEFAULT_DOWNLOAD_DIR.to_string()),
            api_base: raw
                .api_base
                .map(|s| s.trim().trim_end_matches('/').to_string())
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            timeout_ms: raw.timeout.unwrap_or(DEFAULT_TIMEOUT_MS),
            accounts: raw.accounts.unwrap_or_default(),
            default_quota_bytes: raw.default_quota_gb.unwrap_or(DEFAULT_QUOTA_GB) * GIB,
            use_proxy: parse_bool(raw.use_proxy.as_deref()).unwrap_or(false),
            proxy_list: parse_list(raw.proxy_list.as_deref()),
            auto_proxy: parse_bool(raw.auto_proxy.as_deref()).unwrap_or(true),
            proxy_sources: if proxy_sources.is_empty() {
                DEFAULT_PROXY_SOURCES.iter().map(|s| s.to_string()).collect()
            } else {
                proxy_sources
            },
            proxy_test_url: raw
                .proxy_test_url
                .unwrap_or_else(|| DEFAULT_PROXY_TEST_URL.to_string()),
            proxy_precheck: parse_bool(raw.proxy_precheck.as_deref()).unwrap_or(false),
            aria2c_path: raw
                .aria2c_path
                .unwrap_or_else(|| DEFAULT_ARIA2C_PATH.to_string()),
            aria2c_connections: raw
                .aria2c_connections
                .unwrap_or(DEFAULT_CONNECTIONS)
                .clamp(1, 16),
            max_retries: raw.max_retries.unwrap_or(DEFAULT_MAX_RETRIES).max(1),
            quota_refresh_minutes: raw
                .quota_refresh_minutes
                .unwrap_or(DEFAULT_QUOTA_REFRESH_MINUTES),
            debug: raw.debug.unwrap_or_else(|| "off".to_string()),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.max(1))
    }

    pub fn accounts_file(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join("accounts.json")
    }

    pub fn log_level(&self) -> crate::logging::LogLevel {
        crate::logging::LogLevel::parse(&self.debug)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_raw(RawEnv::default())
    }
}

/// figment 会把 `true`/`1` 之类的值解析成布尔或数字；文本字段统一收回成字符串。
fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Text {
        Bool(bool),
        Int(i64),
        UInt(u64),
        Float(f64),
        Str(String),
    }

    Ok(Option::<Text>::deserialize(deserializer)?.map(|t| match t {
        Text::Bool(b) => b.to_string(),
        Text::Int(i) => i.to_string(),
        Text::UInt(u) => u.to_string(),
        Text::Float(f) => f.to_string(),
        Text::Str(s) => s,
    }))
}

fn parse_bool(value: Option<&str>) -> Option<bool> {
    match value?.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// 逗号/换行分隔的列表，去掉空白项。
fn parse_list(value: Option<&str>) -> Vec<String> {
    let Some(value) = value else {
        return Vec::new();
    };
    value
        .split([',', '\n'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn load_dotenv() {
    let Some(dotenv_path) = find_dotenv_path() else {
        return;
    };

    let Ok(file) = std::fs::File::open(&dotenv_path) else {
        return;
    };

    let reader = std::io::BufReader::new(file);
    for line in std::io::BufRead::lines(reader).map_while(Result::ok) {
        let Some((key, value)) = parse_dotenv_line(&line) else {
            continue;
        };
        // 已存在的环境变量优先于 .env。
        if std::env::var_os(&key).is_some() {
            continue;
        }
        // Rust 2024：修改进程环境变量为 unsafe；这里只在启动阶段单线程调用。
        unsafe {
            std::env::set_var(key, value);
        }
    }
}

fn find_dotenv_path() -> Option<PathBuf> {
    let cwd = std::env::current_dir().ok()?;
    let mut dir: &Path = cwd.as_path();

    loop {
        let candidate = dir.join(".env");
        if candidate.is_file() {
            return Some(candidate);
        }

        // 不跨越仓库根目录：发现 Cargo.toml 或 .git 即停止向上寻找。
        if dir.join("Cargo.toml").is_file() || dir.join(".git").is_dir() {
            return None;
        }

        let parent = dir.parent()?;
        if parent == dir {
            break;
        }
        dir = parent;
    }

    None
}

fn parse_dotenv_line(line: &str) -> Option<(String, String)> {
    let mut line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    if let Some(rest) = line.strip_prefix("export ") {
        line = rest.trim_start();
    }

    let (key, raw) = line.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }

    let raw = raw.trim();
    let bytes = raw.as_bytes();
    if bytes.len() >= 2 {
        let first = bytes[0];
        let last = bytes[bytes.len() - 1];
        if (first == b'"' && last == b'"') || (first == b'\'' && last == b'\'') {
            return Some((key.to_string(), raw[1..raw.len() - 1].to_string()));
        }
    }

    Some((key.to_string(), strip_inline_comment(raw).trim().to_string()))
}

fn strip_inline_comment(value: &str) -> &str {
    let bytes = value.as_bytes();
    for i in 0..bytes.len() {
        if bytes[i] != b'#' {
            continue;
        }
        if i == 0 || bytes[i - 1] == b' ' || bytes[i - 1] == b'\t' {
            return value[..i].trim_end();
        }
    }
    value
}
