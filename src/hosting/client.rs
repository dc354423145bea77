use crate::config::Config;
use crate::hosting::types::{FileInfo, UserLimits};
use crate::logging::{self, LogLevel};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use std::time::{Duration, Instant};
use thiserror::Error;

const CLIENT_USER_AGENT: &str = "Mozilla/5.0";

#[derive(Debug, Error)]
pub enum HostingError {
    #[error("托管服务 API 错误 {status}: {message}")]
    Http { status: u16, message: String },

    #[error(transparent)]
    Transport(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] sonic_rs::Error),
}

impl HostingError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// 托管服务 Web API 的最小客户端：文件信息、账号限额、直链。
#[derive(Debug, Clone)]
pub struct HostingClient {
    http: reqwest::Client,
    api_base: String,
    log_level: LogLevel,
}

impl HostingClient {
    pub fn new(cfg: &Config) -> Result<Self, anyhow::Error> {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(90))
            .timeout(cfg.timeout())
            .build()?;
        Ok(Self {
            http,
            api_base: cfg.api_base.clone(),
            log_level: cfg.log_level(),
        })
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    /// 直链：带 key 时走账号配额，否则匿名下载。
    pub fn direct_url(&self, file_id: &str, api_key: Option<&str>) -> String {
        let id = urlencoding::encode(file_id);
        match api_key.map(str::trim).filter(|k| !k.is_empty()) {
            Some(key) => format!(
                "{}/file/{id}?key={}",
                self.api_base,
                urlencoding::encode(key)
            ),
            None => format!("{}/file/{id}", self.api_base),
        }
    }

    /// 查询文件名与大小。任何失败都降级为 None，调用方按大小 0 继续。
    pub async fn file_info(&self, file_id: &str, api_key: Option<&str>) -> Option<FileInfo> {
        let url = format!("{}/file/{}/info", self.api_base, urlencoding::encode(file_id));
        match self.get_json::<FileInfo>(&url, api_key).await {
            Ok(info) => {
                tracing::info!(
                    "文件信息: {} ({} 字节)",
                    if info.name.is_empty() { "N/A" } else { &info.name },
                    info.size
                );
                Some(info)
            }
            Err(e) => {
                match e.status() {
                    Some(status) => tracing::warn!("获取文件信息失败: HTTP {status}"),
                    None => tracing::error!("获取文件信息出错: {e}"),
                }
                None
            }
        }
    }

    /// 查询账号带宽限额。
    pub async fn fetch_limits(&self, api_key: &str) -> Result<UserLimits, HostingError> {
        let url = format!("{}/user/limits", self.api_base);
        self.get_json::<UserLimits>(&url, Some(api_key)).await
    }

    fn build_headers(&self, api_key: Option<&str>) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(USER_AGENT, HeaderValue::from_static(CLIENT_USER_AGENT));
        if let Some(key) = api_key.map(str::trim).filter(|k| !k.is_empty()) {
            if let Ok(v) = HeaderValue::from_str(&basic_auth(key)) {
                h.insert(AUTHORIZATION, v);
            }
        }
        h
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        api_key: Option<&str>,
    ) -> Result<T, HostingError> {
        let headers = self.build_headers(api_key);
        if self.log_level.backend_enabled() {
            logging::backend_request("GET", url, &headers);
        }

        let start = Instant::now();
        let resp = self.http.get(url).headers(headers).send().await?;
        let status = resp.status();
        let bytes = resp.bytes().await?;
        if self.log_level.backend_enabled() {
            logging::backend_response(status.as_u16(), start.elapsed(), &bytes);
        }
        if !status.is_success() {
            return Err(HostingError::Http {
                status: status.as_u16(),
                message: String::from_utf8_lossy(&bytes).trim().to_string(),
            });
        }
        Ok(sonic_rs::from_slice::<T>(&bytes)?)
    }
}

impl crate::account::QuotaSource for HostingClient {
    async fn remaining_quota(&self, api_key: &str) -> anyhow::Result<u64> {
        Ok(self.fetch_limits(api_key).await?.remaining())
    }
}

/// Basic 认证：用户名为空，密码为 API key。
pub fn basic_auth(api_key: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!(":{api_key}")))
}

/// 从分享链接中提取文件 ID。支持 `/u/<id>` 与 `/api/file/<id>` 两种格式。
pub fn extract_file_id(url: &str) -> Option<String> {
    for marker in ["/u/", "/api/file/"] {
        let Some(idx) = url.find(marker) else {
            continue;
        };
        let id: String = url[idx + marker.len()..]
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        if !id.is_empty() {
            return Some(id);
        }
    }
    None
}

/// 拆分 `url|自定义文件名` 输入。
pub fn split_custom_name(input: &str) -> (&str, Option<&str>) {
    match input.split_once('|') {
        Some((url, name)) => {
            let name = name.trim();
            (url.trim(), (!name.is_empty()).then_some(name))
        }
        None => (input.trim(), None),
    }
}
