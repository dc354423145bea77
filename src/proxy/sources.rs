//! 免费代理来源拉取与代理可用性探测。

use futures::{StreamExt, stream};
use std::time::Duration;

/// 单次从免费来源拉取的代理上限。
pub const FREE_PROXY_LIMIT: usize = 10;
pub const SOURCE_TIMEOUT: Duration = Duration::from_secs(10);

/// 依次查询每个来源，凑够 `limit` 个即停止。来源失败只记日志。
pub async fn fetch_free_proxies(sources: &[String], limit: usize, timeout: Duration) -> Vec<String> {
    let http = match reqwest::Client::builder().timeout(timeout).build() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("构建代理来源 HTTP 客户端失败: {e}");
            return Vec::new();
        }
    };

    let mut out: Vec<String> = Vec::new();
    for source in sources {
        if out.len() >= limit {
            break;
        }
        let text = match fetch_text(&http, source).await {
            Ok(t) => t,
            Err(e) => {
                tracing::debug!("代理来源出错 ({source}): {e:#}");
                continue;
            }
        };
        out.extend(parse_proxy_list(&text, limit - out.len()));
    }
    out.truncate(limit);
    out
}

async fn fetch_text(http: &reqwest::Client, url: &str) -> anyhow::Result<String> {
    let resp = http.get(url).send().await?;
    let status = resp.status();
    if !status.is_success() {
        anyhow::bail!("HTTP {status}");
    }
    Ok(resp.text().await?)
}

/// 每行一个 `host:port`；缺少协议前缀的补上 `http://`。
pub fn parse_proxy_list(text: &str, limit: usize) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && line.contains(':'))
        .map(|line| {
            if line.starts_with("http") || line.starts_with("socks") {
                line.to_string()
            } else {
                format!("http://{line}")
            }
        })
        .take(limit)
        .collect()
}

/// 通过代理请求 `url`，只有成功状态码才算可用；任何错误都视为不可用。
pub async fn test_proxy(proxy: &str, url: &str, timeout: Duration) -> bool {
    let client = match reqwest::Proxy::all(proxy)
        .and_then(|p| reqwest::Client::builder().proxy(p).timeout(timeout).build())
    {
        Ok(c) => c,
        Err(e) => {
            tracing::debug!("代理测试出错 ({proxy}): {e}");
            return false;
        }
    };

    match client.get(url).send().await {
        Ok(resp) if resp.status().is_success() => {
            tracing::info!("代理可用: {proxy}");
            true
        }
        Ok(resp) => {
            tracing::debug!("代理测试失败 ({proxy}): HTTP {}", resp.status());
            false
        }
        Err(e) => {
            tracing::debug!("代理测试出错 ({proxy}): {e}");
            false
        }
    }
}

/// 并发测试一组代理，返回不可用的那些。
pub async fn find_unhealthy(
    proxies: Vec<String>,
    url: &str,
    timeout: Duration,
    concurrency: usize,
) -> Vec<String> {
    stream::iter(proxies)
        .map(|proxy| async move {
            let ok = test_proxy(&proxy, url, timeout).await;
            (proxy, ok)
        })
        .buffer_unordered(concurrency.max(1))
        .filter_map(|(proxy, ok)| async move { (!ok).then_some(proxy) })
        .collect()
        .await
}
