use crate::config::Config;
use crate::proxy::sources::{self, FREE_PROXY_LIMIT, SOURCE_TIMEOUT};
use crate::proxy::user_agent;
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::Mutex;

const PRECHECK_TIMEOUT: Duration = Duration::from_secs(10);
const PRECHECK_CONCURRENCY: usize = 8;

/// 代理池：有序环 + 游标 + 失败黑名单。
///
/// 游标在每次检查条目时都前进（不只是命中时），所以连续调用总能沿环推进；
/// 黑名单覆盖整个池时会被清空，轮换永远不会卡死。
#[derive(Debug, Default)]
pub struct ProxyPool {
    state: Mutex<State>,
}

#[derive(Debug, Default)]
struct State {
    pool: Vec<String>,
    next_index: usize,
    failed: HashSet<String>,
}

impl State {
    fn push_unique(&mut self, proxy: &str) -> bool {
        let proxy = proxy.trim();
        if proxy.is_empty() || self.pool.iter().any(|p| p == proxy) {
            return false;
        }
        self.pool.push(proxy.to_string());
        true
    }
}

impl ProxyPool {
    pub fn new<I, S>(proxies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut state = State::default();
        for p in proxies {
            state.push_unique(p.as_ref());
        }
        Self {
            state: Mutex::new(state),
        }
    }

    /// 手动列表 + （可选）免费代理来源。来源失败不会中断初始化。
    pub async fn initialize(cfg: &Config) -> Self {
        let pool = Self::new(&cfg.proxy_list);
        let manual = pool.len().await;
        if manual > 0 {
            tracing::info!("已添加 {manual} 个手动代理");
        }

        if cfg.auto_proxy {
            let fetched =
                sources::fetch_free_proxies(&cfg.proxy_sources, FREE_PROXY_LIMIT, SOURCE_TIMEOUT)
                    .await;
            let added = pool.extend(fetched).await;
            tracing::info!("已拉取 {added} 个免费代理");
        }

        match pool.len().await {
            0 => tracing::warn!("代理池为空！"),
            n => tracing::info!("共 {n} 个代理就绪"),
        }

        if cfg.proxy_precheck && !pool.is_empty().await {
            let bad = pool
                .prune_unhealthy(&cfg.proxy_test_url, PRECHECK_TIMEOUT, PRECHECK_CONCURRENCY)
                .await;
            tracing::info!("代理预检完成：{bad} 个不可用");
        }
        pool
    }

    /// 追加代理（去重），返回实际新增数量。
    pub async fn extend<I, S>(&self, proxies: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut state = self.state.lock().await;
        proxies
            .into_iter()
            .filter(|p| state.push_unique(p.as_ref()))
            .count()
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.pool.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.pool.is_empty()
    }

    pub async fn failed_count(&self) -> usize {
        self.state.lock().await.failed.len()
    }

    pub async fn snapshot(&self) -> Vec<String> {
        self.state.lock().await.pool.clone()
    }

    /// 取下一个未拉黑的代理；池为空时返回 None。
    pub async fn get_next_proxy(&self) -> Option<String> {
        let mut state = self.state.lock().await;
        let len = state.pool.len();
        if len == 0 {
            return None;
        }

        if state.failed.len() >= len {
            tracing::warn!("所有代理都已失败，清空黑名单从头开始");
            state.failed.clear();
        }

        for _ in 0..len {
            let idx = state.next_index % len;
            state.next_index = (idx + 1) % len;
            let proxy = &state.pool[idx];
            if !state.failed.contains(proxy) {
                tracing::info!("选择代理: {proxy}");
                return Some(proxy.clone());
            }
        }

        None
    }

    /// 拉黑代理；重复调用无副作用，不在池中的地址忽略。
    pub async fn mark_failed(&self, proxy: &str) {
        let mut state = self.state.lock().await;
        if !state.pool.iter().any(|p| p == proxy) {
            return;
        }
        if state.failed.insert(proxy.to_string()) {
            tracing::warn!("代理已标记为失败: {proxy}");
        }
    }

    /// 单纯推进游标，不看黑名单。
    pub async fn rotate_proxy(&self) -> Option<String> {
        let mut state = self.state.lock().await;
        let len = state.pool.len();
        if len == 0 {
            return None;
        }
        let idx = state.next_index % len;
        state.next_index = (idx + 1) % len;
        Some(state.pool[idx].clone())
    }

    pub fn random_user_agent(&self) -> String {
        user_agent::random_user_agent()
    }

    pub async fn test_proxy(&self, proxy: &str, url: &str, timeout: Duration) -> bool {
        sources::test_proxy(proxy, url, timeout).await
    }

    /// 并发探测整个池，把不可用的代理拉黑，返回拉黑数量。
    pub async fn prune_unhealthy(&self, url: &str, timeout: Duration, concurrency: usize) -> usize {
        let proxies = self.snapshot().await;
        let bad = sources::find_unhealthy(proxies, url, timeout, concurrency).await;
        for p in &bad {
            self.mark_failed(p).await;
        }
        bad.len()
    }
}
