use crate::account::QuotaSource;
use crate::account::selector;
use crate::account::types::{Account, RosterEntry, mask_key};
use crate::config::{Config, GIB};
use crate::logging::human_bytes;
use anyhow::{Context, anyhow};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tokio::sync::RwLock;

/// 账号池：固定名单 + 每个账号的剩余配额。所有读改写都在同一把锁内完成。
#[derive(Debug, Default)]
pub struct AccountPool {
    state: RwLock<Vec<Account>>,
}

impl AccountPool {
    pub fn new(accounts: Vec<Account>) -> Self {
        Self {
            state: RwLock::new(dedup_by_key(accounts)),
        }
    }

    /// 从 `ACCOUNTS` 环境变量与 `<DATA_DIR>/accounts.json` 组装名单。
    pub async fn load(cfg: &Config) -> anyhow::Result<Self> {
        let mut accounts = parse_roster_env(&cfg.accounts, cfg.default_quota_bytes);
        accounts.extend(load_roster_file(&cfg.accounts_file(), cfg.default_quota_bytes).await?);
        if accounts.is_empty() {
            tracing::warn!("账号名单为空，将只能匿名下载");
        }
        Ok(Self::new(accounts))
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.is_empty()
    }

    pub async fn get_all(&self) -> Vec<Account> {
        self.state.read().await.clone()
    }

    pub async fn get_by_key(&self, api_key: &str) -> Option<Account> {
        let state = self.state.read().await;
        state.iter().find(|a| a.api_key == api_key).cloned()
    }

    /// 按文件大小挑选账号，返回快照；None 表示没有账号够用，调用方必须终止。
    pub async fn select_best_account(&self, file_size: u64) -> Option<Account> {
        let state = self.state.read().await;
        let Some(idx) = selector::select_best(&state, file_size) else {
            tracing::error!("没有账号有足够配额下载 {}", human_bytes(file_size));
            return None;
        };
        let selected = state[idx].clone();
        if file_size < selector::LARGE_FILE_THRESHOLD {
            tracing::info!(
                "小文件 ({})：选择剩余最少的账号 {}",
                human_bytes(file_size),
                selected.label
            );
        } else {
            tracing::info!(
                "大文件 ({})：选择剩余最多的账号 {}",
                human_bytes(file_size),
                selected.label
            );
        }
        Some(selected)
    }

    /// 记录一次成功下载实际消耗的字节数，返回扣减后的剩余配额。
    pub async fn mark_quota_used(&self, api_key: &str, bytes_used: u64) -> Option<u64> {
        let mut state = self.state.write().await;
        let acc = state.iter_mut().find(|a| a.api_key == api_key)?;
        acc.use_quota(bytes_used);
        tracing::info!(
            "账号 {}: 使用 {}，剩余 {}",
            acc.label,
            human_bytes(bytes_used),
            human_bytes(acc.remaining_quota)
        );
        Some(acc.remaining_quota)
    }

    pub async fn reset_quota(&self, api_key: &str) -> bool {
        let mut state = self.state.write().await;
        match state.iter_mut().find(|a| a.api_key == api_key) {
            Some(acc) => {
                acc.reset_quota();
                true
            }
            None => false,
        }
    }

    /// 从远端刷新单个账号的剩余配额；失败时保持原值并返回 None。
    pub async fn refresh_quota<S: QuotaSource>(&self, api_key: &str, source: &S) -> Option<u64> {
        // 网络请求期间不持锁。
        let label = self.get_by_key(api_key).await?.label;
        let remaining = match source.remaining_quota(api_key).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(account = %label, "刷新账号配额失败: {e:#}");
                return None;
            }
        };

        let mut state = self.state.write().await;
        let acc = state.iter_mut().find(|a| a.api_key == api_key)?;
        acc.apply_remote_remaining(remaining);
        tracing::info!("账号 {}: 剩余 {}", acc.label, human_bytes(acc.remaining_quota));
        Some(acc.remaining_quota)
    }

    /// 依次刷新全部账号，每个账号之间间隔 `gap`，返回 (成功, 失败)。
    pub async fn refresh_all<S: QuotaSource>(&self, source: &S, gap: Duration) -> (usize, usize) {
        let keys: Vec<String> = self
            .get_all()
            .await
            .into_iter()
            .map(|a| a.api_key)
            .collect();

        let mut ok = 0usize;
        let mut failed = 0usize;
        for (i, key) in keys.iter().enumerate() {
            if i > 0 && !gap.is_zero() {
                tokio::time::sleep(gap).await;
            }
            match self.refresh_quota(key, source).await {
                Some(_) => ok += 1,
                None => failed += 1,
            }
        }
        (ok, failed)
    }

    pub async fn status_summary(&self) -> String {
        let state = self.state.read().await;
        let mut out = String::from("账号配额状态:\n\n");
        for (i, acc) in state.iter().enumerate() {
            out.push_str(&format!(
                "{}. {}\n   剩余: {:.2}GB / {:.0}GB ({:.0}%)\n\n",
                i + 1,
                acc.label,
                acc.remaining_quota as f64 / GIB as f64,
                acc.total_quota as f64 / GIB as f64,
                acc.remaining_percent()
            ));
        }
        out
    }
}

/// `label:key,label:key`；只有 key 的项以 key 前缀命名。
fn parse_roster_env(value: &str, default_quota: u64) -> Vec<Account> {
    value
        .split([',', '\n'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|item| {
            let (label, key) = match item.split_once(':') {
                Some((label, key)) => (label.trim().to_string(), key.trim()),
                None => (mask_key(item), item),
            };
            (!key.is_empty()).then(|| Account::new(label, key, default_quota))
        })
        .collect()
}

async fn load_roster_file(path: &Path, default_quota: u64) -> anyhow::Result<Vec<Account>> {
    let data = match tokio::fs::read(path).await {
        Ok(v) => v,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).context("读取 accounts.json 失败"),
    };

    let entries: Vec<RosterEntry> = sonic_rs::from_slice(&data)
        .map_err(|e| anyhow!(e))
        .context("解析 accounts.json 失败")?;

    Ok(entries
        .into_iter()
        .filter(|e| !e.api_key.trim().is_empty())
        .map(|e| e.into_account(default_quota))
        .collect())
}

fn dedup_by_key(accounts: Vec<Account>) -> Vec<Account> {
    let mut seen = HashSet::new();
    accounts
        .into_iter()
        .filter(|a| seen.insert(a.api_key.clone()))
        .collect()
}
