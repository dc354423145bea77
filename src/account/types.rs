use chrono::{DateTime, Utc};
use serde::Deserialize;

/// 名单里的一个账号及其本地配额视图。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub label: String,
    pub api_key: String,
    /// 总配额（字节），运行期间不变。
    pub total_quota: u64,
    /// 剩余配额（字节），始终落在 [0, total_quota]。
    pub remaining_quota: u64,
    pub last_checked: Option<DateTime<Utc>>,
}

impl Account {
    pub fn new(label: impl Into<String>, api_key: impl Into<String>, total_quota: u64) -> Self {
        Self {
            label: label.into(),
            api_key: api_key.into(),
            total_quota,
            remaining_quota: total_quota,
            last_checked: None,
        }
    }

    pub fn has_quota(&self, required_bytes: u64) -> bool {
        self.remaining_quota >= required_bytes
    }

    pub fn use_quota(&mut self, bytes_used: u64) {
        self.remaining_quota = self.remaining_quota.saturating_sub(bytes_used);
    }

    /// 每日重置：恢复到总配额。
    pub fn reset_quota(&mut self) {
        self.remaining_quota = self.total_quota;
        self.last_checked = Some(Utc::now());
    }

    /// 用远端数据覆盖剩余配额，并截断到总配额以内。
    pub fn apply_remote_remaining(&mut self, remaining: u64) {
        self.remaining_quota = remaining.min(self.total_quota);
        self.last_checked = Some(Utc::now());
    }

    pub fn remaining_percent(&self) -> f64 {
        if self.total_quota == 0 {
            return 0.0;
        }
        self.remaining_quota as f64 / self.total_quota as f64 * 100.0
    }
}

/// `accounts.json` 中的一项。
#[derive(Debug, Clone, Deserialize)]
pub struct RosterEntry {
    #[serde(default, alias = "username")]
    pub label: String,
    pub api_key: String,
    #[serde(default)]
    pub total_quota: Option<u64>,
}

impl RosterEntry {
    pub fn into_account(self, default_quota: u64) -> Account {
        let label = if self.label.trim().is_empty() {
            mask_key(&self.api_key)
        } else {
            self.label.trim().to_string()
        };
        Account::new(
            label,
            self.api_key.trim(),
            self.total_quota.unwrap_or(default_quota),
        )
    }
}

/// 无名称账号用 key 的前 8 位作为标识。
pub fn mask_key(api_key: &str) -> String {
    let head: String = api_key.trim().chars().take(8).collect();
    format!("{head}…")
}
