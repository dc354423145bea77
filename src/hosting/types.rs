use serde::Deserialize;

/// `GET /file/{id}/info` 响应里用到的字段。
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileInfo {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub size: u64,
}

/// `GET /user/limits` 响应。
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserLimits {
    #[serde(default)]
    pub bandwidth_limit: i64,
    #[serde(default)]
    pub bandwidth_used: i64,
}

impl UserLimits {
    /// 剩余带宽 = limit - used，下限 0。
    pub fn remaining(&self) -> u64 {
        self.bandwidth_limit
            .saturating_sub(self.bandwidth_used)
            .max(0) as u64
    }
}
