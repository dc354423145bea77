//! 账号池（Account Pool）模块。
//!
//! 维护固定的账号名单与各自剩余带宽，按文件大小挑选账号，
//! 并在后台定期与托管服务的限额接口对账。

mod pool;
mod refresher;
mod selector;
mod types;

use std::future::Future;

pub use pool::AccountPool;
pub use refresher::spawn_refresh_task;
pub use selector::{LARGE_FILE_THRESHOLD, select_best};
pub use types::{Account, RosterEntry};

/// 远端配额来源：给定 API key 返回剩余字节数。
pub trait QuotaSource: Send + Sync {
    fn remaining_quota(&self, api_key: &str) -> impl Future<Output = anyhow::Result<u64>> + Send;
}
