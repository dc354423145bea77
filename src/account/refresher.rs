//! 后台刷新任务：周期性拉取各账号剩余配额并写回 AccountPool。

use crate::account::{AccountPool, QuotaSource};
use std::sync::Arc;
use std::time::Duration;

/// 单账号请求之间的间隔，避免对限额接口造成突发压力。
const PER_ACCOUNT_GAP: Duration = Duration::from_secs(1);

/// 启动后台刷新任务；`interval` 为零时不启动。
///
/// 启动后立即执行一次，随后按周期刷新。刷新失败只记日志，本地配额保持原值。
pub fn spawn_refresh_task<S>(
    pool: Arc<AccountPool>,
    source: Arc<S>,
    interval: Duration,
) -> Option<tokio::task::JoinHandle<()>>
where
    S: QuotaSource + 'static,
{
    if interval.is_zero() {
        tracing::info!("后台配额刷新已关闭");
        return None;
    }

    Some(tokio::spawn(async move {
        loop {
            if !pool.is_empty().await {
                let (ok, failed) = pool.refresh_all(source.as_ref(), PER_ACCOUNT_GAP).await;
                tracing::info!("配额后台刷新完成：成功 {ok}，失败 {failed}");
            }
            tokio::time::sleep(interval).await;
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::Account;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Source(AtomicUsize);

    impl QuotaSource for Source {
        async fn remaining_quota(&self, _api_key: &str) -> anyhow::Result<u64> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(7)
        }
    }

    #[tokio::test]
    async fn zero_interval_disables_task() {
        let pool = Arc::new(AccountPool::new(vec![]));
        let source = Arc::new(Source(AtomicUsize::new(0)));
        assert!(spawn_refresh_task(pool, source, Duration::ZERO).is_none());
    }

    #[tokio::test]
    async fn first_cycle_runs_immediately() {
        let pool = Arc::new(AccountPool::new(vec![Account::new("a", "k", 100)]));
        let source = Arc::new(Source(AtomicUsize::new(0)));
        let handle =
            spawn_refresh_task(pool.clone(), source.clone(), Duration::from_secs(3600)).unwrap();

        for _ in 0..100 {
            if pool.get_by_key("k").await.unwrap().remaining_quota == 7 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.abort();

        assert_eq!(source.0.load(Ordering::SeqCst), 1);
        assert_eq!(pool.get_by_key("k").await.unwrap().remaining_quota, 7);
    }
}
