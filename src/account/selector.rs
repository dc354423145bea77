//! 选择算法：按文件大小决定"装满小号"还是"用大号"。
//!
//! 小文件（< 2 GiB）挑剩余最少但够用的账号，把大配额留给大文件；
//! 大文件挑剩余最多的账号。并列时名单中靠前者胜出。

use crate::account::types::Account;
use crate::config::GIB;

pub const LARGE_FILE_THRESHOLD: u64 = 2 * GIB;

/// 返回被选中账号在 `accounts` 中的下标；没有账号够用时返回 None。
pub fn select_best(accounts: &[Account], file_size: u64) -> Option<usize> {
    let prefer_largest = file_size >= LARGE_FILE_THRESHOLD;
    let mut best: Option<(usize, u64)> = None;

    for (idx, acc) in accounts.iter().enumerate() {
        if !acc.has_quota(file_size) {
            continue;
        }
        let better = match best {
            None => true,
            // 严格比较：并列时保留先出现的账号。
            Some((_, q)) if prefer_largest => acc.remaining_quota > q,
            Some((_, q)) => acc.remaining_quota < q,
        };
        if better {
            best = Some((idx, acc.remaining_quota));
        }
    }

    best.map(|(idx, _)| idx)
}
