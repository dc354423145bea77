use std::cell::Cell;
use uuid::Uuid;

thread_local! {
    /// 轻量 PRNG：每线程一个 state，避免锁与频繁分配。
    static RNG_STATE: Cell<u64> = Cell::new(seed());
}

fn seed() -> u64 {
    // 复用 UUID v4 的随机源作为种子，避免额外引入 rand/getrandom 依赖。
    let u = Uuid::new_v4().as_u128();
    let s = (u as u64) ^ ((u >> 64) as u64);
    if s == 0 { 0x9E37_79B9_7F4A_7C15 } else { s }
}

pub fn next_u64() -> u64 {
    RNG_STATE.with(|state| {
        // xorshift64*
        let mut x = state.get();
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        state.set(x);
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    })
}

/// [0, upper) 内的随机下标；upper 为 0/1 时恒为 0。
pub fn random_index(upper: usize) -> usize {
    if upper <= 1 {
        return 0;
    }
    (next_u64() as usize) % upper
}

/// 临时文件名后缀：秒级时间戳 + 4 位随机串，避免同一秒内的并发下载撞名。
pub fn temp_suffix() -> String {
    const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let ts = chrono::Utc::now().timestamp();
    let mut out = format!("{ts}_");
    for _ in 0..4 {
        out.push(CHARSET[random_index(CHARSET.len())] as char);
    }
    out
}
