//! 代理池（Proxy Pool）模块：轮换出口代理与 User-Agent。

mod pool;
mod sources;
mod user_agent;

pub use pool::ProxyPool;
pub use sources::{fetch_free_proxies, parse_proxy_list, test_proxy};
pub use user_agent::{FALLBACK_USER_AGENTS, random_user_agent};
