//! 随机浏览器 User-Agent：每次尝试换一个"身份"，降低被限速的概率。
//! 只是外观上的措施，不是安全手段。

use crate::util::id::random_index;
use reqwest::header::HeaderValue;

pub const FALLBACK_USER_AGENTS: [&str; 3] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
];

const CHROMIUM_PLATFORMS: [&str; 3] = [
    "Windows NT 10.0; Win64; x64",
    "Macintosh; Intel Mac OS X 10_15_7",
    "X11; Linux x86_64",
];

const FIREFOX_PLATFORMS: [&str; 3] = [
    "Windows NT 10.0; Win64; x64",
    "Macintosh; Intel Mac OS X 10.15",
    "X11; Linux x86_64",
];

const CHROME_MAJORS: [u32; 6] = [120, 121, 122, 123, 124, 125];
const FIREFOX_MAJORS: [u32; 5] = [121, 122, 123, 124, 125];
const SAFARI_MINORS: [u32; 4] = [1, 2, 3, 4];

fn pick<T: Copy>(items: &[T]) -> Option<T> {
    items.get(random_index(items.len())).copied()
}

fn generate() -> Option<String> {
    let ua = match random_index(4) {
        0 => format!(
            "Mozilla/5.0 ({}) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/{}.0.0.0 Safari/537.36",
            pick(&CHROMIUM_PLATFORMS)?,
            pick(&CHROME_MAJORS)?
        ),
        1 => {
            let major = pick(&CHROME_MAJORS)?;
            format!(
                "Mozilla/5.0 ({}) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/{major}.0.0.0 Safari/537.36 Edg/{major}.0.0.0",
                pick(&CHROMIUM_PLATFORMS)?
            )
        }
        2 => {
            let major = pick(&FIREFOX_MAJORS)?;
            format!(
                "Mozilla/5.0 ({}; rv:{major}.0) Gecko/20100101 Firefox/{major}.0",
                pick(&FIREFOX_PLATFORMS)?
            )
        }
        _ => format!(
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.{} Safari/605.1.15",
            pick(&SAFARI_MINORS)?
        ),
    };
    // 必须能作为请求头发送。
    HeaderValue::from_str(&ua).ok()?;
    Some(ua)
}

fn or_fallback(generated: Option<String>) -> String {
    match generated {
        Some(ua) => ua,
        None => {
            tracing::debug!("User-Agent 生成失败，使用内置备选");
            FALLBACK_USER_AGENTS[random_index(FALLBACK_USER_AGENTS.len())].to_string()
        }
    }
}

pub fn random_user_agent() -> String {
    or_fallback(generate())
}
