use reqwest::header::HeaderMap;
use std::borrow::Cow;
use std::time::Duration;

/// 日志等级：
/// - off：只输出流程日志
/// - low：额外输出 aria2c 命令行（脱敏）
/// - medium：额外输出托管服务 API 的请求/响应（脱敏）
/// - high：额外原样输出 aria2c 的每一行 stderr
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Off = 0,
    Low = 1,
    Medium = 2,
    High = 3,
}

impl LogLevel {
    pub fn parse(debug: &str) -> Self {
        match debug.trim().to_lowercase().as_str() {
            "low" | "command" => Self::Low,
            "medium" | "backend" => Self::Medium,
            "high" | "all" | "raw" => Self::High,
            _ => Self::Off,
        }
    }

    pub fn command_enabled(self) -> bool {
        self >= Self::Low
    }

    pub fn backend_enabled(self) -> bool {
        self >= Self::Medium
    }

    pub fn raw_enabled(self) -> bool {
        self >= Self::High
    }
}

pub fn format_duration_ms(d: Duration) -> i64 {
    d.as_millis().min(i64::MAX as u128) as i64
}

/// 字节数格式化为带二进制单位的字符串（1.50 GiB）。
pub fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64;
    let mut unit = 0usize;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.2} {}", UNITS[unit])
}

pub fn downloader_command(program: &str, args: &[String]) {
    let rendered: Vec<Cow<'_, str>> = args.iter().map(|a| redact_url_key(a)).collect();
    tracing::info!("[aria2c] {program} {}", rendered.join(" "));
}

pub fn downloader_stderr_raw(line: &str) {
    tracing::info!("[aria2c stderr] {line}");
}

pub fn backend_request(method: &str, url: &str, headers: &HeaderMap) {
    tracing::info!(
        "\n====================== 后端请求 ========================\n[后端请求] {method} {}\n[后端请求头]\n{}==========================================================",
        redact_url_key(url),
        format_headers(headers),
    );
}

pub fn backend_response(status: u16, duration: Duration, body: &[u8]) {
    tracing::info!(
        "\n====================== 后端响应 ========================\n[后端响应] {} {}ms\n{}\n==========================================================",
        status,
        format_duration_ms(duration),
        truncate_text_for_log(&String::from_utf8_lossy(body)),
    );
}

fn format_headers(headers: &HeaderMap) -> String {
    let mut out = String::new();
    for (name, value) in headers.iter() {
        let key = name.as_str();
        let key_lc = key.to_lowercase();
        let val = if key_lc == "authorization" || key_lc == "proxy-authorization" {
            "***"
        } else {
            value.to_str().unwrap_or("<non-utf8>")
        };
        out.push_str(key);
        out.push_str(": ");
        out.push_str(val);
        out.push('\n');
    }
    out
}

/// 隐去文本里所有 `key=` 凭据（不论前面是否是 `?`/`&`），日志与错误里不落 API key。
pub fn redact_url_key(s: &str) -> Cow<'_, str> {
    const NEEDLE: &str = "key=";
    if !s.contains(NEEDLE) {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(idx) = rest.find(NEEDLE) {
        let value_start = idx + NEEDLE.len();
        out.push_str(&rest[..value_start]);
        let tail = &rest[value_start..];
        let value_len = tail
            .find(|c: char| {
                c.is_whitespace() || matches!(c, '&' | '#' | '"' | '\'' | ')' | ']' | '>')
            })
            .unwrap_or(tail.len());
        if value_len > 0 {
            out.push_str("***");
        }
        rest = &tail[value_len..];
    }
    out.push_str(rest);
    Cow::Owned(out)
}

fn truncate_text_for_log(s: &str) -> String {
    const MAX_CHARS: usize = 8 * 1024;
    if s.chars().count() <= MAX_CHARS {
        return s.to_string();
    }
    let mut out: String = s.chars().take(MAX_CHARS).collect();
    out.push_str("...[TRUNCATED]");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_log_level() {
        assert_eq!(LogLevel::parse("  HIGH "), LogLevel::High);
        assert_eq!(LogLevel::parse("medium"), LogLevel::Medium);
        assert_eq!(LogLevel::parse("low"), LogLevel::Low);
        assert_eq!(LogLevel::parse("whatever"), LogLevel::Off);
        assert!(LogLevel::Medium.command_enabled());
        assert!(!LogLevel::Medium.raw_enabled());
    }

    #[test]
    fn human_bytes_units() {
        assert_eq!(human_bytes(512), "512 B");
        assert_eq!(human_bytes(1536), "1.50 KiB");
        assert_eq!(human_bytes(3 * 1024 * 1024 * 1024), "3.00 GiB");
    }

    #[test]
    fn redact_url_key_hides_credential() {
        assert_eq!(
            redact_url_key("https://h/api/file/abc?key=secret&x=1"),
            "https://h/api/file/abc?key=***&x=1"
        );
        assert_eq!(
            redact_url_key("https://h/api/file/abc?key=secret"),
            "https://h/api/file/abc?key=***"
        );
        assert_eq!(redact_url_key("plain"), "plain");
    }

    #[test]
    fn redact_url_key_hides_every_occurrence() {
        assert_eq!(
            redact_url_key("URI=https://h/file/a?x=1&key=S1 then apikey=S2 (key=S3)"),
            "URI=https://h/file/a?x=1&key=*** then apikey=*** (key=***)"
        );
        assert_eq!(redact_url_key("key="), "key=");
    }
}
