use once_cell::sync::Lazy;
use regex::Regex;

pub static URL_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"https?://[\w\-._~:/?#\[\]@!$&'()*+,;=%]+").unwrap());

static WECHAT_ARTICLE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"https?://mp\.weixin\.qq\.com/[0-9a-zA-Z\-_+=&?#/]+").unwrap());

pub fn html_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

pub fn contains_url(text: &str) -> bool {
    URL_REGEX.is_match(text)
}

pub fn first_url(text: &str) -> Option<&str> {
    URL_REGEX.find(text).map(|m| m.as_str())
}

pub fn wechat_article_url(text: &str) -> Option<&str> {
    WECHAT_ARTICLE_REGEX.find(text).map(|m| m.as_str())
}

/// Human-readable byte size, 1024-based.
pub fn human_size(size: u64) -> String {
    const BYTE: f64 = 1024.0;
    let size_f = size as f64;
    if size_f < BYTE {
        format!("{}B", size)
    } else if size_f < BYTE.powi(2) {
        format!("{:.1}KB", size_f / BYTE)
    } else if size_f < BYTE.powi(3) {
        format!("{:.1}MB", size_f / BYTE.powi(2))
    } else if size_f < BYTE.powi(4) {
        format!("{:.1}GB", size_f / BYTE.powi(3))
    } else {
        format!("{:.1}TB", size_f / BYTE.powi(4))
    }
}

/// Display names longer than 25 chars are cut with an ellipsis so headers
/// stay one line.
pub fn truncate_display_name(name: &str) -> String {
    let mut chars = name.chars();
    let head: String = chars.by_ref().take(25).collect();
    if chars.next().is_some() {
        format!("{head}…")
    } else {
        head
    }
}

/// Short preview of a forwarded-bundle: first four entries, sender in bold,
/// body cut at ten chars.
pub fn forward_bundle_brief(entries: &[(String, String)]) -> String {
    let count = entries.len();
    let mut result = String::from("<b>转发的消息记录</b>");
    for (nickname, body) in entries.iter().take(4) {
        let body_chars: Vec<char> = body.chars().collect();
        let shown: String = if body_chars.len() > 10 {
            body_chars[..10].iter().collect::<String>() + "…"
        } else {
            body.clone()
        };
        result.push_str(&format!("\n<b>{}: </b>{}", nickname, html_escape(&shown)));
    }
    if count > 4 {
        result.push_str(&format!("\n<b>共 {} 条消息记录</b>", count));
    }
    result
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test]
    fn escapes_html_metacharacters() {
        assert_eq!(html_escape("<b>&</b>"), "&lt;b&gt;&amp;&lt;/b&gt;");
    }

    #[test_case(512, "512B")]
    #[test_case(2048, "2.0KB")]
    #[test_case(5 * 1024 * 1024, "5.0MB")]
    #[test_case(3 * 1024 * 1024 * 1024, "3.0GB")]
    fn formats_human_sizes(size: u64, expected: &str) {
        assert_eq!(human_size(size), expected);
    }

    #[test]
    fn truncates_long_display_names() {
        let name = "a".repeat(30);
        let truncated = truncate_display_name(&name);
        assert_eq!(truncated.chars().count(), 26);
        assert!(truncated.ends_with('…'));
        assert_eq!(truncate_display_name("short"), "short");
    }

    #[test]
    fn finds_first_url_only() {
        let text = "see https://example.org/a and https://example.org/b";
        assert_eq!(first_url(text), Some("https://example.org/a"));
        assert!(contains_url(text));
        assert!(!contains_url("no links here"));
    }

    #[test]
    fn detects_wechat_articles() {
        assert!(wechat_article_url("https://mp.weixin.qq.com/s/abc123").is_some());
        assert!(wechat_article_url("https://example.org/s/abc123").is_none());
    }

    #[test]
    fn bundle_brief_caps_at_four_entries() {
        let entries: Vec<(String, String)> = (0..6)
            .map(|i| (format!("user{i}"), format!("message body number {i}")))
            .collect();
        let brief = forward_bundle_brief(&entries);
        assert!(brief.contains("user0"));
        assert!(brief.contains("user3"));
        assert!(!brief.contains("user4"));
        assert!(brief.contains("共 6 条消息记录"));
    }
}
