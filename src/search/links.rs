//! Cloud-drive link extraction and classification
use crate::model::Link;
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref URL_RE: Regex = Regex::new(concat!(
        r#"(?i)(?:https?://[^\s"'<>，。；！、（）()【】\[\]]+"#,
        r#"|magnet:\?xt=urn:btih:[0-9a-z]{32,40}[^\s"'<>]*"#,
        r#"|ed2k://\|file\|[^\s"'<>]+?\|/)"#,
    ))
    .expect("url pattern");
    static ref PWD_QUERY_RE: Regex =
        Regex::new(r"(?i)[?&](?:pwd|password|passcode)=([0-9a-z]{4,8})")
            .expect("pwd query pattern");
    static ref PWD_TEXT_RE: Regex =
        Regex::new(r"(?i)(?:提取码|访问码|密码|pwd|code)\s*[:：]?\s*([0-9a-z]{4,8})")
            .expect("pwd text pattern");
}

const HOST_TYPES: &[(&str, &str)] = &[
    ("pan.baidu.com", "baidu"),
    ("yun.baidu.com", "baidu"),
    ("aliyundrive.com", "aliyun"),
    ("alipan.com", "aliyun"),
    ("pan.quark.cn", "quark"),
    ("cloud.189.cn", "tianyi"),
    ("drive.uc.cn", "uc"),
    ("caiyun.139.com", "mobile"),
    ("yun.139.com", "mobile"),
    ("115.com", "115"),
    ("115cdn.com", "115"),
    ("anxia.com", "115"),
    ("pan.xunlei.com", "xunlei"),
    ("123pan.com", "123"),
    ("123pan.cn", "123"),
    ("123684.com", "123"),
    ("123865.com", "123"),
    ("123912.com", "123"),
    ("mypikpak.com", "pikpak"),
];

fn host_of(url: &str) -> Option<String> {
    let rest = url.split_once("://").map(|(_, rest)| rest)?;
    let host = rest
        .split(|c| matches!(c, '/' | '?' | '#'))
        .next()
        .unwrap_or(rest);
    let host = host.rsplit('@').next().unwrap_or(host);
    let host = host.split(':').next().unwrap_or(host);
    Some(host.to_ascii_lowercase())
}

/// Link type for a share URL, or `None` if it is not a recognised share link.
pub fn classify_link(url: &str) -> Option<&'static str> {
    let lower = url.to_ascii_lowercase();
    if lower.starts_with("magnet:") {
        return Some("magnet");
    }
    if lower.starts_with("ed2k://") {
        return Some("ed2k");
    }

    let host = host_of(&lower)?;
    HOST_TYPES
        .iter()
        .find(|(domain, _)| host == *domain || host.ends_with(&format!(".{domain}")))
        .map(|(_, kind)| *kind)
}

fn trim_url(url: &str) -> &str {
    url.trim_end_matches(['.', ',', ';', '!', '?', ')', ']'])
}

fn password_near(text: &str, url: &str) -> Option<String> {
    let start = text.find(url)? + url.len();
    let tail = &text[start..];
    let end = tail.find("http").unwrap_or(tail.len());
    PWD_TEXT_RE
        .captures(&tail[..end])
        .map(|caps| caps[1].to_string())
}

/// Extract share links from message text plus any anchor targets.
pub fn extract_links(text: &str, hrefs: &[String]) -> Vec<Link> {
    let mut candidates: Vec<String> = hrefs
        .iter()
        .map(|h| trim_url(h.trim()).to_string())
        .collect();
    candidates.extend(URL_RE.find_iter(text).map(|m| trim_url(m.as_str()).to_string()));

    let fallback_password = PWD_TEXT_RE.captures(text).map(|caps| caps[1].to_string());
    let mut links: Vec<Link> = Vec::new();

    for url in candidates {
        let Some(kind) = classify_link(&url) else {
            continue;
        };
        if links.iter().any(|l| l.url == url) {
            continue;
        }

        let password = PWD_QUERY_RE
            .captures(&url)
            .map(|caps| caps[1].to_string())
            .or_else(|| password_near(text, &url))
            .unwrap_or_default();

        links.push(Link {
            kind: kind.to_string(),
            url,
            password,
        });
    }

    // One link and one code in the message: they belong together.
    if links.len() == 1 && links[0].password.is_empty() {
        if let Some(password) = fallback_password {
            links[0].password = password;
        }
    }

    links
}
