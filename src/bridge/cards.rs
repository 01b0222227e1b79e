use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::warn;

/// What a structured card resolved to. First matching shape wins; anything
/// unrecognized degrades to `Unknown` and renders as a `[<kind>]`
/// placeholder. Lossy by design.
#[derive(Debug, Clone, PartialEq)]
pub enum CardContent {
    Text(String),
    ForwardBundle {
        res_id: String,
        file_name: Option<String>,
    },
    Location {
        lat: f64,
        lng: f64,
        address: String,
    },
    /// XML cards can reference an image purely by hash.
    ImageByMd5 { md5: String },
    Unknown { kind: String },
}

static LINK_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"(https?:\\?/\\?/b23\.tv\\?/\w*)\??").unwrap(),
        Regex::new(r#"(https?:\\?/\\?/\w*\.?bilibili\.com\\?/[^?"=]*)\??"#).unwrap(),
        Regex::new(r#"(https?:\\?/\\?/\w*\.?zhihu\.com\\?/[^?"=]*)\??"#).unwrap(),
        Regex::new(r#""jumpUrl":"(https?:\\?/\\?/[^",]*)""#).unwrap(),
        Regex::new(r#""contentJumpUrl": ?"(https?:\\?/\\?/[^",]*)""#).unwrap(),
    ]
});

static XML_URL_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r#"url="([^"]+)""#).unwrap());
static XML_RES_ID_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"m_resid="([\w+=/]+)""#).unwrap());
static XML_MD5_IMAGE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"image md5="([A-F\d]{32})""#).unwrap());

/// Pattern-matches a JSON mini-program card against the known shapes:
/// group announcement, forwarded bundle, map location, known link carriers.
pub fn parse_json_card(payload: &str) -> CardContent {
    let parsed: Value = match serde_json::from_str(payload) {
        Ok(v) => v,
        Err(e) => {
            warn!("unparseable json card: {}", e);
            return CardContent::Unknown {
                kind: "JSON".to_string(),
            };
        }
    };
    let app = parsed.get("app").and_then(Value::as_str).unwrap_or("");

    match app {
        "com.tencent.mannounce" => {
            let decoded = parsed
                .pointer("/meta/mannounce/title")
                .and_then(Value::as_str)
                .and_then(decode_base64_text)
                .zip(
                    parsed
                        .pointer("/meta/mannounce/text")
                        .and_then(Value::as_str)
                        .and_then(decode_base64_text),
                );
            match decoded {
                Some((title, body)) => CardContent::Text(format!("{title}\n\n{body}")),
                None => {
                    warn!("announcement card without decodable title/text");
                    CardContent::Text("[群公告]".to_string())
                }
            }
        }
        "com.tencent.multimsg" => {
            let res_id = parsed
                .pointer("/meta/detail/resid")
                .and_then(Value::as_str)
                .map(str::to_string);
            let file_name = parsed
                .pointer("/meta/detail/uniseq")
                .and_then(Value::as_str)
                .map(str::to_string);
            match res_id {
                Some(res_id) => CardContent::ForwardBundle { res_id, file_name },
                None => CardContent::Text("[解析转发消息时出错：没有 resId]".to_string()),
            }
        }
        "com.tencent.map" => {
            let location = parsed.pointer("/meta/Location.Search");
            let lat = location
                .and_then(|l| l.get("lat"))
                .and_then(value_as_f64);
            let lng = location
                .and_then(|l| l.get("lng"))
                .and_then(value_as_f64);
            let address = location
                .and_then(|l| l.get("address"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            match (lat, lng) {
                (Some(lat), Some(lng)) => CardContent::Location { lat, lng, address },
                _ => CardContent::Unknown {
                    kind: app.to_string(),
                },
            }
        }
        _ => {
            for pattern in LINK_PATTERNS.iter() {
                if let Some(caps) = pattern.captures(payload) {
                    let url = caps[1].replace("\\/", "/");
                    return CardContent::Text(url);
                }
            }
            CardContent::Unknown {
                kind: if app.is_empty() {
                    "JSON".to_string()
                } else {
                    app.to_string()
                },
            }
        }
    }
}

/// Legacy XML cards: forwarded bundle, plain link, md5-addressed image.
pub fn parse_xml_card(payload: &str) -> CardContent {
    if payload.contains(r#"action="viewMultiMsg""#) {
        if let Some(caps) = XML_RES_ID_REGEX.captures(payload) {
            return CardContent::ForwardBundle {
                res_id: caps[1].to_string(),
                file_name: None,
            };
        }
        return CardContent::Unknown {
            kind: "XML".to_string(),
        };
    }
    if let Some(caps) = XML_URL_REGEX.captures(payload) {
        let url = caps[1].replace("\\/", "/").replace("&amp;", "&");
        return CardContent::Text(url);
    }
    if let Some(caps) = XML_MD5_IMAGE_REGEX.captures(payload) {
        return CardContent::ImageByMd5 {
            md5: caps[1].to_string(),
        };
    }
    CardContent::Unknown {
        kind: "XML".to_string(),
    }
}

fn decode_base64_text(encoded: &str) -> Option<String> {
    BASE64
        .decode(encoded)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
}

fn value_as_f64(value: &Value) -> Option<f64> {
    value
        .as_f64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
}
