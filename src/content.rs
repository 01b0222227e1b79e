use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Where a media payload currently lives. Elements start out `Remote` and
/// may be materialized to `Local`/`Bytes` by the media pipeline; a `Remote`
/// that survives to delivery is fetched server-side by the target platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaSource {
    Remote(String),
    Local(PathBuf),
    Bytes(Vec<u8>),
}

impl MediaSource {
    pub fn remote_url(&self) -> Option<&str> {
        match self {
            MediaSource::Remote(url) => Some(url),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MentionTarget {
    Everyone,
    User(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiceKind {
    Dice,
    Gesture,
}

/// Common intermediate form both translation directions normalize into.
/// Exactly one variant is active per element; a `ForwardBundle` always
/// replaces the whole message body (platform guarantee, see
/// [`truncate_at_forward_bundle`]).
#[derive(Debug, Clone, PartialEq)]
pub enum ContentElement {
    Text(String),
    /// Pre-rendered HTML notice emitted by the translator for degraded
    /// elements. Unlike `Text` it is not escaped again.
    Notice(String),
    Mention {
        target: MentionTarget,
        resolved_name: String,
    },
    /// Built-in face sticker, already resolved to a display name.
    Face { id: i32, name: String },
    Image {
        source: MediaSource,
        is_flash: bool,
        is_spoiler: bool,
        /// Sticker-like image; may be sent as a sticker when alone.
        as_sticker: bool,
    },
    /// Native animated sticker on the target platform.
    Sticker { handle: String },
    Video { source: MediaSource },
    Voice { source: MediaSource },
    File {
        name: String,
        size: u64,
        source: MediaSource,
    },
    Share { url: String },
    /// A card the translator could not pattern-match. Lossy by design:
    /// emitted as a literal `[<kind>]` placeholder.
    StructuredCard { kind: String, payload: String },
    Location {
        lat: f64,
        lng: f64,
        title: String,
        address: String,
    },
    Dice { kind: DiceKind, value: i32 },
    Poke { text: String },
    ForwardBundle {
        res_id: String,
        file_name: Option<String>,
        brief: String,
    },
}

impl ContentElement {
    /// Deterministic text rendering for elements that degrade to text.
    pub fn placeholder_text(&self) -> Option<String> {
        match self {
            ContentElement::StructuredCard { kind, .. } => Some(format!("[{kind}]")),
            ContentElement::Dice { kind, value } => {
                let label = match kind {
                    DiceKind::Dice => "骰子",
                    DiceKind::Gesture => "猜拳",
                };
                Some(format!("[<i>{label}</i>] {value}"))
            }
            ContentElement::Poke { text } => Some(format!(
                "[<i>戳一戳</i>] {}",
                crate::utils::formatting::html_escape(text)
            )),
            _ => None,
        }
    }
}

/// Whether an element may be merged with others into one outbound call.
/// Pure over the tag so it stays unit-testable away from delivery mechanics.
pub fn is_chainable(element: &ContentElement) -> bool {
    !matches!(
        element,
        ContentElement::Image { is_flash: true, .. }
            | ContentElement::Voice { .. }
            | ContentElement::Video { .. }
            | ContentElement::Location { .. }
            | ContentElement::Share { .. }
            | ContentElement::StructuredCard { .. }
            | ContentElement::Poke { .. }
    )
}

/// Splits a chain into (chainable, standalone) preserving order within each.
pub fn partition_chainable(
    elements: Vec<ContentElement>,
) -> (Vec<ContentElement>, Vec<ContentElement>) {
    elements.into_iter().partition(is_chainable)
}

/// Drops everything after the first `ForwardBundle`: a forwarded-bundle
/// message carries no sibling content.
pub fn truncate_at_forward_bundle(mut elements: Vec<ContentElement>) -> Vec<ContentElement> {
    if let Some(pos) = elements
        .iter()
        .position(|e| matches!(e, ContentElement::ForwardBundle { .. }))
    {
        elements.truncate(pos + 1);
    }
    elements
}

/// Plain-text preview of a chain, stored as the mapping brief and shown
/// when the mirrored message is quoted later.
pub fn brief_text(elements: &[ContentElement]) -> String {
    let mut brief = String::new();
    for element in elements {
        match element {
            ContentElement::Text(t) => brief.push_str(t),
            ContentElement::Notice(_) => {}
            ContentElement::Mention { resolved_name, .. } => brief.push_str(resolved_name),
            ContentElement::Face { name, .. } => brief.push_str(&format!("[{name}]")),
            ContentElement::Image { is_flash: true, .. } => brief.push_str("[闪照]"),
            ContentElement::Image { .. } | ContentElement::Sticker { .. } => {
                brief.push_str("[图片]")
            }
            ContentElement::Video { .. } => brief.push_str("[视频]"),
            ContentElement::Voice { .. } => brief.push_str("[语音]"),
            ContentElement::File { name, .. } => brief.push_str(&format!("[文件] {name}")),
            ContentElement::Share { url } => brief.push_str(url),
            ContentElement::StructuredCard { kind, .. } => brief.push_str(&format!("[{kind}]")),
            ContentElement::Location { address, .. } => brief.push_str(&format!("[位置] {address}")),
            ContentElement::Dice { kind, .. } => brief.push_str(match kind {
                DiceKind::Dice => "[骰子]",
                DiceKind::Gesture => "[猜拳]",
            }),
            ContentElement::Poke { .. } => brief.push_str("[戳一戳]"),
            ContentElement::ForwardBundle { .. } => brief.push_str("[转发消息]"),
        }
    }
    if brief.chars().count() > 100 {
        brief.chars().take(100).collect()
    } else {
        brief
    }
}

/// Clickable label attached below an outgoing message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionLink {
    pub label: String,
    /// `None` renders as an inert inline label.
    pub url: Option<String>,
}

impl ActionLink {
    pub fn url(label: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            url: Some(url.into()),
        }
    }

    pub fn inline(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            url: None,
        }
    }
}

/// Per-invocation accumulator the translator fills while walking a chain.
/// Frozen before being handed to the dispatcher.
#[derive(Debug, Clone, Default)]
pub struct DeliveryBuffer {
    pub body: String,
    pub attachments: Vec<ContentElement>,
    pub action_links: Vec<ActionLink>,
    pub reply_target_id: Option<i64>,
    pub force_document: bool,
    /// Set when the body contains a mention rendered as a link; disables the
    /// rich-header preview suppression for plain URLs.
    pub contains_mention_link: bool,
    /// Venue and similar sends whose caption must not carry the header.
    pub suppress_header: bool,
    /// Sticker-like sends: replace the header with a compact sender label
    /// attached as an action link.
    pub wants_sender_label: bool,
}

impl DeliveryBuffer {
    pub fn push_text(&mut self, text: &str) {
        self.body.push_str(text);
    }

    pub fn is_empty(&self) -> bool {
        self.body.trim().is_empty() && self.attachments.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    fn text(s: &str) -> ContentElement {
        ContentElement::Text(s.to_string())
    }

    fn voice() -> ContentElement {
        ContentElement::Voice {
            source: MediaSource::Remote("https://example.org/v.silk".into()),
        }
    }

    #[test_case(ContentElement::Text("hi".into()), true; "text chains")]
    #[test_case(voice(), false; "voice is standalone")]
    #[test_case(ContentElement::Poke { text: "戳".into() }, false; "poke is standalone")]
    #[test_case(ContentElement::Share { url: "https://example.org".into() }, false; "share is standalone")]
    fn classifies_chainable(element: ContentElement, expected: bool) {
        assert_eq!(is_chainable(&element), expected);
    }

    #[test]
    fn flash_images_are_standalone_but_normal_images_chain() {
        let normal = ContentElement::Image {
            source: MediaSource::Remote("https://example.org/a.png".into()),
            is_flash: false,
            is_spoiler: false,
            as_sticker: false,
        };
        let flash = ContentElement::Image {
            source: MediaSource::Remote("https://example.org/a.png".into()),
            is_flash: true,
            is_spoiler: false,
            as_sticker: false,
        };
        assert!(is_chainable(&normal));
        assert!(!is_chainable(&flash));
    }

    #[test]
    fn mixed_chain_splits_into_two_groups() {
        let (chainable, standalone) = partition_chainable(vec![text("hi"), voice()]);
        assert_eq!(chainable, vec![text("hi")]);
        assert_eq!(standalone, vec![voice()]);
    }

    #[test]
    fn forward_bundle_terminates_the_chain() {
        let bundle = ContentElement::ForwardBundle {
            res_id: "res1".into(),
            file_name: None,
            brief: String::new(),
        };
        let out = truncate_at_forward_bundle(vec![text("a"), bundle.clone(), text("b")]);
        assert_eq!(out, vec![text("a"), bundle]);
    }

    #[test]
    fn unknown_card_placeholder_is_deterministic() {
        let card = ContentElement::StructuredCard {
            kind: "com.tencent.gamecenter".into(),
            payload: "{}".into(),
        };
        assert_eq!(
            card.placeholder_text().unwrap(),
            "[com.tencent.gamecenter]"
        );
    }
}
