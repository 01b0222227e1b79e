use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

use crate::bridge::cards::{self, CardContent};
use crate::bridge::header::{rich_header_url, tg_color_emoji};
use crate::bridge::stickers::StickerIndex;
use crate::cache::MemberNameCache;
use crate::content::{
    ActionLink, ContentElement, DeliveryBuffer, DiceKind, MediaSource, MentionTarget,
    truncate_at_forward_bundle,
};
use crate::flags;
use crate::media::TempScope;
use crate::qq::{ChatKind, QqClient, QqElement, QqMessageEvent, faces};
use crate::telegram::{TelegramClient, TelegramInbound, TelegramMedia};
use crate::utils::formatting::{
    forward_bundle_brief, html_escape, human_size, wechat_article_url,
};
use crate::utils::geo;

/// Sentinel text the client produces for relay-train ("接龙") stickers it
/// cannot render.
pub const RELAY_TRAIN_SENTINEL: &str = "[该接龙表情不支持查看，请使用QQ最新版本]";

static HEADER_LINE_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^.*: ?$").unwrap());

pub fn big_face_url(file: &str) -> String {
    let dir = file.get(..2).unwrap_or(file);
    let name = file.get(..32).unwrap_or(file);
    format!("https://gxh.vip.qq.com/club/item/parcel/item/{dir}/{name}/raw300.gif")
}

pub fn image_url_by_md5(md5: &str) -> String {
    format!(
        "https://gchat.qpic.cn/gchatpic_new/0/0-0-{}/0",
        md5.to_uppercase()
    )
}

/// Result of normalizing a QQ message into the intermediate form.
#[derive(Debug, Default)]
pub struct QqTranslation {
    pub elements: Vec<ContentElement>,
    /// The message was a relay-train sticker; the caller accumulates it
    /// instead of forwarding.
    pub relay_train: bool,
}

/// Normalizes inbound QQ chains into `ContentElement`s.
pub struct QqTranslator {
    qq: Arc<dyn QqClient>,
    roster: Arc<MemberNameCache>,
    stickers: Arc<StickerIndex>,
}

impl QqTranslator {
    pub fn new(
        qq: Arc<dyn QqClient>,
        roster: Arc<MemberNameCache>,
        stickers: Arc<StickerIndex>,
    ) -> Self {
        Self {
            qq,
            roster,
            stickers,
        }
    }

    /// Drops chain noise before translation: mentions of the bridge account,
    /// the redundant mention of the reply target, and caption text echoing a
    /// face element.
    pub fn filter_chain(&self, event: &QqMessageEvent) -> Vec<QqElement> {
        event
            .elements
            .iter()
            .filter(|elem| {
                !matches!(elem, QqElement::At { target: MentionTarget::User(id), .. }
                    if *id == self.qq.uin())
            })
            .filter(|elem| {
                !matches!((elem, &event.reply_to),
                    (QqElement::At { target: MentionTarget::User(id), .. }, Some(reply))
                        if *id == reply.sender_id)
            })
            .filter(|elem| {
                // A `[/face]face` echo: text identical to some face caption.
                !matches!(elem, QqElement::Text(text)
                    if event.elements.iter().any(|other| matches!(other,
                        QqElement::Face { text: Some(t), .. }
                            | QqElement::Sface { text: Some(t), .. } if t == text)))
            })
            .cloned()
            .collect()
    }

    pub async fn translate(
        &self,
        event: &QqMessageEvent,
        effective_flags: u32,
        scope: &mut TempScope,
    ) -> QqTranslation {
        let chain = self.filter_chain(event);
        let sticker_candidate = chain.len() == 1;
        let has_text = event
            .elements
            .iter()
            .any(|e| matches!(e, QqElement::Text(_)));
        let image_count = event
            .elements
            .iter()
            .filter(|e| matches!(e, QqElement::Image { .. }))
            .count();

        let mut out = QqTranslation::default();
        for elem in chain {
            let elem = match elem {
                QqElement::Flash { file, url }
                    if flags::has(effective_flags, flags::DISABLE_FLASH_PIC) =>
                {
                    out.elements
                        .push(ContentElement::Notice("<i>[闪照]</i>".to_string()));
                    QqElement::Image {
                        file,
                        url,
                        as_sticker: false,
                    }
                }
                other => other,
            };
            match elem {
                QqElement::Text(text) | QqElement::Markdown(text) => {
                    if text == RELAY_TRAIN_SENTINEL {
                        out.relay_train = true;
                        return out;
                    }
                    out.elements.push(ContentElement::Text(text));
                }
                QqElement::At { target, text } => {
                    let resolved_name = match (target, text) {
                        (_, Some(text)) => text,
                        (MentionTarget::Everyone, None) => "@全体成员".to_string(),
                        (MentionTarget::User(id), None) => {
                            format!("@{}", self.member_name(event.room_id, id).await)
                        }
                    };
                    out.elements.push(ContentElement::Mention {
                        target,
                        resolved_name,
                    });
                }
                QqElement::Face { id, text } | QqElement::Sface { id, text } => {
                    if sticker_candidate {
                        if let Some(handle) = self.stickers.sticker_for_face(id) {
                            out.elements.push(ContentElement::Sticker {
                                handle: handle.to_string(),
                            });
                        }
                    }
                    out.elements.push(ContentElement::Face {
                        id,
                        name: faces::face_label(id, text.as_deref()),
                    });
                }
                QqElement::Bface { file, .. } => {
                    out.elements.push(ContentElement::Image {
                        source: MediaSource::Remote(big_face_url(&file)),
                        is_flash: false,
                        is_spoiler: false,
                        as_sticker: true,
                    });
                }
                QqElement::Image {
                    file,
                    url,
                    as_sticker,
                } => {
                    let send_as_sticker = as_sticker
                        && !file.to_lowercase().ends_with(".gif")
                        && !has_text
                        && image_count == 1;
                    out.elements.push(ContentElement::Image {
                        source: MediaSource::Remote(url),
                        is_flash: false,
                        is_spoiler: false,
                        as_sticker: send_as_sticker,
                    });
                }
                QqElement::Flash { url, .. } => {
                    out.elements.push(ContentElement::Image {
                        source: MediaSource::Remote(url),
                        is_flash: true,
                        is_spoiler: false,
                        as_sticker: false,
                    });
                }
                QqElement::Video { file_id, url } => {
                    let url = match url {
                        Some(url) => Ok(url),
                        None => self.qq.fetch_video_url(event.room_id, &file_id).await,
                    };
                    match url {
                        Ok(url) => out.elements.push(ContentElement::Video {
                            source: MediaSource::Remote(url),
                        }),
                        Err(e) => {
                            warn!("video url fetch failed: {}", e);
                            out.elements
                                .push(ContentElement::Notice("<i>[视频]</i>".to_string()));
                        }
                    }
                }
                QqElement::Voice { url } => {
                    let url = match url {
                        Some(url) => Ok(url),
                        None => {
                            self.qq
                                .fetch_voice_url(event.room_id, &event.message_id)
                                .await
                        }
                    };
                    match url {
                        Ok(url) => out.elements.push(ContentElement::Voice {
                            source: MediaSource::Remote(url),
                        }),
                        Err(e) => {
                            warn!("voice url fetch failed: {}", e);
                            out.elements
                                .push(ContentElement::Notice("<i>[语音]</i>".to_string()));
                        }
                    }
                }
                QqElement::File {
                    file_id,
                    name,
                    size,
                } => {
                    out.elements.push(ContentElement::Text(format!(
                        "文件: {name}\n大小: {}",
                        human_size(size)
                    )));
                    if size < crate::media::MAX_FILE_PROXY_SIZE {
                        match self.qq.fetch_file_url(event.room_id, &file_id).await {
                            Ok(url) => {
                                let source = if let Some(path) = url.strip_prefix('/') {
                                    // The client downloaded it for us; own the
                                    // file so it is removed after sending.
                                    let path = std::path::PathBuf::from(format!("/{path}"));
                                    scope.adopt(path.clone());
                                    MediaSource::Local(path)
                                } else {
                                    // fname query suffixes break the fetch
                                    let url = url
                                        .split_once("?fname=")
                                        .map(|(base, _)| base.to_string())
                                        .unwrap_or(url);
                                    MediaSource::Remote(url)
                                };
                                out.elements
                                    .push(ContentElement::File { name, size, source });
                            }
                            Err(e) => {
                                warn!("file url fetch failed: {}", e);
                                out.elements.push(ContentElement::Notice(
                                    "\n\n<i>QQ 客户端处理群文件失败</i>".to_string(),
                                ));
                            }
                        }
                    }
                }
                QqElement::Share { url } => {
                    out.elements.push(ContentElement::Share { url });
                }
                QqElement::Json(payload) => {
                    self.push_card(cards::parse_json_card(&payload), &mut out)
                        .await;
                    break;
                }
                QqElement::Xml(payload) => {
                    self.push_card(cards::parse_xml_card(&payload), &mut out)
                        .await;
                    break;
                }
                QqElement::Dice { value } => out.elements.push(ContentElement::Dice {
                    kind: DiceKind::Dice,
                    value,
                }),
                QqElement::Rps { value } => out.elements.push(ContentElement::Dice {
                    kind: DiceKind::Gesture,
                    value,
                }),
                QqElement::Poke { text } => out.elements.push(ContentElement::Poke { text }),
                QqElement::Forward { res_id, file_name } => {
                    let bundle = self.forward_bundle(res_id, file_name).await;
                    out.elements.push(bundle);
                }
            }
        }

        if event.elements.is_empty() {
            out.elements.push(ContentElement::Notice(
                "<i>[消息无法解析出内容]</i>".to_string(),
            ));
        }
        out.elements = truncate_at_forward_bundle(out.elements);
        out
    }

    async fn member_name(&self, room_id: i64, user_id: i64) -> String {
        if let Some(name) = self.roster.get(room_id, user_id).await {
            return name;
        }
        match self.qq.resolve_member(room_id, user_id).await {
            Ok(name) => {
                self.roster.insert(room_id, user_id, name.clone()).await;
                name
            }
            Err(e) => {
                warn!(room_id, user_id, "member resolve failed: {}", e);
                user_id.to_string()
            }
        }
    }

    async fn push_card(&self, card: CardContent, out: &mut QqTranslation) {
        match card {
            CardContent::Text(text) => out.elements.push(ContentElement::Text(text)),
            CardContent::ForwardBundle { res_id, file_name } => {
                let bundle = self.forward_bundle(res_id, file_name).await;
                out.elements.push(bundle);
            }
            CardContent::Location { lat, lng, address } => {
                // Cards carry GCJ-02; Telegram wants WGS-84.
                let (wlat, wlng) = geo::gcj_to_wgs(lat, lng);
                out.elements.push(ContentElement::Location {
                    lat: wlat,
                    lng: wlng,
                    title: String::new(),
                    address,
                });
            }
            CardContent::ImageByMd5 { md5 } => out.elements.push(ContentElement::Image {
                source: MediaSource::Remote(image_url_by_md5(&md5)),
                is_flash: false,
                is_spoiler: false,
                as_sticker: false,
            }),
            CardContent::Unknown { kind } => out.elements.push(ContentElement::StructuredCard {
                kind,
                payload: String::new(),
            }),
        }
    }

    async fn forward_bundle(&self, res_id: String, file_name: Option<String>) -> ContentElement {
        let brief = match self
            .qq
            .fetch_forward_bundle(&res_id, file_name.as_deref())
            .await
        {
            Ok(entries) => {
                let pairs: Vec<(String, String)> = entries
                    .into_iter()
                    .map(|e| (e.nickname, e.text))
                    .collect();
                forward_bundle_brief(&pairs)
            }
            Err(e) => {
                warn!("forward bundle fetch failed: {}", e);
                "[<i>转发多条消息（无法获取）</i>]".to_string()
            }
        };
        ContentElement::ForwardBundle {
            res_id,
            file_name,
            brief,
        }
    }
}

/// Everything the renderer needs besides the elements themselves.
pub struct RenderContext<'a> {
    pub flags: u32,
    pub personal_mode: bool,
    pub api_key: &'a str,
    pub web_endpoint: Option<&'a str>,
    pub viewer_app: Option<&'a str>,
    pub bot_username: &'a str,
}

impl RenderContext<'_> {
    fn rich_header_enabled(&self) -> bool {
        !flags::has(self.flags, flags::DISABLE_RICH_HEADER) && self.web_endpoint.is_some()
    }
}

fn md5_token(input: &str) -> String {
    format!("{:x}", md5::compute(input.as_bytes()))
}

/// Renders translated elements into the Telegram delivery buffer: the HTML
/// body, the attachment list and the action links.
pub fn render_for_telegram(elements: &[ContentElement], ctx: &RenderContext<'_>) -> DeliveryBuffer {
    let mut buffer = DeliveryBuffer::default();
    for element in elements {
        match element {
            ContentElement::Text(text) => {
                if let Some(article) = wechat_article_url(text) {
                    // Invisible anchor so Telegram renders the instant view.
                    buffer.push_text(&format!(
                        "<a href=\"https://t.me/iv?url={}&rhash=45756f9b0bb3c6\">\u{200e}</a>",
                        urlencoding_encode(article)
                    ));
                }
                buffer.push_text(&html_escape(text));
            }
            ContentElement::Notice(html) => buffer.push_text(html),
            ContentElement::Mention {
                target,
                resolved_name,
            } => {
                let label = format!("[<i>{}</i>]", html_escape(resolved_name));
                match target {
                    MentionTarget::User(id) if ctx.rich_header_enabled() => {
                        let url = rich_header_url(
                            ctx.web_endpoint.unwrap_or_default(),
                            ctx.api_key,
                            *id,
                            "",
                        );
                        buffer.push_text(&format!("<a href=\"{url}\">{label}</a>"));
                        buffer.contains_mention_link = true;
                    }
                    _ => buffer.push_text(&label),
                }
            }
            ContentElement::Face { name, .. } => {
                buffer.push_text(&format!("[<i>{}</i>]", html_escape(name)));
            }
            ContentElement::Sticker { .. } => {
                buffer.attachments.push(element.clone());
                buffer.wants_sender_label = true;
            }
            ContentElement::Image {
                source,
                is_flash: true,
                ..
            } => {
                let scope = if ctx.personal_mode { "" } else { "每人" };
                buffer.push_text(&format!("[<i>闪照</i>]\n{scope}只能查看一次"));
                if let Some(url) = source.remote_url() {
                    buffer.action_links.push(ActionLink::url(
                        "📸查看",
                        format!(
                            "https://t.me/{}?start=flash-{}",
                            ctx.bot_username,
                            md5_token(url)
                        ),
                    ));
                }
            }
            ContentElement::Image { source, as_sticker, .. } => {
                buffer.attachments.push(element.clone());
                if *as_sticker {
                    buffer.wants_sender_label = true;
                } else if let Some(url) = source.remote_url() {
                    buffer
                        .action_links
                        .push(ActionLink::url("🖼 查看原图", url.to_string()));
                }
            }
            ContentElement::Video { source } => {
                buffer.attachments.push(element.clone());
                if let Some(url) = source.remote_url() {
                    buffer
                        .action_links
                        .push(ActionLink::url("🖼 查看原图", url.to_string()));
                }
            }
            ContentElement::Voice { .. } => buffer.attachments.push(element.clone()),
            ContentElement::File { name, size, source } => {
                buffer.attachments.push(element.clone());
                let token = source
                    .remote_url()
                    .map(md5_token)
                    .unwrap_or_else(|| md5_token(&format!("{name}:{size}")));
                buffer.action_links.push(ActionLink::url(
                    "📎获取下载地址",
                    format!("https://t.me/{}?start=file-{token}", ctx.bot_username),
                ));
            }
            ContentElement::Share { url } => buffer.push_text(&html_escape(url)),
            ContentElement::StructuredCard { .. }
            | ContentElement::Dice { .. }
            | ContentElement::Poke { .. } => {
                if let Some(text) = element.placeholder_text() {
                    buffer.push_text(&text);
                }
            }
            ContentElement::Location { lat, lng, .. } => {
                buffer.attachments.push(element.clone());
                // Map links on the QQ side expect GCJ-02 again.
                let (glat, glng) = geo::wgs_to_gcj(*lat, *lng);
                buffer.push_text(&format!(
                    "<a href=\"https://uri.amap.com/marker?position={glng},{glat}\">在高德地图中查看</a>"
                ));
                buffer.suppress_header = true;
            }
            ContentElement::ForwardBundle { res_id, brief, .. } => {
                if let Some(endpoint) = ctx.web_endpoint {
                    buffer.push_text(brief);
                    let hash = md5_token(res_id);
                    let viewer = match ctx.viewer_app {
                        Some(app) => format!("{app}?startapp={hash}"),
                        None => format!("{endpoint}/ui/chatRecord?tgWebAppStartParam={hash}"),
                    };
                    buffer.action_links.push(ActionLink::url("📃查看", viewer));
                } else {
                    buffer.push_text("[<i>转发多条消息（未配置）</i>]");
                }
            }
        }
    }
    buffer.body = buffer.body.trim().to_string();
    buffer
}

fn urlencoding_encode(input: &str) -> String {
    url::form_urlencoded::byte_serialize(input.as_bytes()).collect()
}

/// Metadata the QQ materializer needs for the (single) video of a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoMeta {
    pub size: u64,
    pub mime: String,
    pub is_gif: bool,
}

/// Result of normalizing a Telegram message toward QQ.
#[derive(Debug, Default)]
pub struct TgTranslation {
    pub elements: Vec<ContentElement>,
    /// Brief shown when the mirrored message is later quoted.
    pub brief: String,
    /// `name: \n` header, prepended in group mode.
    pub header: String,
    pub spoiler: bool,
    pub video_meta: Option<VideoMeta>,
}

/// Normalizes inbound Telegram messages into `ContentElement`s.
pub struct TelegramTranslator {
    tg: Arc<dyn TelegramClient>,
    stickers: Arc<StickerIndex>,
}

impl TelegramTranslator {
    pub fn new(tg: Arc<dyn TelegramClient>, stickers: Arc<StickerIndex>) -> Self {
        Self { tg, stickers }
    }

    pub async fn translate(
        &self,
        inbound: &TelegramInbound,
        room_kind: ChatKind,
        effective_flags: u32,
    ) -> TgTranslation {
        let mut out = TgTranslation {
            header: self.build_header(inbound, effective_flags),
            ..Default::default()
        };

        if let Some(media) = &inbound.media {
            self.translate_media(media, room_kind, &mut out);
        }

        if !inbound.text.is_empty() && !out.spoiler {
            self.translate_text(inbound, &mut out).await;
        }

        out
    }

    fn build_header(&self, inbound: &TelegramInbound, effective_flags: u32) -> String {
        let mut header = inbound.sender_name.clone();
        if let Some(origin) = &inbound.forward_origin {
            header.push_str(&format!(" 转发自 {}", origin.name));
        }
        header.push_str(": \n");
        if flags::has(effective_flags, flags::COLOR_EMOJI_PREFIX) {
            let seed = if inbound.sender_color != 0 {
                inbound.sender_color
            } else {
                inbound.sender_id
            };
            let mut prefix = tg_color_emoji(seed).to_string();
            if inbound.is_channel_post {
                prefix = format!("📢{prefix}");
            }
            header = format!("{prefix}{header}");
        }
        header
    }

    fn translate_media(&self, media: &TelegramMedia, room_kind: ChatKind, out: &mut TgTranslation) {
        match media {
            TelegramMedia::Photo { url, spoiler } => {
                out.spoiler = *spoiler;
                out.elements.push(ContentElement::Image {
                    source: MediaSource::Remote(url.clone()),
                    is_flash: false,
                    is_spoiler: *spoiler,
                    as_sticker: false,
                });
                out.brief
                    .push_str(if *spoiler { "[Spoiler 图片]" } else { "[图片]" });
            }
            TelegramMedia::StickerImage { url, spoiler } => {
                out.spoiler = *spoiler;
                out.elements.push(ContentElement::Image {
                    source: MediaSource::Remote(url.clone()),
                    is_flash: false,
                    is_spoiler: *spoiler,
                    as_sticker: true,
                });
                out.brief.push_str("[图片]");
            }
            TelegramMedia::AnimatedSticker { file_handle, url } => {
                match self.stickers.face_for_sticker(file_handle) {
                    Some(face_id) => out.elements.push(ContentElement::Face {
                        id: face_id,
                        name: faces::face_label(face_id, None),
                    }),
                    None => out.elements.push(ContentElement::Sticker {
                        handle: url.clone(),
                    }),
                }
                out.brief.push_str("[贴纸]");
            }
            TelegramMedia::Video { url, size, mime } => {
                if *size > crate::media::MAX_VIDEO_SIZE {
                    out.elements
                        .push(ContentElement::Text("[视频大于 200MB]".to_string()));
                } else {
                    out.video_meta = Some(VideoMeta {
                        size: *size,
                        mime: mime.clone(),
                        is_gif: false,
                    });
                    out.elements.push(ContentElement::Video {
                        source: MediaSource::Remote(url.clone()),
                    });
                }
                out.brief.push_str("[视频]");
            }
            TelegramMedia::Gif { url, size } => {
                if *size > crate::media::MAX_VIDEO_SIZE {
                    out.elements
                        .push(ContentElement::Text("[视频大于 200MB]".to_string()));
                } else {
                    out.video_meta = Some(VideoMeta {
                        size: *size,
                        mime: "video/mp4".to_string(),
                        is_gif: true,
                    });
                    out.elements.push(ContentElement::Video {
                        source: MediaSource::Remote(url.clone()),
                    });
                }
                out.brief.push_str("[视频]");
            }
            TelegramMedia::Voice { url } => {
                out.elements.push(ContentElement::Voice {
                    source: MediaSource::Remote(url.clone()),
                });
                out.brief.push_str("[语音]");
            }
            TelegramMedia::Poll {
                question,
                answers,
                multiple_choice,
            } => {
                let kind = if *multiple_choice { "多" } else { "单" };
                let body: String = answers
                    .iter()
                    .map(|a| format!(" - {a}"))
                    .collect::<Vec<_>>()
                    .join("\n");
                out.elements.push(ContentElement::Text(format!(
                    "{kind}选投票：\n{question}\n{body}"
                )));
                out.brief.push_str("[投票]");
            }
            TelegramMedia::Contact {
                first_name,
                last_name,
                phone,
            } => {
                let mut text = format!("名片：\n{first_name}");
                if let Some(last) = last_name {
                    text.push_str(&format!(" {last}"));
                }
                if let Some(phone) = phone {
                    text.push_str(&format!("\n电话：{phone}"));
                }
                out.elements.push(ContentElement::Text(text));
                out.brief.push_str("[名片]");
            }
            TelegramMedia::Venue {
                lat,
                lng,
                title,
                address,
            } => {
                let (glat, glng) = geo::wgs_to_gcj(*lat, *lng);
                match room_kind {
                    ChatKind::Group => out.elements.push(ContentElement::Location {
                        lat: glat,
                        lng: glng,
                        title: title.clone(),
                        address: address.clone(),
                    }),
                    ChatKind::DirectMessage => out
                        .elements
                        .push(ContentElement::Text(format!("[位置：{title} ({address})]"))),
                }
                out.brief.push_str(&format!("[位置：{title}]"));
            }
            TelegramMedia::Geo { lat, lng } => {
                let (glat, glng) = geo::wgs_to_gcj(*lat, *lng);
                match room_kind {
                    ChatKind::Group => out.elements.push(ContentElement::Location {
                        lat: glat,
                        lng: glng,
                        title: "选中的位置".to_string(),
                        address: String::new(),
                    }),
                    ChatKind::DirectMessage => out.elements.push(ContentElement::Text(format!(
                        "[位置：{glat} {glng}]\nhttps://uri.amap.com/marker?position={glng},{glat}"
                    ))),
                }
                out.brief.push_str("[位置]");
            }
            TelegramMedia::Document {
                name, size, mime, ..
            } => {
                out.elements.push(ContentElement::Text(format!(
                    "文件：{name}\n类型：{mime}\n大小：{size}"
                )));
                out.brief.push_str("[文件]");
            }
        }
    }

    async fn translate_text(&self, inbound: &TelegramInbound, out: &mut TgTranslation) {
        let text = &inbound.text;
        if !inbound.custom_emojis.is_empty() {
            self.translate_with_custom_emojis(inbound, out).await;
            out.brief.push_str(text);
            return;
        }

        // A message forwarded from the bridge bot whose first line looks
        // like a header is a repeat of a mirrored QQ message; re-attribute.
        let from_self = inbound
            .forward_origin
            .as_ref()
            .is_some_and(|o| o.from_bridge_bot);
        let first_line = text.split('\n').next().unwrap_or_default();
        if from_self && HEADER_LINE_REGEX.is_match(first_line) {
            let original = text
                .split_once('\n')
                .map(|(_, rest)| rest.to_string())
                .unwrap_or_default();
            out.elements.push(ContentElement::Text(original.clone()));
            out.brief.push_str(&original);
            let origin = first_line.trim_end().trim_end_matches(':');
            out.header = format!("{} 转发自 {origin}: \n", inbound.sender_name);
            return;
        }

        out.elements.push(ContentElement::Text(text.clone()));
        out.brief.push_str(text);
    }

    /// Splits the text around custom emoji entities, turning each emoji into
    /// a sticker-like image element.
    async fn translate_with_custom_emojis(
        &self,
        inbound: &TelegramInbound,
        out: &mut TgTranslation,
    ) {
        let chars: Vec<char> = inbound.text.chars().collect();
        let mut tail: Vec<ContentElement> = Vec::new();
        let mut end = chars.len();
        let mut entities = inbound.custom_emojis.clone();
        entities.sort_by_key(|e| e.offset);
        for entity in entities.iter().rev() {
            let after_start = (entity.offset + entity.length).min(end);
            let after: String = chars[after_start..end].iter().collect();
            if !after.is_empty() {
                tail.insert(0, ContentElement::Text(after));
            }
            let segment: String = chars[entity.offset.min(end)..after_start].iter().collect();
            match self.tg.fetch_custom_emoji(&entity.document_id).await {
                Ok(url) => tail.insert(
                    0,
                    ContentElement::Image {
                        source: MediaSource::Remote(url),
                        is_flash: false,
                        is_spoiler: false,
                        as_sticker: true,
                    },
                ),
                Err(e) => {
                    warn!("custom emoji fetch failed: {}", e);
                    tail.insert(0, ContentElement::Text(segment));
                }
            }
            end = entity.offset.min(end);
        }
        let head: String = chars[..end].iter().collect();
        if !head.is_empty() {
            out.elements.push(ContentElement::Text(head));
        }
        out.elements.extend(tail);
    }
}

#[cfg(test)]
mod tests {
    use anyhow::{Result, anyhow};
    use async_trait::async_trait;

    use super::*;
    use crate::qq::{ForwardEntry, QqMessageSent, QqQuote, QqRoom, QqSendElement, QqSender, ReplyRef};
    use crate::telegram::{
        CustomEmojiEntity, FetchedMessage, ForwardOrigin, OutboundMessage, SentMessage,
    };

    struct StubQq;

    #[async_trait]
    impl QqClient for StubQq {
        fn uin(&self) -> i64 {
            1000
        }

        async fn resolve_member(&self, _room_id: i64, user_id: i64) -> Result<String> {
            Ok(format!("member{user_id}"))
        }

        async fn fetch_file_url(&self, _room_id: i64, _file_id: &str) -> Result<String> {
            Ok("https://files.example.org/f?fname=测试".to_string())
        }

        async fn fetch_video_url(&self, _room_id: i64, _file_id: &str) -> Result<String> {
            Ok("https://files.example.org/v.mp4".to_string())
        }

        async fn fetch_voice_url(&self, _room_id: i64, _message_id: &str) -> Result<String> {
            Err(anyhow!("no voice"))
        }

        async fn fetch_forward_bundle(
            &self,
            _res_id: &str,
            _file_name: Option<&str>,
        ) -> Result<Vec<ForwardEntry>> {
            Ok(vec![ForwardEntry {
                nickname: "甲".to_string(),
                text: "你好".to_string(),
            }])
        }

        async fn send_elements(
            &self,
            _room: &QqRoom,
            _elements: &[QqSendElement],
            _quote: Option<&QqQuote>,
        ) -> Result<QqMessageSent> {
            unimplemented!("not used in translator tests")
        }
    }

    struct StubTg;

    #[async_trait]
    impl TelegramClient for StubTg {
        fn bot_username(&self) -> &str {
            "bridge_bot"
        }

        async fn send_message(
            &self,
            _chat_id: i64,
            _message: &OutboundMessage,
        ) -> Result<SentMessage> {
            unimplemented!("not used in translator tests")
        }

        async fn edit_message(&self, _chat_id: i64, _message_id: i64, _new_text: &str) -> Result<()> {
            Ok(())
        }

        async fn fetch_message(
            &self,
            _chat_id: i64,
            _message_id: i64,
        ) -> Result<Option<FetchedMessage>> {
            Ok(None)
        }

        async fn pin_message(&self, _chat_id: i64, _message_id: i64) -> Result<()> {
            Ok(())
        }

        async fn fetch_custom_emoji(&self, document_id: &str) -> Result<String> {
            Ok(format!("https://emoji.example.org/{document_id}.webp"))
        }
    }

    fn qq_translator() -> QqTranslator {
        QqTranslator::new(
            Arc::new(StubQq),
            Arc::new(MemberNameCache::default()),
            Arc::new(StickerIndex::from_pairs([(14, "doc-14".to_string())])),
        )
    }

    fn event(elements: Vec<QqElement>) -> QqMessageEvent {
        QqMessageEvent {
            sender: QqSender {
                id: 42,
                name: "张三".to_string(),
                anonymous_alias: None,
            },
            room_id: -200,
            elements,
            message_id: "m1".to_string(),
            seq: 5,
            rand: 9,
            time: 1_700_000_000,
            reply_to: None,
            mentions_me: false,
            mentions_everyone: false,
        }
    }

    fn ctx<'a>(endpoint: Option<&'a str>) -> RenderContext<'a> {
        RenderContext {
            flags: 0,
            personal_mode: false,
            api_key: "k",
            web_endpoint: endpoint,
            viewer_app: None,
            bot_username: "bridge_bot",
        }
    }

    #[test]
    fn filter_drops_self_and_reply_target_mentions() {
        let translator = qq_translator();
        let mut ev = event(vec![
            QqElement::At {
                target: MentionTarget::User(1000),
                text: None,
            },
            QqElement::At {
                target: MentionTarget::User(77),
                text: None,
            },
            QqElement::Text("hi".to_string()),
        ]);
        ev.reply_to = Some(ReplyRef {
            seq: 1,
            sender_id: 77,
            rand: 0,
            time: 0,
        });
        let chain = translator.filter_chain(&ev);
        assert_eq!(chain, vec![QqElement::Text("hi".to_string())]);
    }

    #[test]
    fn filter_drops_face_caption_echo() {
        let translator = qq_translator();
        let ev = event(vec![
            QqElement::Face {
                id: 277,
                text: Some("/汪汪".to_string()),
            },
            QqElement::Text("/汪汪".to_string()),
        ]);
        let chain = translator.filter_chain(&ev);
        assert_eq!(chain.len(), 1);
    }

    #[tokio::test]
    async fn lone_face_with_pack_match_becomes_sticker() {
        let translator = qq_translator();
        let ev = event(vec![QqElement::Face { id: 14, text: None }]);
        let mut scope = TempScope::new();
        let result = translator.translate(&ev, 0, &mut scope).await;
        assert!(matches!(
            result.elements[0],
            ContentElement::Sticker { ref handle } if handle == "doc-14"
        ));
        assert!(matches!(result.elements[1], ContentElement::Face { id: 14, .. }));
    }

    #[tokio::test]
    async fn flash_downgrades_to_plain_image_when_disabled() {
        let translator = qq_translator();
        let ev = event(vec![QqElement::Flash {
            file: "abc".to_string(),
            url: "https://img.example.org/a.jpg".to_string(),
        }]);
        let mut scope = TempScope::new();
        let result = translator
            .translate(&ev, flags::DISABLE_FLASH_PIC, &mut scope)
            .await;
        assert!(matches!(result.elements[0], ContentElement::Notice(_)));
        assert!(matches!(
            result.elements[1],
            ContentElement::Image { is_flash: false, .. }
        ));
    }

    #[tokio::test]
    async fn relay_train_sentinel_short_circuits() {
        let translator = qq_translator();
        let ev = event(vec![QqElement::Text(RELAY_TRAIN_SENTINEL.to_string())]);
        let mut scope = TempScope::new();
        let result = translator.translate(&ev, 0, &mut scope).await;
        assert!(result.relay_train);
    }

    #[tokio::test]
    async fn file_url_fname_suffix_is_stripped() {
        let translator = qq_translator();
        let ev = event(vec![QqElement::File {
            file_id: "f1".to_string(),
            name: "报告.pdf".to_string(),
            size: 2048,
        }]);
        let mut scope = TempScope::new();
        let result = translator.translate(&ev, 0, &mut scope).await;
        let file = result
            .elements
            .iter()
            .find_map(|e| match e {
                ContentElement::File { source, .. } => source.remote_url(),
                _ => None,
            })
            .unwrap();
        assert_eq!(file, "https://files.example.org/f");
    }

    #[tokio::test]
    async fn mention_resolves_through_roster() {
        let translator = qq_translator();
        let ev = event(vec![QqElement::At {
            target: MentionTarget::User(55),
            text: None,
        }]);
        let mut scope = TempScope::new();
        let result = translator.translate(&ev, 0, &mut scope).await;
        assert!(matches!(
            &result.elements[0],
            ContentElement::Mention { resolved_name, .. } if resolved_name == "@member55"
        ));
    }

    #[test]
    fn render_links_mentions_through_rich_header() {
        let elements = vec![ContentElement::Mention {
            target: MentionTarget::User(55),
            resolved_name: "@李四".to_string(),
        }];
        let buffer = render_for_telegram(&elements, &ctx(Some("https://e.example.org")));
        assert!(buffer.contains_mention_link);
        assert!(buffer.body.contains("richHeader/k/55"));
    }

    #[test]
    fn render_mention_plain_without_endpoint() {
        let elements = vec![ContentElement::Mention {
            target: MentionTarget::User(55),
            resolved_name: "@李四".to_string(),
        }];
        let buffer = render_for_telegram(&elements, &ctx(None));
        assert!(!buffer.contains_mention_link);
        assert_eq!(buffer.body, "[<i>@李四</i>]");
    }

    #[test]
    fn render_flash_emits_notice_and_view_link_only() {
        let elements = vec![ContentElement::Image {
            source: MediaSource::Remote("https://img.example.org/a.jpg".to_string()),
            is_flash: true,
            is_spoiler: false,
            as_sticker: false,
        }];
        let buffer = render_for_telegram(&elements, &ctx(Some("https://e")));
        assert!(buffer.attachments.is_empty());
        assert!(buffer.body.contains("闪照"));
        assert!(buffer.body.contains("每人只能查看一次"));
        assert_eq!(buffer.action_links.len(), 1);
        assert!(buffer.action_links[0]
            .url
            .as_deref()
            .unwrap()
            .starts_with("https://t.me/bridge_bot?start=flash-"));
    }

    #[test]
    fn render_forward_bundle_without_endpoint_degrades() {
        let elements = vec![ContentElement::ForwardBundle {
            res_id: "r1".to_string(),
            file_name: None,
            brief: "<b>转发的消息记录</b>".to_string(),
        }];
        let buffer = render_for_telegram(&elements, &ctx(None));
        assert!(buffer.body.contains("未配置"));
        assert!(buffer.action_links.is_empty());
    }

    #[test]
    fn render_location_suppresses_header_and_links_amap() {
        let elements = vec![ContentElement::Location {
            lat: 31.2,
            lng: 121.4,
            title: String::new(),
            address: "某地".to_string(),
        }];
        let buffer = render_for_telegram(&elements, &ctx(Some("https://e")));
        assert!(buffer.suppress_header);
        assert!(buffer.body.contains("uri.amap.com"));
        assert_eq!(buffer.attachments.len(), 1);
    }

    fn inbound(text: &str) -> TelegramInbound {
        TelegramInbound {
            chat_id: 555,
            message_id: 10,
            sender_id: 33,
            sender_name: "Alice".to_string(),
            sender_color: 0,
            is_channel_post: false,
            text: text.to_string(),
            media: None,
            custom_emojis: Vec::new(),
            forward_origin: None,
            reply_to_id: None,
            quote_text: None,
        }
    }

    #[tokio::test]
    async fn telegram_text_translates_with_header() {
        let translator = TelegramTranslator::new(Arc::new(StubTg), Arc::new(StickerIndex::new()));
        let out = translator
            .translate(&inbound("hello"), ChatKind::Group, 0)
            .await;
        assert_eq!(out.header, "Alice: \n");
        assert_eq!(out.elements, vec![ContentElement::Text("hello".to_string())]);
        assert_eq!(out.brief, "hello");
    }

    #[tokio::test]
    async fn color_prefix_applies_to_telegram_header() {
        let translator = TelegramTranslator::new(Arc::new(StubTg), Arc::new(StickerIndex::new()));
        let out = translator
            .translate(&inbound("hi"), ChatKind::Group, flags::COLOR_EMOJI_PREFIX)
            .await;
        assert!(out.header.ends_with("Alice: \n"));
        assert_ne!(out.header, "Alice: \n");
    }

    #[tokio::test]
    async fn repeat_as_forward_reattributes_header() {
        let translator = TelegramTranslator::new(Arc::new(StubTg), Arc::new(StickerIndex::new()));
        let mut msg = inbound("张三: \n你好");
        msg.forward_origin = Some(ForwardOrigin {
            name: "bridge_bot".to_string(),
            from_bridge_bot: true,
        });
        let out = translator.translate(&msg, ChatKind::Group, 0).await;
        assert_eq!(out.header, "Alice 转发自 张三: \n");
        assert_eq!(out.elements, vec![ContentElement::Text("你好".to_string())]);
    }

    #[tokio::test]
    async fn custom_emojis_split_text_into_segments() {
        let translator = TelegramTranslator::new(Arc::new(StubTg), Arc::new(StickerIndex::new()));
        let mut msg = inbound("ab😀cd");
        msg.custom_emojis = vec![CustomEmojiEntity {
            offset: 2,
            length: 1,
            document_id: "doc9".to_string(),
        }];
        let out = translator.translate(&msg, ChatKind::Group, 0).await;
        assert_eq!(out.elements.len(), 3);
        assert_eq!(out.elements[0], ContentElement::Text("ab".to_string()));
        assert!(matches!(
            out.elements[1],
            ContentElement::Image { as_sticker: true, .. }
        ));
        assert_eq!(out.elements[2], ContentElement::Text("cd".to_string()));
    }

    #[tokio::test]
    async fn known_animated_sticker_maps_to_face() {
        let translator = TelegramTranslator::new(
            Arc::new(StubTg),
            Arc::new(StickerIndex::from_pairs([(14, "doc-14".to_string())])),
        );
        let mut msg = inbound("");
        msg.media = Some(TelegramMedia::AnimatedSticker {
            file_handle: "doc-14".to_string(),
            url: "https://s.example.org/s.tgs".to_string(),
        });
        let out = translator.translate(&msg, ChatKind::Group, 0).await;
        assert!(matches!(out.elements[0], ContentElement::Face { id: 14, .. }));
        assert_eq!(out.brief, "[贴纸]");
    }

    #[tokio::test]
    async fn oversized_video_becomes_notice_text() {
        let translator = TelegramTranslator::new(Arc::new(StubTg), Arc::new(StickerIndex::new()));
        let mut msg = inbound("");
        msg.media = Some(TelegramMedia::Video {
            url: "https://v.example.org/v.mp4".to_string(),
            size: 300 * 1000 * 1000,
            mime: "video/mp4".to_string(),
        });
        let out = translator.translate(&msg, ChatKind::Group, 0).await;
        assert_eq!(
            out.elements,
            vec![ContentElement::Text("[视频大于 200MB]".to_string())]
        );
        assert!(out.video_meta.is_none());
    }

    #[tokio::test]
    async fn venue_in_dm_degrades_to_text() {
        let translator = TelegramTranslator::new(Arc::new(StubTg), Arc::new(StickerIndex::new()));
        let mut msg = inbound("");
        msg.media = Some(TelegramMedia::Venue {
            lat: 31.0,
            lng: 121.0,
            title: "外滩".to_string(),
            address: "中山东一路".to_string(),
        });
        let out = translator
            .translate(&msg, ChatKind::DirectMessage, 0)
            .await;
        assert!(matches!(&out.elements[0], ContentElement::Text(t) if t.contains("外滩")));
        assert_eq!(out.brief, "[位置：外滩]");
    }
}
