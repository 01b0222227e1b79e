use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;
use serde_json::json;
use tracing::{error, info, warn};

use crate::bridge::dispatch::{QqDispatcher, TelegramDispatcher};
use crate::bridge::header::{plan_qq_header, rich_header_url};
use crate::bridge::reply::ReplyResolver;
use crate::bridge::stickers::StickerIndex;
use crate::bridge::translate::{
    QqTranslator, RenderContext, TelegramTranslator, render_for_telegram,
};
use crate::bridge::{ForwardPair, InstanceSettings};
use crate::cache::MemberNameCache;
use crate::content::{ActionLink, brief_text};
use crate::db::stores::MessageStore;
use crate::flags;
use crate::media::{MediaPipeline, TempScope};
use crate::qq::{QqClient, QqMessageEvent};
use crate::telegram::{OutboundMessage, TelegramClient, TelegramInbound};
use crate::utils::formatting::{html_escape, truncate_display_name};
use crate::utils::pastebin::DiagnosticSink;

/// What became of one inbound event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardOutcome {
    Delivered { rich_header_used: bool },
    /// Accumulated into the relay-train summary instead of being mirrored.
    RelayTrain,
    Skipped,
    Failed,
}

#[derive(Debug, Default)]
struct RelayTrain {
    users: Vec<(i64, String)>,
    tg_message_id: Option<i64>,
}

/// Sequences one event end to end: translate, resolve the reply, render,
/// dispatch, persist. One task per event, no retries.
pub struct ForwardService {
    settings: InstanceSettings,
    tg: Arc<dyn TelegramClient>,
    qq_translator: QqTranslator,
    tg_translator: TelegramTranslator,
    reply: ReplyResolver,
    tg_dispatch: TelegramDispatcher,
    qq_dispatch: QqDispatcher,
    diagnostics: Option<Arc<dyn DiagnosticSink>>,
    trains: Mutex<HashMap<i64, RelayTrain>>,
}

impl ForwardService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: InstanceSettings,
        qq: Arc<dyn QqClient>,
        tg: Arc<dyn TelegramClient>,
        store: Arc<dyn MessageStore>,
        media: Arc<MediaPipeline>,
        stickers: Arc<StickerIndex>,
        roster: Arc<MemberNameCache>,
        diagnostics: Option<Arc<dyn DiagnosticSink>>,
    ) -> Self {
        Self {
            qq_translator: QqTranslator::new(Arc::clone(&qq), roster, Arc::clone(&stickers)),
            tg_translator: TelegramTranslator::new(Arc::clone(&tg), stickers),
            reply: ReplyResolver::new(Arc::clone(&store), settings.id, qq.uin()),
            tg_dispatch: TelegramDispatcher::new(
                Arc::clone(&tg),
                Arc::clone(&media),
                Arc::clone(&store),
                settings.id,
            ),
            qq_dispatch: QqDispatcher::new(qq, media, store, settings.id),
            settings,
            tg,
            diagnostics,
            trains: Mutex::new(HashMap::new()),
        }
    }

    pub async fn forward_from_qq(&self, event: &QqMessageEvent, pair: &ForwardPair) -> ForwardOutcome {
        let effective = pair.effective_flags(self.settings.flags);
        if flags::has(effective, flags::DISABLE_QQ_TO_TG) {
            return ForwardOutcome::Skipped;
        }
        let mut scope = TempScope::new();
        match self.forward_from_qq_inner(event, pair, effective, &mut scope).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.report_qq_failure(event, pair, &e).await;
                ForwardOutcome::Failed
            }
        }
    }

    async fn forward_from_qq_inner(
        &self,
        event: &QqMessageEvent,
        pair: &ForwardPair,
        effective: u32,
        scope: &mut TempScope,
    ) -> Result<ForwardOutcome> {
        let translation = self.qq_translator.translate(event, effective, scope).await;
        if translation.relay_train {
            self.extend_relay_train(event, pair).await;
            return Ok(ForwardOutcome::RelayTrain);
        }
        self.trains.lock().remove(&pair.tg_chat_id);

        let personal = self.settings.work_mode.is_personal();
        let is_dm = pair.qq_room.is_dm();
        let ctx = RenderContext {
            flags: effective,
            personal_mode: personal,
            api_key: &pair.api_key,
            web_endpoint: self.settings.web_endpoint.as_deref(),
            viewer_app: self.settings.viewer_app.as_deref(),
            bot_username: self.tg.bot_username(),
        };
        let mut buffer = render_for_telegram(&translation.elements, &ctx);

        if let Some(reply) = &event.reply_to {
            let resolved = self.reply.resolve_for_telegram(event.room_id, reply).await;
            buffer.reply_target_id = resolved.reply_to;
            if let Some(note) = resolved.note {
                buffer.body.push_str(note);
            }
        }

        if personal && !is_dm && event.mentions_me && buffer.reply_target_id.is_none() {
            if let Some(owner) = &self.settings.owner_username {
                buffer
                    .body
                    .push_str(&format!("\n<b>@{}</b>", html_escape(owner)));
            }
        }

        if buffer.is_empty() {
            return Ok(ForwardOutcome::Skipped);
        }

        let display = match &event.sender.anonymous_alias {
            Some(alias) => format!("[{}]{alias}", event.sender.name),
            None => event.sender.name.clone(),
        };
        let display = truncate_display_name(&display);
        let plan = plan_qq_header(
            &display,
            event.sender.id,
            is_dm,
            flags::has(effective, flags::COLOR_EMOJI_PREFIX),
            !flags::has(effective, flags::DISABLE_RICH_HEADER),
            self.settings.web_endpoint.as_deref(),
            &pair.api_key,
        );

        let brief = brief_text(&translation.elements);
        let delivery = self
            .tg_dispatch
            .dispatch(pair, event, buffer, plan, &brief, scope)
            .await?;

        if personal
            && !is_dm
            && event.mentions_everyone
            && !flags::has(effective, flags::DISABLE_QUOTE_PIN)
        {
            if let Err(e) = self.tg.pin_message(pair.tg_chat_id, delivery.sent.id).await {
                warn!("pin on mention-all failed: {}", e);
            }
        }

        info!(
            room_id = event.room_id,
            chat_id = pair.tg_chat_id,
            tg_msg_id = delivery.sent.id,
            rich_header = delivery.rich_header_used,
            "mirrored qq message to telegram"
        );
        Ok(ForwardOutcome::Delivered {
            rich_header_used: delivery.rich_header_used,
        })
    }

    /// Appends the sender to the per-pair relay train and refreshes the
    /// single summary message instead of mirroring each sticker.
    async fn extend_relay_train(&self, event: &QqMessageEvent, pair: &ForwardPair) {
        let (users, existing) = {
            let mut trains = self.trains.lock();
            let train = trains.entry(pair.tg_chat_id).or_default();
            if !train.users.iter().any(|(id, _)| *id == event.sender.id) {
                train
                    .users
                    .push((event.sender.id, event.sender.name.clone()));
            }
            (train.users.clone(), train.tg_message_id)
        };

        let roster = users
            .iter()
            .map(|(id, name)| match &self.settings.web_endpoint {
                Some(endpoint) => format!(
                    "<b><a href=\"{}\">{}</a></b>",
                    rich_header_url(endpoint, &pair.api_key, *id, ""),
                    html_escape(name)
                ),
                None => format!("<b>{}</b>", html_escape(name)),
            })
            .collect::<Vec<_>>()
            .join("\n");
        let text = format!("<i>以下成员接了火车：</i>\n\n{roster}");

        match existing {
            Some(message_id) => {
                if let Err(e) = self.tg.edit_message(pair.tg_chat_id, message_id, &text).await {
                    warn!("relay train edit failed: {}", e);
                }
            }
            None => match self
                .tg
                .send_message(pair.tg_chat_id, &OutboundMessage::text_only(text))
                .await
            {
                Ok(sent) => {
                    if let Some(train) = self.trains.lock().get_mut(&pair.tg_chat_id) {
                        train.tg_message_id = Some(sent.id);
                    }
                }
                Err(e) => warn!("relay train send failed: {}", e),
            },
        }
    }

    async fn report_qq_failure(
        &self,
        event: &QqMessageEvent,
        pair: &ForwardPair,
        error: &anyhow::Error,
    ) {
        error!(
            room_id = event.room_id,
            message_id = %event.message_id,
            "qq to telegram forward failed: {:#}",
            error
        );
        let dump_url = self
            .upload_diagnostic(json!({
                "direction": "qq_to_tg",
                "room_id": event.room_id,
                "message_id": event.message_id,
                "seq": event.seq,
                "error": format!("{error:#}"),
            }))
            .await;

        if self.settings.work_mode.is_personal() {
            let mut notice =
                OutboundMessage::text_only("<i>有一条来自 QQ 的消息转发失败</i>");
            if let Some(url) = dump_url {
                notice.action_links.push(ActionLink::url("查看详情", url));
            }
            if let Err(e) = self.tg.send_message(pair.tg_chat_id, &notice).await {
                warn!("operator failure notice failed: {}", e);
            }
        }
    }

    pub async fn forward_from_telegram(
        &self,
        inbound: &TelegramInbound,
        pair: &ForwardPair,
    ) -> ForwardOutcome {
        let effective = pair.effective_flags(self.settings.flags);
        if flags::has(effective, flags::DISABLE_TG_TO_QQ) {
            return ForwardOutcome::Skipped;
        }
        let mut scope = TempScope::new();
        match self
            .forward_from_telegram_inner(inbound, pair, effective, &mut scope)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                self.report_tg_failure(inbound, pair, &e).await;
                ForwardOutcome::Failed
            }
        }
    }

    async fn forward_from_telegram_inner(
        &self,
        inbound: &TelegramInbound,
        pair: &ForwardPair,
        effective: u32,
        scope: &mut TempScope,
    ) -> Result<ForwardOutcome> {
        self.trains.lock().remove(&pair.tg_chat_id);

        let translation = self
            .tg_translator
            .translate(inbound, pair.qq_room.kind, effective)
            .await;
        if translation.elements.is_empty() {
            return Ok(ForwardOutcome::Skipped);
        }

        let quote = match inbound.reply_to_id {
            Some(reply_to) => Some(
                self.reply
                    .resolve_for_qq(inbound.chat_id, reply_to, inbound.quote_text.as_deref())
                    .await,
            ),
            None => None,
        };

        self.qq_dispatch
            .dispatch(
                pair,
                inbound,
                translation,
                quote,
                effective,
                self.settings.work_mode.is_personal(),
                scope,
            )
            .await?;
        Ok(ForwardOutcome::Delivered {
            rich_header_used: false,
        })
    }

    async fn report_tg_failure(
        &self,
        inbound: &TelegramInbound,
        pair: &ForwardPair,
        error: &anyhow::Error,
    ) {
        error!(
            chat_id = inbound.chat_id,
            message_id = inbound.message_id,
            "telegram to qq forward failed: {:#}",
            error
        );
        self.upload_diagnostic(json!({
            "direction": "tg_to_qq",
            "chat_id": inbound.chat_id,
            "message_id": inbound.message_id,
            "error": format!("{error:#}"),
        }))
        .await;

        let notice = OutboundMessage {
            text: format!("<i>转发失败：{}</i>", html_escape(&format!("{error:#}"))),
            reply_to: Some(inbound.message_id),
            ..Default::default()
        };
        if let Err(e) = self.tg.send_message(pair.tg_chat_id, &notice).await {
            warn!("failure reply failed: {}", e);
        }
    }

    /// Best effort; a diagnostic that cannot be uploaded is only logged.
    async fn upload_diagnostic(&self, payload: serde_json::Value) -> Option<String> {
        let sink = self.diagnostics.as_ref()?;
        match sink.upload(&payload).await {
            Ok(url) => Some(url),
            Err(e) => {
                warn!("diagnostic upload failed: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use anyhow::{Result, anyhow};
    use async_trait::async_trait;

    use super::*;
    use crate::bridge::WorkMode;
    use crate::db::stores::MemoryMessageStore;
    use crate::media::DisabledTranscoder;
    use crate::qq::{
        ForwardEntry, QqElement, QqMessageSent, QqQuote, QqRoom, QqSendElement, QqSender,
    };
    use crate::telegram::{FetchedMessage, SentMessage};
    use parking_lot::Mutex as PlMutex;

    #[derive(Default)]
    struct RecordingTg {
        sent: PlMutex<Vec<(i64, OutboundMessage)>>,
        edits: PlMutex<Vec<(i64, i64, String)>>,
        pins: PlMutex<Vec<i64>>,
        fail_sends: bool,
    }

    #[async_trait]
    impl TelegramClient for RecordingTg {
        fn bot_username(&self) -> &str {
            "bridge_bot"
        }

        async fn send_message(&self, chat_id: i64, message: &OutboundMessage) -> Result<SentMessage> {
            if self.fail_sends {
                return Err(anyhow!("telegram unavailable"));
            }
            let mut sent = self.sent.lock();
            sent.push((chat_id, message.clone()));
            Ok(SentMessage {
                id: sent.len() as i64,
                timestamp: 0,
            })
        }

        async fn edit_message(&self, chat_id: i64, message_id: i64, new_text: &str) -> Result<()> {
            self.edits.lock().push((chat_id, message_id, new_text.to_string()));
            Ok(())
        }

        async fn fetch_message(&self, _chat_id: i64, message_id: i64) -> Result<Option<FetchedMessage>> {
            Ok(Some(FetchedMessage {
                id: message_id,
                has_web_preview: true,
            }))
        }

        async fn pin_message(&self, _chat_id: i64, message_id: i64) -> Result<()> {
            self.pins.lock().push(message_id);
            Ok(())
        }

        async fn fetch_custom_emoji(&self, document_id: &str) -> Result<String> {
            Ok(format!("https://emoji.example.org/{document_id}.webp"))
        }
    }

    #[derive(Default)]
    struct RecordingQq {
        sent: PlMutex<Vec<Vec<QqSendElement>>>,
    }

    #[async_trait]
    impl QqClient for RecordingQq {
        fn uin(&self) -> i64 {
            1000
        }

        async fn resolve_member(&self, _room_id: i64, user_id: i64) -> Result<String> {
            Ok(format!("member{user_id}"))
        }

        async fn fetch_file_url(&self, _room_id: i64, _file_id: &str) -> Result<String> {
            Err(anyhow!("no files"))
        }

        async fn fetch_video_url(&self, _room_id: i64, _file_id: &str) -> Result<String> {
            Err(anyhow!("no videos"))
        }

        async fn fetch_voice_url(&self, _room_id: i64, _message_id: &str) -> Result<String> {
            Err(anyhow!("no voices"))
        }

        async fn fetch_forward_bundle(
            &self,
            _res_id: &str,
            _file_name: Option<&str>,
        ) -> Result<Vec<ForwardEntry>> {
            Ok(Vec::new())
        }

        async fn send_elements(
            &self,
            _room: &QqRoom,
            elements: &[QqSendElement],
            _quote: Option<&QqQuote>,
        ) -> Result<QqMessageSent> {
            let mut sent = self.sent.lock();
            sent.push(elements.to_vec());
            Ok(QqMessageSent {
                message_id: format!("qq{}", sent.len()),
                seq: sent.len() as i64,
                rand: 7,
                time: 1_700_000_000,
            })
        }
    }

    fn settings(mode: WorkMode) -> InstanceSettings {
        InstanceSettings {
            id: 0,
            flags: 0,
            work_mode: mode,
            owner_username: Some("owner".to_string()),
            web_endpoint: Some("https://web.example.org".to_string()),
            viewer_app: None,
        }
    }

    fn pair() -> ForwardPair {
        ForwardPair {
            qq_room: QqRoom::group(-200),
            tg_chat_id: 555,
            flags: 0,
            api_key: "k".to_string(),
            mapped_identities: HashMap::new(),
        }
    }

    fn service(
        mode: WorkMode,
        tg: Arc<RecordingTg>,
        qq: Arc<RecordingQq>,
    ) -> (ForwardService, Arc<MemoryMessageStore>) {
        let store = Arc::new(MemoryMessageStore::new());
        let media = Arc::new(MediaPipeline::new(Arc::new(DisabledTranscoder)));
        let service = ForwardService::new(
            settings(mode),
            qq,
            tg,
            store.clone(),
            media,
            Arc::new(StickerIndex::new()),
            Arc::new(MemberNameCache::default()),
            None,
        );
        (service, store)
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
    async fn disabled_direction_is_skipped() {
        let tg = Arc::new(RecordingTg::default());
        let qq = Arc::new(RecordingQq::default());
        let (service, _) = service(WorkMode::Group, tg.clone(), qq);
        let mut pair = pair();
        pair.flags = flags::DISABLE_QQ_TO_TG;
        let outcome = service
            .forward_from_qq(&event(vec![QqElement::Text("hi".to_string())]), &pair)
            .await;
        assert_eq!(outcome, ForwardOutcome::Skipped);
        assert!(tg.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn text_message_is_mirrored_and_mapped() {
        let tg = Arc::new(RecordingTg::default());
        let qq = Arc::new(RecordingQq::default());
        let (service, store) = service(WorkMode::Group, tg.clone(), qq);
        let outcome = service
            .forward_from_qq(&event(vec![QqElement::Text("你好".to_string())]), &pair())
            .await;
        assert!(matches!(outcome, ForwardOutcome::Delivered { .. }));
        let sent = tg.sent.lock();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].1.text.contains("你好"));
        drop(sent);
        let mapping = store.find_by_qq(-200, 5, 42, 0).await.unwrap().unwrap();
        assert_eq!(mapping.tg_chat_id, 555);
    }

    #[tokio::test]
    async fn relay_train_accumulates_and_edits_summary() {
        let tg = Arc::new(RecordingTg::default());
        let qq = Arc::new(RecordingQq::default());
        let (service, _) = service(WorkMode::Group, tg.clone(), qq);
        let pair = pair();
        let sentinel = crate::bridge::translate::RELAY_TRAIN_SENTINEL;

        let first = service
            .forward_from_qq(&event(vec![QqElement::Text(sentinel.to_string())]), &pair)
            .await;
        assert_eq!(first, ForwardOutcome::RelayTrain);
        assert_eq!(tg.sent.lock().len(), 1);
        assert!(tg.sent.lock()[0].1.text.contains("接了火车"));

        let mut second_event = event(vec![QqElement::Text(sentinel.to_string())]);
        second_event.sender.id = 43;
        second_event.sender.name = "李四".to_string();
        let second = service.forward_from_qq(&second_event, &pair).await;
        assert_eq!(second, ForwardOutcome::RelayTrain);
        // The second rider edits the summary instead of sending a new one.
        assert_eq!(tg.sent.lock().len(), 1);
        let edits = tg.edits.lock();
        assert_eq!(edits.len(), 1);
        assert!(edits[0].2.contains("李四"));
        assert!(edits[0].2.contains("张三"));
    }

    #[tokio::test]
    async fn normal_message_clears_relay_train() {
        let tg = Arc::new(RecordingTg::default());
        let qq = Arc::new(RecordingQq::default());
        let (service, _) = service(WorkMode::Group, tg.clone(), qq);
        let pair = pair();
        let sentinel = crate::bridge::translate::RELAY_TRAIN_SENTINEL;

        service
            .forward_from_qq(&event(vec![QqElement::Text(sentinel.to_string())]), &pair)
            .await;
        service
            .forward_from_qq(&event(vec![QqElement::Text("正常消息".to_string())]), &pair)
            .await;
        service
            .forward_from_qq(&event(vec![QqElement::Text(sentinel.to_string())]), &pair)
            .await;
        // The train restarted, so a fresh summary message was sent.
        let summaries = tg
            .sent
            .lock()
            .iter()
            .filter(|(_, m)| m.text.contains("接了火车"))
            .count();
        assert_eq!(summaries, 2);
    }

    #[tokio::test]
    async fn mention_all_pins_in_personal_mode() {
        let tg = Arc::new(RecordingTg::default());
        let qq = Arc::new(RecordingQq::default());
        let (service, _) = service(WorkMode::Personal, tg.clone(), qq);
        let mut ev = event(vec![QqElement::Text("大家好".to_string())]);
        ev.mentions_everyone = true;
        let outcome = service.forward_from_qq(&ev, &pair()).await;
        assert!(matches!(outcome, ForwardOutcome::Delivered { .. }));
        assert_eq!(tg.pins.lock().len(), 1);
    }

    #[tokio::test]
    async fn mention_of_me_annotates_in_personal_mode() {
        let tg = Arc::new(RecordingTg::default());
        let qq = Arc::new(RecordingQq::default());
        let (service, _) = service(WorkMode::Personal, tg.clone(), qq);
        let mut ev = event(vec![QqElement::Text("喂".to_string())]);
        ev.mentions_me = true;
        service.forward_from_qq(&ev, &pair()).await;
        assert!(tg.sent.lock()[0].1.text.contains("@owner"));
    }

    #[tokio::test]
    async fn telegram_text_reaches_qq_with_header_and_provenance() {
        let tg = Arc::new(RecordingTg::default());
        let qq = Arc::new(RecordingQq::default());
        let (service, store) = service(WorkMode::Group, tg, qq.clone());
        let outcome = service.forward_from_telegram(&inbound("hello"), &pair()).await;
        assert!(matches!(outcome, ForwardOutcome::Delivered { .. }));
        let sent = qq.sent.lock();
        assert_eq!(sent.len(), 1);
        assert!(matches!(&sent[0][0], QqSendElement::Text(t) if t == "Alice: \n"));
        assert!(matches!(&sent[0][1], QqSendElement::Text(t) if t == "hello"));
        assert!(sent[0].last().unwrap().is_provenance());
        drop(sent);
        let mapping = store.find_by_telegram(555, 10, 0).await.unwrap().unwrap();
        assert_eq!(mapping.qq_room_id, -200);
        assert_eq!(mapping.brief, "hello");
    }

    #[tokio::test]
    async fn empty_telegram_message_is_skipped() {
        let tg = Arc::new(RecordingTg::default());
        let qq = Arc::new(RecordingQq::default());
        let (service, _) = service(WorkMode::Group, tg, qq.clone());
        let outcome = service.forward_from_telegram(&inbound(""), &pair()).await;
        assert_eq!(outcome, ForwardOutcome::Skipped);
        assert!(qq.sent.lock().is_empty());
    }

    #[derive(Default)]
    struct CountingSink {
        uploads: PlMutex<Vec<serde_json::Value>>,
    }

    #[async_trait]
    impl DiagnosticSink for CountingSink {
        async fn upload(&self, payload: &serde_json::Value) -> Result<String> {
            self.uploads.lock().push(payload.clone());
            Ok("https://paste.example.org/1".to_string())
        }
    }

    #[tokio::test]
    async fn telegram_outage_fails_the_forward_and_uploads_one_diagnostic() {
        let failing_tg = Arc::new(RecordingTg {
            fail_sends: true,
            ..Default::default()
        });
        let qq = Arc::new(RecordingQq::default());
        let sink = Arc::new(CountingSink::default());
        let media = Arc::new(MediaPipeline::new(Arc::new(DisabledTranscoder)));
        let failing = ForwardService::new(
            settings(WorkMode::Group),
            qq,
            failing_tg,
            Arc::new(MemoryMessageStore::new()),
            media,
            Arc::new(StickerIndex::new()),
            Arc::new(MemberNameCache::default()),
            Some(sink.clone()),
        );
        let outcome = failing
            .forward_from_qq(&event(vec![QqElement::Text("hi".to_string())]), &pair())
            .await;
        assert_eq!(outcome, ForwardOutcome::Failed);
        let uploads = sink.uploads.lock();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0]["direction"], "qq_to_tg");
    }
}
