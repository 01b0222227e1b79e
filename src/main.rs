#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info, warn};

mod bridge;
mod cache;
mod cli;
mod config;
mod content;
mod db;
mod flags;
mod media;
mod qq;
mod telegram;
mod utils;

use bridge::stickers::StickerIndex;
use bridge::{BridgeCore, ForwardPair, ForwardService, InstanceSettings};
use cache::MemberNameCache;
use cli::{Cli, Commands};
use config::Config;
use media::{DisabledTranscoder, GatewayTranscoder, MediaPipeline, Transcoder};
use qq::gateway::QqGateway;
use qq::{ChatKind, QqClient, QqRoom};
use telegram::TelegramClient;
use telegram::gateway::TelegramGateway;
use utils::PastebinClient;
use utils::pastebin::DiagnosticSink;

#[tokio::main]
async fn main() -> Result<()> {
    utils::logging::init_tracing();

    let cli = Cli::parse();
    let config = Config::load_from_file(&cli.config)?;

    match cli.command {
        Some(Commands::ValidateConfig) => {
            println!("configuration ok: {} pair(s)", config.pairs.len());
            return Ok(());
        }
        Some(Commands::ListPairs) => {
            for pair in &config.pairs {
                println!(
                    "qq {} ({:?}) <-> tg {}",
                    pair.qq_room_id, pair.chat_kind, pair.tg_chat_id
                );
            }
            return Ok(());
        }
        None => {}
    }

    info!("qq-telegram bridge starting up");

    let db_manager = db::DatabaseManager::new(&config.database).await?;
    db_manager.migrate().await?;
    let store = db_manager.message_store();

    let qq_gateway = Arc::new(QqGateway::new(
        &config.auth.qq_gateway,
        config.auth.qq_token.clone(),
        config.auth.qq_uin,
    ));
    let qq: Arc<dyn QqClient> = qq_gateway.clone();
    let tg_gateway = Arc::new(TelegramGateway::new(
        &config.auth.tg_gateway,
        config.auth.tg_token.clone(),
        &config.auth.bot_username,
    ));
    let tg: Arc<dyn TelegramClient> = tg_gateway.clone();

    let transcoder: Arc<dyn Transcoder> = match &config.auth.transcoder {
        Some(endpoint) => Arc::new(GatewayTranscoder::new(endpoint)),
        None => {
            warn!("no transcoding service configured, voice and sticker transfers will degrade");
            Arc::new(DisabledTranscoder)
        }
    };
    let media = Arc::new(MediaPipeline::new(transcoder));

    let stickers = Arc::new(StickerIndex::from_pairs(
        config
            .stickers
            .iter()
            .map(|s| (s.face_id, s.file_handle.clone())),
    ));
    let roster = Arc::new(MemberNameCache::new(Duration::from_secs(
        config.limits.member_cache_ttl_secs,
    )));
    let diagnostics: Option<Arc<dyn DiagnosticSink>> = config
        .bridge
        .pastebin_endpoint
        .as_deref()
        .map(|endpoint| Arc::new(PastebinClient::new(endpoint)) as Arc<dyn DiagnosticSink>);

    let settings = InstanceSettings {
        id: config.bridge.instance_id,
        flags: config.bridge.instance_flags(),
        work_mode: config.bridge.work_mode,
        owner_username: config.bridge.owner_username.clone(),
        web_endpoint: config.bridge.web_endpoint.clone(),
        viewer_app: config.bridge.viewer_app.clone(),
    };
    let pairs: Vec<Arc<ForwardPair>> = config
        .pairs
        .iter()
        .map(|p| {
            Arc::new(ForwardPair {
                qq_room: match p.chat_kind {
                    ChatKind::Group => QqRoom::group(p.qq_room_id),
                    ChatKind::DirectMessage => QqRoom::direct(p.qq_room_id),
                },
                tg_chat_id: p.tg_chat_id,
                flags: p.flags,
                api_key: p.api_key.clone(),
                mapped_identities: HashMap::new(),
            })
        })
        .collect();

    let forward = ForwardService::new(
        settings,
        qq.clone(),
        tg,
        store,
        media,
        stickers,
        roster,
        diagnostics,
    );
    let core = Arc::new(BridgeCore::new(pairs, forward));

    let qq_core = core.clone();
    let qq_poller = tokio::spawn(async move {
        loop {
            match qq_gateway.poll_events().await {
                Ok(events) => {
                    for event in events {
                        qq_core.handle_qq_event(event).await;
                    }
                }
                Err(e) => {
                    error!("qq event poll failed: {}", e);
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
            }
        }
    });

    let tg_core = core.clone();
    let tg_poller = tokio::spawn(async move {
        loop {
            match tg_gateway.poll_events().await {
                Ok(events) => {
                    for inbound in events {
                        tg_core.handle_telegram_message(inbound).await;
                    }
                }
                Err(e) => {
                    error!("telegram event poll failed: {}", e);
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
            }
        }
    });

    tokio::pin!(qq_poller);
    tokio::pin!(tg_poller);

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("received Ctrl+C, beginning shutdown");
        },
        _ = &mut qq_poller => {
            info!("qq poller exited, beginning shutdown");
        },
        _ = &mut tg_poller => {
            info!("telegram poller exited, beginning shutdown");
        },
    }

    qq_poller.abort();
    tg_poller.abort();

    info!("qq-telegram bridge shutting down");
    Ok(())
}
