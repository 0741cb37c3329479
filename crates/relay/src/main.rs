use std::{sync::Arc, time::Duration};

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};

use relay_core::{
    bus::{InboundSink, MessageBus, OutboundMessage},
    channel::{
        port::{AttachmentDownloader, PlatformSession, Transcriber},
        dispatch_outbound, AdapterConfig, ChannelAdapter, TypingConfig,
    },
    config::Config,
    download::{DownloadConfig, HttpDownloader},
    security::AllowList,
    transcription::TranscriptionGate,
};
use relay_openai::OpenAiTranscriber;
use relay_telegram::TelegramSession;

fn main() -> anyhow::Result<()> {
    relay_core::logging::init("relay")?;

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;
    let result = rt.block_on(run());
    // A pending stdin read holds a blocking thread until the next line arrives.
    rt.shutdown_timeout(Duration::from_secs(1));
    result
}

async fn run() -> anyhow::Result<()> {
    let cfg = Config::load()?;
    let bus = Arc::new(MessageBus::new(cfg.bus_capacity));
    let adapter = Arc::new(build_adapter(&cfg, bus.clone())?);

    adapter.start().await.context("failed to start channel")?;
    info!(
        channel = %adapter.name(),
        transcription = cfg.transcription_configured(),
        allow_list = cfg.allow_from.len(),
        "relay running"
    );

    let to_stdout = tokio::spawn(write_inbound(bus.clone()));
    let to_channel = tokio::spawn(dispatch_outbound(bus.clone(), adapter.clone()));

    tokio::select! {
        r = tokio::signal::ctrl_c() => {
            if let Err(e) = r {
                warn!(error = %e, "failed to listen for ctrl-c");
            }
            info!("received ctrl-c, shutting down");
        }
        r = read_outbound(bus.clone()) => match r {
            Ok(()) => info!("stdin closed, shutting down"),
            Err(e) => warn!(error = %e, "stdin reader failed, shutting down"),
        },
    }

    // Deliver replies already queued before the channel goes away.
    bus.close();
    if let Err(e) = to_channel.await {
        warn!(error = %e, "outbound dispatcher panicked");
    }
    if let Err(e) = adapter.stop().await {
        warn!(error = %e, "failed to stop channel cleanly");
    }
    match to_stdout.await {
        Ok(Err(e)) => warn!(error = %e, "stdout writer failed"),
        Err(e) => warn!(error = %e, "stdout writer panicked"),
        Ok(Ok(())) => {}
    }
    Ok(())
}

fn build_adapter(cfg: &Config, bus: Arc<MessageBus>) -> anyhow::Result<ChannelAdapter> {
    let session: Arc<dyn PlatformSession> =
        Arc::new(TelegramSession::new(cfg.telegram_bot_token.clone()));

    let transcriber: Option<Arc<dyn Transcriber>> = match &cfg.openai_api_key {
        Some(key) => Some(Arc::new(
            OpenAiTranscriber::new(key.clone())?
                .with_base_url(cfg.transcription_base_url.clone())
                .with_model(cfg.transcription_model.clone()),
        )),
        None => {
            info!("OPENAI_API_KEY not set, audio attachments will not be transcribed");
            None
        }
    };

    let downloader: Arc<dyn AttachmentDownloader> = Arc::new(HttpDownloader::new(DownloadConfig {
        dir: cfg.media_dir.clone(),
        timeout: cfg.download_timeout,
        max_bytes: cfg.max_download_bytes,
    })?);

    let adapter_cfg = AdapterConfig {
        send_timeout: cfg.send_timeout,
        typing: TypingConfig {
            interval: cfg.typing_interval,
            max_duration: cfg.typing_max_duration,
        },
        inbound_buffer: cfg.bus_capacity,
    };

    Ok(ChannelAdapter::new(
        cfg.channel_name.clone(),
        session,
        bus as Arc<dyn InboundSink>,
        downloader,
        adapter_cfg,
    )
    .with_allow_list(AllowList::new(cfg.allow_from.iter().cloned()))
    .with_transcription(TranscriptionGate::new(
        transcriber,
        cfg.transcription_timeout,
    )))
}

/// Inbound bus messages to stdout, one JSON object per line.
async fn write_inbound(bus: Arc<MessageBus>) -> anyhow::Result<()> {
    let mut stdout = tokio::io::stdout();
    while let Some(msg) = bus.consume_inbound().await {
        let mut line = serde_json::to_string(&msg)?;
        line.push('\n');
        stdout.write_all(line.as_bytes()).await?;
        stdout.flush().await?;
    }
    Ok(())
}

/// Outbound JSON lines from stdin onto the bus. Returns at EOF.
async fn read_outbound(bus: Arc<MessageBus>) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<OutboundMessage>(line) {
            Ok(msg) => bus
                .publish_outbound(msg)
                .await
                .context("outbound queue closed")?,
            Err(e) => warn!(error = %e, "ignoring malformed outbound line"),
        }
    }
    Ok(())
}
