use anyhow::{Context, Result};
use recall_hw::{FrameSampler, SamplerConfig, V4lDevice};
use reqwest::Url;
use tracing_subscriber::EnvFilter;

mod client;
mod config;
mod dbus_interface;
mod session;

use client::{http_client, HttpRecognitionClient, HttpSummaryClient};
use dbus_interface::{RecallService, BUS_NAME, OBJECT_PATH};
use session::{spawn_session, SessionConfig};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("recalld starting");

    let config = config::Config::from_env();
    let api_url = Url::parse(&config.api_url)
        .with_context(|| format!("invalid RECALL_API_URL: {}", config.api_url))?;

    let http = http_client(config.request_timeout, config.api_key.as_deref())?;
    let recognizer = HttpRecognitionClient::new(http.clone(), &api_url)?;
    let summarizer = HttpSummaryClient::new(http, &api_url)?;

    let device = V4lDevice {
        path: config.camera_device.clone(),
        width: config.capture_width,
        height: config.capture_height,
    };
    let sampler = FrameSampler::new(
        device,
        SamplerConfig {
            interval: config.sample_interval,
            warmup_frames: config.warmup_frames,
            jpeg_quality: config.jpeg_quality,
        },
    );

    let session = spawn_session(
        sampler,
        recognizer,
        summarizer,
        SessionConfig {
            request_timeout: config.request_timeout,
            cooldown: config.cooldown,
            ..SessionConfig::default()
        },
    );

    let service = RecallService {
        session: session.clone(),
        device: config.camera_device.clone(),
        api_url: config.api_url.clone(),
    };

    let conn = zbus::connection::Builder::session()?
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .context("failed to register on the session bus")?;

    tracing::info!(bus = BUS_NAME, path = OBJECT_PATH, api = %api_url, "D-Bus interface registered");

    // Relay view changes as signals.
    let iface = conn
        .object_server()
        .interface::<_, RecallService>(OBJECT_PATH)
        .await?;
    let mut views = session.subscribe();
    tokio::spawn(async move {
        while views.changed().await.is_ok() {
            let view = views.borrow_and_update().clone();
            let json = match serde_json::to_string(&view) {
                Ok(json) => json,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to serialize view");
                    continue;
                }
            };
            if let Err(e) = RecallService::view_changed(iface.signal_emitter(), &json).await {
                tracing::warn!(error = %e, "failed to emit ViewChanged");
            }
        }
    });

    if config.autostart {
        let view = session.start().await?;
        tracing::info!(%view, "session autostarted");
    }

    tracing::info!("recalld ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("recalld shutting down");
    session.stop().await?;

    Ok(())
}
