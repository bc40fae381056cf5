//! vibecheque server: Discord gateway, clarification engine, and HTTP status.

use crate::config::VibeConfig;
use crate::direct::AdapterDirectChannel;
use crate::gateway::Gateway;
use crate::moods::{self, MoodStore};
use crate::routes;
use crate::server_settings::ServerSettings;
use crate::tone::{LlmToneAnalyzer, ToneReporter};
use anyhow::Result;
use axum::Extension;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use vibe_channels::{ChannelAdapter, DiscordAdapter, OutboundMessage, UserId};
use vibe_clarify::{ClarificationEngine, ClarificationQueueStore, CollectorHub};
use vibe_llm::LlmClient;

pub struct AppState {
    pub engine: Arc<ClarificationEngine>,
    pub started_at: Instant,
}

pub async fn doctor(config_path: Option<PathBuf>) -> Result<()> {
    let (cfg, path) = VibeConfig::load_with_path(config_path).await?;
    let api_key_configured = cfg.api_key_for_model().is_some();
    let discord_token_configured = cfg.require_discord_token().is_ok();
    tracing::info!(
        model = %cfg.general.model,
        provider = ?vibe_llm::detect_provider(&cfg.general.model),
        api_key_configured,
        discord_token_configured,
        reply_timeout_seconds = cfg.clarification.reply_timeout_seconds,
        http_enabled = cfg.http.enabled,
        http_bind_addr = %cfg.http.bind_addr,
        data_dir = %cfg.data_dir_path()?.display(),
        config_path = %path.display(),
        "config ok"
    );
    cfg.require_api_key()?;
    cfg.require_discord_token()?;
    Ok(())
}

pub async fn analyze_once(config_path: Option<PathBuf>, text: &str) -> Result<String> {
    let cfg = VibeConfig::load(config_path).await?;
    let analyzer = build_tone_analyzer(&cfg)?;
    analyzer.tone_for_display(text).await
}

pub async fn send_one_shot(config_path: Option<PathBuf>, user_id: &str, message: &str) -> Result<()> {
    let cfg = VibeConfig::load(config_path).await?;
    let adapter = DiscordAdapter::new(cfg.require_discord_token()?)?;
    adapter
        .send_direct(&UserId::new(user_id), OutboundMessage::text(message))
        .await?;
    tracing::info!(user_id, "direct message sent");
    Ok(())
}

pub async fn serve(config_path: Option<PathBuf>) -> Result<()> {
    let (cfg, cfg_path) = VibeConfig::load_with_path(config_path).await?;
    let started_at = Instant::now();
    tracing::info!(
        config_path = %cfg_path.display(),
        model = %cfg.general.model,
        reply_timeout_seconds = cfg.clarification.reply_timeout_seconds,
        fallback_tone = %cfg.clarification.fallback_tone,
        acknowledge_clarifier = cfg.clarification.acknowledge_clarifier,
        http_enabled = cfg.http.enabled,
        http_bind_addr = %cfg.http.bind_addr,
        "server configuration loaded"
    );

    // Bind before connecting anywhere so a taken port fails fast.
    let listener = if cfg.http.enabled {
        let addr = cfg.http_bind_addr()?;
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| anyhow::anyhow!("bind http listener on {addr}: {e}"))?;
        Some(listener)
    } else {
        None
    };

    let tone = Arc::new(build_tone_analyzer(&cfg)?);
    let adapter: Arc<dyn ChannelAdapter> =
        Arc::new(DiscordAdapter::new(cfg.require_discord_token()?)?);
    let hub = CollectorHub::new();
    let engine = Arc::new(ClarificationEngine::new(
        ClarificationQueueStore::new(),
        Arc::new(AdapterDirectChannel::new(adapter.clone(), hub.clone())),
        tone.clone(),
        cfg.engine_settings(),
    ));
    let settings = Arc::new(ServerSettings::load(cfg.server_settings_path()?).await);
    let mood_store = Arc::new(MoodStore::load(cfg.moods_path()?).await);
    tracing::info!(
        settings_path = %settings.path().display(),
        moods_path = %mood_store.path().display(),
        "server state ready"
    );

    let (inbound_tx, inbound_rx) = tokio::sync::mpsc::channel(1024);
    adapter.start(inbound_tx).await?;

    let gateway = Arc::new(
        Gateway::new(
            adapter.clone(),
            hub,
            engine.clone(),
            tone,
            settings,
            mood_store.clone(),
            inbound_rx,
        )
        .with_toggle_role(cfg.toggle_role()),
    );
    let shutdown = CancellationToken::new();
    let gateway_handle = gateway.start(shutdown.child_token());
    let sweeper_handle = moods::spawn_sweeper(
        adapter.clone(),
        mood_store,
        cfg.mood_lifespan(),
        cfg.mood_sweep_interval(),
        shutdown.child_token(),
    );
    tracing::info!(channel = adapter.channel_id(), "gateway started");

    match listener {
        Some(listener) => {
            let state = Arc::new(AppState {
                engine,
                started_at,
            });
            let app = http_app(&cfg, state);
            tracing::info!(addr = %cfg.http.bind_addr, "vibecheque serving");
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
                .await?;
            tracing::info!("http server shutdown completed");
        }
        None => shutdown_signal(shutdown.clone()).await,
    }

    shutdown.cancel();
    for (task, handle) in [("gateway", gateway_handle), ("mood sweeper", sweeper_handle)] {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, task, "task join failed during shutdown");
        }
    }
    tracing::info!("shutdown completed");
    Ok(())
}

fn build_tone_analyzer(cfg: &VibeConfig) -> Result<LlmToneAnalyzer> {
    let api_key = cfg.require_api_key()?;
    let llm = LlmClient::new(&api_key, &cfg.general.model);
    tracing::debug!(model = %llm.model(), provider = ?llm.provider(), "llm client initialized");
    Ok(LlmToneAnalyzer::new(llm))
}

fn http_app(cfg: &VibeConfig, state: Arc<AppState>) -> axum::Router {
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|request: &Request<_>| {
            let request_id = request
                .headers()
                .get("x-request-id")
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default();
            tracing::info_span!("http", method = %request.method(), uri = %request.uri(), request_id)
        })
        .on_response(|response: &Response, latency: Duration, _span: &tracing::Span| {
            tracing::debug!(status = response.status().as_u16(), latency_ms = latency.as_millis() as u64, "served");
        });

    routes::router()
        .layer(Extension(state))
        .layer(GlobalConcurrencyLimitLayer::new(cfg.http.max_in_flight))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(cfg.http.timeout_seconds),
        ))
        .layer(trace_layer)
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}

/// Resolves on ctrl-c, SIGTERM, or cancellation of `shutdown`, then cancels it.
async fn shutdown_signal(shutdown: CancellationToken) {
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(%e, "no SIGTERM handler; ctrl-c only");
                std::future::pending::<()>().await;
            }
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => tracing::info!("ctrl-c received"),
        _ = terminate => tracing::info!("SIGTERM received"),
        _ = shutdown.cancelled() => {}
    }
    shutdown.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use tower::ServiceExt;

    #[tokio::test]
    async fn health_route_is_mounted_with_request_ids() {
        let cfg: VibeConfig = toml::from_str("").expect("config");
        let engine = ClarificationEngine::new(
            ClarificationQueueStore::new(),
            Arc::new(AdapterDirectChannel::new(
                Arc::new(DiscordAdapter::new("test-token").expect("adapter")),
                CollectorHub::new(),
            )),
            Arc::new(LlmToneAnalyzer::new(LlmClient::new("test-key", "gpt-4o-mini"))),
            cfg.engine_settings(),
        );
        let state = Arc::new(AppState {
            engine: Arc::new(engine),
            started_at: Instant::now(),
        });

        let response = http_app(&cfg, state)
            .oneshot(
                Request::builder()
                    .uri("/api/v1/health")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn shutdown_signal_follows_the_token() {
        let shutdown = CancellationToken::new();
        let waiter = tokio::spawn(shutdown_signal(shutdown.child_token()));
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .expect("shutdown_signal returned")
            .expect("task joined");
    }
}
