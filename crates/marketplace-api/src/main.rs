mod assist;
mod auth;
mod cache;
mod config;
mod error;
mod files;
mod rate_limit;
mod server;

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use marketplace_common::llm::LlmClient;
use marketplace_common::redis::RedisCache;
use marketplace_common::supabase::SupabaseClient;

use assist::AssistService;
use cache::AssistCache;
use config::Config;
use rate_limit::RateLimiter;
use server::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine; the environment may already be populated.
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    info!("starting project marketplace API");

    let config = Config::from_env()?;

    let supabase = Arc::new(SupabaseClient::new(config.supabase.clone())?);
    info!(
        url = %config.supabase.url,
        bucket = %config.supabase.bucket,
        privileged_writes = config.supabase.service_role_key.is_some(),
        "supabase client configured"
    );

    let llm = Arc::new(LlmClient::new(config.llm.clone())?);
    info!(
        provider = llm.config().provider.as_str(),
        base_url = %llm.config().base_url,
        model = %llm.config().model,
        timeout_ms = llm.config().default_timeout.as_millis(),
        max_retries = llm.config().max_retries,
        "llm client configured"
    );

    let redis = RedisCache::new(config.redis_url.as_deref());
    if !redis.is_enabled() {
        info!("REDIS_URL not set, running without response cache");
    } else if redis.is_available().await {
        info!("redis connected");
    } else {
        info!("redis unavailable, cache lookups will miss");
    }

    let limiter = config.rate_limit_rps.and_then(RateLimiter::new);
    if let Some(rps) = config.rate_limit_rps {
        info!(rps, "ai rate limiting enabled");
    }

    let state = AppState {
        supabase,
        assist: AssistService::new(llm, AssistCache::new(redis)),
        limiter,
        search_threshold: config.search_threshold,
        upload_limit: config.max_upload_bytes,
    };

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(
        addr = %config.listen_addr,
        max_upload_bytes = config.max_upload_bytes,
        "HTTP server listening"
    );
    axum::serve(listener, server::router(state))
        .await
        .inspect_err(|e| tracing::error!(error = %e, "HTTP server error"))?;

    info!("HTTP server shut down");
    Ok(())
}
