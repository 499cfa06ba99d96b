// =============================================================================
// Meridian Executor — worker entry point
// =============================================================================
//
// Boot order: config -> store -> outbox -> self-heal -> startup sync ->
// worker loop. A failed startup sync does NOT exit: the loop keeps running
// with the store PAUSED (or KILLED), so the audit trail and kill-switch
// back-pressure stay live while an operator investigates.
// =============================================================================

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use meridian_executor::config::AppConfig;
use meridian_executor::context::AppContext;
use meridian_executor::decision::{DecisionEngine, MomentumGenerator};
use meridian_executor::exchange::{ExchangeAdapter, ExchangeApi};
use meridian_executor::outbox::Outbox;
use meridian_executor::startup;
use meridian_executor::store::Store;
use meridian_executor::worker::Worker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & logging ─────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║           Meridian Executor — Starting Up                ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let config = AppConfig::from_env();
    config.validate().context("configuration invalid")?;
    config.log_summary();

    // ── 2. Durable state ─────────────────────────────────────────────────
    let store = Store::open(&config.db_path)
        .await
        .context("failed to open store")?;

    let outbox = Outbox::new(config.outbox_path.clone());
    outbox.ensure_exists().context("failed to prepare outbox")?;

    let ctx = AppContext::new(config, store, outbox);

    // ── 3. Exchange adapter ──────────────────────────────────────────────
    let exchange: Arc<dyn ExchangeApi> = Arc::new(
        ExchangeAdapter::new(ctx.config.clone(), ctx.kill_switch.clone())
            .context("failed to build exchange adapter")?,
    );

    // ── 4. Boot gate: self-heal, then startup sync ───────────────────────
    startup::self_heal(&ctx.store, &ctx.config)
        .await
        .context("self-heal failed")?;

    match startup::run_startup_sync(&ctx.store, &exchange, &ctx.kill_switch, &ctx.config).await {
        Ok(true) => info!("startup sync passed — trading enabled"),
        Ok(false) => warn!("startup sync failed — worker runs gated (no entries)"),
        Err(e) => warn!(error = %e, "startup sync errored — worker runs gated (no entries)"),
    }

    // ── 5. Optional decision engine ──────────────────────────────────────
    let generator: Option<Arc<dyn DecisionEngine>> = if ctx.config.generator_enabled {
        info!("decision engine enabled");
        Some(Arc::new(MomentumGenerator::new(
            ctx.config.clone(),
            ctx.store.clone(),
            exchange.clone(),
        )))
    } else {
        None
    };

    // ── 6. Run until ctrl-c ──────────────────────────────────────────────
    let worker = Worker::new(ctx, exchange, generator);

    tokio::select! {
        _ = worker.run() => {}
        _ = tokio::signal::ctrl_c() => {
            warn!("shutdown signal received — stopping");
        }
    }

    info!("Meridian Executor shut down complete.");
    Ok(())
}
