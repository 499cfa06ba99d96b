// =============================================================================
// Startup Reconciler — gate the worker on boot
// =============================================================================
//
// Two phases, run once before the loop starts:
//
//  1. `self_heal` — a redeploy onto a persistent disk can leave the store
//     stuck at PAUSED / startup_sync_ok=0 from a previous incident. When no
//     kill-switch is on, the state is reset to RUNNING so the sync below gets
//     a clean slate. Self-heal NEVER runs with a kill-switch on.
//
//  2. `run_startup_sync` — decides the boot state: kill-switch => KILLED,
//     DEMO => ACTIVE, LIVE/TESTNET => public probe (ping + filters) then
//     private probe (balance); any failure => PAUSED. Open positions in the
//     store also pause the worker (exchange-side position reconciliation is an
//     operator task).
// =============================================================================

use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::exchange::ExchangeApi;
use crate::kill_switch::KillSwitch;
use crate::store::{Store, SystemStatus};

/// Un-stick a store left PAUSED or un-synced by a previous deployment.
pub async fn self_heal(store: &Store, config: &AppConfig) -> Result<()> {
    if config.env_kill_switch {
        info!("self-heal skipped — environment kill-switch is on");
        return Ok(());
    }

    let state = store.get_system_state().await?;
    if state.kill_switch {
        info!("self-heal skipped — persisted kill-switch is on");
        return Ok(());
    }

    if state.status == SystemStatus::Paused || !state.startup_sync_ok {
        warn!(
            status = %state.status,
            sync_ok = state.startup_sync_ok,
            "stale boot state detected — resetting to RUNNING"
        );
        store
            .update_system_state(Some(SystemStatus::Running), Some(true), Some(false))
            .await?;
        store
            .log_event(
                "SELF_HEAL_APPLIED",
                &format!(
                    "reset from status={} sync_ok={} to RUNNING",
                    state.status, state.startup_sync_ok
                ),
            )
            .await?;
    }

    Ok(())
}

/// Decide the boot state. Returns `true` when the worker may trade.
pub async fn run_startup_sync(
    store: &Store,
    exchange: &Arc<dyn ExchangeApi>,
    kill_switch: &KillSwitch,
    config: &AppConfig,
) -> Result<bool> {
    // 1. Kill-switch wins everything.
    if kill_switch.is_active().await {
        warn!("startup sync: kill-switch active — worker is KILLED");
        store
            .update_system_state(Some(SystemStatus::Killed), Some(false), None)
            .await?;
        store
            .log_event("STARTUP_SYNC_BLOCKED_KILL_SWITCH", &config.mode.to_string())
            .await?;
        return Ok(false);
    }

    // 2. DEMO needs no exchange.
    if !config.mode.is_networked() {
        store
            .update_system_state(Some(SystemStatus::Active), Some(true), None)
            .await?;
        store.log_event("STARTUP_SYNC_OK", "DEMO ok").await?;
        info!("startup sync: DEMO — ACTIVE");
        return Ok(true);
    }

    // 3. Public probe: ping, then filters for every whitelisted symbol (this
    //    also proves each symbol is tradable), then the private balance probe.
    if let Err(e) = probe_exchange(exchange, config).await {
        warn!(error = %e, "startup sync: exchange probe failed — PAUSED");
        store
            .update_system_state(Some(SystemStatus::Paused), Some(false), None)
            .await?;
        store
            .log_event(
                "STARTUP_SYNC_FAILED",
                &format!("{} exchange_connect_failed err={e}", config.mode),
            )
            .await?;
        return Ok(false);
    }

    // 4. Open positions in the store require operator attention before any
    //    new entry is placed.
    let open_positions = store.count_open_positions().await?;
    if open_positions > 0 {
        warn!(open_positions, "startup sync: open positions found — PAUSED");
        store
            .update_system_state(Some(SystemStatus::Paused), Some(false), None)
            .await?;
        store
            .log_event(
                "STARTUP_SYNC_OPEN_POSITIONS",
                &format!("{} open_positions={open_positions}", config.mode),
            )
            .await?;
        return Ok(false);
    }

    // 5. All probes green.
    store
        .update_system_state(Some(SystemStatus::Active), Some(true), None)
        .await?;
    store
        .log_event("STARTUP_SYNC_OK", &format!("{} exchange_ok", config.mode))
        .await?;
    info!(mode = %config.mode, "startup sync: exchange ok — ACTIVE");
    Ok(true)
}

async fn probe_exchange(exchange: &Arc<dyn ExchangeApi>, config: &AppConfig) -> Result<()> {
    exchange.ping().await?;

    for symbol in &config.symbol_whitelist {
        let filters = exchange.sync_filters(symbol).await?;
        info!(
            symbol = %symbol,
            min_notional = filters.min_notional,
            lot_step = %filters.lot_step,
            price_tick = %filters.price_tick,
            "symbol filters verified"
        );
    }

    // Private probe: a signed call that fails fast on bad credentials.
    let usdt_free = exchange.fetch_balance_free("USDT").await?;
    info!(usdt_free, "private probe ok");
    Ok(())
}
