// End-to-end execution scenarios over an in-memory store and a scriptable
// stub exchange: happy path, dedupe, kill-switch mid-flight, min-notional
// reject, edge gate, naked-position skip, and the OCO protection failsafe.

mod common;

use std::sync::Arc;

use common::*;
use meridian_executor::config::Mode;
use meridian_executor::engine::{ExecutionController, ExecutionOutcome};
use meridian_executor::exchange::ExchangeApi;

// ---------------------------------------------------------------------------
// S1 — happy path
// ---------------------------------------------------------------------------

#[tokio::test]
async fn s1_happy_path_arms_oco_and_persists_link() {
    let ctx = trading_context(base_config(Mode::Live)).await;
    let stub = arc(StubExchange::happy());
    let controller = ExecutionController::new(&ctx, stub.clone() as Arc<dyn ExchangeApi>);

    let outcome = controller.execute_signal(&trade_signal("A", 15.0)).await;
    assert_eq!(outcome, ExecutionOutcome::Done);

    // One market buy for 15 quote.
    let buys = stub.buys.lock().clone();
    assert_eq!(buys.len(), 1);
    assert_eq!(buys[0].0, "BTC/USDT");
    assert!((buys[0].1 - 15.0).abs() < 1e-9);

    // Bracket geometry: sell 0.00014 (0.00015 free * 0.999 floored to the
    // 1e-5 lot), tp 101300.00, sl_stop 99300.00, sl_limit 99151.05.
    let ocos = stub.ocos.lock().clone();
    assert_eq!(ocos.len(), 1);
    assert!((ocos[0].amount - 0.00014).abs() < 1e-12);
    assert!((ocos[0].tp - 101_300.0).abs() < 1e-6);
    assert!((ocos[0].sl_stop - 99_300.0).abs() < 1e-6);
    assert!((ocos[0].sl_limit - 99_151.05).abs() < 1e-6);

    // Idempotency ledger committed with the buy action.
    let executed = ctx.store.get_executed_signal("A").await.unwrap().unwrap();
    assert_eq!(executed.action.as_deref(), Some("TRADE_LIVE_BUY"));

    // One ACTIVE link with the exchange's child ids.
    let links = ctx.store.list_active_oco_links(50).await.unwrap();
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].tp_order_id, "T1");
    assert_eq!(links[0].sl_order_id, "S1");
    assert_eq!(links[0].status, "ACTIVE");
    assert!((links[0].amount - 0.00014).abs() < 1e-12);

    // Trade row opened at the fill average.
    let trade = ctx.store.get_trade("A").await.unwrap().unwrap();
    assert!((trade.entry_price - 100_000.0).abs() < 1e-6);
    assert!((trade.quote_in - 15.0).abs() < 1e-9);
    assert!(trade.closed_at.is_none());

    // Audit trail: entry, then armed.
    assert_eq!(audit_count(&ctx, "TRADE_EXECUTED").await, 1);
    assert_eq!(audit_count(&ctx, "OCO_ARMED").await, 1);
    assert_eq!(audit_count(&ctx, "TRADE_LIVE_ARMED").await, 1);
}

// ---------------------------------------------------------------------------
// S2 — dedupe
// ---------------------------------------------------------------------------

#[tokio::test]
async fn s2_second_pass_is_deduped_with_no_new_orders() {
    let ctx = trading_context(base_config(Mode::Live)).await;
    let stub = arc(StubExchange::happy());
    let controller = ExecutionController::new(&ctx, stub.clone() as Arc<dyn ExchangeApi>);

    let first = controller.execute_signal(&trade_signal("A", 15.0)).await;
    assert_eq!(first, ExecutionOutcome::Done);

    // Clear the race guard so only the idempotency ledger can stop the rerun.
    let links = ctx.store.list_active_oco_links(50).await.unwrap();
    ctx.store
        .set_oco_status(links[0].id, meridian_executor::store::OcoStatus::ClosedTp)
        .await
        .unwrap();

    let second = controller.execute_signal(&trade_signal("A", 15.0)).await;
    assert_eq!(second, ExecutionOutcome::Deduped);

    assert_eq!(stub.buys.lock().len(), 1);
    assert_eq!(stub.ocos.lock().len(), 1);
    assert_eq!(audit_count(&ctx, "EXEC_DEDUPED").await, 1);
}

// ---------------------------------------------------------------------------
// S3 — kill-switch flipped mid-flight, caught at the last gate
// ---------------------------------------------------------------------------

#[tokio::test]
async fn s3_kill_switch_before_buy_blocks_without_marking() {
    let ctx = trading_context(base_config(Mode::Live)).await;
    let stub = StubExchange::happy();
    // The switch flips during the min-notional lookup: after the entry gates
    // passed, before the pre-BUY re-check.
    *stub.flip_kill_on_min_notional.lock() = Some(ctx.store.clone());
    let stub = arc(stub);
    let controller = ExecutionController::new(&ctx, stub.clone() as Arc<dyn ExchangeApi>);

    let outcome = controller.execute_signal(&trade_signal("A", 15.0)).await;
    assert!(matches!(outcome, ExecutionOutcome::Blocked(_)));

    assert_eq!(stub.buys.lock().len(), 0);
    assert_eq!(stub.ocos.lock().len(), 0);
    assert_eq!(audit_count(&ctx, "EXEC_BLOCKED_KILL_SWITCH_LAST_GATE").await, 1);

    // Not marked executed: the signal may be replayed once the switch clears.
    assert!(!ctx.store.signal_id_already_executed("A").await.unwrap());
}

// ---------------------------------------------------------------------------
// S4 — min-notional reject
// ---------------------------------------------------------------------------

#[tokio::test]
async fn s4_below_min_notional_rejects_and_marks_executed() {
    let ctx = trading_context(base_config(Mode::Live)).await;
    let stub = arc(StubExchange::happy());
    let controller = ExecutionController::new(&ctx, stub.clone() as Arc<dyn ExchangeApi>);

    let outcome = controller.execute_signal(&trade_signal("A", 5.0)).await;
    assert_eq!(outcome, ExecutionOutcome::Rejected("MIN_NOTIONAL".into()));

    assert_eq!(stub.buys.lock().len(), 0);
    assert_eq!(stub.ocos.lock().len(), 0);
    assert_eq!(audit_count(&ctx, "EXEC_REJECT_MIN_NOTIONAL").await, 1);

    let executed = ctx.store.get_executed_signal("A").await.unwrap().unwrap();
    assert_eq!(executed.action.as_deref(), Some("REJECT_MIN_NOTIONAL"));
}

// ---------------------------------------------------------------------------
// S6 — protection failure engages the failsafe
// ---------------------------------------------------------------------------

#[tokio::test]
async fn s6_duplicate_oco_child_ids_set_the_kill_switch() {
    let ctx = trading_context(base_config(Mode::Live)).await;
    let stub = StubExchange::happy();
    *stub.oco_response.lock() = Some(serde_json::json!({
        "listOrderId": "L2",
        "orderReports": [
            { "orderId": "X", "type": "LIMIT_MAKER" },
            { "orderId": "X", "type": "STOP_LOSS_LIMIT" }
        ]
    }));
    let stub = arc(stub);
    let controller = ExecutionController::new(&ctx, stub.clone() as Arc<dyn ExchangeApi>);

    let outcome = controller.execute_signal(&trade_signal("A", 15.0)).await;
    assert!(matches!(outcome, ExecutionOutcome::Failsafe(_)));

    assert_eq!(audit_count(&ctx, "OCO_INVALID").await, 1);
    assert_eq!(audit_count(&ctx, "FAILSAFE_KILL_SWITCH_SET").await, 1);

    // The persisted kill-switch is now ON.
    let state = ctx.store.get_system_state().await.unwrap();
    assert!(state.kill_switch);

    // The buy happened, so the signal is marked executed.
    let executed = ctx.store.get_executed_signal("A").await.unwrap().unwrap();
    assert_eq!(executed.action.as_deref(), Some("TRADE_LIVE_BUY"));

    // No ACTIVE link was persisted for the invalid pair.
    assert!(ctx.store.list_active_oco_links(50).await.unwrap().is_empty());
}

#[tokio::test]
async fn empty_oco_response_also_engages_the_failsafe() {
    let ctx = trading_context(base_config(Mode::Live)).await;
    let stub = StubExchange::happy();
    *stub.oco_response.lock() = Some(serde_json::json!({
        "listOrderId": "L3",
        "orderReports": [],
        "orders": []
    }));
    let stub = arc(stub);
    let controller = ExecutionController::new(&ctx, stub.clone() as Arc<dyn ExchangeApi>);

    let outcome = controller.execute_signal(&trade_signal("A", 15.0)).await;
    assert!(matches!(outcome, ExecutionOutcome::Failsafe(_)));
    assert!(ctx.store.get_system_state().await.unwrap().kill_switch);
}

// ---------------------------------------------------------------------------
// Remaining gates and boundaries
// ---------------------------------------------------------------------------

#[tokio::test]
async fn edge_gate_rejects_thin_expectations() {
    let mut config = base_config(Mode::Live);
    // net = 0.50 - (0.20 + 0.15) = 0.15 < 0.60
    config.tp_pct = 0.50;
    let ctx = trading_context(config).await;
    let stub = arc(StubExchange::happy());
    let controller = ExecutionController::new(&ctx, stub.clone() as Arc<dyn ExchangeApi>);

    let outcome = controller.execute_signal(&trade_signal("A", 15.0)).await;
    assert_eq!(outcome, ExecutionOutcome::Rejected("EDGE_TOO_SMALL".into()));

    assert_eq!(stub.buys.lock().len(), 0);
    assert_eq!(audit_count(&ctx, "EXEC_REJECT_EDGE_GATE").await, 1);
    let executed = ctx.store.get_executed_signal("A").await.unwrap().unwrap();
    assert_eq!(executed.action.as_deref(), Some("REJECT_EDGE_GATE"));
}

#[tokio::test]
async fn active_oco_race_guard_rejects_second_entry() {
    let ctx = trading_context(base_config(Mode::Live)).await;
    ctx.store
        .create_oco_link("OLD", "BTC/USDT", "BTC", "T9", "S9", 1.0, 0.9, 0.89, 1.0)
        .await
        .unwrap();

    let stub = arc(StubExchange::happy());
    let controller = ExecutionController::new(&ctx, stub.clone() as Arc<dyn ExchangeApi>);

    let outcome = controller.execute_signal(&trade_signal("A", 15.0)).await;
    assert_eq!(outcome, ExecutionOutcome::Rejected("ACTIVE_OCO_RACE".into()));
    assert_eq!(stub.buys.lock().len(), 0);
    assert!(ctx.store.signal_id_already_executed("A").await.unwrap());
}

#[tokio::test]
async fn sell_buffer_flooring_to_zero_leaves_position_naked() {
    let ctx = trading_context(base_config(Mode::Live)).await;
    let stub = StubExchange::happy();
    // Free base below one lot step: both buffers floor to zero.
    *stub.free_base.lock() = 0.000009;
    let stub = arc(stub);
    let controller = ExecutionController::new(&ctx, stub.clone() as Arc<dyn ExchangeApi>);

    let outcome = controller.execute_signal(&trade_signal("A", 15.0)).await;
    assert_eq!(
        outcome,
        ExecutionOutcome::Error("OCO_SKIP_NO_FREE_BASE".into())
    );

    // The entry went through and was committed; no OCO was placed.
    assert_eq!(stub.buys.lock().len(), 1);
    assert_eq!(stub.ocos.lock().len(), 0);
    assert_eq!(audit_count(&ctx, "OCO_SKIP_NO_FREE_BASE").await, 1);
    assert!(ctx.store.signal_id_already_executed("A").await.unwrap());
    assert!(ctx.store.list_active_oco_links(50).await.unwrap().is_empty());
}

#[tokio::test]
async fn uncertified_signal_is_rejected_before_any_wire_call() {
    let ctx = trading_context(base_config(Mode::Live)).await;
    let stub = arc(StubExchange::happy());
    let controller = ExecutionController::new(&ctx, stub.clone() as Arc<dyn ExchangeApi>);

    let mut sig = trade_signal("A", 15.0);
    sig.certified_signal = false;
    let outcome = controller.execute_signal(&sig).await;
    assert!(matches!(outcome, ExecutionOutcome::Rejected(_)));
    assert_eq!(stub.buys.lock().len(), 0);
    assert_eq!(audit_count(&ctx, "REJECT_NOT_CERTIFIED").await, 1);
}

#[tokio::test]
async fn paused_system_state_blocks_execution() {
    let ctx = trading_context(base_config(Mode::Live)).await;
    ctx.store
        .update_system_state(
            Some(meridian_executor::store::SystemStatus::Paused),
            None,
            None,
        )
        .await
        .unwrap();

    let stub = arc(StubExchange::happy());
    let controller = ExecutionController::new(&ctx, stub.clone() as Arc<dyn ExchangeApi>);

    let outcome = controller.execute_signal(&trade_signal("A", 15.0)).await;
    assert!(matches!(outcome, ExecutionOutcome::Blocked(_)));
    assert_eq!(stub.buys.lock().len(), 0);
    assert!(!ctx.store.signal_id_already_executed("A").await.unwrap());
}

#[tokio::test]
async fn transient_buy_failure_leaves_signal_retryable() {
    let ctx = trading_context(base_config(Mode::Live)).await;
    let stub = StubExchange::happy();
    *stub.buy_response.lock() = None;
    let stub = arc(stub);
    let controller = ExecutionController::new(&ctx, stub.clone() as Arc<dyn ExchangeApi>);

    let outcome = controller.execute_signal(&trade_signal("A", 15.0)).await;
    assert!(matches!(outcome, ExecutionOutcome::Error(_)));

    assert_eq!(audit_count(&ctx, "EXEC_LIVE_ERROR").await, 1);
    // Not marked: a replay may retry the entry.
    assert!(!ctx.store.signal_id_already_executed("A").await.unwrap());
}

#[tokio::test]
async fn hold_verdict_is_audit_only() {
    let ctx = trading_context(base_config(Mode::Live)).await;
    let stub = arc(StubExchange::happy());
    let controller = ExecutionController::new(&ctx, stub.clone() as Arc<dyn ExchangeApi>);

    let mut sig = trade_signal("A", 15.0);
    sig.final_verdict = meridian_executor::signal::Verdict::Hold;
    let outcome = controller.execute_signal(&sig).await;
    assert_eq!(outcome, ExecutionOutcome::Done);
    assert_eq!(stub.buys.lock().len(), 0);
    assert_eq!(audit_count(&ctx, "EXEC_HOLD").await, 1);
}

// ---------------------------------------------------------------------------
// DEMO path
// ---------------------------------------------------------------------------

#[tokio::test]
async fn demo_trade_simulates_and_marks_executed() {
    let ctx = trading_context(base_config(Mode::Demo)).await;
    let stub = arc(StubExchange::happy());
    let controller = ExecutionController::new(&ctx, stub.clone() as Arc<dyn ExchangeApi>);

    let outcome = controller.execute_signal(&trade_signal("A", 15.0)).await;
    assert_eq!(outcome, ExecutionOutcome::Done);

    // No order reached the (stub) wire.
    assert_eq!(stub.buys.lock().len(), 0);
    assert_eq!(stub.ocos.lock().len(), 0);

    assert_eq!(audit_count(&ctx, "TRADE_EXECUTED").await, 1);
    let executed = ctx.store.get_executed_signal("A").await.unwrap().unwrap();
    assert_eq!(executed.action.as_deref(), Some("TRADE_DEMO"));
}
