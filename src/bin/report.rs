// =============================================================================
// Performance Reporter — one-shot aggregate over closed trades
// =============================================================================

use anyhow::Context;

use meridian_executor::config::AppConfig;
use meridian_executor::store::Store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();

    let config = AppConfig::from_env();
    let store = Store::open(&config.db_path)
        .await
        .context("failed to open store")?;

    let s = store.get_trade_stats().await?;

    println!("=== MERIDIAN EXECUTOR | PERFORMANCE REPORT ===");
    println!("Closed trades:   {}", s.closed_trades);
    println!("Wins / Losses:   {} / {}", s.wins, s.losses);
    println!("Winrate %:       {:.2}", s.winrate_pct);
    println!("ROI % (approx):  {:.2}", s.roi_pct);
    println!("PnL sum (quote): {:.4}", s.pnl_quote_sum);
    println!("Quote in sum:    {:.4}", s.quote_in_sum);
    println!("Profit factor:   {:.3}", s.profit_factor);
    println!("Gross profit:    {:.4}", s.gross_profit);
    println!("Gross loss:      {:.4}", s.gross_loss);
    println!("Open trades:     {}", s.open_trades);
    println!("Active OCO:      {}", s.active_oco_links);

    Ok(())
}
