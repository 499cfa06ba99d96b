// =============================================================================
// Persistent Store — SQLite-backed tables for state, audit, links, and trades
// =============================================================================
//
// Single-writer-per-process store over a sqlx SQLite pool. Every mutation is a
// short implicit transaction; idempotency commits use INSERT OR IGNORE so a
// replayed signal can never produce a second row.
//
// Ownership: the execution controller is the only writer of `oco_links`
// inserts and `executed_signals`; the reconciler is the only writer of
// `oco_links.status` transitions away from ACTIVE and of `trades` closure
// fields.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tracing::{debug, info};

// =============================================================================
// Enums
// =============================================================================

/// Lifecycle status of the process, persisted in the `system_state` singleton.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemStatus {
    Running,
    Active,
    Paused,
    Killed,
}

impl SystemStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "RUNNING",
            Self::Active => "ACTIVE",
            Self::Paused => "PAUSED",
            Self::Killed => "KILLED",
        }
    }

    /// Parse a persisted status. Unknown values map to `Paused` so a corrupted
    /// row can never read as permissive.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_uppercase().as_str() {
            "RUNNING" => Self::Running,
            "ACTIVE" => Self::Active,
            "KILLED" => Self::Killed,
            _ => Self::Paused,
        }
    }

    /// Both ACTIVE and RUNNING permit trading.
    pub fn permits_trading(self) -> bool {
        matches!(self, Self::Active | Self::Running)
    }
}

impl std::fmt::Display for SystemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Status of an OCO protection link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OcoStatus {
    Active,
    ClosedTp,
    ClosedSl,
    CanceledBySignal,
    Failed,
}

impl OcoStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::ClosedTp => "CLOSED_TP",
            Self::ClosedSl => "CLOSED_SL",
            Self::CanceledBySignal => "CANCELED_BY_SIGNAL",
            Self::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for OcoStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Terminal outcome of a closed trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeOutcome {
    Tp,
    Sl,
    Manual,
    Unknown,
}

impl TradeOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tp => "TP",
            Self::Sl => "SL",
            Self::Manual => "MANUAL",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for TradeOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Row types
// =============================================================================

/// Snapshot of the `system_state` singleton.
#[derive(Debug, Clone)]
pub struct SystemState {
    pub status: SystemStatus,
    pub startup_sync_ok: bool,
    pub kill_switch: bool,
    pub updated_at: String,
}

/// One OCO protection link.
#[derive(Debug, Clone)]
pub struct OcoLink {
    pub id: i64,
    pub signal_id: String,
    pub symbol: String,
    pub base_asset: String,
    pub tp_order_id: String,
    pub sl_order_id: String,
    pub tp_price: f64,
    pub sl_stop_price: f64,
    pub sl_limit_price: f64,
    pub amount: f64,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

/// One row of the idempotency ledger.
#[derive(Debug, Clone)]
pub struct ExecutedSignal {
    pub signal_id: String,
    pub signal_hash: Option<String>,
    pub action: Option<String>,
    pub symbol: Option<String>,
    pub executed_at: String,
}

/// One trade row (entry always present, exit fields on closure).
#[derive(Debug, Clone)]
pub struct Trade {
    pub signal_id: String,
    pub symbol: String,
    pub qty: f64,
    pub quote_in: f64,
    pub entry_price: f64,
    pub opened_at: String,
    pub exit_price: Option<f64>,
    pub closed_at: Option<String>,
    pub outcome: Option<String>,
    pub pnl_quote: Option<f64>,
    pub pnl_pct: Option<f64>,
}

/// One append-only audit row.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub id: i64,
    pub event_type: String,
    pub message: String,
    pub created_at: String,
}

/// Aggregate over closed trades plus open counters, for the reporter.
#[derive(Debug, Clone)]
pub struct TradeStats {
    pub closed_trades: i64,
    pub wins: i64,
    pub losses: i64,
    pub winrate_pct: f64,
    pub pnl_quote_sum: f64,
    pub quote_in_sum: f64,
    pub roi_pct: f64,
    pub gross_profit: f64,
    pub gross_loss: f64,
    pub profit_factor: f64,
    pub open_trades: i64,
    pub active_oco_links: i64,
}

// =============================================================================
// Store
// =============================================================================

fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

/// Connection-owning store. Cheap to clone (shares the pool).
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    // -------------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------------

    /// Open (creating if needed) the database file at `path` and initialise
    /// the schema.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create db dir {}", parent.display()))?;
            }
        }

        let url = format!("sqlite:{}?mode=rwc", path.display());
        let pool = SqlitePoolOptions::new()
            // Single writer per process; one connection also keeps all
            // statements on the same in-memory database in tests.
            .max_connections(1)
            .connect(&url)
            .await
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        let store = Self { pool };
        store.init_schema().await?;
        info!(path = %path.display(), "store opened");
        Ok(store)
    }

    /// In-memory store for tests.
    pub async fn memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .context("failed to open in-memory sqlite database")?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Create all tables (idempotent) and seed the `system_state` singleton.
    async fn init_schema(&self) -> Result<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS system_state (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                status TEXT NOT NULL,
                startup_sync_ok INTEGER NOT NULL DEFAULT 0,
                kill_switch INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                event_type TEXT NOT NULL,
                message TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS executed_signals (
                signal_id TEXT PRIMARY KEY,
                signal_hash TEXT,
                action TEXT,
                symbol TEXT,
                executed_at TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS oco_links (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                signal_id TEXT NOT NULL,
                symbol TEXT NOT NULL,
                base_asset TEXT NOT NULL,
                tp_order_id TEXT NOT NULL,
                sl_order_id TEXT NOT NULL,
                tp_price REAL NOT NULL,
                sl_stop_price REAL NOT NULL,
                sl_limit_price REAL NOT NULL,
                amount REAL NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS trades (
                signal_id TEXT PRIMARY KEY,
                symbol TEXT NOT NULL,
                qty REAL NOT NULL,
                quote_in REAL NOT NULL,
                entry_price REAL NOT NULL,
                opened_at TEXT NOT NULL,
                exit_price REAL,
                closed_at TEXT,
                outcome TEXT,
                pnl_quote REAL,
                pnl_pct REAL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS positions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                size REAL NOT NULL,
                entry_price REAL NOT NULL,
                status TEXT NOT NULL,
                opened_at TEXT NOT NULL,
                closed_at TEXT,
                pnl REAL
            )
            "#,
        ];

        for sql in statements {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .context("schema init statement failed")?;
        }

        // Seed the singleton. The process starts non-synced and non-killed;
        // the startup reconciler decides the real state.
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO system_state (id, status, startup_sync_ok, kill_switch, updated_at)
            VALUES (1, 'RUNNING', 0, 0, ?1)
            "#,
        )
        .bind(now_iso())
        .execute(&self.pool)
        .await
        .context("failed to seed system_state singleton")?;

        Ok(())
    }

    // -------------------------------------------------------------------------
    // System state
    // -------------------------------------------------------------------------

    /// Snapshot of the singleton row.
    pub async fn get_system_state(&self) -> Result<SystemState> {
        let row = sqlx::query(
            "SELECT status, startup_sync_ok, kill_switch, updated_at FROM system_state WHERE id = 1",
        )
        .fetch_one(&self.pool)
        .await
        .context("failed to read system_state")?;

        let status: String = row.try_get("status")?;
        let sync: i64 = row.try_get("startup_sync_ok")?;
        let kill: i64 = row.try_get("kill_switch")?;
        let updated_at: String = row.try_get("updated_at")?;

        Ok(SystemState {
            status: SystemStatus::parse(&status),
            startup_sync_ok: sync != 0,
            kill_switch: kill != 0,
            updated_at,
        })
    }

    /// Partial update of the singleton. `None` fields are left untouched;
    /// `updated_at` always refreshes.
    pub async fn update_system_state(
        &self,
        status: Option<SystemStatus>,
        startup_sync_ok: Option<bool>,
        kill_switch: Option<bool>,
    ) -> Result<()> {
        let mut sets: Vec<&str> = Vec::new();
        if status.is_some() {
            sets.push("status = ?");
        }
        if startup_sync_ok.is_some() {
            sets.push("startup_sync_ok = ?");
        }
        if kill_switch.is_some() {
            sets.push("kill_switch = ?");
        }
        sets.push("updated_at = ?");

        let sql = format!("UPDATE system_state SET {} WHERE id = 1", sets.join(", "));
        let mut query = sqlx::query(&sql);

        if let Some(s) = status {
            query = query.bind(s.as_str());
        }
        if let Some(s) = startup_sync_ok {
            query = query.bind(s as i64);
        }
        if let Some(k) = kill_switch {
            query = query.bind(k as i64);
        }
        query = query.bind(now_iso());

        query
            .execute(&self.pool)
            .await
            .context("failed to update system_state")?;

        debug!(?status, ?startup_sync_ok, ?kill_switch, "system_state updated");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Audit log
    // -------------------------------------------------------------------------

    /// Append one audit row. Append-only: there is no update or delete path.
    pub async fn log_event(&self, event_type: &str, message: &str) -> Result<()> {
        sqlx::query("INSERT INTO audit_log (event_type, message, created_at) VALUES (?1, ?2, ?3)")
            .bind(event_type)
            .bind(message)
            .bind(now_iso())
            .execute(&self.pool)
            .await
            .context("failed to append audit event")?;
        Ok(())
    }

    /// Most recent audit rows, newest first.
    pub async fn list_audit_events(&self, limit: i64) -> Result<Vec<AuditEvent>> {
        let rows = sqlx::query(
            "SELECT id, event_type, message, created_at FROM audit_log ORDER BY id DESC LIMIT ?1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("failed to list audit events")?;

        rows.into_iter()
            .map(|row| {
                Ok(AuditEvent {
                    id: row.try_get("id")?,
                    event_type: row.try_get("event_type")?,
                    message: row.try_get("message")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }

    /// Number of audit rows carrying `event_type`.
    pub async fn count_audit_events(&self, event_type: &str) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM audit_log WHERE event_type = ?1")
                .bind(event_type)
                .fetch_one(&self.pool)
                .await
                .context("failed to count audit events")?;
        Ok(count)
    }

    // -------------------------------------------------------------------------
    // Executed signals (idempotency ledger)
    // -------------------------------------------------------------------------

    pub async fn signal_id_already_executed(&self, signal_id: &str) -> Result<bool> {
        let row: Option<i64> =
            sqlx::query_scalar("SELECT 1 FROM executed_signals WHERE signal_id = ?1 LIMIT 1")
                .bind(signal_id)
                .fetch_optional(&self.pool)
                .await
                .context("idempotency lookup failed")?;
        Ok(row.is_some())
    }

    /// Commit "this signal has been handled". Insert-or-ignore: replays are
    /// harmless no-ops.
    pub async fn mark_signal_id_executed(
        &self,
        signal_id: &str,
        signal_hash: Option<&str>,
        action: &str,
        symbol: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO executed_signals (signal_id, signal_hash, action, symbol, executed_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(signal_id)
        .bind(signal_hash)
        .bind(action)
        .bind(symbol)
        .bind(now_iso())
        .execute(&self.pool)
        .await
        .context("failed to mark signal executed")?;

        debug!(signal_id, action, symbol, "signal marked executed");
        Ok(())
    }

    /// The idempotency row for `signal_id`, if present.
    pub async fn get_executed_signal(&self, signal_id: &str) -> Result<Option<ExecutedSignal>> {
        let row = sqlx::query(
            r#"
            SELECT signal_id, signal_hash, action, symbol, executed_at
            FROM executed_signals WHERE signal_id = ?1 LIMIT 1
            "#,
        )
        .bind(signal_id)
        .fetch_optional(&self.pool)
        .await
        .context("failed to read executed signal")?;

        match row {
            None => Ok(None),
            Some(row) => Ok(Some(ExecutedSignal {
                signal_id: row.try_get("signal_id")?,
                signal_hash: row.try_get("signal_hash")?,
                action: row.try_get("action")?,
                symbol: row.try_get("symbol")?,
                executed_at: row.try_get("executed_at")?,
            })),
        }
    }

    // -------------------------------------------------------------------------
    // OCO links
    // -------------------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub async fn create_oco_link(
        &self,
        signal_id: &str,
        symbol: &str,
        base_asset: &str,
        tp_order_id: &str,
        sl_order_id: &str,
        tp_price: f64,
        sl_stop_price: f64,
        sl_limit_price: f64,
        amount: f64,
    ) -> Result<i64> {
        let now = now_iso();
        let result = sqlx::query(
            r#"
            INSERT INTO oco_links
            (signal_id, symbol, base_asset, tp_order_id, sl_order_id,
             tp_price, sl_stop_price, sl_limit_price, amount, status, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 'ACTIVE', ?10, ?11)
            "#,
        )
        .bind(signal_id)
        .bind(symbol)
        .bind(base_asset)
        .bind(tp_order_id)
        .bind(sl_order_id)
        .bind(tp_price)
        .bind(sl_stop_price)
        .bind(sl_limit_price)
        .bind(amount)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .context("failed to create oco link")?;

        Ok(result.last_insert_rowid())
    }

    /// Transition a link's status. The reconciler is the only caller for
    /// transitions away from ACTIVE.
    pub async fn set_oco_status(&self, link_id: i64, status: OcoStatus) -> Result<()> {
        sqlx::query("UPDATE oco_links SET status = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(status.as_str())
            .bind(now_iso())
            .bind(link_id)
            .execute(&self.pool)
            .await
            .context("failed to set oco status")?;

        debug!(link_id, status = %status, "oco link status updated");
        Ok(())
    }

    /// ACTIVE links, newest first, bounded by `limit`.
    pub async fn list_active_oco_links(&self, limit: i64) -> Result<Vec<OcoLink>> {
        let rows = sqlx::query(
            r#"
            SELECT id, signal_id, symbol, base_asset, tp_order_id, sl_order_id,
                   tp_price, sl_stop_price, sl_limit_price, amount, status, created_at, updated_at
            FROM oco_links
            WHERE status = 'ACTIVE'
            ORDER BY id DESC
            LIMIT ?1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("failed to list active oco links")?;

        rows.into_iter().map(|row| Self::oco_link_from_row(&row)).collect()
    }

    /// True if any ACTIVE link exists for `symbol` (case-insensitive).
    pub async fn has_active_oco_for_symbol(&self, symbol: &str) -> Result<bool> {
        let row: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM oco_links WHERE status = 'ACTIVE' AND UPPER(symbol) = UPPER(?1) LIMIT 1",
        )
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await
        .context("active oco lookup failed")?;
        Ok(row.is_some())
    }

    /// A single link by id (reconciler tests and diagnostics).
    pub async fn get_oco_link(&self, link_id: i64) -> Result<Option<OcoLink>> {
        let row = sqlx::query(
            r#"
            SELECT id, signal_id, symbol, base_asset, tp_order_id, sl_order_id,
                   tp_price, sl_stop_price, sl_limit_price, amount, status, created_at, updated_at
            FROM oco_links WHERE id = ?1 LIMIT 1
            "#,
        )
        .bind(link_id)
        .fetch_optional(&self.pool)
        .await
        .context("failed to read oco link")?;

        match row {
            None => Ok(None),
            Some(row) => Ok(Some(Self::oco_link_from_row(&row)?)),
        }
    }

    fn oco_link_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<OcoLink> {
        Ok(OcoLink {
            id: row.try_get("id")?,
            signal_id: row.try_get("signal_id")?,
            symbol: row.try_get("symbol")?,
            base_asset: row.try_get("base_asset")?,
            tp_order_id: row.try_get("tp_order_id")?,
            sl_order_id: row.try_get("sl_order_id")?,
            tp_price: row.try_get("tp_price")?,
            sl_stop_price: row.try_get("sl_stop_price")?,
            sl_limit_price: row.try_get("sl_limit_price")?,
            amount: row.try_get("amount")?,
            status: row.try_get("status")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    // -------------------------------------------------------------------------
    // Trades
    // -------------------------------------------------------------------------

    /// Record the entry side of a trade. INSERT OR REPLACE: a crash-and-replay
    /// of the same signal id overwrites with identical data.
    pub async fn open_trade(
        &self,
        signal_id: &str,
        symbol: &str,
        qty: f64,
        quote_in: f64,
        entry_price: f64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO trades (signal_id, symbol, qty, quote_in, entry_price, opened_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(signal_id)
        .bind(symbol)
        .bind(qty)
        .bind(quote_in)
        .bind(entry_price)
        .bind(now_iso())
        .execute(&self.pool)
        .await
        .context("failed to open trade")?;

        debug!(signal_id, symbol, qty, quote_in, entry_price, "trade opened");
        Ok(())
    }

    pub async fn get_trade(&self, signal_id: &str) -> Result<Option<Trade>> {
        let row = sqlx::query(
            r#"
            SELECT signal_id, symbol, qty, quote_in, entry_price, opened_at,
                   exit_price, closed_at, outcome, pnl_quote, pnl_pct
            FROM trades WHERE signal_id = ?1 LIMIT 1
            "#,
        )
        .bind(signal_id)
        .fetch_optional(&self.pool)
        .await
        .context("failed to read trade")?;

        match row {
            None => Ok(None),
            Some(row) => Ok(Some(Trade {
                signal_id: row.try_get("signal_id")?,
                symbol: row.try_get("symbol")?,
                qty: row.try_get("qty")?,
                quote_in: row.try_get("quote_in")?,
                entry_price: row.try_get("entry_price")?,
                opened_at: row.try_get("opened_at")?,
                exit_price: row.try_get("exit_price")?,
                closed_at: row.try_get("closed_at")?,
                outcome: row.try_get("outcome")?,
                pnl_quote: row.try_get("pnl_quote")?,
                pnl_pct: row.try_get("pnl_pct")?,
            })),
        }
    }

    /// Record the exit side of a trade.
    pub async fn close_trade(
        &self,
        signal_id: &str,
        exit_price: f64,
        outcome: TradeOutcome,
        pnl_quote: f64,
        pnl_pct: f64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE trades
            SET exit_price = ?1, closed_at = ?2, outcome = ?3, pnl_quote = ?4, pnl_pct = ?5
            WHERE signal_id = ?6
            "#,
        )
        .bind(exit_price)
        .bind(now_iso())
        .bind(outcome.as_str())
        .bind(pnl_quote)
        .bind(pnl_pct)
        .bind(signal_id)
        .execute(&self.pool)
        .await
        .context("failed to close trade")?;

        debug!(signal_id, exit_price, outcome = %outcome, pnl_quote, "trade closed");
        Ok(())
    }

    /// Aggregate statistics over closed trades plus live counters.
    pub async fn get_trade_stats(&self) -> Result<TradeStats> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*)                                          AS n,
                   COALESCE(SUM(pnl_quote), 0.0)                     AS pnl_sum,
                   COALESCE(SUM(quote_in), 0.0)                      AS quote_sum,
                   COALESCE(SUM(CASE WHEN pnl_quote > 0 THEN 1 ELSE 0 END), 0) AS wins,
                   COALESCE(SUM(CASE WHEN pnl_quote < 0 THEN 1 ELSE 0 END), 0) AS losses,
                   COALESCE(SUM(CASE WHEN pnl_quote > 0 THEN pnl_quote ELSE 0.0 END), 0.0) AS gross_profit,
                   COALESCE(ABS(SUM(CASE WHEN pnl_quote < 0 THEN pnl_quote ELSE 0.0 END)), 0.0) AS gross_loss
            FROM trades WHERE closed_at IS NOT NULL
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .context("failed to aggregate trade stats")?;

        let n: i64 = row.try_get("n")?;
        let pnl_sum: f64 = row.try_get("pnl_sum")?;
        let quote_sum: f64 = row.try_get("quote_sum")?;
        let wins: i64 = row.try_get("wins")?;
        let losses: i64 = row.try_get("losses")?;
        let gross_profit: f64 = row.try_get("gross_profit")?;
        let gross_loss: f64 = row.try_get("gross_loss")?;

        let open_trades: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM trades WHERE closed_at IS NULL")
                .fetch_one(&self.pool)
                .await
                .context("failed to count open trades")?;

        let active_oco_links: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM oco_links WHERE status = 'ACTIVE'")
                .fetch_one(&self.pool)
                .await
                .context("failed to count active oco links")?;

        let winrate = if n > 0 {
            wins as f64 / n as f64 * 100.0
        } else {
            0.0
        };
        let roi_pct = if quote_sum > 0.0 {
            pnl_sum / quote_sum * 100.0
        } else {
            0.0
        };
        let profit_factor = if gross_loss > 0.0 {
            gross_profit / gross_loss
        } else if gross_profit > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };

        Ok(TradeStats {
            closed_trades: n,
            wins,
            losses,
            winrate_pct: winrate,
            pnl_quote_sum: pnl_sum,
            quote_in_sum: quote_sum,
            roi_pct,
            gross_profit,
            gross_loss,
            profit_factor,
            open_trades,
            active_oco_links,
        })
    }

    // -------------------------------------------------------------------------
    // Positions (legacy open-position audit, read by the startup reconciler)
    // -------------------------------------------------------------------------

    pub async fn count_open_positions(&self) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM positions WHERE status = 'OPEN'")
                .fetch_one(&self.pool)
                .await
                .context("failed to count open positions")?;
        Ok(count)
    }

    /// Record a legacy position row. Used by operators and tests to seed the
    /// open-position audit the startup reconciler checks.
    pub async fn open_position(
        &self,
        symbol: &str,
        side: &str,
        size: f64,
        entry_price: f64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO positions (symbol, side, size, entry_price, status, opened_at)
            VALUES (?1, ?2, ?3, ?4, 'OPEN', ?5)
            "#,
        )
        .bind(symbol)
        .bind(side)
        .bind(size)
        .bind(entry_price)
        .bind(now_iso())
        .execute(&self.pool)
        .await
        .context("failed to open position")?;
        Ok(())
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").finish_non_exhaustive()
    }
}
