use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tracing::info;

use common::{ClosedTrade, Error, Result, SessionSnapshot, SnapshotStore, Trade, TradeReporter};

/// SQLite-backed trade ledger and session snapshot store.
#[derive(Clone)]
pub struct SqliteStore {
    db: SqlitePool,
}

impl SqliteStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Connect and run migrations.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let db = SqlitePool::connect(database_url).await?;
        sqlx::migrate!("../../migrations")
            .run(&db)
            .await
            .map_err(|e| Error::Database(e.into()))?;
        info!("Database ready");
        Ok(Self { db })
    }

    /// Single-connection in-memory store, migrated.
    pub async fn in_memory() -> Result<Self> {
        let db = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        sqlx::migrate!("../../migrations")
            .run(&db)
            .await
            .map_err(|e| Error::Database(e.into()))?;
        Ok(Self { db })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.db
    }
}

#[async_trait]
impl TradeReporter for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn open_trade(&self, trade: &Trade) -> Result<()> {
        let sessions_json = serde_json::to_string(&trade.sessions)?;
        sqlx::query(
            r#"
            INSERT INTO trades (id, instrument_id, strategy, direction, entry_price, entry_time_ms,
                                stop_price, target_price, pip_size, decimals, variant_label, sessions_json)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(&trade.id)
        .bind(&trade.instrument_id)
        .bind(&trade.strategy)
        .bind(trade.direction)
        .bind(trade.entry_price)
        .bind(trade.entry_time_ms)
        .bind(trade.stop_price)
        .bind(trade.target_price)
        .bind(trade.pip_size)
        .bind(trade.decimals as i64)
        .bind(&trade.variant_label)
        .bind(sessions_json)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    /// Upsert, so a close still lands if the open was dead-lettered.
    async fn close_trade(&self, closed: &ClosedTrade) -> Result<()> {
        let t = &closed.trade;
        let sessions_json = serde_json::to_string(&t.sessions)?;
        sqlx::query(
            r#"
            INSERT INTO trades (id, instrument_id, strategy, direction, entry_price, entry_time_ms,
                                stop_price, target_price, pip_size, decimals, variant_label, sessions_json,
                                exit_price, exit_time_ms, outcome, pips)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
            ON CONFLICT(id) DO UPDATE SET
                exit_price   = excluded.exit_price,
                exit_time_ms = excluded.exit_time_ms,
                outcome      = excluded.outcome,
                pips         = excluded.pips
            "#,
        )
        .bind(&t.id)
        .bind(&t.instrument_id)
        .bind(&t.strategy)
        .bind(t.direction)
        .bind(t.entry_price)
        .bind(t.entry_time_ms)
        .bind(t.stop_price)
        .bind(t.target_price)
        .bind(t.pip_size)
        .bind(t.decimals as i64)
        .bind(&t.variant_label)
        .bind(sessions_json)
        .bind(closed.exit_price)
        .bind(closed.exit_time_ms)
        .bind(closed.outcome)
        .bind(closed.pips)
        .execute(&self.db)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl SnapshotStore for SqliteStore {
    async fn load(&self, instrument_id: &str, day_key: NaiveDate) -> Result<Option<SessionSnapshot>> {
        let row = sqlx::query(
            r#"
            SELECT daily_open, asia_high, asia_low, asia_locked, prev_day_high, prev_day_low,
                   today_high, today_low, saved_at_ms
            FROM session_snapshots
            WHERE instrument_id = ?1 AND day_key = ?2
            "#,
        )
        .bind(instrument_id)
        .bind(day_key.to_string())
        .fetch_optional(&self.db)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(SessionSnapshot {
            instrument_id: instrument_id.to_string(),
            day_key,
            daily_open: row.try_get("daily_open")?,
            asia_high: row.try_get("asia_high")?,
            asia_low: row.try_get("asia_low")?,
            asia_locked: row.try_get("asia_locked")?,
            prev_day_high: row.try_get("prev_day_high")?,
            prev_day_low: row.try_get("prev_day_low")?,
            today_high: row.try_get("today_high")?,
            today_low: row.try_get("today_low")?,
            saved_at_ms: row.try_get("saved_at_ms")?,
        }))
    }

    async fn save(&self, s: &SessionSnapshot) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO session_snapshots (instrument_id, day_key, daily_open, asia_high, asia_low,
                                           asia_locked, prev_day_high, prev_day_low, today_high,
                                           today_low, saved_at_ms)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ON CONFLICT(instrument_id, day_key) DO UPDATE SET
                daily_open    = excluded.daily_open,
                asia_high     = excluded.asia_high,
                asia_low      = excluded.asia_low,
                asia_locked   = excluded.asia_locked,
                prev_day_high = excluded.prev_day_high,
                prev_day_low  = excluded.prev_day_low,
                today_high    = excluded.today_high,
                today_low     = excluded.today_low,
                saved_at_ms   = excluded.saved_at_ms
            "#,
        )
        .bind(&s.instrument_id)
        .bind(s.day_key.to_string())
        .bind(s.daily_open)
        .bind(s.asia_high)
        .bind(s.asia_low)
        .bind(s.asia_locked)
        .bind(s.prev_day_high)
        .bind(s.prev_day_low)
        .bind(s.today_high)
        .bind(s.today_low)
        .bind(s.saved_at_ms)
        .execute(&self.db)
        .await?;
        Ok(())
    }
}
