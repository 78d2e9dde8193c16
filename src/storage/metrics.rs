//! Metrics storage: the ledger as a small `SQLite` table.

use rusqlite::Connection;

use crate::metrics::{MetricsLedger, StrategyMetrics};
use crate::model::StrategyKind;

use super::{Result, Storage, StorageError};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS strategy_metrics (
    strategy TEXT PRIMARY KEY,
    usage_count INTEGER NOT NULL,
    success_count INTEGER NOT NULL,
    total_duration_ms INTEGER NOT NULL
)";

impl Storage {
    /// Loads the ledger. An absent database is an empty ledger.
    pub fn load_ledger(&self) -> Result<MetricsLedger> {
        let conn = self.open_metrics()?;
        let mut stmt = conn.prepare(
            "SELECT strategy, usage_count, success_count, total_duration_ms FROM strategy_metrics",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (name, usage, successes, duration) = row?;
            let kind = name
                .parse::<StrategyKind>()
                .map_err(StorageError::Corrupt)?;
            entries.push((
                kind,
                StrategyMetrics {
                    usage_count: to_count(usage)?,
                    success_count: to_count(successes)?,
                    total_duration_ms: to_count(duration)?,
                },
            ));
        }
        Ok(MetricsLedger::from_entries(entries))
    }

    /// Replaces the stored ledger with `ledger`.
    pub fn save_ledger(&self, ledger: &MetricsLedger) -> Result<()> {
        let mut conn = self.open_metrics()?;
        let tx = conn.transaction()?;
        for (kind, m) in ledger.entries() {
            tx.execute(
                "INSERT INTO strategy_metrics
                   (strategy, usage_count, success_count, total_duration_ms)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(strategy) DO UPDATE SET
                   usage_count = excluded.usage_count,
                   success_count = excluded.success_count,
                   total_duration_ms = excluded.total_duration_ms",
                rusqlite::params![
                    kind.name(),
                    to_column(m.usage_count)?,
                    to_column(m.success_count)?,
                    to_column(m.total_duration_ms)?,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn open_metrics(&self) -> Result<Connection> {
        let conn = Connection::open(self.metrics_path())?;
        conn.execute_batch(SCHEMA)?;
        Ok(conn)
    }
}

fn to_count(value: i64) -> Result<u64> {
    u64::try_from(value).map_err(|_| StorageError::Corrupt(format!("negative metric: {value}")))
}

fn to_column(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| StorageError::Corrupt(format!("metric overflow: {value}")))
}
