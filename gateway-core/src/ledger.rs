//! The durable, append-only usage ledger.
//!
//! Every completed dispatch — success or failure — is appended once.
//! Backed by `rusqlite` in WAL mode so records survive a process restart
//! without a separate database server: an append-only tabular store with
//! indexes on caller and timestamp.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{Connection, OptionalExtension, params};
use thiserror::Error;

use crate::money::MicroUsd;

/// A single completed dispatch, ready to append.
#[derive(Debug, Clone)]
pub struct UsageRecord {
    /// Caller identifier: wallet header, payment proof, or `"anonymous"`.
    pub caller: String,
    /// The capability that was dispatched (or attempted).
    pub capability_id: String,
    /// What was charged, in micro-dollars.
    pub cost: MicroUsd,
    /// Whether the dispatch ultimately succeeded.
    pub success: bool,
    /// End-to-end latency, in milliseconds.
    pub latency_ms: u64,
    /// Unix timestamp of the call.
    pub timestamp: i64,
}

/// Totals across a caller's usage history.
#[derive(Debug, Clone, Default)]
pub struct UsageTotals {
    /// Total number of calls.
    pub total_calls: u64,
    /// Total amount spent, in micro-dollars.
    pub total_spend: MicroUsd,
    /// Fraction of calls that succeeded, in `[0, 1]`.
    pub success_fraction: f64,
    /// Average latency across all calls, in milliseconds.
    pub avg_latency_ms: f64,
    /// Timestamp of the first recorded call, if any.
    pub first_call_at: Option<i64>,
    /// Timestamp of the most recent recorded call, if any.
    pub last_call_at: Option<i64>,
}

/// Per-capability usage aggregate, for `GET /usage/capabilities`.
#[derive(Debug, Clone)]
pub struct CapabilityUsage {
    /// The capability this row aggregates.
    pub capability_id: String,
    /// Number of calls to this capability.
    pub calls: u64,
    /// Total spend on this capability, in micro-dollars.
    pub spend: MicroUsd,
    /// Fraction of calls that succeeded, in `[0, 1]`.
    pub success_rate: f64,
    /// Average latency, in milliseconds.
    pub avg_latency_ms: f64,
}

/// A single day's spend and call count, for `GET /usage/timeline`.
#[derive(Debug, Clone)]
pub struct TimelineEntry {
    /// Calendar day, as `YYYY-MM-DD`.
    pub date: String,
    /// Calls made on this day.
    pub calls: u64,
    /// Spend on this day, in micro-dollars.
    pub spend: MicroUsd,
}

/// An inclusive day range to scope an aggregation query.
#[derive(Debug, Clone, Copy, Default)]
pub struct DateRange {
    /// Inclusive lower bound, as a Unix timestamp at start of day.
    pub from: Option<i64>,
    /// Inclusive upper bound, as a Unix timestamp at end of day.
    pub to: Option<i64>,
}

/// Errors persisting or querying usage records.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The underlying SQLite operation failed.
    #[error("usage ledger storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}

/// Durable storage for usage records, backed by `rusqlite` in WAL mode.
///
/// A single `rusqlite::Connection` guarded by a `Mutex` is sufficient here:
/// SQLite already serializes writers, and usage-ledger appends are bounded,
/// non-suspending operations that never hold the lock across an await.
pub struct SqliteUsageLedger {
    conn: Mutex<Connection>,
}

impl SqliteUsageLedger {
    /// Opens (creating if absent) a WAL-mode SQLite database at `path` and
    /// ensures the schema exists.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] if the database cannot be opened, WAL mode
    /// cannot be set, or the schema cannot be created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS usage_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                caller TEXT NOT NULL,
                capability_id TEXT NOT NULL,
                cost_micros INTEGER NOT NULL,
                success INTEGER NOT NULL,
                latency_ms INTEGER NOT NULL,
                ts INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_usage_caller ON usage_records(caller);
            CREATE INDEX IF NOT EXISTS idx_usage_ts ON usage_records(ts);",
        )?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Opens an in-memory ledger, for tests.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] if the schema cannot be created.
    pub fn open_in_memory() -> Result<Self, LedgerError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(
            "CREATE TABLE usage_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                caller TEXT NOT NULL,
                capability_id TEXT NOT NULL,
                cost_micros INTEGER NOT NULL,
                success INTEGER NOT NULL,
                latency_ms INTEGER NOT NULL,
                ts INTEGER NOT NULL
            );
            CREATE INDEX idx_usage_caller ON usage_records(caller);
            CREATE INDEX idx_usage_ts ON usage_records(ts);",
        )?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Appends a usage record. Committed before returning, so a crash
    /// cannot double-count a settled payment.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] on storage failure.
    pub fn append(&self, record: &UsageRecord) -> Result<(), LedgerError> {
        let conn = self.conn.lock().expect("usage ledger mutex poisoned");
        conn.execute(
            "INSERT INTO usage_records (caller, capability_id, cost_micros, success, latency_ms, ts)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.caller,
                record.capability_id,
                record.cost.as_micros(),
                i64::from(record.success),
                record.latency_ms,
                record.timestamp,
            ],
        )?;
        Ok(())
    }

    /// Aggregate totals for `caller`, optionally scoped to a day range.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] on storage failure.
    pub fn totals(&self, caller: &str, range: DateRange) -> Result<UsageTotals, LedgerError> {
        let conn = self.conn.lock().expect("usage ledger mutex poisoned");
        let (where_clause, from, to) = range_clause(range);
        let sql = format!(
            "SELECT COUNT(*), COALESCE(SUM(cost_micros), 0), COALESCE(AVG(success), 0),
                    COALESCE(AVG(latency_ms), 0), MIN(ts), MAX(ts)
             FROM usage_records WHERE caller = ?1 {where_clause}"
        );
        let row = conn.query_row(&sql, params![caller, from, to], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, f64>(2)?,
                row.get::<_, f64>(3)?,
                row.get::<_, Option<i64>>(4)?,
                row.get::<_, Option<i64>>(5)?,
            ))
        })?;
        Ok(UsageTotals {
            #[allow(clippy::cast_sign_loss)]
            total_calls: row.0 as u64,
            #[allow(clippy::cast_sign_loss)]
            total_spend: MicroUsd::from_micros(row.1 as u64),
            success_fraction: row.2,
            avg_latency_ms: row.3,
            first_call_at: row.4,
            last_call_at: row.5,
        })
    }

    /// Per-capability aggregates for `caller`, descending by spend.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] on storage failure.
    pub fn by_capability(&self, caller: &str, range: DateRange) -> Result<Vec<CapabilityUsage>, LedgerError> {
        let conn = self.conn.lock().expect("usage ledger mutex poisoned");
        let (where_clause, from, to) = range_clause(range);
        let sql = format!(
            "SELECT capability_id, COUNT(*), SUM(cost_micros), AVG(success), AVG(latency_ms)
             FROM usage_records WHERE caller = ?1 {where_clause}
             GROUP BY capability_id ORDER BY SUM(cost_micros) DESC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![caller, from, to], |row| {
            Ok(CapabilityUsage {
                capability_id: row.get(0)?,
                #[allow(clippy::cast_sign_loss)]
                calls: row.get::<_, i64>(1)? as u64,
                #[allow(clippy::cast_sign_loss)]
                spend: MicroUsd::from_micros(row.get::<_, i64>(2)? as u64),
                success_rate: row.get(3)?,
                avg_latency_ms: row.get(4)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(LedgerError::from)
    }

    /// Per-day spend and call count for `caller`, ascending by date.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] on storage failure.
    pub fn timeline(&self, caller: &str, range: DateRange) -> Result<Vec<TimelineEntry>, LedgerError> {
        let conn = self.conn.lock().expect("usage ledger mutex poisoned");
        let (where_clause, from, to) = range_clause(range);
        let sql = format!(
            "SELECT date(ts, 'unixepoch'), COUNT(*), SUM(cost_micros)
             FROM usage_records WHERE caller = ?1 {where_clause}
             GROUP BY date(ts, 'unixepoch') ORDER BY date(ts, 'unixepoch') ASC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![caller, from, to], |row| {
            Ok(TimelineEntry {
                date: row.get(0)?,
                #[allow(clippy::cast_sign_loss)]
                calls: row.get::<_, i64>(1)? as u64,
                #[allow(clippy::cast_sign_loss)]
                spend: MicroUsd::from_micros(row.get::<_, i64>(2)? as u64),
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(LedgerError::from)
    }
}

fn range_clause(range: DateRange) -> (&'static str, i64, i64) {
    match (range.from, range.to) {
        (Some(_), Some(_)) => ("AND ts >= ?2 AND ts <= ?3", range.from.unwrap_or(0), range.to.unwrap_or(i64::MAX)),
        (Some(_), None) => ("AND ts >= ?2 AND ts <= ?3", range.from.unwrap_or(0), i64::MAX),
        (None, Some(_)) => ("AND ts >= ?2 AND ts <= ?3", 0, range.to.unwrap_or(i64::MAX)),
        (None, None) => ("AND ts >= ?2 AND ts <= ?3", 0, i64::MAX),
    }
}

/// Resolves the caller identifier to attribute a dispatch to: an explicit
/// caller-wallet header, then the payment proof, then the literal
/// `"anonymous"`.
#[must_use]
pub fn resolve_caller(wallet_header: Option<&str>, payment_proof: Option<&str>) -> String {
    wallet_header
        .filter(|s| !s.is_empty())
        .or(payment_proof.filter(|s| !s.is_empty()))
        .map_or_else(|| "anonymous".to_owned(), ToOwned::to_owned)
}

/// Whether a usage-scoped query for `query_wallet` is allowed to see data
/// for `caller`, or must be rewritten.
///
/// Returns the wallet identifier the query should actually run against: the
/// header wallet always wins over a mismatched query parameter, unless the
/// request originates from an internal/test peer (`is_internal_peer`).
#[must_use]
pub fn effective_query_wallet(header_wallet: &str, requested_wallet: Option<&str>, is_internal_peer: bool) -> String {
    if is_internal_peer {
        requested_wallet.unwrap_or(header_wallet).to_owned()
    } else {
        header_wallet.to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(caller: &str, capability_id: &str, cost_micros: u64, success: bool, ts: i64) -> UsageRecord {
        UsageRecord {
            caller: caller.to_owned(),
            capability_id: capability_id.to_owned(),
            cost: MicroUsd::from_micros(cost_micros),
            success,
            latency_ms: 42,
            timestamp: ts,
        }
    }

    #[test]
    fn append_and_totals_round_trip() {
        let ledger = SqliteUsageLedger::open_in_memory().unwrap();
        ledger.append(&sample("wallet1", "screenshot", 10_000, true, 1_700_000_000)).unwrap();
        ledger.append(&sample("wallet1", "screenshot", 10_000, false, 1_700_000_100)).unwrap();
        let totals = ledger.totals("wallet1", DateRange::default()).unwrap();
        assert_eq!(totals.total_calls, 2);
        assert_eq!(totals.total_spend, MicroUsd::from_micros(20_000));
        assert!((totals.success_fraction - 0.5).abs() < 1e-9);
    }

    #[test]
    fn by_capability_orders_by_spend_descending() {
        let ledger = SqliteUsageLedger::open_in_memory().unwrap();
        ledger.append(&sample("w", "cheap", 1_000, true, 1)).unwrap();
        ledger.append(&sample("w", "pricey", 50_000, true, 2)).unwrap();
        let rows = ledger.by_capability("w", DateRange::default()).unwrap();
        assert_eq!(rows[0].capability_id, "pricey");
    }

    #[test]
    fn resolve_caller_prefers_wallet_header_then_proof_then_anonymous() {
        assert_eq!(resolve_caller(Some("0xabc"), Some("proof")), "0xabc");
        assert_eq!(resolve_caller(None, Some("proof")), "proof");
        assert_eq!(resolve_caller(None, None), "anonymous");
    }

    #[test]
    fn mismatched_query_wallet_is_rewritten_to_header_for_external_peers() {
        let effective = effective_query_wallet("0xheader", Some("0xother"), false);
        assert_eq!(effective, "0xheader");
    }

    #[test]
    fn internal_peer_may_query_any_wallet() {
        let effective = effective_query_wallet("0xheader", Some("0xother"), true);
        assert_eq!(effective, "0xother");
    }
}
