//! `GET /usage`, `GET /usage/capabilities`, `GET /usage/timeline` — caller
//! self-service usage reporting.

use std::net::SocketAddr;

use axum::Json;
use axum::extract::{ConnectInfo, Query, State};
use axum::http::HeaderMap;
use gateway_core::ledger::{DateRange, effective_query_wallet};
use gateway_core::money::format_dollars;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::ApiError;
use crate::paygate::WALLET_HEADER;
use crate::state::AppState;

/// Common query parameters across all three usage endpoints.
#[derive(Debug, Deserialize)]
pub struct UsageQuery {
    /// Wallet to query; only honored from an allow-listed internal peer,
    /// otherwise the caller's own header wallet is always used instead.
    pub wallet: Option<String>,
    /// Inclusive lower bound, `YYYY-MM-DD`.
    pub from: Option<String>,
    /// Inclusive upper bound, `YYYY-MM-DD`.
    pub to: Option<String>,
}

pub async fn usage(
    State(app): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(query): Query<UsageQuery>,
) -> Result<Json<Value>, ApiError> {
    let (wallet, range) = resolve_query(&app, peer, &headers, &query)?;
    let totals = app.context.ledger.totals(&wallet, range).map_err(ledger_error)?;

    Ok(Json(json!({
        "wallet": wallet,
        "totalCalls": totals.total_calls,
        "totalSpend": format_dollars(totals.total_spend),
        "successRate": totals.success_fraction,
        "avgLatencyMs": totals.avg_latency_ms,
        "firstCallAt": totals.first_call_at,
        "lastCallAt": totals.last_call_at,
    })))
}

pub async fn usage_capabilities(
    State(app): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(query): Query<UsageQuery>,
) -> Result<Json<Value>, ApiError> {
    let (wallet, range) = resolve_query(&app, peer, &headers, &query)?;
    let rows = app.context.ledger.by_capability(&wallet, range).map_err(ledger_error)?;

    let capabilities: Vec<Value> = rows
        .into_iter()
        .map(|row| {
            json!({
                "capabilityId": row.capability_id,
                "calls": row.calls,
                "spend": format_dollars(row.spend),
                "successRate": row.success_rate,
                "avgLatencyMs": row.avg_latency_ms,
            })
        })
        .collect();

    Ok(Json(json!({ "wallet": wallet, "capabilities": capabilities })))
}

pub async fn usage_timeline(
    State(app): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(query): Query<UsageQuery>,
) -> Result<Json<Value>, ApiError> {
    let (wallet, range) = resolve_query(&app, peer, &headers, &query)?;
    let rows = app.context.ledger.timeline(&wallet, range).map_err(ledger_error)?;

    let days: Vec<Value> = rows
        .into_iter()
        .map(|row| json!({ "date": row.date, "calls": row.calls, "spend": format_dollars(row.spend) }))
        .collect();

    Ok(Json(json!({ "wallet": wallet, "days": days })))
}

/// Applies the self-query access-control rule and parses the day-range query
/// params into Unix-second bounds.
fn resolve_query(
    app: &AppState,
    peer: std::net::IpAddr,
    headers: &HeaderMap,
    query: &UsageQuery,
) -> Result<(String, DateRange), ApiError> {
    let header_wallet = headers
        .get(WALLET_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .ok_or(ApiError::WalletRequired)?;

    let is_internal_peer = app.payment.is_allow_listed(peer);
    let wallet = effective_query_wallet(header_wallet, query.wallet.as_deref(), is_internal_peer);

    let range = DateRange {
        from: query.from.as_deref().and_then(day_start_epoch),
        to: query.to.as_deref().and_then(day_end_epoch),
    };

    Ok((wallet, range))
}

fn ledger_error(e: gateway_core::ledger::LedgerError) -> ApiError {
    ApiError::Internal(e.to_string())
}

/// Parses a `YYYY-MM-DD` date into its first second, as a Unix timestamp.
fn day_start_epoch(date: &str) -> Option<i64> {
    days_since_epoch(date).map(|days| days * 86_400)
}

/// Parses a `YYYY-MM-DD` date into its last second, as a Unix timestamp.
fn day_end_epoch(date: &str) -> Option<i64> {
    days_since_epoch(date).map(|days| days * 86_400 + 86_399)
}

/// Civil-date-to-days-since-epoch, via Howard Hinnant's `days_from_civil`
/// algorithm (proleptic Gregorian, valid for any year).
fn days_since_epoch(date: &str) -> Option<i64> {
    let mut parts = date.splitn(3, '-');
    let year: i64 = parts.next()?.parse().ok()?;
    let month: i64 = parts.next()?.parse().ok()?;
    let day: i64 = parts.next()?.parse().ok()?;
    if !(1..=12).contains(&month) || !(1..=31).contains(&day) {
        return None;
    }

    let y = if month <= 2 { year - 1 } else { year };
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = y - era * 400;
    let doy = (153 * (if month > 2 { month - 3 } else { month + 9 }) + 2) / 5 + day - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    Some(era * 146_097 + doe - 719_468)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_day_matches_unix_epoch() {
        assert_eq!(days_since_epoch("1970-01-01"), Some(0));
        assert_eq!(days_since_epoch("2024-01-01"), Some(19_723));
    }

    #[test]
    fn rejects_malformed_dates() {
        assert_eq!(days_since_epoch("not-a-date"), None);
        assert_eq!(days_since_epoch("2024-13-01"), None);
    }
}
