use super::Pool;
use crate::model::{OrderStatus, OutboxKind, OutboxTask};
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqliteConnection};
use tracing::instrument;

/// Enqueue inside the caller's transaction so the task commits with the
/// change it reports.
pub async fn enqueue_outbox(
    conn: &mut SqliteConnection,
    kind: OutboxKind,
    ref_id: i64,
    status: Option<OrderStatus>,
    due_at: DateTime<Utc>,
) -> Result<i64> {
    let rec = sqlx::query(
        "INSERT INTO outbox (kind, ref_id, status, attempt, due_at) VALUES (?, ?, ?, 0, ?) RETURNING id",
    )
    .bind(kind.as_str())
    .bind(ref_id)
    .bind(status.map(|s| s.as_str()))
    .bind(due_at)
    .fetch_one(&mut *conn)
    .await?;
    Ok(rec.get("id"))
}

#[instrument(skip_all)]
pub async fn next_due_outbox(pool: &Pool) -> Result<Option<OutboxTask>> {
    let row = sqlx::query(
        "SELECT id, kind, ref_id, status, attempt FROM outbox \
         WHERE datetime(due_at) <= CURRENT_TIMESTAMP \
         ORDER BY datetime(due_at) ASC, id ASC LIMIT 1",
    )
    .fetch_optional(pool)
    .await?;
    let Some(row) = row else {
        return Ok(None);
    };
    let kind: String = row.get("kind");
    let status: Option<String> = row.get("status");
    let status = match status {
        Some(s) => Some(OrderStatus::parse_status(&s).ok_or_else(|| anyhow!("unknown order status {s}"))?),
        None => None,
    };
    Ok(Some(OutboxTask {
        id: row.get("id"),
        kind: OutboxKind::parse_kind(&kind).ok_or_else(|| anyhow!("unknown outbox kind {kind}"))?,
        ref_id: row.get("ref_id"),
        status,
        attempt: row.get("attempt"),
    }))
}

#[instrument(skip_all)]
pub async fn delete_outbox(pool: &Pool, id: i64) -> Result<()> {
    sqlx::query("DELETE FROM outbox WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Exponential backoff: 5s * 2^attempt, capped at `max_cap_secs` (or one
/// hour when the cap is not positive).
pub fn backoff_secs(attempt: i32, max_cap_secs: i64) -> i64 {
    let secs = 5_i64 * (1_i64 << attempt.clamp(0, 10));
    let cap = if max_cap_secs <= 0 { 3600 } else { max_cap_secs };
    secs.min(cap)
}

#[instrument(skip_all)]
pub async fn backoff_outbox(pool: &Pool, id: i64, attempt: i32, max_cap_secs: i64) -> Result<()> {
    let secs = backoff_secs(attempt, max_cap_secs);
    sqlx::query(
        "UPDATE outbox SET attempt = ?, due_at = datetime('now', ? || ' seconds') WHERE id = ?",
    )
    .bind(attempt + 1)
    .bind(secs)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn count_outbox(pool: &Pool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM outbox")
        .fetch_one(pool)
        .await?;
    Ok(count)
}
