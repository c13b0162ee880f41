use crate::config::Config;
use crate::db::{self, Pool};
use crate::model::{OutboxKind, OutboxTask};
use crate::telegram::{format, render_order, Notifier};
use anyhow::{bail, Result};
use futures::future::join_all;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

/// Take one due task and deliver it. Returns whether a task was processed.
#[instrument(skip_all)]
pub async fn process_next_task(pool: &Pool, notifier: &dyn Notifier, cfg: &Config) -> Result<bool> {
    let Some(task) = db::next_due_outbox(pool).await? else {
        return Ok(false);
    };
    let kind = task.kind.as_str();
    match deliver(pool, notifier, cfg, &task).await {
        Ok(()) => {
            db::delete_outbox(pool, task.id).await?;
            info!(id = task.id, kind, ref_id = task.ref_id, "outbox task succeeded");
        }
        Err(err) => {
            warn!(
                ?err,
                id = task.id,
                kind,
                ref_id = task.ref_id,
                attempt = task.attempt,
                "outbox task failed; backoff"
            );
            let cap = i64::try_from(cfg.outbox.max_backoff_seconds).unwrap_or(i64::MAX);
            db::backoff_outbox(pool, task.id, task.attempt, cap).await?;
        }
    }
    Ok(true)
}

async fn deliver(pool: &Pool, notifier: &dyn Notifier, cfg: &Config, task: &OutboxTask) -> Result<()> {
    let Some(rendered) = render_order(pool, task.ref_id, &cfg.app.currency).await? else {
        warn!(order_id = task.ref_id, "order vanished; dropping notification");
        return Ok(());
    };
    match task.kind {
        OutboxKind::NotifyNewOrder => {
            let admins = db::admin_ids(pool).await?;
            if admins.is_empty() {
                warn!(order_id = task.ref_id, "no admins to notify");
                return Ok(());
            }
            let sends = admins.iter().map(|&chat_id| {
                notifier.send_html(chat_id, &rendered.text, rendered.keyboard.clone())
            });
            let results = join_all(sends).await;
            let mut delivered = 0;
            for (chat_id, res) in admins.iter().zip(results) {
                match res {
                    Ok(()) => delivered += 1,
                    Err(err) => warn!(?err, chat_id, order_id = task.ref_id, "admin notification failed"),
                }
            }
            // Partial success counts as delivered.
            if delivered == 0 {
                bail!("no admin could be notified about order {}", task.ref_id);
            }
        }
        OutboxKind::NotifyStatus => {
            // Report the status this task was queued for; the order may have
            // moved on since.
            let status = task.status.unwrap_or(rendered.order.status);
            let text = format::format_status_update(rendered.order.id, status);
            notifier
                .send_html(rendered.order.tg_user_id, &text, None)
                .await?;
        }
    }
    Ok(())
}

/// Drain the outbox forever, sleeping `outbox.poll_interval_ms` when idle.
pub async fn run_worker(pool: Pool, notifier: impl Notifier, cfg: std::sync::Arc<Config>) {
    let idle = Duration::from_millis(cfg.outbox.poll_interval_ms);
    loop {
        match process_next_task(&pool, &notifier, &cfg).await {
            Ok(true) => {}
            Ok(false) => tokio::time::sleep(idle).await,
            Err(err) => {
                error!(?err, "outbox worker error");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}
