use super::Pool;
use crate::model::Admin;
use anyhow::Result;
use chrono::Utc;
use tracing::{info, instrument};

pub async fn is_admin(pool: &Pool, tg_user_id: i64) -> Result<bool> {
    let found: Option<i64> = sqlx::query_scalar("SELECT tg_user_id FROM admins WHERE tg_user_id = ?")
        .bind(tg_user_id)
        .fetch_optional(pool)
        .await?;
    Ok(found.is_some())
}

pub async fn list_admins(pool: &Pool) -> Result<Vec<Admin>> {
    let rows = sqlx::query_as::<_, Admin>("SELECT tg_user_id, name, created_at FROM admins ORDER BY created_at")
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

pub async fn admin_ids(pool: &Pool) -> Result<Vec<i64>> {
    let ids: Vec<i64> = sqlx::query_scalar("SELECT tg_user_id FROM admins ORDER BY tg_user_id")
        .fetch_all(pool)
        .await?;
    Ok(ids)
}

/// Add or rename an admin.
#[instrument(skip_all)]
pub async fn add_admin(pool: &Pool, tg_user_id: i64, name: Option<&str>) -> Result<Admin> {
    let admin = sqlx::query_as::<_, Admin>(
        "INSERT INTO admins (tg_user_id, name, created_at) VALUES (?, ?, ?) \
         ON CONFLICT(tg_user_id) DO UPDATE SET name = COALESCE(excluded.name, admins.name) \
         RETURNING tg_user_id, name, created_at",
    )
    .bind(tg_user_id)
    .bind(name)
    .bind(Utc::now())
    .fetch_one(pool)
    .await?;
    Ok(admin)
}

#[instrument(skip_all)]
pub async fn remove_admin(pool: &Pool, tg_user_id: i64) -> Result<bool> {
    let res = sqlx::query("DELETE FROM admins WHERE tg_user_id = ?")
        .bind(tg_user_id)
        .execute(pool)
        .await?;
    Ok(res.rows_affected() > 0)
}

/// Ensure every configured admin id is present.
pub async fn seed_admins(pool: &Pool, ids: &[i64]) -> Result<()> {
    for id in ids {
        sqlx::query("INSERT OR IGNORE INTO admins (tg_user_id, created_at) VALUES (?, ?)")
            .bind(id)
            .bind(Utc::now())
            .execute(pool)
            .await?;
    }
    if !ids.is_empty() {
        info!(count = ids.len(), "seeded admins from config");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{init_pool, run_migrations};

    #[tokio::test]
    async fn seed_add_remove() {
        let pool = init_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();

        seed_admins(&pool, &[1, 2]).await.unwrap();
        seed_admins(&pool, &[2]).await.unwrap();
        assert_eq!(admin_ids(&pool).await.unwrap(), vec![1, 2]);

        let a = add_admin(&pool, 2, Some("Ops")).await.unwrap();
        assert_eq!(a.name.as_deref(), Some("Ops"));
        let a = add_admin(&pool, 2, None).await.unwrap();
        assert_eq!(a.name.as_deref(), Some("Ops"));

        assert!(is_admin(&pool, 1).await.unwrap());
        assert!(remove_admin(&pool, 1).await.unwrap());
        assert!(!is_admin(&pool, 1).await.unwrap());
        assert!(!remove_admin(&pool, 1).await.unwrap());
    }
}
