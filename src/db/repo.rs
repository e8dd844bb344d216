use super::model::Snapshot;
use anyhow::{Context, Result};
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use tracing::instrument;

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized)
        .await
        .with_context(|| format!("failed to open database {}", normalized))?;
    // Enable WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/`, ensure the parent
/// directory exists and ask SQLite to create the file. Leaves in-memory URLs
/// untouched.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);
    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let query = match query_part {
        Some(q) if q.contains("mode=") => q.to_string(),
        Some(q) => format!("{}&mode=rwc", q),
        None => "mode=rwc".to_string(),
    };
    format!("sqlite://{}?{}", expanded_path, query)
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn get_token(pool: &Pool, session_id: &str) -> Result<Option<String>> {
    let token = sqlx::query_scalar::<_, String>("SELECT token FROM tokens WHERE session_id = ?")
        .bind(session_id)
        .fetch_optional(pool)
        .await?;
    Ok(token)
}

#[instrument(skip_all)]
pub async fn put_token(pool: &Pool, session_id: &str, token_json: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO tokens (session_id, token, updated_at) VALUES (?, ?, CURRENT_TIMESTAMP) \
         ON CONFLICT(session_id) DO UPDATE SET token = excluded.token, updated_at = CURRENT_TIMESTAMP",
    )
    .bind(session_id)
    .bind(token_json)
    .execute(pool)
    .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn delete_token(pool: &Pool, session_id: &str) -> Result<()> {
    sqlx::query("DELETE FROM tokens WHERE session_id = ?")
        .bind(session_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Store `items` as the newest snapshot of `endpoint`.
#[instrument(skip_all, fields(endpoint = endpoint))]
pub async fn save_snapshot<T: Serialize>(pool: &Pool, endpoint: &str, items: &[T]) -> Result<i64> {
    let payload = serde_json::to_vec(items).context("failed to encode snapshot")?;
    let rec = sqlx::query(
        "INSERT INTO snapshots (endpoint, item_count, payload) VALUES (?, ?, ?) RETURNING id",
    )
    .bind(endpoint)
    .bind(items.len() as i64)
    .bind(payload)
    .fetch_one(pool)
    .await?;
    Ok(rec.get("id"))
}

#[instrument(skip_all)]
pub async fn latest_snapshot(pool: &Pool, endpoint: &str) -> Result<Option<Snapshot>> {
    let row = sqlx::query(
        "SELECT id, endpoint, taken_at, item_count, payload FROM snapshots WHERE endpoint = ? ORDER BY id DESC LIMIT 1",
    )
    .bind(endpoint)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|row| Snapshot {
        id: row.get("id"),
        endpoint: row.get("endpoint"),
        taken_at: row.get("taken_at"),
        item_count: row.get("item_count"),
        payload: row.get("payload"),
    }))
}
