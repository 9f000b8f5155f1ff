use super::model::{Handle, HandleWithWatchers, Watcher, WatcherWithHandles};
use anyhow::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use thiserror::Error;
use tracing::instrument;

pub type Pool = SqlitePool;

/// Typed failures surfaced by the repository. The HTTP layer maps these 1:1
/// to status codes; the poller and bot render them as plain messages.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("the @{0} handle could not be found")]
    HandleNotFound(String),
    #[error("a watcher with chat_id {0} could not be found")]
    WatcherNotFound(String),
    #[error("the handle @{handle} is already being watched by {chat_id}")]
    AlreadyWatching { handle: String, chat_id: String },
    #[error("the handle @{handle} is not being watched by {chat_id}")]
    NoRelationship { handle: String, chat_id: String },
    #[error("storage unavailable: {0}")]
    Unavailable(#[from] sqlx::Error),
}

pub type DbResult<T> = Result<T, DbError>;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized).await?;
    // Enable WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA foreign_keys=ON;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/` and ensure the parent
/// directory exists. Leaves in-memory URLs untouched. Returns possibly-updated URL.
fn prepare_sqlite_url(url: &str) -> String {
    // Pass through non-sqlite schemes
    if !url.starts_with("sqlite:") {
        return url.to_string();
    }

    // In-memory URLs like sqlite::memory: or sqlite::memory:?cache=shared
    if url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    // Strip prefix and optional //
    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);

    // Separate query string if any
    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };

    if path_part.is_empty() {
        // nothing to normalize
        return url.to_string();
    }

    // Expand leading ~/ to HOME
    let expanded_path = if let Some(rest) = path_part.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            format!("{}/{}", home.trim_end_matches('/'), rest)
        } else {
            path_part.to_string()
        }
    } else {
        path_part.to_string()
    };

    // Ensure parent directory exists if any
    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    // Rebuild URL, prefer sqlite:// form
    let mut rebuilt = String::from("sqlite://");
    rebuilt.push_str(&expanded_path);
    if let Some(q) = query_part {
        rebuilt.push('?');
        rebuilt.push_str(q);
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn handle_exists(pool: &Pool, name: &str) -> DbResult<bool> {
    let found = sqlx::query_scalar::<_, i64>("SELECT id FROM handles WHERE name = ? LIMIT 1")
        .bind(name)
        .fetch_optional(pool)
        .await?;
    Ok(found.is_some())
}

#[instrument(skip_all)]
pub async fn watcher_exists(pool: &Pool, chat_id: &str) -> DbResult<bool> {
    let found = sqlx::query_scalar::<_, i64>("SELECT id FROM watchers WHERE chat_id = ? LIMIT 1")
        .bind(chat_id)
        .fetch_optional(pool)
        .await?;
    Ok(found.is_some())
}

/// Insert the handle if absent. Returns whether the handle is present afterwards,
/// so a repeat call is a no-op success.
#[instrument(skip_all)]
pub async fn add_handle(pool: &Pool, name: &str) -> DbResult<bool> {
    let mut tx = pool.begin().await?;
    ensure_handle_tx(&mut tx, name).await?;
    tx.commit().await?;
    handle_exists(pool, name).await
}

#[instrument(skip_all)]
pub async fn add_watcher(pool: &Pool, chat_id: &str) -> DbResult<bool> {
    let mut tx = pool.begin().await?;
    ensure_watcher_tx(&mut tx, chat_id).await?;
    tx.commit().await?;
    watcher_exists(pool, chat_id).await
}

/// Unordered list of all handle names.
#[instrument(skip_all)]
pub async fn fetch_all_handles(pool: &Pool) -> DbResult<Vec<String>> {
    let names = sqlx::query_scalar::<_, String>("SELECT name FROM handles")
        .fetch_all(pool)
        .await?;
    Ok(names)
}

/// Fetch a handle plus all of its watchers in a single outer-join query,
/// folding the rows into one parent record client-side.
#[instrument(skip_all)]
pub async fn fetch_handle(pool: &Pool, name: &str) -> DbResult<HandleWithWatchers> {
    let rows = sqlx::query(
        "SELECT h.id, h.name, h.created_at, h.updated_at, \
                w.id AS w_id, w.chat_id AS w_chat_id, \
                w.created_at AS w_created_at, w.updated_at AS w_updated_at \
         FROM handles h \
         LEFT JOIN watch_relationships r ON r.handle_id = h.id \
         LEFT JOIN watchers w ON w.id = r.watcher_id \
         WHERE h.name = ?",
    )
    .bind(name)
    .fetch_all(pool)
    .await?;

    let Some(first) = rows.first() else {
        return Err(DbError::HandleNotFound(name.to_string()));
    };

    let handle = Handle {
        id: first.get("id"),
        name: first.get("name"),
        created_at: first.get("created_at"),
        updated_at: first.get("updated_at"),
    };

    // An all-NULL child side means zero watchers, not a synthetic watcher.
    let mut watchers = Vec::new();
    for row in &rows {
        if let Some(id) = row.get::<Option<i64>, _>("w_id") {
            watchers.push(watcher_from_joined_row(row, id));
        }
    }

    Ok(HandleWithWatchers { handle, watchers })
}

/// Symmetric to [`fetch_handle`]: a watcher plus all handles it watches.
#[instrument(skip_all)]
pub async fn fetch_watcher(pool: &Pool, chat_id: &str) -> DbResult<WatcherWithHandles> {
    let rows = sqlx::query(
        "SELECT w.id, w.chat_id, w.created_at, w.updated_at, \
                h.id AS h_id, h.name AS h_name, \
                h.created_at AS h_created_at, h.updated_at AS h_updated_at \
         FROM watchers w \
         LEFT JOIN watch_relationships r ON r.watcher_id = w.id \
         LEFT JOIN handles h ON h.id = r.handle_id \
         WHERE w.chat_id = ?",
    )
    .bind(chat_id)
    .fetch_all(pool)
    .await?;

    let Some(first) = rows.first() else {
        return Err(DbError::WatcherNotFound(chat_id.to_string()));
    };

    let watcher = Watcher {
        id: first.get("id"),
        chat_id: first.get("chat_id"),
        created_at: first.get("created_at"),
        updated_at: first.get("updated_at"),
    };

    let mut handles = Vec::new();
    for row in &rows {
        if let Some(id) = row.get::<Option<i64>, _>("h_id") {
            handles.push(Handle {
                id,
                name: row.get("h_name"),
                created_at: row.get("h_created_at"),
                updated_at: row.get("h_updated_at"),
            });
        }
    }

    Ok(WatcherWithHandles { watcher, handles })
}

fn watcher_from_joined_row(row: &SqliteRow, id: i64) -> Watcher {
    Watcher {
        id,
        chat_id: row.get("w_chat_id"),
        created_at: row.get("w_created_at"),
        updated_at: row.get("w_updated_at"),
    }
}

/// Create a watch relationship, auto-creating the handle and watcher if absent.
///
/// Provisioning runs unconditionally before the uniqueness check, so a repeat
/// call still leaves both entities in place and then fails with
/// [`DbError::AlreadyWatching`].
#[instrument(skip_all)]
pub async fn create_watch_relationship(pool: &Pool, name: &str, chat_id: &str) -> DbResult<()> {
    let mut tx = pool.begin().await?;
    let handle_id = ensure_handle_tx(&mut tx, name).await?;
    let watcher_id = ensure_watcher_tx(&mut tx, chat_id).await?;

    let existing = sqlx::query_scalar::<_, i64>(
        "SELECT 1 FROM watch_relationships WHERE handle_id = ? AND watcher_id = ?",
    )
    .bind(handle_id)
    .bind(watcher_id)
    .fetch_optional(&mut *tx)
    .await?;
    if existing.is_some() {
        // Keep the provisioned entities.
        tx.commit().await?;
        return Err(DbError::AlreadyWatching {
            handle: name.to_string(),
            chat_id: chat_id.to_string(),
        });
    }

    sqlx::query("INSERT INTO watch_relationships (handle_id, watcher_id) VALUES (?, ?)")
        .bind(handle_id)
        .bind(watcher_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(())
}

/// Delete a watch relationship. Unlike creation, both entities and the
/// relationship itself must already exist.
#[instrument(skip_all)]
pub async fn delete_watch_relationship(pool: &Pool, name: &str, chat_id: &str) -> DbResult<()> {
    let mut tx = pool.begin().await?;
    let handle_id = sqlx::query_scalar::<_, i64>("SELECT id FROM handles WHERE name = ?")
        .bind(name)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| DbError::HandleNotFound(name.to_string()))?;
    let watcher_id = sqlx::query_scalar::<_, i64>("SELECT id FROM watchers WHERE chat_id = ?")
        .bind(chat_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| DbError::WatcherNotFound(chat_id.to_string()))?;

    let deleted =
        sqlx::query("DELETE FROM watch_relationships WHERE handle_id = ? AND watcher_id = ?")
            .bind(handle_id)
            .bind(watcher_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
    if deleted == 0 {
        return Err(DbError::NoRelationship {
            handle: name.to_string(),
            chat_id: chat_id.to_string(),
        });
    }
    tx.commit().await?;
    Ok(())
}

/// Idempotent "ensure exists" returning the internal row id.
async fn ensure_handle_tx(tx: &mut Transaction<'_, Sqlite>, name: &str) -> DbResult<i64> {
    if let Some(id) = sqlx::query_scalar::<_, i64>("SELECT id FROM handles WHERE name = ?")
        .bind(name)
        .fetch_optional(&mut **tx)
        .await?
    {
        return Ok(id);
    }
    let rec = sqlx::query("INSERT INTO handles (name) VALUES (?) RETURNING id")
        .bind(name)
        .fetch_one(&mut **tx)
        .await?;
    Ok(rec.get::<i64, _>("id"))
}

async fn ensure_watcher_tx(tx: &mut Transaction<'_, Sqlite>, chat_id: &str) -> DbResult<i64> {
    if let Some(id) = sqlx::query_scalar::<_, i64>("SELECT id FROM watchers WHERE chat_id = ?")
        .bind(chat_id)
        .fetch_optional(&mut **tx)
        .await?
    {
        return Ok(id);
    }
    let rec = sqlx::query("INSERT INTO watchers (chat_id) VALUES (?) RETURNING id")
        .bind(chat_id)
        .fetch_one(&mut **tx)
        .await?;
    Ok(rec.get::<i64, _>("id"))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_pool() -> Pool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    async fn count(pool: &Pool, sql: &str) -> i64 {
        sqlx::query_scalar(sql).fetch_one(pool).await.unwrap()
    }

    #[tokio::test]
    async fn add_handle_is_idempotent() {
        let pool = setup_pool().await;
        assert!(add_handle(&pool, "alice").await.unwrap());
        assert!(add_handle(&pool, "alice").await.unwrap());
        assert_eq!(count(&pool, "SELECT COUNT(*) FROM handles").await, 1);
    }

    #[tokio::test]
    async fn add_watcher_is_idempotent() {
        let pool = setup_pool().await;
        assert!(add_watcher(&pool, "123").await.unwrap());
        assert!(add_watcher(&pool, "123").await.unwrap());
        assert_eq!(count(&pool, "SELECT COUNT(*) FROM watchers").await, 1);
    }

    #[tokio::test]
    async fn duplicate_watch_fails_with_already_watching() {
        let pool = setup_pool().await;
        create_watch_relationship(&pool, "alice", "123")
            .await
            .unwrap();
        let err = create_watch_relationship(&pool, "alice", "123")
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::AlreadyWatching { .. }));
        assert_eq!(
            count(&pool, "SELECT COUNT(*) FROM watch_relationships").await,
            1
        );
    }

    #[tokio::test]
    async fn watch_auto_creates_entities() {
        let pool = setup_pool().await;
        assert!(!handle_exists(&pool, "alice").await.unwrap());
        assert!(!watcher_exists(&pool, "123").await.unwrap());
        create_watch_relationship(&pool, "alice", "123")
            .await
            .unwrap();
        assert!(handle_exists(&pool, "alice").await.unwrap());
        assert!(watcher_exists(&pool, "123").await.unwrap());
    }

    #[tokio::test]
    async fn unwatch_before_watch_reports_missing_pieces() {
        let pool = setup_pool().await;
        // Nothing exists at all.
        let err = delete_watch_relationship(&pool, "alice", "123")
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::HandleNotFound(_)));

        add_handle(&pool, "alice").await.unwrap();
        let err = delete_watch_relationship(&pool, "alice", "123")
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::WatcherNotFound(_)));

        add_watcher(&pool, "123").await.unwrap();
        let err = delete_watch_relationship(&pool, "alice", "123")
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::NoRelationship { .. }));
    }

    #[tokio::test]
    async fn fetch_unknown_handle_is_not_found() {
        let pool = setup_pool().await;
        let err = fetch_handle(&pool, "ghost").await.unwrap_err();
        assert!(matches!(err, DbError::HandleNotFound(_)));
        let err = fetch_watcher(&pool, "999").await.unwrap_err();
        assert!(matches!(err, DbError::WatcherNotFound(_)));
    }

    #[tokio::test]
    async fn fetch_folds_joined_rows_without_synthetic_children() {
        let pool = setup_pool().await;
        add_handle(&pool, "lonely").await.unwrap();
        let fetched = fetch_handle(&pool, "lonely").await.unwrap();
        assert_eq!(fetched.handle.name, "lonely");
        assert!(fetched.watchers.is_empty());

        create_watch_relationship(&pool, "lonely", "1")
            .await
            .unwrap();
        create_watch_relationship(&pool, "lonely", "2")
            .await
            .unwrap();
        let fetched = fetch_handle(&pool, "lonely").await.unwrap();
        let mut chat_ids: Vec<_> = fetched.watchers.iter().map(|w| w.chat_id.clone()).collect();
        chat_ids.sort();
        assert_eq!(chat_ids, vec!["1", "2"]);
    }

    #[tokio::test]
    async fn watch_unwatch_round_trip_keeps_entities() {
        let pool = setup_pool().await;
        add_handle(&pool, "alice").await.unwrap();
        add_watcher(&pool, "123").await.unwrap();
        create_watch_relationship(&pool, "alice", "123")
            .await
            .unwrap();

        let watcher = fetch_watcher(&pool, "123").await.unwrap();
        let names: Vec<_> = watcher.handles.iter().map(|h| h.name.clone()).collect();
        assert_eq!(names, vec!["alice"]);

        delete_watch_relationship(&pool, "alice", "123")
            .await
            .unwrap();
        let watcher = fetch_watcher(&pool, "123").await.unwrap();
        assert!(watcher.handles.is_empty());

        // Unwatch never cascade-deletes the entities themselves.
        assert!(handle_exists(&pool, "alice").await.unwrap());
        assert!(watcher_exists(&pool, "123").await.unwrap());
    }

    #[tokio::test]
    async fn fetch_all_handles_lists_every_name() {
        let pool = setup_pool().await;
        assert!(fetch_all_handles(&pool).await.unwrap().is_empty());
        add_handle(&pool, "alice").await.unwrap();
        add_handle(&pool, "bob").await.unwrap();
        let mut names = fetch_all_handles(&pool).await.unwrap();
        names.sort();
        assert_eq!(names, vec!["alice", "bob"]);
    }

    #[test]
    fn sqlite_url_passthrough_for_memory() {
        assert_eq!(prepare_sqlite_url("sqlite::memory:"), "sqlite::memory:");
        assert_eq!(
            prepare_sqlite_url("sqlite::memory:?cache=shared"),
            "sqlite::memory:?cache=shared"
        );
    }
}
