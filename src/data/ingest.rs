//! Normalizing write operations
//!
//! Each function runs against the writer's open transaction; none of them
//! commit. Callers (the write serializer) own transaction boundaries.

use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

use super::models::*;
use super::records::{self, StoredStatus};
use super::schema::{Table, upsert_sql};
use crate::error::{Result, StoreError};

/// Rows removed by an orphan sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub statuses: u64,
    pub accounts: u64,
}

// =============================================================================
// Accounts and statuses
// =============================================================================

/// Replace an account row wholesale.
pub async fn upsert_account(conn: &mut SqliteConnection, account: &Account) -> Result<()> {
    let sql = upsert_sql(Table::Account);
    records::bind_account(sqlx::query(&sql), account)?
        .execute(&mut *conn)
        .await?;

    Ok(())
}

async fn upsert_stored_status(conn: &mut SqliteConnection, status: &StoredStatus) -> Result<()> {
    let sql = upsert_sql(Table::StoredStatus);
    records::bind_stored_status(sqlx::query(&sql), status)?
        .execute(&mut *conn)
        .await?;

    Ok(())
}

/// Store a status together with its author and reblog target.
///
/// Reblog chains are collapsed: the innermost original is stored and the
/// reblog row points straight at it. The original goes first so the
/// reference resolves inside the same transaction.
pub async fn upsert_status(conn: &mut SqliteConnection, status: &Status) -> Result<()> {
    if let Some(original) = status.innermost_reblog() {
        upsert_account(conn, &original.account).await?;
        upsert_stored_status(conn, &StoredStatus::from_status(original)).await?;
    }

    upsert_account(conn, &status.account).await?;
    upsert_stored_status(conn, &StoredStatus::from_status(status)).await
}

/// Delete a status. Join rows cascade; reblogs of it keep a dangling
/// `reblogId` which readers tolerate.
pub async fn delete_status(conn: &mut SqliteConnection, id: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM storedStatus WHERE id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await?;

    Ok(result.rows_affected() > 0)
}

// =============================================================================
// Timelines
// =============================================================================

pub async fn upsert_timeline(conn: &mut SqliteConnection, timeline: &Timeline) -> Result<()> {
    let sql = upsert_sql(Table::Timeline);
    records::bind_timeline(sqlx::query(&sql), timeline)
        .execute(&mut *conn)
        .await?;

    Ok(())
}

/// Add a page of statuses to a timeline.
///
/// Membership accumulates across pages; existing join rows are kept.
pub async fn insert_timeline_statuses(
    conn: &mut SqliteConnection,
    timeline: &Timeline,
    statuses: &[Status],
) -> Result<()> {
    upsert_timeline(conn, timeline).await?;
    let timeline_id = timeline.id();

    for status in statuses {
        upsert_status(conn, status).await?;
        sqlx::query(
            "INSERT OR IGNORE INTO timelineStatusJoin (timelineId, statusId) VALUES (?, ?)",
        )
        .bind(&timeline_id)
        .bind(&status.id)
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

/// Store the user's lists, removing list timelines absent from `lists`.
pub async fn set_lists(conn: &mut SqliteConnection, lists: &[List]) -> Result<()> {
    for list in lists {
        upsert_timeline(conn, &Timeline::List(list.clone())).await?;
    }

    let keep: Vec<String> = lists.iter().map(|list| Timeline::list_key(&list.id)).collect();
    let mut builder = QueryBuilder::<Sqlite>::new("DELETE FROM timeline WHERE kind = ");
    builder.push_bind(TimelineKind::List.as_str());
    push_not_in(&mut builder, "id", keep);
    let result = builder.build().execute(&mut *conn).await?;

    if result.rows_affected() > 0 {
        tracing::debug!(removed = result.rows_affected(), "Removed stale lists");
    }

    Ok(())
}

pub async fn delete_list(conn: &mut SqliteConnection, list_id: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM timeline WHERE id = ? AND kind = ?")
        .bind(Timeline::list_key(list_id))
        .bind(TimelineKind::List.as_str())
        .execute(&mut *conn)
        .await?;

    Ok(result.rows_affected() > 0)
}

// =============================================================================
// Thread context
// =============================================================================

/// Replace the stored context of `parent_id` with a fresh fetch.
///
/// Both sections are rewritten at indices `0..N-1` and anything stored at
/// a higher index is removed, so indexes stay dense per section.
pub async fn replace_context(
    conn: &mut SqliteConnection,
    parent_id: &str,
    context: &Context,
) -> Result<()> {
    let parent_exists: Option<i64> = sqlx::query_scalar("SELECT 1 FROM storedStatus WHERE id = ?")
        .bind(parent_id)
        .fetch_optional(&mut *conn)
        .await?;
    if parent_exists.is_none() {
        return Err(StoreError::ConstraintViolation(format!(
            "context parent {parent_id} is not stored"
        )));
    }

    for (section, statuses) in [
        (ContextSection::Ancestors, &context.ancestors),
        (ContextSection::Descendants, &context.descendants),
    ] {
        for status in statuses {
            upsert_status(conn, status).await?;
        }
        replace_context_section(conn, parent_id, section, statuses).await?;
    }

    Ok(())
}

async fn replace_context_section(
    conn: &mut SqliteConnection,
    parent_id: &str,
    section: ContextSection,
    statuses: &[Status],
) -> Result<()> {
    for (index, status) in statuses.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO statusContextJoin (parentId, statusId, section, "index")
            VALUES (?, ?, ?, ?)
            ON CONFLICT(parentId, section, "index") DO UPDATE SET statusId = excluded.statusId
            "#,
        )
        .bind(parent_id)
        .bind(&status.id)
        .bind(section.as_str())
        .bind(index as i64)
        .execute(&mut *conn)
        .await?;
    }

    sqlx::query(
        r#"DELETE FROM statusContextJoin WHERE parentId = ? AND section = ? AND "index" >= ?"#,
    )
    .bind(parent_id)
    .bind(section.as_str())
    .bind(statuses.len() as i64)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

// =============================================================================
// Transient collections
// =============================================================================

/// Replace the contents of a process-lifetime status collection.
pub async fn replace_transient(
    conn: &mut SqliteConnection,
    collection_id: &str,
    statuses: &[Status],
) -> Result<()> {
    for (index, status) in statuses.iter().enumerate() {
        upsert_status(conn, status).await?;
        sqlx::query(
            r#"
            INSERT INTO transientStatusCollection (collectionId, statusId, "index")
            VALUES (?, ?, ?)
            ON CONFLICT(collectionId, "index") DO UPDATE SET statusId = excluded.statusId
            "#,
        )
        .bind(collection_id)
        .bind(&status.id)
        .bind(index as i64)
        .execute(&mut *conn)
        .await?;
    }

    sqlx::query(r#"DELETE FROM transientStatusCollection WHERE collectionId = ? AND "index" >= ?"#)
        .bind(collection_id)
        .bind(statuses.len() as i64)
        .execute(&mut *conn)
        .await?;

    Ok(())
}

/// Drop every transient collection. Run when a store is opened.
pub async fn clear_transient(conn: &mut SqliteConnection) -> Result<u64> {
    let result = sqlx::query("DELETE FROM transientStatusCollection")
        .execute(&mut *conn)
        .await?;

    Ok(result.rows_affected())
}

// =============================================================================
// Filters
// =============================================================================

pub async fn upsert_filter(conn: &mut SqliteConnection, filter: &Filter) -> Result<()> {
    let sql = upsert_sql(Table::Filter);
    records::bind_filter(sqlx::query(&sql), filter)?
        .execute(&mut *conn)
        .await?;

    Ok(())
}

/// Store the server's filter set, deleting local filters it no longer has.
pub async fn set_filters(conn: &mut SqliteConnection, filters: &[Filter]) -> Result<()> {
    for filter in filters {
        upsert_filter(conn, filter).await?;
    }

    let keep: Vec<String> = filters.iter().map(|filter| filter.id.clone()).collect();
    let mut builder = QueryBuilder::<Sqlite>::new(r#"DELETE FROM "filter" WHERE 1 = 1"#);
    push_not_in(&mut builder, "id", keep);
    builder.build().execute(&mut *conn).await?;

    Ok(())
}

pub async fn delete_filter(conn: &mut SqliteConnection, id: &str) -> Result<bool> {
    let result = sqlx::query(r#"DELETE FROM "filter" WHERE id = ?"#)
        .bind(id)
        .execute(&mut *conn)
        .await?;

    Ok(result.rows_affected() > 0)
}

// =============================================================================
// Maintenance
// =============================================================================

/// Delete statuses no view references, then accounts no status references.
///
/// Live account observations are not consulted: an observed account whose
/// last status goes is deleted too, and its observation ends with `NotFound`.
pub async fn prune_orphans(conn: &mut SqliteConnection) -> Result<PruneReport> {
    let statuses = sqlx::query(
        r#"
        DELETE FROM storedStatus
        WHERE id NOT IN (SELECT statusId FROM timelineStatusJoin)
          AND id NOT IN (SELECT statusId FROM statusContextJoin)
          AND id NOT IN (SELECT parentId FROM statusContextJoin)
          AND id NOT IN (SELECT statusId FROM transientStatusCollection)
          AND id NOT IN (SELECT reblogId FROM storedStatus WHERE reblogId IS NOT NULL)
        "#,
    )
    .execute(&mut *conn)
    .await?
    .rows_affected();

    let accounts = sqlx::query("DELETE FROM account WHERE id NOT IN (SELECT accountId FROM storedStatus)")
        .execute(&mut *conn)
        .await?
        .rows_affected();

    Ok(PruneReport { statuses, accounts })
}

/// Append `AND column NOT IN (...)`; with nothing to keep every row matches.
fn push_not_in(builder: &mut QueryBuilder<'_, Sqlite>, column: &str, keep: Vec<String>) {
    if keep.is_empty() {
        return;
    }

    builder.push(format!(" AND {column} NOT IN ("));
    let mut separated = builder.separated(", ");
    for value in keep {
        separated.push_bind(value);
    }
    separated.push_unseparated(")");
}
