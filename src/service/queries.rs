//! Observable query shapes
//!
//! Each query reads inside one transaction so every statement sees the
//! same committed snapshot.

use chrono::Utc;
use futures::future::BoxFuture;
use sqlx::{Sqlite, SqliteConnection, Transaction};

use super::context::ThreadContext;
use super::filter;
use super::observation::{Observation, Query};
use super::reconstruct::{STATUS_SELECT, reconstruct, reconstruct_all};
use crate::data::schema::select_list;
use crate::data::{
    Account, ContextSection, Database, Filter, FilterContext, List, ReadContext, Status,
    StatusSection, Table, TableSet, Timeline, TimelineKind, decode_account, decode_filter,
    decode_timeline,
};
use crate::error::{Result, StoreError};

async fn begin(ctx: &ReadContext) -> Result<Transaction<'static, Sqlite>> {
    Ok(ctx.pool.begin().await?)
}

async fn load_filters(conn: &mut SqliteConnection) -> Result<Vec<Filter>> {
    let sql = format!(
        r#"SELECT {} FROM "filter" f ORDER BY f.id"#,
        select_list(Table::Filter, "f", "")
    );
    let rows = sqlx::query(&sql).fetch_all(&mut *conn).await?;

    rows.iter().map(|row| decode_filter(row, "")).collect()
}

fn status_tables() -> TableSet {
    TableSet::of(&[Table::Account, Table::StoredStatus])
}

// =============================================================================
// Timeline
// =============================================================================

/// Statuses of one timeline, newest first, with the timeline's filters applied
pub struct TimelineQuery {
    pub timeline: Timeline,
}

impl Query for TimelineQuery {
    type Output = Vec<StatusSection>;
    const NAME: &'static str = "timeline";

    fn dependencies(&self) -> TableSet {
        status_tables()
            .with(Table::TimelineStatusJoin)
            .with(Table::Filter)
    }

    fn fetch<'a>(&'a self, ctx: &'a ReadContext) -> BoxFuture<'a, Result<Self::Output>> {
        Box::pin(async move {
            let timeline_id = self.timeline.id();
            let mut tx = begin(ctx).await?;

            let filters = load_filters(&mut tx).await?;
            let sql = format!(
                "{} JOIN timelineStatusJoin j ON j.statusId = s.id \
                 WHERE j.timelineId = ? \
                 ORDER BY s.createdAt DESC, s.id DESC",
                *STATUS_SELECT
            );
            let rows = sqlx::query(&sql)
                .bind(&timeline_id)
                .fetch_all(&mut *tx)
                .await?;
            tx.commit().await?;

            let statuses = reconstruct_all(&rows)?;
            let matcher = filter::compile(
                &filters,
                Utc::now(),
                Some(self.timeline.filter_context()),
            )?;

            Ok(vec![StatusSection {
                id: timeline_id,
                statuses: filter::apply(matcher.as_ref(), statuses, &ctx.cache),
            }])
        })
    }
}

// =============================================================================
// Thread context
// =============================================================================

/// A parent status with its stored context; ancestors and descendants are
/// filtered for the thread context, the parent never is
pub struct ContextQuery {
    pub parent_id: String,
}

async fn load_context_section(
    conn: &mut SqliteConnection,
    parent_id: &str,
    section: ContextSection,
) -> Result<Vec<Status>> {
    let sql = format!(
        r#"{} JOIN statusContextJoin c ON c.statusId = s.id
           WHERE c.parentId = ? AND c.section = ?
           ORDER BY c."index""#,
        *STATUS_SELECT
    );
    let rows = sqlx::query(&sql)
        .bind(parent_id)
        .bind(section.as_str())
        .fetch_all(&mut *conn)
        .await?;

    reconstruct_all(&rows)
}

impl Query for ContextQuery {
    type Output = ThreadContext;
    const NAME: &'static str = "context";

    fn dependencies(&self) -> TableSet {
        status_tables()
            .with(Table::StatusContextJoin)
            .with(Table::Filter)
    }

    fn fetch<'a>(&'a self, ctx: &'a ReadContext) -> BoxFuture<'a, Result<Self::Output>> {
        Box::pin(async move {
            let mut tx = begin(ctx).await?;

            let filters = load_filters(&mut tx).await?;
            let sql = format!("{} WHERE s.id = ?", *STATUS_SELECT);
            let parent = sqlx::query(&sql)
                .bind(&self.parent_id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or(StoreError::NotFound)?;
            let ancestors =
                load_context_section(&mut tx, &self.parent_id, ContextSection::Ancestors).await?;
            let descendants =
                load_context_section(&mut tx, &self.parent_id, ContextSection::Descendants)
                    .await?;
            tx.commit().await?;

            let matcher = filter::compile(&filters, Utc::now(), Some(FilterContext::Thread))?;

            Ok(ThreadContext {
                ancestors: filter::apply(matcher.as_ref(), ancestors, &ctx.cache),
                parent: reconstruct(&parent)?,
                descendants: filter::apply(matcher.as_ref(), descendants, &ctx.cache),
            })
        })
    }
}

// =============================================================================
// Lists
// =============================================================================

/// The user's lists ordered by title
pub struct ListsQuery;

impl Query for ListsQuery {
    type Output = Vec<List>;
    const NAME: &'static str = "lists";

    fn dependencies(&self) -> TableSet {
        TableSet::of(&[Table::Timeline])
    }

    fn fetch<'a>(&'a self, ctx: &'a ReadContext) -> BoxFuture<'a, Result<Self::Output>> {
        Box::pin(async move {
            let sql = format!(
                "SELECT {} FROM timeline t WHERE t.kind = ? \
                 ORDER BY t.listTitle COLLATE NOCASE, t.id",
                select_list(Table::Timeline, "t", "")
            );
            let rows = sqlx::query(&sql)
                .bind(TimelineKind::List.as_str())
                .fetch_all(&ctx.pool)
                .await?;

            rows.iter()
                .map(|row| match decode_timeline(row, "")? {
                    Timeline::List(list) => Ok(list),
                    other => Err(StoreError::malformed(
                        "kind",
                        format!("expected a list timeline, got {}", other.id()),
                    )),
                })
                .collect()
        })
    }
}

// =============================================================================
// Filters
// =============================================================================

/// Filters in effect now for one context
pub struct ActiveFiltersQuery {
    pub context: FilterContext,
}

impl Query for ActiveFiltersQuery {
    type Output = Vec<Filter>;
    const NAME: &'static str = "active_filters";

    fn dependencies(&self) -> TableSet {
        TableSet::of(&[Table::Filter])
    }

    fn fetch<'a>(&'a self, ctx: &'a ReadContext) -> BoxFuture<'a, Result<Self::Output>> {
        Box::pin(async move {
            let mut conn = ctx.pool.acquire().await?;
            let now = Utc::now();

            Ok(load_filters(&mut conn)
                .await?
                .into_iter()
                .filter(|filter| filter.is_active(now) && filter.applies_to(self.context))
                .collect())
        })
    }
}

/// Filters whose expiry has passed, in any context
pub struct ExpiredFiltersQuery;

impl Query for ExpiredFiltersQuery {
    type Output = Vec<Filter>;
    const NAME: &'static str = "expired_filters";

    fn dependencies(&self) -> TableSet {
        TableSet::of(&[Table::Filter])
    }

    fn fetch<'a>(&'a self, ctx: &'a ReadContext) -> BoxFuture<'a, Result<Self::Output>> {
        Box::pin(async move {
            let mut conn = ctx.pool.acquire().await?;
            let now = Utc::now();

            Ok(load_filters(&mut conn)
                .await?
                .into_iter()
                .filter(|filter| !filter.is_active(now))
                .collect())
        })
    }
}

// =============================================================================
// Accounts
// =============================================================================

/// One stored account by id
pub struct AccountQuery {
    pub id: String,
}

impl Query for AccountQuery {
    type Output = Account;
    const NAME: &'static str = "account";

    fn dependencies(&self) -> TableSet {
        TableSet::of(&[Table::Account])
    }

    fn fetch<'a>(&'a self, ctx: &'a ReadContext) -> BoxFuture<'a, Result<Self::Output>> {
        Box::pin(async move {
            let sql = format!(
                "SELECT {} FROM account a WHERE a.id = ?",
                select_list(Table::Account, "a", "")
            );
            let row = sqlx::query(&sql)
                .bind(&self.id)
                .fetch_optional(&ctx.pool)
                .await?
                .ok_or(StoreError::NotFound)?;

            decode_account(&row, "")
        })
    }
}

// =============================================================================
// Transient collections
// =============================================================================

/// A process-lifetime collection in stored order, unfiltered
pub struct TransientQuery {
    pub collection_id: String,
}

impl Query for TransientQuery {
    type Output = Vec<StatusSection>;
    const NAME: &'static str = "transient";

    fn dependencies(&self) -> TableSet {
        status_tables().with(Table::TransientStatusCollection)
    }

    fn fetch<'a>(&'a self, ctx: &'a ReadContext) -> BoxFuture<'a, Result<Self::Output>> {
        Box::pin(async move {
            let sql = format!(
                r#"{} JOIN transientStatusCollection t ON t.statusId = s.id
                   WHERE t.collectionId = ?
                   ORDER BY t."index""#,
                *STATUS_SELECT
            );
            let rows = sqlx::query(&sql)
                .bind(&self.collection_id)
                .fetch_all(&ctx.pool)
                .await?;

            Ok(vec![StatusSection {
                id: self.collection_id.clone(),
                statuses: reconstruct_all(&rows)?,
            }])
        })
    }
}

// =============================================================================
// Database entry points
// =============================================================================

impl Database {
    fn observe<Q: Query>(&self, query: Q) -> Observation<Q::Output> {
        Observation::spawn(query, self.read_context(), self.commits())
    }

    /// Live statuses of `timeline` as a single section, newest first.
    pub fn timeline_observation(&self, timeline: &Timeline) -> Observation<Vec<StatusSection>> {
        self.observe(TimelineQuery {
            timeline: timeline.clone(),
        })
    }

    /// Live thread context of a stored status. Fails with `NotFound` if the
    /// parent is not stored.
    pub fn context_observation(&self, parent_id: &str) -> Observation<ThreadContext> {
        self.observe(ContextQuery {
            parent_id: parent_id.to_string(),
        })
    }

    pub fn lists_observation(&self) -> Observation<Vec<List>> {
        self.observe(ListsQuery)
    }

    pub fn active_filters_observation(&self, context: FilterContext) -> Observation<Vec<Filter>> {
        self.observe(ActiveFiltersQuery { context })
    }

    pub fn expired_filters_observation(&self) -> Observation<Vec<Filter>> {
        self.observe(ExpiredFiltersQuery)
    }

    /// Live single account. Fails with `NotFound` if it is not stored, or
    /// once `prune_orphans` removes it for having no statuses left.
    pub fn account_observation(&self, id: &str) -> Observation<Account> {
        self.observe(AccountQuery { id: id.to_string() })
    }

    pub fn transient_observation(&self, collection_id: &str) -> Observation<Vec<StatusSection>> {
        self.observe(TransientQuery {
            collection_id: collection_id.to_string(),
        })
    }
}
