//! Table registry and explicit column mappings
//!
//! Every persisted entity has a hand-written column list here. The lists
//! drive upsert statements and prefixed SELECT lists, and are checked
//! against the migrated schema when a store is opened.

use sqlx::SqliteConnection;

use crate::error::{Result, StoreError};

// =============================================================================
// Tables
// =============================================================================

/// Every table the store owns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Account,
    StoredStatus,
    Timeline,
    TimelineStatusJoin,
    StatusContextJoin,
    Filter,
    TransientStatusCollection,
}

const TABLE_COUNT: usize = 7;

impl Table {
    pub const ALL: [Table; TABLE_COUNT] = [
        Table::Account,
        Table::StoredStatus,
        Table::Timeline,
        Table::TimelineStatusJoin,
        Table::StatusContextJoin,
        Table::Filter,
        Table::TransientStatusCollection,
    ];

    /// SQL table name
    pub fn name(&self) -> &'static str {
        match self {
            Table::Account => "account",
            Table::StoredStatus => "storedStatus",
            Table::Timeline => "timeline",
            Table::TimelineStatusJoin => "timelineStatusJoin",
            Table::StatusContextJoin => "statusContextJoin",
            Table::Filter => "filter",
            Table::TransientStatusCollection => "transientStatusCollection",
        }
    }

    fn bit(&self) -> u8 {
        match self {
            Table::Account => 0,
            Table::StoredStatus => 1,
            Table::Timeline => 2,
            Table::TimelineStatusJoin => 3,
            Table::StatusContextJoin => 4,
            Table::Filter => 5,
            Table::TransientStatusCollection => 6,
        }
    }

    /// Column mapping for this table
    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            Table::Account => ACCOUNT_COLUMNS,
            Table::StoredStatus => STORED_STATUS_COLUMNS,
            Table::Timeline => TIMELINE_COLUMNS,
            Table::TimelineStatusJoin => TIMELINE_STATUS_JOIN_COLUMNS,
            Table::StatusContextJoin => STATUS_CONTEXT_JOIN_COLUMNS,
            Table::Filter => FILTER_COLUMNS,
            Table::TransientStatusCollection => TRANSIENT_COLLECTION_COLUMNS,
        }
    }
}

/// A set of tables, used both for "tables a write touched" and
/// "tables a query reads".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct TableSet(u8);

impl TableSet {
    pub const EMPTY: TableSet = TableSet(0);

    pub fn of(tables: &[Table]) -> Self {
        tables
            .iter()
            .fold(Self::EMPTY, |set, table| set.with(*table))
    }

    pub fn with(self, table: Table) -> Self {
        TableSet(self.0 | (1 << table.bit()))
    }

    pub fn contains(&self, table: Table) -> bool {
        self.0 & (1 << table.bit()) != 0
    }

    pub fn intersects(&self, other: TableSet) -> bool {
        self.0 & other.0 != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = Table> {
        Table::ALL.into_iter().filter(move |table| self.contains(*table))
    }
}

/// Per-table commit counters published by the writer after every commit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Generations([u64; TABLE_COUNT]);

impl Generations {
    /// Advance the counter of every touched table.
    pub fn bump(&mut self, touched: TableSet) {
        for table in touched.iter() {
            self.0[table.bit() as usize] += 1;
        }
    }

    /// Combined counter over a dependency set.
    ///
    /// Counters only grow, so the sum changes whenever any table in the set
    /// was written.
    pub fn fingerprint(&self, dependencies: TableSet) -> u64 {
        dependencies
            .iter()
            .map(|table| self.0[table.bit() as usize])
            .sum()
    }
}

// =============================================================================
// Column mappings
// =============================================================================

pub const ACCOUNT_COLUMNS: &[&str] = &[
    "id",
    "username",
    "acct",
    "displayName",
    "note",
    "url",
    "avatar",
    "avatarStatic",
    "header",
    "headerStatic",
    "locked",
    "bot",
    "createdAt",
    "followersCount",
    "followingCount",
    "statusesCount",
    "emojis",
    "fields",
];

pub const STORED_STATUS_COLUMNS: &[&str] = &[
    "id",
    "uri",
    "url",
    "createdAt",
    "accountId",
    "content",
    "spoilerText",
    "visibility",
    "sensitive",
    "language",
    "inReplyToId",
    "inReplyToAccountId",
    "reblogId",
    "mediaAttachments",
    "mentions",
    "tags",
    "emojis",
    "repliesCount",
    "reblogsCount",
    "favouritesCount",
    "favourited",
    "reblogged",
    "bookmarked",
    "pinned",
];

pub const TIMELINE_COLUMNS: &[&str] = &["id", "kind", "listId", "listTitle", "tag"];

pub const TIMELINE_STATUS_JOIN_COLUMNS: &[&str] = &["timelineId", "statusId"];

pub const STATUS_CONTEXT_JOIN_COLUMNS: &[&str] = &["parentId", "statusId", "section", "index"];

pub const FILTER_COLUMNS: &[&str] = &[
    "id",
    "phrase",
    "context",
    "expiresAt",
    "irreversible",
    "wholeWord",
];

pub const TRANSIENT_COLLECTION_COLUMNS: &[&str] = &["collectionId", "statusId", "index"];

/// Quote an identifier for SQLite (`filter` and `index` are keywords).
pub fn quoted(identifier: &str) -> String {
    format!("\"{}\"", identifier)
}

/// `INSERT .. ON CONFLICT(id) DO UPDATE` over every mapped column.
///
/// Updating in place keeps the row (and its join rows) alive, unlike
/// `INSERT OR REPLACE` which deletes and re-inserts.
pub fn upsert_sql(table: Table) -> String {
    let columns = table.columns();
    let column_list = columns
        .iter()
        .map(|column| quoted(column))
        .collect::<Vec<_>>()
        .join(", ");
    let placeholders = columns.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
    let assignments = columns
        .iter()
        .filter(|column| **column != "id")
        .map(|column| format!("{col} = excluded.{col}", col = quoted(column)))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT(\"id\") DO UPDATE SET {}",
        quoted(table.name()),
        column_list,
        placeholders,
        assignments
    )
}

/// `alias.col AS prefix_col, ...` for a mapped table.
pub fn select_list(table: Table, alias: &str, prefix: &str) -> String {
    table
        .columns()
        .iter()
        .map(|column| format!("{}.{} AS {}", alias, quoted(column), prefixed(prefix, column)))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Result column name for a prefixed mapped column.
pub fn prefixed(prefix: &str, column: &str) -> String {
    format!("{}{}", prefix, column)
}

// =============================================================================
// Validation
// =============================================================================

/// Check every mapped column exists in the migrated schema.
pub async fn validate(conn: &mut SqliteConnection) -> Result<()> {
    for table in Table::ALL {
        let existing: Vec<String> = sqlx::query_scalar(&format!(
            "SELECT name FROM pragma_table_info('{}')",
            table.name()
        ))
        .fetch_all(&mut *conn)
        .await?;

        if existing.is_empty() {
            return Err(StoreError::SchemaMismatch(format!(
                "table {} is missing",
                table.name()
            )));
        }

        for column in table.columns() {
            if !existing.iter().any(|name| name == column) {
                return Err(StoreError::SchemaMismatch(format!(
                    "column {}.{} is missing",
                    table.name(),
                    column
                )));
            }
        }
    }

    tracing::debug!(tables = Table::ALL.len(), "Schema mapping validated");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_set_membership() {
        let set = TableSet::of(&[Table::StoredStatus, Table::Filter]);
        assert!(set.contains(Table::StoredStatus));
        assert!(set.contains(Table::Filter));
        assert!(!set.contains(Table::Timeline));
        assert!(set.intersects(TableSet::of(&[Table::Filter])));
        assert!(!set.intersects(TableSet::of(&[Table::Account])));
        assert_eq!(set.iter().count(), 2);
    }

    #[test]
    fn fingerprint_ignores_unrelated_tables() {
        let mut generations = Generations::default();
        let deps = TableSet::of(&[Table::TimelineStatusJoin]);
        let before = generations.fingerprint(deps);

        generations.bump(TableSet::of(&[Table::Filter]));
        assert_eq!(generations.fingerprint(deps), before);

        generations.bump(TableSet::of(&[Table::TimelineStatusJoin, Table::Filter]));
        assert_ne!(generations.fingerprint(deps), before);
    }

    #[test]
    fn upsert_updates_every_non_key_column() {
        let sql = upsert_sql(Table::Filter);
        assert!(sql.starts_with("INSERT INTO \"filter\""));
        assert!(sql.contains("ON CONFLICT(\"id\") DO UPDATE SET"));
        assert!(sql.contains("\"wholeWord\" = excluded.\"wholeWord\""));
        assert!(!sql.contains("\"id\" = excluded"));
        assert_eq!(sql.matches('?').count(), FILTER_COLUMNS.len());
    }
}
