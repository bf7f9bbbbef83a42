//! SQLite database operations
//!
//! All database access goes through this module. A store owns one writer
//! connection, driven by the write serializer, and a small pool of reader
//! connections used by observations. WAL mode lets readers see the last
//! committed state while a write is in progress.

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{Connection, SqliteConnection, SqlitePool};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;

use super::cache::ContentCache;
use super::ingest::{self, PruneReport};
use super::models::*;
use super::schema::{self, Generations};
use super::writer::{Applied, CommitGate, Mutation, Suspension, WriteSerializer};
use crate::config::StoreConfig;
use crate::error::{Result, StoreError};

/// Everything a read query needs: a reader pool and the shared decode cache
#[derive(Clone)]
pub struct ReadContext {
    pub pool: SqlitePool,
    pub cache: ContentCache,
    pub(crate) gate: CommitGate,
}

/// Per-identity content store.
///
/// Mutations are queued on the write serializer and applied in order;
/// observations re-run against the reader pool when their tables change.
pub struct Database {
    path: PathBuf,
    reader: ReadContext,
    writer: WriteSerializer,
    commits: watch::Receiver<Generations>,
    suspension: Arc<Suspension>,
}

fn quote_pragma_value(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Identities become file names, so only a conservative character set is allowed.
fn validate_identity(identity: &str) -> Result<()> {
    let valid = !identity.is_empty()
        && !identity.starts_with('.')
        && identity
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@'));

    if valid {
        Ok(())
    } else {
        Err(StoreError::Config(format!(
            "identity {identity:?} cannot be used as a database name"
        )))
    }
}

impl Database {
    // =========================================================================
    // Connection management
    // =========================================================================

    /// Open the store for one account identity under `storage.data_dir`.
    pub async fn open_identity(
        identity: &str,
        passphrase: &str,
        config: &StoreConfig,
    ) -> Result<Self> {
        validate_identity(identity)?;
        let path = config.storage.data_dir.join(format!("{identity}.sqlite"));
        Self::open(&path, passphrase, config).await
    }

    /// Open (creating and migrating if needed) the store at `path`.
    ///
    /// The passphrase is applied as the SQLCipher key when non-empty; plain
    /// SQLite builds ignore it.
    pub async fn open(path: &Path, passphrase: &str, config: &StoreConfig) -> Result<Self> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Database(sqlx::Error::Io(e)))?;
        }

        let mut options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(config.storage.busy_timeout());
        if !passphrase.is_empty() {
            options = options.pragma("key", quote_pragma_value(passphrase));
        }

        let mut writer_conn = SqliteConnection::connect_with(&options).await?;

        sqlx::migrate!("./migrations")
            .run(&mut writer_conn)
            .await
            .map_err(|e| {
                tracing::error!("Migration failed: {}", e);
                StoreError::from(e)
            })?;
        schema::validate(&mut writer_conn).await?;

        let cleared = ingest::clear_transient(&mut writer_conn).await?;
        if cleared > 0 {
            tracing::debug!(rows = cleared, "Cleared transient collections");
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(config.storage.read_connections)
            .connect_with(options)
            .await?;

        let (commits_tx, commits) = watch::channel(Generations::default());
        let gate = CommitGate::new();
        let suspension = Arc::new(Suspension::new());
        let writer = WriteSerializer::spawn(
            writer_conn,
            commits_tx,
            gate.clone(),
            suspension.clone(),
            config.writer.resume_timeout(),
        );

        let db = Self {
            path: path.to_path_buf(),
            reader: ReadContext {
                pool,
                cache: ContentCache::new(config.cache.decode_max_items),
                gate,
            },
            writer,
            commits,
            suspension,
        };

        tracing::info!(path = %path.display(), "Database opened and migrated successfully");

        if config.maintenance.prune_on_open {
            let report = db.prune_orphans().await?;
            tracing::info!(
                statuses = report.statuses,
                accounts = report.accounts,
                "Pruned orphaned rows"
            );
        }

        Ok(db)
    }

    /// Location of the database file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Host is about to lose file access; writes fail as transient until resumed.
    pub fn suspend(&self) {
        self.suspension.suspend();
    }

    /// File access is back; interrupted writes retry.
    pub fn resume(&self) {
        self.suspension.resume();
    }

    pub(crate) fn read_context(&self) -> ReadContext {
        self.reader.clone()
    }

    pub(crate) fn commits(&self) -> watch::Receiver<Generations> {
        self.commits.clone()
    }

    async fn submit(&self, mutation: Mutation) -> Result<Applied> {
        self.writer.submit(mutation).await
    }

    async fn submit_delete(&self, mutation: Mutation) -> Result<bool> {
        match self.submit(mutation).await? {
            Applied::Removed(removed) => Ok(removed),
            _ => Ok(false),
        }
    }

    // =========================================================================
    // Statuses
    // =========================================================================

    /// Store a status with its author and reblog target, outside any view.
    pub async fn insert_status(&self, status: &Status) -> Result<()> {
        self.submit(Mutation::InsertStatus(status.clone())).await?;
        Ok(())
    }

    /// Store a fetched page of statuses and add them to `timeline`.
    pub async fn insert_statuses(&self, statuses: &[Status], timeline: &Timeline) -> Result<()> {
        self.submit(Mutation::InsertStatuses {
            timeline: timeline.clone(),
            statuses: statuses.to_vec(),
        })
        .await?;
        Ok(())
    }

    /// Replace the stored thread context of an already stored status.
    pub async fn insert_context(&self, context: &Context, parent_id: &str) -> Result<()> {
        self.submit(Mutation::InsertContext {
            parent_id: parent_id.to_string(),
            context: context.clone(),
        })
        .await?;
        Ok(())
    }

    /// Replace a process-lifetime collection (search results and the like).
    pub async fn insert_transient_statuses(
        &self,
        collection_id: &str,
        statuses: &[Status],
    ) -> Result<()> {
        self.submit(Mutation::InsertTransient {
            collection_id: collection_id.to_string(),
            statuses: statuses.to_vec(),
        })
        .await?;
        Ok(())
    }

    /// Returns whether the status existed.
    pub async fn delete_status(&self, id: &str) -> Result<bool> {
        self.submit_delete(Mutation::DeleteStatus(id.to_string()))
            .await
    }

    // =========================================================================
    // Lists
    // =========================================================================

    /// Replace the set of lists; list timelines missing from `lists` are
    /// removed together with their membership.
    pub async fn set_lists(&self, lists: &[List]) -> Result<()> {
        self.submit(Mutation::SetLists(lists.to_vec())).await?;
        Ok(())
    }

    pub async fn create_list(&self, list: &List) -> Result<()> {
        self.submit(Mutation::CreateList(list.clone())).await?;
        Ok(())
    }

    pub async fn delete_list(&self, list_id: &str) -> Result<bool> {
        self.submit_delete(Mutation::DeleteList(list_id.to_string()))
            .await
    }

    // =========================================================================
    // Filters
    // =========================================================================

    /// Replace the filter set with the server's.
    pub async fn set_filters(&self, filters: &[Filter]) -> Result<()> {
        self.submit(Mutation::SetFilters(filters.to_vec())).await?;
        Ok(())
    }

    pub async fn create_filter(&self, filter: &Filter) -> Result<()> {
        self.submit(Mutation::CreateFilter(filter.clone())).await?;
        Ok(())
    }

    pub async fn delete_filter(&self, id: &str) -> Result<bool> {
        self.submit_delete(Mutation::DeleteFilter(id.to_string()))
            .await
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Remove statuses no view references and accounts no status references.
    pub async fn prune_orphans(&self) -> Result<PruneReport> {
        match self.submit(Mutation::PruneOrphans).await? {
            Applied::Pruned(report) => Ok(report),
            _ => Ok(PruneReport::default()),
        }
    }

    /// Row counts of the durable tables, read from the last commit.
    pub async fn stats(&self) -> Result<StoreStats> {
        let row: (i64, i64, i64, i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                (SELECT COUNT(*) FROM account),
                (SELECT COUNT(*) FROM storedStatus),
                (SELECT COUNT(*) FROM timeline),
                (SELECT COUNT(*) FROM timelineStatusJoin),
                (SELECT COUNT(*) FROM statusContextJoin),
                (SELECT COUNT(*) FROM "filter")
            "#,
        )
        .fetch_one(&self.reader.pool)
        .await?;

        Ok(StoreStats {
            accounts: row.0,
            statuses: row.1,
            timelines: row.2,
            timeline_statuses: row.3,
            context_statuses: row.4,
            filters: row.5,
        })
    }
}
