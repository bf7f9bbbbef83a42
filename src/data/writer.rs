//! Write serializer
//!
//! A single task owns the writer connection and applies mutations one at a
//! time, each in its own transaction. After a commit the task advances the
//! generation counters of every touched table before it answers the
//! caller, so any observer that wakes up afterwards sees the new rows.
//!
//! Commit and publish happen together under the commit gate, so a reader
//! holding the gate sees neither half of a commit.
//!
//! A write that fails with a transient error waits for a resume signal and
//! is retried exactly once.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use sqlx::{Connection, SqliteConnection};
use tokio::sync::{RwLock, RwLockReadGuard, mpsc, oneshot, watch};

use super::ingest::{self, PruneReport};
use super::models::*;
use super::schema::{Generations, Table, TableSet};
use crate::error::{Result, StoreError};
use crate::metrics::{WRITE_DURATION_SECONDS, WRITE_RETRIES_TOTAL, WRITES_TOTAL};

// =============================================================================
// Mutations
// =============================================================================

/// A unit of work for the writer, applied in one transaction
#[derive(Debug, Clone)]
pub enum Mutation {
    InsertStatus(Status),
    InsertStatuses {
        timeline: Timeline,
        statuses: Vec<Status>,
    },
    InsertContext {
        parent_id: String,
        context: Context,
    },
    InsertTransient {
        collection_id: String,
        statuses: Vec<Status>,
    },
    DeleteStatus(String),
    SetLists(Vec<List>),
    CreateList(List),
    DeleteList(String),
    SetFilters(Vec<Filter>),
    CreateFilter(Filter),
    DeleteFilter(String),
    PruneOrphans,
}

/// What a committed mutation reports back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Done,
    /// Whether a delete found its row
    Removed(bool),
    Pruned(PruneReport),
}

impl Mutation {
    /// Operation label for logs and metrics
    pub fn name(&self) -> &'static str {
        match self {
            Mutation::InsertStatus(_) => "insert_status",
            Mutation::InsertStatuses { .. } => "insert_statuses",
            Mutation::InsertContext { .. } => "insert_context",
            Mutation::InsertTransient { .. } => "insert_transient_statuses",
            Mutation::DeleteStatus(_) => "delete_status",
            Mutation::SetLists(_) => "set_lists",
            Mutation::CreateList(_) => "create_list",
            Mutation::DeleteList(_) => "delete_list",
            Mutation::SetFilters(_) => "set_filters",
            Mutation::CreateFilter(_) => "create_filter",
            Mutation::DeleteFilter(_) => "delete_filter",
            Mutation::PruneOrphans => "prune_orphans",
        }
    }

    /// Tables whose contents may change when this mutation commits,
    /// including rows removed by cascades.
    pub fn touched(&self) -> TableSet {
        let statuses = [Table::Account, Table::StoredStatus];
        match self {
            Mutation::InsertStatus(_) => TableSet::of(&statuses),
            Mutation::InsertStatuses { .. } => TableSet::of(&statuses)
                .with(Table::Timeline)
                .with(Table::TimelineStatusJoin),
            Mutation::InsertContext { .. } => {
                TableSet::of(&statuses).with(Table::StatusContextJoin)
            }
            Mutation::InsertTransient { .. } => {
                TableSet::of(&statuses).with(Table::TransientStatusCollection)
            }
            Mutation::DeleteStatus(_) => TableSet::of(&[
                Table::StoredStatus,
                Table::TimelineStatusJoin,
                Table::StatusContextJoin,
                Table::TransientStatusCollection,
            ]),
            Mutation::SetLists(_) | Mutation::DeleteList(_) => {
                TableSet::of(&[Table::Timeline, Table::TimelineStatusJoin])
            }
            Mutation::CreateList(_) => TableSet::of(&[Table::Timeline]),
            Mutation::SetFilters(_) | Mutation::CreateFilter(_) | Mutation::DeleteFilter(_) => {
                TableSet::of(&[Table::Filter])
            }
            Mutation::PruneOrphans => TableSet::of(&statuses),
        }
    }

    /// Run the mutation's statements inside the caller's transaction.
    async fn apply(&self, tx: &mut SqliteConnection) -> Result<Applied> {
        let applied = match self {
            Mutation::InsertStatus(status) => {
                ingest::upsert_status(&mut *tx, status).await?;
                Applied::Done
            }
            Mutation::InsertStatuses { timeline, statuses } => {
                ingest::insert_timeline_statuses(&mut *tx, timeline, statuses).await?;
                Applied::Done
            }
            Mutation::InsertContext { parent_id, context } => {
                ingest::replace_context(&mut *tx, parent_id, context).await?;
                Applied::Done
            }
            Mutation::InsertTransient {
                collection_id,
                statuses,
            } => {
                ingest::replace_transient(&mut *tx, collection_id, statuses).await?;
                Applied::Done
            }
            Mutation::DeleteStatus(id) => Applied::Removed(ingest::delete_status(&mut *tx, id).await?),
            Mutation::SetLists(lists) => {
                ingest::set_lists(&mut *tx, lists).await?;
                Applied::Done
            }
            Mutation::CreateList(list) => {
                ingest::upsert_timeline(&mut *tx, &Timeline::List(list.clone())).await?;
                Applied::Done
            }
            Mutation::DeleteList(id) => Applied::Removed(ingest::delete_list(&mut *tx, id).await?),
            Mutation::SetFilters(filters) => {
                ingest::set_filters(&mut *tx, filters).await?;
                Applied::Done
            }
            Mutation::CreateFilter(filter) => {
                ingest::upsert_filter(&mut *tx, filter).await?;
                Applied::Done
            }
            Mutation::DeleteFilter(id) => {
                Applied::Removed(ingest::delete_filter(&mut *tx, id).await?)
            }
            Mutation::PruneOrphans => Applied::Pruned(ingest::prune_orphans(&mut *tx).await?),
        };

        Ok(applied)
    }
}

// =============================================================================
// Suspension
// =============================================================================

/// Host-driven suspend/resume state
///
/// While suspended every write attempt fails as transient. `resume` bumps
/// an epoch that interrupted writes wait on.
#[derive(Debug)]
pub struct Suspension {
    suspended: AtomicBool,
    resumed: watch::Sender<u64>,
}

impl Suspension {
    pub fn new() -> Self {
        let (resumed, _) = watch::channel(0);
        Self {
            suspended: AtomicBool::new(false),
            resumed,
        }
    }

    pub fn suspend(&self) {
        self.suspended.store(true, Ordering::SeqCst);
        tracing::info!("Database access suspended");
    }

    pub fn resume(&self) {
        self.suspended.store(false, Ordering::SeqCst);
        self.resumed.send_modify(|epoch| *epoch += 1);
        tracing::info!("Database access resumed");
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::SeqCst)
    }

    /// Receiver that changes on the next resume signal
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.resumed.subscribe()
    }
}

impl Default for Suspension {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Commit gate
// =============================================================================

/// Orders commits against pinned reads
///
/// The writer takes the gate exclusively from commit until the new
/// generations are published. While a reader holds it, no commit lands.
#[derive(Clone, Default)]
pub struct CommitGate {
    lock: Arc<RwLock<()>>,
}

impl CommitGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold back commits until the guard is dropped.
    pub async fn hold_commits(&self) -> RwLockReadGuard<'_, ()> {
        self.lock.read().await
    }
}

// =============================================================================
// Serializer
// =============================================================================

struct WriteRequest {
    mutation: Mutation,
    reply: oneshot::Sender<Result<Applied>>,
}

/// Handle to the writer task
///
/// Dropping the last handle closes the queue; the task finishes pending
/// writes and releases the connection.
#[derive(Clone)]
pub struct WriteSerializer {
    requests: mpsc::UnboundedSender<WriteRequest>,
}

impl WriteSerializer {
    /// Start the writer task on `conn`.
    ///
    /// Generations are published on `commits` after every successful
    /// transaction.
    pub fn spawn(
        conn: SqliteConnection,
        commits: watch::Sender<Generations>,
        gate: CommitGate,
        suspension: Arc<Suspension>,
        resume_timeout: Duration,
    ) -> Self {
        let (requests, receiver) = mpsc::unbounded_channel();
        let writer = Writer {
            conn,
            commits,
            gate,
            suspension,
            resume_timeout,
        };
        tokio::spawn(writer.run(receiver));

        Self { requests }
    }

    /// Queue a mutation and wait for its outcome.
    ///
    /// Writes are applied in submission order.
    pub async fn submit(&self, mutation: Mutation) -> Result<Applied> {
        let (reply, outcome) = oneshot::channel();
        self.requests
            .send(WriteRequest { mutation, reply })
            .map_err(|_| StoreError::Closed)?;

        outcome.await.map_err(|_| StoreError::Closed)?
    }
}

/// State owned by the writer task
struct Writer {
    conn: SqliteConnection,
    commits: watch::Sender<Generations>,
    gate: CommitGate,
    suspension: Arc<Suspension>,
    resume_timeout: Duration,
}

impl Writer {
    async fn run(mut self, mut requests: mpsc::UnboundedReceiver<WriteRequest>) {
        while let Some(WriteRequest { mutation, reply }) = requests.recv().await {
            let operation = mutation.name();
            let started = Instant::now();

            let result = self.execute(&mutation).await;
            WRITE_DURATION_SECONDS
                .with_label_values(&[operation])
                .observe(started.elapsed().as_secs_f64());

            match &result {
                Ok(_) => {
                    WRITES_TOTAL.with_label_values(&[operation, "committed"]).inc();
                    tracing::debug!(operation, "Write committed");
                }
                Err(error) => {
                    WRITES_TOTAL.with_label_values(&[operation, error.kind()]).inc();
                    tracing::warn!(operation, error = %error, "Write failed");
                }
            }

            // The caller may have stopped waiting; the write stands either way.
            let _ = reply.send(result);
        }

        if let Err(error) = self.conn.close().await {
            tracing::warn!(%error, "Failed to close writer connection");
        }
        tracing::debug!("Write serializer stopped");
    }

    /// Apply a mutation, retrying once after a resume signal on transient failure.
    async fn execute(&mut self, mutation: &Mutation) -> Result<Applied> {
        // Subscribe first so a resume that lands during the attempt is not missed.
        let mut resumed = self.suspension.subscribe();

        match self.attempt(mutation).await {
            Err(error) if error.is_transient() => {
                tracing::info!(
                    operation = mutation.name(),
                    error = %error,
                    "Write interrupted; waiting for resume"
                );

                match tokio::time::timeout(self.resume_timeout, resumed.changed()).await {
                    Ok(Ok(())) => {
                        WRITE_RETRIES_TOTAL.inc();
                        self.attempt(mutation).await
                    }
                    _ => {
                        tracing::warn!(
                            operation = mutation.name(),
                            timeout_ms = self.resume_timeout.as_millis() as u64,
                            "No resume signal; giving up"
                        );
                        Err(error)
                    }
                }
            }
            result => result,
        }
    }

    async fn attempt(&mut self, mutation: &Mutation) -> Result<Applied> {
        if self.suspension.is_suspended() {
            return Err(StoreError::TransientIo(
                "database access is suspended".to_string(),
            ));
        }

        let mut tx = self.conn.begin().await?;
        let applied = mutation.apply(&mut tx).await?;

        let _exclusive = self.gate.lock.write().await;
        tx.commit().await?;
        self.commits
            .send_modify(|generations| generations.bump(mutation.touched()));

        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::fixtures;

    async fn migrated_connection() -> SqliteConnection {
        let mut conn = SqliteConnection::connect("sqlite::memory:")
            .await
            .expect("in-memory database opens");
        sqlx::migrate!("./migrations")
            .run(&mut conn)
            .await
            .expect("migrations apply");
        conn
    }

    async fn spawn_writer(
        suspension: Arc<Suspension>,
        resume_timeout: Duration,
    ) -> (WriteSerializer, watch::Receiver<Generations>) {
        let (commits, generations) = watch::channel(Generations::default());
        let writer = WriteSerializer::spawn(
            migrated_connection().await,
            commits,
            CommitGate::new(),
            suspension,
            resume_timeout,
        );
        (writer, generations)
    }

    #[tokio::test]
    async fn commit_advances_touched_generations() {
        let (writer, generations) =
            spawn_writer(Arc::new(Suspension::new()), Duration::from_secs(1)).await;
        let filter_deps = TableSet::of(&[Table::Filter]);
        let status_deps = TableSet::of(&[Table::StoredStatus]);

        writer
            .submit(Mutation::CreateFilter(fixtures::filter(
                "f1",
                "cat",
                &[FilterContext::Home],
                false,
            )))
            .await
            .unwrap();

        let current = *generations.borrow();
        assert_eq!(current.fingerprint(filter_deps), 1);
        assert_eq!(current.fingerprint(status_deps), 0);
    }

    #[tokio::test]
    async fn suspended_write_retries_after_resume() {
        let suspension = Arc::new(Suspension::new());
        suspension.suspend();
        let (writer, _generations) =
            spawn_writer(suspension.clone(), Duration::from_secs(5)).await;

        let pending = tokio::spawn(async move {
            writer
                .submit(Mutation::InsertStatus(fixtures::status("1", "a1", 0, "<p>hi</p>")))
                .await
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        suspension.resume();

        let applied = pending.await.unwrap().unwrap();
        assert_eq!(applied, Applied::Done);
    }

    #[tokio::test]
    async fn suspended_write_fails_without_resume() {
        let suspension = Arc::new(Suspension::new());
        suspension.suspend();
        let (writer, generations) =
            spawn_writer(suspension, Duration::from_millis(50)).await;

        let error = writer
            .submit(Mutation::InsertStatus(fixtures::status("1", "a1", 0, "<p>hi</p>")))
            .await
            .unwrap_err();

        assert!(matches!(error, StoreError::TransientIo(_)));
        assert_eq!(*generations.borrow(), Generations::default());
    }

    #[tokio::test]
    async fn constraint_violation_is_not_retried() {
        let (writer, _generations) =
            spawn_writer(Arc::new(Suspension::new()), Duration::from_secs(30)).await;

        let started = Instant::now();
        let error = writer
            .submit(Mutation::InsertContext {
                parent_id: "missing".to_string(),
                context: Context::default(),
            })
            .await
            .unwrap_err();

        assert!(matches!(error, StoreError::ConstraintViolation(_)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn delete_reports_whether_row_existed() {
        let (writer, _generations) =
            spawn_writer(Arc::new(Suspension::new()), Duration::from_secs(1)).await;

        let list = List {
            id: "1".to_string(),
            title: "Friends".to_string(),
        };
        let first = writer.submit(Mutation::CreateList(list)).await;
        let second = writer.submit(Mutation::DeleteList("1".to_string())).await;
        let third = writer.submit(Mutation::DeleteList("1".to_string())).await;

        assert_eq!(first.unwrap(), Applied::Done);
        assert_eq!(second.unwrap(), Applied::Removed(true));
        assert_eq!(third.unwrap(), Applied::Removed(false));
    }

    #[tokio::test]
    async fn held_gate_delays_commit() {
        let gate = CommitGate::new();
        let (commits, generations) = watch::channel(Generations::default());
        let writer = WriteSerializer::spawn(
            migrated_connection().await,
            commits,
            gate.clone(),
            Arc::new(Suspension::new()),
            Duration::from_secs(1),
        );

        let held = gate.hold_commits().await;
        let pending = tokio::spawn(async move {
            writer
                .submit(Mutation::CreateFilter(fixtures::filter(
                    "f1",
                    "cat",
                    &[FilterContext::Home],
                    false,
                )))
                .await
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!pending.is_finished());
        assert_eq!(*generations.borrow(), Generations::default());

        drop(held);
        assert_eq!(pending.await.unwrap().unwrap(), Applied::Done);
        assert_eq!(
            generations.borrow().fingerprint(TableSet::of(&[Table::Filter])),
            1
        );
    }
}
