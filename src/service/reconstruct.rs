//! Status graph reconstruction
//!
//! Turns a joined row of {status, author, reblog target, reblog author}
//! back into a nested `Status`.

use lazy_static::lazy_static;
use sqlx::sqlite::SqliteRow;

use crate::data::records::StoredStatus;
use crate::data::schema::{Table, select_list};
use crate::data::{Account, Status, decode_account, decode_stored_status, has_joined_row};
use crate::error::Result;

const STATUS: &str = "status_";
const ACCOUNT: &str = "account_";
const REBLOG: &str = "reblog_";
const REBLOG_ACCOUNT: &str = "reblog_account_";

lazy_static! {
    /// Joined SELECT over a status, its author and its reblog target.
    ///
    /// Aliases: `s` status, `a` author, `r` reblog target, `ra` its author.
    /// Callers append their own JOIN/WHERE/ORDER BY clauses.
    pub static ref STATUS_SELECT: String = format!(
        "SELECT {}, {}, {}, {} \
         FROM storedStatus s \
         JOIN account a ON a.id = s.accountId \
         LEFT JOIN storedStatus r ON r.id = s.reblogId \
         LEFT JOIN account ra ON ra.id = r.accountId",
        select_list(Table::StoredStatus, "s", STATUS),
        select_list(Table::Account, "a", ACCOUNT),
        select_list(Table::StoredStatus, "r", REBLOG),
        select_list(Table::Account, "ra", REBLOG_ACCOUNT),
    );
}

/// Rebuild one status from a `STATUS_SELECT` row.
///
/// A `reblogId` that no longer resolves (or whose author is gone) yields a
/// status without a reblog instead of an error.
pub fn reconstruct(row: &SqliteRow) -> Result<Status> {
    let stored = decode_stored_status(row, STATUS)?;
    let account = decode_account(row, ACCOUNT)?;

    let reblog = if has_joined_row(row, REBLOG)? && has_joined_row(row, REBLOG_ACCOUNT)? {
        let original = decode_stored_status(row, REBLOG)?;
        let original_account = decode_account(row, REBLOG_ACCOUNT)?;
        Some(assemble(original, original_account, None))
    } else {
        if let Some(reblog_id) = &stored.reblog_id {
            tracing::debug!(
                status_id = %stored.id,
                reblog_id = %reblog_id,
                "Reblog target is not stored; dropping reference"
            );
        }
        None
    };

    Ok(assemble(stored, account, reblog))
}

pub fn reconstruct_all(rows: &[SqliteRow]) -> Result<Vec<Status>> {
    rows.iter().map(reconstruct).collect()
}

fn assemble(stored: StoredStatus, account: Account, reblog: Option<Status>) -> Status {
    Status {
        id: stored.id,
        uri: stored.uri,
        url: stored.url,
        created_at: stored.created_at,
        account,
        content: stored.content,
        spoiler_text: stored.spoiler_text,
        visibility: stored.visibility,
        sensitive: stored.sensitive,
        language: stored.language,
        in_reply_to_id: stored.in_reply_to_id,
        in_reply_to_account_id: stored.in_reply_to_account_id,
        reblog: reblog.map(Box::new),
        media_attachments: stored.media_attachments,
        mentions: stored.mentions,
        tags: stored.tags,
        emojis: stored.emojis,
        replies_count: stored.replies_count,
        reblogs_count: stored.reblogs_count,
        favourites_count: stored.favourites_count,
        favourited: stored.favourited,
        reblogged: stored.reblogged,
        bookmarked: stored.bookmarked,
        pinned: stored.pinned,
    }
}
