//! Row records and their column bindings
//!
//! Binding order follows the column lists in `schema`, and decoding reads
//! the same names (optionally prefixed when several tables are joined).

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{Row, Sqlite};

use super::models::*;
use super::schema::prefixed;
use crate::error::{Result, StoreError};

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

// =============================================================================
// Column helpers
// =============================================================================

fn column<'r, T>(row: &'r SqliteRow, prefix: &str, name: &str) -> Result<T>
where
    T: sqlx::Decode<'r, Sqlite> + sqlx::Type<Sqlite>,
{
    Ok(row.try_get::<T, _>(prefixed(prefix, name).as_str())?)
}

fn json_column<T: DeserializeOwned>(row: &SqliteRow, prefix: &str, name: &str) -> Result<T> {
    let raw: String = column(row, prefix, name)?;
    serde_json::from_str(&raw).map_err(|e| StoreError::malformed(name, e))
}

fn to_json<T: Serialize>(name: &str, value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| StoreError::malformed(name, e))
}

// =============================================================================
// Account
// =============================================================================

pub fn bind_account<'q>(query: SqliteQuery<'q>, account: &'q Account) -> Result<SqliteQuery<'q>> {
    Ok(query
        .bind(&account.id)
        .bind(&account.username)
        .bind(&account.acct)
        .bind(&account.display_name)
        .bind(&account.note)
        .bind(&account.url)
        .bind(&account.avatar)
        .bind(&account.avatar_static)
        .bind(&account.header)
        .bind(&account.header_static)
        .bind(account.locked)
        .bind(account.bot)
        .bind(account.created_at)
        .bind(account.followers_count)
        .bind(account.following_count)
        .bind(account.statuses_count)
        .bind(to_json("emojis", &account.emojis)?)
        .bind(to_json("fields", &account.fields)?))
}

pub fn decode_account(row: &SqliteRow, prefix: &str) -> Result<Account> {
    Ok(Account {
        id: column(row, prefix, "id")?,
        username: column(row, prefix, "username")?,
        acct: column(row, prefix, "acct")?,
        display_name: column(row, prefix, "displayName")?,
        note: column(row, prefix, "note")?,
        url: column(row, prefix, "url")?,
        avatar: column(row, prefix, "avatar")?,
        avatar_static: column(row, prefix, "avatarStatic")?,
        header: column(row, prefix, "header")?,
        header_static: column(row, prefix, "headerStatic")?,
        locked: column(row, prefix, "locked")?,
        bot: column(row, prefix, "bot")?,
        created_at: column(row, prefix, "createdAt")?,
        followers_count: column(row, prefix, "followersCount")?,
        following_count: column(row, prefix, "followingCount")?,
        statuses_count: column(row, prefix, "statusesCount")?,
        emojis: json_column(row, prefix, "emojis")?,
        fields: json_column(row, prefix, "fields")?,
    })
}

// =============================================================================
// StoredStatus
// =============================================================================

/// A status row: the author and reblog are referenced by id
#[derive(Debug, Clone, PartialEq)]
pub struct StoredStatus {
    pub id: String,
    pub uri: String,
    pub url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub account_id: String,
    pub content: String,
    pub spoiler_text: String,
    pub visibility: Visibility,
    pub sensitive: bool,
    pub language: Option<String>,
    pub in_reply_to_id: Option<String>,
    pub in_reply_to_account_id: Option<String>,
    /// Always points at an original, never at another reblog
    pub reblog_id: Option<String>,
    pub media_attachments: Vec<Attachment>,
    pub mentions: Vec<Mention>,
    pub tags: Vec<Tag>,
    pub emojis: Vec<Emoji>,
    pub replies_count: i64,
    pub reblogs_count: i64,
    pub favourites_count: i64,
    pub favourited: bool,
    pub reblogged: bool,
    pub bookmarked: bool,
    pub pinned: bool,
}

impl StoredStatus {
    /// Flatten a domain status into its row.
    ///
    /// The reblog reference skips intermediate reblogs and targets the
    /// innermost original.
    pub fn from_status(status: &Status) -> Self {
        Self {
            id: status.id.clone(),
            uri: status.uri.clone(),
            url: status.url.clone(),
            created_at: status.created_at,
            account_id: status.account.id.clone(),
            content: status.content.clone(),
            spoiler_text: status.spoiler_text.clone(),
            visibility: status.visibility,
            sensitive: status.sensitive,
            language: status.language.clone(),
            in_reply_to_id: status.in_reply_to_id.clone(),
            in_reply_to_account_id: status.in_reply_to_account_id.clone(),
            reblog_id: status.innermost_reblog().map(|original| original.id.clone()),
            media_attachments: status.media_attachments.clone(),
            mentions: status.mentions.clone(),
            tags: status.tags.clone(),
            emojis: status.emojis.clone(),
            replies_count: status.replies_count,
            reblogs_count: status.reblogs_count,
            favourites_count: status.favourites_count,
            favourited: status.favourited,
            reblogged: status.reblogged,
            bookmarked: status.bookmarked,
            pinned: status.pinned,
        }
    }
}

pub fn bind_stored_status<'q>(
    query: SqliteQuery<'q>,
    status: &'q StoredStatus,
) -> Result<SqliteQuery<'q>> {
    Ok(query
        .bind(&status.id)
        .bind(&status.uri)
        .bind(&status.url)
        .bind(status.created_at)
        .bind(&status.account_id)
        .bind(&status.content)
        .bind(&status.spoiler_text)
        .bind(status.visibility.as_str())
        .bind(status.sensitive)
        .bind(&status.language)
        .bind(&status.in_reply_to_id)
        .bind(&status.in_reply_to_account_id)
        .bind(&status.reblog_id)
        .bind(to_json("mediaAttachments", &status.media_attachments)?)
        .bind(to_json("mentions", &status.mentions)?)
        .bind(to_json("tags", &status.tags)?)
        .bind(to_json("emojis", &status.emojis)?)
        .bind(status.replies_count)
        .bind(status.reblogs_count)
        .bind(status.favourites_count)
        .bind(status.favourited)
        .bind(status.reblogged)
        .bind(status.bookmarked)
        .bind(status.pinned))
}

pub fn decode_stored_status(row: &SqliteRow, prefix: &str) -> Result<StoredStatus> {
    let visibility: String = column(row, prefix, "visibility")?;
    let visibility = Visibility::parse(&visibility)
        .ok_or_else(|| StoreError::malformed("visibility", format!("unknown value {visibility:?}")))?;

    Ok(StoredStatus {
        id: column(row, prefix, "id")?,
        uri: column(row, prefix, "uri")?,
        url: column(row, prefix, "url")?,
        created_at: column(row, prefix, "createdAt")?,
        account_id: column(row, prefix, "accountId")?,
        content: column(row, prefix, "content")?,
        spoiler_text: column(row, prefix, "spoilerText")?,
        visibility,
        sensitive: column(row, prefix, "sensitive")?,
        language: column(row, prefix, "language")?,
        in_reply_to_id: column(row, prefix, "inReplyToId")?,
        in_reply_to_account_id: column(row, prefix, "inReplyToAccountId")?,
        reblog_id: column(row, prefix, "reblogId")?,
        media_attachments: json_column(row, prefix, "mediaAttachments")?,
        mentions: json_column(row, prefix, "mentions")?,
        tags: json_column(row, prefix, "tags")?,
        emojis: json_column(row, prefix, "emojis")?,
        replies_count: column(row, prefix, "repliesCount")?,
        reblogs_count: column(row, prefix, "reblogsCount")?,
        favourites_count: column(row, prefix, "favouritesCount")?,
        favourited: column(row, prefix, "favourited")?,
        reblogged: column(row, prefix, "reblogged")?,
        bookmarked: column(row, prefix, "bookmarked")?,
        pinned: column(row, prefix, "pinned")?,
    })
}

/// Whether a LEFT JOINed table produced a row under `prefix`.
pub fn has_joined_row(row: &SqliteRow, prefix: &str) -> Result<bool> {
    let id: Option<String> = column(row, prefix, "id")?;
    Ok(id.is_some())
}

// =============================================================================
// Timeline
// =============================================================================

pub fn bind_timeline<'q>(query: SqliteQuery<'q>, timeline: &'q Timeline) -> SqliteQuery<'q> {
    let (list_id, list_title, tag) = match timeline {
        Timeline::Home | Timeline::Local | Timeline::Federated => (None, None, None),
        Timeline::List(list) => (Some(list.id.as_str()), Some(list.title.as_str()), None),
        Timeline::Tag(name) => (None, None, Some(name.as_str())),
    };

    query
        .bind(timeline.id())
        .bind(timeline.kind().as_str())
        .bind(list_id)
        .bind(list_title)
        .bind(tag)
}

pub fn decode_timeline(row: &SqliteRow, prefix: &str) -> Result<Timeline> {
    let kind: String = column(row, prefix, "kind")?;
    let kind = TimelineKind::parse(&kind)
        .ok_or_else(|| StoreError::malformed("kind", format!("unknown timeline kind {kind:?}")))?;

    match kind {
        TimelineKind::Home => Ok(Timeline::Home),
        TimelineKind::Local => Ok(Timeline::Local),
        TimelineKind::Federated => Ok(Timeline::Federated),
        TimelineKind::List => {
            let id: Option<String> = column(row, prefix, "listId")?;
            let title: Option<String> = column(row, prefix, "listTitle")?;
            match (id, title) {
                (Some(id), Some(title)) => Ok(Timeline::List(List { id, title })),
                _ => Err(StoreError::malformed(
                    "listId",
                    "list timeline without list id or title",
                )),
            }
        }
        TimelineKind::Tag => {
            let tag: Option<String> = column(row, prefix, "tag")?;
            tag.map(Timeline::Tag)
                .ok_or_else(|| StoreError::malformed("tag", "tag timeline without tag name"))
        }
    }
}

// =============================================================================
// Filter
// =============================================================================

pub fn bind_filter<'q>(query: SqliteQuery<'q>, filter: &'q Filter) -> Result<SqliteQuery<'q>> {
    Ok(query
        .bind(&filter.id)
        .bind(&filter.phrase)
        .bind(to_json("context", &filter.context)?)
        .bind(filter.expires_at)
        .bind(filter.irreversible)
        .bind(filter.whole_word))
}

pub fn decode_filter(row: &SqliteRow, prefix: &str) -> Result<Filter> {
    Ok(Filter {
        id: column(row, prefix, "id")?,
        phrase: column(row, prefix, "phrase")?,
        context: json_column(row, prefix, "context")?,
        expires_at: column(row, prefix, "expiresAt")?,
        irreversible: column(row, prefix, "irreversible")?,
        whole_word: column(row, prefix, "wholeWord")?,
    })
}
