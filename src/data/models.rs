//! Data models
//!
//! Already-decoded domain entities handed to the store by the network layer,
//! and the nested values the store hands back to the presentation layer.
//! IDs are assigned by the remote server; timestamps are chrono UTC.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::cache::ContentCache;

// =============================================================================
// Account
// =============================================================================

/// A remote account (status author, reblog author)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub username: String,
    /// `user` for local accounts, `user@domain` for remote ones
    pub acct: String,
    pub display_name: String,
    /// HTML profile note
    pub note: String,
    pub url: String,
    pub avatar: String,
    pub avatar_static: String,
    pub header: String,
    pub header_static: String,
    pub locked: bool,
    pub bot: bool,
    pub created_at: DateTime<Utc>,
    pub followers_count: i64,
    pub following_count: i64,
    pub statuses_count: i64,
    pub emojis: Vec<Emoji>,
    pub fields: Vec<AccountField>,
}

/// Profile metadata field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountField {
    pub name: String,
    pub value: String,
    pub verified_at: Option<DateTime<Utc>>,
}

/// Custom emoji
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Emoji {
    pub shortcode: String,
    pub url: String,
    pub static_url: String,
    pub visible_in_picker: bool,
}

// =============================================================================
// Status
// =============================================================================

/// Status visibility
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Unlisted,
    Private,
    Direct,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Unlisted => "unlisted",
            Self::Private => "private",
            Self::Direct => "direct",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "public" => Some(Self::Public),
            "unlisted" => Some(Self::Unlisted),
            "private" => Some(Self::Private),
            "direct" => Some(Self::Direct),
            _ => None,
        }
    }
}

/// Media attached to a status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: String,
    /// image, video, gifv, audio, unknown
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
    pub preview_url: Option<String>,
    pub description: Option<String>,
    pub blurhash: Option<String>,
}

/// Account mentioned in a status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mention {
    pub id: String,
    pub username: String,
    pub acct: String,
    pub url: String,
}

/// Hashtag used in a status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
    pub url: String,
}

/// A status (post/toot), possibly a reblog of another status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Status {
    pub id: String,
    pub uri: String,
    pub url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub account: Account,
    /// HTML content
    pub content: String,
    /// Content warning text
    pub spoiler_text: String,
    pub visibility: Visibility,
    pub sensitive: bool,
    pub language: Option<String>,
    pub in_reply_to_id: Option<String>,
    pub in_reply_to_account_id: Option<String>,
    /// The reblogged status, if this status is a reblog
    pub reblog: Option<Box<Status>>,
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

impl Status {
    /// The status to render: the reblog target for reblogs, otherwise self.
    pub fn display_status(&self) -> &Status {
        self.reblog.as_deref().unwrap_or(self)
    }

    /// Resolve a reblog chain to its innermost original.
    ///
    /// Returns `None` for statuses that are not reblogs.
    pub fn innermost_reblog(&self) -> Option<&Status> {
        let mut current = self.reblog.as_deref()?;
        while let Some(inner) = current.reblog.as_deref() {
            current = inner;
        }
        Some(current)
    }

    /// Plain text used for content filter matching: display status body
    /// followed by its spoiler text.
    pub fn filterable_text(&self, cache: &ContentCache) -> String {
        let display = self.display_status();
        let body = cache.plain_text(&display.content);

        if display.spoiler_text.is_empty() {
            body.to_string()
        } else {
            format!("{}\n{}", body, display.spoiler_text)
        }
    }
}

/// Thread context as returned by the remote server
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Context {
    pub ancestors: Vec<Status>,
    pub descendants: Vec<Status>,
}

/// A named, ordered run of statuses as handed to the presentation layer
#[derive(Debug, Clone, PartialEq)]
pub struct StatusSection {
    pub id: String,
    pub statuses: Vec<Status>,
}

/// Which side of the parent a context join row sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextSection {
    Ancestors,
    Descendants,
}

impl ContextSection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ancestors => "ancestors",
            Self::Descendants => "descendants",
        }
    }
}

// =============================================================================
// Lists and timelines
// =============================================================================

/// A user-defined list of accounts
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct List {
    pub id: String,
    pub title: String,
}

/// Timeline identity
///
/// Each variant maps to a stable key used as the `timeline` table key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeline {
    Home,
    Local,
    Federated,
    List(List),
    Tag(String),
}

impl Timeline {
    const LIST_PREFIX: &'static str = "list/";
    const TAG_PREFIX: &'static str = "tag/";

    /// Stable storage key
    pub fn id(&self) -> String {
        match self {
            Self::Home => "home".to_string(),
            Self::Local => "local".to_string(),
            Self::Federated => "federated".to_string(),
            Self::List(list) => format!("{}{}", Self::LIST_PREFIX, list.id),
            Self::Tag(name) => format!("{}{}", Self::TAG_PREFIX, name.to_lowercase()),
        }
    }

    /// Stored discriminant
    pub fn kind(&self) -> TimelineKind {
        match self {
            Self::Home => TimelineKind::Home,
            Self::Local => TimelineKind::Local,
            Self::Federated => TimelineKind::Federated,
            Self::List(_) => TimelineKind::List,
            Self::Tag(_) => TimelineKind::Tag,
        }
    }

    /// Storage key of the list timeline with the given list id
    pub fn list_key(list_id: &str) -> String {
        format!("{}{}", Self::LIST_PREFIX, list_id)
    }

    /// Which filter context applies when this timeline is displayed
    pub fn filter_context(&self) -> FilterContext {
        match self {
            Self::Home | Self::List(_) => FilterContext::Home,
            Self::Local | Self::Federated | Self::Tag(_) => FilterContext::Public,
        }
    }
}

/// Discriminant stored in `timeline.kind`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimelineKind {
    Home,
    Local,
    Federated,
    List,
    Tag,
}

impl TimelineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Home => "home",
            Self::Local => "local",
            Self::Federated => "federated",
            Self::List => "list",
            Self::Tag => "tag",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "home" => Some(Self::Home),
            "local" => Some(Self::Local),
            "federated" => Some(Self::Federated),
            "list" => Some(Self::List),
            "tag" => Some(Self::Tag),
            _ => None,
        }
    }
}

// =============================================================================
// Filters
// =============================================================================

/// Where a filter applies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterContext {
    Home,
    Notifications,
    Public,
    Thread,
    Account,
}

/// Content filter rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub id: String,
    pub phrase: String,
    pub context: Vec<FilterContext>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Drop matching statuses server-side (stored, not interpreted here)
    pub irreversible: bool,
    pub whole_word: bool,
}

impl Filter {
    /// A filter is active until its expiry passes.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|expires_at| expires_at > now)
    }

    pub fn applies_to(&self, context: FilterContext) -> bool {
        self.context.contains(&context)
    }
}

// =============================================================================
// Store statistics
// =============================================================================

/// Row counts per durable table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub accounts: i64,
    pub statuses: i64,
    pub timelines: i64,
    pub timeline_statuses: i64,
    pub context_statuses: i64,
    pub filters: i64,
}
