//! Common test utilities for E2E tests

#![allow(dead_code)]

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use feedstore::data::{Account, Filter, FilterContext, Status, Visibility};
use feedstore::{Database, Observation, StoreConfig};
use tempfile::TempDir;
use tokio_stream::StreamExt;

/// How long a test waits before deciding nothing more is coming
pub const QUIET_PERIOD: Duration = Duration::from_millis(200);

/// Test store instance
pub struct TestStore {
    pub db: Database,
    pub _temp_dir: TempDir,
}

impl TestStore {
    /// Create a new store in a temporary directory
    pub async fn new() -> Self {
        Self::with_config(StoreConfig::default()).await
    }

    pub async fn with_config(mut config: StoreConfig) -> Self {
        let temp_dir = TempDir::new().unwrap();
        config.storage.data_dir = temp_dir.path().to_path_buf();

        let db = Database::open_identity("tester", "", &config)
            .await
            .unwrap();

        Self {
            db,
            _temp_dir: temp_dir,
        }
    }
}

/// Next delivered value, failing the test on error or end of stream.
pub async fn next<T: Clone + PartialEq>(observation: &mut Observation<T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), observation.next())
        .await
        .expect("observation delivers within 5s")
        .expect("observation is still live")
        .expect("query succeeds")
}

/// Asserts the observation delivers nothing for `QUIET_PERIOD`.
pub async fn assert_quiet<T: Clone + PartialEq + std::fmt::Debug>(observation: &mut Observation<T>) {
    if let Ok(item) = tokio::time::timeout(QUIET_PERIOD, observation.next()).await {
        panic!("unexpected delivery: {item:?}");
    }
}

pub fn at(seconds: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + seconds, 0).unwrap()
}

pub fn account(id: &str) -> Account {
    Account {
        id: id.to_string(),
        username: format!("user{id}"),
        acct: format!("user{id}@remote.example"),
        display_name: format!("User {id}"),
        note: String::new(),
        url: format!("https://remote.example/@user{id}"),
        avatar: String::new(),
        avatar_static: String::new(),
        header: String::new(),
        header_static: String::new(),
        locked: false,
        bot: false,
        created_at: at(0),
        followers_count: 0,
        following_count: 0,
        statuses_count: 0,
        emojis: Vec::new(),
        fields: Vec::new(),
    }
}

pub fn status(id: &str, account_id: &str, seconds: i64, content: &str) -> Status {
    Status {
        id: id.to_string(),
        uri: format!("https://remote.example/statuses/{id}"),
        url: Some(format!("https://remote.example/@user{account_id}/{id}")),
        created_at: at(seconds),
        account: account(account_id),
        content: content.to_string(),
        spoiler_text: String::new(),
        visibility: Visibility::Public,
        sensitive: false,
        language: None,
        in_reply_to_id: None,
        in_reply_to_account_id: None,
        reblog: None,
        media_attachments: Vec::new(),
        mentions: Vec::new(),
        tags: Vec::new(),
        emojis: Vec::new(),
        replies_count: 0,
        reblogs_count: 0,
        favourites_count: 0,
        favourited: false,
        reblogged: false,
        bookmarked: false,
        pinned: false,
    }
}

pub fn reply(id: &str, account_id: &str, seconds: i64, in_reply_to: &Status) -> Status {
    Status {
        in_reply_to_id: Some(in_reply_to.id.clone()),
        in_reply_to_account_id: Some(in_reply_to.account.id.clone()),
        ..status(id, account_id, seconds, "<p>reply</p>")
    }
}

pub fn reblog(id: &str, account_id: &str, seconds: i64, original: &Status) -> Status {
    Status {
        reblog: Some(Box::new(original.clone())),
        ..status(id, account_id, seconds, "")
    }
}

pub fn filter(id: &str, phrase: &str, context: &[FilterContext], whole_word: bool) -> Filter {
    Filter {
        id: id.to_string(),
        phrase: phrase.to_string(),
        context: context.to_vec(),
        expires_at: None,
        irreversible: false,
        whole_word,
    }
}
