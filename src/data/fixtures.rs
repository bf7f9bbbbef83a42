//! Builders for unit tests

use chrono::{DateTime, TimeZone, Utc};

use super::models::*;

pub fn at(seconds: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + seconds, 0)
        .single()
        .expect("valid timestamp")
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

/// A plain status by `account_id`, created `seconds` after the test epoch.
pub fn status(id: &str, account_id: &str, seconds: i64, content: &str) -> Status {
    Status {
        id: id.to_string(),
        uri: format!("https://remote.example/statuses/{id}"),
        url: None,
        created_at: at(seconds),
        account: account(account_id),
        content: content.to_string(),
        spoiler_text: String::new(),
        visibility: Visibility::Public,
        sensitive: false,
        language: Some("en".to_string()),
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

/// A reblog of `original` by `account_id`.
pub fn reblog(id: &str, account_id: &str, seconds: i64, original: Status) -> Status {
    Status {
        reblog: Some(Box::new(original)),
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
