//! E2E tests for timeline observations

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use common::{TestStore, assert_quiet, next, reblog, status};
use feedstore::data::{List, StatusSection, Timeline};
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;

#[tokio::test]
async fn test_home_shows_reblog_above_original() {
    let store = TestStore::new().await;
    let s1 = status("s1", "alice", 0, "<p>original post</p>");
    let s2 = reblog("s2", "bob", 60, &s1);

    store
        .db
        .insert_statuses(std::slice::from_ref(&s1), &Timeline::Home)
        .await
        .unwrap();
    store
        .db
        .insert_statuses(std::slice::from_ref(&s2), &Timeline::Home)
        .await
        .unwrap();

    let mut home = store.db.timeline_observation(&Timeline::Home);
    let sections = next(&mut home).await;

    assert_eq!(sections.len(), 1);
    let ids: Vec<&str> = sections[0].statuses.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, ["s2", "s1"]);
    assert_eq!(sections[0].statuses[0].display_status().id, s1.id);
}

#[tokio::test]
async fn test_observer_receives_initial_value_then_changes() {
    let store = TestStore::new().await;
    let mut home = store.db.timeline_observation(&Timeline::Home);

    let initial = next(&mut home).await;
    assert!(initial[0].statuses.is_empty());

    store
        .db
        .insert_statuses(&[status("1", "alice", 0, "<p>hi</p>")], &Timeline::Home)
        .await
        .unwrap();

    let updated = next(&mut home).await;
    assert_eq!(updated[0].statuses.len(), 1);
    assert_eq!(updated[0].statuses[0].id, "1");
}

#[tokio::test]
async fn test_unrelated_timeline_write_is_not_redelivered() {
    let store = TestStore::new().await;
    store
        .db
        .insert_statuses(&[status("1", "alice", 0, "<p>home</p>")], &Timeline::Home)
        .await
        .unwrap();

    let mut home = store.db.timeline_observation(&Timeline::Home);
    let mut local = store.db.timeline_observation(&Timeline::Local);
    let before = next(&mut home).await;
    assert!(next(&mut local).await[0].statuses.is_empty());

    store
        .db
        .insert_statuses(&[status("2", "bob", 10, "<p>local</p>")], &Timeline::Local)
        .await
        .unwrap();

    assert_eq!(next(&mut local).await[0].statuses[0].id, "2");
    assert_quiet(&mut home).await;

    // writing the same page again changes nothing anywhere
    store
        .db
        .insert_statuses(&[status("2", "bob", 10, "<p>local</p>")], &Timeline::Local)
        .await
        .unwrap();
    assert_quiet(&mut local).await;
    assert_quiet(&mut home).await;

    store
        .db
        .insert_statuses(&[status("3", "carol", 20, "<p>new</p>")], &Timeline::Home)
        .await
        .unwrap();
    let after = next(&mut home).await;
    assert_eq!(after[0].statuses.len(), before[0].statuses.len() + 1);
}

#[tokio::test]
async fn test_list_and_tag_timelines_are_separate() {
    let store = TestStore::new().await;
    let list = Timeline::List(List {
        id: "7".to_string(),
        title: "Friends".to_string(),
    });
    let tag = Timeline::Tag("Rust".to_string());

    store
        .db
        .insert_statuses(&[status("1", "alice", 0, "<p>list</p>")], &list)
        .await
        .unwrap();
    store
        .db
        .insert_statuses(&[status("2", "bob", 0, "<p>#rust</p>")], &tag)
        .await
        .unwrap();

    let list_sections = next(&mut store.db.timeline_observation(&list)).await;
    assert_eq!(list_sections[0].id, "list/7");
    assert_eq!(list_sections[0].statuses[0].id, "1");

    let tag_sections = next(&mut store.db.timeline_observation(&Timeline::Tag("rust".to_string()))).await;
    assert_eq!(tag_sections[0].id, "tag/rust");
    assert_eq!(tag_sections[0].statuses[0].id, "2");
}

#[tokio::test]
async fn test_cancelled_observation_ends() {
    let store = TestStore::new().await;
    let mut home = store.db.timeline_observation(&Timeline::Home);
    next(&mut home).await;

    home.cancel();
    assert!(home.is_cancelled());

    store
        .db
        .insert_statuses(&[status("1", "alice", 0, "<p>hi</p>")], &Timeline::Home)
        .await
        .unwrap();

    assert!(home.next().await.is_none());
}

#[tokio::test]
async fn test_writes_do_not_wait_for_consumers() {
    let store = TestStore::new().await;
    let mut slow = store.db.timeline_observation(&Timeline::Home);
    next(&mut slow).await;

    // nobody reads `slow` while these commit
    for i in 0..20 {
        store
            .db
            .insert_statuses(
                &[status(&i.to_string(), "alice", i, "<p>burst</p>")],
                &Timeline::Home,
            )
            .await
            .unwrap();
    }

    let mut fresh = store.db.timeline_observation(&Timeline::Home);
    assert_eq!(next(&mut fresh).await[0].statuses.len(), 20);

    // the slow consumer catches up to the final state eventually
    let mut latest = next(&mut slow).await;
    while latest[0].statuses.len() < 20 {
        latest = next(&mut slow).await;
    }
    assert_eq!(latest[0].statuses[0].id, "19");
}

fn contains(sections: &[StatusSection], id: &str) -> bool {
    sections[0].statuses.iter().any(|status| status.id == id)
}

/// Keeps inserting one status at a time into `timeline` until stopped.
fn spawn_write_load(
    store: Arc<TestStore>,
    timeline: Timeline,
    prefix: &'static str,
    stop: Arc<AtomicBool>,
) -> JoinHandle<u64> {
    tokio::spawn(async move {
        let mut written = 0;
        while !stop.load(Ordering::SeqCst) {
            let id = format!("{prefix}-{written}");
            store
                .db
                .insert_statuses(&[status(&id, "loader", written as i64, "<p>load</p>")], &timeline)
                .await
                .unwrap();
            written += 1;
        }
        written
    })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_first_value_arrives_under_sustained_writes() {
    let store = Arc::new(TestStore::new().await);
    let backlog: Vec<_> = (0..3000)
        .map(|i| status(&format!("home-{i}"), "alice", i, "<p>backlog</p>"))
        .collect();
    store
        .db
        .insert_statuses(&backlog, &Timeline::Home)
        .await
        .unwrap();

    let stop = Arc::new(AtomicBool::new(false));
    let load = spawn_write_load(store.clone(), Timeline::Local, "local", stop.clone());
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut home = store.db.timeline_observation(&Timeline::Home);
    let initial = tokio::time::timeout(Duration::from_secs(10), home.next())
        .await
        .expect("first value arrives while writes continue")
        .unwrap()
        .unwrap();
    assert_eq!(initial[0].statuses.len(), 3000);

    // later changes get through the same load
    store
        .db
        .insert_statuses(&[status("fresh", "bob", 5000, "<p>new</p>")], &Timeline::Home)
        .await
        .unwrap();
    let updated = tokio::time::timeout(Duration::from_secs(10), home.next())
        .await
        .expect("update arrives while writes continue")
        .unwrap()
        .unwrap();
    assert!(contains(&updated, "fresh"));

    stop.store(true, Ordering::SeqCst);
    assert!(load.await.unwrap() > 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_no_value_older_than_an_acknowledged_write() {
    let store = Arc::new(TestStore::new().await);
    let stop = Arc::new(AtomicBool::new(false));
    let loads = [
        spawn_write_load(store.clone(), Timeline::Home, "bg-a", stop.clone()),
        spawn_write_load(store.clone(), Timeline::Home, "bg-b", stop.clone()),
    ];

    let mut home = store.db.timeline_observation(&Timeline::Home);
    next(&mut home).await;

    for round in 0..25 {
        let id = format!("main-{round}");
        store
            .db
            .insert_statuses(&[status(&id, "alice", 10_000 + round, "<p>main</p>")], &Timeline::Home)
            .await
            .unwrap();

        // Only a value already waiting when the write returned may lack it;
        // anything produced afterwards must include it.
        let mut first_after_write = true;
        loop {
            let sections = next(&mut home).await;
            if contains(&sections, &id) {
                break;
            }
            assert!(
                first_after_write,
                "value without {id} delivered after the write completed"
            );
            first_after_write = false;
        }
    }

    stop.store(true, Ordering::SeqCst);
    for load in loads {
        load.await.unwrap();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_idle_consumer_does_not_delay_another() {
    let store = TestStore::new().await;
    let mut idle = store.db.timeline_observation(&Timeline::Home);
    let mut active = store.db.timeline_observation(&Timeline::Home);
    next(&mut active).await;

    for i in 0..30 {
        let id = i.to_string();
        let started = Instant::now();
        store
            .db
            .insert_statuses(&[status(&id, "alice", i, "<p>tick</p>")], &Timeline::Home)
            .await
            .unwrap();

        let mut sections = next(&mut active).await;
        while !contains(&sections, &id) {
            sections = next(&mut active).await;
        }
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    // the idle consumer holds one value, never a backlog
    let mut latest = next(&mut idle).await;
    while latest[0].statuses.len() < 30 {
        latest = next(&mut idle).await;
    }
    assert_quiet(&mut idle).await;
}
