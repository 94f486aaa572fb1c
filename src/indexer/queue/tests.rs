use super::*;
use crate::watcher::ChangeKind;
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

fn event(path: &str, kind: ChangeKind) -> ChangeEvent {
    ChangeEvent {
        path: PathBuf::from(path),
        kind,
        timestamp: Utc::now(),
    }
}

#[test]
fn fifo_order_for_distinct_paths() {
    let queue = WorkQueue::new();
    queue.push(event("/vault/a.md", ChangeKind::Created));
    queue.push(event("/vault/b.md", ChangeKind::Modified));

    assert_eq!(queue.len(), 2);
    assert_eq!(
        queue.try_pop().map(|e| e.path),
        Some(PathBuf::from("/vault/a.md"))
    );
    assert_eq!(
        queue.try_pop().map(|e| e.path),
        Some(PathBuf::from("/vault/b.md"))
    );
    assert!(queue.try_pop().is_none());
    assert!(queue.is_empty());
}

#[test]
fn newer_event_supersedes_queued_one_in_place() {
    let queue = WorkQueue::new();
    queue.push(event("/vault/a.md", ChangeKind::Modified));
    queue.push(event("/vault/b.md", ChangeKind::Modified));
    queue.push(event("/vault/a.md", ChangeKind::Deleted));

    assert_eq!(queue.len(), 2);
    let first = queue.try_pop().expect("a.md queued");
    assert_eq!(first.path, PathBuf::from("/vault/a.md"));
    assert_eq!(first.kind, ChangeKind::Deleted);

    let stats = queue.stats();
    assert_eq!(stats.pushed_count, 3);
    assert_eq!(stats.superseded_count, 1);
    assert_eq!(stats.popped_count, 1);
    assert_eq!(stats.pending_count, 1);
}

#[test]
fn in_flight_events_are_not_replaced() {
    let queue = WorkQueue::new();
    queue.push(event("/vault/a.md", ChangeKind::Created));
    let in_flight = queue.try_pop().expect("queued");

    queue.push(event("/vault/a.md", ChangeKind::Modified));

    assert_eq!(in_flight.kind, ChangeKind::Created);
    assert_eq!(queue.len(), 1);
    assert_eq!(queue.stats().superseded_count, 0);
}

#[tokio::test]
async fn pop_waits_for_a_push() {
    let queue = Arc::new(WorkQueue::new());
    let waiter = {
        let queue = Arc::clone(&queue);
        tokio::spawn(async move { queue.pop().await })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    queue.push(event("/vault/late.md", ChangeKind::Created));

    let popped = tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .expect("pop should wake")
        .expect("task should join");
    assert_eq!(popped.path, PathBuf::from("/vault/late.md"));
}
