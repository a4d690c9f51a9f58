// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Metadata sync: write suppression, TTL refresh and the background loop.

mod common;

use std::time::Duration;

use common::*;
use taskbook_core::TaskWriter;
use taskbook_core::db::STICKY_TASK_QUEUE_TTL;
use taskbook_core::sync::{SyncLoop, SyncLoopExit};

#[tokio::test(start_paused = true)]
async fn test_sync_writes_only_when_changed_or_stale() {
    let store = MemoryTaskStore::new();
    let db = db_on(&store);
    db.renew_lease().await.unwrap();
    let writes = store.metadata_writes();

    db.sync_state().await.unwrap();
    assert_eq!(store.metadata_writes(), writes, "nothing changed");

    db.update_backlog_stats(1, None).await.unwrap();
    db.sync_state().await.unwrap();
    assert_eq!(store.metadata_writes(), writes + 1);
    db.sync_state().await.unwrap();
    assert_eq!(store.metadata_writes(), writes + 1);

    tokio::time::advance(STICKY_TASK_QUEUE_TTL / 2 - Duration::from_secs(1)).await;
    db.sync_state().await.unwrap();
    assert_eq!(store.metadata_writes(), writes + 1, "still fresh");

    tokio::time::advance(Duration::from_secs(2)).await;
    db.sync_state().await.unwrap();
    assert_eq!(store.metadata_writes(), writes + 2, "refreshed after half the TTL");
}

#[tokio::test(start_paused = true)]
async fn test_unchanged_ack_level_does_not_dirty_state() {
    let store = MemoryTaskStore::new();
    let db = db_on(&store);
    db.renew_lease().await.unwrap();
    let writes = store.metadata_writes();

    db.update_ack_level_and_backlog_stats(0, 0, 0, None)
        .await
        .unwrap();
    db.set_known_fair_backlog_count(0, 0).await.unwrap();
    db.sync_state().await.unwrap();
    assert_eq!(store.metadata_writes(), writes);
}

#[tokio::test(start_paused = true)]
async fn test_metadata_written_with_tasks_counts_as_sync() {
    let store = MemoryTaskStore::updating_metadata_with_tasks();
    let db = db_on(&store);
    let state = db.renew_lease().await.unwrap();
    let writer = TaskWriter::from_state(db.clone(), &state);

    db.update_backlog_stats(0, None).await.unwrap();
    writer.write_tasks(vec![new_task(0)]).await.unwrap();
    let writes = store.metadata_writes();

    db.sync_state().await.unwrap();
    assert_eq!(store.metadata_writes(), writes);

    let (_, persisted) = store.persisted(&orders_queue()).unwrap();
    assert_eq!(persisted.approximate_backlog_count, 1);
}

#[tokio::test(start_paused = true)]
async fn test_sync_loop_runs_until_cancelled() {
    let store = MemoryTaskStore::new();
    let db = db_on(&store);
    db.renew_lease().await.unwrap();
    let writes = store.metadata_writes();

    let sync = SyncLoop::new(db.clone(), Duration::from_secs(10));
    let cancel = sync.cancellation_token();
    let handle = tokio::spawn(async move { sync.run().await });

    db.update_backlog_stats(2, None).await.unwrap();
    tokio::time::sleep(Duration::from_secs(15)).await;
    assert_eq!(store.metadata_writes(), writes + 1);

    db.update_backlog_stats(1, None).await.unwrap();
    cancel.cancel();
    assert_eq!(handle.await.unwrap(), SyncLoopExit::Cancelled);

    // Final sync on shutdown persisted the last change.
    let (_, persisted) = store.persisted(&orders_queue()).unwrap();
    assert_eq!(persisted.approximate_backlog_count, 3);
}

#[tokio::test(start_paused = true)]
async fn test_sync_loop_stops_when_lease_is_lost() {
    let store = MemoryTaskStore::new();
    let db = db_on(&store);
    db.renew_lease().await.unwrap();

    let sync = SyncLoop::new(db.clone(), Duration::from_secs(10));
    let handle = tokio::spawn(async move { sync.run().await });

    // Another owner takes over, then we change something that needs a write.
    db_on(&store).renew_lease().await.unwrap();
    db.update_backlog_stats(1, None).await.unwrap();

    assert_eq!(handle.await.unwrap(), SyncLoopExit::LeaseLost);
}

#[tokio::test(start_paused = true)]
async fn test_sync_loop_survives_transient_failures() {
    let store = MemoryTaskStore::new();
    let db = db_on(&store);
    db.renew_lease().await.unwrap();
    let writes = store.metadata_writes();

    store.inject(Op::UpdateTaskQueue, Fault::Unavailable);
    db.update_backlog_stats(1, None).await.unwrap();

    let sync = SyncLoop::new(db.clone(), Duration::from_secs(10));
    let cancel = sync.cancellation_token();
    let handle = tokio::spawn(async move { sync.run().await });

    tokio::time::sleep(Duration::from_secs(25)).await;
    cancel.cancel();
    assert_eq!(handle.await.unwrap(), SyncLoopExit::Cancelled);
    assert_eq!(store.metadata_writes(), writes + 1);
}
