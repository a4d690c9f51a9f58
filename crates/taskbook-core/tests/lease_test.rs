// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Lease ownership across competing task queue owners.

mod common;

use common::*;
use taskbook_core::TaskWriter;
use taskbook_core::persistence::SubqueueKey;

#[tokio::test]
async fn test_competing_owners_never_reuse_range_ids_or_task_ids() {
    let store = MemoryTaskStore::new();
    let queue = orders_queue();

    let owner = db_on(&store);
    let state = owner.renew_lease().await.unwrap();
    let mut writer = TaskWriter::from_state(owner, &state);
    let mut fenced: Vec<TaskWriter> = Vec::new();

    for _ in 0..8 {
        // 13 tasks cross the 10-id block, forcing a renewal mid-batch.
        let tasks = (0..13).map(|_| new_task(0)).collect();
        writer
            .write_tasks(tasks)
            .await
            .expect("current owner should write");

        for old in &fenced {
            let err = old.write_tasks(vec![new_task(0)]).await.unwrap_err();
            assert!(err.is_condition_failed(), "unexpected error: {err}");
        }

        // Another owner steals the queue.
        let next = db_on(&store);
        let state = next.renew_lease().await.expect("takeover should succeed");
        fenced.push(std::mem::replace(
            &mut writer,
            TaskWriter::from_state(next, &state),
        ));
    }

    let accepted = store.accepted_range_ids(&queue);
    assert!(
        accepted.windows(2).all(|w| w[0] < w[1]),
        "range ids must strictly increase: {accepted:?}"
    );
    assert!(store.duplicate_task_ids().is_empty());
    assert_eq!(store.task_ids(&queue, 0).len(), 8 * 13);
}

#[tokio::test]
async fn test_takeover_bumps_range_and_fences_previous_owner() {
    let store = MemoryTaskStore::new();
    let queue = orders_queue();

    let first = db_on(&store);
    assert_eq!(first.renew_lease().await.unwrap().range_id, 1);
    assert_eq!(first.renew_lease().await.unwrap().range_id, 2);

    let second = db_on(&store);
    let state = second.renew_lease().await.unwrap();
    assert_eq!(state.range_id, 3);
    // Reading starts right before the new owner's block.
    assert_eq!(second.max_read_level(0).await.unwrap(), 20);

    let writer = TaskWriter::new(first.clone()).await.unwrap();
    let err = writer.write_tasks(vec![new_task(0)]).await.unwrap_err();
    assert!(err.is_condition_failed());

    let err = first.renew_lease().await.unwrap_err();
    assert!(err.is_condition_failed());
    assert_eq!(store.accepted_range_ids(&queue), vec![1, 2, 3]);
}

#[tokio::test]
async fn test_failed_takeover_leaves_no_lease() {
    let store = MemoryTaskStore::new();
    let first = db_on(&store);
    first.renew_lease().await.unwrap();

    let second = db_on(&store);
    store.inject(Op::UpdateTaskQueue, Fault::ConditionFailed);
    let err = second.renew_lease().await.unwrap_err();
    assert!(err.is_condition_failed());
    assert_eq!(second.range_id().await, 0);

    // A later attempt starts from scratch and succeeds.
    assert_eq!(second.renew_lease().await.unwrap().range_id, 2);
}

#[tokio::test]
async fn test_failed_create_leaves_no_lease() {
    let store = MemoryTaskStore::new();
    let db = db_on(&store);

    store.inject(Op::CreateTaskQueue, Fault::Unavailable);
    let err = db.renew_lease().await.unwrap_err();
    assert!(!err.is_condition_failed());
    assert_eq!(db.range_id().await, 0);

    assert_eq!(db.renew_lease().await.unwrap().range_id, 1);
}

#[tokio::test]
async fn test_takeover_keeps_persisted_subqueues_and_adds_default() {
    let store = MemoryTaskStore::new();
    let queue = orders_queue();

    let first = db_on(&store);
    first.renew_lease().await.unwrap();
    first.allocate_subqueue(SubqueueKey { priority: 1 }).await.unwrap();

    let second = db_on(&store);
    let state = second.renew_lease().await.unwrap();
    let keys: Vec<u32> = state.subqueues.iter().map(|s| s.key.priority).collect();
    assert_eq!(keys, vec![3, 1]);

    let (_, persisted) = store.persisted(&queue).unwrap();
    assert_eq!(persisted.subqueues.len(), 2);
}
