// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use arrow_array::cast::AsArray;
use arrow_array::types::Int64Type;
use arrow_array::{Array, Int64Array, RecordBatch, StringArray};
use arrow_schema::{DataType, Field, Schema};
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::ObjectStore;
use pkupdate::{Error, Tablet, UpdateConfig, UpdateManager};
use pkupdate_core::utils::address::RssRowId;
use pkupdate_core::utils::testing::{ProxyObjectStore, ProxyObjectStorePolicy};
use pkupdate_table::format::{
    EditVersion, RowsetId, RowsetKind, RowsetMeta, TabletColumn, TabletSchema,
};
use pkupdate_table::index::InMemoryPrimaryIndex;
use pkupdate_table::io::{update_file_name, write_segment_file};
use rstest::rstest;
use snafu::location;

fn tablet_schema() -> TabletSchema {
    TabletSchema::try_new(
        1,
        vec![
            TabletColumn::key(0, "id", DataType::Int64),
            TabletColumn::new(1, "v1", DataType::Int64).with_default("-1"),
            TabletColumn::new(2, "v2", DataType::Utf8),
        ],
    )
    .unwrap()
}

fn open_tablet(schema: TabletSchema, store: Arc<dyn ObjectStore>, config: UpdateConfig) -> Tablet {
    Tablet::try_new(
        schema,
        store,
        Path::from("tablets/t1"),
        Arc::new(InMemoryPrimaryIndex::new()),
        config,
    )
    .unwrap()
}

fn new_tablet(config: UpdateConfig) -> Tablet {
    open_tablet(tablet_schema(), Arc::new(InMemory::new()), config)
}

fn full_rows(ids: &[i64]) -> RecordBatch {
    RecordBatch::try_new(
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("v1", DataType::Int64, true),
            Field::new("v2", DataType::Utf8, true),
        ])),
        vec![
            Arc::new(Int64Array::from(ids.to_vec())),
            Arc::new(Int64Array::from_iter_values(ids.iter().map(|i| i * 10))),
            Arc::new(StringArray::from_iter_values(
                ids.iter().map(|i| format!("s{i}")),
            )),
        ],
    )
    .unwrap()
}

/// Rows of an update of `v1` only.
fn v1_updates(ids: &[i64], v1: &[i64]) -> RecordBatch {
    RecordBatch::try_new(
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("v1", DataType::Int64, true),
        ])),
        vec![
            Arc::new(Int64Array::from(ids.to_vec())),
            Arc::new(Int64Array::from(v1.to_vec())),
        ],
    )
    .unwrap()
}

fn key_batch(ids: &[i64]) -> RecordBatch {
    RecordBatch::try_new(
        Arc::new(Schema::new(vec![Field::new("id", DataType::Int64, false)])),
        vec![Arc::new(Int64Array::from(ids.to_vec()))],
    )
    .unwrap()
}

async fn apply_full(tablet: &Tablet, manager: &UpdateManager, ids: &[i64]) -> RowsetMeta {
    let rowset = tablet.write_rowset(&[full_rows(ids)]).await.unwrap();
    let rowset = tablet.commit_rowset(rowset).unwrap();
    tablet.apply_rowset(&rowset, manager).await.unwrap();
    rowset
}

async fn commit_v1_update(tablet: &Tablet, batches: &[RecordBatch]) -> RowsetMeta {
    let rowset = tablet
        .write_column_update_rowset(batches, &["v1"])
        .await
        .unwrap();
    tablet.commit_rowset(rowset).unwrap()
}

/// Live rows as (id, v1, v2) sorted by id.
async fn live_rows(tablet: &Tablet) -> Vec<(i64, Option<i64>, Option<String>)> {
    let batch = tablet.scan(&["id", "v1", "v2"]).await.unwrap();
    let ids = batch.column(0).as_primitive::<Int64Type>();
    let v1 = batch.column(1).as_primitive::<Int64Type>();
    let v2 = batch.column(2).as_string::<i32>();
    let mut rows = (0..batch.num_rows())
        .map(|i| {
            (
                ids.value(i),
                v1.is_valid(i).then(|| v1.value(i)),
                v2.is_valid(i).then(|| v2.value(i).to_string()),
            )
        })
        .collect::<Vec<_>>();
    rows.sort();
    rows
}

fn row(id: i64, v1: i64, v2: Option<&str>) -> (i64, Option<i64>, Option<String>) {
    (id, Some(v1), v2.map(str::to_string))
}

#[test_log::test(tokio::test)]
async fn test_update_and_insert() {
    let tablet = new_tablet(UpdateConfig::default());
    let manager = UpdateManager::new(tablet.config());
    apply_full(&tablet, &manager, &[1, 2, 3]).await;

    let update = commit_v1_update(&tablet, &[v1_updates(&[3, 1, 7], &[300, 100, 700])]).await;
    let version = tablet.apply_rowset(&update, &manager).await.unwrap();
    assert_eq!(version, EditVersion::new(3, 0));

    assert_eq!(
        live_rows(&tablet).await,
        vec![
            row(1, 100, Some("s1")),
            row(2, 20, Some("s2")),
            row(3, 300, Some("s3")),
            // v2 has no default and is nullable
            (7, Some(700), None),
        ]
    );

    // the base segment got a delta column group holding only v1
    let dcgs = tablet.delta_column_groups(0).unwrap();
    assert_eq!(dcgs.len(), 1);
    assert_eq!(dcgs[0].column_ids().collect::<Vec<_>>(), vec![1]);
    assert_eq!(dcgs[0].version, 3);

    // the insert landed in a new segment at the update's rssid
    let found = tablet.lookup(&key_batch(&[7])).unwrap();
    assert_eq!(found[0], Some(RssRowId::new_from_parts(update.rssid.unwrap(), 0)));
    assert_eq!(tablet.index().key_count(), 4);
}

#[tokio::test]
async fn test_resolution_partitions_update_rows() {
    let tablet = new_tablet(UpdateConfig::default());
    let manager = UpdateManager::new(tablet.config());
    apply_full(&tablet, &manager, &[1, 2, 3, 4]).await;

    let update = commit_v1_update(
        &tablet,
        &[
            v1_updates(&[1, 5, 1, 2, 6, 6], &[1, 2, 3, 4, 5, 6]),
            v1_updates(&[4, 8], &[7, 8]),
        ],
    )
    .await;
    manager.preload(&tablet, &update).await.unwrap();
    let state = manager.get(&tablet, &update).unwrap();
    let state = state.lock().await;

    let expected_shadowed: [Vec<u32>; 2] = [vec![0, 4], vec![]];
    for (file, resolved) in state.states().iter().enumerate() {
        let mapped = resolved
            .rss_rowid_to_update_rowid
            .values()
            .copied()
            .collect::<BTreeSet<_>>();
        let inserts = resolved.insert_rowids.iter().copied().collect::<BTreeSet<_>>();
        let shadowed = resolved.shadowed.iter().collect::<BTreeSet<_>>();

        assert_eq!(mapped.len(), resolved.rss_rowid_to_update_rowid.len());
        assert!(mapped.is_disjoint(&inserts));
        assert!(mapped.is_disjoint(&shadowed));
        assert!(inserts.is_disjoint(&shadowed));
        assert_eq!(
            mapped.len() + inserts.len() + shadowed.len(),
            resolved.num_rows()
        );
        assert_eq!(
            shadowed.into_iter().collect::<Vec<_>>(),
            expected_shadowed[file]
        );
    }
    assert_eq!(state.states()[0].insert_rowids, vec![1, 5]);
    assert_eq!(state.states()[1].insert_rowids, vec![1]);
}

#[tokio::test]
async fn test_duplicate_key_last_occurrence_wins() {
    let tablet = new_tablet(UpdateConfig::default());
    let manager = UpdateManager::new(tablet.config());
    apply_full(&tablet, &manager, &[1, 2]).await;

    let update = commit_v1_update(&tablet, &[v1_updates(&[2, 2], &[21, 22])]).await;
    manager.preload(&tablet, &update).await.unwrap();
    {
        let state = manager.get(&tablet, &update).unwrap();
        let state = state.lock().await;
        let resolved = &state.states()[0];
        let location = u64::from(RssRowId::new_from_parts(0, 1));
        assert_eq!(resolved.rss_rowid_to_update_rowid.len(), 1);
        assert_eq!(resolved.rss_rowid_to_update_rowid.get(&location), Some(&1));
        assert!(resolved.insert_rowids.is_empty());
    }

    tablet.apply_rowset(&update, &manager).await.unwrap();
    assert_eq!(
        live_rows(&tablet).await,
        vec![row(1, 10, Some("s1")), row(2, 22, Some("s2"))]
    );
}

#[rstest]
#[tokio::test]
async fn test_load_is_idempotent(#[values(false, true)] compress: bool) {
    let tablet = new_tablet(UpdateConfig::default().with_compression(compress));
    let manager = UpdateManager::new(tablet.config());
    apply_full(&tablet, &manager, &[1, 2, 3]).await;

    let update = commit_v1_update(&tablet, &[v1_updates(&[2, 9], &[1, 2])]).await;
    manager.preload(&tablet, &update).await.unwrap();
    let state = manager.get(&tablet, &update).unwrap();
    let first = state.lock().await.states().to_vec();

    // a later full rowset moves key 2, but a loaded state is not reloaded
    apply_full(&tablet, &manager, &[2]).await;
    let mut guard = state.lock().await;
    guard
        .load(&tablet, &update, tablet.config().pk_batch_memory_limit)
        .await
        .unwrap();
    assert_eq!(guard.states(), first.as_slice());
}

#[tokio::test]
async fn test_failed_load_is_replayed() {
    let tablet = new_tablet(UpdateConfig::default());
    let manager = UpdateManager::new(tablet.config());
    apply_full(&tablet, &manager, &[1]).await;

    let update = commit_v1_update(&tablet, &[v1_updates(&[1], &[5])]).await;
    let path = tablet.base_path().child(update.update_files[0].path.as_str());
    tablet.store().delete(&path).await.unwrap();

    let err = manager.preload(&tablet, &update).await.unwrap_err();
    assert!(matches!(err, Error::NotFound { .. }), "{err}");
    let err = manager.preload(&tablet, &update).await.unwrap_err();
    assert!(matches!(err, Error::Cloned { .. }), "{err}");

    // the apply gets the same failure and drops the cached state
    let err = tablet.apply_rowset(&update, &manager).await.unwrap_err();
    assert!(matches!(err, Error::Cloned { .. }), "{err}");
    assert!(manager.get(&tablet, &update).is_none());
    assert_eq!(tablet.latest_applied_version().unwrap(), EditVersion::new(2, 0));
}

#[tokio::test]
async fn test_finalize_requires_load() {
    let tablet = new_tablet(UpdateConfig::default());
    let manager = UpdateManager::new(tablet.config());
    let update = commit_v1_update(&tablet, &[v1_updates(&[1], &[5])]).await;

    let state = manager.get_or_create(&tablet, &update);
    let mut state = state.lock().await;
    let ctx = tablet.begin_apply().await.unwrap();
    let mut index_meta = ctx.index_meta().unwrap();
    let mut del_vecs = vec![];
    let err = state
        .finalize(&ctx, &mut index_meta, &mut del_vecs)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::PrerequisiteFailed { .. }), "{err}");
    assert!(!state.is_finalized());
    assert!(state.resolve_conflicts(&ctx).await.is_err());
}

#[tokio::test]
async fn test_conflict_resolution_tracks_the_index() {
    let tablet = new_tablet(UpdateConfig::default());
    let manager = UpdateManager::new(tablet.config());
    apply_full(&tablet, &manager, &[1, 2, 3]).await;

    let update = commit_v1_update(&tablet, &[v1_updates(&[1, 2, 3, 4], &[11, 12, 13, 14])]).await;
    manager.preload(&tablet, &update).await.unwrap();

    // 1 moves to a new segment and 4 appears while the update waits
    let moved = apply_full(&tablet, &manager, &[1, 4]).await;

    let state = manager.get(&tablet, &update).unwrap();
    {
        let mut state = state.lock().await;
        let ctx = tablet.begin_apply().await.unwrap();
        assert_eq!(state.resolve_conflicts(&ctx).await.unwrap(), 2);

        let current = tablet
            .lookup(&key_batch(&[1, 2, 3, 4]))
            .unwrap()
            .into_iter()
            .map(|found| found.map_or(RssRowId::NOT_FOUND, u64::from))
            .collect::<Vec<_>>();
        assert_eq!(state.states()[0].src_rss_rowids, current);
        assert_eq!(state.states()[0].read_version, ctx.latest_applied_version());
        assert!(state.states()[0].insert_rowids.is_empty());

        // already current
        assert_eq!(state.resolve_conflicts(&ctx).await.unwrap(), 0);
    }

    tablet.apply_rowset(&update, &manager).await.unwrap();
    assert_eq!(state.lock().await.num_conflicts(), Some(0));
    assert_eq!(
        live_rows(&tablet).await,
        vec![
            row(1, 11, Some("s1")),
            row(2, 12, Some("s2")),
            row(3, 13, Some("s3")),
            row(4, 14, Some("s4")),
        ]
    );
    assert_eq!(tablet.delta_column_groups(moved.rssid.unwrap()).unwrap().len(), 1);
}

#[tokio::test]
async fn test_key_deleted_after_load_becomes_insert() {
    let tablet = new_tablet(UpdateConfig::default());
    let manager = UpdateManager::new(tablet.config());
    apply_full(&tablet, &manager, &[1, 2, 3]).await;

    let update = commit_v1_update(&tablet, &[v1_updates(&[1, 2], &[100, 200])]).await;
    manager.preload(&tablet, &update).await.unwrap();
    let state = manager.get(&tablet, &update).unwrap();
    assert!(state.lock().await.states()[0].insert_rowids.is_empty());

    let delete = tablet.write_delete_rowset(&[key_batch(&[2])]).await.unwrap();
    let delete = tablet.commit_rowset(delete).unwrap();
    tablet.apply_rowset(&delete, &manager).await.unwrap();

    tablet.apply_rowset(&update, &manager).await.unwrap();
    {
        let state = state.lock().await;
        assert_eq!(state.num_conflicts(), Some(1));
        assert_eq!(state.finalized_rowset().unwrap().num_segments(), 1);
    }

    // 2 comes back as a new row with defaults for the other columns
    assert_eq!(
        live_rows(&tablet).await,
        vec![row(1, 100, Some("s1")), (2, Some(200), None), row(3, 30, Some("s3"))]
    );
    let found = tablet.lookup(&key_batch(&[2])).unwrap();
    assert_eq!(found[0], Some(RssRowId::new_from_parts(update.rssid.unwrap(), 0)));
}

#[tokio::test]
async fn test_updated_rows_keep_their_location() {
    let tablet = new_tablet(UpdateConfig::default());
    let manager = UpdateManager::new(tablet.config());
    apply_full(&tablet, &manager, &[1, 2]).await;
    apply_full(&tablet, &manager, &[3, 4]).await;

    let keys = key_batch(&[4, 1, 3]);
    let before = tablet.lookup(&keys).unwrap();
    let update = commit_v1_update(&tablet, &[v1_updates(&[4, 1, 3], &[0, 0, 0])]).await;
    tablet.apply_rowset(&update, &manager).await.unwrap();
    assert_eq!(tablet.lookup(&keys).unwrap(), before);

    // column updates delete nothing
    assert!(tablet.latest_del_vec(0).unwrap().is_none());
    assert!(tablet.latest_del_vec(1).unwrap().is_none());
    assert_eq!(tablet.delta_column_groups(0).unwrap().len(), 1);
    assert_eq!(tablet.delta_column_groups(1).unwrap().len(), 1);
}

#[tokio::test]
async fn test_successive_updates_overlay() {
    let tablet = new_tablet(UpdateConfig::default());
    let manager = UpdateManager::new(tablet.config());
    apply_full(&tablet, &manager, &[1, 2, 3]).await;

    let first = commit_v1_update(&tablet, &[v1_updates(&[1, 2], &[100, 200])]).await;
    tablet.apply_rowset(&first, &manager).await.unwrap();

    let second = tablet
        .write_column_update_rowset(
            &[RecordBatch::try_new(
                Arc::new(Schema::new(vec![
                    Field::new("id", DataType::Int64, false),
                    Field::new("v2", DataType::Utf8, true),
                ])),
                vec![
                    Arc::new(Int64Array::from(vec![2, 3])),
                    Arc::new(StringArray::from(vec!["x2", "x3"])),
                ],
            )
            .unwrap()],
            &["v2"],
        )
        .await
        .unwrap();
    let second = tablet.commit_rowset(second).unwrap();
    tablet.apply_rowset(&second, &manager).await.unwrap();

    let third = commit_v1_update(&tablet, &[v1_updates(&[2], &[222])]).await;
    tablet.apply_rowset(&third, &manager).await.unwrap();

    let segment = tablet.read_segment(0, &["v2", "v1", "id"]).await.unwrap();
    assert_eq!(
        segment.column(1).as_primitive::<Int64Type>().values(),
        &[100, 222, 30]
    );
    assert_eq!(
        segment.column(2).as_primitive::<Int64Type>().values(),
        &[1, 2, 3]
    );
    assert_eq!(
        live_rows(&tablet).await,
        vec![
            row(1, 100, Some("s1")),
            row(2, 222, Some("x2")),
            row(3, 30, Some("x3")),
        ]
    );
    let versions = tablet
        .delta_column_groups(0)
        .unwrap()
        .iter()
        .map(|dcg| dcg.version)
        .collect::<Vec<_>>();
    assert_eq!(versions, vec![3, 4, 5]);
}

#[tokio::test]
async fn test_memory_budget_splits_batches() {
    // an Int64 key encodes to 9 bytes and is charged one more usize for its offset
    let key_cost = 9 + std::mem::size_of::<usize>();
    let tablet = new_tablet(UpdateConfig::default().with_pk_batch_memory_limit(110));
    let manager = UpdateManager::new(tablet.config());
    apply_full(&tablet, &manager, &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]).await;

    let files = [[1, 2, 3], [4, 5, 6], [7, 8, 9], [10, 11, 12]]
        .iter()
        .map(|ids| v1_updates(ids, &[0, 0, 0]))
        .collect::<Vec<_>>();
    let update = commit_v1_update(&tablet, &files).await;
    manager.preload(&tablet, &update).await.unwrap();
    {
        let state = manager.get(&tablet, &update).unwrap();
        let state = state.lock().await;
        let batches = state.batches();
        assert_eq!(batches.len(), 2);
        for batch in batches {
            assert_eq!(batch.key_bytes, 6 * key_cost);
            assert!(batch.key_bytes <= 110);
            assert_eq!(batch.num_files(), 2);
            assert!(!batch.has_keys());
        }
        assert_eq!(state.states().len(), 4);
    }

    tablet.apply_rowset(&update, &manager).await.unwrap();
    assert!(live_rows(&tablet).await.iter().all(|(_, v1, _)| *v1 == Some(0)));
}

#[tokio::test]
async fn test_update_file_over_budget() {
    let tablet = new_tablet(UpdateConfig::default().with_pk_batch_memory_limit(60));
    let manager = UpdateManager::new(tablet.config());
    let ids = (0..8).collect::<Vec<i64>>();
    let update = commit_v1_update(&tablet, &[v1_updates(&ids, &ids)]).await;

    let err = manager.preload(&tablet, &update).await.unwrap_err();
    assert!(matches!(err, Error::ResourceExhausted { .. }), "{err}");
}

#[tokio::test]
async fn test_duplicate_inserts_across_batches() {
    let tablet = new_tablet(UpdateConfig::default().with_pk_batch_memory_limit(40));
    let manager = UpdateManager::new(tablet.config());

    let update = commit_v1_update(
        &tablet,
        &[v1_updates(&[9, 8], &[1, 2]), v1_updates(&[9], &[3])],
    )
    .await;
    tablet.apply_rowset(&update, &manager).await.unwrap();

    let rssid = update.rssid.unwrap();
    let dv = tablet.latest_del_vec(rssid).unwrap().unwrap();
    assert!(dv.contains(0));
    assert_eq!(dv.cardinality(), 1);
    assert_eq!(
        live_rows(&tablet).await,
        vec![(8, Some(2), None), (9, Some(3), None)]
    );
    assert_eq!(
        tablet.lookup(&key_batch(&[9])).unwrap()[0],
        Some(RssRowId::new_from_parts(rssid + 1, 0))
    );
}

#[tokio::test]
async fn test_insert_without_default_fails() {
    let schema = TabletSchema::try_new(
        1,
        vec![
            TabletColumn::key(0, "id", DataType::Int64),
            TabletColumn::new(1, "v1", DataType::Int64),
            TabletColumn::new(2, "v2", DataType::Utf8).with_nullable(false),
        ],
    )
    .unwrap();
    let tablet = open_tablet(schema, Arc::new(InMemory::new()), UpdateConfig::default());
    let manager = UpdateManager::new(tablet.config());

    let base = tablet
        .write_rowset(&[RecordBatch::try_new(
            tablet.schema().arrow_schema(),
            vec![
                Arc::new(Int64Array::from(vec![1])),
                Arc::new(Int64Array::from(vec![10])),
                Arc::new(StringArray::from(vec!["a"])),
            ],
        )
        .unwrap()])
        .await
        .unwrap();
    let base = tablet.commit_rowset(base).unwrap();
    tablet.apply_rowset(&base, &manager).await.unwrap();

    let update = commit_v1_update(&tablet, &[v1_updates(&[1, 2], &[11, 12])]).await;
    let err = tablet.apply_rowset(&update, &manager).await.unwrap_err();
    assert!(matches!(err, Error::SchemaViolation { .. }), "{err}");
    assert_eq!(tablet.latest_applied_version().unwrap(), EditVersion::new(2, 0));
    assert_eq!(tablet.index().key_count(), 1);
}

#[tokio::test]
async fn test_update_file_without_key_column() {
    let tablet = new_tablet(UpdateConfig::default());
    let manager = UpdateManager::new(tablet.config());

    let mut rowset = RowsetMeta::new(
        RowsetId::random(),
        RowsetKind::ColumnPartialUpdate {
            column_ids: vec![1],
        },
    );
    let schema = Schema::new(vec![Field::new("v1", DataType::Int64, true)]);
    let batch = RecordBatch::try_new(
        Arc::new(schema.clone()),
        vec![Arc::new(Int64Array::from(vec![1, 2]))],
    )
    .unwrap();
    let file = write_segment_file(
        tablet.store().as_ref(),
        tablet.base_path(),
        &update_file_name(&rowset.rowset_id, 0),
        &schema,
        &[batch],
        true,
    )
    .await
    .unwrap();
    rowset.update_files.push(file);
    let rowset = tablet.commit_rowset(rowset).unwrap();

    let err = manager.preload(&tablet, &rowset).await.unwrap_err();
    assert!(matches!(err, Error::SchemaViolation { .. }), "{err}");
}

#[test_log::test(tokio::test)]
async fn test_failed_delta_write_leaves_tablet_unchanged() {
    let policy = Arc::new(Mutex::new(ProxyObjectStorePolicy::new()));
    let store = Arc::new(ProxyObjectStore::new(
        Arc::new(InMemory::new()),
        policy.clone(),
    ));
    let tablet = open_tablet(tablet_schema(), store, UpdateConfig::default());
    let manager = UpdateManager::new(tablet.config());
    apply_full(&tablet, &manager, &[1, 2]).await;

    let update = commit_v1_update(&tablet, &[v1_updates(&[2, 5], &[20, 50])]).await;
    manager.preload(&tablet, &update).await.unwrap();

    policy.lock().unwrap().set_before_policy(
        "fail_delta_columns",
        Arc::new(|method: &str, path: &Path| {
            if method == "put" && path.as_ref().ends_with(".cols") {
                Err(Error::io("injected failure", location!()))
            } else {
                Ok(())
            }
        }),
    );
    let version = tablet.latest_applied_version().unwrap();
    let rows = live_rows(&tablet).await;
    assert!(tablet.apply_rowset(&update, &manager).await.is_err());

    assert_eq!(tablet.latest_applied_version().unwrap(), version);
    assert_eq!(live_rows(&tablet).await, rows);
    assert!(tablet.delta_column_groups(0).unwrap().is_empty());
    assert_eq!(tablet.index().key_count(), 2);
    assert!(tablet.lookup(&key_batch(&[5])).unwrap()[0].is_none());
    assert!(manager.get(&tablet, &update).is_none());

    // the rowset is still pending and applies once the store recovers
    policy
        .lock()
        .unwrap()
        .clear_before_policy("fail_delta_columns");
    tablet.apply_rowset(&update, &manager).await.unwrap();
    assert_eq!(
        live_rows(&tablet).await,
        vec![row(1, 10, Some("s1")), row(2, 20, Some("s2")), (5, Some(50), None)]
    );
}

#[tokio::test]
async fn test_local_filesystem_tablet() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(LocalFileSystem::new_with_prefix(dir.path()).unwrap());
    let tablet = open_tablet(tablet_schema(), store, UpdateConfig::default());
    let manager = UpdateManager::new(tablet.config());
    apply_full(&tablet, &manager, &[1, 2, 3]).await;

    let update = commit_v1_update(&tablet, &[v1_updates(&[3, 4], &[33, 44])]).await;
    tablet.apply_rowset(&update, &manager).await.unwrap();

    let dcgs = tablet.delta_column_groups(0).unwrap();
    let delta_path = dir
        .path()
        .join("tablets/t1")
        .join(&dcgs[0].files[0].path);
    assert!(delta_path.exists());
    assert_eq!(
        live_rows(&tablet).await,
        vec![
            row(1, 10, Some("s1")),
            row(2, 20, Some("s2")),
            row(3, 33, Some("s3")),
            (4, Some(44), None),
        ]
    );
}
