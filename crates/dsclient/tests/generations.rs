use dsclient::{
    DataStore, DataStoreConfig, DataStoreError, DataStoreRegistry, DataStoreResult, MockDataStore,
    ProtocolGeneration, SessionContext, StoreKind, StoreOptions, UpdateOutcome, WriteOptions,
};
use serde_json::json;
use std::sync::Arc;

const GENERATIONS: [ProtocolGeneration; 3] = [
    ProtocolGeneration::Legacy,
    ProtocolGeneration::V1,
    ProtocolGeneration::V2,
];

fn registry_for(mock: &MockDataStore, generation: ProtocolGeneration) -> DataStoreRegistry {
    DataStoreRegistry::new(
        DataStoreConfig {
            generation,
            ..DataStoreConfig::default()
        },
        SessionContext::new("cookie", 7, 8),
        Arc::new(mock.clone()),
    )
}

async fn exercise_basic_cycle(store: &DataStore) -> DataStoreResult<()> {
    assert_eq!(store.get("visits").await?, None);

    store
        .set("visits", &json!({"count": 1}), &WriteOptions::default())
        .await?;
    let read = store.get("visits").await?.expect("value should exist");
    assert_eq!(read.value, json!({"count": 1}));

    let updated = store
        .update("visits", |previous, _| {
            let count = previous?.get("count")?.as_i64()?;
            Some(UpdateOutcome::value(json!({"count": count + 1})))
        })
        .await?;
    assert_eq!(updated.value, json!({"count": 2}));

    let total = store
        .increment("total", 4, &WriteOptions::default())
        .await?;
    assert_eq!(total.value, json!(4));
    let total = store
        .increment("total", -1, &WriteOptions::default())
        .await?;
    assert_eq!(total.value, json!(3));

    let removed = store.remove("visits").await?.expect("previous value");
    assert_eq!(removed.value, json!({"count": 2}));
    assert_eq!(store.get("visits").await?, None);
    assert_eq!(store.remove("visits").await?, None);
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn named_store_basic_cycle_expected_same_behavior_per_generation() {
    for generation in GENERATIONS {
        let mock = MockDataStore::new();
        let store = registry_for(&mock, generation)
            .get_store("players", None, StoreOptions::default())
            .expect("store should open");
        exercise_basic_cycle(&store)
            .await
            .unwrap_or_else(|err| panic!("{} cycle failed: {err}", generation.as_str()));
    }
}

#[tokio::test(flavor = "current_thread")]
async fn legacy_store_basic_cycle_expected_unnamed_addressing() {
    let mock = MockDataStore::new();
    let store = registry_for(&mock, ProtocolGeneration::V2)
        .get_legacy_store()
        .expect("legacy store should open");
    exercise_basic_cycle(&store)
        .await
        .expect("legacy cycle should succeed");

    let set = mock
        .requests()
        .into_iter()
        .find(|request| request.url.contains("/persistence/set?"))
        .expect("legacy set should be recorded");
    assert_eq!(set.query_value("key").as_deref(), Some("visits"));
    assert_eq!(set.query_value("target").as_deref(), Some(""));
    assert_eq!(
        mock.stored_raw("", StoreKind::Standard, "global/total").as_deref(),
        Some("3")
    );
}

#[tokio::test(flavor = "current_thread")]
async fn ordered_store_per_generation_expected_sorted_routes() {
    for (generation, route) in [
        (ProtocolGeneration::Legacy, "/persistence/getSortedValues?"),
        (ProtocolGeneration::V1, "/v1/persistence/sorted/list?"),
        (ProtocolGeneration::V2, "/v1/persistence/sorted/list?"),
    ] {
        let mock = MockDataStore::new();
        let ordered = registry_for(&mock, generation)
            .get_ordered_store("points", None)
            .expect("ordered store should open");
        ordered.set("a", &5).await.expect("set should succeed");
        ordered.increment("b", 7).await.expect("increment should succeed");
        ordered
            .update("a", |previous, info| {
                assert!(info.is_none());
                let value = previous?.as_i64()?;
                Some(UpdateOutcome::value(json!(value * 2)))
            })
            .await
            .expect("update should succeed");

        let entries = ordered
            .get_sorted(false, 10, None, None)
            .await
            .expect("listing should open")
            .collect_remaining()
            .await
            .expect("drain");
        let pairs: Vec<(String, i64)> = entries
            .into_iter()
            .map(|entry| (entry.key, entry.value.as_i64().unwrap_or_default()))
            .collect();
        assert_eq!(
            pairs,
            vec![("a".to_string(), 10), ("b".to_string(), 7)],
            "generation {}",
            generation.as_str()
        );
        assert!(
            mock.requests()
                .iter()
                .any(|request| request.url.contains(route)),
            "generation {} should use {route}",
            generation.as_str()
        );
    }
}

#[tokio::test(flavor = "current_thread")]
async fn v2_only_operations_on_v1_store_expected_invalid_argument() {
    let mock = MockDataStore::new();
    let store = registry_for(&mock, ProtocolGeneration::V1)
        .get_store("players", None, StoreOptions::default())
        .expect("store should open");

    let error = store
        .get_version("a", "v1")
        .await
        .expect_err("v1 has no versions");
    assert!(matches!(error, DataStoreError::InvalidArgument(_)));
    let error = store
        .list_keys("", 10)
        .await
        .expect_err("v1 has no key listing");
    assert!(matches!(error, DataStoreError::InvalidArgument(_)));
    assert!(mock.requests().is_empty());
}

#[tokio::test(flavor = "current_thread")]
async fn legacy_value_limit_expected_smaller_than_v2() {
    let mock = MockDataStore::new();
    let registry = registry_for(&mock, ProtocolGeneration::Legacy);
    let store = registry
        .get_store("players", None, StoreOptions::default())
        .expect("store should open");
    let payload = "x".repeat(300_000);

    let error = store
        .set("big", &payload, &WriteOptions::default())
        .await
        .expect_err("legacy limit is 260000 bytes");
    assert!(matches!(
        error,
        DataStoreError::ValueTooLarge { limit: 260_000, .. }
    ));

    let v2 = registry
        .get_store(
            "players",
            Some("other"),
            StoreOptions {
                all_scopes: false,
                generation: Some(ProtocolGeneration::V2),
            },
        )
        .expect("store should open");
    v2.set("big", &payload, &WriteOptions::default())
        .await
        .expect("v2 accepts up to 4 MiB");
}
