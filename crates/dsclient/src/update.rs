//! Optimistic read-transform-write.
//!
//! One update is one read and at most one conditional write. The write
//! carries what the read observed (V2 version, V1 USN, legacy raw payload),
//! so a concurrent writer in between turns it into
//! [`DataStoreError::VersionConflict`]. Retrying is left to the caller or
//! to [`run_update_with_retry`].

use crate::errors::{DataStoreError, DataStoreResult};
use crate::store::StoreCore;
use crate::types::{KeyInfo, StoredValue, UpdateOutcome, WriteOptions};
use serde_json::Value;

pub(crate) async fn run_update<F>(
    core: &StoreCore,
    key: &str,
    transform: F,
) -> DataStoreResult<StoredValue>
where
    F: FnOnce(Option<Value>, Option<&KeyInfo>) -> Option<UpdateOutcome> + Send,
{
    let resolved = core.resolve(key)?;
    let observed = core.read(&resolved).await?;
    let (previous, info) = match observed.stored {
        Some(stored) => (Some(stored.value), stored.info),
        None => (None, None),
    };

    let outcome = match transform(previous, info.as_ref()) {
        Some(outcome) if !outcome.value.is_null() => outcome,
        _ => {
            tracing::debug!(store = core.identity().name(), key, "update cancelled by transform");
            return Err(DataStoreError::UpdateCancelled);
        }
    };

    // Attributes the transform leaves out carry over from the current version.
    let options = WriteOptions {
        user_ids: outcome
            .user_ids
            .or_else(|| info.as_ref().map(|info| info.user_ids.clone()))
            .unwrap_or_default(),
        metadata: outcome
            .metadata
            .or_else(|| info.map(|info| info.metadata)),
    };

    match core
        .write(key, &resolved, outcome.value, &options, Some(&observed.precondition))
        .await
    {
        Err(DataStoreError::VersionConflict(message)) => {
            tracing::warn!(
                store = core.identity().name(),
                key,
                %message,
                "update lost a concurrent write race"
            );
            Err(DataStoreError::VersionConflict(message))
        }
        other => other,
    }
}

pub(crate) async fn run_update_with_retry<F>(
    core: &StoreCore,
    key: &str,
    attempts: usize,
    mut transform: F,
) -> DataStoreResult<StoredValue>
where
    F: FnMut(Option<Value>, Option<&KeyInfo>) -> Option<UpdateOutcome> + Send,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match run_update(core, key, |previous, info| transform(previous, info)).await {
            Err(DataStoreError::VersionConflict(_)) if attempt < attempts => {
                tracing::debug!(key, attempt, attempts, "retrying update after conflict");
                attempt += 1;
            }
            result => return result,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::config::{DataStoreConfig, SessionContext};
    use crate::errors::DataStoreError;
    use crate::registry::{DataStoreRegistry, StoreOptions};
    use crate::testing::MockDataStore;
    use crate::types::{ProtocolGeneration, StoreKind, UpdateOutcome, WriteOptions};
    use serde_json::{Map, Value, json};
    use std::sync::Arc;

    fn registry(mock: &MockDataStore) -> DataStoreRegistry {
        DataStoreRegistry::new(
            DataStoreConfig::default(),
            SessionContext::new("cookie", 1, 2),
            Arc::new(mock.clone()),
        )
    }

    fn store_options(generation: ProtocolGeneration) -> StoreOptions {
        StoreOptions {
            all_scopes: false,
            generation: Some(generation),
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn update_missing_key_expected_absent_precondition_per_generation() {
        for generation in [
            ProtocolGeneration::Legacy,
            ProtocolGeneration::V1,
            ProtocolGeneration::V2,
        ] {
            let mock = MockDataStore::new();
            let store = registry(&mock)
                .get_store("counters", None, store_options(generation))
                .expect("store should open");
            let stored = store
                .update("fresh", |previous, info| {
                    assert_eq!(previous, None);
                    assert!(info.is_none());
                    Some(UpdateOutcome::value(json!(1)))
                })
                .await
                .expect("update should succeed");
            assert_eq!(stored.value, json!(1), "generation {}", generation.as_str());
            assert_eq!(mock.write_requests().len(), 1);
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn update_with_concurrent_writer_expected_version_conflict() {
        for generation in [
            ProtocolGeneration::Legacy,
            ProtocolGeneration::V1,
            ProtocolGeneration::V2,
        ] {
            let mock = MockDataStore::new();
            let store = registry(&mock)
                .get_store("counters", None, store_options(generation))
                .expect("store should open");
            store
                .set("hits", &json!(1), &WriteOptions::default())
                .await
                .expect("seed should succeed");

            let racer = mock.clone();
            let error = store
                .update("hits", move |previous, _| {
                    racer.write_out_of_band("counters", StoreKind::Standard, "global/hits", "5");
                    previous.map(|value| UpdateOutcome::value(json!(value.as_i64().unwrap_or(0) + 1)))
                })
                .await
                .expect_err("stale precondition should conflict");
            assert!(
                matches!(error, DataStoreError::VersionConflict(_)),
                "generation {}: {error:?}",
                generation.as_str()
            );
            assert!(error.is_retryable());
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn update_with_retry_expected_second_attempt_lands() {
        let mock = MockDataStore::new();
        let store = registry(&mock)
            .get_store("counters", None, StoreOptions::default())
            .expect("store should open");
        store
            .set("hits", &json!(1), &WriteOptions::default())
            .await
            .expect("seed should succeed");

        let racer = mock.clone();
        let mut calls = 0;
        let stored = store
            .update_with_retry("hits", 3, |previous, _| {
                calls += 1;
                if calls == 1 {
                    racer.write_out_of_band("counters", StoreKind::Standard, "global/hits", "10");
                }
                previous.map(|value| UpdateOutcome::value(json!(value.as_i64().unwrap_or(0) + 1)))
            })
            .await
            .expect("second attempt should succeed");
        assert_eq!(stored.value, json!(11));
        assert_eq!(calls, 2);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn update_without_attributes_expected_previous_attributes_kept() {
        let mock = MockDataStore::new();
        let store = registry(&mock)
            .get_store("players", None, StoreOptions::default())
            .expect("store should open");
        let mut metadata = Map::new();
        metadata.insert("tier".to_string(), json!("gold"));
        store
            .set(
                "user/1",
                &json!({"coins": 1}),
                &WriteOptions::default().with_user_ids([42]).with_metadata(metadata.clone()),
            )
            .await
            .expect("seed should succeed");

        let stored = store
            .update("user/1", |_, _| Some(UpdateOutcome::value(json!({"coins": 2}))))
            .await
            .expect("update should succeed");
        let info = stored.info.expect("v2 writes report key info");
        assert_eq!(info.user_ids, vec![42]);
        assert_eq!(info.metadata, metadata);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn update_returning_null_expected_cancelled_without_write() {
        let mock = MockDataStore::new();
        let store = registry(&mock)
            .get_store("players", None, StoreOptions::default())
            .expect("store should open");
        store
            .set("user/1", &json!({"coins": 1}), &WriteOptions::default())
            .await
            .expect("seed should succeed");
        mock.clear_requests();

        let error = store
            .update("user/1", |_, _| Some(UpdateOutcome::value(Value::Null)))
            .await
            .expect_err("null means no value to write");
        assert_eq!(error, DataStoreError::UpdateCancelled);
        assert!(mock.write_requests().is_empty());
        assert_eq!(mock.requests().len(), 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn update_too_many_user_ids_expected_rejected_without_write() {
        let mock = MockDataStore::new();
        let store = registry(&mock)
            .get_store("players", None, StoreOptions::default())
            .expect("store should open");
        let error = store
            .update("user/1", |_, _| {
                Some(UpdateOutcome::value(json!(1)).with_user_ids([1, 2, 3, 4, 5]))
            })
            .await
            .expect_err("five user ids exceed the limit");
        assert_eq!(error.code(), 512);
        assert!(mock.write_requests().is_empty());
    }
}
