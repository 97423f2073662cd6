use crate::config::{DataStoreConfig, SessionContext};
use crate::errors::{DataStoreError, DataStoreResult};
use crate::pages::{PageLayout, Pages};
use crate::request::RequestBuilder;
use crate::response::parse_store_record;
use crate::store::{DataStore, OrderedDataStore, StoreCore};
use crate::transport::{DataStoreTransport, ReqwestTransport};
use crate::types::{DEFAULT_SCOPE, ProtocolGeneration, StoreIdentity, StoreRecord};
use crate::validation;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StoreOptions {
    /// Keys carry their own `scope/` prefix; the store has no scope.
    pub all_scopes: bool,
    /// Overrides the configured generation for this store.
    pub generation: Option<ProtocolGeneration>,
}

type StoreKey = (String, String);

/// Hands out one store instance per `(name, scope)` and kind. Options given
/// on the first request for a pair stick for the registry's lifetime.
pub struct DataStoreRegistry {
    config: Arc<DataStoreConfig>,
    transport: Arc<dyn DataStoreTransport>,
    builder: RequestBuilder,
    standard: Mutex<HashMap<StoreKey, Arc<DataStore>>>,
    ordered: Mutex<HashMap<StoreKey, Arc<OrderedDataStore>>>,
    legacy: OnceLock<Arc<DataStore>>,
}

impl std::fmt::Debug for DataStoreRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataStoreRegistry")
            .field("generation", &self.config.generation)
            .finish_non_exhaustive()
    }
}

impl DataStoreRegistry {
    pub fn new(
        config: DataStoreConfig,
        session: SessionContext,
        transport: Arc<dyn DataStoreTransport>,
    ) -> Self {
        let config = Arc::new(config);
        let builder = RequestBuilder::new(Arc::clone(&config), Arc::new(session));
        Self {
            config,
            transport,
            builder,
            standard: Mutex::new(HashMap::new()),
            ordered: Mutex::new(HashMap::new()),
            legacy: OnceLock::new(),
        }
    }

    /// A registry speaking HTTP through reqwest.
    pub fn connect(config: DataStoreConfig, session: SessionContext) -> DataStoreResult<Self> {
        let transport = ReqwestTransport::new(&config)?;
        Ok(Self::new(config, session, Arc::new(transport)))
    }

    pub fn config(&self) -> &DataStoreConfig {
        &self.config
    }

    pub fn get_store(
        &self,
        name: &str,
        scope: Option<&str>,
        options: StoreOptions,
    ) -> DataStoreResult<Arc<DataStore>> {
        validation::ensure_access(&self.config)?;
        validation::validate_store_name(&self.config, name)?;
        let scope = if options.all_scopes {
            if scope.is_some_and(|scope| !scope.is_empty()) {
                return Err(DataStoreError::InvalidArgument(
                    "all-scopes stores take their scope from each key".to_string(),
                ));
            }
            ""
        } else {
            let scope = scope.unwrap_or(DEFAULT_SCOPE);
            validation::validate_scope(&self.config, scope)?;
            scope
        };

        let mut stores = self.standard.lock().unwrap_or_else(PoisonError::into_inner);
        let store = stores
            .entry((name.to_string(), scope.to_string()))
            .or_insert_with(|| {
                tracing::debug!(name, scope, all_scopes = options.all_scopes, "opening data store");
                let identity = StoreIdentity::standard(
                    name,
                    scope,
                    options.all_scopes,
                    options.generation.unwrap_or(self.config.generation),
                );
                Arc::new(DataStore::new(self.core(identity)))
            });
        Ok(Arc::clone(store))
    }

    pub fn get_ordered_store(
        &self,
        name: &str,
        scope: Option<&str>,
    ) -> DataStoreResult<Arc<OrderedDataStore>> {
        validation::ensure_access(&self.config)?;
        validation::validate_store_name(&self.config, name)?;
        let scope = scope.unwrap_or(DEFAULT_SCOPE);
        validation::validate_scope(&self.config, scope)?;

        let mut stores = self.ordered.lock().unwrap_or_else(PoisonError::into_inner);
        let store = stores
            .entry((name.to_string(), scope.to_string()))
            .or_insert_with(|| {
                tracing::debug!(name, scope, "opening ordered data store");
                let identity = StoreIdentity::ordered(name, scope, self.config.generation);
                Arc::new(OrderedDataStore::new(self.core(identity)))
            });
        Ok(Arc::clone(store))
    }

    /// The unnamed store every place has.
    pub fn get_legacy_store(&self) -> DataStoreResult<Arc<DataStore>> {
        validation::ensure_access(&self.config)?;
        let store = self
            .legacy
            .get_or_init(|| Arc::new(DataStore::new(self.core(StoreIdentity::legacy()))));
        Ok(Arc::clone(store))
    }

    /// Standard data stores of the universe, by name.
    pub async fn list_stores(
        &self,
        prefix: Option<&str>,
        page_size: usize,
    ) -> DataStoreResult<Pages<StoreRecord>> {
        validation::ensure_access(&self.config)?;
        validation::ensure_page_size(&self.config, page_size)?;
        let base = self.builder.list_stores(prefix, page_size)?;
        Pages::open(
            Arc::clone(&self.transport),
            base,
            PageLayout::new("datastores", "lastReturnedKey"),
            parse_store_record,
        )
        .await
    }

    fn core(&self, identity: StoreIdentity) -> StoreCore {
        StoreCore::new(
            identity,
            Arc::clone(&self.config),
            self.builder.clone(),
            Arc::clone(&self.transport),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockDataStore;

    fn registry() -> DataStoreRegistry {
        DataStoreRegistry::new(
            DataStoreConfig::default(),
            SessionContext::new("cookie", 1, 2),
            Arc::new(MockDataStore::new()),
        )
    }

    #[test]
    fn get_store_same_name_and_scope_expected_same_instance() {
        let registry = registry();
        let first = registry
            .get_store("players", None, StoreOptions::default())
            .expect("store should open");
        let second = registry
            .get_store("players", Some("global"), StoreOptions::default())
            .expect("store should open");
        let other_scope = registry
            .get_store("players", Some("season1"), StoreOptions::default())
            .expect("store should open");
        assert!(Arc::ptr_eq(&first, &second));
        assert!(!Arc::ptr_eq(&first, &other_scope));
    }

    #[test]
    fn get_store_first_options_win_expected_cached_generation() {
        let registry = registry();
        let first = registry
            .get_store(
                "players",
                None,
                StoreOptions {
                    all_scopes: false,
                    generation: Some(ProtocolGeneration::V1),
                },
            )
            .expect("store should open");
        let second = registry
            .get_store("players", None, StoreOptions::default())
            .expect("store should open");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.identity().generation(), ProtocolGeneration::V1);
    }

    #[test]
    fn ordered_and_standard_stores_expected_separate_caches() {
        let registry = registry();
        let ordered = registry
            .get_ordered_store("points", None)
            .expect("ordered store should open");
        let again = registry
            .get_ordered_store("points", Some("global"))
            .expect("ordered store should open");
        assert!(Arc::ptr_eq(&ordered, &again));
        assert!(ordered.identity().is_ordered());
        let standard = registry
            .get_store("points", None, StoreOptions::default())
            .expect("standard store should open");
        assert!(!standard.identity().is_ordered());
    }

    #[test]
    fn legacy_store_expected_singleton_distinct_from_named_stores() {
        let registry = registry();
        let legacy = registry.get_legacy_store().expect("legacy store");
        let again = registry.get_legacy_store().expect("legacy store");
        assert!(Arc::ptr_eq(&legacy, &again));
        assert!(legacy.identity().is_legacy());
        assert_eq!(legacy.identity().generation(), ProtocolGeneration::Legacy);
    }

    #[test]
    fn get_store_all_scopes_with_scope_expected_invalid_argument() {
        let error = registry()
            .get_store(
                "players",
                Some("global"),
                StoreOptions {
                    all_scopes: true,
                    generation: None,
                },
            )
            .expect_err("scope and all-scopes conflict");
        assert_eq!(error.code(), 100);
    }

    #[test]
    fn get_store_api_access_disabled_expected_rejected() {
        let registry = DataStoreRegistry::new(
            DataStoreConfig {
                api_access_enabled: false,
                ..DataStoreConfig::default()
            },
            SessionContext::new("cookie", 1, 2),
            Arc::new(MockDataStore::new()),
        );
        assert_eq!(
            registry
                .get_store("players", None, StoreOptions::default())
                .expect_err("access is disabled"),
            DataStoreError::ApiAccessDisabled
        );
    }

    #[test]
    fn get_store_long_name_expected_invalid_argument() {
        let error = registry()
            .get_store(&"n".repeat(51), None, StoreOptions::default())
            .expect_err("name is too long");
        assert!(matches!(error, DataStoreError::InvalidArgument(_)));
    }
}
