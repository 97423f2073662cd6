#![doc = r#"
Client for remote key/value data stores spoken over three wire generations.

Operation mapping:

| Facade method | Legacy | V1 | V2 |
| --- | --- | --- | --- |
| `DataStore::get` | `GET getV2` | `GET /{type}` | `GET /datastores/objects/object` |
| `DataStore::set` | `POST set` | `POST /{type}` | `POST /datastores/objects/object` |
| `DataStore::update` | `POST set` + `expectedValue` | `POST /{type}` + `usn` | `POST .../object` + `If-Match` |
| `DataStore::increment` | `POST increment` | `POST /{type}/increment` | `POST .../object/increment` |
| `DataStore::remove` | `POST remove` | `POST /{type}/remove` | `DELETE .../object` |
| `DataStore::get_version` | - | - | `GET .../object?version` |
| `DataStore::remove_version` | - | - | `DELETE .../object?version` |
| `DataStore::list_keys` | - | - | `GET /datastores/objects` |
| `DataStore::list_versions` | - | - | `GET .../object/versions` |
| `OrderedDataStore::get_sorted` | `GET getSortedValues` | `GET /sorted/list` | `GET /sorted/list` |
| `DataStoreRegistry::list_stores` | - | - | `GET /datastores` |

Implementation notes:
- Version tokens (V2 `etag`, V1 `roblox-usn`) stay opaque and are echoed back verbatim as write preconditions.
- `update` performs exactly one conditional write; a stale precondition surfaces as `DataStoreError::VersionConflict`.
- Listings fetch their first page eagerly and advance with `exclusiveStartKey`.
- Ordered stores always speak the `sorted` endpoints of V1 unless the store is on the legacy generation.
"#]

pub mod codec;
pub mod config;
pub mod errors;
pub mod events;
pub mod pages;
pub mod registry;
pub mod request;
pub mod response;
pub mod store;
pub mod testing;
pub mod transport;
pub mod types;
pub mod update;
pub mod validation;

pub use codec::{DecodeFailure, NotSerializable, Payload, decode_with_policy, deserialize, serialize};
pub use config::{DataStoreConfig, SessionContext};
pub use errors::{DataStoreError, DataStoreResult};
pub use events::{UpdateEvent, UpdateSubscription};
pub use pages::{Advance, PageState, Pages};
pub use registry::{DataStoreRegistry, StoreOptions};
pub use request::{Precondition, RequestBuilder, SortedQuery, VersionQuery, WireRequest};
pub use response::WireResponse;
pub use store::{DataStore, OrderedDataStore};
pub use testing::MockDataStore;
pub use transport::{DataStoreTransport, ReqwestTransport, TransportError};
pub use types::{
    DEFAULT_SCOPE, KeyInfo, KeyRecord, LEGACY_STORE_NAME, ProtocolGeneration, SortDirection,
    SortedEntry, StoreIdentity, StoreKind, StoreRecord, StoredValue, UpdateOutcome,
    VersionRecord, WriteOptions,
};
