pub mod change_listener;
pub mod codec;
pub mod config;
pub mod error;
pub mod events;
pub mod ha;
pub mod memento;
pub mod persister;
pub mod rebind;
pub mod runtime;
pub mod state_machine;
pub mod store;

pub use change_listener::{
    EntityChangeListener, EntityDeltaTracker, MementoSource, NoopEntityChangeListener,
    PeriodicDeltaChangeListener,
};
pub use codec::MementoCodec;
pub use config::{PersistenceConfig, StoreConfig};
pub use error::{PersistError, Result};
pub use events::{EventBus, PersistenceEvent};
pub use ha::{
    ElectionStateMachine, HaDelta, HaEvent, InMemorySyncRecordPersister,
    ManagementNodeSyncRecord, ManagementPlaneSyncRecord, MasterChange, NodeStatus,
    ObjectStoreSyncRecordPersister, SyncRecordPersister,
};
pub use memento::{
    EntityMemento, LocationMemento, Memento, MementoDelta, MementoGraph, MementoKind,
    PolicyMemento,
};
pub use persister::{MementoPersister, ObjectStoreMementoPersister};
pub use rebind::{LookupContext, RebindGraph, RebindResolver};
pub use runtime::PersistenceRuntime;
pub use state_machine::StateMachine;
pub use store::{InMemoryObjectStore, ObjectStore, RocksDbObjectStore};
