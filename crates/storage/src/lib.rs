pub mod change;
pub mod error;
pub mod memory;
pub mod store;

pub use common::EntityId;
pub use change::{ChangeIntent, ChangeRecord, ChangeRecordBuilder, validate_changes_for_apply};
pub use error::{Result, StorageError};
pub use memory::InMemoryStorage;
pub use store::{StorageProvider, StorageProviderExt, StoredState};
