pub mod record;
pub mod store;

pub use record::{PersistenceRecord, PersistenceRequest};
pub use store::{DocumentStore, JsonFileStore, MemoryStore, RecordQuery, StoredRecord, UpsertOutcome};
