// Durable persistence for pipeline executions with optimistic locking

pub mod memory;
pub mod models;
pub mod postgres;
pub mod store;

pub use memory::MemoryStore;
pub use models::*;
pub use postgres::{run_migrations, PostgresStore};
pub use store::{PipelineStore, StoreError};
