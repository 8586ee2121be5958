//! Conductor Store - the Revision Store and Execution Store: durable,
//! optimistically-locked persistence for workflow revisions and the
//! append-only log of their executions.

pub mod execution_store;
pub mod memory;
pub mod pagination;
pub mod pg_execution_store;
pub mod pg_revision_store;
pub mod pool;
pub mod revision_store;

pub use execution_store::{ExecutionStore, ExecutionStoreError};
pub use memory::{InMemoryExecutionStore, InMemoryRevisionStore};
pub use pagination::{Page, Pagination, SortOrder};
pub use pg_execution_store::PgExecutionStore;
pub use pg_revision_store::PgRevisionStore;
pub use pool::connect;
pub use revision_store::{RevisionStore, RevisionStoreError};
