//! Conductor Engine - the Step Model & Registry, Workflow Codec, Use-Case
//! Layer and Execution Engine.

pub mod codec;
pub mod condition;
pub mod engine;
pub mod execution_context;
pub mod executor;
pub mod registry;
pub mod steps;
pub mod usecase;

pub use codec::{parse_revision, require_updated_at, to_yaml, MetadataUpdate, ParseError};
pub use engine::{EngineError, ExecutionEngine};
pub use execution_context::{CancellationToken, ExecutionContext};
pub use executor::{ExecutorError, StepExecutor, StepOutcome};
pub use registry::{
    generic_leaf_decode, generic_leaf_encode, DecodeError, RegistryError, StepRegistry,
};
pub use usecase::{parse_updated_at_header, to_canonical_yaml, WorkflowError, WorkflowService};
