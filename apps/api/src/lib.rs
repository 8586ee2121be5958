//! Conductor API - the illustrative HTTP surface of the workflow revision
//! store and execution engine.
//!
//! Per the external interface contract, this transport is deliberately
//! thin: handlers translate HTTP in/out of the Use-Case Layer and map
//! domain errors onto the error taxonomy, with no business logic of
//! their own.

pub mod error;
pub mod openapi;
pub mod routes;

pub use error::ApiError;
pub use openapi::ApiDoc;
