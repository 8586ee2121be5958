//! Conductor Domain - core identifiers, entities and enums shared by the
//! revision store and execution engine.

pub mod enums;
pub mod execution;
pub mod ids;
pub mod revision;
pub mod step;

pub use enums::*;
pub use execution::*;
pub use ids::*;
pub use revision::*;
pub use step::*;
