//! Built-in step kinds registered unconditionally at startup.

pub mod if_step;
pub mod log_task;
pub mod sequence;

use crate::registry::{RegistryError, StepRegistry};

pub fn register_builtins(registry: &mut StepRegistry) -> Result<(), RegistryError> {
    registry.register(
        "Sequence",
        sequence::decode,
        sequence::encode,
        sequence::executor,
        true,
        "Run child steps in order",
    )?;
    registry.register(
        "If",
        if_step::decode,
        if_step::encode,
        if_step::executor,
        true,
        "Branch on a condition",
    )?;
    registry.register(
        "LogTask",
        log_task::decode,
        log_task::encode,
        log_task::executor,
        false,
        "Emit a log line",
    )?;
    Ok(())
}
