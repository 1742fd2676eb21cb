//! Status management for TriggerMesh kinds.

mod conditions;
#[cfg(test)]
mod conditions_test;
mod lifecycle;

pub use conditions::{Condition, ConditionManager, ConditionSet, ConditionSeverity, ConditionStatus, ConditionedStatus, CONDITION_READY};
pub use lifecycle::*;
