//! Convenient re-exports for downstream crates.

pub use crate::config::{CostWeights, OptimizerConfig};
pub use crate::error::{CompilerError, Result};
pub use crate::hash::Fingerprint;
pub use crate::id::{ConnectionId, NodeId, OpId, PlanId};
pub use crate::operator::{
    CompilerHints, LogicalDag, LogicalOperator, OperatorKind, OutputContract, SourceSpec,
    SourceStatistics,
};
