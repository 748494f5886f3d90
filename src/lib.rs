#![forbid(unsafe_code)]
//! dagopt: choose physical execution plans for dataflow DAGs.
//!
//! ```no_run
//! use dagopt::prelude::*;
//!
//! let dag = LogicalDag::new()
//!     .with(LogicalOperator::source(1, "events", SourceSpec::default()))
//!     .with(LogicalOperator::new(2, "per_user", OperatorKind::Reduce).with_input(&[1]).with_keys(&[0]))
//!     .with(LogicalOperator::new(3, "out", OperatorKind::Sink).with_input(&[2]));
//! let plan = Optimizer::new(OptimizerConfig::from_env())?.optimize(&dag)?;
//! println!("{}", plan.explain());
//! # Ok::<(), CompilerError>(())
//! ```

pub use dagopt_core as core;
pub use dagopt_optimizer as optimizer;

pub mod prelude {
    pub use dagopt_core::prelude::*;
    pub use dagopt_optimizer::{
        optimize, parse_yaml_dag, OptimizedPlan, Optimizer, PlanDescription,
    };
}

use dagopt_core::config::OptimizerConfig;
use dagopt_core::error::Result;
use dagopt_optimizer::OptimizedPlan;
use tracing::debug;

/// Optimize a YAML DAG document; document overrides apply on top of `base`.
pub fn optimize_yaml(src: &str, base: &OptimizerConfig) -> Result<OptimizedPlan> {
    let parsed = dagopt_optimizer::parse_yaml_dag(src)?;
    let config = parsed.config_over(base);
    debug!(operators = parsed.dag.len(), "loaded DAG document");
    dagopt_optimizer::optimize(&parsed.dag, config)
}
