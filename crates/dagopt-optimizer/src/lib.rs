#![forbid(unsafe_code)]
//! dagopt-optimizer: cost-based physical plan selection for logical
//! dataflow DAGs.
//!
//! Pipeline of one run:
//! - `graph`: validate the `LogicalDag` and build the optimizer graph
//!   (synthetic unions, sink joiners, resolved hints)
//! - `stats`: record count, key cardinality and size estimates
//! - `branches`: fork/reconvergence bookkeeping
//! - `interesting`: physical properties consumers would benefit from
//! - `enumerate` + `prune`: candidate plans per node, bottom-up
//! - `compiler`: ranking at the root, `explain` for inspection
//!
//! All passes are synchronous graph traversals; one `Optimizer` can be
//! reused for any number of runs, nothing carries over between them.

pub mod branches;
pub mod compiler;
pub mod cost;
pub mod dsl;
pub mod enumerate;
pub mod explain;
pub mod graph;
pub mod hints;
pub mod interesting;
pub mod operators;
pub mod plan;
pub mod properties;
pub mod prune;
pub mod stats;

pub use compiler::{optimize, OptimizedPlan, Optimizer, RankedPlan};
pub use cost::{CostModel, Costs, DefaultCostModel};
pub use dsl::yaml::{parse_yaml_dag, ParsedDag};
pub use enumerate::{EnumerationStats, Enumerator};
pub use explain::PlanDescription;
pub use graph::{NodeKind, OptimizerGraph, OptimizerNode};
pub use plan::{Channel, DriverStrategy, LocalStrategy, PlanNode, ShipStrategy};
pub use properties::{GlobalProperties, InterestingProperties, LocalProperties};
pub use stats::Estimates;
