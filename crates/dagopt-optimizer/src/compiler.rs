//! The optimizer entry point: graph building, the analysis passes, and
//! enumeration from the root, ending in a ranked set of plans.

use std::cmp::Ordering;
use std::rc::Rc;

use dagopt_core::config::OptimizerConfig;
use dagopt_core::error::{CompilerError, Result};
use dagopt_core::hash::Fingerprint;
use dagopt_core::operator::LogicalDag;
use tracing::{debug, info};

use crate::branches;
use crate::cost::{CostModel, DefaultCostModel};
use crate::enumerate::{EnumerationStats, Enumerator};
use crate::explain::PlanDescription;
use crate::graph::OptimizerGraph;
use crate::interesting;
use crate::plan::PlanNode;
use crate::stats::{self, Estimates};

pub struct Optimizer {
    config: OptimizerConfig,
    cost_model: Box<dyn CostModel>,
}

impl Optimizer {
    /// Optimizer pricing plans with `DefaultCostModel` and the configured weights.
    pub fn new(config: OptimizerConfig) -> Result<Self> {
        let cost_model = Box::new(DefaultCostModel::new(config.cost_weights));
        Self::with_cost_model(config, cost_model)
    }

    pub fn with_cost_model(config: OptimizerConfig, cost_model: Box<dyn CostModel>) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, cost_model })
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Build the graph and run the statistics, branch and property passes.
    pub fn prepare(&self, dag: &LogicalDag) -> Result<OptimizerGraph> {
        let mut graph = OptimizerGraph::build(dag, &self.config)?;
        stats::estimate(&mut graph);
        branches::track(&mut graph);
        interesting::propagate(&mut graph, self.cost_model.as_ref());
        debug!(nodes = graph.nodes().len(), "prepared optimizer graph");
        Ok(graph)
    }

    pub fn optimize(&self, dag: &LogicalDag) -> Result<OptimizedPlan> {
        let graph = self.prepare(dag)?;

        let (roots, stats) = {
            let mut enumerator = Enumerator::new(&graph, &self.config, self.cost_model.as_ref());
            let roots = enumerator.candidates(graph.root())?;
            (roots, enumerator.into_stats())
        };

        let mut ranked: Vec<RankedPlan> = roots
            .iter()
            .map(|plan| RankedPlan {
                total_cost: self.cost_model.total(&plan.cumulative_cost),
                plan: Rc::clone(plan),
            })
            .collect();
        // Stable: equal and unknown costs keep enumeration order.
        ranked.sort_by(|a, b| compare_costs(a.total_cost, b.total_cost));

        let best = ranked
            .first()
            .map(|r| Rc::clone(&r.plan))
            .ok_or_else(|| CompilerError::NoFeasiblePlan {
                node: graph.node(graph.root()).name.clone(),
            })?;
        ranked.truncate(self.config.max_ranked_plans);

        info!(
            candidates = stats.candidates_created,
            pruned = stats.candidates_pruned,
            budget_exhausted = stats.budget_exhausted,
            total_cost = ?ranked[0].total_cost,
            "optimized plan"
        );

        Ok(OptimizedPlan {
            graph,
            best,
            ranked,
            stats,
            weights: self.config.cost_weights,
        })
    }
}

/// Known costs ascending, unknown last.
fn compare_costs(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => x.total_cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

#[derive(Debug, Clone)]
pub struct RankedPlan {
    pub plan: Rc<PlanNode>,
    /// Weighted total; `None` when some statistic was unknown.
    pub total_cost: Option<f64>,
}

#[derive(Debug)]
pub struct OptimizedPlan {
    graph: OptimizerGraph,
    best: Rc<PlanNode>,
    ranked: Vec<RankedPlan>,
    stats: EnumerationStats,
    weights: dagopt_core::config::CostWeights,
}

impl OptimizedPlan {
    pub fn best(&self) -> &Rc<PlanNode> {
        &self.best
    }

    pub fn total_cost(&self) -> Option<f64> {
        self.ranked.first().and_then(|r| r.total_cost)
    }

    pub fn ranked(&self) -> &[RankedPlan] {
        &self.ranked
    }

    pub fn stats(&self) -> &EnumerationStats {
        &self.stats
    }

    /// The analysed graph, with estimates and requested properties per node.
    pub fn graph(&self) -> &OptimizerGraph {
        &self.graph
    }

    pub fn estimates(&self, node: &str) -> Option<&Estimates> {
        self.graph.node_by_name(node).map(|n| &n.estimates)
    }

    pub fn description(&self) -> PlanDescription {
        PlanDescription::from_plan(&self.best, &self.graph, &self.weights)
    }

    pub fn fingerprint(&self) -> Result<Fingerprint> {
        self.description().fingerprint()
    }

    pub fn explain(&self) -> String {
        self.description().explain()
    }
}

/// One-shot convenience around `Optimizer`.
pub fn optimize(dag: &LogicalDag, config: OptimizerConfig) -> Result<OptimizedPlan> {
    Optimizer::new(config)?.optimize(dag)
}
