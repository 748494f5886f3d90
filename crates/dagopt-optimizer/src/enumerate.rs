//! Bottom-up enumeration of candidate plans.
//!
//! `Enumerator::candidates` builds the candidate list of a node from the
//! candidates of its producers: every connection is realized as a set of
//! channels (the plain forward channel plus one per interesting property),
//! every branch-compatible combination of channels is handed to the
//! operator's semantics, and the result is pruned. Candidate lists of forks
//! are memoized so that all consumers of a fork share the same candidates.

use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use std::time::{Duration, Instant};

use dagopt_core::config::OptimizerConfig;
use dagopt_core::error::{CompilerError, Result};
use dagopt_core::id::{ConnectionId, NodeId, PlanId};
use serde::Serialize;
use tracing::{debug, warn};

use crate::branches::merge_choices;
use crate::cost::{CostModel, Costs};
use crate::graph::{OptimizerGraph, OptimizerNode};
use crate::operators::{semantics_for, Alternative};
use crate::plan::{BranchChoices, Channel, LocalStrategy, PlanNode, ShipStrategy};
use crate::properties::{InterestingProperties, Partitioning};
use crate::prune::prune;

pub type Candidates = Rc<Vec<Rc<PlanNode>>>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NodeEnumerationStats {
    /// Candidates built before pruning.
    pub created: usize,
    pub retained: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EnumerationStats {
    pub candidates_created: usize,
    pub candidates_pruned: usize,
    /// Channel combinations rejected because inputs disagreed on a shared fork.
    pub branch_conflicts: usize,
    pub budget_exhausted: bool,
    pub per_node: BTreeMap<NodeId, NodeEnumerationStats>,
}

pub struct Enumerator<'a> {
    graph: &'a OptimizerGraph,
    config: &'a OptimizerConfig,
    cost_model: &'a dyn CostModel,
    memo: HashMap<NodeId, Candidates>,
    next_plan: u64,
    started: Instant,
    stats: EnumerationStats,
}

impl<'a> Enumerator<'a> {
    pub fn new(
        graph: &'a OptimizerGraph,
        config: &'a OptimizerConfig,
        cost_model: &'a dyn CostModel,
    ) -> Self {
        Self {
            graph,
            config,
            cost_model,
            memo: HashMap::new(),
            next_plan: 0,
            started: Instant::now(),
            stats: EnumerationStats::default(),
        }
    }

    pub fn stats(&self) -> &EnumerationStats {
        &self.stats
    }

    pub fn into_stats(self) -> EnumerationStats {
        self.stats
    }

    /// Candidates of `id`, never empty.
    pub fn candidates(&mut self, id: NodeId) -> Result<Candidates> {
        if let Some(hit) = self.memo.get(&id) {
            return Ok(Rc::clone(hit));
        }
        let graph = self.graph;
        let node = graph.node(id);

        let mut per_input = Vec::with_capacity(node.inputs.len());
        for conn in &node.inputs {
            per_input.push(self.channels_for(*conn)?);
        }

        let mut raw = Vec::new();
        let mut chosen = Vec::with_capacity(per_input.len());
        self.combine(node, &per_input, &mut chosen, BranchChoices::new(), &mut raw);
        if raw.is_empty() {
            return Err(CompilerError::NoFeasiblePlan {
                node: node.name.clone(),
            });
        }

        let created = raw.len();
        let kept = if self.config.prune_dominated {
            let (kept, pruned) = prune(id, raw, &node.requested, self.cost_model);
            self.stats.candidates_pruned += pruned;
            kept
        } else {
            raw
        };

        let entry = self.stats.per_node.entry(id).or_default();
        entry.created += created;
        entry.retained += kept.len();
        debug!(
            node = node.name.as_str(),
            created,
            retained = kept.len(),
            "enumerated candidates"
        );

        let kept = Rc::new(kept);
        if node.is_fork() {
            self.memo.insert(id, Rc::clone(&kept));
        }
        Ok(kept)
    }

    /// Every way of realizing `conn`, for every producer candidate.
    fn channels_for(&mut self, conn_id: ConnectionId) -> Result<Vec<Channel>> {
        let graph = self.graph;
        let conn = graph.connection(conn_id);
        let producers = self.candidates(conn.source)?;
        let forced = conn.forced_ship();
        let rescaled = graph.node(conn.source).parallelism != graph.node(conn.target).parallelism;

        let mut out: Vec<Channel> = Vec::new();
        for producer in producers.iter() {
            let mut base = Channel::forward(Rc::clone(producer), conn.id);
            if rescaled {
                base = base.across_parallelism_change();
            }
            if let Some(ship) = &forced {
                base = base.forced(ship.clone());
            }
            push_unique(&mut out, base.clone());
            for ip in &conn.interesting {
                push_unique(&mut out, realize(base.clone(), ip));
            }
        }
        Ok(out)
    }

    /// Walk the inputs left to right, keeping one channel per input, and
    /// instantiate every complete branch-compatible combination.
    fn combine(
        &mut self,
        node: &OptimizerNode,
        per_input: &[Vec<Channel>],
        chosen: &mut Vec<Channel>,
        choices: BranchChoices,
        out: &mut Vec<Rc<PlanNode>>,
    ) {
        let depth = chosen.len();
        if depth == per_input.len() {
            let semantics = semantics_for(&node.kind);
            for alt in semantics.create_plan_alternatives(node, self.graph, chosen.clone()) {
                let plan = self.instantiate(node, alt, &choices);
                out.push(plan);
            }
            return;
        }
        for ch in &per_input[depth] {
            if !out.is_empty() && self.exhausted() {
                return;
            }
            let Some(merged) = merge_choices(&choices, ch.branch_choices()) else {
                self.stats.branch_conflicts += 1;
                continue;
            };
            chosen.push(ch.clone());
            self.combine(node, per_input, chosen, merged, out);
            chosen.pop();
        }
    }

    fn instantiate(
        &mut self,
        node: &OptimizerNode,
        alt: Alternative,
        choices: &BranchChoices,
    ) -> Rc<PlanNode> {
        let id = PlanId::new(self.next_plan);
        self.next_plan += 1;
        self.stats.candidates_created += 1;

        let (global, local) = semantics_for(&node.kind).read_output_contract(node, &alt);

        let mut own = Costs::zero();
        let mut input_estimates = Vec::with_capacity(alt.inputs.len());
        for ch in &alt.inputs {
            let est = &self.graph.node(ch.source.node).estimates;
            own += self.cost_model.ship_cost(&ch.ship, est, node.parallelism);
            own += self.cost_model.local_cost(&ch.local, est, node.memory_bytes);
            input_estimates.push(est);
        }
        own += self
            .cost_model
            .driver_cost(alt.strategy, &input_estimates, node.memory_bytes);
        let cumulative_cost = PlanNode::cumulative(own, &alt.inputs);

        let mut branch_choices: BranchChoices = choices
            .iter()
            .filter(|(fork, _)| node.branches.is_open(**fork))
            .map(|(fork, plan)| (*fork, *plan))
            .collect();
        if node.is_fork() {
            branch_choices.insert(node.id, id);
        }

        Rc::new(PlanNode {
            id,
            node: node.id,
            name: node.name.clone(),
            strategy: alt.strategy,
            inputs: alt.inputs,
            global,
            local,
            own_cost: own,
            cumulative_cost,
            branch_choices,
        })
    }

    fn exhausted(&mut self) -> bool {
        if self.stats.budget_exhausted {
            return true;
        }
        let over_budget = self
            .config
            .enumeration_budget
            .is_some_and(|budget| self.stats.candidates_created >= budget);
        let past_deadline = self
            .config
            .deadline_ms
            .is_some_and(|ms| self.started.elapsed() >= Duration::from_millis(ms));
        if over_budget || past_deadline {
            warn!(
                created = self.stats.candidates_created,
                over_budget, past_deadline, "enumeration limit reached, keeping first candidates"
            );
            self.stats.budget_exhausted = true;
        }
        self.stats.budget_exhausted
    }
}

/// Ship and sort as needed so that `ip` holds on the channel. Forced ship
/// strategies are kept as they are.
fn realize(base: Channel, ip: &InterestingProperties) -> Channel {
    let mut ch = base;
    if !ch.ship_forced && !ip.global.is_met_by(&ch.global) {
        ch = match &ip.global.partitioning {
            Partitioning::HashPartitioned(fields) => {
                ch.with_ship(ShipStrategy::PartitionHash(fields.clone()))
            }
            Partitioning::Replicated => ch.with_ship(ShipStrategy::Broadcast),
            Partitioning::Any => ch,
        };
    }
    if !ip.local.is_met_by(&ch.local_props) {
        ch = ch.with_local(LocalStrategy::Sort(ip.local.sort_fields()));
    }
    ch
}

fn push_unique(out: &mut Vec<Channel>, ch: Channel) {
    if !out.iter().any(|c| c.same_realization(&ch)) {
        out.push(ch);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::branches;
    use crate::cost::DefaultCostModel;
    use crate::interesting;
    use crate::stats;
    use dagopt_core::operator::{
        LogicalDag, LogicalOperator, OperatorKind, SourceSpec, SourceStatistics,
    };

    fn sized(records: u64) -> SourceSpec {
        SourceSpec {
            statistics: SourceStatistics {
                num_records: Some(records),
                total_size_bytes: Some(records * 100),
                avg_record_width: None,
            },
            partitioned_on: None,
        }
    }

    fn prepared(dag: &LogicalDag, config: &OptimizerConfig) -> OptimizerGraph {
        let model = DefaultCostModel::new(config.cost_weights);
        let mut g = OptimizerGraph::build(dag, config).unwrap();
        stats::estimate(&mut g);
        branches::track(&mut g);
        interesting::propagate(&mut g, &model);
        g
    }

    #[test]
    fn reduce_gets_partitioned_and_sorted_input() {
        let dag = LogicalDag::new()
            .with(LogicalOperator::source(1, "in", sized(1000)))
            .with(
                LogicalOperator::new(2, "agg", OperatorKind::Reduce)
                    .with_input(&[1])
                    .with_keys(&[0]),
            )
            .with(LogicalOperator::new(3, "out", OperatorKind::Sink).with_input(&[2]));
        let config = OptimizerConfig::default();
        let g = prepared(&dag, &config);
        let model = DefaultCostModel::default();
        let mut e = Enumerator::new(&g, &config, &model);

        let agg = e.candidates(g.node_by_name("agg").unwrap().id).unwrap();
        assert_eq!(agg.len(), 1);
        let input = &agg[0].inputs[0];
        assert!(matches!(input.ship, ShipStrategy::PartitionHash(_)));
        assert_eq!(input.local, LocalStrategy::Sort(vec![0]));
        assert!(agg[0].cumulative_cost.is_known());
    }

    #[test]
    fn forks_are_memoized() {
        let dag = LogicalDag::new()
            .with(LogicalOperator::source(1, "in", sized(10)))
            .with(LogicalOperator::new(2, "s1", OperatorKind::Sink).with_input(&[1]))
            .with(LogicalOperator::new(3, "s2", OperatorKind::Sink).with_input(&[1]));
        let config = OptimizerConfig::default();
        let g = prepared(&dag, &config);
        let model = DefaultCostModel::default();
        let mut e = Enumerator::new(&g, &config, &model);
        let root = e.candidates(g.root()).unwrap();
        assert_eq!(root.len(), 1);
        let src = g.node_by_name("in").unwrap().id;
        assert_eq!(e.stats().per_node[&src].created, 1);
        // Both sinks read the very same source candidate.
        let s1 = &root[0].inputs[0].source;
        let s2 = &root[0].inputs[1].source;
        assert_eq!(s1.inputs[0].source.id, s2.inputs[0].source.id);
    }

    #[test]
    fn budget_falls_back_to_first_candidates() {
        let dag = LogicalDag::new()
            .with(LogicalOperator::source(1, "a", sized(100)))
            .with(LogicalOperator::source(2, "b", sized(200)))
            .with(
                LogicalOperator::new(3, "join", OperatorKind::Match)
                    .with_input(&[1])
                    .with_input(&[2])
                    .with_keys(&[0])
                    .with_keys(&[0]),
            )
            .with(LogicalOperator::new(4, "out", OperatorKind::Sink).with_input(&[3]));
        let config = OptimizerConfig {
            enumeration_budget: Some(1),
            prune_dominated: false,
            ..Default::default()
        };
        let g = prepared(&dag, &config);
        let model = DefaultCostModel::default();
        let mut e = Enumerator::new(&g, &config, &model);
        let root = e.candidates(g.root()).unwrap();
        assert!(!root.is_empty());
        assert!(e.stats().budget_exhausted);
        let join = g.node_by_name("join").unwrap().id;
        // One channel pair, expanded by the join into its strategies.
        assert_eq!(e.stats().per_node[&join].created, 3);
    }
}
