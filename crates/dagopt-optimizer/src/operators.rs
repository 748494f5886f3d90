//! Per-kind operator behavior.
//!
//! Each node kind plugs three hooks into the generic passes: what it asks of
//! its inputs, how a combination of input channels becomes candidate
//! strategies, and what properties its output carries.

use crate::graph::{NodeKind, OptimizerGraph, OptimizerNode};
use crate::hints::LocalStrategyHint;
use crate::plan::{Channel, DriverStrategy, ShipStrategy};
use crate::properties::{
    field_set, filter_output_by_contract, merge_interesting, FieldSet, GlobalProperties,
    InterestingProperties, LocalProperties,
};

/// A driver strategy together with the (possibly adjusted) input channels it
/// runs on.
#[derive(Debug, Clone)]
pub struct Alternative {
    pub strategy: DriverStrategy,
    pub inputs: Vec<Channel>,
}

impl Alternative {
    fn new(strategy: DriverStrategy, inputs: Vec<Channel>) -> Self {
        Self { strategy, inputs }
    }
}

pub trait OperatorSemantics {
    /// Requests the operator itself makes on input `input`.
    fn compute_interesting_properties(
        &self,
        _node: &OptimizerNode,
        _input: usize,
    ) -> Vec<InterestingProperties> {
        Vec::new()
    }

    /// Everything asked of input `input`: the operator's own requests plus
    /// the consumers' requests that survive its output contract.
    fn input_requests(
        &self,
        node: &OptimizerNode,
        input: usize,
        requested: &[InterestingProperties],
    ) -> Vec<InterestingProperties> {
        let mut out = self.compute_interesting_properties(node, input);
        if node.contract.preserves_keys() && node.contract.input() == input {
            let preserved = node.key_fields(input);
            for ip in requested {
                if let Some(filtered) = ip.filter_by_contract(node.contract, &preserved) {
                    merge_interesting(&mut out, filtered);
                }
            }
        }
        out
    }

    /// Zero or more alternatives for one combination of input channels.
    fn create_plan_alternatives(
        &self,
        node: &OptimizerNode,
        graph: &OptimizerGraph,
        channels: Vec<Channel>,
    ) -> Vec<Alternative>;

    fn read_output_contract(
        &self,
        node: &OptimizerNode,
        alt: &Alternative,
    ) -> (GlobalProperties, LocalProperties) {
        contract_output(node, alt, true)
    }
}

pub fn semantics_for(kind: &NodeKind) -> &'static dyn OperatorSemantics {
    match kind {
        NodeKind::Source(_) => &SourceOp,
        NodeKind::Map => &MapOp,
        NodeKind::Reduce => &ReduceOp,
        NodeKind::Sink => &SinkOp,
        NodeKind::Match => &MatchOp,
        NodeKind::Cross => &CrossOp,
        NodeKind::CoGroup => &CoGroupOp,
        NodeKind::Union => &UnionOp,
        NodeKind::SinkJoiner => &SinkJoinerOp,
    }
}

/// Output properties from the input the contract refers to. Data joined
/// against a replicated side is distributed like the other side, so a
/// replicated contract input only survives if every input is replicated.
fn contract_output(
    node: &OptimizerNode,
    alt: &Alternative,
    keep_local: bool,
) -> (GlobalProperties, LocalProperties) {
    let idx = node.contract.input();
    let Some(ch) = alt.inputs.get(idx) else {
        return (GlobalProperties::any(), LocalProperties::none());
    };
    let (mut global, local) =
        filter_output_by_contract(&ch.global, &ch.local_props, node.contract, &node.key_fields(idx));
    if global.is_replicated() && alt.inputs.iter().any(|c| !c.global.is_replicated()) {
        global = GlobalProperties::any();
    }
    let local = if keep_local { local } else { LocalProperties::none() };
    (global, local)
}

fn two(channels: Vec<Channel>) -> Option<(Channel, Channel)> {
    let mut it = channels.into_iter();
    Some((it.next()?, it.next()?))
}

/// Both sides are hash-partitioned on corresponding key fields.
fn co_partitioned(a: &Channel, b: &Channel, first_keys: &[usize], second_keys: &[usize]) -> bool {
    let (Some(fa), Some(fb)) = (a.global.partition_fields(), b.global.partition_fields()) else {
        return false;
    };
    if fa.is_empty() {
        return false;
    }
    let mut mapped = FieldSet::new();
    for f in fa {
        match first_keys.iter().position(|k| k == f) {
            Some(pos) => match second_keys.get(pos) {
                Some(k) => {
                    mapped.insert(*k);
                }
                None => return false,
            },
            None => return false,
        }
    }
    mapped == *fb
}

fn repartition(ch: Channel, keys: &[usize]) -> Channel {
    let target = GlobalProperties::hash_partitioned(field_set(keys));
    if ch.ship_forced || ch.global == target {
        ch
    } else {
        ch.with_ship(ShipStrategy::PartitionHash(field_set(keys)))
    }
}

pub struct SourceOp;

impl OperatorSemantics for SourceOp {
    fn create_plan_alternatives(
        &self,
        _node: &OptimizerNode,
        _graph: &OptimizerGraph,
        _channels: Vec<Channel>,
    ) -> Vec<Alternative> {
        vec![Alternative::new(DriverStrategy::DataSource, Vec::new())]
    }

    fn read_output_contract(
        &self,
        node: &OptimizerNode,
        _alt: &Alternative,
    ) -> (GlobalProperties, LocalProperties) {
        let global = match &node.kind {
            NodeKind::Source(spec) => match &spec.partitioned_on {
                Some(fields) if !fields.is_empty() => {
                    GlobalProperties::hash_partitioned(field_set(fields))
                }
                _ => GlobalProperties::any(),
            },
            _ => GlobalProperties::any(),
        };
        (global, LocalProperties::none())
    }
}

pub struct MapOp;

impl OperatorSemantics for MapOp {
    fn create_plan_alternatives(
        &self,
        _node: &OptimizerNode,
        _graph: &OptimizerGraph,
        channels: Vec<Channel>,
    ) -> Vec<Alternative> {
        vec![Alternative::new(DriverStrategy::Map, channels)]
    }
}

pub struct ReduceOp;

impl OperatorSemantics for ReduceOp {
    fn compute_interesting_properties(
        &self,
        node: &OptimizerNode,
        input: usize,
    ) -> Vec<InterestingProperties> {
        vec![InterestingProperties::partitioned_and_grouped(
            node.key_fields(input),
        )]
    }

    fn create_plan_alternatives(
        &self,
        node: &OptimizerNode,
        _graph: &OptimizerGraph,
        channels: Vec<Channel>,
    ) -> Vec<Alternative> {
        let Some(ch) = channels.into_iter().next() else {
            return Vec::new();
        };
        let keys = node.key_list(0);
        let wanted = GlobalProperties::hash_partitioned(field_set(keys));
        if !ch.ship_forced && !wanted.is_met_by(&ch.global) {
            return Vec::new();
        }
        vec![Alternative::new(
            DriverStrategy::SortedGroupReduce,
            vec![ch.grouped_on(keys)],
        )]
    }
}

pub struct SinkOp;

impl OperatorSemantics for SinkOp {
    fn create_plan_alternatives(
        &self,
        _node: &OptimizerNode,
        _graph: &OptimizerGraph,
        channels: Vec<Channel>,
    ) -> Vec<Alternative> {
        vec![Alternative::new(DriverStrategy::DataSink, channels)]
    }

    fn read_output_contract(
        &self,
        _node: &OptimizerNode,
        alt: &Alternative,
    ) -> (GlobalProperties, LocalProperties) {
        // A sink's output is what it wrote.
        match alt.inputs.first() {
            Some(ch) => (ch.global.clone(), ch.local_props.clone()),
            None => (GlobalProperties::any(), LocalProperties::none()),
        }
    }
}

pub struct MatchOp;

impl OperatorSemantics for MatchOp {
    fn compute_interesting_properties(
        &self,
        node: &OptimizerNode,
        input: usize,
    ) -> Vec<InterestingProperties> {
        let keys = node.key_fields(input);
        vec![
            InterestingProperties::partitioned(keys.clone()),
            InterestingProperties::new(
                GlobalProperties::hash_partitioned(keys),
                LocalProperties::sorted(node.key_list(input)),
            ),
            InterestingProperties::replicated(),
        ]
    }

    fn create_plan_alternatives(
        &self,
        node: &OptimizerNode,
        _graph: &OptimizerGraph,
        channels: Vec<Channel>,
    ) -> Vec<Alternative> {
        let Some((a, b)) = two(channels) else {
            return Vec::new();
        };
        let (k1, k2) = (node.key_list(0), node.key_list(1));
        let forced = a.ship_forced || b.ship_forced;
        let (ra, rb) = (a.global.is_replicated(), b.global.is_replicated());
        if ra && rb && !forced {
            return Vec::new();
        }
        let (a, b) = if ra != rb || co_partitioned(&a, &b, k1, k2) {
            (a, b)
        } else {
            (repartition(a, k1), repartition(b, k2))
        };

        let strategies: &[DriverStrategy] = match node.local_strategy {
            Some(LocalStrategyHint::HashBuildFirst) => &[DriverStrategy::HybridHashBuildFirst],
            Some(LocalStrategyHint::HashBuildSecond) => &[DriverStrategy::HybridHashBuildSecond],
            Some(LocalStrategyHint::SortMerge) => &[DriverStrategy::SortMerge],
            _ => &[
                DriverStrategy::HybridHashBuildFirst,
                DriverStrategy::HybridHashBuildSecond,
                DriverStrategy::SortMerge,
            ],
        };

        strategies
            .iter()
            .map(|&strategy| {
                let inputs = if strategy == DriverStrategy::SortMerge {
                    vec![a.clone().sorted_on(k1), b.clone().sorted_on(k2)]
                } else {
                    vec![a.clone(), b.clone()]
                };
                Alternative::new(strategy, inputs)
            })
            .collect()
    }

    fn read_output_contract(
        &self,
        node: &OptimizerNode,
        alt: &Alternative,
    ) -> (GlobalProperties, LocalProperties) {
        contract_output(node, alt, alt.strategy == DriverStrategy::SortMerge)
    }
}

pub struct CrossOp;

impl OperatorSemantics for CrossOp {
    fn create_plan_alternatives(
        &self,
        node: &OptimizerNode,
        graph: &OptimizerGraph,
        channels: Vec<Channel>,
    ) -> Vec<Alternative> {
        let Some((a, b)) = two(channels) else {
            return Vec::new();
        };
        let hinted = match node.local_strategy {
            Some(LocalStrategyHint::NestedLoopFirst) => Some(DriverStrategy::NestedLoopBlockedOuterFirst),
            Some(LocalStrategyHint::NestedLoopSecond) => Some(DriverStrategy::NestedLoopBlockedOuterSecond),
            _ => None,
        };

        let (strategy, a, b) = if a.global.is_replicated() {
            (DriverStrategy::NestedLoopBlockedOuterFirst, a, b)
        } else if b.global.is_replicated() {
            (DriverStrategy::NestedLoopBlockedOuterSecond, a, b)
        } else if a.ship_forced && b.ship_forced {
            (hinted.unwrap_or(DriverStrategy::NestedLoopBlockedOuterFirst), a, b)
        } else {
            let broadcast_second = if a.ship_forced {
                true
            } else if b.ship_forced {
                false
            } else {
                match hinted {
                    Some(s) => s == DriverStrategy::NestedLoopBlockedOuterSecond,
                    None => smaller_is_second(graph, &a, &b),
                }
            };
            if broadcast_second {
                let b = b.with_ship(ShipStrategy::Broadcast);
                (DriverStrategy::NestedLoopBlockedOuterSecond, a, b)
            } else {
                let a = a.with_ship(ShipStrategy::Broadcast);
                (DriverStrategy::NestedLoopBlockedOuterFirst, a, b)
            }
        };
        vec![Alternative::new(strategy, vec![a, b])]
    }

    fn read_output_contract(
        &self,
        node: &OptimizerNode,
        alt: &Alternative,
    ) -> (GlobalProperties, LocalProperties) {
        contract_output(node, alt, false)
    }
}

/// Second side is strictly smaller by estimated size; ties and unknown
/// sizes favor broadcasting the first side.
fn smaller_is_second(graph: &OptimizerGraph, a: &Channel, b: &Channel) -> bool {
    let size = |ch: &Channel| graph.node(ch.source.node).estimates.output_size;
    matches!((size(a), size(b)), (Some(sa), Some(sb)) if sb < sa)
}

pub struct CoGroupOp;

impl OperatorSemantics for CoGroupOp {
    fn compute_interesting_properties(
        &self,
        node: &OptimizerNode,
        input: usize,
    ) -> Vec<InterestingProperties> {
        vec![InterestingProperties::partitioned_and_grouped(
            node.key_fields(input),
        )]
    }

    fn create_plan_alternatives(
        &self,
        node: &OptimizerNode,
        _graph: &OptimizerGraph,
        channels: Vec<Channel>,
    ) -> Vec<Alternative> {
        let Some((a, b)) = two(channels) else {
            return Vec::new();
        };
        let (k1, k2) = (node.key_list(0), node.key_list(1));
        let (a, b) = if co_partitioned(&a, &b, k1, k2) {
            (a, b)
        } else {
            (repartition(a, k1), repartition(b, k2))
        };
        vec![Alternative::new(
            DriverStrategy::SortedCoGroup,
            vec![a.grouped_on(k1), b.grouped_on(k2)],
        )]
    }
}

pub struct UnionOp;

impl OperatorSemantics for UnionOp {
    fn input_requests(
        &self,
        _node: &OptimizerNode,
        _input: usize,
        requested: &[InterestingProperties],
    ) -> Vec<InterestingProperties> {
        requested.to_vec()
    }

    fn create_plan_alternatives(
        &self,
        _node: &OptimizerNode,
        _graph: &OptimizerGraph,
        channels: Vec<Channel>,
    ) -> Vec<Alternative> {
        vec![Alternative::new(DriverStrategy::Union, channels)]
    }

    fn read_output_contract(
        &self,
        _node: &OptimizerNode,
        alt: &Alternative,
    ) -> (GlobalProperties, LocalProperties) {
        let mut globals = alt.inputs.iter().map(|c| &c.global);
        let global = match globals.next() {
            Some(first) if globals.all(|g| g == first) => first.clone(),
            _ => GlobalProperties::any(),
        };
        (global, LocalProperties::none())
    }
}

pub struct SinkJoinerOp;

impl OperatorSemantics for SinkJoinerOp {
    fn input_requests(
        &self,
        _node: &OptimizerNode,
        _input: usize,
        _requested: &[InterestingProperties],
    ) -> Vec<InterestingProperties> {
        Vec::new()
    }

    fn create_plan_alternatives(
        &self,
        _node: &OptimizerNode,
        _graph: &OptimizerGraph,
        channels: Vec<Channel>,
    ) -> Vec<Alternative> {
        vec![Alternative::new(DriverStrategy::SinkJoiner, channels)]
    }

    fn read_output_contract(
        &self,
        _node: &OptimizerNode,
        _alt: &Alternative,
    ) -> (GlobalProperties, LocalProperties) {
        (GlobalProperties::any(), LocalProperties::none())
    }
}
