//! Candidate physical plans.
//!
//! A `PlanNode` fixes the driver strategy of one optimizer node and the
//! `Channel`s feeding it. Candidates are immutable once built and shared
//! through `Rc`, so a fork's candidate can sit under several consumers of
//! the same plan.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::rc::Rc;

use dagopt_core::id::{ConnectionId, NodeId, PlanId};
use serde::Serialize;

use crate::cost::Costs;
use crate::properties::{field_set, FieldSet, GlobalProperties, LocalProperties};

/// For every still-open fork upstream of a candidate, the fork candidate it
/// was built on.
pub type BranchChoices = BTreeMap<NodeId, PlanId>;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShipStrategy {
    Forward,
    Broadcast,
    PartitionHash(FieldSet),
}

impl fmt::Display for ShipStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShipStrategy::Forward => write!(f, "forward"),
            ShipStrategy::Broadcast => write!(f, "broadcast"),
            ShipStrategy::PartitionHash(fields) => {
                write!(f, "partition_hash{:?}", fields.iter().collect::<Vec<_>>())
            }
        }
    }
}

/// Per-channel local work done on the consumer side before the driver runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LocalStrategy {
    None,
    Sort(Vec<usize>),
}

impl fmt::Display for LocalStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocalStrategy::None => write!(f, "none"),
            LocalStrategy::Sort(fields) => write!(f, "sort{:?}", fields),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverStrategy {
    DataSource,
    Map,
    SortedGroupReduce,
    DataSink,
    HybridHashBuildFirst,
    HybridHashBuildSecond,
    SortMerge,
    /// First input is the blocked outer side held in memory.
    NestedLoopBlockedOuterFirst,
    NestedLoopBlockedOuterSecond,
    SortedCoGroup,
    Union,
    SinkJoiner,
}

impl DriverStrategy {
    pub fn name(self) -> &'static str {
        use DriverStrategy::*;
        match self {
            DataSource => "data_source",
            Map => "map",
            SortedGroupReduce => "sorted_group_reduce",
            DataSink => "data_sink",
            HybridHashBuildFirst => "hybrid_hash_build_first",
            HybridHashBuildSecond => "hybrid_hash_build_second",
            SortMerge => "sort_merge",
            NestedLoopBlockedOuterFirst => "nested_loop_blocked_outer_first",
            NestedLoopBlockedOuterSecond => "nested_loop_blocked_outer_second",
            SortedCoGroup => "sorted_cogroup",
            Union => "union",
            SinkJoiner => "sink_joiner",
        }
    }
}

impl fmt::Display for DriverStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One realization of a connection: a producer candidate plus the ship and
/// local strategies applied on the way to the consumer.
#[derive(Debug, Clone)]
pub struct Channel {
    pub source: Rc<PlanNode>,
    pub connection: ConnectionId,
    pub ship: ShipStrategy,
    /// Set when the ship strategy came from a user hint; such channels are
    /// never re-shipped.
    pub ship_forced: bool,
    /// Producer and consumer run at different parallelism, so forwarded
    /// data keeps none of the producer's properties.
    pub parallelism_changes: bool,
    pub local: LocalStrategy,
    /// Properties of the data as the consumer sees it.
    pub global: GlobalProperties,
    pub local_props: LocalProperties,
}

impl Channel {
    pub fn forward(source: Rc<PlanNode>, connection: ConnectionId) -> Self {
        let global = source.global.clone();
        let local_props = source.local.clone();
        Self {
            source,
            connection,
            ship: ShipStrategy::Forward,
            ship_forced: false,
            parallelism_changes: false,
            local: LocalStrategy::None,
            global,
            local_props,
        }
    }

    /// Replace the ship strategy; clears any local strategy, since
    /// re-shipped data arrives in no particular order.
    pub fn with_ship(mut self, ship: ShipStrategy) -> Self {
        match &ship {
            ShipStrategy::Forward if self.parallelism_changes => {
                self.global = GlobalProperties::any();
                self.local_props = LocalProperties::none();
            }
            ShipStrategy::Forward => {
                self.global = self.source.global.clone();
                self.local_props = self.source.local.clone();
            }
            ShipStrategy::Broadcast => {
                self.global = GlobalProperties::replicated();
                self.local_props = LocalProperties::none();
            }
            ShipStrategy::PartitionHash(fields) => {
                self.global = GlobalProperties::hash_partitioned(fields.clone());
                self.local_props = LocalProperties::none();
            }
        }
        self.ship = ship;
        self.local = LocalStrategy::None;
        self
    }

    /// Mark the connection as crossing a parallelism boundary.
    pub fn across_parallelism_change(mut self) -> Self {
        self.parallelism_changes = true;
        let ship = self.ship.clone();
        self.with_ship(ship)
    }

    pub fn forced(mut self, ship: ShipStrategy) -> Self {
        self = self.with_ship(ship);
        self.ship_forced = true;
        self
    }

    pub fn with_local(mut self, local: LocalStrategy) -> Self {
        if let LocalStrategy::Sort(fields) = &local {
            self.local_props = LocalProperties::sorted(fields);
        }
        self.local = local;
        self
    }

    /// Sort on `keys` unless the data already arrives grouped on them.
    pub fn grouped_on(self, keys: &[usize]) -> Self {
        if self.local_props.is_grouped_on(&field_set(keys)) {
            self
        } else {
            self.with_local(LocalStrategy::Sort(keys.to_vec()))
        }
    }

    /// Sort on `keys` unless the data already arrives sorted with `keys` as
    /// its leading fields.
    pub fn sorted_on(self, keys: &[usize]) -> Self {
        if self.local_props.ordering.starts_with(keys) {
            self
        } else {
            self.with_local(LocalStrategy::Sort(keys.to_vec()))
        }
    }

    pub fn branch_choices(&self) -> &BranchChoices {
        &self.source.branch_choices
    }

    /// Two channels realize the same connection identically.
    pub fn same_realization(&self, other: &Channel) -> bool {
        self.source.id == other.source.id
            && self.connection == other.connection
            && self.ship == other.ship
            && self.local == other.local
    }
}

#[derive(Debug)]
pub struct PlanNode {
    pub id: PlanId,
    pub node: NodeId,
    pub name: String,
    pub strategy: DriverStrategy,
    pub inputs: Vec<Channel>,
    pub global: GlobalProperties,
    pub local: LocalProperties,
    /// Cost of this node's driver plus its input channels.
    pub own_cost: Costs,
    /// Cost of the whole sub-plan, each distinct candidate counted once.
    pub cumulative_cost: Costs,
    pub branch_choices: BranchChoices,
}

impl PlanNode {
    pub fn predecessors(&self) -> impl Iterator<Item = &Rc<PlanNode>> {
        self.inputs.iter().map(|c| &c.source)
    }

    /// Sum `own` with the own cost of every distinct candidate reachable
    /// through `inputs`.
    pub fn cumulative(own: Costs, inputs: &[Channel]) -> Costs {
        let mut seen: HashSet<PlanId> = HashSet::new();
        let mut stack: Vec<&PlanNode> = inputs.iter().map(|c| c.source.as_ref()).collect();
        let mut total = own;
        while let Some(node) = stack.pop() {
            if !seen.insert(node.id) {
                continue;
            }
            total += node.own_cost;
            stack.extend(node.predecessors().map(Rc::as_ref));
        }
        total
    }

    /// Every distinct candidate of the plan rooted here, producers before
    /// consumers.
    pub fn topological(self: &Rc<Self>) -> Vec<Rc<PlanNode>> {
        fn visit(node: &Rc<PlanNode>, seen: &mut HashSet<PlanId>, out: &mut Vec<Rc<PlanNode>>) {
            if !seen.insert(node.id) {
                return;
            }
            for pred in node.predecessors() {
                visit(pred, seen, out);
            }
            out.push(Rc::clone(node));
        }
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        visit(self, &mut seen, &mut out);
        out
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn shared_candidate_counted_once() {
        let src = leaf(0, Costs::cpu(Some(5.0)));
        let a = inner(1, vec![Channel::forward(src.clone(), ConnectionId::new(0))], Costs::cpu(Some(1.0)));
        let b = inner(2, vec![Channel::forward(src.clone(), ConnectionId::new(1))], Costs::cpu(Some(2.0)));
        let join = inner(
            3,
            vec![
                Channel::forward(a, ConnectionId::new(2)),
                Channel::forward(b, ConnectionId::new(3)),
            ],
            Costs::cpu(Some(10.0)),
        );
        assert_eq!(join.cumulative_cost.cpu, Some(18.0));
        assert_eq!(join.topological().len(), 4);
    }

    #[test]
    fn reshipping_drops_order() {
        let src = leaf(0, Costs::zero());
        let ch = Channel::forward(src, ConnectionId::new(0))
            .with_local(LocalStrategy::Sort(vec![1]))
            .with_ship(ShipStrategy::PartitionHash(field_set(&[1])));
        assert_eq!(ch.local, LocalStrategy::None);
        assert!(ch.local_props.is_trivial());
        assert_eq!(ch.global, GlobalProperties::hash_partitioned(field_set(&[1])));

        let ch = ch.grouped_on(&[1]);
        assert_eq!(ch.local, LocalStrategy::Sort(vec![1]));
        let again = ch.clone().grouped_on(&[1]);
        assert!(again.same_realization(&ch));
    }

    #[test]
    fn forwarding_across_parallelism_change_drops_properties() {
        let keys = field_set(&[0]);
        let src = Rc::new(PlanNode {
            global: GlobalProperties::hash_partitioned(keys.clone()),
            local: LocalProperties::sorted(&[0]),
            ..Rc::try_unwrap(leaf(0, Costs::zero())).unwrap()
        });
        let same = Channel::forward(src.clone(), ConnectionId::new(0));
        assert_eq!(same.global, GlobalProperties::hash_partitioned(keys.clone()));

        let ch = Channel::forward(src, ConnectionId::new(0)).across_parallelism_change();
        assert_eq!(ch.ship, ShipStrategy::Forward);
        assert!(ch.global.is_trivial());
        assert!(ch.local_props.is_trivial());

        let ch = ch.with_ship(ShipStrategy::PartitionHash(keys.clone()));
        assert_eq!(ch.global, GlobalProperties::hash_partitioned(keys));
    }
}
