//! The optimizer's own view of the job: an arena of nodes and connections
//! built from a `LogicalDag`.
//!
//! Building the graph validates topology and hints, inserts a union node
//! wherever an input position has several producers, and joins multiple
//! sinks under a chain of sink-joiner nodes so that enumeration always
//! starts from a single root. Node ids are issued in topological order.

use std::collections::{BTreeSet, HashMap};

use dagopt_core::config::OptimizerConfig;
use dagopt_core::error::{CompilerError, Result};
use dagopt_core::id::{ConnectionId, NodeId, OpId};
use dagopt_core::operator::{
    CompilerHints, LogicalDag, LogicalOperator, OperatorKind, OutputContract, SourceSpec,
};
use tracing::debug;

use crate::branches::BranchState;
use crate::hints::{self, LocalStrategyHint, ShipOverride};
use crate::plan::ShipStrategy;
use crate::properties::{field_set, FieldSet, InterestingProperties};
use crate::stats::Estimates;

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Source(SourceSpec),
    Map,
    Reduce,
    Sink,
    Match,
    Cross,
    CoGroup,
    Union,
    /// Synthetic two-input root tying several sinks together.
    SinkJoiner,
}

impl NodeKind {
    fn from_operator(kind: &OperatorKind) -> Self {
        match kind {
            OperatorKind::Source(spec) => NodeKind::Source(spec.clone()),
            OperatorKind::Map => NodeKind::Map,
            OperatorKind::Reduce => NodeKind::Reduce,
            OperatorKind::Sink => NodeKind::Sink,
            OperatorKind::Match => NodeKind::Match,
            OperatorKind::Cross => NodeKind::Cross,
            OperatorKind::CoGroup => NodeKind::CoGroup,
            OperatorKind::Union => NodeKind::Union,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::Source(_) => "source",
            NodeKind::Map => "map",
            NodeKind::Reduce => "reduce",
            NodeKind::Sink => "sink",
            NodeKind::Match => "match",
            NodeKind::Cross => "cross",
            NodeKind::CoGroup => "cogroup",
            NodeKind::Union => "union",
            NodeKind::SinkJoiner => "sink_joiner",
        }
    }
}

#[derive(Debug, Clone)]
pub struct OptimizerNode {
    pub id: NodeId,
    pub name: String,
    /// Originating logical operator; `None` for synthetic nodes.
    pub op: Option<OpId>,
    pub kind: NodeKind,
    /// Incoming connections by input position.
    pub inputs: Vec<ConnectionId>,
    pub outgoing: Vec<ConnectionId>,
    /// Key columns per input position.
    pub keys: Vec<Vec<usize>>,
    pub contract: OutputContract,
    pub compiler_hints: CompilerHints,
    pub parallelism: u32,
    pub memory_bytes: u64,
    pub local_strategy: Option<LocalStrategyHint>,
    pub estimates: Estimates,
    /// Everything consumers asked of this node's output.
    pub requested: Vec<InterestingProperties>,
    pub branches: BranchState,
}

impl OptimizerNode {
    fn new(id: NodeId, name: String, kind: NodeKind, parallelism: u32, memory_bytes: u64) -> Self {
        Self {
            id,
            name,
            op: None,
            kind,
            inputs: Vec::new(),
            outgoing: Vec::new(),
            keys: Vec::new(),
            contract: OutputContract::None,
            compiler_hints: CompilerHints::default(),
            parallelism,
            memory_bytes,
            local_strategy: None,
            estimates: Estimates::unknown(),
            requested: Vec::new(),
            branches: BranchState::default(),
        }
    }

    pub fn key_list(&self, input: usize) -> &[usize] {
        self.keys.get(input).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn key_fields(&self, input: usize) -> FieldSet {
        field_set(self.key_list(input))
    }

    /// More than one consumer reads this node's output.
    pub fn is_fork(&self) -> bool {
        self.outgoing.len() > 1
    }
}

#[derive(Debug, Clone)]
pub struct Connection {
    pub id: ConnectionId,
    pub source: NodeId,
    pub target: NodeId,
    /// Input position at the target.
    pub input_index: usize,
    pub ship_override: ShipOverride,
    /// Target key columns for this input.
    pub keys: Vec<usize>,
    pub interesting: Vec<InterestingProperties>,
}

impl Connection {
    /// The ship strategy a hint pins this connection to, if any.
    pub fn forced_ship(&self) -> Option<ShipStrategy> {
        match self.ship_override {
            ShipOverride::Unset => None,
            ShipOverride::Forward => Some(ShipStrategy::Forward),
            ShipOverride::Broadcast => Some(ShipStrategy::Broadcast),
            ShipOverride::PartitionHash => Some(ShipStrategy::PartitionHash(field_set(&self.keys))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OptimizerGraph {
    nodes: Vec<OptimizerNode>,
    connections: Vec<Connection>,
    sinks: Vec<NodeId>,
    root: NodeId,
}

impl OptimizerGraph {
    pub fn build(dag: &LogicalDag, config: &OptimizerConfig) -> Result<Self> {
        let order = validate_and_sort(dag)?;

        let mut graph = OptimizerGraph {
            nodes: Vec::with_capacity(dag.len()),
            connections: Vec::new(),
            sinks: Vec::new(),
            root: NodeId::new(0),
        };
        let mut node_of: HashMap<OpId, NodeId> = HashMap::with_capacity(dag.len());

        for idx in order {
            let op = &dag.operators[idx];
            let resolved = hints::resolve(op)?;
            let parallelism = resolved.parallelism.unwrap_or(config.default_parallelism);
            let memory_bytes = resolved.memory_bytes.unwrap_or(config.default_memory_bytes);
            let kind = NodeKind::from_operator(&op.kind);

            // Producer node per input position, inserting unions where needed.
            let mut sources = Vec::with_capacity(op.inputs.len());
            for (pos, producers) in op.inputs.iter().enumerate() {
                let producer_nodes: Vec<NodeId> = producers.iter().map(|p| node_of[p]).collect();
                if kind == NodeKind::Union || producer_nodes.len() == 1 {
                    sources.push(producer_nodes);
                    continue;
                }
                let union = graph.push_node(
                    format!("{}.union{}", op.name, pos),
                    NodeKind::Union,
                    parallelism,
                    memory_bytes,
                );
                for p in producer_nodes {
                    graph.connect(p, union, 0, ShipOverride::Forward, Vec::new());
                }
                sources.push(vec![union]);
            }

            let id = graph.push_node(op.name.clone(), kind, parallelism, memory_bytes);
            {
                let node = graph.node_mut(id);
                node.op = Some(op.id);
                node.keys = op.keys.clone();
                node.contract = op.contract;
                node.compiler_hints = op.compiler_hints.clone();
                node.local_strategy = resolved.local_strategy;
            }
            for (pos, producers) in sources.into_iter().enumerate() {
                let ship = resolved.ship.get(pos).copied().unwrap_or_default();
                for p in producers {
                    graph.connect(p, id, pos, ship, op.keys_of(pos).to_vec());
                }
            }
            if graph.node(id).kind == NodeKind::Sink {
                graph.sinks.push(id);
            }
            node_of.insert(op.id, id);
        }

        graph.root = graph.join_sinks(config)?;
        debug!(
            nodes = graph.nodes.len(),
            connections = graph.connections.len(),
            sinks = graph.sinks.len(),
            "built optimizer graph"
        );
        Ok(graph)
    }

    fn push_node(&mut self, name: String, kind: NodeKind, parallelism: u32, memory: u64) -> NodeId {
        let id = NodeId::new(self.nodes.len() as u64);
        self.nodes
            .push(OptimizerNode::new(id, name, kind, parallelism, memory));
        id
    }

    fn connect(
        &mut self,
        source: NodeId,
        target: NodeId,
        input_index: usize,
        ship_override: ShipOverride,
        keys: Vec<usize>,
    ) -> ConnectionId {
        let id = ConnectionId::new(self.connections.len() as u64);
        self.connections.push(Connection {
            id,
            source,
            target,
            input_index,
            ship_override,
            keys,
            interesting: Vec::new(),
        });
        self.nodes[source.index()].outgoing.push(id);
        self.nodes[target.index()].inputs.push(id);
        id
    }

    fn join_sinks(&mut self, config: &OptimizerConfig) -> Result<NodeId> {
        let mut sinks = self.sinks.clone().into_iter();
        let mut root = sinks
            .next()
            .ok_or_else(|| CompilerError::topology("the DAG has no sink"))?;
        for (n, sink) in sinks.enumerate() {
            let joiner = self.push_node(
                format!("$sink-joiner-{n}"),
                NodeKind::SinkJoiner,
                config.default_parallelism,
                config.default_memory_bytes,
            );
            self.connect(root, joiner, 0, ShipOverride::Unset, Vec::new());
            self.connect(sink, joiner, 1, ShipOverride::Unset, Vec::new());
            root = joiner;
        }
        Ok(root)
    }

    pub fn nodes(&self) -> &[OptimizerNode] {
        &self.nodes
    }

    pub fn node(&self, id: NodeId) -> &OptimizerNode {
        &self.nodes[id.index()]
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut OptimizerNode {
        &mut self.nodes[id.index()]
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    pub fn connection(&self, id: ConnectionId) -> &Connection {
        &self.connections[id.index()]
    }

    pub(crate) fn connection_mut(&mut self, id: ConnectionId) -> &mut Connection {
        &mut self.connections[id.index()]
    }

    pub fn node_by_name(&self, name: &str) -> Option<&OptimizerNode> {
        self.nodes.iter().find(|n| n.name == name)
    }

    pub fn node_for_op(&self, op: OpId) -> Option<&OptimizerNode> {
        self.nodes.iter().find(|n| n.op == Some(op))
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn sinks(&self) -> &[NodeId] {
        &self.sinks
    }

    /// Producers before consumers.
    pub fn topological_order(&self) -> impl DoubleEndedIterator<Item = NodeId> + '_ {
        self.nodes.iter().map(|n| n.id)
    }

    /// Producer node of each input, by position.
    pub fn predecessors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.node(id)
            .inputs
            .iter()
            .map(move |c| self.connection(*c).source)
    }
}

/// Check the logical DAG and return operator indices in topological order.
fn validate_and_sort(dag: &LogicalDag) -> Result<Vec<usize>> {
    let mut index: HashMap<OpId, usize> = HashMap::with_capacity(dag.len());
    for (i, op) in dag.operators.iter().enumerate() {
        if index.insert(op.id, i).is_some() {
            return Err(CompilerError::topology(format!(
                "duplicate operator id {}",
                op.id
            )));
        }
    }

    let mut consumers: Vec<Vec<usize>> = vec![Vec::new(); dag.len()];
    let mut indegree = vec![0usize; dag.len()];
    for (i, op) in dag.operators.iter().enumerate() {
        check_shape(op)?;
        for producer in op.inputs.iter().flatten() {
            let &p = index.get(producer).ok_or_else(|| {
                CompilerError::topology(format!(
                    "operator '{}' reads from unknown operator {}",
                    op.name, producer
                ))
            })?;
            if dag.operators[p].kind == OperatorKind::Sink {
                return Err(CompilerError::topology(format!(
                    "sink '{}' has a consumer '{}'",
                    dag.operators[p].name, op.name
                )));
            }
            consumers[p].push(i);
            indegree[i] += 1;
        }
    }

    let mut has_sink = false;
    for (i, op) in dag.operators.iter().enumerate() {
        if op.kind == OperatorKind::Sink {
            has_sink = true;
        } else if consumers[i].is_empty() {
            return Err(CompilerError::topology(format!(
                "operator '{}' has no consumer and is not a sink",
                op.name
            )));
        }
    }
    if !has_sink {
        return Err(CompilerError::topology("the DAG has no sink"));
    }

    let mut ready: BTreeSet<usize> = (0..dag.len()).filter(|&i| indegree[i] == 0).collect();
    let mut order = Vec::with_capacity(dag.len());
    while let Some(i) = ready.pop_first() {
        order.push(i);
        for &c in &consumers[i] {
            indegree[c] -= 1;
            if indegree[c] == 0 {
                ready.insert(c);
            }
        }
    }
    if order.len() != dag.len() {
        return Err(CompilerError::topology("the DAG contains a cycle"));
    }
    Ok(order)
}

fn check_shape(op: &LogicalOperator) -> Result<()> {
    let arity = op.kind.input_arity();
    if op.inputs.len() != arity {
        return Err(CompilerError::topology(format!(
            "{} '{}' expects {} input position(s), got {}",
            op.kind.name(),
            op.name,
            arity,
            op.inputs.len()
        )));
    }
    if let Some(pos) = op.inputs.iter().position(Vec::is_empty) {
        return Err(CompilerError::topology(format!(
            "input {} of '{}' has no producer",
            pos, op.name
        )));
    }
    if op.kind.requires_keys() && (0..arity).any(|i| op.keys_of(i).is_empty()) {
        return Err(CompilerError::topology(format!(
            "{} '{}' requires key fields on every input",
            op.kind.name(),
            op.name
        )));
    }
    if arity == 2 {
        // A key selector on one side only counts as a width mismatch.
        let (a, b) = (op.keys_of(0), op.keys_of(1));
        if a.len() != b.len() {
            return Err(CompilerError::topology(format!(
                "'{}' declares key selectors of different width",
                op.name
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dagopt_core::operator::SourceSpec;

    fn src(id: u64, name: &str) -> LogicalOperator {
        LogicalOperator::source(id, name, SourceSpec::default())
    }

    fn sink(id: u64, name: &str, from: &[u64]) -> LogicalOperator {
        LogicalOperator::new(id, name, OperatorKind::Sink).with_input(from)
    }

    #[test]
    fn builds_in_topological_order() {
        // Listed consumer-first on purpose.
        let dag = LogicalDag::new()
            .with(sink(3, "out", &[2]))
            .with(LogicalOperator::new(2, "map", OperatorKind::Map).with_input(&[1]))
            .with(src(1, "in"));
        let g = OptimizerGraph::build(&dag, &OptimizerConfig::default()).unwrap();
        let names: Vec<&str> = g.nodes().iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["in", "map", "out"]);
        assert_eq!(g.root(), g.node_by_name("out").unwrap().id);
        assert_eq!(g.node_by_name("map").unwrap().parallelism, 4);
    }

    #[test]
    fn inserts_union_for_multi_producer_input() {
        let dag = LogicalDag::new()
            .with(src(1, "a"))
            .with(src(2, "b"))
            .with(sink(3, "out", &[1, 2]).with_hint("ship_strategy", "forward"));
        let g = OptimizerGraph::build(&dag, &OptimizerConfig::default()).unwrap();
        let union = g.node_by_name("out.union0").unwrap();
        assert_eq!(union.kind, NodeKind::Union);
        assert_eq!(union.inputs.len(), 2);
        for c in &union.inputs {
            assert_eq!(g.connection(*c).ship_override, ShipOverride::Forward);
        }
        let out = g.node_by_name("out").unwrap();
        assert_eq!(g.connection(out.inputs[0]).source, union.id);
    }

    #[test]
    fn joins_multiple_sinks() {
        let dag = LogicalDag::new()
            .with(src(1, "a"))
            .with(sink(2, "s1", &[1]))
            .with(sink(3, "s2", &[1]))
            .with(sink(4, "s3", &[1]));
        let g = OptimizerGraph::build(&dag, &OptimizerConfig::default()).unwrap();
        assert_eq!(g.sinks().len(), 3);
        let root = g.node(g.root());
        assert_eq!(root.kind, NodeKind::SinkJoiner);
        assert_eq!(g.nodes().iter().filter(|n| n.kind == NodeKind::SinkJoiner).count(), 2);
        assert!(g.node_by_name("a").unwrap().is_fork());
    }

    #[test]
    fn rejects_bad_topologies() {
        let cfg = OptimizerConfig::default();

        let dangling = LogicalDag::new()
            .with(src(1, "a"))
            .with(src(2, "b"))
            .with(sink(3, "out", &[1]));
        assert!(matches!(
            OptimizerGraph::build(&dangling, &cfg),
            Err(CompilerError::UnsupportedTopology(_))
        ));

        let no_sink = LogicalDag::new()
            .with(src(1, "a"))
            .with(LogicalOperator::new(2, "m", OperatorKind::Map).with_input(&[1]));
        assert!(OptimizerGraph::build(&no_sink, &cfg).is_err());

        let cycle = LogicalDag::new()
            .with(LogicalOperator::new(1, "m1", OperatorKind::Map).with_input(&[2]))
            .with(LogicalOperator::new(2, "m2", OperatorKind::Map).with_input(&[1]))
            .with(sink(3, "out", &[2]));
        assert!(OptimizerGraph::build(&cycle, &cfg).is_err());

        let keyless = LogicalDag::new()
            .with(src(1, "a"))
            .with(LogicalOperator::new(2, "r", OperatorKind::Reduce).with_input(&[1]))
            .with(sink(3, "out", &[2]));
        assert!(OptimizerGraph::build(&keyless, &cfg).is_err());

        let sink_consumed = LogicalDag::new()
            .with(src(1, "a"))
            .with(sink(2, "s", &[1]))
            .with(sink(3, "t", &[2]));
        assert!(OptimizerGraph::build(&sink_consumed, &cfg).is_err());
    }

    #[test]
    fn rejects_key_selector_on_one_side_only() {
        let cfg = OptimizerConfig::default();
        let cross = |keys: &[&[usize]]| {
            let mut op = LogicalOperator::new(3, "x", OperatorKind::Cross)
                .with_input(&[1])
                .with_input(&[2]);
            for k in keys {
                op = op.with_keys(k);
            }
            LogicalDag::new()
                .with(src(1, "a"))
                .with(src(2, "b"))
                .with(op)
                .with(sink(4, "out", &[3]))
        };
        assert!(matches!(
            OptimizerGraph::build(&cross(&[&[0]]), &cfg),
            Err(CompilerError::UnsupportedTopology(_))
        ));
        assert!(matches!(
            OptimizerGraph::build(&cross(&[&[0, 1], &[0]]), &cfg),
            Err(CompilerError::UnsupportedTopology(_))
        ));
        assert!(OptimizerGraph::build(&cross(&[]), &cfg).is_ok());
        assert!(OptimizerGraph::build(&cross(&[&[0], &[1]]), &cfg).is_ok());
    }

    #[test]
    fn forced_partition_uses_target_keys() {
        let dag = LogicalDag::new()
            .with(src(1, "a"))
            .with(
                LogicalOperator::new(2, "r", OperatorKind::Reduce)
                    .with_input(&[1])
                    .with_keys(&[3, 1])
                    .with_hint("ship_strategy", "repartition"),
            )
            .with(sink(3, "out", &[2]));
        let g = OptimizerGraph::build(&dag, &OptimizerConfig::default()).unwrap();
        let r = g.node_by_name("r").unwrap();
        assert_eq!(
            g.connection(r.inputs[0]).forced_ship(),
            Some(ShipStrategy::PartitionHash(field_set(&[1, 3])))
        );
    }
}
