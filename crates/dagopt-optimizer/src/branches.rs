//! Tracking of forks (nodes with several consumers) until all of their
//! paths meet again.
//!
//! A `BranchDescriptor` says which of a fork's outgoing connections have
//! been joined on the way to a node. Where two inputs of a node carry
//! descriptors for the same fork, candidate combinations at that node must
//! agree on the fork's candidate. Once every outgoing connection of a fork
//! is accounted for, the fork is closed and stops constraining anything
//! downstream.

use std::collections::{BTreeMap, BTreeSet};

use dagopt_core::id::{ConnectionId, NodeId};
use serde::Serialize;
use tracing::trace;

use crate::graph::OptimizerGraph;
use crate::plan::BranchChoices;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BranchDescriptor {
    pub fork: NodeId,
    /// Indices into the fork's outgoing connections.
    pub joined: BTreeSet<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BranchState {
    /// Forks not yet closed at this node's output, ordered by fork id.
    pub open: Vec<BranchDescriptor>,
    /// Forks seen on more than one input of this node.
    pub joined_here: Vec<NodeId>,
    /// Forks whose paths all met at this node.
    pub closed_here: Vec<NodeId>,
}

impl BranchState {
    pub fn is_open(&self, fork: NodeId) -> bool {
        self.open.iter().any(|d| d.fork == fork)
    }
}

/// Descriptors a consumer receives over `connection` from `producer`.
fn outgoing_descriptors(
    graph: &OptimizerGraph,
    producer: NodeId,
    connection: ConnectionId,
) -> Vec<BranchDescriptor> {
    let node = graph.node(producer);
    let mut out = node.branches.open.clone();
    if node.is_fork() {
        if let Some(idx) = node.outgoing.iter().position(|c| *c == connection) {
            out.push(BranchDescriptor {
                fork: producer,
                joined: BTreeSet::from([idx]),
            });
        }
    }
    out
}

/// Fill `branches` on every node, producers first.
pub fn track(graph: &mut OptimizerGraph) {
    let order: Vec<NodeId> = graph.topological_order().collect();
    for id in order {
        let state = state_for(graph, id);
        if !state.closed_here.is_empty() {
            trace!(node = graph.node(id).name.as_str(), closed = ?state.closed_here, "closed branches");
        }
        graph.node_mut(id).branches = state;
    }
}

fn state_for(graph: &OptimizerGraph, id: NodeId) -> BranchState {
    let node = graph.node(id);
    // fork -> (joined paths, number of inputs carrying it)
    let mut merged: BTreeMap<NodeId, (BTreeSet<usize>, usize)> = BTreeMap::new();
    for conn in &node.inputs {
        let producer = graph.connection(*conn).source;
        for d in outgoing_descriptors(graph, producer, *conn) {
            let entry = merged.entry(d.fork).or_default();
            entry.0.extend(d.joined);
            entry.1 += 1;
        }
    }

    let mut state = BranchState::default();
    for (fork, (joined, seen)) in merged {
        if seen > 1 {
            state.joined_here.push(fork);
        }
        if joined.len() == graph.node(fork).outgoing.len() {
            state.closed_here.push(fork);
        } else {
            state.open.push(BranchDescriptor { fork, joined });
        }
    }
    state
}

/// Union of two choice maps, or `None` if they pick different candidates
/// for the same fork.
pub fn merge_choices(a: &BranchChoices, b: &BranchChoices) -> Option<BranchChoices> {
    let mut out = a.clone();
    for (fork, plan) in b {
        match out.get(fork) {
            Some(existing) if existing != plan => return None,
            Some(_) => {}
            None => {
                out.insert(*fork, *plan);
            }
        }
    }
    Some(out)
}
