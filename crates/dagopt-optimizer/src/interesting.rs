//! Top-down propagation of interesting properties.
//!
//! Visiting consumers before producers, every node collects what its
//! consumers asked of its output and decides, through its operator
//! semantics, what to ask of each of its inputs. Each request is annotated
//! with the cost of establishing it from scratch on its connection.

use dagopt_core::id::NodeId;
use tracing::trace;

use crate::cost::CostModel;
use crate::graph::OptimizerGraph;
use crate::operators::semantics_for;
use crate::properties::{merge_interesting, InterestingProperties};

pub fn propagate(graph: &mut OptimizerGraph, cost_model: &dyn CostModel) {
    let order: Vec<NodeId> = graph.topological_order().rev().collect();
    for id in order {
        let node = graph.node(id);

        let mut requested: Vec<InterestingProperties> = Vec::new();
        for conn in &node.outgoing {
            for ip in &graph.connection(*conn).interesting {
                merge_interesting(&mut requested, ip.clone());
            }
        }

        let semantics = semantics_for(&node.kind);
        let mut updates = Vec::with_capacity(node.inputs.len());
        for conn_id in &node.inputs {
            let conn = graph.connection(*conn_id);
            let input = &graph.node(conn.source).estimates;
            let ips: Vec<InterestingProperties> = semantics
                .input_requests(node, conn.input_index, &requested)
                .into_iter()
                .map(|ip| {
                    let cost = cost_model.realization_cost(
                        &ip,
                        input,
                        node.parallelism,
                        node.memory_bytes,
                    );
                    ip.with_max_cost(cost)
                })
                .collect();
            trace!(
                node = node.name.as_str(),
                input = conn.input_index,
                requests = ips.len(),
                "interesting properties"
            );
            updates.push((*conn_id, ips));
        }

        for (conn, ips) in updates {
            graph.connection_mut(conn).interesting = ips;
        }
        graph.node_mut(id).requested = requested;
    }
}
