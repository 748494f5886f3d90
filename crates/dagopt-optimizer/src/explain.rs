//! Serializable description of a chosen plan and its text rendering.
//!
//! Nodes are listed producers first and refer to their inputs by position
//! in that list, so a shared sub-plan appears once. Plan ids are left out:
//! the description (and its fingerprint) depends only on what was chosen.

use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::rc::Rc;

use dagopt_core::config::CostWeights;
use dagopt_core::error::Result;
use dagopt_core::hash::{fingerprint_serde, Fingerprint};
use dagopt_core::id::PlanId;
use dagopt_core::VERSION;
use serde::Serialize;

use crate::cost::Costs;
use crate::graph::{NodeKind, OptimizerGraph};
use crate::plan::{DriverStrategy, PlanNode};
use crate::stats::Estimates;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InputDescription {
    /// Index of the producer in `PlanDescription::nodes`.
    pub from: usize,
    pub ship: String,
    pub local: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeDescription {
    pub name: String,
    pub kind: String,
    pub strategy: DriverStrategy,
    pub parallelism: u32,
    pub inputs: Vec<InputDescription>,
    pub global: String,
    pub local: String,
    pub estimates: Estimates,
    pub cumulative_cost: Costs,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanDescription {
    /// Indices of the job's sinks.
    pub sinks: Vec<usize>,
    pub total_cost: Option<f64>,
    pub nodes: Vec<NodeDescription>,
}

impl PlanDescription {
    pub fn from_plan(root: &Rc<PlanNode>, graph: &OptimizerGraph, weights: &CostWeights) -> Self {
        let mut index: HashMap<PlanId, usize> = HashMap::new();
        let mut nodes = Vec::new();
        let mut sinks = Vec::new();

        for plan in root.topological() {
            let node = graph.node(plan.node);
            if node.kind == NodeKind::SinkJoiner {
                continue;
            }
            let inputs = plan
                .inputs
                .iter()
                .filter_map(|ch| {
                    Some(InputDescription {
                        from: *index.get(&ch.source.id)?,
                        ship: ch.ship.to_string(),
                        local: ch.local.to_string(),
                    })
                })
                .collect();
            if node.kind == NodeKind::Sink {
                sinks.push(nodes.len());
            }
            index.insert(plan.id, nodes.len());
            nodes.push(NodeDescription {
                name: plan.name.clone(),
                kind: node.kind.name().to_string(),
                strategy: plan.strategy,
                parallelism: node.parallelism,
                inputs,
                global: plan.global.to_string(),
                local: plan.local.to_string(),
                estimates: node.estimates,
                cumulative_cost: plan.cumulative_cost,
            });
        }

        Self {
            sinks,
            total_cost: root.cumulative_cost.total(weights),
            nodes,
        }
    }

    pub fn fingerprint(&self) -> Result<Fingerprint> {
        fingerprint_serde(self)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Indented tree per sink; sub-plans shared between consumers are
    /// printed once and referenced afterwards.
    pub fn explain(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "dagopt {VERSION} plan, total cost: {}",
            fmt_opt(self.total_cost)
        );
        let mut seen = HashSet::new();
        for &sink in &self.sinks {
            self.render(sink, 0, &mut seen, &mut out);
        }
        out
    }

    fn render(&self, idx: usize, depth: usize, seen: &mut HashSet<usize>, out: &mut String) {
        let node = &self.nodes[idx];
        let pad = "  ".repeat(depth);
        if !seen.insert(idx) {
            let _ = writeln!(out, "{pad}{} (shared, see above)", node.name);
            return;
        }
        let _ = writeln!(
            out,
            "{pad}{} [{}] p={} records={} size={} out={}/{}",
            node.name,
            node.strategy,
            node.parallelism,
            fmt_opt(node.estimates.num_records),
            fmt_opt(node.estimates.output_size),
            node.global,
            node.local,
        );
        for input in &node.inputs {
            let _ = writeln!(out, "{pad}  <- ship={} local={}", input.ship, input.local);
            self.render(input.from, depth + 2, seen, out);
        }
    }
}

fn fmt_opt(v: Option<f64>) -> String {
    match v {
        Some(v) => format!("{v:.1}"),
        None => "unknown".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::optimize;
    use dagopt_core::config::OptimizerConfig;
    use dagopt_core::operator::{LogicalDag, LogicalOperator, OperatorKind, SourceSpec};

    fn fan_out() -> PlanDescription {
        let dag = LogicalDag::new()
            .with(LogicalOperator::source(1, "events", SourceSpec::default()))
            .with(LogicalOperator::new(2, "archive", OperatorKind::Sink).with_input(&[1]))
            .with(LogicalOperator::new(3, "mirror", OperatorKind::Sink).with_input(&[1]));
        optimize(&dag, OptimizerConfig::default()).unwrap().description()
    }

    #[test]
    fn producers_come_first_and_joiners_are_hidden() {
        let d = fan_out();
        let names: Vec<&str> = d.nodes.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names.len(), 3);
        assert_eq!(names[0], "events");
        assert_eq!(d.sinks.len(), 2);
        for &s in &d.sinks {
            assert_eq!(d.nodes[s].kind, "sink");
            assert_eq!(d.nodes[s].inputs.len(), 1);
            assert_eq!(d.nodes[s].inputs[0].from, 0);
        }
    }

    #[test]
    fn shared_producer_is_rendered_once() {
        let text = fan_out().explain();
        assert!(text.starts_with(&format!("dagopt {VERSION} plan, total cost: ")));
        assert_eq!(text.matches("events [").count(), 1);
        assert!(text.contains("events (shared, see above)"));
        assert!(text.contains("records=unknown"));
    }

    #[test]
    fn fingerprint_follows_content() {
        let d = fan_out();
        assert_eq!(d.fingerprint().unwrap(), fan_out().fingerprint().unwrap());

        let mut changed = d.clone();
        changed.nodes[0].parallelism += 1;
        assert_ne!(d.fingerprint().unwrap(), changed.fingerprint().unwrap());

        let json: serde_json::Value = serde_json::from_str(&d.to_json().unwrap()).unwrap();
        assert_eq!(json["nodes"][0]["name"], "events");
    }
}
