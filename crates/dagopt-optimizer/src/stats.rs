//! Output size estimation, run once over the graph in topological order.
//!
//! Every estimate is optional. A value derived from an unknown predecessor
//! value stays unknown unless a compiler hint supplies it directly.

use dagopt_core::operator::{CompilerHints, OutputContract, SourceSpec};
use serde::Serialize;
use tracing::trace;

use crate::graph::{NodeKind, OptimizerGraph, OptimizerNode};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Estimates {
    pub num_records: Option<f64>,
    pub key_cardinality: Option<f64>,
    /// Bytes.
    pub output_size: Option<f64>,
    pub avg_record_width: Option<f64>,
}

impl Estimates {
    pub fn unknown() -> Self {
        Self::default()
    }
}

/// Fill `estimates` on every node.
pub fn estimate(graph: &mut OptimizerGraph) {
    let order: Vec<_> = graph.topological_order().collect();
    for id in order {
        let est = estimate_node(graph, graph.node(id));
        trace!(
            node = graph.node(id).name.as_str(),
            records = ?est.num_records,
            keys = ?est.key_cardinality,
            size = ?est.output_size,
            "estimated"
        );
        graph.node_mut(id).estimates = est;
    }
}

fn estimate_node(graph: &OptimizerGraph, node: &OptimizerNode) -> Estimates {
    let inputs: Vec<Estimates> = graph
        .predecessors(node.id)
        .map(|p| graph.node(p).estimates)
        .collect();

    let est = match &node.kind {
        NodeKind::Source(spec) => source(spec, &node.compiler_hints, node.contract),
        NodeKind::Union | NodeKind::SinkJoiner => union(&inputs),
        _ => derived(node, &inputs),
    };
    clamp(est)
}

fn source(spec: &SourceSpec, hints: &CompilerHints, contract: OutputContract) -> Estimates {
    let stats = &spec.statistics;
    let hinted_keys = hints.key_cardinality.map(|k| k as f64);
    let size = stats.total_size_bytes.map(|s| s as f64);

    let num_records = match (hinted_keys, hints.avg_values_per_key) {
        (Some(k), Some(v)) => Some(k * v),
        _ => stats.num_records.map(|n| n as f64).or_else(|| {
            let width = stats.avg_record_width.filter(|w| *w > 0.0)?;
            Some(size? / width)
        }),
    };
    let output_size = size
        .or_else(|| Some(num_records? * hints.avg_bytes_per_record?))
        .or_else(|| Some(num_records? * stats.avg_record_width?));
    let avg_record_width = hints
        .avg_bytes_per_record
        .or(stats.avg_record_width)
        .or_else(|| ratio(output_size, num_records));

    let key_cardinality = if hinted_keys.is_none() && contract == OutputContract::UniqueKey {
        num_records
    } else {
        hinted_keys
    };

    Estimates {
        num_records,
        key_cardinality,
        output_size,
        avg_record_width,
    }
}

fn union(inputs: &[Estimates]) -> Estimates {
    let num_records = sum(inputs.iter().map(|e| e.num_records));
    let output_size = sum(inputs.iter().map(|e| e.output_size));
    Estimates {
        num_records,
        key_cardinality: sum(inputs.iter().map(|e| e.key_cardinality)),
        output_size,
        avg_record_width: ratio(output_size, num_records),
    }
}

/// Number of user-function invocations an operator makes.
fn stub_calls(kind: &NodeKind, inputs: &[Estimates]) -> Option<f64> {
    let first = inputs.first().copied().unwrap_or_default();
    let second = inputs.get(1).copied().unwrap_or_default();
    match kind {
        NodeKind::Reduce => first.key_cardinality,
        NodeKind::Match => {
            let k = first.key_cardinality?.max(second.key_cardinality?).max(1.0);
            Some(first.num_records? * second.num_records? / k)
        }
        NodeKind::Cross => Some(first.num_records? * second.num_records?),
        NodeKind::CoGroup => Some(first.key_cardinality?.max(second.key_cardinality?)),
        _ => first.num_records,
    }
}

/// Output records when no hint describes the user function.
fn fallback_records(kind: &NodeKind, inputs: &[Estimates], calls: Option<f64>) -> Option<f64> {
    match kind {
        NodeKind::Match | NodeKind::Cross => calls,
        NodeKind::CoGroup => sum(inputs.iter().map(|e| e.num_records)),
        _ => inputs.first().and_then(|e| e.num_records),
    }
}

fn derived(node: &OptimizerNode, inputs: &[Estimates]) -> Estimates {
    let hints = &node.compiler_hints;
    let calls = stub_calls(&node.kind, inputs);
    let processed_keys = inputs
        .get(node.contract.input())
        .and_then(|e| e.key_cardinality);

    let mut key_cardinality = match hints.key_cardinality {
        Some(k) => Some(k as f64),
        None if node.contract.is_same_key_family() => {
            surviving_keys(processed_keys, calls, hints.avg_records_emitted_per_stub_call)
        }
        None if node.contract.is_super_key_family() => processed_keys,
        None => None,
    };

    let num_records = match (key_cardinality, hints.avg_values_per_key) {
        (Some(k), Some(v)) => Some(k * v),
        _ => match hints.avg_records_emitted_per_stub_call {
            Some(avg) => calls.map(|c| c * avg),
            None => fallback_records(&node.kind, inputs, calls),
        },
    };

    if hints.key_cardinality.is_none() && node.contract == OutputContract::UniqueKey {
        key_cardinality = num_records;
    }

    let avg_record_width = hints.avg_bytes_per_record.or_else(|| {
        ratio(
            sum(inputs.iter().map(|e| e.output_size)),
            sum(inputs.iter().map(|e| e.num_records)),
        )
    });

    let output_size = match (num_records, avg_record_width) {
        (Some(n), Some(w)) => Some(n * w.max(1.0)),
        _ => None,
    };

    Estimates {
        num_records,
        key_cardinality,
        output_size,
        avg_record_width,
    }
}

/// Keys that still appear in the output when a key-preserving function
/// emits `avg` records per call on average. With `avg < 1` a key survives
/// only if at least one of its calls emits something.
fn surviving_keys(processed: Option<f64>, calls: Option<f64>, avg: Option<f64>) -> Option<f64> {
    let keys = processed?;
    match avg {
        Some(a) if a < 1.0 => {
            let calls_per_key = if keys > 0.0 { calls? / keys } else { 1.0 };
            let p = 1.0 - (1.0 - a).powf(calls_per_key);
            Some((keys * p).round().max(1.0))
        }
        _ => Some(keys),
    }
}

fn sum(values: impl Iterator<Item = Option<f64>>) -> Option<f64> {
    values.sum()
}

fn ratio(size: Option<f64>, records: Option<f64>) -> Option<f64> {
    match (size, records) {
        (Some(s), Some(n)) if n > 0.0 => Some(s / n),
        _ => None,
    }
}

fn clamp(mut e: Estimates) -> Estimates {
    if let Some(w) = e.avg_record_width {
        e.avg_record_width = Some(w.max(1.0));
    }
    if let (Some(k), Some(n)) = (e.key_cardinality, e.num_records) {
        e.key_cardinality = Some(k.min(n));
    }
    e
}
