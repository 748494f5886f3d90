//! Jobs loaded from YAML documents, plan descriptions and fingerprints.

mod common;

use common::*;
use dagopt::optimizer::{CostModel, Costs, DriverStrategy, Estimates, LocalStrategy, ShipStrategy};
use dagopt::prelude::*;

const ORDERS: &str = r#"
config:
  default_parallelism: 8
operators:
  - id: 1
    name: orders
    kind: source
    source:
      statistics: { num_records: 100000, total_size_bytes: 6400000 }
    compiler_hints: { key_cardinality: 5000 }
  - id: 2
    name: customers
    kind: source
    source:
      statistics: { num_records: 5000, total_size_bytes: 400000 }
      partitioned_on: [0]
    compiler_hints: { key_cardinality: 5000 }
  - id: 3
    name: enriched
    kind: match
    inputs: [[1], [2]]
    keys: [[0], [0]]
    contract: same_key_first
  - id: 4
    name: per_customer
    kind: reduce
    inputs: [[3]]
    keys: [[0]]
    contract: same_key
  - id: 5
    name: out
    kind: sink
    inputs: [[4]]
    hints: { parallelism: 1 }
"#;

#[test]
fn yaml_document_is_optimized_with_its_overrides() {
    init_tracing();
    let plan = dagopt::optimize_yaml(ORDERS, &OptimizerConfig::default()).unwrap();
    let graph = plan.graph();
    assert_eq!(graph.node_by_name("enriched").unwrap().parallelism, 8);
    assert_eq!(graph.node_by_name("out").unwrap().parallelism, 1);
    assert!(plan.total_cost().is_some());

    // Partitioning the join on the reduce key serves both operators, so the
    // reduce input is never shipped again.
    let agg = chosen(plan.best(), "per_customer");
    assert_eq!(agg.strategy, DriverStrategy::SortedGroupReduce);
    assert_eq!(agg.inputs[0].ship, ShipStrategy::Forward);
    let join = chosen(plan.best(), "enriched");
    assert!(
        agg.inputs[0].local == LocalStrategy::Sort(vec![0])
            || join.strategy == DriverStrategy::SortMerge
    );
}

#[test]
fn yaml_errors_surface_as_dsl_errors() {
    let bad = "operators:\n  - { id: 1, name: x, kind: teleport }\n";
    assert!(matches!(
        dagopt::optimize_yaml(bad, &OptimizerConfig::default()),
        Err(CompilerError::Dsl(_))
    ));
}

#[test]
fn explain_lists_every_sink_and_shares_common_inputs() {
    let dag = LogicalDag::new()
        .with(sized_source(1, "events", 10_000, 1_000_000))
        .with(sink(2, "archive", 1))
        .with(sink(3, "mirror", 1));
    let plan = optimize(&dag, OptimizerConfig::default()).unwrap();
    let description = plan.description();
    assert_eq!(description.sinks.len(), 2);
    assert!(description.nodes.iter().all(|n| n.kind != "sink_joiner"));

    let text = plan.explain();
    assert!(text.contains("archive"));
    assert!(text.contains("mirror"));
    assert!(text.contains("events (shared, see above)"));
}

#[test]
fn fingerprint_is_stable_and_tracks_the_chosen_plan() {
    let job = |dims_records: u64| {
        LogicalDag::new()
            .with(sized_source(1, "facts", 1_000_000, 100_000_000))
            .with(sized_source(2, "dims", dims_records, dims_records * 100))
            .with(equi_join(3, "join", 1, 2))
            .with(sink(4, "out", 3))
    };
    let first = optimize(&job(100), OptimizerConfig::default()).unwrap();
    let again = optimize(&job(100), OptimizerConfig::default()).unwrap();
    assert_eq!(first.fingerprint().unwrap(), again.fingerprint().unwrap());
    assert_eq!(first.explain(), again.explain());

    let other = optimize(&job(2_000_000), OptimizerConfig::default()).unwrap();
    assert_ne!(first.fingerprint().unwrap(), other.fingerprint().unwrap());
}

#[test]
fn description_serializes_to_json() {
    let plan = dagopt::optimize_yaml(ORDERS, &OptimizerConfig::default()).unwrap();
    let text = plan.description().to_json().unwrap();
    let json: serde_json::Value = serde_json::from_str(&text).unwrap();
    let nodes = json["nodes"].as_array().unwrap();
    assert_eq!(nodes.len(), 5);
    assert_eq!(json["sinks"].as_array().unwrap().len(), 1);
    assert!(nodes.iter().any(|n| n["name"] == "per_customer"));
}

/// Prices nothing: every plan has unknown cost.
struct Oblivious(CostWeights);

impl CostModel for Oblivious {
    fn ship_cost(&self, _: &ShipStrategy, _: &Estimates, _: u32) -> Costs {
        Costs::unknown()
    }

    fn local_cost(&self, _: &LocalStrategy, _: &Estimates, _: u64) -> Costs {
        Costs::unknown()
    }

    fn driver_cost(&self, _: DriverStrategy, _: &[&Estimates], _: u64) -> Costs {
        Costs::unknown()
    }

    fn weights(&self) -> &CostWeights {
        &self.0
    }
}

#[test]
fn custom_cost_model_without_prices_keeps_enumeration_order() {
    let dag = LogicalDag::new()
        .with(sized_source(1, "a", 1000, 100_000))
        .with(sized_source(2, "b", 1000, 100_000))
        .with(equi_join(3, "join", 1, 2))
        .with(sink(4, "out", 3));
    let config = OptimizerConfig::default();
    let optimizer =
        Optimizer::with_cost_model(config.clone(), Box::new(Oblivious(config.cost_weights)))
            .unwrap();
    let plan = optimizer.optimize(&dag).unwrap();
    assert_eq!(plan.total_cost(), None);
    // Unknown costs never dominate, so nothing was pruned.
    assert_eq!(plan.stats().candidates_pruned, 0);
    let first = &plan.ranked()[0].plan;
    assert!(plan.ranked().iter().all(|r| r.total_cost.is_none()));
    assert!(plan.ranked().iter().all(|r| r.plan.id >= first.id));
}
