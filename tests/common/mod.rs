//! DAG builders shared by the integration tests.
#![allow(dead_code)]

use std::rc::Rc;

use dagopt::optimizer::PlanNode;
use dagopt::prelude::*;

/// Source with known record count and total size.
pub fn sized_source(id: u64, name: &str, records: u64, bytes: u64) -> LogicalOperator {
    LogicalOperator::source(
        id,
        name,
        SourceSpec {
            statistics: SourceStatistics {
                num_records: Some(records),
                total_size_bytes: Some(bytes),
                avg_record_width: None,
            },
            partitioned_on: None,
        },
    )
}

/// Like `sized_source`, already hash-partitioned on `fields`.
pub fn partitioned_source(
    id: u64,
    name: &str,
    records: u64,
    bytes: u64,
    fields: &[usize],
) -> LogicalOperator {
    let mut op = sized_source(id, name, records, bytes);
    if let OperatorKind::Source(spec) = &mut op.kind {
        spec.partitioned_on = Some(fields.to_vec());
    }
    op
}

pub fn equi_join(id: u64, name: &str, left: u64, right: u64) -> LogicalOperator {
    LogicalOperator::new(id, name, OperatorKind::Match)
        .with_input(&[left])
        .with_input(&[right])
        .with_keys(&[0])
        .with_keys(&[0])
}

pub fn sink(id: u64, name: &str, input: u64) -> LogicalOperator {
    LogicalOperator::new(id, name, OperatorKind::Sink).with_input(&[input])
}

pub fn no_pruning() -> OptimizerConfig {
    OptimizerConfig {
        prune_dominated: false,
        ..Default::default()
    }
}

/// The plan node chosen for the operator called `name`.
pub fn chosen(root: &Rc<PlanNode>, name: &str) -> Rc<PlanNode> {
    root.topological()
        .into_iter()
        .find(|p| p.name == name)
        .unwrap_or_else(|| panic!("no plan node named {name}"))
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Attach a key cardinality hint, leaving record counts to the statistics.
pub fn keyed(op: LogicalOperator, keys: u64) -> LogicalOperator {
    op.with_compiler_hints(CompilerHints {
        key_cardinality: Some(keys),
        ..Default::default()
    })
}
