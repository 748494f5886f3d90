//! YAML serialization of a logical DAG, with optional optimizer overrides.
//!
//! Example:
//! ```yaml
//! config: { default_parallelism: 8, prune_dominated: true }
//! operators:
//!   - { id: 1, name: orders, kind: source,
//!       source: { statistics: { num_records: 100000, total_size_bytes: 6400000 } } }
//!   - { id: 2, name: per_customer, kind: reduce, inputs: [[1]], keys: [[0]],
//!       contract: same_key, compiler_hints: { key_cardinality: 5000 } }
//!   - { id: 3, name: out, kind: sink, inputs: [[2]], hints: { parallelism: 1 } }
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use dagopt_core::config::{CostWeights, OptimizerConfig};
use dagopt_core::error::{CompilerError, Result};
use dagopt_core::operator::{
    CompilerHints, LogicalDag, LogicalOperator, OperatorKind, OutputContract, SourceSpec,
};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DagDocument {
    #[serde(default)]
    pub config: Option<DocumentConfig>,
    pub operators: Vec<OperatorDef>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KindDef {
    Source,
    Map,
    Reduce,
    Sink,
    Match,
    Cross,
    #[serde(alias = "cogroup")]
    CoGroup,
    Union,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OperatorDef {
    pub id: u64,
    pub name: String,
    pub kind: KindDef,
    #[serde(default)]
    pub inputs: Vec<Vec<u64>>,
    #[serde(default)]
    pub keys: Vec<Vec<usize>>,
    #[serde(default)]
    pub parallelism: Option<u32>,
    /// Scalar values; numbers and booleans are taken in their textual form.
    #[serde(default)]
    pub hints: BTreeMap<String, serde_yaml::Value>,
    #[serde(default)]
    pub contract: OutputContract,
    #[serde(default)]
    pub compiler_hints: CompilerHints,
    #[serde(default)]
    pub source: Option<SourceSpec>,
}

/// Optimizer settings a document may override; absent fields keep the
/// caller's values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DocumentConfig {
    pub default_parallelism: Option<u32>,
    pub default_memory_bytes: Option<u64>,
    pub cost_weights: Option<CostWeights>,
    pub prune_dominated: Option<bool>,
    pub enumeration_budget: Option<usize>,
    pub deadline_ms: Option<u64>,
    pub max_ranked_plans: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct ParsedDag {
    pub dag: LogicalDag,
    pub config: DocumentConfig,
}

impl ParsedDag {
    /// `base` with this document's overrides applied.
    pub fn config_over(&self, base: &OptimizerConfig) -> OptimizerConfig {
        let mut cfg = base.clone();
        apply_document_config(&mut cfg, &self.config);
        cfg
    }
}

pub fn apply_document_config(cfg: &mut OptimizerConfig, doc: &DocumentConfig) {
    if let Some(v) = doc.default_parallelism {
        cfg.default_parallelism = v;
    }
    if let Some(v) = doc.default_memory_bytes {
        cfg.default_memory_bytes = v;
    }
    if let Some(v) = doc.cost_weights {
        cfg.cost_weights = v;
    }
    if let Some(v) = doc.prune_dominated {
        cfg.prune_dominated = v;
    }
    if doc.enumeration_budget.is_some() {
        cfg.enumeration_budget = doc.enumeration_budget;
    }
    if doc.deadline_ms.is_some() {
        cfg.deadline_ms = doc.deadline_ms;
    }
    if let Some(v) = doc.max_ranked_plans {
        cfg.max_ranked_plans = v;
    }
}

pub fn parse_yaml_dag(yaml_src: &str) -> Result<ParsedDag> {
    let doc: DagDocument =
        serde_yaml::from_str(yaml_src).map_err(|e| CompilerError::Dsl(e.to_string()))?;

    let mut dag = LogicalDag::new();
    for def in doc.operators {
        dag.push(to_operator(def)?);
    }
    Ok(ParsedDag {
        dag,
        config: doc.config.unwrap_or_default(),
    })
}

fn to_operator(def: OperatorDef) -> Result<LogicalOperator> {
    let kind = match (def.kind, def.source) {
        (KindDef::Source, spec) => OperatorKind::Source(spec.unwrap_or_default()),
        (_, Some(_)) => {
            return Err(CompilerError::Dsl(format!(
                "operator '{}' is not a source but declares 'source'",
                def.name
            )))
        }
        (KindDef::Map, None) => OperatorKind::Map,
        (KindDef::Reduce, None) => OperatorKind::Reduce,
        (KindDef::Sink, None) => OperatorKind::Sink,
        (KindDef::Match, None) => OperatorKind::Match,
        (KindDef::Cross, None) => OperatorKind::Cross,
        (KindDef::CoGroup, None) => OperatorKind::CoGroup,
        (KindDef::Union, None) => OperatorKind::Union,
    };

    let mut hints = BTreeMap::new();
    for (key, value) in def.hints {
        let text = match value {
            serde_yaml::Value::String(s) => s,
            serde_yaml::Value::Number(n) => n.to_string(),
            serde_yaml::Value::Bool(b) => b.to_string(),
            other => {
                return Err(CompilerError::Dsl(format!(
                    "hint '{key}' on '{}' must be a scalar, got {other:?}",
                    def.name
                )))
            }
        };
        hints.insert(key, text);
    }

    let mut op = LogicalOperator::new(def.id, def.name, kind)
        .with_contract(def.contract)
        .with_compiler_hints(def.compiler_hints);
    op.hints = hints;
    op.parallelism = def.parallelism;
    for producers in &def.inputs {
        op = op.with_input(producers);
    }
    for keys in &def.keys {
        op = op.with_keys(keys);
    }
    Ok(op)
}
