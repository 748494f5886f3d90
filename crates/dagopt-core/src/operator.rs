//! Logical operator DAG handed to the optimizer by a front end.
//!
//! A `LogicalOperator` is a declarative description of one transform: its
//! kind, which producers feed each input position, the key columns per input,
//! user hints, and the output contract of its user code. The optimizer never
//! mutates these descriptors.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::id::OpId;

/// Hint map keys understood by the optimizer.
pub mod hint_keys {
    /// Ship strategy for every input of the operator (pair level).
    pub const SHIP_STRATEGY: &str = "ship_strategy";
    /// Ship strategy for the first input only.
    pub const SHIP_STRATEGY_FIRST: &str = "ship_strategy.first";
    /// Ship strategy for the second input only.
    pub const SHIP_STRATEGY_SECOND: &str = "ship_strategy.second";
    pub const PARALLELISM: &str = "parallelism";
    /// Working memory in bytes.
    pub const MEMORY: &str = "memory";
    pub const LOCAL_STRATEGY: &str = "local_strategy";
}

/// Semantic guarantee declared for an operator's user code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputContract {
    #[default]
    None,
    /// Every output record keeps the key of the input record(s) it came from.
    SameKey,
    /// Output keys are supersets of the input keys.
    SuperKey,
    /// Every output record carries a distinct key.
    UniqueKey,
    SameKeyFirst,
    SameKeySecond,
    SuperKeyFirst,
    SuperKeySecond,
}

impl OutputContract {
    pub fn is_same_key_family(self) -> bool {
        matches!(
            self,
            OutputContract::SameKey | OutputContract::SameKeyFirst | OutputContract::SameKeySecond
        )
    }

    pub fn is_super_key_family(self) -> bool {
        matches!(
            self,
            OutputContract::SuperKey
                | OutputContract::SuperKeyFirst
                | OutputContract::SuperKeySecond
        )
    }

    /// Contracts through which physical properties may survive.
    pub fn preserves_keys(self) -> bool {
        self.is_same_key_family() || self.is_super_key_family()
    }

    /// The input a two-input contract refers to. Input-agnostic contracts
    /// refer to the first input.
    pub fn input(self) -> usize {
        match self {
            OutputContract::SameKeySecond | OutputContract::SuperKeySecond => 1,
            _ => 0,
        }
    }
}

/// Per-operator estimates supplied by the user, each optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerHints {
    pub key_cardinality: Option<u64>,
    pub avg_values_per_key: Option<f64>,
    pub avg_records_emitted_per_stub_call: Option<f64>,
    pub avg_bytes_per_record: Option<f64>,
}

/// Externally collected statistics about a source's input.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceStatistics {
    pub num_records: Option<u64>,
    pub total_size_bytes: Option<u64>,
    pub avg_record_width: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceSpec {
    pub statistics: SourceStatistics,
    /// Key columns the input is already hash-partitioned on, if any.
    pub partitioned_on: Option<Vec<usize>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatorKind {
    Source(SourceSpec),
    Map,
    Reduce,
    Sink,
    /// Equi-join on the two inputs' key columns.
    Match,
    Cross,
    CoGroup,
    Union,
}

impl OperatorKind {
    /// Number of input positions.
    pub fn input_arity(&self) -> usize {
        use OperatorKind::*;
        match self {
            Source(_) => 0,
            Map | Reduce | Sink | Union => 1,
            Match | Cross | CoGroup => 2,
        }
    }

    /// Kinds whose semantics are defined over key columns.
    pub fn requires_keys(&self) -> bool {
        matches!(
            self,
            OperatorKind::Reduce | OperatorKind::Match | OperatorKind::CoGroup
        )
    }

    pub fn name(&self) -> &'static str {
        use OperatorKind::*;
        match self {
            Source(_) => "source",
            Map => "map",
            Reduce => "reduce",
            Sink => "sink",
            Match => "match",
            Cross => "cross",
            CoGroup => "cogroup",
            Union => "union",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogicalOperator {
    pub id: OpId,
    pub name: String,
    pub kind: OperatorKind,
    /// Producers per input position. More than one producer at a position
    /// means the position consumes the union of them.
    #[serde(default)]
    pub inputs: Vec<Vec<OpId>>,
    /// Key column selectors per input position.
    #[serde(default)]
    pub keys: Vec<Vec<usize>>,
    #[serde(default)]
    pub parallelism: Option<u32>,
    #[serde(default)]
    pub hints: BTreeMap<String, String>,
    #[serde(default)]
    pub contract: OutputContract,
    #[serde(default)]
    pub compiler_hints: CompilerHints,
}

impl LogicalOperator {
    pub fn new(id: u64, name: impl Into<String>, kind: OperatorKind) -> Self {
        Self {
            id: OpId::new(id),
            name: name.into(),
            kind,
            inputs: Vec::new(),
            keys: Vec::new(),
            parallelism: None,
            hints: BTreeMap::new(),
            contract: OutputContract::None,
            compiler_hints: CompilerHints::default(),
        }
    }

    pub fn source(id: u64, name: impl Into<String>, spec: SourceSpec) -> Self {
        Self::new(id, name, OperatorKind::Source(spec))
    }

    /// Append an input position fed by `producers`.
    pub fn with_input(mut self, producers: &[u64]) -> Self {
        self.inputs
            .push(producers.iter().copied().map(OpId::new).collect());
        self
    }

    /// Append the key selector for the next input position.
    pub fn with_keys(mut self, keys: &[usize]) -> Self {
        self.keys.push(keys.to_vec());
        self
    }

    pub fn with_hint(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.hints.insert(key.into(), value.into());
        self
    }

    pub fn with_contract(mut self, contract: OutputContract) -> Self {
        self.contract = contract;
        self
    }

    pub fn with_compiler_hints(mut self, hints: CompilerHints) -> Self {
        self.compiler_hints = hints;
        self
    }

    pub fn with_parallelism(mut self, dop: u32) -> Self {
        self.parallelism = Some(dop);
        self
    }

    /// Key columns of input position `idx`; empty when undeclared.
    pub fn keys_of(&self, idx: usize) -> &[usize] {
        self.keys.get(idx).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// The whole job as submitted: operators in any order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogicalDag {
    pub operators: Vec<LogicalOperator>,
}

impl LogicalDag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, op: LogicalOperator) -> Self {
        self.operators.push(op);
        self
    }

    pub fn push(&mut self, op: LogicalOperator) {
        self.operators.push(op);
    }

    pub fn get(&self, id: OpId) -> Option<&LogicalOperator> {
        self.operators.iter().find(|op| op.id == id)
    }

    pub fn len(&self) -> usize {
        self.operators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }
}
