//! Interpretation of the string hint map attached to logical operators.
//!
//! Hints are validated once while the optimizer graph is built; everything
//! downstream works with the typed values produced here.

use dagopt_core::error::{CompilerError, Result};
use dagopt_core::operator::{hint_keys, LogicalOperator, OperatorKind};
use serde::Serialize;
use tracing::warn;

/// User-forced ship strategy of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShipOverride {
    #[default]
    Unset,
    Forward,
    Broadcast,
    PartitionHash,
}

impl ShipOverride {
    fn parse(node: &str, key: &str, value: &str) -> Result<Self> {
        match value.trim() {
            "forward" => Ok(ShipOverride::Forward),
            "broadcast" => Ok(ShipOverride::Broadcast),
            "repartition" => Ok(ShipOverride::PartitionHash),
            other => Err(CompilerError::conflict(
                node,
                format!("unrecognized value '{other}' for hint '{key}'"),
            )),
        }
    }

    pub fn is_set(self) -> bool {
        self != ShipOverride::Unset
    }
}

/// User-forced driver choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LocalStrategyHint {
    Sort,
    HashBuildFirst,
    HashBuildSecond,
    SortMerge,
    NestedLoopFirst,
    NestedLoopSecond,
}

impl LocalStrategyHint {
    fn parse(node: &str, value: &str) -> Result<Self> {
        use LocalStrategyHint::*;
        match value.trim() {
            "sort" => Ok(Sort),
            "hash_build_first" => Ok(HashBuildFirst),
            "hash_build_second" => Ok(HashBuildSecond),
            "sort_merge" => Ok(SortMerge),
            "nested_loop_first" => Ok(NestedLoopFirst),
            "nested_loop_second" => Ok(NestedLoopSecond),
            other => Err(CompilerError::conflict(
                node,
                format!("unrecognized local strategy '{other}'"),
            )),
        }
    }

    fn applies_to(self, kind: &OperatorKind) -> bool {
        use LocalStrategyHint::*;
        match self {
            Sort => matches!(kind, OperatorKind::Reduce | OperatorKind::CoGroup),
            HashBuildFirst | HashBuildSecond | SortMerge => matches!(kind, OperatorKind::Match),
            NestedLoopFirst | NestedLoopSecond => matches!(kind, OperatorKind::Cross),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedHints {
    pub parallelism: Option<u32>,
    pub memory_bytes: Option<u64>,
    pub local_strategy: Option<LocalStrategyHint>,
    /// One entry per input position.
    pub ship: Vec<ShipOverride>,
}

const KNOWN_KEYS: [&str; 6] = [
    hint_keys::SHIP_STRATEGY,
    hint_keys::SHIP_STRATEGY_FIRST,
    hint_keys::SHIP_STRATEGY_SECOND,
    hint_keys::PARALLELISM,
    hint_keys::MEMORY,
    hint_keys::LOCAL_STRATEGY,
];

pub fn resolve(op: &LogicalOperator) -> Result<ResolvedHints> {
    let name = op.name.as_str();
    let arity = op.kind.input_arity();

    for key in op.hints.keys() {
        if !KNOWN_KEYS.contains(&key.as_str()) {
            warn!(operator = name, hint = key.as_str(), "ignoring unknown hint");
        }
    }

    let pair = op
        .hints
        .get(hint_keys::SHIP_STRATEGY)
        .map(|v| ShipOverride::parse(name, hint_keys::SHIP_STRATEGY, v))
        .transpose()?;
    let first = op
        .hints
        .get(hint_keys::SHIP_STRATEGY_FIRST)
        .map(|v| ShipOverride::parse(name, hint_keys::SHIP_STRATEGY_FIRST, v))
        .transpose()?;
    let second = op
        .hints
        .get(hint_keys::SHIP_STRATEGY_SECOND)
        .map(|v| ShipOverride::parse(name, hint_keys::SHIP_STRATEGY_SECOND, v))
        .transpose()?;

    if arity == 0 && (pair.is_some() || first.is_some() || second.is_some()) {
        return Err(CompilerError::conflict(
            name,
            "ship strategy hints do not apply to an operator without inputs",
        ));
    }
    if arity < 2 && second.is_some() {
        return Err(CompilerError::conflict(
            name,
            format!("'{}' given for a single-input operator", hint_keys::SHIP_STRATEGY_SECOND),
        ));
    }

    let mut ship = Vec::with_capacity(arity);
    for idx in 0..arity {
        let specific = if idx == 0 { first } else { second };
        let resolved = specific.or(pair).unwrap_or_default();
        if resolved == ShipOverride::PartitionHash && op.keys_of(idx).is_empty() {
            return Err(CompilerError::conflict(
                name,
                format!("repartitioning input {idx} requires key fields"),
            ));
        }
        ship.push(resolved);
    }

    let parallelism = match op.hints.get(hint_keys::PARALLELISM) {
        Some(v) => Some(parse_positive::<u32>(name, hint_keys::PARALLELISM, v)?),
        None => op.parallelism,
    };
    if parallelism == Some(0) {
        return Err(CompilerError::conflict(name, "parallelism must be at least 1"));
    }

    let memory_bytes = op
        .hints
        .get(hint_keys::MEMORY)
        .map(|v| parse_positive::<u64>(name, hint_keys::MEMORY, v))
        .transpose()?;

    let local_strategy = match op.hints.get(hint_keys::LOCAL_STRATEGY) {
        Some(v) => {
            let hint = LocalStrategyHint::parse(name, v)?;
            if !hint.applies_to(&op.kind) {
                return Err(CompilerError::conflict(
                    name,
                    format!("local strategy '{}' does not apply to a {}", v.trim(), op.kind.name()),
                ));
            }
            Some(hint)
        }
        None => None,
    };

    Ok(ResolvedHints {
        parallelism,
        memory_bytes,
        local_strategy,
        ship,
    })
}

fn parse_positive<T>(node: &str, key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    match value.trim().parse::<T>() {
        Ok(v) if v > T::default() => Ok(v),
        _ => Err(CompilerError::conflict(
            node,
            format!("hint '{key}' expects a positive integer, got '{value}'"),
        )),
    }
}
