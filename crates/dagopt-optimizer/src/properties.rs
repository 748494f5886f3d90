//! Physical data properties: how records are spread across parallel
//! instances (global) and how they are arranged within one instance (local).
//!
//! Requested properties are matched against actual ones with `is_met_by`.
//! A request for hash partitioning on fields `K` is met by data partitioned
//! on any non-empty subset of `K`: records equal on `K` are equal on the
//! subset and therefore already co-located.

use std::collections::BTreeSet;
use std::fmt;

use dagopt_core::operator::OutputContract;
use serde::Serialize;

use crate::cost::Costs;

pub type FieldSet = BTreeSet<usize>;

pub fn field_set(fields: &[usize]) -> FieldSet {
    fields.iter().copied().collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Partitioning {
    /// Nothing known about placement.
    Any,
    HashPartitioned(FieldSet),
    /// Every instance holds the complete data set.
    Replicated,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct GlobalProperties {
    pub partitioning: Partitioning,
}

impl Default for GlobalProperties {
    fn default() -> Self {
        Self::any()
    }
}

impl GlobalProperties {
    pub fn any() -> Self {
        Self {
            partitioning: Partitioning::Any,
        }
    }

    pub fn hash_partitioned(fields: FieldSet) -> Self {
        Self {
            partitioning: Partitioning::HashPartitioned(fields),
        }
    }

    pub fn replicated() -> Self {
        Self {
            partitioning: Partitioning::Replicated,
        }
    }

    pub fn is_trivial(&self) -> bool {
        self.partitioning == Partitioning::Any
    }

    pub fn is_replicated(&self) -> bool {
        self.partitioning == Partitioning::Replicated
    }

    pub fn partition_fields(&self) -> Option<&FieldSet> {
        match &self.partitioning {
            Partitioning::HashPartitioned(f) => Some(f),
            _ => None,
        }
    }

    /// Does data with `actual` placement satisfy this request?
    pub fn is_met_by(&self, actual: &GlobalProperties) -> bool {
        use Partitioning::*;
        match (&self.partitioning, &actual.partitioning) {
            (Any, _) => true,
            (HashPartitioned(req), HashPartitioned(act)) => !act.is_empty() && act.is_subset(req),
            (Replicated, Replicated) => true,
            _ => false,
        }
    }

    fn fields(&self) -> FieldSet {
        self.partition_fields().cloned().unwrap_or_default()
    }
}

impl fmt::Display for GlobalProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.partitioning {
            Partitioning::Any => write!(f, "any"),
            Partitioning::HashPartitioned(fields) => write!(f, "hash{}", fmt_fields(fields)),
            Partitioning::Replicated => write!(f, "replicated"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize)]
pub struct LocalProperties {
    /// Sort order, most significant field first. Empty when unsorted.
    pub ordering: Vec<usize>,
    /// Fields on which equal values are stored adjacently.
    pub grouped: Option<FieldSet>,
}

impl LocalProperties {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn sorted(fields: &[usize]) -> Self {
        Self {
            ordering: fields.to_vec(),
            grouped: None,
        }
    }

    pub fn grouped(fields: FieldSet) -> Self {
        Self {
            ordering: Vec::new(),
            grouped: Some(fields),
        }
    }

    pub fn is_trivial(&self) -> bool {
        self.ordering.is_empty() && self.grouped.is_none()
    }

    /// Grouped on exactly `fields`, either declared or implied by a sort
    /// whose leading fields are that set.
    pub fn is_grouped_on(&self, fields: &FieldSet) -> bool {
        if fields.is_empty() {
            return true;
        }
        if self.grouped.as_ref() == Some(fields) {
            return true;
        }
        self.ordering.len() >= fields.len()
            && field_set(&self.ordering[..fields.len()]) == *fields
    }

    pub fn is_met_by(&self, actual: &LocalProperties) -> bool {
        let order_ok = self.ordering.is_empty() || actual.ordering.starts_with(&self.ordering);
        let group_ok = match &self.grouped {
            None => true,
            Some(g) => actual.is_grouped_on(g),
        };
        order_ok && group_ok
    }

    /// Field order a sort must use to establish these properties.
    pub fn sort_fields(&self) -> Vec<usize> {
        if !self.ordering.is_empty() {
            return self.ordering.clone();
        }
        self.grouped
            .as_ref()
            .map(|g| g.iter().copied().collect())
            .unwrap_or_default()
    }

    fn fields(&self) -> FieldSet {
        let mut out = field_set(&self.ordering);
        if let Some(g) = &self.grouped {
            out.extend(g.iter().copied());
        }
        out
    }
}

impl fmt::Display for LocalProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.ordering[..], &self.grouped) {
            ([], None) => write!(f, "none"),
            (order, None) => write!(f, "sorted{:?}", order),
            ([], Some(g)) => write!(f, "grouped{}", fmt_fields(g)),
            (order, Some(g)) => write!(f, "sorted{:?}+grouped{}", order, fmt_fields(g)),
        }
    }
}

fn fmt_fields(fields: &FieldSet) -> String {
    let inner: Vec<String> = fields.iter().map(|f| f.to_string()).collect();
    format!("[{}]", inner.join(","))
}

/// A property combination a consumer would benefit from, together with the
/// cost of establishing it from scratch on the connection it is attached to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InterestingProperties {
    pub global: GlobalProperties,
    pub local: LocalProperties,
    pub max_cost: Costs,
}

impl InterestingProperties {
    pub fn new(global: GlobalProperties, local: LocalProperties) -> Self {
        Self {
            global,
            local,
            max_cost: Costs::zero(),
        }
    }

    pub fn partitioned(fields: FieldSet) -> Self {
        Self::new(GlobalProperties::hash_partitioned(fields), LocalProperties::none())
    }

    pub fn partitioned_and_grouped(fields: FieldSet) -> Self {
        Self::new(
            GlobalProperties::hash_partitioned(fields.clone()),
            LocalProperties::grouped(fields),
        )
    }

    pub fn replicated() -> Self {
        Self::new(GlobalProperties::replicated(), LocalProperties::none())
    }

    pub fn with_max_cost(mut self, max_cost: Costs) -> Self {
        self.max_cost = max_cost;
        self
    }

    pub fn is_trivial(&self) -> bool {
        self.global.is_trivial() && self.local.is_trivial()
    }

    pub fn is_met_by(&self, global: &GlobalProperties, local: &LocalProperties) -> bool {
        self.global.is_met_by(global) && self.local.is_met_by(local)
    }

    /// Same requested properties, ignoring the attached cost.
    pub fn same_request(&self, other: &InterestingProperties) -> bool {
        self.global == other.global && self.local == other.local
    }

    pub fn mentioned_fields(&self) -> FieldSet {
        let mut out = self.global.fields();
        out.extend(self.local.fields());
        out
    }

    /// The part of a request on an operator's output that is worth asking of
    /// its input, given the operator's output contract and the key fields the
    /// contract keeps intact.
    pub fn filter_by_contract(
        &self,
        contract: OutputContract,
        preserved: &FieldSet,
    ) -> Option<InterestingProperties> {
        if !contract.preserves_keys() {
            return None;
        }
        if !self.mentioned_fields().is_subset(preserved) {
            return None;
        }
        let local = if contract.is_same_key_family() {
            self.local.clone()
        } else {
            LocalProperties::none()
        };
        let filtered = InterestingProperties {
            global: self.global.clone(),
            local,
            max_cost: self.max_cost,
        };
        (!filtered.is_trivial()).then_some(filtered)
    }
}

/// Add `ip` to `list` unless an equal request is already there.
pub fn merge_interesting(list: &mut Vec<InterestingProperties>, ip: InterestingProperties) {
    if !list.iter().any(|existing| existing.same_request(&ip)) {
        list.push(ip);
    }
}

/// Properties of an operator's output derived from the properties of the
/// input its output contract refers to.
pub fn filter_output_by_contract(
    global: &GlobalProperties,
    local: &LocalProperties,
    contract: OutputContract,
    preserved: &FieldSet,
) -> (GlobalProperties, LocalProperties) {
    if !contract.preserves_keys() {
        return (GlobalProperties::any(), LocalProperties::none());
    }
    let global = if global.fields().is_subset(preserved) {
        global.clone()
    } else {
        GlobalProperties::any()
    };
    let local = if contract.is_same_key_family() && local.fields().is_subset(preserved) {
        local.clone()
    } else {
        LocalProperties::none()
    };
    (global, local)
}
