//! Cost vectors and the model that assigns them to ship, local and driver
//! strategies.
//!
//! Every dimension is `Option<f64>`; `None` means unknown and absorbs
//! anything it is added to. A candidate with any unknown dimension has an
//! unknown total and never takes part in dominance checks.

use std::ops::{Add, AddAssign};

use dagopt_core::config::CostWeights;
use serde::Serialize;

use crate::plan::{DriverStrategy, LocalStrategy, ShipStrategy};
use crate::properties::{InterestingProperties, Partitioning};
use crate::stats::Estimates;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Costs {
    /// Bytes shipped over the network.
    pub network: Option<f64>,
    /// Bytes written to and read back from disk.
    pub disk: Option<f64>,
    pub cpu: Option<f64>,
}

impl Default for Costs {
    fn default() -> Self {
        Self::zero()
    }
}

impl Costs {
    pub fn zero() -> Self {
        Self::new(Some(0.0), Some(0.0), Some(0.0))
    }

    pub fn unknown() -> Self {
        Self::new(None, None, None)
    }

    pub fn new(network: Option<f64>, disk: Option<f64>, cpu: Option<f64>) -> Self {
        Self { network, disk, cpu }
    }

    pub fn network(v: Option<f64>) -> Self {
        Self::new(v, Some(0.0), Some(0.0))
    }

    pub fn disk(v: Option<f64>) -> Self {
        Self::new(Some(0.0), v, Some(0.0))
    }

    pub fn cpu(v: Option<f64>) -> Self {
        Self::new(Some(0.0), Some(0.0), v)
    }

    pub fn is_known(&self) -> bool {
        self.network.is_some() && self.disk.is_some() && self.cpu.is_some()
    }

    /// Weighted scalar; `None` if any dimension is unknown.
    pub fn total(&self, weights: &CostWeights) -> Option<f64> {
        Some(
            self.network? * weights.network + self.disk? * weights.disk + self.cpu? * weights.cpu,
        )
    }
}

fn add_opt(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    Some(a? + b?)
}

impl Add for Costs {
    type Output = Costs;

    fn add(self, rhs: Costs) -> Costs {
        Costs {
            network: add_opt(self.network, rhs.network),
            disk: add_opt(self.disk, rhs.disk),
            cpu: add_opt(self.cpu, rhs.cpu),
        }
    }
}

impl AddAssign for Costs {
    fn add_assign(&mut self, rhs: Costs) {
        *self = *self + rhs;
    }
}

/// Pluggable pricing of physical strategies.
///
/// `input` is always the producer-side estimate of the data crossing the
/// channel; `parallelism` and `memory_bytes` describe the consuming node.
pub trait CostModel {
    fn ship_cost(&self, ship: &ShipStrategy, input: &Estimates, parallelism: u32) -> Costs;

    fn local_cost(&self, local: &LocalStrategy, input: &Estimates, memory_bytes: u64) -> Costs;

    fn driver_cost(&self, driver: DriverStrategy, inputs: &[&Estimates], memory_bytes: u64)
        -> Costs;

    fn weights(&self) -> &CostWeights;

    fn total(&self, costs: &Costs) -> Option<f64> {
        costs.total(self.weights())
    }

    /// Cost of establishing `ip` from data with no useful properties.
    fn realization_cost(
        &self,
        ip: &InterestingProperties,
        input: &Estimates,
        parallelism: u32,
        memory_bytes: u64,
    ) -> Costs {
        let ship = match &ip.global.partitioning {
            Partitioning::Any => ShipStrategy::Forward,
            Partitioning::HashPartitioned(fields) => ShipStrategy::PartitionHash(fields.clone()),
            Partitioning::Replicated => ShipStrategy::Broadcast,
        };
        let local = if ip.local.is_trivial() {
            LocalStrategy::None
        } else {
            LocalStrategy::Sort(ip.local.sort_fields())
        };
        self.ship_cost(&ship, input, parallelism) + self.local_cost(&local, input, memory_bytes)
    }
}

/// Network-dominated model: shipping a byte is priced far above spilling or
/// touching it.
#[derive(Debug, Clone, Default)]
pub struct DefaultCostModel {
    weights: CostWeights,
}

impl DefaultCostModel {
    pub fn new(weights: CostWeights) -> Self {
        Self { weights }
    }
}

/// Bytes spilled (written then re-read) when `size` exceeds `memory`.
fn spill(size: Option<f64>, memory_bytes: u64) -> Option<f64> {
    size.map(|s| if s > memory_bytes as f64 { 2.0 * s } else { 0.0 })
}

fn records(e: &Estimates) -> Option<f64> {
    e.num_records
}

impl CostModel for DefaultCostModel {
    fn ship_cost(&self, ship: &ShipStrategy, input: &Estimates, parallelism: u32) -> Costs {
        match ship {
            ShipStrategy::Forward => Costs::zero(),
            ShipStrategy::PartitionHash(_) => Costs::network(input.output_size),
            ShipStrategy::Broadcast => {
                Costs::network(input.output_size.map(|s| s * parallelism as f64))
            }
        }
    }

    fn local_cost(&self, local: &LocalStrategy, input: &Estimates, memory_bytes: u64) -> Costs {
        match local {
            LocalStrategy::None => Costs::zero(),
            LocalStrategy::Sort(_) => {
                let cpu = records(input).map(|n| if n > 1.0 { n * n.log2() } else { 0.0 });
                Costs::new(Some(0.0), spill(input.output_size, memory_bytes), cpu)
            }
        }
    }

    fn driver_cost(
        &self,
        driver: DriverStrategy,
        inputs: &[&Estimates],
        memory_bytes: u64,
    ) -> Costs {
        use DriverStrategy::*;
        let first = inputs.first().copied();
        let second = inputs.get(1).copied();
        let n = |e: Option<&Estimates>| e.and_then(records);
        let size = |e: Option<&Estimates>| e.and_then(|e| e.output_size);

        match driver {
            DataSource | Map | DataSink | Union | SinkJoiner => Costs::zero(),
            SortedGroupReduce => Costs::cpu(n(first)),
            SortedCoGroup | SortMerge => Costs::cpu(add_opt(n(first), n(second))),
            HybridHashBuildFirst => Costs::new(
                Some(0.0),
                spill(size(first), memory_bytes),
                add_opt(n(first), n(second)),
            ),
            HybridHashBuildSecond => Costs::new(
                Some(0.0),
                spill(size(second), memory_bytes),
                add_opt(n(first), n(second)),
            ),
            NestedLoopBlockedOuterFirst | NestedLoopBlockedOuterSecond => {
                let inner = if driver == NestedLoopBlockedOuterFirst {
                    second
                } else {
                    first
                };
                let cpu = match (n(first), n(second)) {
                    (Some(a), Some(b)) => Some(a * b),
                    _ => None,
                };
                Costs::new(Some(0.0), spill(size(inner), memory_bytes), cpu)
            }
        }
    }

    fn weights(&self) -> &CostWeights {
        &self.weights
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::properties::field_set;

    fn est(records: f64, size: f64) -> Estimates {
        Estimates {
            num_records: Some(records),
            key_cardinality: None,
            output_size: Some(size),
            avg_record_width: Some(size / records),
        }
    }

    #[test]
    fn unknown_absorbs() {
        let c = Costs::zero() + Costs::network(None);
        assert!(!c.is_known());
        assert_eq!(c.total(&CostWeights::default()), None);
        let c = Costs::network(Some(2.0)) + Costs::cpu(Some(100.0));
        assert_eq!(c.total(&CostWeights::default()), Some(21.0));
    }

    #[test]
    fn broadcast_scales_with_parallelism() {
        let model = DefaultCostModel::default();
        let e = est(10.0, 1000.0);
        let part = model.ship_cost(&ShipStrategy::PartitionHash(field_set(&[0])), &e, 4);
        let bc = model.ship_cost(&ShipStrategy::Broadcast, &e, 4);
        assert_eq!(part.network, Some(1000.0));
        assert_eq!(bc.network, Some(4000.0));
        assert_eq!(model.ship_cost(&ShipStrategy::Forward, &e, 4), Costs::zero());
    }

    #[test]
    fn sort_spills_past_memory() {
        let model = DefaultCostModel::default();
        let e = est(1024.0, 4096.0);
        let in_mem = model.local_cost(&LocalStrategy::Sort(vec![0]), &e, 8192);
        assert_eq!(in_mem.disk, Some(0.0));
        assert_eq!(in_mem.cpu, Some(1024.0 * 10.0));
        let spilled = model.local_cost(&LocalStrategy::Sort(vec![0]), &e, 1024);
        assert_eq!(spilled.disk, Some(8192.0));
    }

    #[test]
    fn hash_join_spills_build_side() {
        let model = DefaultCostModel::default();
        let small = est(10.0, 100.0);
        let big = est(1000.0, 100_000.0);
        let build_small = model.driver_cost(DriverStrategy::HybridHashBuildFirst, &[&small, &big], 1000);
        let build_big = model.driver_cost(DriverStrategy::HybridHashBuildSecond, &[&small, &big], 1000);
        assert_eq!(build_small.disk, Some(0.0));
        assert_eq!(build_big.disk, Some(200_000.0));
        assert_eq!(build_small.cpu, Some(1010.0));
    }

    #[test]
    fn unknown_sizes_make_ship_cost_unknown() {
        let model = DefaultCostModel::default();
        let c = model.ship_cost(&ShipStrategy::Broadcast, &Estimates::unknown(), 8);
        assert!(!c.is_known());
    }
}
