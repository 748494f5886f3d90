//! Dominance pruning of one node's candidates.
//!
//! Candidates are only compared with others that made identical choices for
//! every open fork upstream; otherwise a cheaper candidate could displace the
//! only one a reconvergent consumer can pair with. A fork's entry for itself
//! is left out of that comparison. Within a group, `a` dominates `b` when
//! both costs are known, `a` costs no more, and for every requested property
//! `a` meets the global part wherever `b` does and the local part wherever
//! `b` does. Global and local parts are scored separately: data partitioned
//! correctly but not yet sorted still saves the consumer a shuffle.

use std::rc::Rc;

use dagopt_core::id::NodeId;
use tracing::trace;

use crate::cost::CostModel;
use crate::plan::PlanNode;
use crate::properties::InterestingProperties;

struct Scored {
    plan: Rc<PlanNode>,
    /// Per request: (global part met, local part met).
    satisfied: Vec<(bool, bool)>,
    total: Option<f64>,
}

impl Scored {
    fn dominates(&self, other: &Scored, node: NodeId) -> bool {
        if !same_upstream_choices(&self.plan, &other.plan, node) {
            return false;
        }
        let (Some(a), Some(b)) = (self.total, other.total) else {
            return false;
        };
        a <= b
            && self
                .satisfied
                .iter()
                .zip(&other.satisfied)
                .all(|(mine, theirs)| (mine.0 || !theirs.0) && (mine.1 || !theirs.1))
    }
}

/// Branch choices equal once `node`'s own entry is ignored.
fn same_upstream_choices(a: &PlanNode, b: &PlanNode, node: NodeId) -> bool {
    let upstream = |p: &PlanNode| {
        p.branch_choices
            .iter()
            .filter(|(fork, _)| **fork != node)
            .map(|(fork, plan)| (*fork, *plan))
            .collect::<Vec<_>>()
    };
    upstream(a) == upstream(b)
}

/// Survivors of `node`'s candidates in first-seen order, and how many were
/// dropped.
pub fn prune(
    node: NodeId,
    candidates: Vec<Rc<PlanNode>>,
    requested: &[InterestingProperties],
    cost_model: &dyn CostModel,
) -> (Vec<Rc<PlanNode>>, usize) {
    let before = candidates.len();
    let mut kept: Vec<Scored> = Vec::with_capacity(candidates.len());

    for plan in candidates {
        let scored = Scored {
            satisfied: requested
                .iter()
                .map(|ip| {
                    (
                        ip.global.is_met_by(&plan.global),
                        ip.local.is_met_by(&plan.local),
                    )
                })
                .collect(),
            total: cost_model.total(&plan.cumulative_cost),
            plan,
        };
        if kept.iter().any(|k| k.dominates(&scored, node)) {
            continue;
        }
        kept.retain(|k| !scored.dominates(k, node));
        kept.push(scored);
    }

    let pruned = before - kept.len();
    if pruned > 0 {
        trace!(before, kept = kept.len(), "pruned dominated candidates");
    }
    (kept.into_iter().map(|s| s.plan).collect(), pruned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cost::{Costs, DefaultCostModel};
    use crate::plan::{BranchChoices, DriverStrategy};
    use crate::properties::{field_set, GlobalProperties, LocalProperties};
    use dagopt_core::id::{NodeId, PlanId};

    fn candidate(id: u64, cpu: Option<f64>, global: GlobalProperties, choices: BranchChoices) -> Rc<PlanNode> {
        let cost = Costs::cpu(cpu);
        Rc::new(PlanNode {
            id: PlanId::new(id),
            node: NodeId::new(9),
            name: "n".into(),
            strategy: DriverStrategy::Map,
            inputs: Vec::new(),
            global,
            local: LocalProperties::none(),
            own_cost: cost,
            cumulative_cost: cost,
            branch_choices: choices,
        })
    }

    fn ids(plans: &[Rc<PlanNode>]) -> Vec<u64> {
        plans.iter().map(|p| p.id.get()).collect()
    }

    #[test]
    fn cheaper_equivalent_wins_and_ties_keep_first() {
        let model = DefaultCostModel::default();
        let any = GlobalProperties::any;
        let plans = vec![
            candidate(1, Some(300.0), any(), BranchChoices::new()),
            candidate(2, Some(100.0), any(), BranchChoices::new()),
            candidate(3, Some(100.0), any(), BranchChoices::new()),
        ];
        let (kept, pruned) = prune(NodeId::new(9), plans, &[], &model);
        assert_eq!(ids(&kept), vec![2]);
        assert_eq!(pruned, 2);
    }

    #[test]
    fn more_useful_properties_survive_higher_cost() {
        let model = DefaultCostModel::default();
        let keys = field_set(&[0]);
        let requested = vec![InterestingProperties::partitioned(keys.clone())];
        let plans = vec![
            candidate(1, Some(100.0), GlobalProperties::any(), BranchChoices::new()),
            candidate(2, Some(500.0), GlobalProperties::hash_partitioned(keys), BranchChoices::new()),
        ];
        let (kept, _) = prune(NodeId::new(9), plans, &requested, &model);
        assert_eq!(ids(&kept), vec![1, 2]);
    }

    #[test]
    fn unknown_costs_are_kept() {
        let model = DefaultCostModel::default();
        let plans = vec![
            candidate(1, None, GlobalProperties::any(), BranchChoices::new()),
            candidate(2, Some(1.0), GlobalProperties::any(), BranchChoices::new()),
            candidate(3, None, GlobalProperties::any(), BranchChoices::new()),
        ];
        let (kept, pruned) = prune(NodeId::new(9), plans, &[], &model);
        assert_eq!(ids(&kept), vec![1, 2, 3]);
        assert_eq!(pruned, 0);
    }

    #[test]
    fn different_branch_choices_are_not_compared() {
        let model = DefaultCostModel::default();
        let fork = NodeId::new(0);
        let plans = vec![
            candidate(1, Some(1.0), GlobalProperties::any(), BranchChoices::from([(fork, PlanId::new(10))])),
            candidate(2, Some(9.0), GlobalProperties::any(), BranchChoices::from([(fork, PlanId::new(11))])),
        ];
        let (kept, _) = prune(NodeId::new(9), plans, &[], &model);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn minimum_cost_never_rises() {
        let model = DefaultCostModel::default();
        let costs = [7.0, 3.0, 5.0, 3.0, 11.0];
        let plans: Vec<_> = costs
            .iter()
            .enumerate()
            .map(|(i, c)| candidate(i as u64, Some(*c), GlobalProperties::any(), BranchChoices::new()))
            .collect();
        let best_before = plans
            .iter()
            .filter_map(|p| model.total(&p.cumulative_cost))
            .fold(f64::INFINITY, f64::min);
        let (kept, _) = prune(NodeId::new(9), plans, &[], &model);
        let best_after = kept
            .iter()
            .filter_map(|p| model.total(&p.cumulative_cost))
            .fold(f64::INFINITY, f64::min);
        assert!(best_after <= best_before);
    }

    #[test]
    fn partitioned_but_unsorted_survives_a_cheaper_unpartitioned_plan() {
        let model = DefaultCostModel::default();
        let keys = field_set(&[0]);
        let requested = vec![InterestingProperties::partitioned_and_grouped(keys.clone())];
        let plans = vec![
            candidate(1, Some(100.0), GlobalProperties::any(), BranchChoices::new()),
            candidate(2, Some(500.0), GlobalProperties::hash_partitioned(keys), BranchChoices::new()),
        ];
        // Neither meets the whole request, but only the second spares a shuffle.
        let (kept, pruned) = prune(NodeId::new(9), plans, &requested, &model);
        assert_eq!(ids(&kept), vec![1, 2]);
        assert_eq!(pruned, 0);
    }

    #[test]
    fn own_fork_entry_does_not_separate_candidates() {
        let model = DefaultCostModel::default();
        let this = NodeId::new(9);
        let upstream = NodeId::new(0);
        let choices = |own: u64| {
            BranchChoices::from([(upstream, PlanId::new(10)), (this, PlanId::new(own))])
        };
        let plans = vec![
            candidate(1, Some(9.0), GlobalProperties::any(), choices(1)),
            candidate(2, Some(1.0), GlobalProperties::any(), choices(2)),
        ];
        let (kept, pruned) = prune(this, plans, &[], &model);
        assert_eq!(ids(&kept), vec![2]);
        assert_eq!(pruned, 1);
    }
}
