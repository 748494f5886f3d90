//! Optimizer configuration that callers can serialize/deserialize.

use serde::{Deserialize, Serialize};

use crate::error::{CompilerError, Result};

/// Weights collapsing the cost dimensions into one comparable total.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostWeights {
    /// Bytes moved between workers.
    pub network: f64,
    /// Bytes spilled to and re-read from secondary storage.
    pub disk: f64,
    /// Per-record CPU work (comparisons, hashing).
    pub cpu: f64,
}

impl Default for CostWeights {
    fn default() -> Self {
        Self {
            network: 10.0,
            disk: 1.0,
            cpu: 0.01,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Degree of parallelism for operators that declare none and carry no hint.
    pub default_parallelism: u32,

    /// Per-node working memory assumed by the cost model when no `memory` hint exists.
    pub default_memory_bytes: u64,

    pub cost_weights: CostWeights,

    /// Discard dominated candidates. Disabling keeps every candidate alive.
    pub prune_dominated: bool,

    /// Upper bound on candidates created during one run. Once reached, every
    /// remaining node keeps only its first compatible candidate.
    pub enumeration_budget: Option<usize>,

    /// Wall-clock enumeration deadline in milliseconds, same fallback as the budget.
    pub deadline_ms: Option<u64>,

    /// Number of root candidates reported in the ranked result.
    pub max_ranked_plans: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            default_parallelism: 4,
            default_memory_bytes: 64 * 1024 * 1024, // 64 MiB
            cost_weights: CostWeights::default(),
            prune_dominated: true,
            enumeration_budget: None,
            deadline_ms: None,
            max_ranked_plans: 8,
        }
    }
}

impl OptimizerConfig {
    /// Defaults overlaid with `DAGOPT_*` environment variables.
    /// Unparsable values are ignored.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(s) = std::env::var("DAGOPT_DEFAULT_PARALLELISM") {
            if let Ok(v) = s.parse::<u32>() {
                cfg.default_parallelism = v;
            }
        }

        if let Ok(s) = std::env::var("DAGOPT_DEFAULT_MEMORY_BYTES") {
            if let Ok(v) = s.parse::<u64>() {
                cfg.default_memory_bytes = v;
            }
        }

        if let Ok(s) = std::env::var("DAGOPT_PRUNE_DOMINATED") {
            if let Ok(v) = s.parse::<bool>() {
                cfg.prune_dominated = v;
            }
        }

        if let Ok(s) = std::env::var("DAGOPT_ENUMERATION_BUDGET") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.enumeration_budget = Some(v);
            }
        }

        if let Ok(s) = std::env::var("DAGOPT_DEADLINE_MS") {
            if let Ok(v) = s.parse::<u64>() {
                cfg.deadline_ms = Some(v);
            }
        }

        if let Ok(s) = std::env::var("DAGOPT_MAX_RANKED_PLANS") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.max_ranked_plans = v;
            }
        }

        if let Ok(s) = std::env::var("DAGOPT_NETWORK_WEIGHT") {
            if let Ok(v) = s.parse::<f64>() {
                cfg.cost_weights.network = v;
            }
        }

        if let Ok(s) = std::env::var("DAGOPT_DISK_WEIGHT") {
            if let Ok(v) = s.parse::<f64>() {
                cfg.cost_weights.disk = v;
            }
        }

        if let Ok(s) = std::env::var("DAGOPT_CPU_WEIGHT") {
            if let Ok(v) = s.parse::<f64>() {
                cfg.cost_weights.cpu = v;
            }
        }

        cfg
    }

    /// Reject values the optimizer cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.default_parallelism == 0 {
            return Err(CompilerError::InvalidConfig(
                "default_parallelism must be at least 1".into(),
            ));
        }
        if self.default_memory_bytes == 0 {
            return Err(CompilerError::InvalidConfig(
                "default_memory_bytes must be positive".into(),
            ));
        }
        let w = &self.cost_weights;
        for (name, v) in [("network", w.network), ("disk", w.disk), ("cpu", w.cpu)] {
            if !v.is_finite() || v < 0.0 {
                return Err(CompilerError::InvalidConfig(format!(
                    "cost weight '{name}' must be a finite non-negative number, got {v}"
                )));
            }
        }
        if self.max_ranked_plans == 0 {
            return Err(CompilerError::InvalidConfig(
                "max_ranked_plans must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
