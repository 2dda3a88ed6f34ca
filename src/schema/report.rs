//! Run artifacts: per-generation statistics and the final tuning report.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::compute::FeatureKind;

/// JSON has no representation for the sentinel (infinite) fitness carried by
/// runs where every candidate failed, so it is written as `null` and read
/// back as infinity. Finite fitness values pass through as plain numbers.
mod sentinel_fitness {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_f64(*value)
        } else {
            serializer.serialize_none()
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::INFINITY))
    }
}

/// Statistics for one fully evaluated generation.
///
/// Mean and standard deviation are computed over candidates that simulated
/// successfully; failed candidates only show up in `failed_evaluations`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationStats {
    pub generation: usize,
    #[serde(with = "sentinel_fitness")]
    pub best_fitness: f64,
    #[serde(with = "sentinel_fitness")]
    pub mean_fitness: f64,
    pub fitness_std: f64,
    /// Candidates whose simulation failed or timed out this generation.
    pub failed_evaluations: usize,
}

/// Fitness progression across the whole run.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TuningHistory {
    pub generations: Vec<GenerationStats>,
}

impl TuningHistory {
    /// Best fitness per generation, in order.
    pub fn best_per_generation(&self) -> Vec<f64> {
        self.generations.iter().map(|g| g.best_fitness).collect()
    }
}

/// Why the search stopped.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum StopReason {
    /// The evaluation budget was exhausted. This is the normal outcome and
    /// does not imply the targets were met.
    BudgetExhausted,
    /// The cancellation handle was triggered.
    Cancelled,
}

/// Measured-vs-target breakdown for one feature of the best candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureScore {
    pub location: String,
    pub feature: FeatureKind,
    pub target: f64,
    pub tolerance: f64,
    pub weight: f64,
    /// Extracted value, absent if the feature could not be computed from
    /// the trace.
    pub measured: Option<f64>,
    /// Weighted normalized error contributed to the fitness.
    pub error: f64,
}

/// Final report of a tuning run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TuningReport {
    /// Best candidate's values, as a flat parameter-path to value mapping.
    pub best_values: BTreeMap<String, f64>,
    /// Scalar fitness of the best candidate (lower is better). Infinite,
    /// and written as `null`, when no candidate ever simulated.
    #[serde(with = "sentinel_fitness")]
    pub best_fitness: f64,
    /// Per-feature breakdown measured on a fresh simulation of the best
    /// candidate.
    pub breakdown: Vec<FeatureScore>,
    /// Generations completed.
    pub generations: usize,
    /// Total candidate evaluations dispatched.
    pub total_evaluations: usize,
    /// Evaluations that ended in a simulation failure or timeout across the
    /// whole run.
    pub failed_simulations: usize,
    /// Wall-clock time for the search.
    pub elapsed_seconds: f64,
    pub stop_reason: StopReason,
    /// RNG seed the run used; rerunning with this seed reproduces the
    /// candidate sequence exactly.
    pub seed: u64,
    pub history: TuningHistory,
}
