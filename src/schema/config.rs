//! Configuration types for a tuning run.

use serde::{Deserialize, Serialize};

use crate::compute::FeatureKind;

/// A tunable quantity: a path into the model plus search bounds.
///
/// The ordered sequence of parameter specs defines the vector encoding used
/// by the optimizer: candidate component `i` always corresponds to
/// `parameters[i]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterSpec {
    /// Dotted path into the model, e.g. `"naChans/density"`.
    pub path: String,
    /// Lower search bound.
    pub min: f64,
    /// Upper search bound.
    pub max: f64,
    /// Unit label, informational only.
    #[serde(default)]
    pub unit: Option<String>,
}

impl ParameterSpec {
    /// Clamp a value into this spec's bounds.
    pub fn clip(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }

    /// Width of the search interval.
    pub fn range(&self) -> f64 {
        self.max - self.min
    }
}

/// A target electrophysiological feature the search tries to match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetFeature {
    /// Recorded trace this feature is extracted from, e.g. `"pop0[0]/v"`.
    pub location: String,
    /// Which feature to extract.
    pub feature: FeatureKind,
    /// Desired value.
    pub target: f64,
    /// Normalization scale: one tolerance of deviation contributes one
    /// weight unit of error.
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
    /// Relative importance. Non-negative; at least one target must have a
    /// positive weight.
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_tolerance() -> f64 {
    1.0
}
fn default_weight() -> f64 {
    1.0
}

/// How per-feature errors are combined into one scalar fitness.
///
/// This is explicit configuration because it determines how the search
/// trades off conflicting objectives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ErrorAggregation {
    /// Sum of weighted normalized absolute errors.
    #[default]
    SumOfAbs,
    /// Sum of squared weighted normalized errors.
    SumOfSquares,
}

/// Knobs for the generational search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Number of individuals per generation.
    #[serde(default = "default_population_size")]
    pub population_size: usize,
    /// Total evaluation budget. The search runs
    /// `max_evaluations / population_size` generations.
    #[serde(default = "default_max_evaluations")]
    pub max_evaluations: usize,
    /// Number of ranked survivors used as the parent pool.
    #[serde(default = "default_num_selected")]
    pub num_selected: usize,
    /// Number of offspring generated per generation.
    #[serde(default = "default_num_offspring")]
    pub num_offspring: usize,
    /// Best individuals carried into the next generation unchanged.
    #[serde(default = "default_num_elites")]
    pub num_elites: usize,
    /// Per-component mutation probability (0.0-1.0).
    #[serde(default = "default_mutation_rate")]
    pub mutation_rate: f64,
    /// Gaussian mutation standard deviation as a fraction of each
    /// parameter's bound range.
    #[serde(default = "default_mutation_strength")]
    pub mutation_strength: f64,
    /// RNG seed for reproducible runs. A random seed is drawn when absent.
    #[serde(default)]
    pub seed: Option<u64>,
    /// Candidates injected into generation 0, clipped to bounds. Each must
    /// have one value per parameter spec.
    #[serde(default)]
    pub seed_candidates: Vec<Vec<f64>>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            population_size: default_population_size(),
            max_evaluations: default_max_evaluations(),
            num_selected: default_num_selected(),
            num_offspring: default_num_offspring(),
            num_elites: default_num_elites(),
            mutation_rate: default_mutation_rate(),
            mutation_strength: default_mutation_strength(),
            seed: None,
            seed_candidates: Vec::new(),
        }
    }
}

fn default_population_size() -> usize {
    20
}
fn default_max_evaluations() -> usize {
    20
}
fn default_num_selected() -> usize {
    10
}
fn default_num_offspring() -> usize {
    20
}
fn default_num_elites() -> usize {
    1
}
fn default_mutation_rate() -> f64 {
    0.5
}
fn default_mutation_strength() -> f64 {
    0.1
}

/// Settings handed to the simulation runner for every candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationSettings {
    /// Simulation duration in milliseconds.
    #[serde(default = "default_duration_ms")]
    pub duration_ms: f64,
    /// Integration time step in milliseconds.
    #[serde(default = "default_dt_ms")]
    pub dt_ms: f64,
    /// Features are extracted from the trace after this time, so that
    /// initial transients are ignored.
    #[serde(default)]
    pub analysis_start_ms: f64,
    /// Wall-clock budget for evaluating one whole generation. Evaluations
    /// still outstanding at the deadline are scored with the sentinel
    /// fitness instead of blocking the search.
    #[serde(default)]
    pub generation_timeout_ms: Option<u64>,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            duration_ms: default_duration_ms(),
            dt_ms: default_dt_ms(),
            analysis_start_ms: 0.0,
            generation_timeout_ms: None,
        }
    }
}

fn default_duration_ms() -> f64 {
    500.0
}
fn default_dt_ms() -> f64 {
    0.025
}

/// Top-level configuration for a tuning run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TuningConfig {
    /// Tunable parameters; order defines the candidate vector encoding.
    pub parameters: Vec<ParameterSpec>,
    /// Target features defining the fitness landscape.
    pub targets: Vec<TargetFeature>,
    /// Generational search knobs.
    #[serde(default)]
    pub search: SearchConfig,
    /// Per-candidate simulation settings.
    #[serde(default)]
    pub simulation: SimulationSettings,
    /// How per-feature errors combine into one fitness scalar.
    #[serde(default)]
    pub aggregation: ErrorAggregation,
}

/// Tuning configuration validation errors.
///
/// All of these are fatal and reported before any simulation work begins.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no tunable parameters specified")]
    NoParameters,
    #[error("no target features specified")]
    NoTargets,
    #[error("parameter '{path}' has min ({min}) > max ({max})")]
    InvalidBounds { path: String, min: f64, max: f64 },
    #[error("parameter path '{path}' is malformed (expected 'component/field')")]
    MalformedPath { path: String },
    #[error("parameter path '{path}' does not resolve to a model quantity")]
    UnknownParameter { path: String },
    #[error("population size must be at least 1")]
    EmptyPopulation,
    #[error("num_selected must be at least 1")]
    NoSurvivors,
    #[error("num_offspring must be at least 1")]
    NoOffspring,
    #[error("mutation rate {0} outside [0, 1]")]
    InvalidMutationRate(f64),
    #[error("target '{location}' has negative weight {weight}")]
    NegativeWeight { location: String, weight: f64 },
    #[error("target '{location}' has non-positive tolerance {tolerance}")]
    InvalidTolerance { location: String, tolerance: f64 },
    #[error("all target weights are zero")]
    ZeroWeights,
    #[error("seed candidate {index} has {got} values, expected {expected}")]
    SeedCandidateShape {
        index: usize,
        got: usize,
        expected: usize,
    },
    #[error("simulation duration and time step must be positive")]
    InvalidSimulationTimes,
}

impl TuningConfig {
    /// Validate the configuration. Called before any simulation work; every
    /// failure here is a structural problem the user must fix.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.parameters.is_empty() {
            return Err(ConfigError::NoParameters);
        }
        if self.targets.is_empty() {
            return Err(ConfigError::NoTargets);
        }

        for spec in &self.parameters {
            if spec.min > spec.max {
                return Err(ConfigError::InvalidBounds {
                    path: spec.path.clone(),
                    min: spec.min,
                    max: spec.max,
                });
            }
        }

        if self.search.population_size < 1 {
            return Err(ConfigError::EmptyPopulation);
        }
        if self.search.num_selected < 1 {
            return Err(ConfigError::NoSurvivors);
        }
        if self.search.num_offspring < 1 {
            return Err(ConfigError::NoOffspring);
        }
        if !(0.0..=1.0).contains(&self.search.mutation_rate) {
            return Err(ConfigError::InvalidMutationRate(self.search.mutation_rate));
        }

        let mut any_weight = false;
        for t in &self.targets {
            if t.weight < 0.0 {
                return Err(ConfigError::NegativeWeight {
                    location: t.location.clone(),
                    weight: t.weight,
                });
            }
            if t.tolerance <= 0.0 {
                return Err(ConfigError::InvalidTolerance {
                    location: t.location.clone(),
                    tolerance: t.tolerance,
                });
            }
            if t.weight > 0.0 {
                any_weight = true;
            }
        }
        if !any_weight {
            return Err(ConfigError::ZeroWeights);
        }

        for (i, seed) in self.search.seed_candidates.iter().enumerate() {
            if seed.len() != self.parameters.len() {
                return Err(ConfigError::SeedCandidateShape {
                    index: i,
                    got: seed.len(),
                    expected: self.parameters.len(),
                });
            }
        }

        if self.simulation.duration_ms <= 0.0 || self.simulation.dt_ms <= 0.0 {
            return Err(ConfigError::InvalidSimulationTimes);
        }

        Ok(())
    }

    /// Number of generations implied by the evaluation budget. Always at
    /// least one.
    pub fn max_generations(&self) -> usize {
        (self.search.max_evaluations / self.search.population_size).max(1)
    }
}
