//! Candidate fitness evaluation.
//!
//! A candidate is a vector of parameter values. Evaluation materializes it
//! into a model, simulates, extracts the target features, and folds the
//! per-feature errors into one scalar. Candidates whose simulation fails
//! outright get the sentinel fitness so ranking pushes them behind every
//! candidate that produced a trace.

use std::time::Instant;

use crate::schema::{
    ConfigError, ErrorAggregation, FeatureScore, TargetFeature, TuningConfig,
};

use super::features;
use super::model::CellModel;
use super::simulate::{Recording, SimulationError, SimulationRunner};

/// Fitness assigned when the simulation itself fails. Ranks behind every
/// finite fitness, including all-features-missing candidates.
pub const SENTINEL_FITNESS: f64 = f64::INFINITY;

/// Error charged per weight unit when a target feature cannot be extracted
/// from an otherwise successful trace. Finite so that a candidate which at
/// least simulates still outranks one that diverges.
pub const MISSING_FEATURE_PENALTY: f64 = 1000.0;

/// Outcome of evaluating one candidate.
#[derive(Debug, Clone)]
pub struct FitnessRecord {
    /// Aggregated scalar error. Lower is better.
    pub fitness: f64,
    /// Per-target breakdown; empty when the simulation failed.
    pub scores: Vec<FeatureScore>,
    /// The simulation diverged or its backend failed.
    pub simulation_failed: bool,
    /// The simulation was cut off by the generation deadline.
    pub timed_out: bool,
}

impl FitnessRecord {
    fn failed(timed_out: bool) -> Self {
        Self {
            fitness: SENTINEL_FITNESS,
            scores: Vec::new(),
            simulation_failed: true,
            timed_out,
        }
    }
}

/// Evaluates candidate vectors against a base model and target features.
pub struct CandidateEvaluator<R: SimulationRunner> {
    base: CellModel,
    config: TuningConfig,
    runner: R,
    paths: Vec<String>,
}

impl<R: SimulationRunner> CandidateEvaluator<R> {
    /// Validates the configuration and probes every parameter path against
    /// the base model, so path typos fail here instead of mid-search.
    pub fn new(base: CellModel, config: TuningConfig, runner: R) -> Result<Self, ConfigError> {
        config.validate()?;
        for spec in &config.parameters {
            base.get_parameter(&spec.path)?;
        }
        let paths = config.parameters.iter().map(|p| p.path.clone()).collect();
        Ok(Self {
            base,
            config,
            runner,
            paths,
        })
    }

    pub fn config(&self) -> &TuningConfig {
        &self.config
    }

    pub fn base_model(&self) -> &CellModel {
        &self.base
    }

    /// Evaluate one candidate vector. Simulation failures are absorbed into
    /// the sentinel fitness rather than propagated; the search keeps going.
    pub fn evaluate(&self, values: &[f64], deadline: Option<Instant>) -> FitnessRecord {
        let model = match self.base.materialize(&self.paths, values) {
            Ok(model) => model,
            // Paths were probed in new(); this only fires if the base model
            // was swapped out underneath us.
            Err(err) => {
                log::error!("candidate could not be materialized: {err}");
                return FitnessRecord::failed(false);
            }
        };
        match self.runner.run(&model, &self.config.simulation, deadline) {
            Ok(recording) => self.score(&recording),
            Err(SimulationError::DeadlineExceeded { time_ms }) => {
                log::debug!("candidate timed out at t = {time_ms} ms");
                FitnessRecord::failed(true)
            }
            Err(err) => {
                log::debug!("candidate simulation failed: {err}");
                FitnessRecord::failed(false)
            }
        }
    }

    /// Score a finished recording against every target.
    pub fn score(&self, recording: &Recording) -> FitnessRecord {
        let mut scores = Vec::with_capacity(self.config.targets.len());
        let mut fitness = 0.0;
        for target in &self.config.targets {
            let measured = self.measure(recording, target);
            let error = match measured {
                Some(value) => {
                    let normalized = target.weight * (value - target.target).abs() / target.tolerance;
                    match self.config.aggregation {
                        ErrorAggregation::SumOfAbs => normalized,
                        ErrorAggregation::SumOfSquares => normalized * normalized,
                    }
                }
                None => target.weight * MISSING_FEATURE_PENALTY,
            };
            fitness += error;
            scores.push(FeatureScore {
                location: target.location.clone(),
                feature: target.feature,
                target: target.target,
                tolerance: target.tolerance,
                weight: target.weight,
                measured,
                error,
            });
        }
        FitnessRecord {
            fitness,
            scores,
            simulation_failed: false,
            timed_out: false,
        }
    }

    fn measure(&self, recording: &Recording, target: &TargetFeature) -> Option<f64> {
        let trace = recording.trace(&target.location)?;
        let (times, values) = features::window(
            &recording.times_ms,
            trace,
            self.config.simulation.analysis_start_ms,
        );
        match features::extract(target.feature, times, values) {
            Ok(value) => Some(value),
            Err(err) => {
                log::debug!("feature {} unavailable: {err}", target.feature);
                None
            }
        }
    }
}


#[cfg(test)]
pub(crate) use fixtures::{frequency_config, FailingStub, FrequencyStub};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::model::hh_model;
    use crate::schema::ErrorAggregation;

    #[test]
    fn matching_candidate_scores_near_zero() {
        let evaluator =
            CandidateEvaluator::new(hh_model(), frequency_config(25.0), FrequencyStub).unwrap();
        let record = evaluator.evaluate(&[100.0], None);
        assert!(!record.simulation_failed);
        assert!(record.fitness < 1.0, "fitness = {}", record.fitness);
        assert_eq!(record.scores.len(), 1);
        let measured = record.scores[0].measured.unwrap();
        assert!((measured - 25.0).abs() < 1.0);
    }

    #[test]
    fn error_is_normalized_by_tolerance() {
        let mut config = frequency_config(25.0);
        config.targets[0].tolerance = 5.0;
        let strict =
            CandidateEvaluator::new(hh_model(), frequency_config(25.0), FrequencyStub).unwrap();
        let lenient = CandidateEvaluator::new(hh_model(), config, FrequencyStub).unwrap();
        let off = [200.0];
        let tight = strict.evaluate(&off, None).fitness;
        let loose = lenient.evaluate(&off, None).fitness;
        assert!((tight / loose - 5.0).abs() < 0.05);
    }

    #[test]
    fn sum_of_squares_squares_the_normalized_error() {
        let mut config = frequency_config(25.0);
        config.aggregation = ErrorAggregation::SumOfSquares;
        let abs_eval =
            CandidateEvaluator::new(hh_model(), frequency_config(25.0), FrequencyStub).unwrap();
        let sq_eval = CandidateEvaluator::new(hh_model(), config, FrequencyStub).unwrap();
        let off = [200.0];
        let e = abs_eval.evaluate(&off, None).fitness;
        let e2 = sq_eval.evaluate(&off, None).fitness;
        assert!((e2 - e * e).abs() < 1e-9 * e * e);
    }

    #[test]
    fn failed_simulation_gets_sentinel() {
        let evaluator =
            CandidateEvaluator::new(hh_model(), frequency_config(25.0), FailingStub).unwrap();
        let record = evaluator.evaluate(&[100.0], None);
        assert!(record.simulation_failed);
        assert!(!record.timed_out);
        assert_eq!(record.fitness, SENTINEL_FITNESS);
        assert!(record.scores.is_empty());
    }

    #[test]
    fn missing_feature_is_penalized_but_finite() {
        // Density 0 produces a silent trace; mean frequency is unavailable.
        let evaluator =
            CandidateEvaluator::new(hh_model(), frequency_config(25.0), FrequencyStub).unwrap();
        let record = evaluator.evaluate(&[0.0], None);
        assert!(!record.simulation_failed);
        assert_eq!(record.fitness, MISSING_FEATURE_PENALTY);
        assert!(record.scores[0].measured.is_none());
        assert!(record.fitness < SENTINEL_FITNESS);
    }

    #[test]
    fn unknown_path_rejected_before_any_simulation() {
        let mut config = frequency_config(25.0);
        config.parameters[0].path = "naChans/vShift".into();
        let err = CandidateEvaluator::new(hh_model(), config, FrequencyStub)
            .err()
            .unwrap();
        assert!(matches!(err, ConfigError::UnknownParameter { .. }));
    }

    #[test]
    fn missing_trace_location_is_penalized() {
        let mut config = frequency_config(25.0);
        config.targets[0].location = "pop1[0]/v".into();
        let evaluator = CandidateEvaluator::new(hh_model(), config, FrequencyStub).unwrap();
        let record = evaluator.evaluate(&[100.0], None);
        assert!(!record.simulation_failed);
        assert_eq!(record.fitness, MISSING_FEATURE_PENALTY);
    }
}
