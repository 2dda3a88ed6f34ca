//! Generational search over model parameters.
//!
//! Truncation selection with elitism: each generation the population is
//! ranked by fitness (lower is better), the top `num_selected` form the
//! parent pool, `num_elites` survive unchanged, and offspring are produced
//! by blend crossover plus bounded Gaussian mutation. The search runs a
//! fixed number of generations implied by the evaluation budget.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use rand::prelude::*;
use rayon::prelude::*;

use crate::schema::{
    ConfigError, FeatureScore, GenerationStats, ParameterSpec, StopReason, TuningHistory,
    TuningReport,
};

use super::evaluate::{CandidateEvaluator, FitnessRecord, SENTINEL_FITNESS};
use super::simulate::SimulationRunner;

/// A candidate parameter vector in the population.
#[derive(Debug, Clone)]
pub struct Candidate {
    /// One value per parameter spec, always within bounds.
    pub values: Vec<f64>,
    /// Aggregated error; lower is better. Sentinel when the simulation
    /// failed or the candidate has not been evaluated yet.
    pub fitness: f64,
    /// Per-target breakdown from the last evaluation.
    pub scores: Vec<FeatureScore>,
    /// The simulation diverged, failed, or hit the generation deadline.
    pub simulation_failed: bool,
    /// Hit the generation deadline specifically.
    pub timed_out: bool,
    /// Generation this candidate was created in.
    pub generation: usize,
    evaluated: bool,
}

impl Candidate {
    fn new(values: Vec<f64>, generation: usize) -> Self {
        Self {
            values,
            fitness: SENTINEL_FITNESS,
            scores: Vec::new(),
            simulation_failed: false,
            timed_out: false,
            generation,
            evaluated: false,
        }
    }

    fn apply(&mut self, record: FitnessRecord) {
        self.fitness = record.fitness;
        self.scores = record.scores;
        self.simulation_failed = record.simulation_failed;
        self.timed_out = record.timed_out;
        self.evaluated = true;
    }
}

/// Random number generator wrapper for candidate operations.
struct ParamRng {
    rng: StdRng,
}

impl ParamRng {
    fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Uniform draw within a parameter's bounds.
    fn uniform(&mut self, spec: &ParameterSpec) -> f64 {
        self.rng.gen_range(spec.min..=spec.max)
    }

    fn random_candidate(&mut self, specs: &[ParameterSpec], generation: usize) -> Candidate {
        let values = specs.iter().map(|spec| self.uniform(spec)).collect();
        Candidate::new(values, generation)
    }

    /// Per-component blend of two parents.
    fn crossover(&mut self, parent1: &[f64], parent2: &[f64]) -> Vec<f64> {
        parent1
            .iter()
            .zip(parent2)
            .map(|(&a, &b)| {
                let alpha: f64 = self.rng.gen_range(0.0..=1.0);
                alpha * a + (1.0 - alpha) * b
            })
            .collect()
    }

    /// Gaussian perturbation scaled to the bound range, clamped back in.
    fn gaussian_mutate(&mut self, value: f64, strength: f64, spec: &ParameterSpec) -> f64 {
        let noise: f64 = self.rng.sample(rand_distr::StandardNormal);
        let mutated = value + noise * strength * spec.range();
        spec.clip(mutated)
    }

    fn mutate(&mut self, values: &mut [f64], rate: f64, strength: f64, specs: &[ParameterSpec]) {
        for (value, spec) in values.iter_mut().zip(specs) {
            if self.rng.gen_range(0.0..1.0) < rate {
                *value = self.gaussian_mutate(*value, strength, spec);
            }
        }
    }
}

/// Engine that runs the generational search.
pub struct TuningEngine<R: SimulationRunner> {
    evaluator: CandidateEvaluator<R>,
    rng: ParamRng,
    seed: u64,
    population: Vec<Candidate>,
    history: TuningHistory,
    generation: usize,
    total_evaluations: usize,
    failed_simulations: usize,
    best: Option<Candidate>,
    cancelled: Arc<AtomicBool>,
}

impl<R: SimulationRunner> TuningEngine<R> {
    /// Create a new engine. The evaluator has already validated the
    /// configuration against the base model.
    pub fn new(evaluator: CandidateEvaluator<R>) -> Self {
        let seed = evaluator
            .config()
            .search
            .seed
            .unwrap_or_else(rand::random);
        Self {
            evaluator,
            rng: ParamRng::new(seed),
            seed,
            population: Vec::new(),
            history: TuningHistory::default(),
            generation: 0,
            total_evaluations: 0,
            failed_simulations: 0,
            best: None,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Convenience constructor from the raw pieces.
    pub fn from_parts(
        base: super::model::CellModel,
        config: crate::schema::TuningConfig,
        runner: R,
    ) -> Result<Self, ConfigError> {
        Ok(Self::new(CandidateEvaluator::new(base, config, runner)?))
    }

    /// Handle for cancelling the search from another thread. Checked
    /// between generations.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    /// Build generation 0: injected seed candidates (clipped to bounds)
    /// followed by uniform random fill.
    fn initialize(&mut self) {
        let specs = self.evaluator.config().parameters.clone();
        let search = self.evaluator.config().search.clone();
        self.population.clear();
        self.generation = 0;

        for seed in search.seed_candidates.iter().take(search.population_size) {
            let values = seed
                .iter()
                .zip(&specs)
                .map(|(&v, spec)| spec.clip(v))
                .collect();
            self.population.push(Candidate::new(values, 0));
        }
        while self.population.len() < search.population_size {
            self.population.push(self.rng.random_candidate(&specs, 0));
        }
    }

    /// Evaluate every unevaluated candidate, in parallel, against a shared
    /// generation deadline.
    fn evaluate_population(&mut self) {
        let evaluator = &self.evaluator;
        let deadline = evaluator
            .config()
            .simulation
            .generation_timeout_ms
            .map(|ms| Instant::now() + Duration::from_millis(ms));

        let fresh: Vec<usize> = self
            .population
            .iter()
            .enumerate()
            .filter(|(_, c)| !c.evaluated)
            .map(|(i, _)| i)
            .collect();

        self.population
            .par_iter_mut()
            .filter(|candidate| !candidate.evaluated)
            .for_each(|candidate| {
                let record = evaluator.evaluate(&candidate.values, deadline);
                candidate.apply(record);
            });

        self.total_evaluations += fresh.len();
        self.failed_simulations += fresh
            .iter()
            .filter(|&&i| self.population[i].simulation_failed)
            .count();
    }

    /// Rank the population best-first. Stable, so candidates with equal
    /// fitness (including the sentinel) keep their insertion order and
    /// ranking stays deterministic.
    fn rank(&mut self) {
        self.population
            .sort_by(|a, b| a.fitness.total_cmp(&b.fitness));
    }

    /// Record stats for the just-evaluated generation and update the
    /// best-ever candidate. Assumes the population is ranked.
    fn record_generation(&mut self) {
        let failed = self
            .population
            .iter()
            .filter(|c| c.simulation_failed)
            .count();

        let finite: Vec<f64> = self
            .population
            .iter()
            .map(|c| c.fitness)
            .filter(|f| f.is_finite())
            .collect();
        let (mean, std) = if finite.is_empty() {
            (SENTINEL_FITNESS, 0.0)
        } else {
            let mean = finite.iter().sum::<f64>() / finite.len() as f64;
            let variance =
                finite.iter().map(|f| (f - mean).powi(2)).sum::<f64>() / finite.len() as f64;
            (mean, variance.sqrt())
        };
        let gen_best = self.population[0].fitness;

        log::info!(
            "generation {}: best {:.4}, mean {:.4}, {} failed",
            self.generation,
            gen_best,
            mean,
            failed
        );
        self.history.generations.push(GenerationStats {
            generation: self.generation,
            best_fitness: gen_best,
            mean_fitness: mean,
            fitness_std: std,
            failed_evaluations: failed,
        });

        let improved = self
            .best
            .as_ref()
            .is_none_or(|best| gen_best < best.fitness);
        if improved {
            self.best = Some(self.population[0].clone());
        }
    }

    /// Build the next generation from the ranked current one.
    fn step_generation(&mut self) {
        let specs = self.evaluator.config().parameters.clone();
        let search = self.evaluator.config().search.clone();
        self.generation += 1;

        let mut next_gen = Vec::with_capacity(search.population_size);

        // Elites carry their evaluation with them and are not re-simulated.
        for elite in self.population.iter().take(search.num_elites) {
            next_gen.push(elite.clone());
        }

        let pool = search.num_selected.min(self.population.len());
        for _ in 0..search.num_offspring {
            if next_gen.len() >= search.population_size {
                break;
            }
            let idx1 = self.rng.rng.gen_range(0..pool);
            let idx2 = self.rng.rng.gen_range(0..pool);
            let mut values = self
                .rng
                .crossover(&self.population[idx1].values, &self.population[idx2].values);
            self.rng.mutate(
                &mut values,
                search.mutation_rate,
                search.mutation_strength,
                &specs,
            );
            next_gen.push(Candidate::new(values, self.generation));
        }

        // Small offspring counts are topped up with fresh random draws so
        // the population size stays constant.
        while next_gen.len() < search.population_size {
            next_gen.push(self.rng.random_candidate(&specs, self.generation));
        }

        self.population = next_gen;
    }

    /// Run the search to completion and produce the report.
    pub fn run(&mut self) -> TuningReport {
        let start_time = Instant::now();
        let max_generations = self.evaluator.config().max_generations();

        self.initialize();
        self.evaluate_population();
        self.rank();
        self.record_generation();

        let stop_reason = loop {
            if self.cancelled.load(Ordering::Relaxed) {
                break StopReason::Cancelled;
            }
            if self.generation + 1 >= max_generations {
                break StopReason::BudgetExhausted;
            }
            self.step_generation();
            self.evaluate_population();
            self.rank();
            self.record_generation();
        };

        let best = self
            .best
            .clone()
            .unwrap_or_else(|| self.population[0].clone());

        // Re-simulate the winner without a deadline so the reported
        // breakdown comes from a complete, fresh trace.
        let final_record = self.evaluator.evaluate(&best.values, None);
        let breakdown = if final_record.simulation_failed {
            best.scores.clone()
        } else {
            final_record.scores
        };

        let best_values = self
            .evaluator
            .config()
            .parameters
            .iter()
            .map(|spec| spec.path.clone())
            .zip(best.values.iter().copied())
            .collect();

        TuningReport {
            best_values,
            best_fitness: best.fitness,
            breakdown,
            generations: self.generation + 1,
            total_evaluations: self.total_evaluations,
            failed_simulations: self.failed_simulations,
            elapsed_seconds: start_time.elapsed().as_secs_f64(),
            stop_reason,
            seed: self.seed,
            history: self.history.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::evaluate::{frequency_config, FailingStub, FrequencyStub};
    use crate::compute::model::hh_model;
    use crate::compute::model::CellModel;
    use crate::compute::simulate::{Recording, SimulationError};
    use crate::schema::{SimulationSettings, TuningConfig};
    use proptest::prelude::*;

    fn engine_with(config: TuningConfig) -> TuningEngine<FrequencyStub> {
        TuningEngine::from_parts(hh_model(), config, FrequencyStub).unwrap()
    }

    fn small_config(seed: u64) -> TuningConfig {
        let mut config = frequency_config(25.0);
        config.search.population_size = 8;
        config.search.max_evaluations = 40;
        config.search.num_selected = 4;
        config.search.num_offspring = 8;
        config.search.seed = Some(seed);
        config
    }

    #[test]
    fn same_seed_reproduces_the_run() {
        let a = engine_with(small_config(7)).run();
        let b = engine_with(small_config(7)).run();
        assert_eq!(a.best_values, b.best_values);
        assert_eq!(a.best_fitness, b.best_fitness);
        assert_eq!(a.history.best_per_generation(), b.history.best_per_generation());
    }

    #[test]
    fn search_moves_toward_the_target_density() {
        // The stub fires at density / 4 Hz, so a 25 Hz target means 100.
        let report = engine_with(small_config(12345)).run();
        let density = report.best_values["naChans/density"];
        assert!((density - 100.0).abs() < 50.0, "best density = {density}");
        assert!(report.best_fitness < 15.0, "fitness = {}", report.best_fitness);
        assert_eq!(report.stop_reason, StopReason::BudgetExhausted);
        assert_eq!(report.generations, 5);
        // Eight in generation 0, then seven fresh offspring per generation
        // alongside the carried elite.
        assert_eq!(report.total_evaluations, 36);
    }

    #[test]
    fn two_generation_budget_still_makes_progress() {
        let mut config = frequency_config(70.0);
        config.parameters[0].max = 300.0;
        config.search.population_size = 4;
        config.search.max_evaluations = 8;
        config.search.num_selected = 2;
        config.search.num_offspring = 4;
        config.search.seed = Some(21);
        let report = engine_with(config).run();
        assert_eq!(report.generations, 2);
        let best = report.history.best_per_generation();
        assert!(best[1] <= best[0]);
        let density = report.best_values["naChans/density"];
        assert!((0.0..=300.0).contains(&density));
        // The stub fires at density / 4 Hz, so the 70 Hz target pulls the
        // density toward 280: the winner must sit at least as close to it
        // as generation 0 got, up to spike-time quantization.
        assert!(
            (density - 280.0).abs() <= 4.0 * best[0] + 5.0,
            "density {density}, gen-0 best {}",
            best[0]
        );
    }

    #[test]
    fn best_fitness_never_regresses_across_generations() {
        let report = engine_with(small_config(99)).run();
        let best = report.history.best_per_generation();
        for pair in best.windows(2) {
            assert!(pair[1] <= pair[0], "regression in {best:?}");
        }
    }

    #[test]
    fn seed_candidate_is_injected_and_clipped() {
        let mut config = small_config(3);
        config.search.max_evaluations = 8;
        config.targets[0].target = 100.0;
        // 1600 is out of bounds and clips to 400, which fires at 100 Hz.
        config.search.seed_candidates = vec![vec![1600.0]];
        let report = engine_with(config).run();
        assert_eq!(report.best_values["naChans/density"], 400.0);
        assert!(report.best_fitness < 1.0);
    }

    #[test]
    fn all_failing_simulations_still_terminate() {
        let mut config = small_config(5);
        config.search.max_evaluations = 16;
        let mut engine = TuningEngine::from_parts(hh_model(), config, FailingStub).unwrap();
        let report = engine.run();
        assert_eq!(report.best_fitness, SENTINEL_FITNESS);
        assert_eq!(report.failed_simulations, report.total_evaluations);
        assert_eq!(report.stop_reason, StopReason::BudgetExhausted);
        let density = report.best_values["naChans/density"];
        assert!((0.0..=400.0).contains(&density));
    }

    #[test]
    fn cancellation_stops_after_the_current_generation() {
        let mut engine = engine_with(small_config(11));
        engine.cancel_handle().store(true, Ordering::Relaxed);
        let report = engine.run();
        assert_eq!(report.stop_reason, StopReason::Cancelled);
        assert_eq!(report.generations, 1);
        assert_eq!(report.total_evaluations, 8);
        assert!(!report.best_values.is_empty());
    }

    /// Sleeps past the generation deadline before producing anything.
    struct SleepyStub;

    impl SimulationRunner for SleepyStub {
        fn run(
            &self,
            _model: &CellModel,
            _settings: &SimulationSettings,
            deadline: Option<std::time::Instant>,
        ) -> Result<Recording, SimulationError> {
            std::thread::sleep(Duration::from_millis(20));
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return Err(SimulationError::DeadlineExceeded { time_ms: 0.0 });
                }
            }
            Ok(Recording::default())
        }
    }

    #[test]
    fn generation_deadline_scores_stragglers_with_the_sentinel() {
        let mut config = small_config(2);
        config.search.population_size = 2;
        config.search.max_evaluations = 2;
        config.simulation.generation_timeout_ms = Some(1);
        let mut engine = TuningEngine::from_parts(hh_model(), config, SleepyStub).unwrap();
        let report = engine.run();
        assert_eq!(report.best_fitness, SENTINEL_FITNESS);
        assert_eq!(report.history.generations[0].failed_evaluations, 2);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(8))]

        #[test]
        fn best_values_always_stay_in_bounds(seed in any::<u64>()) {
            let mut config = small_config(0);
            config.search.seed = Some(seed);
            config.search.max_evaluations = 16;
            let report = engine_with(config).run();
            let density = report.best_values["naChans/density"];
            prop_assert!((0.0..=400.0).contains(&density));
        }
    }
}
