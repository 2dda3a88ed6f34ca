//! Channel gate kinetics: rate forms, Q10 scaling, and voltage sweeps.
//!
//! A gating variable is described either by forward/reverse rates or by
//! steady-state and time-constant curves directly. The analyzer tabulates
//! those curves over a voltage range, which feeds both standalone channel
//! analysis and the built-in simulation runner.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::expression::{Expr, ExpressionError};

/// Errors from tabulating gate kinetics.
#[derive(Debug, Clone, Error)]
pub enum AnalysisError {
    /// The requested voltage range cannot be tabulated.
    #[error("invalid sweep range: [{v_min}, {v_max}] mV in steps of {v_step}")]
    InvalidSweepRange { v_min: f64, v_max: f64, v_step: f64 },
    #[error(transparent)]
    Expression(#[from] ExpressionError),
}

/// Relative width of the window around a removable singularity where the
/// analytic limit is used instead of direct evaluation.
const SINGULARITY_EPS: f64 = 1e-6;

/// Variable names available to generic rate expressions.
const RATE_SYMBOLS: [&str; 3] = ["v", "ca", "temp"];

/// A voltage-dependent rate (or curve) in one of the standard
/// Hodgkin-Huxley forms, or a free-form expression.
///
/// For the closed forms, `x = (v - midpoint) / scale` with `v` in mV.
/// Rates are in ms^-1.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "form")]
pub enum RateForm {
    /// `rate * x / (1 - exp(-x))`. Has a removable singularity at
    /// `v == midpoint` where the analytic limit is `rate`.
    ExpLinear { rate: f64, midpoint: f64, scale: f64 },
    /// `rate / (1 + exp(-x))`.
    Sigmoid { rate: f64, midpoint: f64, scale: f64 },
    /// `rate * exp(x)`.
    Exp { rate: f64, midpoint: f64, scale: f64 },
    /// Free-form expression over `v` (mV), `ca` (mM), and `temp` (degC).
    Expression { text: String },
}

/// Point conditions a rate is evaluated at.
#[derive(Debug, Clone, Copy)]
pub struct RateContext {
    /// Membrane potential in mV.
    pub v: f64,
    /// Internal calcium concentration in mM.
    pub ca: f64,
    /// Temperature in degrees Celsius.
    pub temp: f64,
}

/// How a gate's dynamics are specified.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GateDynamics {
    /// Forward (alpha) and reverse (beta) transition rates;
    /// `inf = a / (a + b)`, `tau = 1 / (a + b)`.
    Rates { forward: RateForm, reverse: RateForm },
    /// Steady state and time constant supplied directly.
    SteadyStateTau {
        steady_state: RateForm,
        time_constant: RateForm,
    },
}

/// Q10 temperature scaling for a gate's time constant.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Q10Scaling {
    /// Fold change in rate per 10 degC.
    pub q10: f64,
    /// Temperature the rate parameters were measured at, degC.
    pub experimental_temp: f64,
}

impl Q10Scaling {
    /// Rate scale factor at the given simulation temperature. Time
    /// constants divide by this.
    pub fn factor(&self, temp: f64) -> f64 {
        self.q10.powf((temp - self.experimental_temp) / 10.0)
    }
}

/// A named gating variable with its kinetics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateKinetics {
    /// Gate id, e.g. `"m"`, `"h"`, `"n"`.
    pub name: String,
    /// Number of instances of this gate in the channel's open-probability
    /// product (the exponent in `g * m^3 * h`).
    #[serde(default = "default_instances")]
    pub instances: u32,
    pub dynamics: GateDynamics,
    /// Optional temperature scaling applied to the time constant.
    #[serde(default)]
    pub q10: Option<Q10Scaling>,
}

fn default_instances() -> u32 {
    1
}

/// One sampled point of a voltage sweep.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SweepPoint {
    /// Membrane potential, mV.
    pub v: f64,
    /// Steady-state open fraction, 0-1.
    pub steady_state: f64,
    /// Time constant, ms (Q10-adjusted).
    pub time_constant: f64,
}

/// A gate's tabulated kinetics over a voltage range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepResult {
    pub gate: String,
    pub points: Vec<SweepPoint>,
}

impl SweepResult {
    /// Voltage where the steady state first crosses 0.5, by linear
    /// interpolation between the bracketing samples. The first crossing is
    /// taken so the result is reproducible for non-monotonic curves.
    pub fn activation_midpoint(&self) -> Option<f64> {
        self.first_crossing(0.5)
    }

    /// Boltzmann slope factor estimated from the 25% and 75% crossings:
    /// `k = (v75 - v25) / (2 ln 3)`, exact for a sigmoid steady state.
    /// Negative for inactivation gates.
    pub fn slope_factor(&self) -> Option<f64> {
        let v25 = self.first_crossing(0.25)?;
        let v75 = self.first_crossing(0.75)?;
        Some((v75 - v25) / (2.0 * 3.0_f64.ln()))
    }

    fn first_crossing(&self, level: f64) -> Option<f64> {
        for pair in self.points.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            let (lo, hi) = if a.steady_state <= b.steady_state {
                (a.steady_state, b.steady_state)
            } else {
                (b.steady_state, a.steady_state)
            };
            if level >= lo && level <= hi && a.steady_state != b.steady_state {
                let t = (level - a.steady_state) / (b.steady_state - a.steady_state);
                return Some(a.v + t * (b.v - a.v));
            }
        }
        None
    }
}

/// Evaluates gate kinetics, owning the compile cache for free-form rate
/// expressions (keyed by expression text).
pub struct ChannelAnalyzer {
    /// Simulation temperature in degrees Celsius.
    pub temperature: f64,
    /// Internal calcium concentration handed to expressions, mM.
    pub ca_conc: f64,
    cache: HashMap<String, Expr>,
}

impl ChannelAnalyzer {
    pub fn new(temperature: f64, ca_conc: f64) -> Self {
        Self {
            temperature,
            ca_conc,
            cache: HashMap::new(),
        }
    }

    /// Drop all compiled expressions. Needed only if expression text is
    /// reused with different semantics, which a well-formed model never
    /// does.
    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    /// Number of distinct expressions compiled so far.
    pub fn cached_expressions(&self) -> usize {
        self.cache.len()
    }

    /// Evaluate one rate form at a voltage.
    pub fn rate(&mut self, form: &RateForm, v: f64) -> Result<f64, ExpressionError> {
        let ctx = RateContext {
            v,
            ca: self.ca_conc,
            temp: self.temperature,
        };
        match form {
            RateForm::ExpLinear {
                rate,
                midpoint,
                scale,
            } => {
                let x = (v - midpoint) / scale;
                if x.abs() < SINGULARITY_EPS {
                    // Analytic limit of x / (1 - exp(-x)) as x -> 0.
                    Ok(rate * (1.0 + x / 2.0))
                } else {
                    Ok(rate * x / (1.0 - (-x).exp()))
                }
            }
            RateForm::Sigmoid {
                rate,
                midpoint,
                scale,
            } => Ok(rate / (1.0 + (-(v - midpoint) / scale).exp())),
            RateForm::Exp {
                rate,
                midpoint,
                scale,
            } => Ok(rate * ((v - midpoint) / scale).exp()),
            RateForm::Expression { text } => self.eval_expression(text, ctx),
        }
    }

    /// Steady state and Q10-adjusted time constant for a gate at a voltage.
    pub fn gate_curves(&mut self, gate: &GateKinetics, v: f64) -> Result<(f64, f64), ExpressionError> {
        let (inf, mut tau) = match &gate.dynamics {
            GateDynamics::Rates { forward, reverse } => {
                let a = self.rate(forward, v)?;
                let b = self.rate(reverse, v)?;
                let total = a + b;
                (a / total, 1.0 / total)
            }
            GateDynamics::SteadyStateTau {
                steady_state,
                time_constant,
            } => (self.rate(steady_state, v)?, self.rate(time_constant, v)?),
        };

        if let Some(q10) = gate.q10 {
            tau /= q10.factor(self.temperature);
        }
        Ok((inf, tau))
    }

    /// Tabulate a gate's steady state and time constant over
    /// `[v_min, v_max]` in steps of `v_step` (inclusive of the upper bound
    /// within floating tolerance). The range must be finite and forward
    /// with a positive step.
    pub fn sweep(
        &mut self,
        gate: &GateKinetics,
        v_min: f64,
        v_max: f64,
        v_step: f64,
    ) -> Result<SweepResult, AnalysisError> {
        let span = v_max - v_min;
        if !(v_step > 0.0 && span >= 0.0 && (span / v_step).is_finite()) {
            return Err(AnalysisError::InvalidSweepRange {
                v_min,
                v_max,
                v_step,
            });
        }
        let steps = (span / v_step).round() as usize;
        let mut points = Vec::with_capacity(steps + 1);
        for i in 0..=steps {
            let v = v_min + i as f64 * v_step;
            let (steady_state, time_constant) = self.gate_curves(gate, v)?;
            points.push(SweepPoint {
                v,
                steady_state,
                time_constant,
            });
        }
        log::debug!(
            "swept gate '{}' over [{v_min}, {v_max}] mV ({} points)",
            gate.name,
            points.len()
        );
        Ok(SweepResult {
            gate: gate.name.clone(),
            points,
        })
    }

    fn eval_expression(&mut self, text: &str, ctx: RateContext) -> Result<f64, ExpressionError> {
        if !self.cache.contains_key(text) {
            let expr = Expr::parse(text)?;
            // Symbols are checked once at compile time so a bad model fails
            // on the first evaluation, not at some arbitrary voltage.
            for symbol in expr.symbols() {
                if !RATE_SYMBOLS.contains(&symbol.as_str()) {
                    return Err(ExpressionError::UndefinedSymbol {
                        name: symbol,
                        text: text.to_string(),
                    });
                }
            }
            self.cache.insert(text.to_string(), expr);
        }
        let expr = &self.cache[text];

        let mut vars = HashMap::with_capacity(3);
        vars.insert("v".to_string(), ctx.v);
        vars.insert("ca".to_string(), ctx.ca);
        vars.insert("temp".to_string(), ctx.temp);

        let value = expr.eval(&vars)?;
        if value.is_finite() {
            return Ok(value);
        }

        // A non-finite value at an isolated voltage indicates a removable
        // singularity (the rate/(1-exp) family). Take the numeric limit by
        // averaging evaluations just either side of the sample point.
        let h = SINGULARITY_EPS.max(ctx.v.abs() * SINGULARITY_EPS);
        let mut limit = 0.0;
        for v in [ctx.v - h, ctx.v + h] {
            vars.insert("v".to_string(), v);
            limit += expr.eval(&vars)? / 2.0;
        }
        if limit.is_finite() {
            log::debug!("applied limiting value {limit} at v = {} mV for '{text}'", ctx.v);
            Ok(limit)
        } else {
            Err(ExpressionError::Parse {
                text: text.to_string(),
                offset: 0,
                reason: format!("expression is non-finite at v = {} mV", ctx.v),
            })
        }
    }
}
