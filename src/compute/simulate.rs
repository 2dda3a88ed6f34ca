//! Single-compartment simulation behind a runner trait.
//!
//! The tuner only needs a voltage trace per candidate, so the integration
//! backend sits behind [`SimulationRunner`] and tests can substitute stub
//! runners. The built-in [`NativeRunner`] integrates the membrane equation
//! with exponential Euler on the gates and forward Euler on the voltage.

use std::collections::BTreeMap;
use std::time::Instant;

use thiserror::Error;

use crate::schema::SimulationSettings;

use super::expression::ExpressionError;
use super::kinetics::ChannelAnalyzer;
use super::model::CellModel;

/// Voltage beyond which the membrane equation is considered to have blown
/// up, mV.
const DIVERGENCE_LIMIT_MV: f64 = 500.0;

/// Steps between cooperative deadline checks.
const DEADLINE_CHECK_STRIDE: usize = 1024;

#[derive(Debug, Error)]
pub enum SimulationError {
    #[error("membrane potential diverged to {v} mV at t = {time_ms} ms")]
    Diverged { time_ms: f64, v: f64 },
    #[error("simulation exceeded its deadline at t = {time_ms} ms")]
    DeadlineExceeded { time_ms: f64 },
    #[error("rate evaluation failed: {0}")]
    Rate(#[from] ExpressionError),
    #[error("simulation backend failed: {0}")]
    External(String),
}

/// Recorded traces from one run, keyed like `"pop0[0]/v"`.
#[derive(Debug, Clone, Default)]
pub struct Recording {
    pub times_ms: Vec<f64>,
    pub traces: BTreeMap<String, Vec<f64>>,
}

impl Recording {
    pub fn trace(&self, key: &str) -> Option<&[f64]> {
        self.traces.get(key).map(Vec::as_slice)
    }
}

/// A backend that turns a concrete model into recorded traces.
pub trait SimulationRunner: Send + Sync {
    /// Run the model for `settings.duration_ms`. A runner checks `deadline`
    /// cooperatively and returns [`SimulationError::DeadlineExceeded`] once
    /// it passes.
    fn run(
        &self,
        model: &CellModel,
        settings: &SimulationSettings,
        deadline: Option<Instant>,
    ) -> Result<Recording, SimulationError>;
}

/// Built-in conductance-model integrator.
#[derive(Debug, Default)]
pub struct NativeRunner;

impl SimulationRunner for NativeRunner {
    fn run(
        &self,
        model: &CellModel,
        settings: &SimulationSettings,
        deadline: Option<Instant>,
    ) -> Result<Recording, SimulationError> {
        let dt = settings.dt_ms;
        let steps = (settings.duration_ms / dt).round() as usize;
        let mut analyzer = ChannelAnalyzer::new(model.temperature, model.ca_conc);

        let mut v = model.initial_voltage;
        // Gates start at their steady state for the initial voltage.
        let mut gates: Vec<Vec<f64>> = Vec::with_capacity(model.channels.len());
        for channel in &model.channels {
            let mut states = Vec::with_capacity(channel.gates.len());
            for gate in &channel.gates {
                let (inf, _) = analyzer.gate_curves(gate, v)?;
                states.push(inf);
            }
            gates.push(states);
        }

        let mut times = Vec::with_capacity(steps + 1);
        let mut voltages = Vec::with_capacity(steps + 1);
        times.push(0.0);
        voltages.push(v);

        let stim = &model.stimulus;
        for step in 0..steps {
            let t = step as f64 * dt;
            if step % DEADLINE_CHECK_STRIDE == 0 {
                if let Some(deadline) = deadline {
                    if Instant::now() >= deadline {
                        return Err(SimulationError::DeadlineExceeded { time_ms: t });
                    }
                }
            }

            let mut ionic = model.leak_conductance * (model.leak_reversal - v);
            for (channel, states) in model.channels.iter().zip(gates.iter_mut()) {
                let mut open = 1.0;
                for (gate, state) in channel.gates.iter().zip(states.iter_mut()) {
                    let (inf, tau) = analyzer.gate_curves(gate, v)?;
                    // Exponential Euler keeps the gate in [0, 1] for any dt.
                    *state = inf + (*state - inf) * (-dt / tau).exp();
                    open *= state.powi(gate.instances as i32);
                }
                ionic += channel.density * open * (channel.erev - v);
            }

            let t_next = t + dt;
            let injected = if t_next >= stim.delay_ms && t_next < stim.delay_ms + stim.duration_ms
            {
                stim.amplitude
            } else {
                0.0
            };
            v += dt * (ionic + injected) / model.capacitance;

            if !v.is_finite() || v.abs() > DIVERGENCE_LIMIT_MV {
                return Err(SimulationError::Diverged { time_ms: t_next, v });
            }
            times.push(t_next);
            voltages.push(v);
        }

        let mut traces = BTreeMap::new();
        traces.insert(model.voltage_trace_key(), voltages);
        Ok(Recording {
            times_ms: times,
            traces,
        })
    }
}
