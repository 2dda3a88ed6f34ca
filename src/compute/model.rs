//! Single-compartment cell model and parameter-path access.
//!
//! The tuner edits a model through dotted parameter paths
//! (`"naChans/density"`, `"stim/amplitude"`), so the optimizer never needs
//! to know the model's structure. Get and set round-trip exactly.

use serde::{Deserialize, Serialize};

use crate::schema::ConfigError;

use super::kinetics::GateKinetics;

/// A voltage-gated conductance in the membrane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MembraneChannel {
    /// Channel id used in parameter paths.
    pub id: String,
    /// Maximal conductance density, mS/cm^2.
    pub density: f64,
    /// Reversal potential, mV.
    pub erev: f64,
    /// Gating variables; the channel's open probability is the product of
    /// each gate raised to its instance count.
    pub gates: Vec<GateKinetics>,
}

/// Current-clamp stimulus applied during a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stimulus {
    /// Injected current density, uA/cm^2.
    pub amplitude: f64,
    /// Onset time, ms.
    pub delay_ms: f64,
    /// Stimulus duration, ms.
    pub duration_ms: f64,
}

impl Default for Stimulus {
    fn default() -> Self {
        Self {
            amplitude: 10.0,
            delay_ms: 50.0,
            duration_ms: 400.0,
        }
    }
}

/// A single-compartment conductance-based cell plus its stimulus protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CellModel {
    /// Population name; the recorded voltage trace is keyed
    /// `"{population}[0]/v"`.
    pub population: String,
    /// Membrane capacitance, uF/cm^2.
    #[serde(default = "default_capacitance")]
    pub capacitance: f64,
    /// Leak conductance density, mS/cm^2.
    #[serde(default = "default_leak_conductance")]
    pub leak_conductance: f64,
    /// Leak reversal potential, mV.
    #[serde(default = "default_leak_reversal")]
    pub leak_reversal: f64,
    /// Resting potential used as the initial condition, mV.
    #[serde(default = "default_initial_voltage")]
    pub initial_voltage: f64,
    /// Simulation temperature, degC.
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Internal calcium concentration exposed to rate expressions, mM.
    #[serde(default = "default_ca_conc")]
    pub ca_conc: f64,
    /// Active conductances.
    pub channels: Vec<MembraneChannel>,
    /// Current-clamp stimulus.
    #[serde(default)]
    pub stimulus: Stimulus,
}

fn default_capacitance() -> f64 {
    1.0
}
fn default_leak_conductance() -> f64 {
    0.3
}
fn default_leak_reversal() -> f64 {
    -54.4
}
fn default_initial_voltage() -> f64 {
    -65.0
}
fn default_temperature() -> f64 {
    6.3
}
fn default_ca_conc() -> f64 {
    5e-5
}

impl CellModel {
    /// Key of the recorded membrane-potential trace.
    pub fn voltage_trace_key(&self) -> String {
        format!("{}[0]/v", self.population)
    }

    /// Read a parameter by path. Paths are `"component/field"` where the
    /// component is a channel id, `"stim"`, or `"cell"`.
    pub fn get_parameter(&self, path: &str) -> Result<f64, ConfigError> {
        let (component, field) = split_path(path)?;
        match component {
            "cell" => match field {
                "capacitance" => Ok(self.capacitance),
                "leak_conductance" => Ok(self.leak_conductance),
                "leak_reversal" => Ok(self.leak_reversal),
                _ => Err(unknown(path)),
            },
            "stim" => match field {
                "amplitude" => Ok(self.stimulus.amplitude),
                "delay" => Ok(self.stimulus.delay_ms),
                "duration" => Ok(self.stimulus.duration_ms),
                _ => Err(unknown(path)),
            },
            id => {
                let channel = self
                    .channels
                    .iter()
                    .find(|c| c.id == id)
                    .ok_or_else(|| unknown(path))?;
                match field {
                    "density" => Ok(channel.density),
                    "erev" => Ok(channel.erev),
                    _ => Err(unknown(path)),
                }
            }
        }
    }

    /// Write a parameter by path. The same paths `get_parameter` resolves.
    pub fn set_parameter(&mut self, path: &str, value: f64) -> Result<(), ConfigError> {
        let (component, field) = split_path(path)?;
        match component {
            "cell" => match field {
                "capacitance" => self.capacitance = value,
                "leak_conductance" => self.leak_conductance = value,
                "leak_reversal" => self.leak_reversal = value,
                _ => return Err(unknown(path)),
            },
            "stim" => match field {
                "amplitude" => self.stimulus.amplitude = value,
                "delay" => self.stimulus.delay_ms = value,
                "duration" => self.stimulus.duration_ms = value,
                _ => return Err(unknown(path)),
            },
            id => {
                let channel = self
                    .channels
                    .iter_mut()
                    .find(|c| c.id == id)
                    .ok_or_else(|| unknown(path))?;
                match field {
                    "density" => channel.density = value,
                    "erev" => channel.erev = value,
                    _ => return Err(unknown(path)),
                }
            }
        }
        Ok(())
    }

    /// Apply a whole candidate vector. `paths` and `values` are parallel;
    /// callers guarantee equal lengths via config validation.
    pub fn materialize(&self, paths: &[String], values: &[f64]) -> Result<CellModel, ConfigError> {
        let mut model = self.clone();
        for (path, &value) in paths.iter().zip(values) {
            model.set_parameter(path, value)?;
        }
        Ok(model)
    }
}

fn split_path(path: &str) -> Result<(&str, &str), ConfigError> {
    let mut parts = path.splitn(2, '/');
    match (parts.next(), parts.next()) {
        (Some(component), Some(field)) if !component.is_empty() && !field.is_empty() => {
            Ok((component, field))
        }
        _ => Err(ConfigError::MalformedPath {
            path: path.to_string(),
        }),
    }
}

fn unknown(path: &str) -> ConfigError {
    ConfigError::UnknownParameter {
        path: path.to_string(),
    }
}

/// The classic squid-axon sodium + potassium membrane, used as a fixture
/// across the compute tests.
#[cfg(test)]
pub(crate) fn hh_model() -> CellModel {
    use super::kinetics::{GateDynamics, RateForm};

    CellModel {
        population: "pop0".into(),
        capacitance: 1.0,
        leak_conductance: 0.3,
        leak_reversal: -54.4,
        initial_voltage: -65.0,
        temperature: 6.3,
        ca_conc: 5e-5,
        channels: vec![
            MembraneChannel {
                id: "naChans".into(),
                density: 120.0,
                erev: 50.0,
                gates: vec![
                    GateKinetics {
                        name: "m".into(),
                        instances: 3,
                        dynamics: GateDynamics::Rates {
                            forward: RateForm::ExpLinear {
                                rate: 1.0,
                                midpoint: -40.0,
                                scale: 10.0,
                            },
                            reverse: RateForm::Exp {
                                rate: 4.0,
                                midpoint: -65.0,
                                scale: -18.0,
                            },
                        },
                        q10: None,
                    },
                    GateKinetics {
                        name: "h".into(),
                        instances: 1,
                        dynamics: GateDynamics::Rates {
                            forward: RateForm::Exp {
                                rate: 0.07,
                                midpoint: -65.0,
                                scale: -20.0,
                            },
                            reverse: RateForm::Sigmoid {
                                rate: 1.0,
                                midpoint: -35.0,
                                scale: 10.0,
                            },
                        },
                        q10: None,
                    },
                ],
            },
            MembraneChannel {
                id: "kChans".into(),
                density: 36.0,
                erev: -77.0,
                gates: vec![GateKinetics {
                    name: "n".into(),
                    instances: 4,
                    dynamics: GateDynamics::Rates {
                        forward: RateForm::ExpLinear {
                            rate: 0.1,
                            midpoint: -55.0,
                            scale: 10.0,
                        },
                        reverse: RateForm::Exp {
                            rate: 0.125,
                            midpoint: -65.0,
                            scale: -80.0,
                        },
                    },
                    q10: None,
                }],
            },
        ],
        stimulus: Stimulus {
            amplitude: 10.0,
            delay_ms: 50.0,
            duration_ms: 400.0,
        },
    }
}
