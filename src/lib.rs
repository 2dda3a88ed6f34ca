//! Celltune - evolutionary tuning for conductance-based neuron models.
//!
//! This crate fits the parameters of single-compartment Hodgkin-Huxley
//! style cell models to target electrophysiological features, and analyzes
//! ion-channel gating kinetics across voltage sweeps.
//!
//! # Architecture
//!
//! The crate is split into two main modules:
//!
//! - `schema`: Configuration, validation, and report types
//! - `compute`: Rate expressions, channel kinetics, simulation, feature
//!   extraction, and the generational search
//!
//! # Example
//!
//! ```rust,no_run
//! use celltune::compute::{CellModel, NativeRunner, TuningEngine};
//! use celltune::schema::TuningConfig;
//!
//! let model: CellModel =
//!     serde_json::from_str(&std::fs::read_to_string("cell.json").unwrap()).unwrap();
//! let config: TuningConfig =
//!     serde_json::from_str(&std::fs::read_to_string("tuning.json").unwrap()).unwrap();
//!
//! let mut engine = TuningEngine::from_parts(model, config, NativeRunner).unwrap();
//! let report = engine.run();
//! println!("best fitness: {}", report.best_fitness);
//! ```

pub mod compute;
pub mod schema;

// Re-export commonly used types
pub use compute::{CellModel, ChannelAnalyzer, NativeRunner, TuningEngine};
pub use schema::{TuningConfig, TuningReport};
