//! Compute module - channel kinetics, simulation, and the tuning search.

mod evaluate;
mod expression;
mod features;
mod kinetics;
mod model;
mod simulate;
mod tuner;

pub use evaluate::*;
pub use expression::*;
pub use features::*;
pub use kinetics::*;
pub use model::*;
pub use simulate::*;
pub use tuner::*;
