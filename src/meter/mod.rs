//! Meter-level orchestration: node-set validation, derived-quantity
//! calculation, extraction helpers, and the energy meter itself.

pub mod calculation;
pub mod extraction;
pub mod meter;
pub mod validation;

pub use meter::EnergyMeter;
pub use validation::{validate_node_set, DerivedKind, ValidationError};
