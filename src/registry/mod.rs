//! Registries: small lookup tables mapping the closed set of node types and
//! protocols to their concrete implementations.
//!
//! Kept as plain functions over `match`, not trait-object maps built at
//! startup — the vocabulary is closed and known at compile time, so a match
//! arm missing a variant is a compile error rather than a silent gap.

pub mod protocol_registry;
pub mod type_registry;
