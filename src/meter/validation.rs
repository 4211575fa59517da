//! Validates a device's node set as a whole (individual nodes are validated
//! on their own by [`crate::node::NodeConfig::new`]) and precomputes each
//! calculated node's [`DerivedKind`] so the per-cycle calculator dispatches
//! on an enum instead of re-parsing the node name every read.

use std::collections::HashMap;

use crate::node::{remove_phase_prefix, phase_prefix_of, valid_base_names, CounterMode, NodeConfig, ProtocolOptions};
use crate::protocol::Protocol;
use crate::registry::protocol_registry::options_match_protocol;

use super::meter::MeterOptions;

/// Dispatch tag for a calculated node, derived once from its name at
/// validation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DerivedKind {
    ApparentPower,
    ActivePower,
    ReactivePower,
    PowerFactor,
    TotalPowerFactor,
    PowerFactorDirection,
    /// CUMULATIVE (`forward − reverse`), DELTA (`power × elapsed/3600`), or a
    /// `total_` sum over the three per-phase energies, decided at calculation
    /// time from the node's own `counter_mode`.
    Energy,
    /// `total_<x>` summed from its `l1_<x>`/`l2_<x>`/`l3_<x>` siblings.
    PhaseTotal,
}

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("duplicate node name '{0}'")]
    DuplicateName(String),
    #[error("node '{0}' is neither a recognized base name nor marked custom")]
    UnrecognizedName(String),
    #[error("calculated node '{0}' must use the NONE protocol")]
    CalculatedNodeHasProtocol(String),
    #[error("node '{0}' protocol options do not match its declared protocol {1:?}")]
    ProtocolOptionsMismatch(String, Protocol),
    #[error("calculated node '{0}' has no recognized derived-quantity form")]
    UnrecognizedCalculatedNode(String),
    #[error("total node '{0}' requires sibling phase nodes l1_/l2_/l3_{1}")]
    MissingPhaseSiblings(String, String),
    #[error("energy node '{0}' must be a counter")]
    EnergyNodeMustBeCounter(String),
    #[error("energy node '{0}' must not be marked custom")]
    EnergyNodeMustNotBeCustom(String),
    #[error("cumulative energy node '{0}' requires its forward/reverse siblings '{1}' and '{2}'")]
    MissingForwardReverseEnergy(String, String, String),
    #[error("delta energy node '{0}' requires its power sibling '{1}'")]
    MissingPowerForDeltaEnergy(String, String),
    #[error("directional energy node '{0}' must not be calculated; only the total direction may be")]
    DirectionalEnergyNodeCalculated(String),
    #[error("power node '{0}' has none of its documented input combinations present")]
    MissingPowerInputs(String),
    #[error("power-factor node '{0}' requires active and reactive power siblings")]
    MissingPowerFactorInputs(String),
    #[error("power-factor-direction node '{0}' is not configurable by any meter option")]
    PowerFactorDirectionUnconfigurable(String),
    #[error("logging period mismatch in the '{category}' category: expected {expected}, got {mismatched:?}")]
    LoggingPeriodMismatch { category: String, expected: u32, mismatched: Vec<String> },
}

/// Classifies a calculated node's base name into a [`DerivedKind`], if
/// recognized. `total_` power quantities are summed from their per-phase
/// siblings rather than re-deriving the V/I/PF formula, matching the
/// per-phase-siblings requirement enforced at validation time.
fn classify(name: &str) -> Option<DerivedKind> {
    let is_total = name.starts_with("total_");
    let base = remove_phase_prefix(name);
    if is_total {
        return match base {
            "power_factor" => Some(DerivedKind::TotalPowerFactor),
            "active_energy" | "reactive_energy" => Some(DerivedKind::Energy),
            "active_power" | "reactive_power" | "apparent_power" => Some(DerivedKind::PhaseTotal),
            _ => None,
        };
    }
    match base {
        "apparent_power" => Some(DerivedKind::ApparentPower),
        "active_power" => Some(DerivedKind::ActivePower),
        "reactive_power" => Some(DerivedKind::ReactivePower),
        "power_factor" => Some(DerivedKind::PowerFactor),
        "power_factor_direction" => Some(DerivedKind::PowerFactorDirection),
        "active_energy" | "reactive_energy" => Some(DerivedKind::Energy),
        _ => None,
    }
}

fn logging_category(base: &str) -> Option<&'static str> {
    match base {
        "voltage" => Some("voltage"),
        "current" => Some("current"),
        "frequency" => Some("frequency"),
        "active_power" | "reactive_power" | "apparent_power" | "power_factor" | "power_factor_direction" => {
            Some("power")
        }
        b if b.ends_with("active_energy") || b.ends_with("reactive_energy") => Some("energy"),
        _ => None,
    }
}

/// Groups non-custom logging-enabled nodes by category and requires every
/// node in a category to share the same `logging_period`, since downstream
/// bucketing assumes aligned cadences per category.
fn validate_logging_periods(
    nodes: &HashMap<String, (NodeConfig, ProtocolOptions)>,
) -> Result<(), ValidationError> {
    let mut groups: HashMap<&'static str, Vec<(&str, u32)>> = HashMap::new();
    for (name, (config, _)) in nodes {
        if config.custom || !config.logging {
            continue;
        }
        let base = remove_phase_prefix(name);
        if let Some(category) = logging_category(base) {
            groups.entry(category).or_default().push((name.as_str(), config.logging_period));
        }
    }

    for (category, entries) in groups {
        let Some(&(_, expected)) = entries.first() else { continue };
        let mismatched: Vec<String> = entries
            .iter()
            .filter(|(_, period)| *period != expected)
            .map(|(name, period)| format!("{name} ({period})"))
            .collect();
        if !mismatched.is_empty() {
            return Err(ValidationError::LoggingPeriodMismatch {
                category: category.to_string(),
                expected,
                mismatched,
            });
        }
    }
    Ok(())
}

fn validate_calculated_inputs(
    name: &str,
    kind: DerivedKind,
    nodes: &HashMap<String, (NodeConfig, ProtocolOptions)>,
    meter_options: MeterOptions,
) -> Result<(), ValidationError> {
    let phase = phase_prefix_of(name);
    let has = |n: &str| nodes.contains_key(n);

    match kind {
        DerivedKind::PhaseTotal => {
            let base = remove_phase_prefix(name);
            for phase_prefix in ["l1_", "l2_", "l3_"] {
                let sibling = format!("{phase_prefix}{base}");
                if !has(&sibling) {
                    return Err(ValidationError::MissingPhaseSiblings(name.to_string(), base.to_string()));
                }
            }
        }
        DerivedKind::ApparentPower => {
            let pq = has(&format!("{phase}active_power")) && has(&format!("{phase}reactive_power"));
            let vi = has(&format!("{phase}voltage")) && has(&format!("{phase}current"));
            if !pq && !vi {
                return Err(ValidationError::MissingPowerInputs(name.to_string()));
            }
        }
        DerivedKind::ActivePower => {
            let sq = has(&format!("{phase}apparent_power")) && has(&format!("{phase}reactive_power"));
            let vip = has(&format!("{phase}voltage"))
                && has(&format!("{phase}current"))
                && has(&format!("{phase}power_factor"));
            if !sq && !vip {
                return Err(ValidationError::MissingPowerInputs(name.to_string()));
            }
        }
        DerivedKind::ReactivePower => {
            let sp = has(&format!("{phase}apparent_power")) && has(&format!("{phase}active_power"));
            let vip = has(&format!("{phase}voltage"))
                && has(&format!("{phase}current"))
                && has(&format!("{phase}power_factor"));
            if !sp && !vip {
                return Err(ValidationError::MissingPowerInputs(name.to_string()));
            }
        }
        DerivedKind::PowerFactor => {
            if !(has(&format!("{phase}active_power")) && has(&format!("{phase}reactive_power"))) {
                return Err(ValidationError::MissingPowerFactorInputs(name.to_string()));
            }
        }
        DerivedKind::TotalPowerFactor => {
            let ok = ["l1_", "l2_", "l3_"]
                .iter()
                .all(|p| has(&format!("{p}active_power")) && has(&format!("{p}reactive_power")));
            if !ok {
                return Err(ValidationError::MissingPowerFactorInputs(name.to_string()));
            }
        }
        DerivedKind::PowerFactorDirection => {
            let by_sign = meter_options.negative_reactive_power && has(&format!("{phase}reactive_power"));
            let by_energy = meter_options.read_separate_forward_reverse_energy
                && (has(&format!("{phase}forward_reactive_energy"))
                    || has(&format!("{phase}reverse_reactive_energy")));
            if !by_sign && !by_energy {
                return Err(ValidationError::PowerFactorDirectionUnconfigurable(name.to_string()));
            }
        }
        DerivedKind::Energy => {
            let (config, _) = &nodes[name];
            if !config.is_counter {
                return Err(ValidationError::EnergyNodeMustBeCounter(name.to_string()));
            }
            if config.custom {
                return Err(ValidationError::EnergyNodeMustNotBeCustom(name.to_string()));
            }
            let base = remove_phase_prefix(name);
            if name.starts_with("total_") {
                for phase_prefix in ["l1_", "l2_", "l3_"] {
                    let sibling = format!("{phase_prefix}{base}");
                    if !has(&sibling) {
                        return Err(ValidationError::MissingPhaseSiblings(name.to_string(), base.to_string()));
                    }
                }
            } else {
                match config.counter_mode {
                    Some(CounterMode::Cumulative) => {
                        let forward = format!("{phase}forward_{base}");
                        let reverse = format!("{phase}reverse_{base}");
                        if !has(&forward) || !has(&reverse) {
                            return Err(ValidationError::MissingForwardReverseEnergy(
                                name.to_string(),
                                forward,
                                reverse,
                            ));
                        }
                    }
                    Some(CounterMode::Delta) => {
                        let power_base = base.replace("_energy", "_power");
                        let sibling = format!("{phase}{power_base}");
                        if !has(&sibling) {
                            return Err(ValidationError::MissingPowerForDeltaEnergy(name.to_string(), sibling));
                        }
                    }
                    _ => return Err(ValidationError::EnergyNodeMustBeCounter(name.to_string())),
                }
            }
        }
    }

    Ok(())
}

/// Validates an entire device's node set: unique names, closed-vocabulary
/// membership (or `custom`), protocol/options agreement, calculated-node
/// classification and its input dependencies, and logging-period consistency
/// within each quantity category. Returns the precomputed `DerivedKind` for
/// every calculated node, keyed by name.
pub fn validate_node_set(
    nodes: &HashMap<String, (NodeConfig, ProtocolOptions)>,
    meter_options: MeterOptions,
) -> Result<HashMap<String, DerivedKind>, ValidationError> {
    let mut derived = HashMap::new();

    for (name, (config, options)) in nodes {
        if name != &config.name {
            return Err(ValidationError::DuplicateName(name.clone()));
        }

        if !options_match_protocol(config.protocol, options) {
            return Err(ValidationError::ProtocolOptionsMismatch(name.clone(), config.protocol));
        }

        let base = remove_phase_prefix(name);
        let is_directional_energy = base.starts_with("forward_") || base.starts_with("reverse_");
        if is_directional_energy && config.calculated {
            return Err(ValidationError::DirectionalEnergyNodeCalculated(name.clone()));
        }

        if config.calculated {
            if config.protocol != Protocol::None {
                return Err(ValidationError::CalculatedNodeHasProtocol(name.clone()));
            }
            let kind = classify(name)
                .ok_or_else(|| ValidationError::UnrecognizedCalculatedNode(name.clone()))?;
            validate_calculated_inputs(name, kind, nodes, meter_options)?;
            derived.insert(name.clone(), kind);
            continue;
        }

        if !config.custom && !valid_base_names().contains(base) {
            return Err(ValidationError::UnrecognizedName(name.clone()));
        }
    }

    validate_logging_periods(nodes)?;

    Ok(derived)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{NodeAttributes, NodeType};
    use crate::protocol::NoProtocolNodeOptions;

    fn base_config(name: &str, calculated: bool) -> NodeConfig {
        NodeConfig {
            name: name.to_string(),
            node_type: NodeType::Float,
            unit: Some("W".into()),
            protocol: Protocol::None,
            enabled: true,
            is_counter: false,
            counter_mode: None,
            publish: true,
            calculated,
            custom: false,
            logging: false,
            logging_period: 15,
            min_alarm: false,
            max_alarm: false,
            min_alarm_value: None,
            max_alarm_value: None,
            min_warning: false,
            max_warning: false,
            min_warning_value: None,
            max_warning_value: None,
            decimal_places: Some(2),
            attributes: NodeAttributes::default(),
        }
    }

    fn entry(name: &str, calculated: bool) -> (String, (NodeConfig, ProtocolOptions)) {
        (name.to_string(), (base_config(name, calculated), ProtocolOptions::None(NoProtocolNodeOptions)))
    }

    #[test]
    fn rejects_unrecognized_non_custom_name() {
        let mut nodes = HashMap::new();
        nodes.insert("mystery_field".to_string(), entry("mystery_field", false).1);
        let err = validate_node_set(&nodes, MeterOptions::default()).unwrap_err();
        assert!(matches!(err, ValidationError::UnrecognizedName(_)));
    }

    #[test]
    fn total_power_node_requires_phase_siblings() {
        let mut nodes = HashMap::new();
        nodes.insert("total_active_power".to_string(), entry("total_active_power", true).1);
        let err = validate_node_set(&nodes, MeterOptions::default()).unwrap_err();
        assert!(matches!(err, ValidationError::MissingPhaseSiblings(_, _)));
    }

    #[test]
    fn total_power_node_classifies_once_siblings_present() {
        let mut nodes = HashMap::new();
        for phase in ["l1_", "l2_", "l3_"] {
            let name = format!("{phase}active_power");
            nodes.insert(name.clone(), entry(&name, false).1);
        }
        nodes.insert("total_active_power".to_string(), entry("total_active_power", true).1);
        let derived = validate_node_set(&nodes, MeterOptions::default()).unwrap();
        assert_eq!(derived.get("total_active_power"), Some(&DerivedKind::PhaseTotal));
    }

    fn energy_config(name: &str, counter_mode: CounterMode) -> NodeConfig {
        let mut config = base_config(name, true);
        config.is_counter = true;
        config.counter_mode = Some(counter_mode);
        config
    }

    #[test]
    fn cumulative_energy_node_requires_forward_and_reverse_siblings() {
        let mut nodes = HashMap::new();
        nodes.insert(
            "l1_active_energy".to_string(),
            (energy_config("l1_active_energy", CounterMode::Cumulative), ProtocolOptions::None(NoProtocolNodeOptions)),
        );
        let err = validate_node_set(&nodes, MeterOptions::default()).unwrap_err();
        assert!(matches!(err, ValidationError::MissingForwardReverseEnergy(_, _, _)));
    }

    #[test]
    fn cumulative_energy_node_classifies_once_siblings_present() {
        let mut nodes = HashMap::new();
        nodes.insert(
            "l1_active_energy".to_string(),
            (energy_config("l1_active_energy", CounterMode::Cumulative), ProtocolOptions::None(NoProtocolNodeOptions)),
        );
        nodes.insert("l1_forward_active_energy".to_string(), entry("l1_forward_active_energy", false).1);
        nodes.insert("l1_reverse_active_energy".to_string(), entry("l1_reverse_active_energy", false).1);
        let derived = validate_node_set(&nodes, MeterOptions::default()).unwrap();
        assert_eq!(derived.get("l1_active_energy"), Some(&DerivedKind::Energy));
    }

    #[test]
    fn delta_energy_node_requires_power_sibling() {
        let mut nodes = HashMap::new();
        nodes.insert(
            "l1_active_energy".to_string(),
            (energy_config("l1_active_energy", CounterMode::Delta), ProtocolOptions::None(NoProtocolNodeOptions)),
        );
        let err = validate_node_set(&nodes, MeterOptions::default()).unwrap_err();
        assert!(matches!(err, ValidationError::MissingPowerForDeltaEnergy(_, _)));
    }

    #[test]
    fn directional_energy_node_cannot_be_calculated() {
        let mut nodes = HashMap::new();
        nodes.insert(
            "l1_forward_active_energy".to_string(),
            (energy_config("l1_forward_active_energy", CounterMode::Cumulative), ProtocolOptions::None(NoProtocolNodeOptions)),
        );
        let err = validate_node_set(&nodes, MeterOptions::default()).unwrap_err();
        assert!(matches!(err, ValidationError::DirectionalEnergyNodeCalculated(_)));
    }

    #[test]
    fn power_factor_direction_node_requires_an_enabling_option() {
        let mut nodes = HashMap::new();
        nodes.insert("power_factor_direction".to_string(), entry("power_factor_direction", true).1);
        let err = validate_node_set(&nodes, MeterOptions::default()).unwrap_err();
        assert!(matches!(err, ValidationError::PowerFactorDirectionUnconfigurable(_)));
    }

    #[test]
    fn power_factor_direction_node_accepted_with_negative_reactive_power_option() {
        let mut nodes = HashMap::new();
        nodes.insert("power_factor_direction".to_string(), entry("power_factor_direction", true).1);
        nodes.insert("reactive_power".to_string(), entry("reactive_power", false).1);
        let options = MeterOptions { negative_reactive_power: true, ..MeterOptions::default() };
        let derived = validate_node_set(&nodes, options).unwrap();
        assert_eq!(derived.get("power_factor_direction"), Some(&DerivedKind::PowerFactorDirection));
    }

    #[test]
    fn mismatched_logging_periods_within_a_category_are_rejected() {
        let mut nodes = HashMap::new();
        let mut l1 = base_config("l1_voltage", false);
        l1.logging = true;
        l1.logging_period = 1;
        let mut l2 = base_config("l2_voltage", false);
        l2.logging = true;
        l2.logging_period = 5;
        nodes.insert("l1_voltage".to_string(), (l1, ProtocolOptions::None(NoProtocolNodeOptions)));
        nodes.insert("l2_voltage".to_string(), (l2, ProtocolOptions::None(NoProtocolNodeOptions)));
        let err = validate_node_set(&nodes, MeterOptions::default()).unwrap_err();
        assert!(matches!(err, ValidationError::LoggingPeriodMismatch { .. }));
    }
}
