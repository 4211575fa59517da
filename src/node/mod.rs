//! Node identity, configuration, and the protocol-agnostic [`Node`] wrapper.
//!
//! A node is a single measurement or derived quantity on a device. Its
//! configuration (this module), its value processor
//! ([`crate::node::processor`]), and its protocol-specific read options
//! ([`crate::protocol`]) are kept as separate, composable pieces rather than
//! a class hierarchy.

pub mod processor;
pub mod value;

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

pub use value::Value;

use crate::protocol::{NoProtocolNodeOptions, Protocol};

/// Internal, protocol-agnostic node data type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeType {
    Int,
    Float,
    Bool,
    String,
}

/// Electrical phase tag attached to every node via [`NodeAttributes`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodePhase {
    L1,
    L2,
    L3,
    Total,
    General,
    Singlephase,
}

impl NodePhase {
    /// The name prefix conventionally associated with this phase.
    pub fn prefix(self) -> &'static str {
        match self {
            NodePhase::L1 => "l1_",
            NodePhase::L2 => "l2_",
            NodePhase::L3 => "l3_",
            NodePhase::Total => "total_",
            NodePhase::General | NodePhase::Singlephase => "",
        }
    }
}

/// Directional qualifier for energy nodes (forward/reverse/total).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeDirection {
    Forward,
    Reverse,
    Total,
}

impl NodeDirection {
    pub fn prefix(self) -> &'static str {
        match self {
            NodeDirection::Forward => "forward_",
            NodeDirection::Reverse => "reverse_",
            NodeDirection::Total => "",
        }
    }
}

/// Counter accumulation semantics. See `set_value` in
/// `crate::node::processor::numeric` for the exact per-mode behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CounterMode {
    /// Store the incoming value verbatim; no accumulation.
    Direct,
    /// Treat the incoming value as an incremental delta to accumulate.
    Delta,
    /// Treat the incoming value as a running total; track deltas from an
    /// anchor captured on first observation.
    Cumulative,
}

impl CounterMode {
    pub(crate) fn calculate_increment(self) -> bool {
        !matches!(self, CounterMode::Direct)
    }

    pub(crate) fn positive_incremental(self) -> bool {
        matches!(self, CounterMode::Delta)
    }
}

/// Known phase-name prefixes, longest (line-to-line) first so stripping a
/// name never leaves a stray phase token behind.
const PHASE_PREFIXES: &[&str] = &[
    "l1_l2_", "l1_l3_", "l2_l1_", "l2_l3_", "l3_l1_", "l3_l2_", "l1_", "l2_", "l3_", "total_",
];

/// Strips a leading phase prefix (if any) from a node name, returning the
/// base token used for vocabulary validation.
pub fn remove_phase_prefix(name: &str) -> &str {
    for prefix in PHASE_PREFIXES {
        if let Some(rest) = name.strip_prefix(prefix) {
            return rest;
        }
    }
    name
}

/// The phase prefix stripped by [`remove_phase_prefix`], e.g. `"l1_"` for
/// `"l1_voltage"` or `""` for `"voltage"`.
pub fn phase_prefix_of(name: &str) -> &str {
    let base = remove_phase_prefix(name);
    &name[..name.len() - base.len()]
}

/// Domain-specific attributes attached to a node; currently just the phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAttributes {
    pub phase: NodePhase,
}

impl Default for NodeAttributes {
    fn default() -> Self {
        NodeAttributes { phase: NodePhase::General }
    }
}

/// Closed vocabulary of non-custom base node names.
pub fn valid_base_names() -> &'static HashSet<&'static str> {
    static NAMES: std::sync::OnceLock<HashSet<&'static str>> = std::sync::OnceLock::new();
    NAMES.get_or_init(|| {
        [
            "voltage",
            "current",
            "active_power",
            "reactive_power",
            "apparent_power",
            "power_factor",
            "power_factor_direction",
            "frequency",
            "active_energy",
            "reactive_energy",
            "forward_active_energy",
            "reverse_active_energy",
            "forward_reactive_energy",
            "reverse_reactive_energy",
        ]
        .into_iter()
        .collect()
    })
}

/// Errors raised while constructing or validating a [`NodeConfig`].
#[derive(Debug, thiserror::Error)]
pub enum NodeConfigError {
    #[error("counter node is not valid for {0:?} nodes")]
    CounterNotApplicable(NodeType),
    #[error("counter_mode is not applicable to non-counter nodes")]
    CounterModeNotApplicable,
    #[error("alarms and warnings are not supported for {0:?} nodes")]
    AlarmsNotSupported(NodeType),
    #[error("non-null unit is not applicable to {0:?} nodes")]
    UnitNotApplicable(NodeType),
    #[error("alarms and warnings are not applicable to counter nodes")]
    AlarmsNotApplicableToCounters,
    #[error("min_alarm is enabled but min_alarm_value is None")]
    MinAlarmValueMissing,
    #[error("max_alarm is enabled but max_alarm_value is None")]
    MaxAlarmValueMissing,
    #[error("min_warning is enabled but min_warning_value is None")]
    MinWarningValueMissing,
    #[error("max_warning is enabled but max_warning_value is None")]
    MaxWarningValueMissing,
    #[error("invalid logging period '{0}' for node '{1}': must be a positive integer")]
    InvalidLoggingPeriod(u32, String),
    #[error("decimal_places must be set for FLOAT nodes")]
    DecimalPlacesRequired,
}

/// Runtime configuration for a single node.
///
/// Constructed only through [`NodeConfig::new`], which applies the
/// type-specific auto-fixes (clearing alarms/counters/unit for BOOL/STRING)
/// and then validates the result, matching the source's two-step
/// construct-then-validate behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub name: String,
    pub node_type: NodeType,
    pub unit: Option<String>,
    pub protocol: Protocol,
    pub enabled: bool,
    pub is_counter: bool,
    pub counter_mode: Option<CounterMode>,
    pub publish: bool,
    pub calculated: bool,
    pub custom: bool,
    pub logging: bool,
    pub logging_period: u32,
    pub min_alarm: bool,
    pub max_alarm: bool,
    pub min_alarm_value: Option<f64>,
    pub max_alarm_value: Option<f64>,
    pub min_warning: bool,
    pub max_warning: bool,
    pub min_warning_value: Option<f64>,
    pub max_warning_value: Option<f64>,
    pub decimal_places: Option<u32>,
    pub attributes: NodeAttributes,
}

impl NodeConfig {
    /// Builds a validated config, applying type-specific auto-fixes first.
    #[allow(clippy::too_many_arguments)]
    pub fn new(mut self_built: NodeConfig) -> Result<NodeConfig, NodeConfigError> {
        self_built.auto_fix();
        self_built.validate()?;
        Ok(self_built)
    }

    fn auto_fix(&mut self) {
        if matches!(self.node_type, NodeType::Bool | NodeType::String) {
            self.is_counter = false;
            self.counter_mode = None;
            self.min_alarm = false;
            self.max_alarm = false;
            self.min_alarm_value = None;
            self.max_alarm_value = None;
            self.min_warning = false;
            self.max_warning = false;
            self.min_warning_value = None;
            self.max_warning_value = None;
            self.unit = None;
        }
        if !matches!(self.node_type, NodeType::Float) {
            self.decimal_places = None;
        }
    }

    fn validate(&self) -> Result<(), NodeConfigError> {
        if matches!(self.node_type, NodeType::Bool | NodeType::String) {
            if self.is_counter {
                return Err(NodeConfigError::CounterNotApplicable(self.node_type));
            }
            if self.counter_mode.is_some() {
                return Err(NodeConfigError::CounterModeNotApplicable);
            }
            if self.min_alarm
                || self.max_alarm
                || self.min_warning
                || self.max_warning
                || self.min_alarm_value.is_some()
                || self.max_alarm_value.is_some()
                || self.min_warning_value.is_some()
                || self.max_warning_value.is_some()
            {
                return Err(NodeConfigError::AlarmsNotSupported(self.node_type));
            }
            if self.unit.is_some() {
                return Err(NodeConfigError::UnitNotApplicable(self.node_type));
            }
        }

        if self.is_counter
            && (self.min_alarm || self.min_warning || self.max_alarm || self.max_warning)
        {
            return Err(NodeConfigError::AlarmsNotApplicableToCounters);
        }

        if self.min_alarm && self.min_alarm_value.is_none() {
            return Err(NodeConfigError::MinAlarmValueMissing);
        }
        if self.max_alarm && self.max_alarm_value.is_none() {
            return Err(NodeConfigError::MaxAlarmValueMissing);
        }
        if self.min_warning && self.min_warning_value.is_none() {
            return Err(NodeConfigError::MinWarningValueMissing);
        }
        if self.max_warning && self.max_warning_value.is_none() {
            return Err(NodeConfigError::MaxWarningValueMissing);
        }

        if self.logging && self.logging_period == 0 {
            return Err(NodeConfigError::InvalidLoggingPeriod(
                self.logging_period,
                self.name.clone(),
            ));
        }

        if matches!(self.node_type, NodeType::Float) && self.decimal_places.is_none() {
            return Err(NodeConfigError::DecimalPlacesRequired);
        }

        Ok(())
    }
}

/// Protocol-specific read options carried by a [`Node`], modeled as a sum
/// type rather than a class hierarchy (one variant per registered protocol).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ProtocolOptions {
    None(NoProtocolNodeOptions),
    ModbusRtu(crate::protocol::modbus_rtu::ModbusRtuNodeOptions),
    OpcUa(crate::protocol::opcua::OpcUaNodeOptions),
}

/// A single data point within a device: configuration, protocol options, and
/// a type-specific value processor.
pub struct Node {
    pub config: NodeConfig,
    pub protocol_options: ProtocolOptions,
    pub processor: Box<dyn processor::NodeProcessor>,
    /// Per-node connection state, meaningful only for protocol-backed nodes;
    /// updated by the owning meter's receiver after each read attempt.
    connected: bool,
}

impl Node {
    pub fn new(
        config: NodeConfig,
        protocol_options: ProtocolOptions,
        processor: Box<dyn processor::NodeProcessor>,
    ) -> Self {
        Node { config, protocol_options, processor, connected: false }
    }

    pub fn connected(&self) -> bool {
        self.connected
    }

    pub fn set_connection_state(&mut self, state: bool) {
        self.connected = state;
    }

    pub fn get_publish_format(&self) -> serde_json::Map<String, serde_json::Value> {
        self.processor.create_publish_format(&self.config)
    }

    pub fn get_extended_info(&self) -> serde_json::Map<String, serde_json::Value> {
        self.processor.create_extended_info(&self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_phase_prefixes() {
        assert_eq!(remove_phase_prefix("l1_voltage"), "voltage");
        assert_eq!(remove_phase_prefix("total_active_energy"), "active_energy");
        assert_eq!(remove_phase_prefix("l1_l2_voltage"), "voltage");
        assert_eq!(remove_phase_prefix("voltage"), "voltage");
    }

    #[test]
    fn bool_config_autofixes_alarms_and_unit() {
        let cfg = NodeConfig::new(NodeConfig {
            name: "custom_flag".into(),
            node_type: NodeType::Bool,
            unit: Some("V".into()),
            protocol: Protocol::None,
            enabled: true,
            is_counter: true,
            counter_mode: Some(CounterMode::Direct),
            publish: true,
            calculated: false,
            custom: true,
            logging: false,
            logging_period: 15,
            min_alarm: true,
            max_alarm: false,
            min_alarm_value: Some(1.0),
            max_alarm_value: None,
            min_warning: false,
            max_warning: false,
            min_warning_value: None,
            max_warning_value: None,
            decimal_places: Some(2),
            attributes: NodeAttributes::default(),
        })
        .unwrap();

        assert!(!cfg.is_counter);
        assert!(cfg.counter_mode.is_none());
        assert!(!cfg.min_alarm);
        assert!(cfg.unit.is_none());
        assert!(cfg.decimal_places.is_none());
    }

    #[test]
    fn float_requires_decimal_places() {
        let err = NodeConfig::new(NodeConfig {
            name: "l1_voltage".into(),
            node_type: NodeType::Float,
            unit: Some("V".into()),
            protocol: Protocol::ModbusRtu,
            enabled: true,
            is_counter: false,
            counter_mode: None,
            publish: true,
            calculated: false,
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
            decimal_places: None,
            attributes: NodeAttributes::default(),
        })
        .unwrap_err();
        assert!(matches!(err, NodeConfigError::DecimalPlacesRequired));
    }
}
