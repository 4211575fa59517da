//! Helpers for pulling live and historical values out of a node set: the
//! per-cycle calculator's scaled input reader, and the historical
//! compose-energy/power-factor helper used by the extraction surface.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::node::processor::LogEntry;
use crate::node::Node;

use super::calculation;

/// The current numeric value of a node, if present and numeric.
pub fn numeric_value(nodes: &HashMap<String, Node>, name: &str) -> Option<f64> {
    nodes.get(name)?.processor.value()?.as_f64()
}

/// The current value of `l1_<base>`/`l2_<base>`/`l3_<base>`, in that order.
pub fn phase_values(nodes: &HashMap<String, Node>, base: &str) -> [Option<f64>; 3] {
    [
        numeric_value(nodes, &format!("l1_{base}")),
        numeric_value(nodes, &format!("l2_{base}")),
        numeric_value(nodes, &format!("l3_{base}")),
    ]
}

/// `true` once every node on the device has produced at least one value.
pub fn all_nodes_healthy(nodes: &HashMap<String, Node>) -> bool {
    nodes.values().all(|n| n.processor.is_healthy())
}

/// A node's current value, scaled into base units via its configured unit.
/// Derived-quantity math always runs in base units; this is the
/// calculator's only read path into the live node set.
pub fn scaled_value(nodes: &HashMap<String, Node>, name: &str) -> Option<f64> {
    let node = nodes.get(name)?;
    let raw = node.processor.value()?.as_f64()?;
    Some(crate::unit::scale_in(raw, node.config.unit.as_deref()))
}

/// Direction of power factor derived from active/reactive energy, per the
/// PF-from-energies formula.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PfDirection {
    /// Active energy moved, reactive energy did not: a purely resistive load.
    Unitary,
    Lagging,
    Leading,
    Unknown,
}

fn pf_direction(active_energy: f64, reactive_energy: f64) -> PfDirection {
    if active_energy != 0.0 && reactive_energy == 0.0 {
        PfDirection::Unitary
    } else if reactive_energy > 0.0 {
        PfDirection::Lagging
    } else if reactive_energy < 0.0 {
        PfDirection::Leading
    } else {
        PfDirection::Unknown
    }
}

/// Power factor and direction derived from one span's active/reactive
/// energy, per the PF-from-energies formula.
pub fn power_factor_from_energies(active_energy: f64, reactive_energy: f64) -> (Option<f64>, PfDirection) {
    (calculation::power_factor_from_energies(active_energy, reactive_energy), pf_direction(active_energy, reactive_energy))
}

/// One point in a composed energy/power-factor timespan.
#[derive(Debug, Clone, serde::Serialize)]
pub struct EnergyPoint {
    pub timestamp: DateTime<Utc>,
    pub active_energy: Option<f64>,
    pub reactive_energy: Option<f64>,
    pub power_factor: Option<f64>,
    pub direction: PfDirection,
}

/// A composed active/reactive-energy-plus-power-factor timespan, shaped
/// uniformly whether or not the underlying nodes exist so callers never see
/// a different schema for a missing node than for an empty one.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TimespanExtract {
    pub unit: Option<String>,
    pub decimal_places: Option<u32>,
    pub points: Vec<EnergyPoint>,
    pub global_power_factor: Option<f64>,
    pub global_direction: PfDirection,
}

/// The uniform empty-schema fallback: correct shape, no points, unknown
/// global metrics. Returned when a required node doesn't exist at all.
pub fn empty_schema(unit: Option<String>, decimal_places: Option<u32>) -> TimespanExtract {
    TimespanExtract {
        unit,
        decimal_places,
        points: Vec::new(),
        global_power_factor: None,
        global_direction: PfDirection::Unknown,
    }
}

/// Composes active and reactive energy log entries (matched by `end_time`)
/// into per-point and global power-factor-plus-direction series.
pub fn compose_over_timespan(
    active_logs: &[LogEntry],
    reactive_logs: &[LogEntry],
    unit: Option<String>,
    decimal_places: Option<u32>,
) -> TimespanExtract {
    if active_logs.is_empty() && reactive_logs.is_empty() {
        return empty_schema(unit, decimal_places);
    }

    let reactive_by_end: HashMap<DateTime<Utc>, &LogEntry> =
        reactive_logs.iter().map(|entry| (entry.end_time, entry)).collect();

    let mut points = Vec::with_capacity(active_logs.len());
    let mut total_active = 0.0;
    let mut total_reactive = 0.0;

    for entry in active_logs {
        let active = entry.fields.get("value").and_then(|v| v.as_f64());
        let reactive =
            reactive_by_end.get(&entry.end_time).and_then(|e| e.fields.get("value")).and_then(|v| v.as_f64());

        let (power_factor, direction) = match (active, reactive) {
            (Some(a), Some(r)) => power_factor_from_energies(a, r),
            _ => (None, PfDirection::Unknown),
        };

        if let Some(a) = active {
            total_active += a;
        }
        if let Some(r) = reactive {
            total_reactive += r;
        }

        points.push(EnergyPoint {
            timestamp: entry.end_time,
            active_energy: active,
            reactive_energy: reactive,
            power_factor,
            direction,
        });
    }

    let (global_power_factor, global_direction) = power_factor_from_energies(total_active, total_reactive);
    TimespanExtract { unit, decimal_places, points, global_power_factor, global_direction }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::processor::numeric::NumericProcessor;
    use crate::node::processor::NodeProcessor;
    use crate::node::value::Value;
    use crate::node::{NodeAttributes, NodeConfig, NodeType, Protocol, ProtocolOptions};
    use crate::protocol::NoProtocolNodeOptions;
    use serde_json::Map;

    fn node_with_value(value: f64) -> Node {
        let config = NodeConfig {
            name: "l1_voltage".into(),
            node_type: NodeType::Float,
            unit: Some("V".into()),
            protocol: Protocol::None,
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
            decimal_places: Some(2),
            attributes: NodeAttributes::default(),
        };
        let mut processor = NumericProcessor::new(None);
        processor.set_value(Some(Value::Float(value)));
        Node::new(config, ProtocolOptions::None(NoProtocolNodeOptions), Box::new(processor))
    }

    #[test]
    fn phase_values_reads_l1_l2_l3() {
        let mut nodes = HashMap::new();
        nodes.insert("l1_voltage".to_string(), node_with_value(230.0));
        let values = phase_values(&nodes, "voltage");
        assert_eq!(values[0], Some(230.0));
        assert_eq!(values[1], None);
        assert_eq!(values[2], None);
    }

    #[test]
    fn scaled_value_applies_unit_prefix() {
        let mut nodes = HashMap::new();
        let mut node = node_with_value(3.0);
        node.config.unit = Some("kV".into());
        nodes.insert("l1_voltage".to_string(), node);
        assert_eq!(scaled_value(&nodes, "l1_voltage"), Some(3000.0));
    }

    fn log_entry(end_time: DateTime<Utc>, value: f64) -> LogEntry {
        let mut fields = Map::new();
        fields.insert("value".into(), serde_json::Value::from(value));
        LogEntry { name: "active_energy".into(), start_time: end_time, end_time, fields }
    }

    #[test]
    fn compose_over_timespan_matches_entries_by_end_time_and_derives_pf() {
        let now = DateTime::<Utc>::from_timestamp(0, 0).unwrap();
        let active = vec![log_entry(now, 3.0)];
        let reactive = vec![log_entry(now, 4.0)];
        let extract = compose_over_timespan(&active, &reactive, Some("kWh".into()), Some(2));
        assert_eq!(extract.points.len(), 1);
        assert!((extract.points[0].power_factor.unwrap() - 0.6).abs() < 1e-9);
        assert_eq!(extract.points[0].direction, PfDirection::Lagging);
        assert!((extract.global_power_factor.unwrap() - 0.6).abs() < 1e-9);
    }

    #[test]
    fn compose_over_timespan_returns_uniform_empty_schema_when_nothing_exists() {
        let extract = compose_over_timespan(&[], &[], Some("kWh".into()), Some(2));
        assert!(extract.points.is_empty());
        assert_eq!(extract.global_power_factor, None);
        assert_eq!(extract.global_direction, PfDirection::Unknown);
        assert_eq!(extract.unit, Some("kWh".into()));
    }
}
