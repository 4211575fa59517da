//! Energy meter base orchestration: one meter owns one transport and a set
//! of nodes, and drives connect → poll → calculate → log each read cycle.
//! The transport variant only changes how a read cycle fetches raw values.

use std::collections::HashMap;

use chrono::Utc;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::node::processor::{LastDirection, LogEntry};
use crate::node::{phase_prefix_of, remove_phase_prefix, CounterMode, Node, ProtocolOptions, Value};
use crate::protocol::modbus_rtu::{self, ModbusRtuClient, ModbusRtuOptions};
use crate::protocol::opcua::{OpcUaClient, OpcUaOptions};
use crate::unit;

use super::calculation;
use super::extraction::{phase_values, scaled_value};
use super::validation::DerivedKind;

/// Meter-level behavior flags, independent of transport, that change how a
/// cycle's derived quantities are computed or which nodes are expected.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct MeterOptions {
    /// Device reports energy directly rather than only via integration.
    #[serde(default)]
    pub read_energy_from_meter: bool,
    /// Forward and reverse energy are exposed as separate counters, giving
    /// power-factor direction a fallback source when reactive power's sign
    /// alone isn't trustworthy.
    #[serde(default)]
    pub read_separate_forward_reverse_energy: bool,
    /// Reactive power's sign is meaningful on this device, so it alone can
    /// decide power-factor direction.
    #[serde(default)]
    pub negative_reactive_power: bool,
    /// Device exposes a frequency node.
    #[serde(default)]
    pub frequency_reading: bool,
}

/// The transport a meter reads over. `None` meters hold only calculated or
/// custom-injected nodes and are never polled.
pub enum MeterTransport {
    None,
    ModbusRtu(ModbusRtuClient),
    OpcUa(OpcUaClient),
}

impl MeterTransport {
    pub fn modbus_rtu(options: ModbusRtuOptions) -> Self {
        MeterTransport::ModbusRtu(ModbusRtuClient::new(options))
    }

    pub fn opcua(options: OpcUaOptions) -> Self {
        MeterTransport::OpcUa(OpcUaClient::new(options))
    }

    pub fn is_connected(&self) -> bool {
        match self {
            MeterTransport::None => true,
            MeterTransport::ModbusRtu(c) => c.is_connected(),
            MeterTransport::OpcUa(c) => c.is_connected(),
        }
    }
}

/// One physical (or virtual, for `NONE`) energy meter: its node set, derived
/// quantity dispatch table, and transport.
pub struct EnergyMeter {
    pub id: i64,
    pub name: String,
    pub nodes: HashMap<String, Node>,
    derived: HashMap<String, DerivedKind>,
    transport: MeterTransport,
    pub options: MeterOptions,
    /// Connection-change callback: invoked whenever `connected` flips.
    on_connection_change: Option<Box<dyn Fn(i64, bool) + Send + Sync>>,
    connected: bool,
    /// Transport-level link state, tracked independently of `connected`
    /// (which also reflects whether the most recent read cycle succeeded).
    network_connected: bool,
    /// One-shot latch: true once a "flush nulls" calculation pass has run
    /// for the current disconnected spell, so repeated disconnected cycles
    /// don't keep recomputing derived quantities from stale nulls.
    disconnected_calculation: bool,
}

impl EnergyMeter {
    pub fn new(
        id: i64,
        name: String,
        nodes: HashMap<String, Node>,
        derived: HashMap<String, DerivedKind>,
        transport: MeterTransport,
        options: MeterOptions,
    ) -> Self {
        EnergyMeter {
            id,
            name,
            nodes,
            derived,
            transport,
            options,
            on_connection_change: None,
            connected: false,
            network_connected: false,
            disconnected_calculation: false,
        }
    }

    pub fn set_connection_change_callback(&mut self, callback: impl Fn(i64, bool) + Send + Sync + 'static) {
        self.on_connection_change = Some(Box::new(callback));
    }

    pub fn connected(&self) -> bool {
        self.connected
    }

    pub fn network_connected(&self) -> bool {
        self.network_connected
    }

    fn set_connected(&mut self, state: bool) {
        if self.connected != state {
            self.connected = state;
            if let Some(callback) = &self.on_connection_change {
                callback(self.id, state);
            }
        }
        for node in self.nodes.values_mut() {
            node.set_connection_state(state);
        }
    }

    pub async fn connect(&mut self) -> Result<()> {
        let result = match &mut self.transport {
            MeterTransport::None => Ok(()),
            MeterTransport::ModbusRtu(client) => client.connect().await.map_err(Error::from),
            MeterTransport::OpcUa(client) => client.connect().await.map_err(Error::from),
        };
        self.network_connected = result.is_ok();
        self.set_connected(result.is_ok());
        result
    }

    pub fn disconnect(&mut self) {
        match &mut self.transport {
            MeterTransport::None => {}
            MeterTransport::ModbusRtu(client) => client.disconnect(),
            MeterTransport::OpcUa(client) => client.disconnect(),
        }
        self.network_connected = false;
        self.set_connected(false);
    }

    /// Reads every protocol-backed node once, then runs the calculator over
    /// every calculated node. A transport failure marks the meter
    /// disconnected; the first disconnected cycle nulls every protocol-backed
    /// node and runs one calculation pass so derived quantities go null too,
    /// then latches so later disconnected cycles do nothing further.
    pub async fn poll(&mut self) -> Result<()> {
        let result = match &mut self.transport {
            MeterTransport::None => Ok(()),
            MeterTransport::ModbusRtu(client) => {
                Self::poll_modbus_rtu(client, &mut self.nodes).await.map_err(Error::from)
            }
            MeterTransport::OpcUa(client) => {
                Self::poll_opcua(client, &mut self.nodes).await.map_err(Error::from)
            }
        };

        match result {
            Ok(()) => {
                self.network_connected = true;
                self.set_connected(true);
                self.disconnected_calculation = false;
                self.run_calculations();
                Ok(())
            }
            Err(err) => {
                warn!("meter {} poll failed: {err}", self.name);
                self.network_connected = false;
                self.set_connected(false);
                if !self.disconnected_calculation {
                    for node in self.nodes.values_mut() {
                        if !matches!(node.protocol_options, ProtocolOptions::None(_)) {
                            node.processor.set_value(None);
                        }
                    }
                    self.run_calculations();
                    self.disconnected_calculation = true;
                }
                Err(err)
            }
        }
    }

    async fn poll_modbus_rtu(
        client: &mut ModbusRtuClient,
        nodes: &mut HashMap<String, Node>,
    ) -> std::result::Result<(), crate::protocol::modbus_rtu::ModbusRtuError> {
        let node_options: Vec<(String, crate::protocol::modbus_rtu::ModbusRtuNodeOptions)> = nodes
            .iter()
            .filter_map(|(name, node)| match &node.protocol_options {
                ProtocolOptions::ModbusRtu(opts) => Some((name.clone(), opts.clone())),
                _ => None,
            })
            .collect();

        let groups = modbus_rtu::build_batch_groups(&node_options);
        let options_by_name: HashMap<&str, &crate::protocol::modbus_rtu::ModbusRtuNodeOptions> =
            node_options.iter().map(|(name, opts)| (name.as_str(), opts)).collect();

        for group in &groups {
            let words = client.read_batch(group).await?;
            let mut offset = 0usize;
            for node_name in &group.node_names {
                let opts = options_by_name[node_name.as_str()];
                let span = if opts.function.is_bit_addressed() {
                    1
                } else {
                    opts.node_type.register_count() as usize
                };
                let window = &words[offset..offset + span];
                offset += span;
                let value =
                    modbus_rtu::decode_registers(window, opts.node_type, opts.endian, opts.bit);
                if let Some(node) = nodes.get_mut(node_name) {
                    match value {
                        Ok(v) => node.processor.set_value(Some(v)),
                        Err(err) => {
                            debug!("node {node_name} decode failed: {err}");
                            node.processor.set_value(None);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    async fn poll_opcua(
        client: &mut OpcUaClient,
        nodes: &mut HashMap<String, Node>,
    ) -> std::result::Result<(), crate::protocol::opcua::OpcUaError> {
        let targets: Vec<(String, crate::protocol::opcua::OpcUaNodeType)> = nodes
            .iter()
            .filter_map(|(name, node)| match &node.protocol_options {
                ProtocolOptions::OpcUa(opts) => Some((name.clone(), opts.node_type)),
                _ => None,
            })
            .collect();
        let names: Vec<&str> = targets.iter().map(|(n, _)| n.as_str()).collect();
        let values = client.read_batch(&targets).await?;
        for (name, value) in names.into_iter().zip(values.into_iter()) {
            if let Some(node) = nodes.get_mut(name) {
                node.processor.set_value(Some(value));
            }
        }
        Ok(())
    }

    /// The reactive-energy counter's last observed direction, consulted by
    /// power-factor-direction calculation when the meter reads separate
    /// forward/reverse energy. Tries the reverse counter first (it's the one
    /// that moves under LAGGING flow in the common wiring), then forward.
    fn reactive_energy_direction(&self, phase: &str) -> LastDirection {
        for candidate in
            [format!("{phase}reverse_reactive_energy"), format!("{phase}forward_reactive_energy")]
        {
            if let Some(node) = self.nodes.get(&candidate) {
                let direction = node.processor.last_direction();
                if direction != LastDirection::None {
                    return direction;
                }
            }
        }
        LastDirection::None
    }

    fn run_calculations(&mut self) {
        enum Update {
            Set(Option<f64>),
            Skip,
        }

        let items: Vec<(String, DerivedKind)> = self.derived.iter().map(|(n, k)| (n.clone(), *k)).collect();

        for (name, kind) in items {
            let phase = phase_prefix_of(&name);
            let update = match kind {
                DerivedKind::ApparentPower => {
                    let active = scaled_value(&self.nodes, &format!("{phase}active_power"));
                    let reactive = scaled_value(&self.nodes, &format!("{phase}reactive_power"));
                    let voltage = scaled_value(&self.nodes, &format!("{phase}voltage"));
                    let current = scaled_value(&self.nodes, &format!("{phase}current"));
                    Update::Set(calculation::apparent_power(active, reactive, voltage, current))
                }
                DerivedKind::ActivePower => {
                    let apparent = scaled_value(&self.nodes, &format!("{phase}apparent_power"));
                    let reactive = scaled_value(&self.nodes, &format!("{phase}reactive_power"));
                    let voltage = scaled_value(&self.nodes, &format!("{phase}voltage"));
                    let current = scaled_value(&self.nodes, &format!("{phase}current"));
                    let power_factor = scaled_value(&self.nodes, &format!("{phase}power_factor"));
                    Update::Set(calculation::active_power(apparent, reactive, voltage, current, power_factor))
                }
                DerivedKind::ReactivePower => {
                    let apparent = scaled_value(&self.nodes, &format!("{phase}apparent_power"));
                    let active = scaled_value(&self.nodes, &format!("{phase}active_power"));
                    let voltage = scaled_value(&self.nodes, &format!("{phase}voltage"));
                    let current = scaled_value(&self.nodes, &format!("{phase}current"));
                    let power_factor = scaled_value(&self.nodes, &format!("{phase}power_factor"));
                    Update::Set(calculation::reactive_power(apparent, active, voltage, current, power_factor))
                }
                DerivedKind::PowerFactor => {
                    let active = scaled_value(&self.nodes, &format!("{phase}active_power"));
                    let reactive = scaled_value(&self.nodes, &format!("{phase}reactive_power"));
                    Update::Set(calculation::power_factor(active, reactive))
                }
                DerivedKind::TotalPowerFactor => {
                    let [l1a, l2a, l3a] = phase_values(&self.nodes, "active_power");
                    let [l1r, l2r, l3r] = phase_values(&self.nodes, "reactive_power");
                    Update::Set(calculation::total_power_factor(l1a, l2a, l3a, l1r, l2r, l3r))
                }
                DerivedKind::PowerFactorDirection => {
                    let reactive = scaled_value(&self.nodes, &format!("{phase}reactive_power"));
                    let direction = self.reactive_energy_direction(phase);
                    Update::Set(calculation::power_factor_direction(
                        reactive,
                        self.options.negative_reactive_power,
                        self.options.read_separate_forward_reverse_energy,
                        direction,
                    ))
                }
                DerivedKind::Energy => {
                    let base = remove_phase_prefix(&name);
                    if name.starts_with("total_") {
                        let [l1, l2, l3] = phase_values(&self.nodes, base);
                        Update::Set(calculation::phase_total(l1, l2, l3))
                    } else {
                        let counter_mode = self.nodes.get(&name).and_then(|n| n.config.counter_mode);
                        match counter_mode {
                            Some(CounterMode::Cumulative) => {
                                let forward = scaled_value(&self.nodes, &format!("{phase}forward_{base}"));
                                let reverse = scaled_value(&self.nodes, &format!("{phase}reverse_{base}"));
                                match calculation::energy_from_forward_reverse(forward, reverse) {
                                    Some(v) => Update::Set(Some(v)),
                                    None => Update::Skip,
                                }
                            }
                            Some(CounterMode::Delta) => {
                                let power_base = base.replace("_energy", "_power");
                                let power_name = format!("{phase}{power_base}");
                                let power = scaled_value(&self.nodes, &power_name);
                                let elapsed = self
                                    .nodes
                                    .get(&power_name)
                                    .and_then(|n| n.processor.elapsed_seconds());
                                match calculation::energy_from_power(power, elapsed) {
                                    Some(v) => Update::Set(Some(v)),
                                    None => Update::Skip,
                                }
                            }
                            _ => Update::Skip,
                        }
                    }
                }
                DerivedKind::PhaseTotal => {
                    let base = remove_phase_prefix(&name);
                    let [l1, l2, l3] = phase_values(&self.nodes, base);
                    Update::Set(calculation::phase_total(l1, l2, l3))
                }
            };

            if let Update::Set(value) = update {
                if let Some(node) = self.nodes.get_mut(&name) {
                    let scaled_out = value.map(|v| unit::scale_out(v, node.config.unit.as_deref()));
                    node.processor.set_value(scaled_out.map(Value::Float));
                }
            }
        }
    }

    /// Publish envelope: `{node_name: publish_format}` for every
    /// publishable node.
    pub fn publish_envelope(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut out = serde_json::Map::new();
        for (name, node) in &self.nodes {
            if node.config.publish {
                out.insert(name.clone(), serde_json::Value::Object(node.get_publish_format()));
            }
        }
        out
    }

    /// After logging an energy node, clears its directional companions that
    /// aren't independently logged (so they don't double-count the interval
    /// the just-logged total already accounted for).
    fn reset_directional_energy(&mut self, name: &str, is_total: bool) {
        let phase = phase_prefix_of(name).to_string();
        let base = remove_phase_prefix(name).to_string();

        if is_total {
            for phase_prefix in ["l1_", "l2_", "l3_"] {
                let sibling = format!("{phase_prefix}{base}");
                self.reset_if_not_logged(&sibling);
            }
            return;
        }

        for direction in ["forward_", "reverse_"] {
            let companion = format!("{phase}{direction}{base}");
            self.reset_if_not_logged(&companion);
        }
    }

    fn reset_if_not_logged(&mut self, name: &str) {
        if let Some(node) = self.nodes.get_mut(name) {
            if !node.config.logging {
                node.processor.reset_value();
            }
        }
    }

    /// Logs every node that is due: on its first observation it seeds
    /// `last_log_datetime` without logging, and afterwards it's due once
    /// `logging_period` minutes have elapsed *and* the wall clock is aligned
    /// to a `logging_period`-minute boundary. A logged energy node resets its
    /// directional companions that aren't independently logged.
    pub fn collect_due_logs(&mut self, now: chrono::DateTime<Utc>) -> Vec<LogEntry> {
        let mut entries = Vec::new();
        let names: Vec<String> =
            self.nodes.iter().filter(|(_, node)| node.config.logging).map(|(name, _)| name.clone()).collect();

        for name in names {
            let Some(node) = self.nodes.get(&name) else { continue };
            let period_minutes = node.config.logging_period;
            let last_log_datetime = node.processor.last_log_datetime();

            let Some(last) = last_log_datetime else {
                if let Some(node) = self.nodes.get_mut(&name) {
                    node.processor.seed_log_datetime(now);
                }
                continue;
            };

            let elapsed_minutes = (now - last).num_minutes();
            let period_ms = i64::from(period_minutes) * 60_000;
            let aligned = period_ms > 0 && now.timestamp_millis() % period_ms == 0;
            if elapsed_minutes < i64::from(period_minutes) || !aligned {
                continue;
            }

            let base = remove_phase_prefix(&name);
            let is_energy_node = base.ends_with("active_energy") || base.ends_with("reactive_energy");
            let is_total = name.starts_with("total_");

            let Some(node) = self.nodes.get_mut(&name) else { continue };
            entries.push(node.processor.submit_log(now, &node.config));

            if is_energy_node {
                self.reset_directional_energy(&name, is_total);
            }
        }
        entries
    }
}
