//! Gateway configuration: a YAML document listing every meter and its node
//! set, loaded with the same `serde_yaml` + `anyhow::Context` pattern the
//! MQTT config loader uses.

use std::collections::HashMap;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::meter::{validate_node_set, EnergyMeter};
use crate::meter::meter::{MeterOptions, MeterTransport};
use crate::node::{Node, NodeAttributes, NodeConfig, NodeType, CounterMode, ProtocolOptions};
use crate::protocol::modbus_rtu::{ModbusRtuNodeOptions, ModbusRtuOptions};
use crate::protocol::opcua::{OpcUaNodeOptions, OpcUaOptions};
use crate::protocol::{NoProtocolNodeOptions, Protocol};
use crate::registry::type_registry::create_processor;

/// One node's persisted configuration plus whichever protocol's options
/// section is populated (only the one matching the node's `protocol` field
/// should be `Some`, enforced at build time below).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord {
    pub name: String,
    pub node_type: NodeType,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub is_counter: bool,
    #[serde(default)]
    pub counter_mode: Option<CounterMode>,
    #[serde(default = "default_true")]
    pub publish: bool,
    #[serde(default)]
    pub calculated: bool,
    #[serde(default)]
    pub custom: bool,
    #[serde(default)]
    pub logging: bool,
    #[serde(default = "default_logging_period")]
    pub logging_period: u32,
    #[serde(default)]
    pub min_alarm: bool,
    #[serde(default)]
    pub max_alarm: bool,
    #[serde(default)]
    pub min_alarm_value: Option<f64>,
    #[serde(default)]
    pub max_alarm_value: Option<f64>,
    #[serde(default)]
    pub min_warning: bool,
    #[serde(default)]
    pub max_warning: bool,
    #[serde(default)]
    pub min_warning_value: Option<f64>,
    #[serde(default)]
    pub max_warning_value: Option<f64>,
    #[serde(default)]
    pub decimal_places: Option<u32>,
    #[serde(default)]
    pub attributes: NodeAttributes,
    #[serde(default)]
    pub modbus_rtu: Option<ModbusRtuNodeOptions>,
    #[serde(default)]
    pub opcua: Option<OpcUaNodeOptions>,
}

fn default_true() -> bool {
    true
}

fn default_logging_period() -> u32 {
    15
}

/// One meter's persisted configuration: identity, transport options (one
/// populated per `protocol`), and node set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeterRecord {
    pub id: i64,
    pub name: String,
    pub protocol: Protocol,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub modbus_rtu: Option<ModbusRtuOptions>,
    #[serde(default)]
    pub opcua: Option<OpcUaOptions>,
    #[serde(default)]
    pub meter_options: MeterOptions,
    pub nodes: Vec<NodeRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub meters: Vec<MeterRecord>,
}

impl GatewayConfig {
    pub fn load(path: &str) -> Result<Self> {
        log::debug!("Loading gateway config from {path:?}");
        let file = std::fs::File::open(path)
            .with_context(|| format!("Cannot open config file {path:?}"))?;
        let config: Self = serde_yaml::from_reader(file)
            .with_context(|| format!("Cannot parse config file {path:?}"))?;
        Ok(config)
    }
}

fn build_protocol_options(
    protocol: Protocol,
    record: &NodeRecord,
) -> Result<ProtocolOptions> {
    match protocol {
        Protocol::None => Ok(ProtocolOptions::None(NoProtocolNodeOptions)),
        Protocol::ModbusRtu => {
            let opts = record
                .modbus_rtu
                .clone()
                .with_context(|| format!("node '{}' is MODBUS_RTU but has no modbus_rtu options", record.name))?;
            Ok(ProtocolOptions::ModbusRtu(opts))
        }
        Protocol::OpcUa => {
            let opts = record
                .opcua
                .clone()
                .with_context(|| format!("node '{}' is OPC_UA but has no opcua options", record.name))?;
            Ok(ProtocolOptions::OpcUa(opts))
        }
    }
}

/// Builds a runnable [`EnergyMeter`] from its persisted record: validates
/// every node, builds each node's processor and protocol options, and wires
/// the transport matching `record.protocol`.
pub fn build_energy_meter(record: &MeterRecord) -> Result<EnergyMeter> {
    let mut configs = HashMap::new();
    for node_record in &record.nodes {
        let config = NodeConfig::new(NodeConfig {
            name: node_record.name.clone(),
            node_type: node_record.node_type,
            unit: node_record.unit.clone(),
            protocol: node_record.protocol,
            enabled: node_record.enabled,
            is_counter: node_record.is_counter,
            counter_mode: node_record.counter_mode,
            publish: node_record.publish,
            calculated: node_record.calculated,
            custom: node_record.custom,
            logging: node_record.logging,
            logging_period: node_record.logging_period,
            min_alarm: node_record.min_alarm,
            max_alarm: node_record.max_alarm,
            min_alarm_value: node_record.min_alarm_value,
            max_alarm_value: node_record.max_alarm_value,
            min_warning: node_record.min_warning,
            max_warning: node_record.max_warning,
            min_warning_value: node_record.min_warning_value,
            max_warning_value: node_record.max_warning_value,
            decimal_places: node_record.decimal_places,
            attributes: node_record.attributes,
        })
        .with_context(|| format!("node '{}' failed validation", node_record.name))?;

        let protocol_options = build_protocol_options(node_record.protocol, node_record)?;
        configs.insert(node_record.name.clone(), (config, protocol_options));
    }

    let derived = validate_node_set(&configs, record.meter_options)
        .with_context(|| format!("meter '{}' node set failed validation", record.name))?;

    let mut nodes = HashMap::new();
    for (name, (config, protocol_options)) in configs {
        let processor = create_processor(config.node_type, config.counter_mode);
        nodes.insert(name, Node::new(config, protocol_options, processor));
    }

    let transport = match record.protocol {
        Protocol::None => MeterTransport::None,
        Protocol::ModbusRtu => {
            let opts = record
                .modbus_rtu
                .clone()
                .with_context(|| format!("meter '{}' is MODBUS_RTU but has no modbus_rtu options", record.name))?;
            MeterTransport::modbus_rtu(opts)
        }
        Protocol::OpcUa => {
            let opts = record
                .opcua
                .clone()
                .with_context(|| format!("meter '{}' is OPC_UA but has no opcua options", record.name))?;
            MeterTransport::opcua(opts)
        }
    };

    Ok(EnergyMeter::new(record.id, record.name.clone(), nodes, derived, transport, record.meter_options))
}
