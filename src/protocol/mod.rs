//! Protocol registry: the set of transports a node's value can come from.
//!
//! Only the protocols this gateway actually speaks are represented here.
//! The upstream device model's `Protocol` enum also carries `OPC_UA`-adjacent
//! transports this core never implements (MQTT and Modbus TCP belong to other
//! subsystems' wiring, not to node acquisition); those are intentionally
//! absent rather than kept as dead variants.

pub mod modbus_rtu;
pub mod opcua;

use serde::{Deserialize, Serialize};

/// Transport a node's value is read over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Protocol {
    /// No transport: calculated or custom-injected nodes.
    None,
    ModbusRtu,
    OpcUa,
}

impl Default for Protocol {
    fn default() -> Self {
        Protocol::None
    }
}

/// Node-level options for `NONE`-protocol nodes (calculated or custom
/// values). Carries no read parameters; such nodes are never polled, only
/// written to by the derived-quantity calculator or an external submitter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoProtocolNodeOptions;
