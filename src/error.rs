//! Crate-wide error taxonomy.
//!
//! Each subsystem defines its own narrow error enum (node configuration,
//! validation, per-protocol transport); this module aggregates them behind a
//! single top-level [`Error`] so callers at the edges (CLI, device manager)
//! don't need to match on every subsystem individually.

use crate::meter::ValidationError;
use crate::node::NodeConfigError;
use crate::protocol::modbus_rtu::ModbusRtuError;
use crate::protocol::opcua::OpcUaError;

/// Top-level error type returned by public crate operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("node configuration error: {0}")]
    NodeConfig(#[from] NodeConfigError),

    #[error("meter validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("modbus rtu transport error: {0}")]
    ModbusRtu(#[from] ModbusRtuError),

    #[error("opc ua transport error: {0}")]
    OpcUa(#[from] OpcUaError),

    #[error("unsupported protocol: {0}")]
    UnsupportedProtocol(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("meter {name} (id {id}) is not running")]
    NotRunning { id: i64, name: String },

    #[error("meter {name} (id {id}) is already running")]
    AlreadyRunning { id: i64, name: String },
}

pub type Result<T> = std::result::Result<T, Error>;
