//! OPC UA transport: per-node tag options and the session-supervised client.
//!
//! No crate in this codebase's lineage has spoken OPC UA before; this module
//! is built directly against the `opcua` crate's client API rather than
//! adapted from an existing transport module.

use std::str::FromStr as _;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use opcua::client::prelude::{Client, ClientBuilder, IdentityToken, Session};
use opcua::types::{DataValue, NodeId, StatusCode, Variant};
use serde::{Deserialize, Serialize};

use crate::node::Value;

#[derive(Debug, thiserror::Error)]
pub enum OpcUaError {
    #[error("connection error: {0}")]
    Connect(String),
    #[error("status code error reading {node_id}: {status}")]
    Status { node_id: String, status: StatusCode },
    #[error("unsupported variant for node {node_id}: {variant:?}")]
    UnsupportedVariant { node_id: String, variant: String },
    #[error("not connected")]
    NotConnected,
}

/// Data type a tag's `Variant` is expected to carry; values outside this
/// shape are rejected rather than coerced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OpcUaNodeType {
    Bool,
    Int,
    Float,
    String,
}

/// Per-node OPC UA tag options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpcUaNodeOptions {
    /// String form of the tag's `NodeId`, e.g. `"ns=2;s=Meter1.Voltage.L1"`.
    pub node_id: String,
    pub node_type: OpcUaNodeType,
}

/// Device-level session parameters, one set per meter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpcUaOptions {
    pub url: String,
    #[serde(with = "humantime_serde")]
    pub read_period: Duration,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Converts a read `DataValue` into the crate's value sum type, rejecting
/// anything that doesn't match `node_type` rather than silently coercing.
pub fn decode_data_value(
    node_id: &str,
    data_value: &DataValue,
    node_type: OpcUaNodeType,
) -> Result<Value, OpcUaError> {
    let status = data_value.status.unwrap_or(StatusCode::Good);
    if !status.is_good() {
        return Err(OpcUaError::Status { node_id: node_id.to_string(), status });
    }
    let variant = data_value
        .value
        .clone()
        .ok_or_else(|| OpcUaError::UnsupportedVariant { node_id: node_id.to_string(), variant: "None".into() })?;

    let unsupported = |v: &Variant| OpcUaError::UnsupportedVariant {
        node_id: node_id.to_string(),
        variant: format!("{v:?}"),
    };

    match node_type {
        OpcUaNodeType::Bool => match variant {
            Variant::Boolean(b) => Ok(Value::Bool(b)),
            other => Err(unsupported(&other)),
        },
        OpcUaNodeType::Int => match variant {
            Variant::SByte(v) => Ok(Value::Int(v as i64)),
            Variant::Byte(v) => Ok(Value::Int(v as i64)),
            Variant::Int16(v) => Ok(Value::Int(v as i64)),
            Variant::UInt16(v) => Ok(Value::Int(v as i64)),
            Variant::Int32(v) => Ok(Value::Int(v as i64)),
            Variant::UInt32(v) => Ok(Value::Int(v as i64)),
            Variant::Int64(v) => Ok(Value::Int(v)),
            Variant::UInt64(v) => Ok(Value::Int(v as i64)),
            other => Err(unsupported(&other)),
        },
        OpcUaNodeType::Float => match variant {
            Variant::Float(v) => Ok(Value::Float(v as f64)),
            Variant::Double(v) => Ok(Value::Float(v)),
            other => Err(unsupported(&other)),
        },
        OpcUaNodeType::String => match variant {
            Variant::String(s) => Ok(Value::String(s.to_string())),
            other => Err(unsupported(&other)),
        },
    }
}

/// Session-supervised client for one OPC UA endpoint, shared by every node on
/// the owning meter.
pub struct OpcUaClient {
    options: OpcUaOptions,
    session: Option<Arc<RwLock<Session>>>,
}

impl OpcUaClient {
    pub fn new(options: OpcUaOptions) -> Self {
        OpcUaClient { options, session: None }
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    pub async fn connect(&mut self) -> Result<(), OpcUaError> {
        let mut client = ClientBuilder::new()
            .application_name("energy-gateway")
            .application_uri("urn:energy-gateway")
            .session_retry_limit(0)
            .client()
            .ok_or_else(|| OpcUaError::Connect("failed to build client".into()))?;

        let identity = match (&self.options.username, &self.options.password) {
            (Some(user), Some(pass)) => IdentityToken::UserName(user.clone(), pass.clone()),
            _ => IdentityToken::Anonymous,
        };

        let session = client
            .connect_to_endpoint((self.options.url.as_ref(), "None", "None", None), identity)
            .map_err(|status| OpcUaError::Connect(status.to_string()))?;
        self.session = Some(session);
        Ok(())
    }

    pub fn disconnect(&mut self) {
        if let Some(session) = self.session.take() {
            let _ = session.write().unwrap().disconnect();
        }
    }

    /// Reads a batch of tags in a single service call.
    pub async fn read_batch(
        &mut self,
        nodes: &[(String, OpcUaNodeType)],
    ) -> Result<Vec<Value>, OpcUaError> {
        let session = self.session.as_ref().ok_or(OpcUaError::NotConnected)?;
        let ids: Vec<NodeId> = nodes
            .iter()
            .map(|(id, _)| NodeId::from_str(id).unwrap_or_else(|_| NodeId::null()))
            .collect();

        let read_results = {
            let session = session.read().unwrap();
            session
                .read_values(&ids)
                .map_err(|status| OpcUaError::Connect(status.to_string()))?
        };

        read_results
            .into_iter()
            .zip(nodes.iter())
            .map(|(data_value, (node_id, node_type))| decode_data_value(node_id, &data_value, *node_type))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opcua::types::DateTime as OpcDateTime;

    fn good_value(variant: Variant) -> DataValue {
        DataValue {
            value: Some(variant),
            status: Some(StatusCode::Good),
            source_timestamp: Some(OpcDateTime::now()),
            source_picoseconds: None,
            server_timestamp: Some(OpcDateTime::now()),
            server_picoseconds: None,
        }
    }

    #[test]
    fn decodes_matching_variant() {
        let dv = good_value(Variant::Double(230.5));
        let v = decode_data_value("ns=2;s=x", &dv, OpcUaNodeType::Float).unwrap();
        assert_eq!(v.as_f64(), Some(230.5));
    }

    #[test]
    fn rejects_mismatched_variant() {
        let dv = good_value(Variant::Boolean(true));
        let err = decode_data_value("ns=2;s=x", &dv, OpcUaNodeType::Float).unwrap_err();
        assert!(matches!(err, OpcUaError::UnsupportedVariant { .. }));
    }

    #[test]
    fn rejects_bad_status() {
        let mut dv = good_value(Variant::Double(1.0));
        dv.status = Some(StatusCode::BadNodeIdUnknown);
        let err = decode_data_value("ns=2;s=x", &dv, OpcUaNodeType::Float).unwrap_err();
        assert!(matches!(err, OpcUaError::Status { .. }));
    }
}
