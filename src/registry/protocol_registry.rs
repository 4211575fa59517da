//! Protocol registry: the three transports a node can be read over, and the
//! invariant that a node's `protocol` field and its `ProtocolOptions` variant
//! always agree.

use crate::node::ProtocolOptions;
use crate::protocol::Protocol;

/// `true` if `options` is the variant `protocol` requires.
pub fn options_match_protocol(protocol: Protocol, options: &ProtocolOptions) -> bool {
    matches!(
        (protocol, options),
        (Protocol::None, ProtocolOptions::None(_))
            | (Protocol::ModbusRtu, ProtocolOptions::ModbusRtu(_))
            | (Protocol::OpcUa, ProtocolOptions::OpcUa(_))
    )
}

/// `NONE` nodes are never polled; every other registered protocol is.
pub fn is_polled(protocol: Protocol) -> bool {
    !matches!(protocol, Protocol::None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::modbus_rtu::{ModbusRtuEndian, ModbusRtuFunction, ModbusRtuNodeOptions, ModbusRtuNodeType};
    use crate::protocol::NoProtocolNodeOptions;

    #[test]
    fn mismatched_variant_is_rejected() {
        let opts = ProtocolOptions::ModbusRtu(ModbusRtuNodeOptions {
            function: ModbusRtuFunction::ReadHoldingRegisters,
            address: 0,
            node_type: ModbusRtuNodeType::UInt16,
            endian: ModbusRtuEndian::BigEndian,
            bit: None,
        });
        assert!(!options_match_protocol(Protocol::None, &opts));
        assert!(options_match_protocol(Protocol::ModbusRtu, &opts));
    }

    #[test]
    fn none_protocol_matches_none_options() {
        let opts = ProtocolOptions::None(NoProtocolNodeOptions);
        assert!(options_match_protocol(Protocol::None, &opts));
        assert!(!is_polled(Protocol::None));
        assert!(is_polled(Protocol::ModbusRtu));
    }
}
