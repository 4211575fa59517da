//! Type registry: builds the value processor for a node's declared type.

use crate::node::processor::bool_string::{BoolProcessor, StringProcessor};
use crate::node::processor::numeric::NumericProcessor;
use crate::node::processor::NodeProcessor;
use crate::node::{CounterMode, NodeType};

/// Builds the processor appropriate for `node_type`. `counter_mode` is
/// ignored for `BOOL`/`STRING` (already enforced `None` by
/// [`crate::node::NodeConfig`] construction).
pub fn create_processor(node_type: NodeType, counter_mode: Option<CounterMode>) -> Box<dyn NodeProcessor> {
    match node_type {
        NodeType::Int | NodeType::Float => Box::new(NumericProcessor::new(counter_mode)),
        NodeType::Bool => Box::new(BoolProcessor::new()),
        NodeType::String => Box::new(StringProcessor::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Value;

    #[test]
    fn bool_type_ignores_counter_mode() {
        let mut p = create_processor(NodeType::Bool, Some(CounterMode::Delta));
        p.set_value(Some(Value::Bool(true)));
        assert_eq!(p.value(), Some(Value::Bool(true)));
    }

    #[test]
    fn int_type_builds_numeric_processor() {
        let mut p = create_processor(NodeType::Int, None);
        p.set_value(Some(Value::Int(42)));
        assert_eq!(p.value(), Some(Value::Float(42.0)));
    }
}
