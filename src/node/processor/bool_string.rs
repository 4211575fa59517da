//! Processors for `BOOL` and `STRING` nodes.
//!
//! Neither type supports counters, alarms, or statistics (enforced at
//! [`crate::node::NodeConfig`] construction), so both processors are thin
//! wrappers around the last observed value.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value as Json};

use crate::node::{NodeConfig, Value};

use super::{LogEntry, NodeProcessor, ProcessorState};

pub struct BoolProcessor {
    state: ProcessorState,
    value: Option<bool>,
}

impl BoolProcessor {
    pub fn new() -> Self {
        BoolProcessor { state: ProcessorState::new(), value: None }
    }
}

impl Default for BoolProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeProcessor for BoolProcessor {
    fn set_value(&mut self, value: Option<Value>) {
        self.state.update_timestamp();
        self.value = match value {
            Some(Value::Bool(b)) => Some(b),
            _ => None,
        };
    }

    fn reset_value(&mut self) {
        self.value = None;
    }

    fn reset_alarms(&mut self) {}

    fn value(&self) -> Option<Value> {
        self.value.map(Value::Bool)
    }

    fn is_healthy(&self) -> bool {
        self.value.is_some()
    }

    fn in_alarm(&self) -> bool {
        false
    }

    fn in_warning(&self) -> bool {
        false
    }

    fn elapsed_seconds(&self) -> Option<f64> {
        self.state.elapsed_time
    }

    fn last_log_datetime(&self) -> Option<DateTime<Utc>> {
        self.state.last_log_datetime
    }

    fn seed_log_datetime(&mut self, at: DateTime<Utc>) {
        self.state.last_log_datetime = Some(at);
    }

    fn create_publish_format(&self, config: &NodeConfig) -> Map<String, Json> {
        let mut out = self.state.base_publish_fields(config);
        out.insert("value".into(), self.value.map(Json::Bool).unwrap_or(Json::Null));
        out
    }

    fn create_extended_info(&self, config: &NodeConfig) -> Map<String, Json> {
        self.state.base_extended_info(config)
    }

    fn submit_log(&mut self, end_time: DateTime<Utc>, config: &NodeConfig) -> LogEntry {
        let (name, start_time, end_time) = self.state.begin_log(config, end_time);
        let mut fields = Map::new();
        fields.insert("value".into(), self.value.map(Json::Bool).unwrap_or(Json::Null));
        self.reset_value();
        LogEntry { name, start_time, end_time, fields }
    }
}

pub struct StringProcessor {
    state: ProcessorState,
    value: Option<String>,
}

impl StringProcessor {
    pub fn new() -> Self {
        StringProcessor { state: ProcessorState::new(), value: None }
    }
}

impl Default for StringProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeProcessor for StringProcessor {
    fn set_value(&mut self, value: Option<Value>) {
        self.state.update_timestamp();
        self.value = match value {
            Some(Value::String(s)) => Some(s),
            _ => None,
        };
    }

    fn reset_value(&mut self) {
        self.value = None;
    }

    fn reset_alarms(&mut self) {}

    fn value(&self) -> Option<Value> {
        self.value.clone().map(Value::String)
    }

    fn is_healthy(&self) -> bool {
        self.value.is_some()
    }

    fn in_alarm(&self) -> bool {
        false
    }

    fn in_warning(&self) -> bool {
        false
    }

    fn elapsed_seconds(&self) -> Option<f64> {
        self.state.elapsed_time
    }

    fn last_log_datetime(&self) -> Option<DateTime<Utc>> {
        self.state.last_log_datetime
    }

    fn seed_log_datetime(&mut self, at: DateTime<Utc>) {
        self.state.last_log_datetime = Some(at);
    }

    fn create_publish_format(&self, config: &NodeConfig) -> Map<String, Json> {
        let mut out = self.state.base_publish_fields(config);
        out.insert("value".into(), self.value.clone().map(Json::String).unwrap_or(Json::Null));
        out
    }

    fn create_extended_info(&self, config: &NodeConfig) -> Map<String, Json> {
        self.state.base_extended_info(config)
    }

    fn submit_log(&mut self, end_time: DateTime<Utc>, config: &NodeConfig) -> LogEntry {
        let (name, start_time, end_time) = self.state.begin_log(config, end_time);
        let mut fields = Map::new();
        fields.insert("value".into(), self.value.clone().map(Json::String).unwrap_or(Json::Null));
        self.reset_value();
        LogEntry { name, start_time, end_time, fields }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bool_processor_ignores_non_bool_input() {
        let mut p = BoolProcessor::new();
        p.set_value(Some(Value::Int(1)));
        assert_eq!(p.value(), None);
        p.set_value(Some(Value::Bool(true)));
        assert_eq!(p.value(), Some(Value::Bool(true)));
    }

    #[test]
    fn string_processor_round_trips_value() {
        let mut p = StringProcessor::new();
        p.set_value(Some(Value::String("ok".into())));
        assert_eq!(p.value(), Some(Value::String("ok".into())));
    }
}
