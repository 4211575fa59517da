//! Processor for `INT`/`FLOAT` nodes: counter accumulation, direction
//! tracking, running min/max/mean, and alarm/warning evaluation.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value as Json};

use crate::node::{CounterMode, NodeConfig, NodeType, Value};

use super::{LastDirection, LogEntry, NodeProcessor, ProcessorState};

/// Numeric value processor. Shared between `INT` and `FLOAT` nodes; the
/// output is re-tagged to the config's declared type when serialized so an
/// `INT` node never reports a fractional JSON number.
pub struct NumericProcessor {
    state: ProcessorState,
    counter_mode: Option<CounterMode>,
    /// Live value: the accumulated total for counters, the last observed
    /// reading otherwise.
    value: Option<f64>,
    /// Last raw reading seen, used to compute deltas for `CUMULATIVE`
    /// counters. Not meaningful for `DIRECT`/`DELTA`.
    anchor: Option<f64>,
    last_direction: LastDirection,
    min_value: Option<f64>,
    max_value: Option<f64>,
    sum_value: f64,
    sample_count: u64,
}

impl NumericProcessor {
    pub fn new(counter_mode: Option<CounterMode>) -> Self {
        NumericProcessor {
            state: ProcessorState::new(),
            counter_mode,
            value: None,
            anchor: None,
            last_direction: LastDirection::default(),
            min_value: None,
            max_value: None,
            sum_value: 0.0,
            sample_count: 0,
        }
    }

    fn is_counter(&self) -> bool {
        self.counter_mode.is_some()
    }

    fn record_sample(&mut self, raw: f64) {
        if self.is_counter() {
            return;
        }
        self.min_value = Some(self.min_value.map_or(raw, |m| m.min(raw)));
        self.max_value = Some(self.max_value.map_or(raw, |m| m.max(raw)));
        self.sum_value += raw;
        self.sample_count += 1;
    }

    fn apply_counter(&mut self, raw: f64) {
        match self.counter_mode {
            None => self.value = Some(raw),
            Some(CounterMode::Direct) => {
                self.last_direction = match self.value {
                    Some(prev) if raw > prev => LastDirection::Positive,
                    Some(prev) if raw < prev => LastDirection::Negative,
                    Some(_) => self.last_direction,
                    None => self.last_direction,
                };
                self.value = Some(raw);
            }
            Some(CounterMode::Delta) => {
                self.last_direction = if raw > 0.0 {
                    LastDirection::Positive
                } else if raw < 0.0 {
                    LastDirection::Negative
                } else {
                    self.last_direction
                };
                self.value = Some(self.value.unwrap_or(0.0) + raw);
            }
            Some(CounterMode::Cumulative) => match self.anchor {
                // First observation anchors the counter and starts it at
                // zero; the anchor is never moved again until reset_value().
                None => {
                    self.anchor = Some(raw);
                    self.value = Some(0.0);
                }
                Some(initial) => {
                    let new_value = raw - initial;
                    self.last_direction = match self.value {
                        Some(prev) if new_value > prev => LastDirection::Positive,
                        Some(prev) if new_value < prev => LastDirection::Negative,
                        _ => self.last_direction,
                    };
                    self.value = Some(new_value);
                }
            },
        }
    }

    fn check_alarms(&mut self, raw: f64, config: &NodeConfig) {
        if config.min_alarm {
            if let Some(threshold) = config.min_alarm_value {
                self.state.min_alarm_state = raw < threshold;
            }
        }
        if config.max_alarm {
            if let Some(threshold) = config.max_alarm_value {
                self.state.max_alarm_state = raw > threshold;
            }
        }
        if config.min_warning {
            if let Some(threshold) = config.min_warning_value {
                self.state.min_warning_state = raw < threshold;
            }
        }
        if config.max_warning {
            if let Some(threshold) = config.max_warning_value {
                self.state.max_warning_state = raw > threshold;
            }
        }
    }

    /// FLOAT values round to `config.decimal_places` before serialization;
    /// INT values round to the nearest whole number regardless.
    fn json_value(&self, config: &NodeConfig, raw: f64) -> Json {
        match config.node_type {
            NodeType::Int => Json::from(raw.round() as i64),
            _ => {
                let rounded = match config.decimal_places {
                    Some(places) => {
                        let factor = 10f64.powi(places as i32);
                        (raw * factor).round() / factor
                    }
                    None => raw,
                };
                serde_json::Number::from_f64(rounded).map(Json::Number).unwrap_or(Json::Null)
            }
        }
    }
}

impl NodeProcessor for NumericProcessor {
    fn set_value(&mut self, value: Option<Value>) {
        self.state.update_timestamp();
        let Some(value) = value else {
            self.value = None;
            return;
        };
        let Some(raw) = value.as_f64() else {
            return;
        };
        self.apply_counter(raw);
        self.record_sample(raw);
    }

    fn reset_value(&mut self) {
        self.value = None;
        self.anchor = None;
        self.last_direction = LastDirection::default();
        self.min_value = None;
        self.max_value = None;
        self.sum_value = 0.0;
        self.sample_count = 0;
    }

    fn reset_alarms(&mut self) {
        self.state.reset_alarms();
    }

    fn value(&self) -> Option<Value> {
        self.value.map(Value::Float)
    }

    fn is_healthy(&self) -> bool {
        self.value.is_some()
    }

    fn in_alarm(&self) -> bool {
        self.state.in_alarm()
    }

    fn in_warning(&self) -> bool {
        self.state.in_warning()
    }

    fn last_direction(&self) -> LastDirection {
        self.last_direction
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
        out.insert(
            "value".into(),
            self.value.map(|v| self.json_value(config, v)).unwrap_or(Json::Null),
        );
        out
    }

    fn create_extended_info(&self, config: &NodeConfig) -> Map<String, Json> {
        self.state.base_extended_info(config)
    }

    fn submit_log(&mut self, end_time: DateTime<Utc>, config: &NodeConfig) -> LogEntry {
        let (name, start_time, end_time) = self.state.begin_log(config, end_time);

        // Alarm/warning checks run once more against the pending value so a
        // threshold crossed right at bucket close is still caught.
        if let Some(raw) = self.value {
            self.check_alarms(raw, config);
        }

        let mut fields = Map::new();
        if self.is_counter() {
            fields.insert(
                "value".into(),
                self.value.map(|v| self.json_value(config, v)).unwrap_or(Json::Null),
            );
        } else {
            fields.insert(
                "value".into(),
                self.value.map(|v| self.json_value(config, v)).unwrap_or(Json::Null),
            );
            if self.sample_count > 0 {
                fields.insert(
                    "min_value".into(),
                    self.min_value.map(|v| self.json_value(config, v)).unwrap_or(Json::Null),
                );
                fields.insert(
                    "max_value".into(),
                    self.max_value.map(|v| self.json_value(config, v)).unwrap_or(Json::Null),
                );
                let mean = self.sum_value / self.sample_count as f64;
                fields.insert("mean_value".into(), self.json_value(config, mean));
            } else {
                fields.insert("min_value".into(), Json::Null);
                fields.insert("max_value".into(), Json::Null);
                fields.insert("mean_value".into(), Json::Null);
            }
        }

        self.reset_value();
        LogEntry { name, start_time, end_time, fields }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{NodeAttributes, Protocol};

    fn config(node_type: NodeType, counter_mode: Option<CounterMode>) -> NodeConfig {
        NodeConfig {
            name: "test_node".into(),
            node_type,
            unit: None,
            protocol: Protocol::None,
            enabled: true,
            is_counter: counter_mode.is_some(),
            counter_mode,
            publish: true,
            calculated: false,
            custom: false,
            logging: true,
            logging_period: 15,
            min_alarm: false,
            max_alarm: false,
            min_alarm_value: None,
            max_alarm_value: None,
            min_warning: false,
            max_warning: false,
            min_warning_value: None,
            max_warning_value: None,
            decimal_places: if matches!(node_type, NodeType::Float) { Some(2) } else { None },
            attributes: NodeAttributes::default(),
        }
    }

    #[test]
    fn delta_counter_always_accumulates_direction_follows_sign_of_reading() {
        let mut p = NumericProcessor::new(Some(CounterMode::Delta));
        p.set_value(Some(Value::Float(10.0)));
        p.set_value(Some(Value::Float(5.0)));
        assert_eq!(p.value(), Some(Value::Float(15.0)));
        assert_eq!(p.last_direction(), LastDirection::Positive);
        p.set_value(Some(Value::Float(-1.0)));
        assert_eq!(p.value(), Some(Value::Float(14.0)));
        assert_eq!(p.last_direction(), LastDirection::Negative);
    }

    #[test]
    fn cumulative_counter_tracks_fixed_anchor_delta() {
        let mut p = NumericProcessor::new(Some(CounterMode::Cumulative));
        p.set_value(Some(Value::Float(100.0)));
        assert_eq!(p.value(), Some(Value::Float(0.0)));
        p.set_value(Some(Value::Float(130.0)));
        assert_eq!(p.value(), Some(Value::Float(30.0)));
        assert_eq!(p.last_direction(), LastDirection::Positive);
        p.set_value(Some(Value::Float(120.0)));
        assert_eq!(p.value(), Some(Value::Float(20.0)));
        assert_eq!(p.last_direction(), LastDirection::Negative);
    }

    #[test]
    fn non_counter_tracks_min_max_mean() {
        let cfg = config(NodeType::Float, None);
        let mut p = NumericProcessor::new(None);
        p.set_value(Some(Value::Float(10.0)));
        p.set_value(Some(Value::Float(20.0)));
        p.set_value(Some(Value::Float(30.0)));
        let log = p.submit_log(Utc::now(), &cfg);
        assert_eq!(log.fields.get("min_value").unwrap().as_f64(), Some(10.0));
        assert_eq!(log.fields.get("max_value").unwrap().as_f64(), Some(30.0));
        assert_eq!(log.fields.get("mean_value").unwrap().as_f64(), Some(20.0));
    }

    #[test]
    fn null_value_clears_without_touching_alarms() {
        let cfg = config(NodeType::Float, None);
        let mut p = NumericProcessor::new(None);
        p.set_value(Some(Value::Float(10.0)));
        p.state.min_alarm_state = true;
        p.set_value(None);
        assert_eq!(p.value(), None);
        assert!(p.in_alarm());
    }
}
