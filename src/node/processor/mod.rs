//! Node value processors: the per-node state machine of counters, alarms,
//! statistics, and logging/publish serialization.
//!
//! [`NodeProcessor`] is the dynamic-dispatch seam the type registry
//! (`crate::registry::type_registry`) builds against; [`ProcessorState`]
//! holds the scaffolding shared by every concrete processor (timestamps,
//! alarm latches, logging bucket boundary) so numeric/bool/string processors
//! don't each reimplement it.

pub mod bool_string;
pub mod numeric;

use std::time::Instant;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::{Map, Value as Json};

use crate::node::{NodeConfig, NodeType, Value};

/// A single logging-sink entry produced by [`NodeProcessor::submit_log`].
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub fields: Map<String, Json>,
}

/// Direction a counter last moved, consumed by power-factor-direction
/// calculation when `read_separate_forward_reverse_energy` is configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LastDirection {
    #[default]
    None,
    Positive,
    Negative,
}

/// Type-specific value processor for one node.
///
/// Mirrors the abstract base's public surface; dynamic dispatch (rather than
/// an enum over the four types) keeps the type registry's factory table a
/// plain function-pointer map.
pub trait NodeProcessor: Send {
    /// Ingests a new observation. `None` is the null sentinel: it clears
    /// `value` without touching counter anchors or statistics.
    fn set_value(&mut self, value: Option<Value>);

    /// Clears value/statistics/direction state (and, for counters, the
    /// anchor) but leaves alarm/warning latches untouched.
    fn reset_value(&mut self);

    /// Clears all four alarm/warning latches.
    fn reset_alarms(&mut self);

    fn value(&self) -> Option<Value>;

    fn is_healthy(&self) -> bool;
    fn in_alarm(&self) -> bool;
    fn in_warning(&self) -> bool;

    /// Last direction a counter moved; `None` (the variant) for non-counter
    /// processors, which don't participate in PF-direction calculation.
    fn last_direction(&self) -> LastDirection {
        LastDirection::None
    }

    /// Seconds since the previous `set_value` call (`0.0` on the first),
    /// used by DELTA-energy calculation to integrate a power reading over
    /// the time it was held. `None` for a processor that's never been fed a
    /// value yet.
    fn elapsed_seconds(&self) -> Option<f64>;

    /// `last_log_datetime`, so the logging cadence check (due once
    /// `logging_period` minutes have elapsed since this timestamp) can be
    /// driven from outside the processor.
    fn last_log_datetime(&self) -> Option<DateTime<Utc>>;

    /// Seeds `last_log_datetime` without producing a log entry, for a node's
    /// first observation (there's nothing to log yet, only a cadence anchor
    /// to start).
    fn seed_log_datetime(&mut self, at: DateTime<Utc>);

    fn create_publish_format(&self, config: &NodeConfig) -> Map<String, Json>;
    fn create_extended_info(&self, config: &NodeConfig) -> Map<String, Json>;

    /// Produces a log entry for the just-elapsed bucket and resets runtime
    /// state (`reset_value` + bumping `last_log_datetime`).
    fn submit_log(&mut self, end_time: DateTime<Utc>, config: &NodeConfig) -> LogEntry;
}

/// Shared processor scaffolding: timestamps, alarm/warning latches, and the
/// logging-bucket boundary. Embedded in every concrete processor.
#[derive(Debug, Default)]
pub struct ProcessorState {
    pub last_log_datetime: Option<DateTime<Utc>>,
    pub min_alarm_state: bool,
    pub max_alarm_state: bool,
    pub min_warning_state: bool,
    pub max_warning_state: bool,
    pub timestamp: Option<DateTime<Utc>>,
    pub elapsed_time: Option<f64>,
    last_instant: Option<Instant>,
}

impl ProcessorState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Updates the wall-clock timestamp (for logging-bucket alignment) and
    /// the monotonic elapsed time (for rate calculations); the two clocks
    /// are never mixed.
    pub fn update_timestamp(&mut self) {
        let now_instant = Instant::now();
        self.elapsed_time = match self.last_instant {
            None => Some(0.0),
            Some(prev) => Some(now_instant.duration_since(prev).as_secs_f64()),
        };
        self.last_instant = Some(now_instant);
        self.timestamp = Some(Utc::now());
    }

    pub fn reset_alarms(&mut self) {
        self.min_alarm_state = false;
        self.max_alarm_state = false;
        self.min_warning_state = false;
        self.max_warning_state = false;
    }

    pub fn in_alarm(&self) -> bool {
        self.min_alarm_state || self.max_alarm_state
    }

    pub fn in_warning(&self) -> bool {
        self.min_warning_state || self.max_warning_state
    }

    /// `{type, unit, is_counter}` header shared by every publish payload,
    /// plus alarm/warning fields gated on whether they're configured, plus
    /// the node's phase attribute.
    pub fn base_publish_fields(&self, config: &NodeConfig) -> Map<String, Json> {
        let mut out = Map::new();
        out.insert("type".into(), Json::String(node_type_label(config.node_type).to_string()));
        out.insert(
            "unit".into(),
            config.unit.clone().map(Json::String).unwrap_or(Json::Null),
        );
        out.insert("is_counter".into(), Json::Bool(config.is_counter));
        if config.min_alarm {
            out.insert("min_alarm_state".into(), Json::Bool(self.min_alarm_state));
        }
        if config.min_warning {
            out.insert("min_warning_state".into(), Json::Bool(self.min_warning_state));
        }
        if config.max_alarm {
            out.insert("max_alarm_state".into(), Json::Bool(self.max_alarm_state));
        }
        if config.max_warning {
            out.insert("max_warning_state".into(), Json::Bool(self.max_warning_state));
        }
        out.insert(
            "phase".into(),
            serde_json::to_value(config.attributes.phase).unwrap_or(Json::Null),
        );
        out
    }

    pub fn base_extended_info(&self, config: &NodeConfig) -> Map<String, Json> {
        let mut out = Map::new();
        out.insert(
            "last_update_date".into(),
            self.timestamp.map(|t| Json::String(t.to_rfc3339())).unwrap_or(Json::Null),
        );
        out.insert(
            "last_reset_date".into(),
            self.last_log_datetime.map(|t| Json::String(t.to_rfc3339())).unwrap_or(Json::Null),
        );
        if config.min_alarm {
            out.insert(
                "min_alarm_value".into(),
                config.min_alarm_value.map(|v| Json::from(v)).unwrap_or(Json::Null),
            );
        }
        if config.min_warning {
            out.insert(
                "min_warning_value".into(),
                config.min_warning_value.map(Json::from).unwrap_or(Json::Null),
            );
        }
        if config.max_alarm {
            out.insert(
                "max_alarm_value".into(),
                config.max_alarm_value.map(Json::from).unwrap_or(Json::Null),
            );
        }
        if config.max_warning {
            out.insert(
                "max_warning_value".into(),
                config.max_warning_value.map(Json::from).unwrap_or(Json::Null),
            );
        }
        out.insert("type".into(), serde_json::to_value(config.node_type).unwrap_or(Json::Null));
        out.insert("protocol".into(), serde_json::to_value(config.protocol).unwrap_or(Json::Null));
        if config.logging {
            out.insert("logging_period".into(), Json::from(config.logging_period));
        }
        out
    }

    /// `{name, start_time, end_time}` header shared by every log entry, and
    /// advances `last_log_datetime` to `end_time`.
    pub fn begin_log(&mut self, config: &NodeConfig, end_time: DateTime<Utc>) -> (String, DateTime<Utc>, DateTime<Utc>) {
        let start_time = end_time - ChronoDuration::minutes(config.logging_period as i64);
        self.last_log_datetime = Some(end_time);
        (config.name.clone(), start_time, end_time)
    }
}

pub(crate) fn node_type_label(node_type: NodeType) -> &'static str {
    match node_type {
        NodeType::Int => "INT",
        NodeType::Float => "FLOAT",
        NodeType::Bool => "BOOL",
        NodeType::String => "STRING",
    }
}
