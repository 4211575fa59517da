//! Device manager: owns every configured meter, spawns one poll task per
//! meter, and forwards each cycle's publish envelope to the MQTT sink.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{info, warn};
use paho_mqtt::Client as MqttClient;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::{build_energy_meter, GatewayConfig, MeterRecord};
use crate::error::{Error, Result};
use crate::meter::meter::MeterOptions;
use crate::meter::EnergyMeter;
use crate::mqtt::{self, MqttConfig};
use crate::protocol::Protocol;

/// A meter's identity and connection state, as published on the periodic
/// device-state broadcast. Snapshotted after every connect/poll cycle.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceStatus {
    pub id: i64,
    pub name: String,
    pub protocol: Protocol,
    pub connected: bool,
    pub options: MeterOptions,
    pub communication_options: serde_json::Value,
}

type StatusMap = Arc<Mutex<HashMap<i64, DeviceStatus>>>;

struct ManagedMeter {
    name: String,
    handle: JoinHandle<()>,
    stop: watch::Sender<bool>,
}

const DEVICES_STATE_PERIOD: Duration = Duration::from_secs(10);
const DEVICES_STATE_TOPIC: &str = "devices_state";

/// Runs every configured meter concurrently and owns their lifecycle.
pub struct DeviceManager {
    meters: HashMap<i64, ManagedMeter>,
    mqtt: Option<(MqttClient, MqttConfig)>,
    statuses: StatusMap,
    devices_state_task: Option<JoinHandle<()>>,
}

impl DeviceManager {
    pub fn new(mqtt: Option<(MqttClient, MqttConfig)>) -> Self {
        DeviceManager {
            meters: HashMap::new(),
            mqtt,
            statuses: Arc::new(Mutex::new(HashMap::new())),
            devices_state_task: None,
        }
    }

    /// Builds and spawns a poll task for every meter in `config` with
    /// `enabled: true`, then (if MQTT is configured) starts the periodic
    /// device-state broadcast.
    pub fn start_all(&mut self, config: &GatewayConfig) -> Result<()> {
        for record in &config.meters {
            if !record.enabled {
                continue;
            }
            self.start_meter(record)?;
        }
        self.start_devices_state_task();
        Ok(())
    }

    pub fn start_meter(&mut self, record: &MeterRecord) -> Result<()> {
        if self.meters.contains_key(&record.id) {
            return Err(Error::AlreadyRunning { id: record.id, name: record.name.clone() });
        }
        let meter = build_energy_meter(record).map_err(|err| Error::Config(err.to_string()))?;
        let read_period = read_period_for(record);
        let mqtt = self.mqtt.clone();

        let communication_options = match record.protocol {
            Protocol::None => serde_json::Value::Null,
            Protocol::ModbusRtu => serde_json::to_value(&record.modbus_rtu).unwrap_or(serde_json::Value::Null),
            Protocol::OpcUa => serde_json::to_value(&record.opcua).unwrap_or(serde_json::Value::Null),
        };
        self.statuses.lock().unwrap().insert(
            record.id,
            DeviceStatus {
                id: record.id,
                name: record.name.clone(),
                protocol: record.protocol,
                connected: false,
                options: meter.options,
                communication_options,
            },
        );

        let (stop_tx, stop_rx) = watch::channel(false);
        let name = record.name.clone();
        let statuses = self.statuses.clone();
        let handle = tokio::spawn(run_meter(meter, read_period, mqtt, stop_rx, statuses));
        self.meters.insert(record.id, ManagedMeter { name, handle, stop: stop_tx });
        Ok(())
    }

    fn start_devices_state_task(&mut self) {
        let Some((client, config)) = self.mqtt.clone() else {
            return;
        };
        let statuses = self.statuses.clone();
        self.devices_state_task = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(DEVICES_STATE_PERIOD).await;
                let snapshot = statuses.lock().unwrap().clone();
                if let Err(err) = mqtt::publish_devices_state(&client, &config, DEVICES_STATE_TOPIC, &snapshot) {
                    warn!("devices_state publish failed: {err}");
                }
            }
        }));
    }

    /// Signals the meter's poll task to stop and drops its handle; does not
    /// await task completion so shutdown of one meter never blocks another.
    pub fn stop_meter(&mut self, id: i64) -> Result<()> {
        let managed = self
            .meters
            .remove(&id)
            .ok_or_else(|| Error::NotRunning { id, name: String::new() })?;
        let _ = managed.stop.send(true);
        managed.handle.abort();
        self.statuses.lock().unwrap().remove(&id);
        info!("stopped meter {} (id {id})", managed.name);
        Ok(())
    }

    pub fn running_meter_ids(&self) -> Vec<i64> {
        self.meters.keys().copied().collect()
    }

    pub fn shutdown(&mut self) {
        if let Some(task) = self.devices_state_task.take() {
            task.abort();
        }
        for (id, managed) in self.meters.drain() {
            let _ = managed.stop.send(true);
            managed.handle.abort();
            info!("stopped meter {} (id {id})", managed.name);
        }
        self.statuses.lock().unwrap().clear();
    }
}

fn read_period_for(record: &MeterRecord) -> Duration {
    match record.protocol {
        Protocol::None => Duration::from_secs(5),
        Protocol::ModbusRtu => record
            .modbus_rtu
            .as_ref()
            .map(|opts| opts.read_period)
            .unwrap_or(Duration::from_secs(5)),
        Protocol::OpcUa => {
            record.opcua.as_ref().map(|opts| opts.read_period).unwrap_or(Duration::from_secs(5))
        }
    }
}

async fn run_meter(
    mut meter: EnergyMeter,
    read_period: Duration,
    mqtt: Option<(MqttClient, MqttConfig)>,
    mut stop_rx: watch::Receiver<bool>,
    statuses: StatusMap,
) {
    let name = meter.name.clone();
    let id = meter.id;
    loop {
        tokio::select! {
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
            }
            _ = tokio::time::sleep(read_period) => {
                if !meter.connected() {
                    if let Err(err) = meter.connect().await {
                        warn!("meter {name} failed to connect: {err}");
                        if let Some(status) = statuses.lock().unwrap().get_mut(&id) {
                            status.connected = false;
                        }
                        continue;
                    }
                }
                if let Err(err) = meter.poll().await {
                    warn!("meter {name} poll failed: {err}");
                    if let Some(status) = statuses.lock().unwrap().get_mut(&id) {
                        status.connected = meter.connected();
                    }
                    continue;
                }
                if let Some(status) = statuses.lock().unwrap().get_mut(&id) {
                    status.connected = meter.connected();
                }
                if let Some((client, config)) = &mqtt {
                    let envelope = meter.publish_envelope();
                    if let Err(err) = mqtt::publish_envelope(client, config, &name, &envelope) {
                        warn!("meter {name} publish failed: {err}");
                    }
                }

                let now = chrono::Utc::now();
                for entry in meter.collect_due_logs(now) {
                    info!(
                        "meter {name} node {} logged {} field(s) for [{} .. {}]",
                        entry.name,
                        entry.fields.len(),
                        entry.start_time,
                        entry.end_time
                    );
                }
            }
        }
    }

    meter.disconnect();
}
