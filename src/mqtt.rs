//! MQTT publish sink: one consolidated JSON payload per meter per read cycle,
//! rather than one message per field.

use anyhow::{Context, Result};
use paho_mqtt::{Client, ConnectOptionsBuilder, CreateOptionsBuilder};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct MqttConfig {
    uri: String,
    username: Option<String>,
    password: Option<String>,
    #[serde(default = "MqttConfig::default_topic_prefix")]
    topic_prefix: String,
    #[serde(default = "MqttConfig::default_qos")]
    qos: i32,
    #[serde(default = "MqttConfig::default_client_id")]
    client_id: String,
    #[serde(default = "MqttConfig::default_operation_timeout", with = "humantime_serde")]
    operation_timeout: Duration,
    #[serde(default = "MqttConfig::default_keep_alive_interval", with = "humantime_serde")]
    keep_alive_interval: Duration,
    #[serde(default = "MqttConfig::default_auto_reconnect_interval_min", with = "humantime_serde")]
    auto_reconnect_interval_min: Duration,
    #[serde(default = "MqttConfig::default_auto_reconnect_interval_max", with = "humantime_serde")]
    auto_reconnect_interval_max: Duration,
}

impl MqttConfig {
    fn default_topic_prefix() -> String {
        "energy-gateway".into()
    }

    fn default_qos() -> i32 {
        0
    }

    fn generate_random_string(len: usize) -> String {
        use rand::distr::Alphanumeric;
        use rand::Rng;

        rand::rng().sample_iter(&Alphanumeric).take(len).map(char::from).collect()
    }

    fn default_client_id() -> String {
        format!("energy-gateway-{}", Self::generate_random_string(8))
    }

    fn default_operation_timeout() -> Duration {
        Duration::from_secs(10)
    }

    fn default_keep_alive_interval() -> Duration {
        Duration::from_secs(30)
    }

    fn default_auto_reconnect_interval_min() -> Duration {
        Duration::from_secs(1)
    }

    fn default_auto_reconnect_interval_max() -> Duration {
        Duration::from_secs(30)
    }

    pub const DEFAULT_CONFIG_FILE: &str = "mqtt.yaml";

    pub fn load(config_file_path: &str) -> Result<Self> {
        log::debug!("Loading MQTT config file from {config_file_path:?}");
        let config_file = std::fs::File::open(config_file_path)
            .with_context(|| format!("Cannot open MQTT config file {config_file_path:?}"))?;
        let config: Self = serde_yaml::from_reader(&config_file)
            .with_context(|| format!("Cannot read MQTT config from file: {config_file_path:?}"))?;
        Ok(config)
    }

    pub fn create_client(&self) -> Result<Client> {
        let create_opts = CreateOptionsBuilder::new()
            .server_uri(&self.uri)
            .client_id(&self.client_id)
            .persistence(None)
            .finalize();

        let mut client = Client::new(create_opts)
            .with_context(|| format!("Error creating MQTT client for server: {}", self.uri))?;

        client.set_timeout(self.operation_timeout);

        let mut conn_builder = ConnectOptionsBuilder::new();
        conn_builder
            .keep_alive_interval(self.keep_alive_interval)
            .clean_session(true)
            .automatic_reconnect(self.auto_reconnect_interval_min, self.auto_reconnect_interval_max);

        if let Some(user_name) = &self.username {
            conn_builder.user_name(user_name.as_str());
        }
        if let Some(password) = &self.password {
            conn_builder.password(password.as_str());
        }
        let conn_opts = conn_builder.finalize();

        log::info!("Connecting to MQTT broker {} as {}", self.uri, self.client_id);
        client.connect(conn_opts).with_context(|| "Failed to connect to MQTT broker")?;
        log::info!("Connected to MQTT broker");
        Ok(client)
    }
}

/// Publishes one meter's whole publish envelope as a single retained-free
/// JSON message under `<topic_prefix>/<meter_name>`.
pub fn publish_envelope(
    client: &Client,
    config: &MqttConfig,
    meter_name: &str,
    envelope: &serde_json::Map<String, serde_json::Value>,
) -> Result<()> {
    let payload = serde_json::to_string(envelope).with_context(|| "Cannot serialize publish envelope")?;
    let message = paho_mqtt::Message::new(format!("{}/{meter_name}", config.topic_prefix), payload, config.qos);
    client.publish(message).with_context(|| "Cannot publish MQTT message")?;
    Ok(())
}

/// Publishes the whole fleet's identity and connection state as a single
/// message keyed by each meter's id, under `<topic_prefix>/<topic>`.
pub fn publish_devices_state<T: serde::Serialize>(
    client: &Client,
    config: &MqttConfig,
    topic: &str,
    statuses: &std::collections::HashMap<i64, T>,
) -> Result<()> {
    let keyed: std::collections::HashMap<String, &T> =
        statuses.iter().map(|(id, status)| (id.to_string(), status)).collect();
    let payload = serde_json::to_string(&keyed).with_context(|| "Cannot serialize devices_state payload")?;
    let message = paho_mqtt::Message::new(format!("{}/{topic}", config.topic_prefix), payload, 0);
    client.publish(message).with_context(|| "Cannot publish devices_state MQTT message")?;
    Ok(())
}
