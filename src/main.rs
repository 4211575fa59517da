use std::ops::Deref;
use std::panic;

use anyhow::{Context, Result};
use clap::Parser;
use flexi_logger::{Logger, LoggerHandle};
use log::*;

use energy_gateway::commandline::{self, Commands};
use energy_gateway::config::GatewayConfig;
use energy_gateway::manager::DeviceManager;
use energy_gateway::mqtt::MqttConfig;

fn logging_init(loglevel: LevelFilter) -> LoggerHandle {
    let log_handle = Logger::try_with_env_or_str(loglevel.as_str())
        .expect("Cannot init logging")
        .start()
        .expect("Cannot start logging");

    panic::set_hook(Box::new(|panic_info| {
        let (filename, line, column) = panic_info
            .location()
            .map(|loc| (loc.file(), loc.line(), loc.column()))
            .unwrap_or(("<unknown>", 0, 0));
        let cause = panic_info.payload().downcast_ref::<String>().map(String::deref);
        let cause = cause.unwrap_or_else(|| {
            panic_info.payload().downcast_ref::<&str>().copied().unwrap_or("<cause unknown>")
        });

        error!(
            "Thread '{}' panicked at {}:{}:{}: {}",
            std::thread::current().name().unwrap_or("<unknown>"),
            filename,
            line,
            column,
            cause
        );
    }));
    log_handle
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = commandline::Args::parse();
    let _log_handle = logging_init(args.verbose.log_level_filter());

    let config = GatewayConfig::load(&args.config_file)
        .with_context(|| format!("Cannot load gateway config from {:?}", args.config_file))?;

    match args.command {
        Commands::Validate => {
            info!("Configuration file {:?} is valid: {} meter(s)", args.config_file, config.meters.len());
            for meter in &config.meters {
                info!(" - meter '{}' (id {}): {} node(s)", meter.name, meter.id, meter.nodes.len());
            }
        }
        Commands::Run => {
            let mqtt = match &args.mqtt_config_file {
                Some(path) => {
                    let mqtt_config = MqttConfig::load(path)
                        .with_context(|| format!("Cannot load MQTT config from {path:?}"))?;
                    let client = mqtt_config
                        .create_client()
                        .with_context(|| "Cannot create MQTT client")?;
                    Some((client, mqtt_config))
                }
                None => {
                    warn!("No MQTT config supplied; running without a publish sink");
                    None
                }
            };

            let mut manager = DeviceManager::new(mqtt);
            manager.start_all(&config).with_context(|| "Cannot start configured meters")?;
            info!("Running meter(s): {:?}", manager.running_meter_ids());

            tokio::signal::ctrl_c().await.with_context(|| "Cannot wait for shutdown signal")?;
            info!("Shutting down");
            manager.shutdown();
        }
    }

    Ok(())
}
