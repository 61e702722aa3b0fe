/*!
Simulateur de capteurs : publie des événements de mouvement vers le broker
sur `<ns>/sensor/<node>/<sensor>`, comme le feraient les nœuds ESP32.
*/

use anyhow::{Context, Result};
use clap::Parser;
use rumqttc::{AsyncClient, MqttOptions};
use std::time::Duration;
use vigil_devkit::SensorPayloadBuilder;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Adresse du broker MQTT
    #[arg(long, env = "MQTT_BROKER", default_value = "localhost")]
    host: String,

    #[arg(long, env = "MQTT_PORT", default_value = "1883")]
    port: u16,

    #[arg(long, default_value = "home")]
    namespace: String,

    /// Nœuds simulés (location), séparés par des virgules
    #[arg(long, value_delimiter = ',', default_value = "esp01")]
    nodes: Vec<String>,

    #[arg(long, value_delimiter = ',', default_value = "pir")]
    sensors: Vec<String>,

    /// Nombre de tours (un message par couple nœud/capteur par tour)
    #[arg(long, default_value = "5")]
    count: u32,

    #[arg(long, default_value = "2000")]
    interval_ms: u64,

    /// Publie motion=false au lieu de motion=true
    #[arg(long)]
    idle: bool,

    #[arg(long)]
    pin: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut opts = MqttOptions::new("vigil-sensor-sim", &args.host, args.port);
    opts.set_keep_alive(Duration::from_secs(15));
    let (client, mut eventloop) = AsyncClient::new(opts, 64);

    // l'eventloop doit tourner pour que les publish partent
    let pump = tokio::spawn(async move {
        loop {
            if let Err(e) = eventloop.poll().await {
                log::warn!("⚠️ MQTT error: {e}");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    });

    for round in 1..=args.count {
        for node in &args.nodes {
            for sensor in &args.sensors {
                let mut builder = SensorPayloadBuilder::new(node.as_str(), sensor.as_str()).motion(!args.idle);
                if let Some(pin) = &args.pin {
                    builder = builder.pin(pin.as_str());
                }
                builder
                    .publish(&client, &args.namespace)
                    .await
                    .with_context(|| format!("publish failed for {node}/{sensor}"))?;
            }
        }
        log::info!("round {round}/{} sent", args.count);
        tokio::time::sleep(Duration::from_millis(args.interval_ms)).await;
    }

    client.disconnect().await.context("disconnect failed")?;
    pump.abort();
    Ok(())
}
