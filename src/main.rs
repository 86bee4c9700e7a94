//! Headless broker monitor
//!
//! Loads a profile, connects, subscribes to the configured topics and prints
//! every received message until Ctrl-C. This is the thin collaborator on top
//! of the session core; any richer UI polls the same snapshot reads.

use std::path::PathBuf;
use std::time::Duration;

use color_eyre::eyre::{eyre, Result};
use mqttdeck::csv_io::EXPORT_TIMESTAMP_FORMAT;
use mqttdeck::{AppConfig, MqttSession, QoS};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let config = load_profile()?;
    let mut session = MqttSession::new();

    info!(
        host = %config.connection.host,
        port = config.connection.port,
        "connecting"
    );
    session.connect(&config.connection).await?;

    for topic in &config.topics {
        match session.subscribe(topic, QoS::AtMostOnce).await {
            Ok(()) => info!(%topic, "subscribed"),
            Err(e) => warn!(%topic, error = %e, "subscribe failed"),
        }
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("shutting down"),
        _ = tail_messages(&session) => {}
    }

    session.disconnect().await;
    Ok(())
}

/// Polls the log snapshot and prints anything new, the way a UI would
async fn tail_messages(session: &MqttSession) {
    let mut ticker = tokio::time::interval(Duration::from_millis(500));
    let mut printed: u64 = 0;
    loop {
        ticker.tick().await;
        let state = session.connection_state();
        if !state.is_connected() {
            warn!(?state, "connection gone, stopping monitor");
            return;
        }
        for message in session.message_log_snapshot() {
            if message.serial > printed {
                printed = message.serial;
                println!(
                    "[{}] #{} {} {}",
                    message.timestamp.format(EXPORT_TIMESTAMP_FORMAT),
                    message.serial,
                    message.topic,
                    message.payload_text()
                );
            }
        }
    }
}

fn load_profile() -> Result<AppConfig> {
    let candidates: Vec<PathBuf> = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .into_iter()
        .chain(std::iter::once(PathBuf::from("mqttdeck.toml")))
        .chain(AppConfig::default_path())
        .collect();

    for path in &candidates {
        if path.exists() {
            return AppConfig::load(path).map_err(|e| eyre!("{}: {e}", path.display()));
        }
    }
    Err(eyre!(
        "no profile found; pass a path or create mqttdeck.toml"
    ))
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .init();
    Ok(())
}
