//! `run`: connect, set up the bridge and dispatch until interrupted.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use tasmota_sync_core::{DeviceMessage, Engine};
use tasmota_sync_mqtt::{MqttBus, MqttRegistry, MqttSession};

use crate::cli::{GlobalOpts, RunArgs};
use crate::config::{self, RunConfig};
use crate::error::CliError;

pub async fn handle(args: RunArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let cfg = config::load_config(global)?;
    let resolved = config::resolve_run(&args, &cfg)?;
    debug!(?resolved, "resolved configuration");

    let cancel = CancellationToken::new();
    let (session, messages) = MqttSession::connect(&resolved.broker, cancel.clone())?;

    let result = bridge(&session, messages, &resolved, args.connect_timeout, &cancel).await;

    session.shutdown();
    session.closed().await;
    result
}

async fn bridge(
    session: &MqttSession,
    messages: mpsc::Receiver<DeviceMessage>,
    resolved: &RunConfig,
    connect_timeout: Duration,
    cancel: &CancellationToken,
) -> Result<(), CliError> {
    let registry = MqttRegistry::new(session.clone(), &resolved.registry_base)?;
    let bus = MqttBus::new(session.clone());

    session
        .wait_connected(connect_timeout)
        .await
        .map_err(|source| CliError::ConnectionFailed {
            broker: resolved.broker.address(),
            source,
        })?;

    let engine = Engine::start(&resolved.bridge, bus, registry).await?;
    info!(registry = %resolved.registry_base, "bridge running");

    let run = engine.run(messages, cancel.clone());
    tokio::pin!(run);

    tokio::select! {
        () = &mut run => {}
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("interrupted, shutting down");
            cancel.cancel();
            run.await;
        }
    }
    Ok(())
}
