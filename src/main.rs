use anyhow::Result;
use svid_sidecar::{
    artifacts::{ArtifactLayout, ArtifactWriter},
    config::{self, SidecarConfig},
    process::{self, ProcessSupervisor},
    sidecar::Sidecar,
    telemetry, workload,
};
use tokio::signal;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Initialize telemetry first
    telemetry::init()?;
    info!("Starting svid-sidecar...");

    // 2. Load configuration, from the first argument if one is given
    let config = match std::env::args().nth(1) {
        Some(path) => config::load_config_from(path)?,
        None => config::load_config()?,
    };

    // 3. Build the rotation pipeline
    let layout = ArtifactLayout::from_config(&config);
    let writer = ArtifactWriter::new(layout);
    let supervisor = build_supervisor(&config)?;
    let (sidecar, mut cert_ready) = Sidecar::new(writer, supervisor);

    // 4. Surface readiness transitions in the log
    tokio::spawn(async move {
        while cert_ready.ready().await {
            info!("Certificates are ready on disk");
        }
    });

    // 5. Watch the Workload API until the stream ends or shutdown is requested.
    //    A running child process is left to its own lifecycle either way.
    info!(agent_address = %config.agent_address, "Connecting to agent");
    tokio::select! {
        result = workload::watch(&config.agent_address, &sidecar) => result?,
        _ = signal::ctrl_c() => info!("Shutdown signal received, stopping svid-sidecar..."),
    }

    Ok(())
}

/// Build the process supervisor the configuration asks for, if any
fn build_supervisor(config: &SidecarConfig) -> Result<Option<ProcessSupervisor>> {
    if config.cmd.is_empty() {
        warn!("No cmd defined to execute");
        return Ok(None);
    }

    let renew_signal = process::resolve_signal(&config.renew_signal)?;
    Ok(Some(ProcessSupervisor::managed(
        config.cmd.clone(),
        config.cmd_args.clone(),
        renew_signal,
    )))
}
