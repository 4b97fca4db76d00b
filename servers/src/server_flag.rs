use anyhow::Result;
use std::sync::Arc;
use tokio::signal;

mod flag_logic;
use flag_logic::{config, logger};
use flag_logic::publisher::LogPublisher;
use flag_logic::race_control::{FlagMachine, RaceControlTransform};
use lib_livetiming::signalr::{ReconnectSupervisor, StartupFilter};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let (config, notes) = config::load_config();
    let log_path = logger::setup_logging(&config.log_dir(), &config.log_level(), &config.log_prefix())?;
    log::info!("Logging to {}", log_path.display());
    for (level, note) in notes {
        log::log!(level, "{}", note);
    }

    let hub = config.to_hub_config();
    let machine = Arc::new(FlagMachine::default());
    let filter = StartupFilter::new(
        Arc::new(RaceControlTransform),
        machine.clone(),
        Arc::new(LogPublisher::new(config.state_file.clone())),
    );

    let (supervisor, handle) = ReconnectSupervisor::from_config(&hub, filter)?;
    let client_handle = tokio::spawn(supervisor.run());

    // Wait for shutdown signal
    tokio::select! {
        _ = signal::ctrl_c() => {
            log::info!("Ctrl-C received, initiating shutdown.");
        }
        _ = async {
            #[cfg(unix)]
            {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut term_signal) => {
                        term_signal.recv().await;
                        log::info!("SIGTERM received, initiating shutdown.");
                    }
                    Err(e) => {
                        log::warn!("Cannot listen for SIGTERM: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                // On non-unix platforms, just wait forever.
                std::future::pending::<()>().await;
            }
        } => {}
    }

    handle.close();
    client_handle.await?;

    log::info!("Shutdown complete. Last effective flag: {}", machine.current().await);
    Ok(())
}
