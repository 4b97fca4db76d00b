//! # Live Feed Test
//!
//! Connects to the real live timing hub and prints every raw item of the
//! subscribed topic, tagged with the connection epoch and whether the startup
//! filter would treat it as backlog.

use clap::Parser;
use lib_livetiming::signalr::{ConnectionEpoch, HubConfig, ItemSink, RawItem, ReconnectSupervisor};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(about = "Prints raw items from the live timing hub")]
struct Args {
    /// Topic to subscribe to.
    #[arg(long, default_value = "RaceControlMessages")]
    topic: String,

    /// Seconds to listen before closing the client.
    #[arg(long, default_value_t = 120)]
    seconds: u64,
}

struct PrintSink;

impl ItemSink for PrintSink {
    async fn handle(&self, item: RawItem, epoch: &ConnectionEpoch) {
        // // Statement: Items without a parsable Utc are shown as live
        let backlog = item
            .get("Utc")
            .and_then(|utc| utc.as_str())
            .and_then(|utc| chrono::DateTime::parse_from_rfc3339(utc).ok())
            .is_some_and(|ts| epoch.is_backlog(ts.to_utc()));

        println!(
            "[epoch {}]{} {}",
            epoch.sequence(),
            if backlog { "[backlog]" } else { "" },
            item
        );
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let hub = HubConfig {
        topic: args.topic,
        ..HubConfig::default()
    };

    println!("[*] Listening to {} on {} for {}s ...", hub.topic, hub.connect_url, args.seconds);

    let (supervisor, handle) = ReconnectSupervisor::from_config(&hub, PrintSink)?;
    let task = tokio::spawn(supervisor.run());

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(args.seconds)) => {}
        _ = tokio::signal::ctrl_c() => println!("[*] Interrupted."),
    }

    // // Statement: Closing twice must be harmless
    handle.close();
    handle.close();
    task.await?;

    println!("[SUCCESS] Client closed cleanly.");
    Ok(())
}
