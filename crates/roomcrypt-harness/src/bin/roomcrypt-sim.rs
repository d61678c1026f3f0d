//! Room simulation binary.
//!
//! # Usage
//!
//! ```bash
//! # Three users with two devices each, five messages per user
//! roomcrypt-sim
//!
//! # Force rotations and watch the key traffic
//! roomcrypt-sim --users 4 --messages 30 --rotate-every 10 --log-level debug
//! ```

use clap::Parser;
use roomcrypt_harness::scenario::{ScenarioConfig, run_room_scenario};
use roomcrypt_runtime::RuntimeConfig;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Deterministic room encryption simulation
#[derive(Parser, Debug)]
#[command(name = "roomcrypt-sim")]
#[command(about = "Simulate group-session encryption in one room")]
#[command(version)]
struct Args {
    /// Number of users in the room
    #[arg(short, long, default_value = "3")]
    users: usize,

    /// Devices per user
    #[arg(short, long, default_value = "2")]
    devices: usize,

    /// Messages each user sends
    #[arg(short, long, default_value = "5")]
    messages: usize,

    /// Rotate sessions after this many messages
    #[arg(long, default_value = "100")]
    rotate_every: u32,

    /// RNG seed
    #[arg(long, default_value = "24301")]
    seed: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let mut runtime = RuntimeConfig::default();
    runtime.encryption.rotation_period_messages = args.rotate_every;
    let config = ScenarioConfig {
        users: args.users,
        devices_per_user: args.devices,
        messages_per_user: args.messages,
        seed: args.seed,
        runtime,
    };

    tracing::info!(
        "simulating {} user(s) x {} device(s), {} message(s) each, seed {}",
        config.users,
        config.devices_per_user,
        config.messages_per_user,
        config.seed
    );

    let mut sim = turmoil::Builder::new().build();
    sim.client("room", async move {
        let report = run_room_scenario(&config).await?;

        tracing::info!("encrypted:           {}", report.encrypted);
        tracing::info!("decrypted:           {}", report.decrypted);
        tracing::info!("failed:              {}", report.failed);
        tracing::info!("sessions:            {}", report.sessions);
        tracing::info!("room keys delivered: {}", report.room_keys_delivered);

        if report.failed > 0 {
            return Err(format!("{} decryption(s) failed", report.failed).into());
        }
        Ok(())
    });
    sim.run()?;

    Ok(())
}
