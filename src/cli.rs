//! Command Line Interface.

use clap::Parser;
use std::path::PathBuf;

/// The rust main program running on the capture kiosk and responsible for
/// pairing sessions, liveness validation and uploads
#[derive(Parser, Debug)]
#[clap(about, version)]
pub struct Cli {
    /// Load config from file.
    #[clap(short = 'c', long)]
    pub config: Option<PathBuf>,
    /// Exit after the first completed session.
    #[clap(short = 'O', long)]
    pub oneshot: bool,
    /// Use the simulated distance provider instead of probing the sensor
    /// driver.
    #[clap(short = 's', long)]
    pub simulate_hardware: bool,
    /// Override the admin surface listen address.
    #[clap(long)]
    pub admin_addr: Option<std::net::SocketAddr>,
}
