//! postcfg - post-installation configuration orchestrator.
//!
//! Invoked by the installer once the base system is unpacked onto the
//! target volume. Exits 0 on success; nonzero only when a Critical step
//! (keyring bootstrap) failed.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

use postcfg::config::{JobConfig, TargetContext};
use postcfg::controller;
use postcfg::probe::Capabilities;
use postcfg::process::HostRunner;

#[derive(Parser)]
#[command(name = "postcfg")]
#[command(about = "Post-installation configuration for a mounted target root")]
#[command(
    after_help = "EXAMPLE:\n  postcfg --root /mnt --online --disk /dev/nvme0n1 --keyring archlinux"
)]
struct Cli {
    /// Host-side path where the target volume is mounted
    #[arg(long)]
    root: PathBuf,

    /// The installer detected network connectivity
    #[arg(long)]
    online: bool,

    /// Keyring identifier to populate (repeatable, ordered)
    #[arg(long = "keyring")]
    keyrings: Vec<String>,

    /// Target disk device (e.g. /dev/nvme0n1), for bootloader setup
    #[arg(long)]
    disk: Option<String>,

    /// Installer job configuration file (JSON)
    #[arg(long)]
    job_config: Option<PathBuf>,
}

fn main() -> ExitCode {
    // Load .env if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("[postcfg] Error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<bool> {
    let job = match cli.job_config {
        Some(ref path) => Some(JobConfig::load(path)?),
        None => None,
    };

    let ctx = TargetContext::new(&cli.root, cli.online, cli.keyrings, cli.disk, job)?;
    let runner = HostRunner::new(&ctx.root)?;

    let caps = Capabilities::probe(&ctx);
    println!("[postcfg] Target capabilities: {}", caps.summary());

    let report = controller::run(&ctx, &caps, &runner);
    report.print();
    Ok(report.success())
}
