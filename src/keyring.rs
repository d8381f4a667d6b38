//! Pacman keyring bootstrap on the target.
//!
//! Signature verification gates every later package operation, so this is
//! the one part of the run that must succeed: init creates the trust
//! database, populate imports the configured keyrings into it, in that
//! order, both always attempted.

use anyhow::{bail, Result};

use crate::config::TargetContext;
use crate::process::Runner;

/// Initialize and populate the target's package-signing keyring.
pub fn bootstrap(ctx: &TargetContext, runner: &dyn Runner) -> Result<()> {
    println!("[postcfg] Initializing pacman keyring");
    let init = runner.run_in_target(&["pacman-key", "--init"])?;
    if !init.success() {
        bail!(
            "pacman-key --init failed (exit code {}): {}",
            init.code,
            init.stderr_trimmed()
        );
    }

    println!(
        "[postcfg] Populating keyrings: {}",
        ctx.keyrings.join(", ")
    );
    let mut argv: Vec<&str> = vec!["pacman-key", "--populate"];
    argv.extend(ctx.keyrings.iter().map(String::as_str));
    let populate = runner.run_in_target(&argv)?;
    if !populate.success() {
        bail!(
            "pacman-key --populate failed (exit code {}): {}",
            populate.code,
            populate.stderr_trimmed()
        );
    }

    Ok(())
}

/// Refresh the package databases if the installer saw connectivity.
///
/// Offline is not an error; the refresh is simply skipped.
pub fn refresh_databases(ctx: &TargetContext, runner: &dyn Runner) -> Result<()> {
    if !ctx.has_network {
        println!("[postcfg] No network connectivity, skipping database refresh");
        return Ok(());
    }

    println!("[postcfg] Refreshing package databases");
    let refresh = runner.run_in_target(&["pacman", "-Sy", "--noconfirm"])?;
    if !refresh.success() {
        bail!(
            "pacman -Sy failed (exit code {}): {}",
            refresh.code,
            refresh.stderr_trimmed()
        );
    }
    Ok(())
}

/// Kill any gpg-agent left behind by keyring operations.
///
/// pacman-key leaves a gpg-agent running in the target (FS#45351); if it
/// stays around the target partition can't reliably be unmounted later.
/// Nothing running is the normal case and not a failure.
pub fn kill_gpg_agent(runner: &dyn Runner) -> Result<()> {
    let kill = runner.run_in_target(&["killall", "-9", "gpg-agent"])?;
    if !kill.success() {
        println!("[postcfg] No stray gpg-agent to terminate");
    }
    Ok(())
}
