//! Snapper configuration on the target's btrfs root.
//!
//! Re-runs must converge on the same end state, so this walks a fixed
//! sequence: tear down whatever stale `.snapshots` subvolume a previous
//! attempt left behind, recreate the snapper config (which recreates the
//! subvolume), remount, make the root subvolume the default, then fix up
//! access and periodic units. A half-finished snapshot setup is recoverable
//! on the next boot, so every step past the teardown logs and moves on
//! instead of failing the run.

use anyhow::{bail, Result};
use std::fs;

use crate::config::{TargetContext, ADMIN_GROUP};
use crate::probe::Capabilities;
use crate::process::Runner;

/// Mount point of the snapshot subvolume, relative to the target root.
pub const SNAPSHOTS_DIR: &str = ".snapshots";

/// snapper's root config file, created by `create-config` during this run.
pub const SNAPPER_ROOT_CONFIG: &str = "etc/snapper/configs/root";

/// Name of the root subvolume in the installer's layout.
pub const ROOT_SUBVOLUME: &str = "@";

/// Units enabled (never started) for periodic snapshots.
pub const SNAPPER_UNITS: &[&str] = &[
    "snapper-timeline.timer",
    "snapper-cleanup.timer",
    "grub-btrfsd",
];

/// Terminal state of the snapshot configuration pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotOutcome {
    /// snapper is not installed in the target; nothing was touched.
    Skipped,
    /// The sequence ran to the end (individual steps may have warned).
    Configured,
    /// Stale subvolume teardown failed; the remaining steps did not run.
    AbortedAtPurge,
}

/// Configure snapper for the target's root filesystem.
pub fn configure(
    ctx: &TargetContext,
    caps: &Capabilities,
    runner: &dyn Runner,
) -> Result<SnapshotOutcome> {
    if !caps.snapper {
        println!("[postcfg] snapper not installed, skipping snapshot setup");
        return Ok(SnapshotOutcome::Skipped);
    }

    println!("[postcfg] Configuring snapper for /");

    // Not mounted is the normal case on a fresh target.
    let mount_point = ctx.resolve(SNAPSHOTS_DIR);
    let _ = runner.run_on_host(&["umount", "-l", &mount_point.to_string_lossy()]);

    // A stale subvolume from an earlier attempt blocks create-config.
    // Deleting a non-empty one fails loudly; in that case nothing further
    // here can work, so the rest of the sequence is abandoned (the run as a
    // whole continues).
    if mount_point.exists() {
        let delete = runner.run_on_host(&[
            "btrfs",
            "subvolume",
            "delete",
            &mount_point.to_string_lossy(),
        ])?;
        if !delete.success() {
            eprintln!(
                "[postcfg] WARN: could not delete stale {} subvolume (exit code {}): {}",
                SNAPSHOTS_DIR,
                delete.code,
                delete.stderr_trimmed()
            );
            return Ok(SnapshotOutcome::AbortedAtPurge);
        }
    }

    best_effort(
        "snapper create-config",
        create_config(ctx, runner),
    );
    best_effort("remount fstab set", remount(runner));
    best_effort("set default subvolume", set_default_subvolume(runner));
    best_effort(
        "snapshot directory ownership",
        fix_ownership(runner),
    );
    best_effort(
        "snapper access policy",
        patch_access_policy(ctx),
    );
    best_effort("enable snapper units", enable_units(runner));

    if caps.grub_mkconfig {
        best_effort("grub snapshot menu", regenerate_grub(runner));
    }

    println!("[postcfg] Snapper configuration finished");
    Ok(SnapshotOutcome::Configured)
}

/// Create a fresh snapper configuration bound to the root filesystem.
///
/// `create-config` also creates the `.snapshots` subvolume as a side
/// effect; if it somehow didn't, create it explicitly so the remount has
/// something to bring online.
fn create_config(ctx: &TargetContext, runner: &dyn Runner) -> Result<()> {
    let create = runner.run_in_target(&[
        "snapper",
        "--no-dbus",
        "-c",
        "root",
        "create-config",
        "/",
    ])?;
    if !create.success() {
        bail!(
            "snapper create-config failed (exit code {}): {}",
            create.code,
            create.stderr_trimmed()
        );
    }

    if !ctx.resolve(SNAPSHOTS_DIR).exists() {
        let create_subvol =
            runner.run_in_target(&["btrfs", "subvolume", "create", "/.snapshots"])?;
        if !create_subvol.success() {
            bail!(
                "btrfs subvolume create /.snapshots failed (exit code {}): {}",
                create_subvol.code,
                create_subvol.stderr_trimmed()
            );
        }
    }
    Ok(())
}

/// Remount everything in the target's fstab, bringing `.snapshots` online.
fn remount(runner: &dyn Runner) -> Result<()> {
    let mount = runner.run_in_target(&["mount", "-a"])?;
    if !mount.success() {
        bail!(
            "mount -a failed (exit code {}): {}",
            mount.code,
            mount.stderr_trimmed()
        );
    }
    Ok(())
}

/// Mark the root subvolume as the filesystem default.
///
/// Without this the filesystem mounts the top-level volume when no explicit
/// subvolume is selected, which is not the installed system.
fn set_default_subvolume(runner: &dyn Runner) -> Result<()> {
    let list = runner.capture_in_target(&["btrfs", "subvolume", "list", "/"])?;
    if !list.success() {
        bail!(
            "btrfs subvolume list failed (exit code {}): {}",
            list.code,
            list.stderr_trimmed()
        );
    }

    let id = find_subvolume_id(&list.stdout, ROOT_SUBVOLUME).ok_or_else(|| {
        anyhow::anyhow!("root subvolume '{}' not found in subvolume list", ROOT_SUBVOLUME)
    })?;

    let set = runner.run_in_target(&["btrfs", "subvolume", "set-default", &id, "/"])?;
    if !set.success() {
        bail!(
            "btrfs subvolume set-default {} failed (exit code {}): {}",
            id,
            set.code,
            set.stderr_trimmed()
        );
    }
    Ok(())
}

/// Parse `btrfs subvolume list` output and return the ID of `name`.
///
/// Lines look like `ID 256 gen 30 top level 5 path @`.
pub fn find_subvolume_id(list_output: &str, name: &str) -> Option<String> {
    for line in list_output.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let id = match fields.as_slice() {
            ["ID", id, rest @ ..] if rest.last() == Some(&name) && rest.contains(&"path") => *id,
            _ => continue,
        };
        return Some(id.to_string());
    }
    None
}

/// Hand the snapshot directory to the administrative group.
fn fix_ownership(runner: &dyn Runner) -> Result<()> {
    let group_spec = format!(":{}", ADMIN_GROUP);
    let chown = runner.run_in_target(&["chown", "-R", &group_spec, "/.snapshots"])?;
    if !chown.success() {
        bail!(
            "chown {} /.snapshots failed (exit code {}): {}",
            group_spec,
            chown.code,
            chown.stderr_trimmed()
        );
    }
    Ok(())
}

/// Grant the administrative group access in snapper's root config.
///
/// Checked here, not in the startup capability pass: on a fresh target this
/// file does not exist until `create-config` runs a few steps earlier.
fn patch_access_policy(ctx: &TargetContext) -> Result<()> {
    let config_path = ctx.resolve(SNAPPER_ROOT_CONFIG);
    if !config_path.exists() {
        bail!("snapper root config {} not found", SNAPPER_ROOT_CONFIG);
    }

    let content = fs::read_to_string(&config_path)?;
    let patched = patch_allow_groups(&content, ADMIN_GROUP);
    fs::write(&config_path, patched)?;
    Ok(())
}

/// Rewrite the `ALLOW_GROUPS` line to grant `group`.
///
/// Appends the line if the config never had one.
pub fn patch_allow_groups(content: &str, group: &str) -> String {
    let wanted = format!("ALLOW_GROUPS=\"{}\"", group);
    let mut found = false;

    let mut lines: Vec<String> = content
        .lines()
        .map(|line| {
            if line.trim_start().starts_with("ALLOW_GROUPS=") {
                found = true;
                wanted.clone()
            } else {
                line.to_string()
            }
        })
        .collect();

    if !found {
        lines.push(wanted);
    }

    let mut patched = lines.join("\n");
    patched.push('\n');
    patched
}

/// Enable the periodic units without starting them.
///
/// `--now` would try to talk to a running systemd inside the chroot and
/// fail; activation is deferred to first boot.
fn enable_units(runner: &dyn Runner) -> Result<()> {
    let mut argv: Vec<&str> = vec!["systemctl", "enable"];
    argv.extend(SNAPPER_UNITS);
    let enable = runner.run_in_target(&argv)?;
    if !enable.success() {
        bail!(
            "systemctl enable failed (exit code {}): {}",
            enable.code,
            enable.stderr_trimmed()
        );
    }
    Ok(())
}

/// Regenerate the grub menu so snapshots show up in it.
fn regenerate_grub(runner: &dyn Runner) -> Result<()> {
    let mkconfig = runner.run_in_target(&["grub-mkconfig", "-o", "/boot/grub/grub.cfg"])?;
    if !mkconfig.success() {
        bail!(
            "grub-mkconfig failed (exit code {}): {}",
            mkconfig.code,
            mkconfig.stderr_trimmed()
        );
    }
    Ok(())
}

fn best_effort(what: &str, result: Result<()>) {
    if let Err(err) = result {
        eprintln!("[postcfg] WARN: {}: {:#}", what, err);
    }
}
