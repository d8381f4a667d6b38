//! Bootloader regeneration on the target.
//!
//! Two independent branches, each gated by what the target actually ships:
//! a grub-style refresh (update-grub wrapper plus the hidden-menu bootflag
//! pair) and a limine EFI loader configuration with the encrypted root's
//! LUKS UUID baked into the kernel command line. Neither branch excludes
//! the other.

use anyhow::{bail, Context, Result};
use std::fs;

use crate::config::TargetContext;
use crate::probe::{Capabilities, LIMINE_EFI_MARKER};
use crate::process::Runner;

/// Where the limine loader config lands, relative to the target root.
pub const LIMINE_CONF: &str = "boot/EFI/limine/limine.conf";

/// EFI boot entry label registered with the firmware.
pub const LIMINE_BOOT_LABEL: &str = "Arch Linux Limine Bootloader";

/// Regenerate whatever bootloader the target carries.
pub fn regenerate(ctx: &TargetContext, caps: &Capabilities, runner: &dyn Runner) -> Result<()> {
    if caps.update_grub {
        refresh_grub(runner);
    }
    if caps.grub_set_bootflag {
        set_grub_bootflags(runner);
    }
    if caps.limine {
        if let Err(err) = install_limine(ctx, runner) {
            eprintln!("[postcfg] WARN: limine setup: {:#}", err);
        }
    }
    if caps.dd {
        rewrite_kernel_images(runner);
    }
    Ok(())
}

/// Regenerate grub.cfg through the distribution's update-grub wrapper.
fn refresh_grub(runner: &dyn Runner) {
    println!("[postcfg] Regenerating grub configuration");
    match runner.run_in_target(&["update-grub"]) {
        Ok(update) if !update.success() => {
            eprintln!(
                "[postcfg] WARN: update-grub exited with code {}: {}",
                update.code,
                update.stderr_trimmed()
            );
        }
        Ok(_) => {}
        Err(err) => eprintln!("[postcfg] WARN: update-grub: {:#}", err),
    }
}

/// Arm the auto-hidden menu for the next boot.
fn set_grub_bootflags(runner: &dyn Runner) {
    match runner.run_in_target(&[
        "grub-editenv",
        "-",
        "set",
        "menu_auto_hide=1",
        "boot_success=1",
    ]) {
        Ok(set) if !set.success() => {
            eprintln!(
                "[postcfg] WARN: grub-editenv exited with code {}: {}",
                set.code,
                set.stderr_trimmed()
            );
        }
        Ok(_) => {}
        Err(err) => eprintln!("[postcfg] WARN: grub-editenv: {:#}", err),
    }
}

/// Install the limine EFI payload and write its loader configuration.
///
/// The LUKS UUID is resolved here, at regeneration time, from the root
/// partition derived off the installer's disk device; the container has
/// long been created and opened by the time this runs.
fn install_limine(ctx: &TargetContext, runner: &dyn Runner) -> Result<()> {
    let disk = ctx
        .disk
        .as_deref()
        .context("limine present but no target disk configured")?;
    let (_boot_part, root_part) = partition_paths(disk);

    println!("[postcfg] Writing limine configuration for {}", disk);

    let efi_dir = ctx.resolve("boot/EFI/limine");
    fs::create_dir_all(&efi_dir)
        .with_context(|| format!("Failed to create {}", efi_dir.display()))?;
    fs::copy(ctx.resolve(LIMINE_EFI_MARKER), efi_dir.join("BOOTX64.EFI"))
        .context("Failed to install limine EFI payload")?;

    let register = runner.run_on_host(&[
        "efibootmgr",
        "--create",
        "--disk",
        disk,
        "--part",
        "1",
        "--label",
        LIMINE_BOOT_LABEL,
        "--loader",
        "\\EFI\\limine\\BOOTX64.EFI",
        "--unicode",
    ])?;
    if !register.success() {
        eprintln!(
            "[postcfg] WARN: efibootmgr exited with code {}: {}",
            register.code,
            register.stderr_trimmed()
        );
    }

    let uuid_query = runner.run_on_host(&["cryptsetup", "luksUUID", &root_part])?;
    if !uuid_query.success() {
        bail!(
            "cryptsetup luksUUID {} failed (exit code {}): {}",
            root_part,
            uuid_query.code,
            uuid_query.stderr_trimmed()
        );
    }
    let uuid = uuid_query.stdout_trimmed().to_string();
    if uuid.is_empty() {
        bail!("cryptsetup luksUUID {} produced no UUID", root_part);
    }

    let conf_path = ctx.resolve(LIMINE_CONF);
    fs::write(&conf_path, render_limine_conf(&uuid))
        .with_context(|| format!("Failed to write {}", conf_path.display()))?;
    Ok(())
}

/// Derive boot and root partition paths from a disk device.
///
/// NVMe namespaces take a `p<N>` suffix, everything else appends the
/// number directly.
pub fn partition_paths(disk: &str) -> (String, String) {
    if disk.contains("nvme") {
        (format!("{}p1", disk), format!("{}p2", disk))
    } else {
        (format!("{}1", disk), format!("{}2", disk))
    }
}

/// Render the two-entry limine loader configuration.
///
/// Primary and fallback entries differ only in the initramfs image; both
/// unlock the root container by the resolved UUID.
pub fn render_limine_conf(luks_uuid: &str) -> String {
    let cmdline = format!(
        "quiet cryptdevice=UUID={}:root root=/dev/mapper/root rw rootflags=subvol=@ rootfstype=btrfs",
        luks_uuid
    );
    format!(
        "timeout: 3\n\
         \n\
         /Arch Linux\n\
         \x20   protocol: linux\n\
         \x20   path: boot():/vmlinuz-linux\n\
         \x20   cmdline: {cmdline}\n\
         \x20   module_path: boot():/initramfs-linux.img\n\
         \n\
         /Arch Linux (fallback)\n\
         \x20   protocol: linux\n\
         \x20   path: boot():/vmlinuz-linux\n\
         \x20   cmdline: {cmdline}\n\
         \x20   module_path: boot():/initramfs-linux-fallback.img\n"
    )
}

/// Rewrite kernel images through a dd block copy.
///
/// Works around a grub bug where directly-written vmlinuz images fail to
/// boot; copying each image through dd produces a clean block layout.
fn rewrite_kernel_images(runner: &dyn Runner) {
    let script = "mkdir -p /tmp/vmlinuz-hack && mv /boot/vmlinuz-* /tmp/vmlinuz-hack/ && \
                  find /tmp/vmlinuz-hack/ -maxdepth 1 -type f -exec sh -c \
                  'dd if=\"$1\" of=\"/boot/$(basename \"$1\")\"' sh {} \\;";
    match runner.run_in_target(&["sh", "-c", script]) {
        Ok(rewrite) if !rewrite.success() => {
            eprintln!(
                "[postcfg] WARN: kernel image rewrite exited with code {}: {}",
                rewrite.code,
                rewrite.stderr_trimmed()
            );
        }
        Ok(_) => {}
        Err(err) => eprintln!("[postcfg] WARN: kernel image rewrite: {:#}", err),
    }
}
